#[tokio::main]
async fn main() -> anyhow::Result<()> {
    spotter_server::run().await
}
