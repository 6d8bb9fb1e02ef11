//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::core::auth::{IdentityVerifier, SessionVerifier};
use crate::core::error::Result;
use crate::core::store::Store;
use crate::social::broker::EventBroker;
use crate::social::conversations::ConversationManager;
use crate::social::friends::FriendManager;
use crate::social::matching::MatchService;
use crate::social::notifier::{Notifier, TracingNotifier};

/// Configuration for the Spotter server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: SocketAddr,
    /// Root of the data directory
    pub data_root: PathBuf,
    /// Explicit `sqlite:` URL, overrides the file under `data_root`
    pub database_url: Option<String>,
    /// Time a realtime connection has to authenticate
    pub handshake_timeout: Duration,
    /// Ping interval on realtime connections
    pub heartbeat_interval: Duration,
    /// Outbound queue depth per realtime connection
    pub channel_capacity: usize,
    /// Maximum candidates returned by friend search
    pub search_limit: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            data_root: spotter_common::spotter_root(),
            database_url: None,
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            channel_capacity: 256,
            search_limit: 20,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

impl ServerConfig {
    /// Defaults overridden by `SPOTTER_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("SPOTTER_ADDR", defaults.bind_addr),
            data_root: defaults.data_root,
            database_url: std::env::var("SPOTTER_DATABASE_URL").ok(),
            handshake_timeout: Duration::from_secs(env_or(
                "SPOTTER_HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout.as_secs(),
            )),
            heartbeat_interval: Duration::from_secs(env_or(
                "SPOTTER_HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )),
            channel_capacity: env_or("SPOTTER_CHANNEL_CAPACITY", defaults.channel_capacity),
            search_limit: env_or("SPOTTER_SEARCH_LIMIT", defaults.search_limit),
        }
    }

    /// Create config with a custom data root
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_root: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        spotter_common::database_path_in(&self.data_root)
    }

    /// Ensure all directories exist
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        spotter_common::init_structure_in(&self.data_root)?;
        Ok(())
    }

    pub async fn open_store(&self) -> Result<Store> {
        match &self.database_url {
            Some(url) => Store::open_url(url).await,
            None => Store::open(&self.database_path()).await,
        }
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub broker: Arc<EventBroker>,
    pub friends: Arc<FriendManager>,
    pub matches: Arc<MatchService>,
    pub conversations: Arc<ConversationManager>,
}

impl AppState {
    /// Wire every service around an opened store, verifying with sessions
    pub fn new(config: ServerConfig, store: Arc<Store>) -> Self {
        let verifier: Arc<dyn IdentityVerifier> = Arc::new(SessionVerifier::new(store.clone()));
        let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
        Self::with_services(config, store, verifier, notifier)
    }

    pub fn with_services(
        config: ServerConfig,
        store: Arc<Store>,
        verifier: Arc<dyn IdentityVerifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let broker = Arc::new(EventBroker::new(config.channel_capacity));
        let friends = Arc::new(FriendManager::new(
            store.clone(),
            broker.clone(),
            notifier,
            config.search_limit,
        ));
        let matches = Arc::new(MatchService::new(store.clone()));
        let conversations = Arc::new(ConversationManager::new(store.clone(), broker.clone()));

        Self {
            config,
            store,
            verifier,
            broker,
            friends,
            matches,
            conversations,
        }
    }
}
