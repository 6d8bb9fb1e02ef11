use crate::core::auth::bearer_token;
use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::{Error, Result};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;

pub async fn mw_require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    debug!("MIDDLEWARE: require_auth");

    let auth_header = match req.headers().get(header::AUTHORIZATION) {
        Some(h) => h
            .to_str()
            .map_err(|_| Error::AuthenticationFailed("malformed authorization header"))?,
        None => return Err(Error::AuthenticationFailed("missing token")),
    };

    let token = bearer_token(auth_header)
        .ok_or(Error::AuthenticationFailed("expected a bearer token"))?;

    let claim = state.verifier.verify(token).await?;

    req.extensions_mut().insert(Ctx::new(claim));

    Ok(next.run(req).await)
}
