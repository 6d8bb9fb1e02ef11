use crate::core::error::{Error, Result};
use crate::core::models::IdentityClaim;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Verified caller of the current request
#[derive(Clone, Debug)]
pub struct Ctx {
    claim: IdentityClaim,
}

impl Ctx {
    pub fn new(claim: IdentityClaim) -> Self {
        Self { claim }
    }

    pub fn user_id(&self) -> &str {
        &self.claim.id
    }

    pub fn display_name(&self) -> &str {
        &self.claim.display_name
    }

    pub fn claim(&self) -> &IdentityClaim {
        &self.claim
    }
}

impl<S> FromRequestParts<S> for Ctx
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Ctx>()
            .cloned()
            .ok_or(Error::AuthenticationFailed("request was not authenticated"))
    }
}
