//! Credential parsing and the permission capability
//!
//! Authentication decisions are an external collaborator's job; this module
//! only parses HTTP Basic credentials off the wire and defines the
//! [`AccessPolicy`] capability the handlers consult. Git clients send the
//! user's token as the Basic password.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Credentials presented by a Git or LFS client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

/// Parse an `Authorization: Basic ...` header value
///
/// Returns `None` for missing, non-Basic, or undecodable headers; the
/// caller treats that as an anonymous request.
pub fn parse_basic(header: &str) -> Option<Credentials> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;

    let (username, token) = decoded.split_once(':')?;
    Some(Credentials {
        username: username.to_string(),
        token: token.to_string(),
    })
}

/// Permission capability consumed by the handlers
///
/// Implementations resolve the actor's identity and the repository's
/// visibility however the surrounding system does; the bridge only asks
/// these two questions.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn can_read(&self, repo: &str, actor: Option<&Credentials>) -> bool;

    async fn can_write(&self, repo: &str, actor: Option<&Credentials>) -> bool;
}

/// Default policy: anonymous reads, any presented credentials may write
///
/// Stands in for the surrounding system's real permission service; useful
/// for local deployments and tests.
pub struct OpenPolicy;

#[async_trait]
impl AccessPolicy for OpenPolicy {
    async fn can_read(&self, _repo: &str, _actor: Option<&Credentials>) -> bool {
        true
    }

    async fn can_write(&self, _repo: &str, actor: Option<&Credentials>) -> bool {
        actor.is_some()
    }
}
