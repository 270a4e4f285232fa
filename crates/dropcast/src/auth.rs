//! Gate applied to a connection before it reaches the room registry.
//!
//! Dropcast does not manage accounts. Whoever deploys it decides who may
//! connect by implementing [`Authenticator`]; the server calls it once per
//! connection, right after the WebSocket upgrade and before the
//! connection joins a channel. Rejected connections are closed with a
//! policy-violation close frame.

use dropcast_transport::UpgradeRequest;

/// Query parameter carrying the shared secret for [`SharedToken`].
pub const TOKEN_PARAM: &str = "token";

/// Why a connection was refused.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credential was supplied.
    #[error("missing credential")]
    MissingToken,

    /// The supplied credential did not match.
    #[error("invalid credential")]
    InvalidToken,

    /// Rejected for an implementation-specific reason.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Decides whether an upgraded connection may proceed.
///
/// # Example
///
/// ```rust
/// use dropcast::{AuthError, Authenticator};
/// use dropcast_transport::UpgradeRequest;
///
/// /// Only lets clients into channels starting with `public-`.
/// struct PublicOnly;
///
/// impl Authenticator for PublicOnly {
///     async fn authorize(&self, request: &UpgradeRequest) -> Result<(), AuthError> {
///         match request.query_param("channel") {
///             Some(name) if name.starts_with("public-") => Ok(()),
///             _ => Err(AuthError::Rejected("private channel".into())),
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Inspects the upgrade request and accepts or rejects it.
    fn authorize(
        &self,
        request: &UpgradeRequest,
    ) -> impl std::future::Future<Output = Result<(), AuthError>> + Send;
}

/// Accepts every connection.
///
/// Suitable when an upstream proxy already authenticated the client.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    async fn authorize(&self, _request: &UpgradeRequest) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Requires the `token` query parameter to equal a shared secret.
#[derive(Clone)]
pub struct SharedToken {
    secret: String,
}

impl SharedToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for SharedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedToken")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Authenticator for SharedToken {
    async fn authorize(&self, request: &UpgradeRequest) -> Result<(), AuthError> {
        let token = request
            .query_param(TOKEN_PARAM)
            .ok_or(AuthError::MissingToken)?;
        if constant_time_eq(token.as_bytes(), self.secret.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

/// Constant-time comparison for credential checks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
