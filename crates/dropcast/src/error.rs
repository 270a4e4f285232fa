//! Unified error type for the Dropcast server.

use dropcast_transport::TransportError;

use crate::auth::AuthError;
use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls,
/// so `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum DropcastError {
    /// A transport-level error (accept, handshake, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The upgrade gate refused the connection.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The environment did not describe a valid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
