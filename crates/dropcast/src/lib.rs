//! # Dropcast
//!
//! Real-time channel broadcast over WebSocket.
//!
//! Clients connect with `?channel=<name>` (default `"default"`) and an
//! optional `echo=true`. Every text or binary frame a client sends is
//! relayed unchanged to the other members of its channel, and back to the
//! sender too when it asked for echo.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dropcast::prelude::*;
//!
//! # async fn start() -> Result<(), DropcastError> {
//! let server = DropcastServerBuilder::new()
//!     .bind("0.0.0.0:10325")
//!     .build(AllowAll)
//!     .await?;
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await
//! # }
//! ```

mod auth;
mod config;
mod error;
mod handler;
mod lifecycle;
mod server;

pub use auth::{AllowAll, AuthError, Authenticator, SharedToken, TOKEN_PARAM};
pub use config::{Config, ConfigError};
pub use error::DropcastError;
pub use handler::{CHANNEL_PARAM, ECHO_PARAM};
pub use lifecycle::LifecycleState;
pub use server::{DEFAULT_SHUTDOWN_GRACE, DropcastServer, DropcastServerBuilder};

pub mod prelude {
    //! Everything needed to run a server and inspect its channels.

    pub use crate::{
        AllowAll, AuthError, Authenticator, Config, DropcastError, DropcastServer,
        DropcastServerBuilder, SharedToken,
    };
    pub use dropcast_room::{ChannelName, DeliverySettings, RoomRegistry};
    pub use dropcast_transport::{Frame, UpgradeRequest, WebSocketConnection};
}
