//! Channel membership and broadcast fan-out for Dropcast.
//!
//! Connections are grouped into named channels. A frame sent by one
//! member is written to every other member of the same channel, or to
//! every member including the sender when it asked for echo.
//!
//! # Key types
//!
//! - [`RoomRegistry`] — the membership table and broadcast engine
//! - [`ConnectionHandle`] — one live connection bound to one channel
//! - [`ChannelName`] — implicit channel key (`"default"` when empty)
//! - [`DeliverySettings`] — per-connection echo preference
//! - [`RegistryConfig`] — send/close timeouts for broadcast

mod config;
mod error;
mod handle;
mod registry;

pub use config::{
    ChannelName, DEFAULT_CHANNEL, DeliverySettings, RegistryConfig, parse_flag,
};
pub use error::DeliveryError;
pub use handle::ConnectionHandle;
pub use registry::{BroadcastOutcome, RoomRegistry};
