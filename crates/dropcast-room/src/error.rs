//! Error types for the room layer.

use std::time::Duration;

/// Why a single delivery during broadcast failed.
///
/// Never returned to the sender: the broadcast engine logs it and evicts
/// the recipient.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError<E> {
    /// The connection rejected the write.
    #[error("write failed: {0}")]
    Failed(#[source] E),

    /// The recipient did not accept the frame within the send timeout.
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
}
