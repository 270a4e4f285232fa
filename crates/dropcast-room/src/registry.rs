//! The room registry and its broadcast engine.
//!
//! The registry owns two maps that always change together:
//!
//! ```text
//! channels: ChannelName  ──→ { ConnectionId → ConnectionHandle }
//! settings: ConnectionId ──→ DeliverySettings
//! ```
//!
//! Both live behind one mutex. An id is present in `settings` exactly
//! when it is a member of some channel, and a channel key exists exactly
//! while it has members.
//!
//! # Lock discipline
//!
//! [`broadcast`](RoomRegistry::broadcast) copies the recipient list under
//! the lock and writes outside it, so a slow recipient never stalls
//! joins, leaves or other channels. A member evicted by a concurrent path
//! may still see one write attempt from a broadcast that snapshotted it
//! earlier; that write fails or lands harmlessly and the follow-up
//! eviction is a no-op.

use std::collections::HashMap;

use dropcast_transport::{Connection, ConnectionId, Frame};
use tokio::sync::Mutex;

use crate::{ChannelName, ConnectionHandle, DeliveryError, DeliverySettings, RegistryConfig};

/// What happened during one [`RoomRegistry::broadcast`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Recipients that accepted the frame.
    pub delivered: usize,
    /// Recipients whose write failed and were removed from the registry.
    pub evicted: Vec<ConnectionId>,
}

/// The two maps guarded by the registry lock.
struct Rooms<C: Connection> {
    channels: HashMap<ChannelName, HashMap<ConnectionId, ConnectionHandle<C>>>,
    settings: HashMap<ConnectionId, DeliverySettings>,
}

impl<C: Connection> Rooms<C> {
    fn new() -> Self {
        Self {
            channels: HashMap::new(),
            settings: HashMap::new(),
        }
    }

    /// Returns the channel's member count after insertion.
    fn insert(&mut self, handle: &ConnectionHandle<C>, settings: DeliverySettings) -> usize {
        let members = self.channels.entry(handle.channel().clone()).or_default();
        members.insert(handle.id(), handle.clone());
        self.settings.insert(handle.id(), settings);
        members.len()
    }

    /// Removes the handle and prunes its channel if it became empty.
    ///
    /// Returns `None` if the handle was not registered, otherwise the
    /// number of members left in its channel.
    fn remove(&mut self, handle: &ConnectionHandle<C>) -> Option<usize> {
        let members = self.channels.get_mut(handle.channel())?;
        members.remove(&handle.id())?;
        self.settings.remove(&handle.id());

        let remaining = members.len();
        if remaining == 0 {
            self.channels.remove(handle.channel());
        }
        Some(remaining)
    }
}

/// Process-wide table of channels and their members.
///
/// Construct one per server and share it through an `Arc`. Independent
/// registries never see each other's members.
pub struct RoomRegistry<C: Connection> {
    rooms: Mutex<Rooms<C>>,
    config: RegistryConfig,
}

impl<C: Connection> RoomRegistry<C> {
    /// Creates an empty registry with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Creates an empty registry with the given configuration.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            rooms: Mutex::new(Rooms::new()),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Adds `handle` to its channel, creating the channel if needed.
    ///
    /// Call once per connection. A repeated call keeps a single membership
    /// entry and overwrites the settings.
    pub async fn join(&self, handle: &ConnectionHandle<C>, settings: DeliverySettings) {
        let members = self.rooms.lock().await.insert(handle, settings);
        tracing::debug!(
            conn_id = %handle.id(),
            channel = %handle.channel(),
            members,
            deliver_to_self = settings.deliver_to_self,
            "joined channel"
        );
    }

    /// Removes `handle` from its channel and drops its settings.
    ///
    /// Leaving twice, or leaving a handle that never joined, is a no-op.
    /// Returns `true` if this call removed the handle.
    pub async fn leave(&self, handle: &ConnectionHandle<C>) -> bool {
        let removed = self.rooms.lock().await.remove(handle);
        match removed {
            Some(remaining) => {
                tracing::debug!(
                    conn_id = %handle.id(),
                    channel = %handle.channel(),
                    remaining,
                    "left channel"
                );
                if remaining == 0 {
                    tracing::debug!(channel = %handle.channel(), "channel emptied");
                }
                true
            }
            None => false,
        }
    }

    /// Returns the current members of `channel`. Unknown channels are empty.
    pub async fn snapshot(&self, channel: &ChannelName) -> Vec<ConnectionHandle<C>> {
        self.rooms
            .lock()
            .await
            .channels
            .get(channel)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Delivers `frame` to every eligible member of `channel`.
    ///
    /// Frames from a sender that is not (or no longer) a member of
    /// `channel` are dropped. The sender is skipped unless it joined with
    /// [`deliver_to_self`](DeliverySettings::deliver_to_self). A recipient
    /// whose write fails or times out is evicted on the spot and the loop
    /// moves on; the call itself never fails. Order across recipients is
    /// unspecified.
    pub async fn broadcast(
        &self,
        channel: &ChannelName,
        frame: &Frame,
        sender: &ConnectionHandle<C>,
    ) -> BroadcastOutcome {
        let recipients: Vec<ConnectionHandle<C>> = {
            let rooms = self.rooms.lock().await;
            let Some(members) = rooms.channels.get(channel) else {
                return BroadcastOutcome::default();
            };
            if !members.contains_key(&sender.id()) {
                tracing::debug!(
                    conn_id = %sender.id(),
                    %channel,
                    "dropping frame from a connection that is not a member"
                );
                return BroadcastOutcome::default();
            }
            let echo = rooms
                .settings
                .get(&sender.id())
                .is_some_and(|s| s.deliver_to_self);
            members
                .values()
                .filter(|member| echo || member.id() != sender.id())
                .cloned()
                .collect()
        };

        let mut outcome = BroadcastOutcome::default();
        for member in recipients {
            match self.deliver(&member, frame).await {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    tracing::error!(
                        conn_id = %member.id(),
                        %channel,
                        error = %e,
                        "delivery failed, evicting connection"
                    );
                    self.evict(&member).await;
                    outcome.evicted.push(member.id());
                }
            }
        }

        tracing::trace!(
            %channel,
            sender = %sender.id(),
            kind = %frame.kind(),
            bytes = frame.len(),
            delivered = outcome.delivered,
            evicted = outcome.evicted.len(),
            "broadcast complete"
        );
        outcome
    }

    /// Writes one frame, bounded by the configured send timeout.
    async fn deliver(
        &self,
        member: &ConnectionHandle<C>,
        frame: &Frame,
    ) -> Result<(), DeliveryError<C::Error>> {
        let send = member.connection().send(frame);
        match self.config.send_timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| DeliveryError::TimedOut(limit))?
                .map_err(DeliveryError::Failed),
            None => send.await.map_err(DeliveryError::Failed),
        }
    }

    /// Removes a dead member, flags its handle so the member's own read
    /// loop stops, and closes its transport, ignoring errors.
    async fn evict(&self, member: &ConnectionHandle<C>) {
        self.leave(member).await;
        member.mark_evicted();
        let close = member.connection().close();
        match tokio::time::timeout(self.config.close_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(conn_id = %member.id(), error = %e, "close after eviction failed");
            }
            Err(_) => {
                tracing::debug!(conn_id = %member.id(), "close after eviction timed out");
            }
        }
    }

    /// Number of channels that currently have members.
    pub async fn channel_count(&self) -> usize {
        self.rooms.lock().await.channels.len()
    }

    /// Names of all channels that currently have members.
    pub async fn channels(&self) -> Vec<ChannelName> {
        self.rooms.lock().await.channels.keys().cloned().collect()
    }

    pub async fn contains_channel(&self, channel: &ChannelName) -> bool {
        self.rooms.lock().await.channels.contains_key(channel)
    }

    /// Number of members in `channel`; zero for unknown channels.
    pub async fn member_count(&self, channel: &ChannelName) -> usize {
        self.rooms
            .lock()
            .await
            .channels
            .get(channel)
            .map_or(0, HashMap::len)
    }

    /// Number of registered connections across all channels.
    pub async fn connection_count(&self) -> usize {
        self.rooms.lock().await.settings.len()
    }

    pub async fn is_member(&self, handle: &ConnectionHandle<C>) -> bool {
        self.rooms
            .lock()
            .await
            .channels
            .get(handle.channel())
            .is_some_and(|members| members.contains_key(&handle.id()))
    }

    /// Settings recorded for a connection, if it is registered.
    pub async fn settings(&self, id: ConnectionId) -> Option<DeliverySettings> {
        self.rooms.lock().await.settings.get(&id).copied()
    }
}

impl<C: Connection> Default for RoomRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
