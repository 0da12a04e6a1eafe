//! Realtime connection prioritization.
//!
//! Live subscriptions are scarce, so the [`ConnectionManager`] hands them to
//! the sessions that need them most and keeps everyone else on a polling
//! tier. Priorities derive from ride state and get re-applied on every
//! `rebalance`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Realtime slots available by default.
pub const DEFAULT_MAX_REALTIME: usize = 2;

// ---------------------------------------------------------------------------
// Priority rules
// ---------------------------------------------------------------------------

/// Which side of the marketplace a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Rider,
    Driver,
}

/// Everything the prioritizer knows about a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub role: Role,
    /// The user is on an active ride right now.
    #[serde(default)]
    pub has_active_ride: bool,
    /// Drivers only: open for ride offers.
    #[serde(default)]
    pub is_available: bool,
    /// Riders only: actively searching for a driver.
    #[serde(default)]
    pub is_searching: bool,
}

/// Connection priority. `High` outranks `Medium` outranks `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// First matching rule wins: an active ride outranks everything, available
/// drivers and searching riders take the middle tier, everyone else is low.
pub fn classify(context: &ConnectionContext) -> Priority {
    if context.has_active_ride {
        return Priority::High;
    }
    match context.role {
        Role::Driver if context.is_available => Priority::Medium,
        Role::Rider if context.is_searching => Priority::Medium,
        _ => Priority::Low,
    }
}

/// How updates reach a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Live subscription on the realtime backend.
    Realtime,
    /// Short-interval polling, the degraded shape of `Realtime`.
    PollFrequent,
    /// Long-interval polling.
    PollOccasional,
}

/// Poll intervals for the two degraded tiers, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub frequent_interval_ms: u64,
    pub occasional_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            frequent_interval_ms: 5_000,
            occasional_interval_ms: 30_000,
        }
    }
}

impl PollingConfig {
    /// Poll interval for `mode`, or `None` for realtime sessions.
    pub fn poll_interval_ms(&self, mode: ConnectionMode) -> Option<u64> {
        match mode {
            ConnectionMode::Realtime => None,
            ConnectionMode::PollFrequent => Some(self.frequent_interval_ms),
            ConnectionMode::PollOccasional => Some(self.occasional_interval_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// Opaque id for one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

#[derive(Debug)]
pub enum TransportError {
    SubscribeFailed(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::SubscribeFailed(detail) => write!(f, "subscribe failed: {detail}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Seam to the realtime backend. Implementations must be `Send` so the
/// manager can live in a worker thread.
pub trait RealtimeTransport: Send {
    fn subscribe(&mut self, channel: &str) -> Result<SubscriptionHandle, TransportError>;
    fn unsubscribe(&mut self, handle: SubscriptionHandle);
}

// ---------------------------------------------------------------------------
// Connection book
// ---------------------------------------------------------------------------

/// Book-keeping for one connected session.
#[derive(Debug, Clone)]
pub struct ConnectionSlot {
    pub user_id: String,
    pub mode: ConnectionMode,
    pub priority: Priority,
    pub context: ConnectionContext,
    /// Admission order, the FIFO tie-breaker during rebalances.
    pub connected_order: u64,
    handle: Option<SubscriptionHandle>,
}

/// Read-only snapshot of the connection book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub active_connections: usize,
    pub max_connections: usize,
    pub polling_users: usize,
    pub total_users: usize,
}

/// Decides which sessions hold a live subscription.
///
/// All mutation goes through `connect_user`, `update_context`,
/// `disconnect_user` and `rebalance`; the transport is only ever touched
/// from those paths.
pub struct ConnectionManager {
    max_realtime: usize,
    polling: PollingConfig,
    transport: Box<dyn RealtimeTransport>,
    slots: BTreeMap<String, ConnectionSlot>,
    next_order: u64,
}

impl ConnectionManager {
    pub fn new(transport: Box<dyn RealtimeTransport>) -> Self {
        Self {
            max_realtime: DEFAULT_MAX_REALTIME,
            polling: PollingConfig::default(),
            transport,
            slots: BTreeMap::new(),
            next_order: 0,
        }
    }

    pub fn with_capacity(mut self, max_realtime: usize) -> Self {
        self.max_realtime = max_realtime;
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Admit a session, replacing any previous slot under the same id.
    ///
    /// High-priority sessions take a realtime slot while capacity lasts and
    /// degrade to frequent polling past the cap. Reconnecting re-enters the
    /// admission queue at the tail.
    pub fn connect_user(&mut self, user_id: &str, context: ConnectionContext) -> &ConnectionSlot {
        self.disconnect_user(user_id);

        let priority = classify(&context);
        let connected_order = self.next_order;
        self.next_order += 1;

        let (mode, handle) = if priority == Priority::High {
            if self.realtime_count() < self.max_realtime {
                match self.transport.subscribe(&ride_channel(user_id)) {
                    Ok(handle) => (ConnectionMode::Realtime, Some(handle)),
                    Err(err) => {
                        log::warn!(
                            "subscribe failed for {user_id} ({err}); degrading to frequent polling"
                        );
                        (ConnectionMode::PollFrequent, None)
                    }
                }
            } else {
                log::info!("realtime capacity reached; {user_id} degrades to frequent polling");
                (ConnectionMode::PollFrequent, None)
            }
        } else {
            (Self::polling_mode_for(priority), None)
        };

        log::info!("{user_id} connected as {mode:?} ({priority:?})");
        let slot = ConnectionSlot {
            user_id: user_id.to_owned(),
            mode,
            priority,
            context,
            connected_order,
            handle,
        };
        self.slots.insert(user_id.to_owned(), slot);
        self.slots.get(user_id).expect("slot just inserted")
    }

    /// Refresh the stored context for a session. The mode stays put until
    /// the next `rebalance`.
    pub fn update_context(&mut self, user_id: &str, context: ConnectionContext) -> bool {
        match self.slots.get_mut(user_id) {
            Some(slot) => {
                slot.context = context;
                slot.priority = classify(&context);
                true
            }
            None => false,
        }
    }

    /// Remove a session and release its realtime slot, if it held one.
    /// Unknown ids are a no-op.
    pub fn disconnect_user(&mut self, user_id: &str) -> bool {
        match self.slots.remove(user_id) {
            Some(slot) => {
                if let Some(handle) = slot.handle {
                    self.transport.unsubscribe(handle);
                }
                log::info!("{user_id} disconnected");
                true
            }
            None => false,
        }
    }

    /// Re-run the priority rules over every session and move realtime
    /// capacity to high-priority sessions, oldest admission first.
    pub fn rebalance(&mut self) {
        let mut realtime_in_use = 0;

        // Refresh priorities, demote realtime holders that no longer rank
        // High, and normalize the polling tier of everyone else.
        for slot in self.slots.values_mut() {
            slot.priority = classify(&slot.context);
            match slot.mode {
                ConnectionMode::Realtime if slot.priority == Priority::High => {
                    realtime_in_use += 1;
                }
                ConnectionMode::Realtime => {
                    if let Some(handle) = slot.handle.take() {
                        self.transport.unsubscribe(handle);
                    }
                    slot.mode = Self::polling_mode_for(slot.priority);
                    log::info!("{} demoted to {:?}", slot.user_id, slot.mode);
                }
                _ => {
                    slot.mode = Self::polling_mode_for(slot.priority);
                }
            }
        }

        // Promote waiting High sessions in admission order while capacity
        // remains.
        let mut waiting: Vec<(u64, String)> = self
            .slots
            .values()
            .filter(|slot| {
                slot.priority == Priority::High && slot.mode != ConnectionMode::Realtime
            })
            .map(|slot| (slot.connected_order, slot.user_id.clone()))
            .collect();
        waiting.sort_unstable();

        for (_, user_id) in waiting {
            if realtime_in_use >= self.max_realtime {
                break;
            }
            let Some(slot) = self.slots.get_mut(&user_id) else {
                continue;
            };
            match self.transport.subscribe(&ride_channel(&user_id)) {
                Ok(handle) => {
                    slot.mode = ConnectionMode::Realtime;
                    slot.handle = Some(handle);
                    realtime_in_use += 1;
                    log::info!("{user_id} promoted to realtime");
                }
                Err(err) => {
                    log::warn!("subscribe failed for {user_id} ({err}); staying on frequent polling");
                }
            }
        }
    }

    /// Snapshot of the book.
    pub fn stats(&self) -> ConnectionStats {
        let active_connections = self.realtime_count();
        ConnectionStats {
            active_connections,
            max_connections: self.max_realtime,
            polling_users: self.slots.len() - active_connections,
            total_users: self.slots.len(),
        }
    }

    pub fn slot(&self, user_id: &str) -> Option<&ConnectionSlot> {
        self.slots.get(user_id)
    }

    /// All slots in user-id order.
    pub fn slots(&self) -> impl Iterator<Item = &ConnectionSlot> {
        self.slots.values()
    }

    pub fn polling(&self) -> &PollingConfig {
        &self.polling
    }

    fn realtime_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.mode == ConnectionMode::Realtime)
            .count()
    }

    fn polling_mode_for(priority: Priority) -> ConnectionMode {
        match priority {
            Priority::High | Priority::Medium => ConnectionMode::PollFrequent,
            Priority::Low => ConnectionMode::PollOccasional,
        }
    }
}

/// Channel a user's ride updates are published on.
fn ride_channel(user_id: &str) -> String {
    format!("ride-updates:{user_id}")
}
