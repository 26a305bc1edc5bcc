use chrono::{DateTime, Utc};

/// A fact emitted by an aggregate.
///
/// Events are immutable and append-only; `event_type` is the stable name under
/// which they are recorded in history feeds (e.g. "purchasing.order.approved").
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time at which the event happened.
    fn occurred_at(&self) -> DateTime<Utc>;
}
