use chrono::{DateTime, Utc};

/// A fact recorded by a stock aggregate.
///
/// Moves and procurements emit these from `handle`; the engine wraps each one
/// in an [`EventEnvelope`](crate::EventEnvelope) after the ledger commit and
/// publishes it in the order it was applied.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name, `stock.<aggregate>.<transition>` (e.g. "stock.move.done").
    fn event_type(&self) -> &'static str;

    /// Payload schema version for this event type.
    fn version(&self) -> u32;

    /// When the transition happened.
    fn occurred_at(&self) -> DateTime<Utc>;

    /// The aggregate segment of [`Self::event_type`] ("move", "procurement").
    fn aggregate_kind(&self) -> &'static str {
        self.event_type().split('.').nth(1).unwrap_or_default()
    }
}
