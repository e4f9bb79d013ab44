//! Append-only event sink

use async_trait::async_trait;

use crate::record::{CallUpdate, TurnRecord};

/// Receives turn records and call updates.
///
/// Both methods are best-effort: implementations log failures and drop
/// rather than propagate. Nothing on the voice path awaits durability.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, record: TurnRecord);

    async fn update_call(&self, update: CallUpdate);
}

/// Sink that discards everything. Useful in tests and as the default when
/// no sink is configured.
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn append(&self, _record: TurnRecord) {}

    async fn update_call(&self, _update: CallUpdate) {}
}
