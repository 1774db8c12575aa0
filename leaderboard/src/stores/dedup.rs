use std::sync::Arc;

use crate::error::StoreError;
use crate::redis::{Client, StoreOp};

pub const PROCESSED_EVENTS_KEY: &str = "processed:events";

/// The idempotency gate: an event id is a member of the processed set if
/// and only if its state mutations have committed. The set carries a TTL
/// refreshed on every mark, sized to the transport's retention window, so
/// the ledger cannot outgrow the span of events that can still be
/// redelivered.
#[derive(Clone)]
pub struct DedupLedger {
    client: Arc<dyn Client + Send + Sync>,
    retention_secs: u64,
}

impl DedupLedger {
    pub fn new(client: Arc<dyn Client + Send + Sync>, retention_secs: u64) -> Self {
        Self {
            client,
            retention_secs,
        }
    }

    pub async fn is_processed(&self, event_id: &str) -> Result<bool, StoreError> {
        self.client.sismember(PROCESSED_EVENTS_KEY, event_id).await
    }

    /// Ops marking an event as applied. Appended after the event's state
    /// mutations in the same atomic batch, so the mark commits no earlier
    /// than the mutations it guards.
    pub fn mark_ops(&self, event_id: &str) -> Vec<StoreOp> {
        vec![
            StoreOp::SAdd {
                key: PROCESSED_EVENTS_KEY.to_string(),
                member: event_id.to_string(),
            },
            StoreOp::Expire {
                key: PROCESSED_EVENTS_KEY.to_string(),
                seconds: self.retention_secs,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::MockRedisClient;

    #[tokio::test]
    async fn mark_then_check() {
        let mock = MockRedisClient::new();
        let client: Arc<dyn Client + Send + Sync> = Arc::new(mock.clone());
        let ledger = DedupLedger::new(client.clone(), 86400);

        assert!(!ledger.is_processed("e1").await.unwrap());
        client.exec(ledger.mark_ops("e1")).await.unwrap();
        assert!(ledger.is_processed("e1").await.unwrap());
        assert!(!ledger.is_processed("e2").await.unwrap());

        // Retention refresh rides along with every mark.
        assert_eq!(mock.ttl(PROCESSED_EVENTS_KEY), Some(86400));
    }
}
