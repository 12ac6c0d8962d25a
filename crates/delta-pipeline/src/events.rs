use delta_model::{DdlOperation, TableId};
use tokio::sync::broadcast;

/// Lifecycle events published as each component advances a table through
/// the write -> load -> merge path. Consumed by the demo CLI for progress
/// output and by integration tests asserting on pipeline ordering.
#[derive(Debug, Clone)]
pub enum DeltaEvent {
    BatchSealed {
        table: TableId,
        batch_id: i64,
        num_events: usize,
    },
    BlobWritten {
        table: TableId,
        batch_id: i64,
        blob_handle: String,
    },
    LoadSubmitted {
        table: TableId,
        batch_id: i64,
        job_id: String,
    },
    MergeSubmitted {
        table: TableId,
        batch_id: i64,
        job_id: String,
    },
    MergeCompleted {
        table: TableId,
        batch_id: i64,
        latest_merged: u64,
    },
    DdlApplied {
        table: TableId,
        operation: DdlOperation,
    },
    RetryScheduled {
        table: TableId,
        attempt: usize,
    },
    Failure {
        table: TableId,
        message: String,
    },
}

/// Thin wrapper over a broadcast channel. Unlike a generic pub/sub registry,
/// this bus carries exactly one event type, so every subscriber sees every
/// event; a lagging subscriber only misses events, it never blocks a
/// publisher (`tokio::sync::broadcast` drops oldest on overflow).
#[derive(Clone)]
pub struct DeltaEventBus {
    sender: broadcast::Sender<DeltaEvent>,
}

impl DeltaEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: DeltaEvent) {
        // No subscribers is the common case in tests; a send error there is
        // not a failure of the pipeline.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeltaEvent> {
        self.sender.subscribe()
    }
}

impl Default for DeltaEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = DeltaEventBus::default();
        let mut rx = bus.subscribe();
        let table = TableId::new("p", "d", "t");
        bus.publish(DeltaEvent::BatchSealed {
            table: table.clone(),
            batch_id: 1,
            num_events: 3,
        });
        match rx.recv().await.unwrap() {
            DeltaEvent::BatchSealed { table: t, num_events, .. } => {
                assert_eq!(t, table);
                assert_eq!(num_events, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
