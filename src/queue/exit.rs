//! Routes exit packets by delivery-type tag to the corresponding delivery
//! module. Delivery modules (SMTP, MBOX, fragment reassembly) are opaque
//! collaborators per SPEC_FULL.md 1 — only their `enqueue` interface is
//! in scope.

use super::entry::QueueEntry;
use crate::error::QueueError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[async_trait]
pub trait DeliveryModule: Send + Sync {
    fn name(&self) -> &str;
    async fn enqueue(&self, entry: QueueEntry) -> Result<(), QueueError>;
}

pub struct ExitDispatcher {
    modules: HashMap<String, Arc<dyn DeliveryModule>>,
}

impl ExitDispatcher {
    pub fn new() -> Self {
        Self { modules: HashMap::new() }
    }

    pub fn register(&mut self, module: Arc<dyn DeliveryModule>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Dispatch one decoded terminal entry by its `destination` field, which
    /// the processor stamps with the delivery-type tag on exit.
    pub async fn dispatch(&self, entry: QueueEntry) -> Result<(), QueueError> {
        let Some(delivery_type) = entry.destination.clone() else {
            warn!(handle = %entry.handle, "exit entry missing delivery-type tag, dropping");
            return Ok(());
        };

        match self.modules.get(&delivery_type) {
            Some(module) => module.enqueue(entry).await,
            None => {
                warn!(handle = %entry.handle, delivery_type = %delivery_type, "no delivery module registered, dropping");
                Ok(())
            }
        }
    }
}

impl Default for ExitDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModule {
        name: String,
        count: AtomicUsize,
    }

    #[async_trait]
    impl DeliveryModule for CountingModule {
        fn name(&self) -> &str {
            &self.name
        }
        async fn enqueue(&self, _entry: QueueEntry) -> Result<(), QueueError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatches_by_delivery_type() {
        let module = Arc::new(CountingModule { name: "SMTP".to_string(), count: AtomicUsize::new(0) });
        let mut dispatcher = ExitDispatcher::new();
        dispatcher.register(module.clone());

        let mut entry = QueueEntry::new(Packet(vec![1]));
        entry.destination = Some("SMTP".to_string());
        dispatcher.dispatch(entry).await.unwrap();

        assert_eq!(module.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_delivery_type_is_dropped_not_errored() {
        let dispatcher = ExitDispatcher::new();
        let mut entry = QueueEntry::new(Packet(vec![1]));
        entry.destination = Some("UNKNOWN".to_string());
        assert!(dispatcher.dispatch(entry).await.is_ok());
    }
}
