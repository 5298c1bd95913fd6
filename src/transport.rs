//! The transport's declared interface. MMTP framing, the TLS handshake, and
//! certificate chain construction are out of scope (SPEC_FULL.md 1) — this is
//! the seam the scheduler and outgoing queue drive it through.

use async_trait::async_trait;
use rsa::RsaPrivateKey;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Success,
    Transient(String),
    Permanent(String),
}

/// One batch of packets addressed to the same destination nickname.
#[derive(Debug, Clone)]
pub struct DeliveryBatch {
    pub destination: String,
    pub packets: Vec<Vec<u8>>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// One step of non-blocking I/O with an internal select/poll horizon,
    /// bounded by `timeout`. Called from the scheduler's main loop.
    async fn process(&self, timeout: Duration);

    /// Reap connections idle past the transport's own timeout policy.
    async fn reap_connections(&self);

    /// The transport's next scheduled timeout deadline, for the scheduler's
    /// event heap.
    fn next_timeout(&self) -> chrono::DateTime<chrono::Utc>;

    /// Hand a batch of packets addressed to one destination to the
    /// transport for delivery. Returns one outcome per batch, not per
    /// packet — SPEC_FULL.md 4.3 groups by destination.
    async fn send_batch(&self, batch: DeliveryBatch) -> DeliveryOutcome;

    /// Install the newest live transport key as the outgoing identity
    /// (SPEC_FULL.md 4.2 overlap resolution).
    async fn install_transport_key(&self, key: RsaPrivateKey);

    async fn shutdown(&self);
}

/// A transport that never connects anywhere. Satisfies the trait boundary
/// until the real MMTP implementation is wired in; `process` just sleeps out
/// its budget so the scheduler's timing still behaves.
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn process(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }

    async fn reap_connections(&self) {}

    fn next_timeout(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now() + chrono::Duration::seconds(60)
    }

    async fn send_batch(&self, batch: DeliveryBatch) -> DeliveryOutcome {
        DeliveryOutcome::Transient(format!("no transport configured for {}", batch.destination))
    }

    async fn install_transport_key(&self, _key: RsaPrivateKey) {}

    async fn shutdown(&self) {}
}
