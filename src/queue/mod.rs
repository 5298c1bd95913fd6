//! The packet pipeline's durable queues: incoming spool, mix pool, outgoing
//! delivery queue, and exit dispatch. See SPEC_FULL.md 4.3.

pub mod entry;
pub mod exit;
pub mod incoming;
pub mod mixpool;
pub mod outgoing;

pub use entry::{QueueEntry, Tag};
pub use exit::{DeliveryModule, ExitDispatcher};
pub use incoming::IncomingQueue;
pub use mixpool::MixPool;
pub use outgoing::OutgoingQueue;
