pub mod config;
pub mod crypto;
pub mod descriptor;
pub mod error;
pub mod keyring;
pub mod lockfile;
pub mod packet;
pub mod queue;
pub mod replaylog;
pub mod scheduler;
pub mod server;
pub mod transport;
pub mod worker;

pub use config::Config;
pub use error::RemailerError;
pub use server::Server;
