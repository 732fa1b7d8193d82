//! Library crate for portsweep exposing the scanning building blocks.
pub mod chunk;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod ports;
pub mod probe;
pub mod progress;
pub mod scheduler;
pub mod sink;
pub mod targets;
pub mod types;
pub mod worker;

pub use error::{Result, ScanError};
