use std::future::Future;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time;
use tracing::trace;

use crate::types::Target;

/// Connect timeout used when the caller does not pick one.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Decides whether a single target accepts TCP connections.
///
/// Implementations never fail: anything that is not provably open is closed.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, target: Target) -> impl Future<Output = bool> + Send;
}

/// Plain TCP connect prober bounded by a timeout.
#[derive(Debug, Clone, Copy)]
pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl Prober for TcpProber {
    fn probe(&self, target: Target) -> impl Future<Output = bool> + Send {
        probe(target, self.timeout)
    }
}

/// Attempt one TCP connection to `target`, closing it straight away on success.
pub async fn probe(target: Target, timeout: Duration) -> bool {
    match time::timeout(timeout, TcpStream::connect(target.socket_addr())).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(e)) => {
            trace!(%target, error = %e, "connect failed");
            false
        }
        Err(_) => {
            trace!(%target, ?timeout, "connect timed out");
            false
        }
    }
}
