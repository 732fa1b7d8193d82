use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// One (host, port) unit of scanning work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: IpAddr,
    pub port: u16,
}

impl Target {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // bracket IPv6 the way SocketAddr does
        fmt::Display::fmt(&self.socket_addr(), f)
    }
}

/// Outcome of probing one target. Also the row layout of the results file.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub host: IpAddr,
    pub port: u16,
    pub open: bool,
}

impl ProbeResult {
    pub fn new(target: Target, open: bool) -> Self {
        Self {
            host: target.host,
            port: target.port,
            open,
        }
    }
}

/// Counts returned by the scheduler once every worker has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub workers: usize,
    pub probed: u64,
    pub open: u64,
}
