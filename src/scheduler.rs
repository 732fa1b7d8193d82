use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::chunk;
use crate::error::{Result, ScanError};
use crate::sink::SinkHandle;
use crate::types::ScanSummary;
use crate::worker::{self, WorkerAssignment, WorkerReport};

/// Below this many targets the whole scan runs in one worker.
pub const SINGLE_WORKER_THRESHOLD: usize = 1000;

/// Subcommand a worker process is started with.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// One worker's share of the target space.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkChunk {
    pub worker_id: usize,
    pub hosts: Vec<IpAddr>,
    pub ports: Vec<u16>,
}

/// Which dimension a plan split across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Single,
    Ports,
    Hosts,
}

/// Shape of a run, fixed before any worker starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    pub host_count: usize,
    pub port_count: usize,
    pub worker_count: usize,
    pub concurrency_per_worker: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub config: ScanConfig,
    pub partition: Partition,
    pub chunks: Vec<WorkChunk>,
}

/// Decide how many workers to run and what each one scans.
///
/// - Workers are capped at `cores`.
/// - Fewer than [`SINGLE_WORKER_THRESHOLD`] targets always get one worker.
/// - Otherwise ports are split if there are more ports than workers, else hosts
///   if there are more hosts than workers, else one worker takes everything.
pub fn plan(
    hosts: &[IpAddr],
    ports: &[u16],
    requested_workers: usize,
    cores: usize,
    concurrency_per_worker: usize,
) -> Result<Plan> {
    let workers = requested_workers.min(cores).max(1);
    let targets = hosts.len().saturating_mul(ports.len());

    let (partition, chunks) = if targets < SINGLE_WORKER_THRESHOLD {
        (Partition::Single, vec![whole(hosts, ports)])
    } else if ports.len() > workers {
        let chunks = chunk::split(ports, workers)?
            .into_iter()
            .enumerate()
            .map(|(worker_id, ports)| WorkChunk {
                worker_id,
                hosts: hosts.to_vec(),
                ports,
            })
            .collect();
        (Partition::Ports, chunks)
    } else if hosts.len() > workers {
        let chunks = chunk::split(hosts, workers)?
            .into_iter()
            .enumerate()
            .map(|(worker_id, hosts)| WorkChunk {
                worker_id,
                hosts,
                ports: ports.to_vec(),
            })
            .collect();
        (Partition::Hosts, chunks)
    } else {
        (Partition::Single, vec![whole(hosts, ports)])
    };

    Ok(Plan {
        config: ScanConfig {
            host_count: hosts.len(),
            port_count: ports.len(),
            worker_count: chunks.len(),
            concurrency_per_worker,
        },
        partition,
        chunks,
    })
}

fn whole(hosts: &[IpAddr], ports: &[u16]) -> WorkChunk {
    WorkChunk {
        worker_id: 0,
        hosts: hosts.to_vec(),
        ports: ports.to_vec(),
    }
}

/// Starts worker processes by re-running an executable with the `worker`
/// subcommand.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    exe: PathBuf,
    args: Vec<String>,
}

impl WorkerLauncher {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            args: Vec::new(),
        }
    }

    /// Launch copies of the running binary.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| ScanError::WorkerFailed {
            worker_id: 0,
            reason: format!("cannot locate own executable: {e}"),
        })?;
        Ok(Self::new(exe))
    }

    /// Extra arguments passed after the subcommand.
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    /// Run one worker process to completion and decode its report.
    pub async fn run(&self, assignment: &WorkerAssignment) -> Result<WorkerReport> {
        let worker_id = assignment.chunk.worker_id;
        let failed = |reason: String| ScanError::WorkerFailed { worker_id, reason };

        let mut child = Command::new(&self.exe)
            .arg(WORKER_SUBCOMMAND)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("spawn {}: {e}", self.exe.display())))?;
        debug!(worker = worker_id, pid = ?child.id(), "worker process started");

        let payload =
            serde_json::to_vec(assignment).map_err(|e| failed(format!("encode: {e}")))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| failed("stdin not captured".into()))?;
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| failed(format!("send assignment: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| failed(format!("wait: {e}")))?;
        if !output.status.success() {
            return Err(failed(format!("exited with {}", output.status)));
        }
        serde_json::from_slice(&output.stdout).map_err(|e| failed(format!("bad report: {e}")))
    }
}

/// Runs a [`Plan`]: a small single-chunk scan runs in this process, otherwise
/// every chunk gets its own worker process. Every worker's open results go to the sink as
/// one batch as soon as that worker finishes.
#[derive(Debug, Clone)]
pub struct Scheduler {
    timeout: Duration,
    launcher: Arc<WorkerLauncher>,
}

impl Scheduler {
    pub fn new(timeout: Duration, launcher: WorkerLauncher) -> Self {
        Self {
            timeout,
            launcher: Arc::new(launcher),
        }
    }

    pub async fn run(&self, plan: Plan, sink: &SinkHandle) -> Result<ScanSummary> {
        let concurrency = plan.config.concurrency_per_worker;
        info!(
            hosts = plan.config.host_count,
            ports = plan.config.port_count,
            workers = plan.config.worker_count,
            partition = ?plan.partition,
            "dispatching scan"
        );

        let mut summary = ScanSummary {
            workers: plan.chunks.len(),
            ..Default::default()
        };

        let targets = plan.config.host_count.saturating_mul(plan.config.port_count);
        if let ([chunk], true) = (plan.chunks.as_slice(), targets < SINGLE_WORKER_THRESHOLD) {
            warn!(targets, "few targets, scanning in this process");
            let report = worker::run_chunk(chunk, concurrency, self.timeout).await;
            summary.probed = report.probed;
            summary.open = report.open.len() as u64;
            sink.append(report.open).await?;
            return Ok(summary);
        }

        let mut set = JoinSet::new();
        for chunk in plan.chunks {
            let launcher = self.launcher.clone();
            let assignment = WorkerAssignment {
                chunk,
                concurrency,
                timeout_ms: self.timeout.as_millis() as u64,
            };
            set.spawn(async move {
                let res = launcher.run(&assignment).await;
                (assignment.chunk.worker_id, res)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (worker_id, res) = joined?;
            let report = res?;
            debug_assert_eq!(report.worker_id, worker_id);
            debug!(
                worker = report.worker_id,
                open = report.open.len(),
                "worker finished"
            );
            summary.probed += report.probed;
            summary.open += report.open.len() as u64;
            sink.append(report.open).await?;
        }
        Ok(summary)
    }
}
