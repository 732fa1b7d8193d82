//! Worker side of the multi-process scan.
//!
//! A worker process reads one JSON [`WorkerAssignment`] from stdin, runs a
//! [`ScanEngine`] over it on a single-threaded runtime, and prints one JSON
//! [`WorkerReport`] on stdout. Logs go to stderr.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::engine::ScanEngine;
use crate::error::{Result, ScanError};
use crate::probe::TcpProber;
use crate::progress::ProgressCounter;
use crate::scheduler::WorkChunk;
use crate::types::ProbeResult;

/// Everything a worker needs to run its share of the scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkerAssignment {
    pub chunk: WorkChunk,
    pub concurrency: usize,
    pub timeout_ms: u64,
}

/// What a worker hands back once its scan is complete.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub probed: u64,
    pub open: Vec<ProbeResult>,
}

/// Scan one chunk in the current process.
pub async fn run_chunk(chunk: &WorkChunk, concurrency: usize, timeout: Duration) -> WorkerReport {
    info!(
        worker = chunk.worker_id,
        "scanning {} hosts and {} ports",
        chunk.hosts.len(),
        chunk.ports.len()
    );

    let engine = ScanEngine::new(TcpProber::new(timeout), concurrency);
    let mut progress = ProgressCounter::new(chunk.worker_id);
    let open = engine.scan(&chunk.hosts, &chunk.ports, &mut progress).await;

    info!(
        worker = chunk.worker_id,
        open = open.len(),
        "finished {} probes in {:.2}s",
        progress.finished(),
        progress.elapsed().as_secs_f64()
    );
    WorkerReport {
        worker_id: chunk.worker_id,
        probed: progress.finished(),
        open,
    }
}

/// Worker process entry: assignment in, report out.
pub async fn serve<R, W>(mut input: R, mut output: W) -> Result<WorkerReport>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    input
        .read_to_end(&mut buf)
        .await
        .map_err(|e| ScanError::Protocol(format!("reading assignment: {e}")))?;
    let assignment: WorkerAssignment = serde_json::from_slice(&buf)
        .map_err(|e| ScanError::Protocol(format!("decoding assignment: {e}")))?;

    let report = run_chunk(
        &assignment.chunk,
        assignment.concurrency,
        Duration::from_millis(assignment.timeout_ms),
    )
    .await;

    let payload = serde_json::to_vec(&report)
        .map_err(|e| ScanError::Protocol(format!("encoding report: {e}")))?;
    let write_err = |e: std::io::Error| ScanError::Protocol(format!("writing report: {e}"));
    output.write_all(&payload).await.map_err(write_err)?;
    output.flush().await.map_err(write_err)?;
    Ok(report)
}
