use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{Result, ScanError};
use crate::types::ProbeResult;

/// Default results file name.
pub const DEFAULT_OUTPUT: &str = "result.csv";

/// Append `records` to the CSV at `path`.
///
/// The `host,port,open` header is written only when the file does not exist
/// yet, so repeated runs keep growing the same table.
pub fn append_results(path: &Path, records: &[ProbeResult]) -> Result<()> {
    let sink_err = |source: csv::Error| ScanError::Sink {
        path: path.to_path_buf(),
        source,
    };

    let existed = path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| sink_err(e.into()))?;

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!existed)
        .from_writer(file);
    if !existed && records.is_empty() {
        // serialize() emits the header lazily, so an empty batch needs it spelled out
        wtr.write_record(["host", "port", "open"]).map_err(sink_err)?;
    }
    for record in records {
        wtr.serialize(record).map_err(sink_err)?;
    }
    wtr.flush().map_err(|e| sink_err(e.into()))?;
    Ok(())
}

/// Sending half of the result writer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<Vec<ProbeResult>>,
}

impl SinkHandle {
    /// Queue one worker's batch. Batches are written whole and never interleave.
    pub async fn append(&self, batch: Vec<ProbeResult>) -> Result<()> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| ScanError::SinkClosed)
    }
}

/// Single task that owns the results file. Every worker's batch goes through
/// it, so appends are serialized without any file lock.
pub struct ResultSink;

impl ResultSink {
    /// Start the writer. The join handle resolves to the number of rows written
    /// once every [`SinkHandle`] has been dropped.
    pub fn spawn(path: impl Into<PathBuf>) -> (SinkHandle, JoinHandle<Result<u64>>) {
        let path = path.into();
        let (tx, mut rx) = mpsc::channel::<Vec<ProbeResult>>(64);

        let handle = tokio::spawn(async move {
            let mut written = 0u64;
            while let Some(batch) = rx.recv().await {
                if let Err(e) = append_results(&path, &batch) {
                    error!(path = %path.display(), error = %e, "result append failed");
                    return Err(e);
                }
                written += batch.len() as u64;
                debug!(rows = batch.len(), path = %path.display(), "appended results");
            }
            Ok(written)
        });

        (SinkHandle { tx }, handle)
    }
}
