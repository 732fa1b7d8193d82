use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::probe::Prober;
use crate::progress::ProgressCounter;
use crate::types::{ProbeResult, Target};

type TaskOutput = (usize, Target, bool);

/// Runs hosts x ports through a [`Prober`] with a cap on in-flight probes.
///
/// - Targets are generated lazily in cartesian-product order (host-major).
/// - A `Semaphore` sized to the concurrency limit admits new probes; the permit
///   lives inside the spawned task, so the gate reopens as each probe finishes.
/// - Open results come back in issuance order, whatever order probes finish in.
pub struct ScanEngine<P> {
    prober: Arc<P>,
    concurrency: usize,
}

impl<P: Prober> ScanEngine<P> {
    pub fn new(prober: P, concurrency: usize) -> Self {
        Self::with_shared(Arc::new(prober), concurrency)
    }

    pub fn with_shared(prober: Arc<P>, concurrency: usize) -> Self {
        Self {
            prober,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Probe every (host, port) pair exactly once and return the open ones.
    pub async fn scan(
        &self,
        hosts: &[IpAddr],
        ports: &[u16],
        progress: &mut ProgressCounter,
    ) -> Vec<ProbeResult> {
        let total = hosts.len() as u64 * ports.len() as u64;
        progress.add_total(total);
        debug!(
            worker = progress.worker_id(),
            hosts = hosts.len(),
            ports = ports.len(),
            concurrency = self.concurrency,
            "starting scan"
        );

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();
        let mut open: Vec<(usize, Target)> = Vec::new();

        let targets = hosts
            .iter()
            .flat_map(|&host| ports.iter().map(move |&port| Target::new(host, port)));

        for (idx, target) in targets.enumerate() {
            while let Some(res) = set.try_join_next() {
                collect(res, &mut open, progress);
            }

            let permit = sem
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            let prober = self.prober.clone();

            set.spawn(async move {
                let _permit = permit; // released when the probe finishes
                let is_open = prober.probe(target).await;
                (idx, target, is_open)
            });
        }

        while let Some(res) = set.join_next().await {
            collect(res, &mut open, progress);
        }

        open.sort_unstable_by_key(|&(idx, _)| idx);
        open.into_iter()
            .map(|(_, target)| ProbeResult::new(target, true))
            .collect()
    }
}

fn collect(
    res: Result<TaskOutput, JoinError>,
    open: &mut Vec<(usize, Target)>,
    progress: &mut ProgressCounter,
) {
    match res {
        Ok((idx, target, true)) => {
            info!("{target} is open");
            open.push((idx, target));
        }
        Ok(_) => {}
        Err(e) => warn!(worker = progress.worker_id(), error = %e, "probe task failed"),
    }
    progress.record();
}
