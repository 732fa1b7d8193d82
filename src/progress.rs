use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

/// Completed tasks between two progress lines.
pub const PROGRESS_EVERY: u64 = 2_000;
/// Completed tasks between two elapsed-time lines.
pub const ELAPSED_EVERY: u64 = 10_000;

/// What a call to [`ProgressCounter::record`] reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    None,
    Progress,
    ProgressWithElapsed,
}

/// Per-worker task counter. Owned by the worker that created it, never shared.
#[derive(Debug)]
pub struct ProgressCounter {
    worker_id: usize,
    tasks_total: u64,
    tasks_finished: u64,
    started: Instant,
}

impl ProgressCounter {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            tasks_total: 0,
            tasks_finished: 0,
            started: Instant::now(),
        }
    }

    pub fn add_total(&mut self, tasks: u64) {
        self.tasks_total += tasks;
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn total(&self) -> u64 {
        self.tasks_total
    }

    pub fn finished(&self) -> u64 {
        self.tasks_finished
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Count one finished task, logging at the fixed milestones.
    pub fn record(&mut self) -> Milestone {
        self.tasks_finished += 1;
        let done = self.tasks_finished;
        if done % PROGRESS_EVERY != 0 {
            return Milestone::None;
        }

        let percent = if self.tasks_total == 0 {
            100.0
        } else {
            done as f64 / self.tasks_total as f64 * 100.0
        };
        info!(
            worker = self.worker_id,
            "scanned {done}/{}, progress {percent:.2}%",
            self.tasks_total
        );

        if done % ELAPSED_EVERY != 0 {
            return Milestone::Progress;
        }
        info!(
            worker = self.worker_id,
            "elapsed {:.2}s",
            self.elapsed().as_secs_f64()
        );
        Milestone::ProgressWithElapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestones_fire_at_fixed_counts() {
        let mut counter = ProgressCounter::new(3);
        counter.add_total(25_000);

        let mut progress = Vec::new();
        let mut elapsed = Vec::new();
        for _ in 0..25_000 {
            match counter.record() {
                Milestone::None => {}
                Milestone::Progress => progress.push(counter.finished()),
                Milestone::ProgressWithElapsed => elapsed.push(counter.finished()),
            }
        }

        assert_eq!(counter.finished(), 25_000);
        assert_eq!(elapsed, vec![10_000, 20_000]);
        assert_eq!(progress.len() + elapsed.len(), 12);
        assert!(progress.contains(&2_000) && progress.contains(&24_000));
    }
}
