use tracing::info;

/// Live progress of one stage.
///
/// The total is not fixed up front: pruning removes work that will never be
/// dispatched, so the percentage is always taken against what is still live.
#[derive(Debug, Clone)]
pub struct Progress {
    stage: &'static str,
    total: usize,
    done: usize,
    last_logged_decile: usize,
}

impl Progress {
    pub fn new(stage: &'static str, total: usize) -> Self {
        Self {
            stage,
            total,
            done: 0,
            last_logged_decile: 0,
        }
    }

    /// Drop `n` units that will never run.
    pub fn prune(&mut self, n: usize) {
        self.total = self.total.saturating_sub(n).max(self.done);
        self.report();
    }

    pub fn complete(&mut self) {
        self.done += 1;
        self.total = self.total.max(self.done);
        self.report();
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.done as f64 / self.total as f64 * 100.0
    }

    fn report(&mut self) {
        if self.total == 0 {
            return;
        }
        let decile = self.done * 10 / self.total;
        if decile > self.last_logged_decile {
            self.last_logged_decile = decile;
            info!(
                stage = self.stage,
                done = self.done,
                total = self.total,
                "{:.0}% complete",
                self.percent()
            );
        }
    }
}
