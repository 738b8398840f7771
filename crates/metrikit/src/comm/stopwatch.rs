use std::time::Instant;

use crate::error::Result;

use super::Comm;

/// Lap timer for the outer driver.
///
/// `lap` reports the slowest rank's elapsed time since the previous lap,
/// so the number read off the log is the wall-clock cost of the pass, not
/// a lucky rank's view of it.
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    last: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
        }
    }

    pub fn lap(&mut self, comm: &Comm, label: &str) -> Result<f64> {
        comm.barrier()?;
        let elapsed = self.last.elapsed().as_secs_f64();
        let worst = comm.max(elapsed)?;
        self.last = Instant::now();
        if comm.once() {
            tracing::debug!(label, seconds = worst, "stopwatch lap");
        }
        Ok(worst)
    }

    pub fn total(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lap_advances() {
        let comm = Comm::solo();
        let mut watch = Stopwatch::start();
        let first = watch.lap(&comm, "warmup").unwrap();
        assert!(first >= 0.0);
        assert!(watch.total() >= first);
    }
}
