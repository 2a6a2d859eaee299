use crate::utils::StopToken;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

#[derive(Debug, Default)]
pub struct Stats {
    exec_total: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc_exec_total(&self) {
        self.exec_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn exec_total(&self) -> u64 {
        self.exec_total.load(Ordering::Relaxed)
    }

    /// Log executed programs every `period` until `stop` fires.
    pub fn report(&self, period: Duration, stop: &StopToken) {
        let mut last = 0;
        while stop.sleep(period) {
            let exec_total = self.exec_total();
            log::info!(
                "executed {} programs (+{})",
                exec_total,
                exec_total.saturating_sub(last)
            );
            last = exec_total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_inc() {
        let stats = Arc::new(Stats::new());
        let handles = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.inc_exec_total();
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.exec_total(), 8000);
    }

    #[test]
    fn report_returns_on_stop() {
        let stats = Arc::new(Stats::new());
        let stop = StopToken::new();
        let reporter = {
            let stats = Arc::clone(&stats);
            let stop = stop.clone();
            thread::spawn(move || stats.report(Duration::from_millis(20), &stop))
        };
        stats.inc_exec_total();
        thread::sleep(Duration::from_millis(100));
        stop.stop_req();
        reporter.join().unwrap();
        assert_eq!(stats.exec_total(), 1);
    }
}
