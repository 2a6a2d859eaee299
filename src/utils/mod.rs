use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::sleep;
use std::time::{Duration, Instant};

pub mod gate;
pub mod io;

/// Cancellation flag shared by workers, the reporter and the signal handler.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn stop_soon(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stop_req(&self) {
        self.0.store(true, Ordering::Relaxed)
    }

    /// Sleep for `d`, waking early on stop request.
    /// Returns false if stop was requested.
    pub fn sleep(&self, d: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(50);
        let deadline = Instant::now() + d;
        loop {
            if self.stop_soon() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            sleep(std::cmp::min(SLICE, deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_token_shared() {
        let stop = StopToken::new();
        let stop1 = stop.clone();
        assert!(!stop1.stop_soon());
        stop.stop_req();
        assert!(stop1.stop_soon());
        assert!(!stop1.sleep(Duration::from_secs(10)));
    }

    #[test]
    fn sleep_full_period() {
        let stop = StopToken::new();
        let start = Instant::now();
        assert!(stop.sleep(Duration::from_millis(120)));
        assert!(start.elapsed() >= Duration::from_millis(120));
    }
}
