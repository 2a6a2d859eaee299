use std::cell::Cell;

thread_local! {
    static WORKER_ID: Cell<u64> = Cell::new(0);
}

#[inline]
pub fn set_worker_id(id: u64) {
    WORKER_ID.with(|r| r.set(id));
}

#[inline]
pub fn worker_id() -> u64 {
    WORKER_ID.with(|r| r.get())
}

#[macro_export]
macro_rules! worker_debug {
    ($t: tt) => (
        log::debug!(std::concat!("worker-{}: ", $t), $crate::fuzz::worker_log::worker_id())
    );
    ($t: tt, $($arg:tt)*) => (
        log::debug!(std::concat!("worker-{}: ", $t), $crate::fuzz::worker_log::worker_id(), $($arg)*)
    )
}

#[macro_export]
macro_rules! worker_info {
    ($t: tt) => (
        log::info!(std::concat!("worker-{}: ", $t), $crate::fuzz::worker_log::worker_id())
    );
    ($t: tt, $($arg:tt)*) => (
        log::info!(std::concat!("worker-{}: ", $t), $crate::fuzz::worker_log::worker_id(), $($arg)*)
    )
}

#[macro_export]
macro_rules! worker_warn {
    ($t: tt) => (
        log::warn!(std::concat!("worker-{}: ", $t), $crate::fuzz::worker_log::worker_id())
    );
    ($t: tt, $($arg:tt)*) => (
        log::warn!(std::concat!("worker-{}: ", $t), $crate::fuzz::worker_log::worker_id(), $($arg)*)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_per_thread() {
        set_worker_id(3);
        let other = std::thread::spawn(|| {
            set_worker_id(7);
            worker_info!("started");
            worker_id()
        });
        assert_eq!(other.join().unwrap(), 7);
        worker_warn!("{} calls", 30);
        assert_eq!(worker_id(), 3);
    }
}
