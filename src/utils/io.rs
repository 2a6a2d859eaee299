use std::{
    fs::File,
    io::{ErrorKind, Read, Write},
    os::unix::prelude::{FromRawFd, IntoRawFd},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

/// Handle of a background reading thread.
#[derive(Debug)]
pub struct BackgroundReader {
    buf: Arc<Mutex<Vec<u8>>>,
    finished: Arc<AtomicBool>,
}

impl BackgroundReader {
    /// Take the data read so far.
    pub fn current_data(&self) -> Vec<u8> {
        let mut buf = self.buf.lock().unwrap();
        buf.split_off(0)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    /// Wait for EOF until `deadline`, returns whether EOF was reached.
    pub fn wait_finish_until(&self, deadline: Instant) -> bool {
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

/// Read `f` until EOF in a dedicated thread.
pub fn read_background<T: IntoRawFd>(f: T) -> BackgroundReader {
    let fd = f.into_raw_fd();
    let mut f = unsafe { File::from_raw_fd(fd) };
    let buf = Arc::new(Mutex::new(Vec::with_capacity(4096)));
    let finished = Arc::new(AtomicBool::new(false));
    let buf1 = Arc::clone(&buf);
    let finished1 = Arc::clone(&finished);

    thread::spawn(move || {
        let mut chunk = vec![0_u8; 1024 * 64].into_boxed_slice();
        while let Ok(sz) = f.read(&mut chunk[..]) {
            if sz == 0 {
                break;
            }
            let mut shared_buf = buf1.lock().unwrap();
            shared_buf.extend(&chunk[..sz]);
        }
        finished1.store(true, Ordering::Relaxed);
    });

    BackgroundReader { buf, finished }
}

/// Write all of `data` to `f` in a dedicated thread, then close `f`.
///
/// The thread exits early once the reading end is gone.
pub fn write_background<T: Write + Send + 'static>(mut f: T, data: Vec<u8>) {
    thread::spawn(move || {
        if let Err(e) = f.write_all(&data) {
            if e.kind() != ErrorKind::BrokenPipe {
                log::debug!("background write failed: {}", e);
            }
        }
    });
}
