//! Stress workers.
use crate::{
    config::MAX_PROCS,
    exec::{ExecError, ExecOpt, Executor},
    fuzz::{mutation, stats::Stats, worker_log::set_worker_id},
    gen::{gen_prog, select::ChoiceTable},
    model::{Prog, Target},
    utils::{gate::Gate, StopToken},
    RngType,
};
use rand::prelude::*;
use std::{
    io::Write,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

/// Number of calls of each generated prog.
pub const PROG_LEN: usize = 30;

/// What one iteration of a worker does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Generate, execute, mutate, execute.
    Generate,
    /// Clone a corpus prog, then mutate and execute it twice.
    Mutate,
}

impl Branch {
    #[inline]
    pub fn decide(generate: bool, corpus_empty: bool, i: u64) -> Self {
        if (generate && corpus_empty) || i % 4 != 0 {
            Branch::Generate
        } else {
            Branch::Mutate
        }
    }
}

/// Source of new and mutated progs.
pub trait ProgGen: Send + Sync {
    fn generate(&self, target: &Target, rng: &mut RngType, ncalls: usize) -> Prog;

    fn mutate(
        &self,
        target: &Target,
        rng: &mut RngType,
        ncalls: usize,
        corpus: &[Prog],
        p: &mut Prog,
    ) -> bool;
}

/// Generation and mutation driven by a choice table.
pub struct ChoiceTableGen {
    ct: ChoiceTable,
}

impl ChoiceTableGen {
    pub fn new(ct: ChoiceTable) -> Self {
        Self { ct }
    }
}

impl ProgGen for ChoiceTableGen {
    fn generate(&self, target: &Target, rng: &mut RngType, ncalls: usize) -> Prog {
        gen_prog(target, &self.ct, rng, ncalls)
    }

    fn mutate(
        &self,
        target: &Target,
        rng: &mut RngType,
        ncalls: usize,
        corpus: &[Prog],
        p: &mut Prog,
    ) -> bool {
        mutation::mutate(target, rng, ncalls, &self.ct, corpus, p)
    }
}

#[derive(Debug, Clone)]
pub struct StressOptions {
    pub procs: u64,
    /// Generate new progs, otherwise only the corpus is mutated.
    pub generate: bool,
    /// Print each prog before execution.
    pub log_prog: bool,
    /// Print executor output of every execution.
    pub output: bool,
    pub exec_opt: ExecOpt,
}

impl Default for StressOptions {
    fn default() -> Self {
        Self {
            procs: 1,
            generate: true,
            log_prog: false,
            output: false,
            exec_opt: ExecOpt::new(),
        }
    }
}

/// State shared by all workers, immutable except for the counters.
pub struct SharedState {
    pub target: Target,
    pub corpus: Arc<[Prog]>,
    pub gen: Box<dyn ProgGen>,
    pub stats: Stats,
    /// Bounds the workers queued on `console`.
    pub gate: Gate,
    pub console: Mutex<Box<dyn Write + Send>>,
    /// Receives progs and output of failed, hanged or `output` executions.
    pub dump: Mutex<Box<dyn Write + Send>>,
    pub opts: StressOptions,
    pub stop: StopToken,
}

impl SharedState {
    pub fn new(
        target: Target,
        corpus: Vec<Prog>,
        gen: Box<dyn ProgGen>,
        opts: StressOptions,
        stop: StopToken,
    ) -> Self {
        Self::with_outputs(
            target,
            corpus,
            gen,
            opts,
            stop,
            Box::new(std::io::stdout()),
            Box::new(std::io::stdout()),
        )
    }

    pub fn with_outputs(
        target: Target,
        corpus: Vec<Prog>,
        gen: Box<dyn ProgGen>,
        opts: StressOptions,
        stop: StopToken,
        console: Box<dyn Write + Send>,
        dump: Box<dyn Write + Send>,
    ) -> Self {
        let capacity = opts.procs.saturating_mul(2).clamp(1, 2 * MAX_PROCS) as usize;
        Self {
            target,
            corpus: corpus.into(),
            gen,
            stats: Stats::new(),
            gate: Gate::new(capacity),
            console: Mutex::new(console),
            dump: Mutex::new(dump),
            opts,
            stop,
        }
    }
}

pub struct Worker<E> {
    pid: u64,
    shared: Arc<SharedState>,
    executor: E,
    rng: RngType,
}

impl<E: Executor> Worker<E> {
    pub fn new(pid: u64, shared: Arc<SharedState>, executor: E) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let seed = now.wrapping_add(pid.wrapping_mul(1_000_000_000_000));
        Self {
            pid,
            shared,
            executor,
            rng: RngType::seed_from_u64(seed),
        }
    }

    #[inline]
    pub fn pid(&self) -> u64 {
        self.pid
    }

    /// Run iterations until stop is requested.
    pub fn run(&mut self) {
        set_worker_id(self.pid);
        worker_debug!("started");
        let mut i = 0;
        while !self.shared.stop.stop_soon() {
            self.run_iteration(i);
            i += 1;
        }
        worker_debug!("stopped after {} iterations", i);
    }

    /// Run iteration `i`, returns the branch taken.
    pub fn run_iteration(&mut self, i: u64) -> Branch {
        let shared = Arc::clone(&self.shared);
        let target = &shared.target;
        let branch = Branch::decide(shared.opts.generate, shared.corpus.is_empty(), i);
        match branch {
            Branch::Generate => {
                let mut p = shared.gen.generate(target, &mut self.rng, PROG_LEN);
                self.execute(&p);
                shared
                    .gen
                    .mutate(target, &mut self.rng, PROG_LEN, &shared.corpus, &mut p);
                self.execute(&p);
            }
            Branch::Mutate => {
                // empty corpus is refused at boot, fall back to a fresh prog anyway
                let mut p = match shared.corpus.choose(&mut self.rng) {
                    Some(p) => p.clone(),
                    None => shared.gen.generate(target, &mut self.rng, PROG_LEN),
                };
                for _ in 0..2 {
                    shared
                        .gen
                        .mutate(target, &mut self.rng, PROG_LEN, &shared.corpus, &mut p);
                    self.execute(&p);
                }
            }
        }
        branch
    }

    pub fn execute(&mut self, p: &Prog) {
        let shared = Arc::clone(&self.shared);
        shared.stats.inc_exec_total();

        if shared.opts.log_prog {
            let ticket = shared.gate.enter();
            {
                let mut console = shared.console.lock().unwrap();
                let text = p.display(&shared.target);
                if let Err(e) = write!(console, "executing program {}:\n{}", self.pid, text) {
                    worker_warn!("failed to write console: {}", e);
                }
            }
            shared.gate.leave(ticket);
        }

        match self.executor.exec(&shared.opts.exec_opt, &shared.target, p) {
            Ok(ret) => {
                if ret.hanged {
                    worker_warn!("program hanged after {:?}", ret.info.elapsed);
                }
                if ret.hanged || shared.opts.output {
                    self.dump(p, &ret.output);
                }
            }
            Err(e) => {
                worker_warn!("failed to execute program: {}", e);
                self.dump(p, e.output().map(|o| &o[..]).unwrap_or(&[]));
            }
        }
    }

    /// Write prog and raw output to the dump sink in one piece.
    fn dump(&self, p: &Prog, output: &[u8]) {
        let mut out = self.shared.dump.lock().unwrap();
        let ret = write!(out, "PROGRAM:\n{}\n", p.display(&self.shared.target))
            .and_then(|_| out.write_all(output))
            .and_then(|_| out.flush());
        if let Err(e) = ret {
            worker_warn!("failed to dump program: {}", e);
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create executor of worker-{pid}: {source}")]
    Executor { pid: u64, source: ExecError },
    #[error("failed to spawn worker-{pid}: {source}")]
    Spawn { pid: u64, source: std::io::Error },
}

/// Fixed set of worker threads.
pub struct StressPool;

impl StressPool {
    /// Start `shared.opts.procs` workers.
    ///
    /// All executors are created before the first worker starts, any failure
    /// leaves no worker running.
    pub fn start<E, F>(shared: Arc<SharedState>, mut make_executor: F) -> Result<PoolHandle, PoolError>
    where
        E: Executor + Send + 'static,
        F: FnMut(u64) -> Result<E, ExecError>,
    {
        let executors = (0..shared.opts.procs)
            .map(|pid| make_executor(pid).map_err(|source| PoolError::Executor { pid, source }))
            .collect::<Result<Vec<_>, _>>()?;

        let mut pool = PoolHandle {
            shared: Arc::clone(&shared),
            workers: Vec::with_capacity(executors.len()),
        };
        for (pid, executor) in (0..).zip(executors) {
            let mut worker = Worker::new(pid, Arc::clone(&shared), executor);
            let ret = thread::Builder::new()
                .name(format!("worker-{}", pid))
                .spawn(move || worker.run());
            match ret {
                Ok(handle) => pool.workers.push(handle),
                Err(source) => {
                    pool.stop();
                    pool.join();
                    return Err(PoolError::Spawn { pid, source });
                }
            }
        }
        log::info!("{} workers started", pool.workers.len());
        Ok(pool)
    }
}

pub struct PoolHandle {
    shared: Arc<SharedState>,
    workers: Vec<JoinHandle<()>>,
}

impl PoolHandle {
    #[inline]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Ask workers to stop after their current iteration.
    pub fn stop(&self) {
        self.shared.stop.stop_req();
    }

    /// Wait for all workers to exit.
    pub fn join(&mut self) {
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                log::error!("{} panicked", name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Execution;
    use bytes::Bytes;
    use crate::gen::select::calculate_priorities;
    use crate::targets::load_target;
    use crate::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct FakeExecutor {
        calls: Arc<AtomicU64>,
        fail: bool,
        hang: bool,
    }

    impl Executor for FakeExecutor {
        fn exec(&mut self, _: &ExecOpt, _: &Target, _: &Prog) -> Result<Execution, ExecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ExecError::ExitStatus {
                    code: 1,
                    output: Bytes::from_static(b"oops\n"),
                })
            } else if self.hang {
                Ok(Execution {
                    output: Bytes::from_static(b"stuck\n"),
                    hanged: true,
                    ..Execution::default()
                })
            } else {
                Ok(Execution {
                    output: Bytes::from_static(b"done\n"),
                    ..Execution::default()
                })
            }
        }
    }

    /// Counts progs generated.
    struct CountingGen {
        inner: ChoiceTableGen,
        generated: Arc<AtomicU64>,
    }

    impl ProgGen for CountingGen {
        fn generate(&self, target: &Target, rng: &mut RngType, ncalls: usize) -> Prog {
            self.generated.fetch_add(1, Ordering::SeqCst);
            self.inner.generate(target, rng, ncalls)
        }

        fn mutate(
            &self,
            target: &Target,
            rng: &mut RngType,
            ncalls: usize,
            corpus: &[Prog],
            p: &mut Prog,
        ) -> bool {
            self.inner.mutate(target, rng, ncalls, corpus, p)
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn choice_table_gen(t: &Target) -> ChoiceTableGen {
        let prios = calculate_priorities(t, &[]);
        let enabled = t.syscalls().iter().map(|s| s.id()).collect::<HashSet<_>>();
        ChoiceTableGen::new(ChoiceTable::new(t, &prios, &enabled).unwrap())
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn setup(
        corpus_len: usize,
        opts: StressOptions,
        console: SharedBuf,
        dump: SharedBuf,
    ) -> (Arc<SharedState>, Arc<AtomicU64>) {
        let t = load_target("test", "64", None).unwrap();
        let gen = choice_table_gen(&t);
        let mut rng = SmallRng::seed_from_u64(1);
        let corpus = (0..corpus_len)
            .map(|_| gen.generate(&t, &mut rng, PROG_LEN))
            .collect::<Vec<_>>();
        let generated = Arc::new(AtomicU64::new(0));
        let gen = CountingGen {
            inner: gen,
            generated: Arc::clone(&generated),
        };
        let shared = SharedState::with_outputs(
            t,
            corpus,
            Box::new(gen),
            opts,
            StopToken::new(),
            Box::new(console),
            Box::new(dump),
        );
        (Arc::new(shared), generated)
    }

    #[test]
    fn decide_branch() {
        assert_eq!(Branch::decide(true, true, 0), Branch::Generate);
        assert_eq!(Branch::decide(true, false, 0), Branch::Mutate);
        assert_eq!(Branch::decide(true, false, 1), Branch::Generate);
        assert_eq!(Branch::decide(false, false, 4), Branch::Mutate);
        assert_eq!(Branch::decide(false, false, 5), Branch::Generate);
    }

    #[test]
    fn empty_corpus_always_generates() {
        let (shared, generated) = setup(0, StressOptions::default(), SharedBuf::default(), SharedBuf::default());
        let executor = FakeExecutor::default();
        let mut worker = Worker::new(0, Arc::clone(&shared), executor.clone());
        for i in 0..20 {
            assert_eq!(worker.run_iteration(i), Branch::Generate);
        }
        assert_eq!(generated.load(Ordering::SeqCst), 20);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 40);
        assert_eq!(shared.stats.exec_total(), 40);
    }

    #[test]
    fn corpus_mutated_every_fourth_iteration() {
        let (shared, generated) = setup(5, StressOptions::default(), SharedBuf::default(), SharedBuf::default());
        let executor = FakeExecutor::default();
        let mut worker = Worker::new(1, Arc::clone(&shared), executor.clone());
        let mut mutated = 0;
        for i in 0..100 {
            if worker.run_iteration(i) == Branch::Mutate {
                assert_eq!(i % 4, 0);
                mutated += 1;
            }
        }
        assert_eq!(mutated, 25);
        assert_eq!(generated.load(Ordering::SeqCst), 75);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 200);
        assert_eq!(shared.stats.exec_total(), 200);
    }

    #[test]
    fn log_prog_to_console() {
        let console = SharedBuf::default();
        let opts = StressOptions {
            log_prog: true,
            ..StressOptions::default()
        };
        let (shared, _) = setup(0, opts, console.clone(), SharedBuf::default());
        let mut worker = Worker::new(3, Arc::clone(&shared), FakeExecutor::default());
        worker.run_iteration(0);
        let out = console.text();
        assert_eq!(out.matches("executing program 3:\n").count(), 2);
        assert_eq!(shared.gate.outstanding(), 0);
    }

    #[test]
    fn failed_execution_continues() {
        let dump = SharedBuf::default();
        let (shared, _) = setup(0, StressOptions::default(), SharedBuf::default(), dump.clone());
        let executor = FakeExecutor {
            fail: true,
            ..FakeExecutor::default()
        };
        let mut worker = Worker::new(0, Arc::clone(&shared), executor.clone());
        for i in 0..3 {
            worker.run_iteration(i);
        }
        assert_eq!(executor.calls.load(Ordering::SeqCst), 6);
        assert_eq!(shared.stats.exec_total(), 6);
        let out = dump.text();
        assert_eq!(out.matches("PROGRAM:\n").count(), 6);
        assert_eq!(out.matches("oops\n").count(), 6);
    }

    #[test]
    fn hanged_execution_dumped() {
        let dump = SharedBuf::default();
        let (shared, _) = setup(0, StressOptions::default(), SharedBuf::default(), dump.clone());
        let executor = FakeExecutor {
            hang: true,
            ..FakeExecutor::default()
        };
        let mut worker = Worker::new(0, Arc::clone(&shared), executor);
        worker.run_iteration(0);
        let out = dump.text();
        assert_eq!(out.matches("PROGRAM:\n").count(), 2);
        assert_eq!(out.matches("stuck\n").count(), 2);
    }

    #[test]
    fn output_dumped_on_request() {
        let dump = SharedBuf::default();
        let (shared, _) = setup(0, StressOptions::default(), SharedBuf::default(), dump.clone());
        let mut worker = Worker::new(0, Arc::clone(&shared), FakeExecutor::default());
        worker.run_iteration(0);
        assert!(dump.text().is_empty());

        let dump = SharedBuf::default();
        let opts = StressOptions {
            output: true,
            ..StressOptions::default()
        };
        let (shared, _) = setup(0, opts, SharedBuf::default(), dump.clone());
        let mut worker = Worker::new(0, Arc::clone(&shared), FakeExecutor::default());
        worker.run_iteration(0);
        let out = dump.text();
        assert!(out.starts_with("PROGRAM:\n"));
        assert_eq!(out.matches("done\n").count(), 2);
    }

    #[test]
    fn gate_capacity_bounded() {
        let opts = StressOptions {
            procs: u64::MAX,
            ..StressOptions::default()
        };
        let (shared, _) = setup(0, opts, SharedBuf::default(), SharedBuf::default());
        assert_eq!(shared.gate.capacity(), 2 * MAX_PROCS as usize);
    }

    #[test]
    fn pool_start_and_stop() {
        let opts = StressOptions {
            procs: 4,
            log_prog: true,
            ..StressOptions::default()
        };
        let (shared, _) = setup(2, opts, SharedBuf::default(), SharedBuf::default());
        let calls = Arc::new(AtomicU64::new(0));
        let mut created = Vec::new();
        let mut pool = StressPool::start(Arc::clone(&shared), |pid| {
            created.push(pid);
            Ok(FakeExecutor {
                calls: Arc::clone(&calls),
                ..FakeExecutor::default()
            })
        })
        .unwrap();
        assert_eq!(created, vec![0, 1, 2, 3]);
        assert_eq!(pool.len(), 4);
        thread::sleep(Duration::from_millis(100));
        pool.stop();
        pool.join();
        assert!(pool.is_empty());
        assert!(shared.stats.exec_total() > 0);
        assert_eq!(shared.stats.exec_total(), calls.load(Ordering::SeqCst));
    }

    #[test]
    fn executor_factory_failure() {
        let opts = StressOptions {
            procs: 4,
            ..StressOptions::default()
        };
        let (shared, _) = setup(0, opts, SharedBuf::default(), SharedBuf::default());
        let calls = Arc::new(AtomicU64::new(0));
        let ret = StressPool::start(Arc::clone(&shared), |pid| {
            if pid == 2 {
                Err(ExecError::Env("no executor".to_string()))
            } else {
                Ok(FakeExecutor {
                    calls: Arc::clone(&calls),
                    ..FakeExecutor::default()
                })
            }
        });
        assert!(matches!(ret, Err(PoolError::Executor { pid: 2, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(shared.stats.exec_total(), 0);
    }
}
