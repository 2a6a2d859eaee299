//! Healer stress
//!
//! Keeps generating, mutating and executing syscall progs on many workers,
//! reporting how many progs were executed.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate pest_derive;

#[macro_use]
pub mod fuzz;
pub mod utils;
pub mod config;
pub mod corpus;
pub mod exec;
pub mod gen;
pub mod host;
pub mod model;
pub mod targets;

use crate::{
    config::Config,
    corpus::read_corpus,
    exec::{ExecConfig, ExecError, Executor, SyzExecutor},
    fuzz::{
        calls::build_call_list,
        features::{env_flags, parse_features_flags},
        worker::{ChoiceTableGen, SharedState, StressPool},
    },
    gen::select::{calculate_priorities, ChoiceTable},
    host::{HostProbe, LocalHost},
    targets::{load_target, HOST_OS},
    utils::StopToken,
};
use anyhow::Context;
use std::{sync::Arc, time::Duration};

pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type HashSet<K> = rustc_hash::FxHashSet<K>;
pub type RngType = rand::rngs::SmallRng;

/// Period of execution stats reports.
pub const REPORT_PERIOD: Duration = Duration::from_secs(5);

/// Run stress on the local host with syz-executor until `stop` fires.
pub fn boot(config: Config, stop: StopToken) -> anyhow::Result<()> {
    run(
        &config,
        &LocalHost::new(),
        |pid, exec_config| SyzExecutor::new(exec_config.clone(), pid),
        stop,
    )
}

/// Build shared state, start workers and report stats until `stop` fires.
pub fn run<H, E, F>(config: &Config, host: &H, mut make_executor: F, stop: StopToken) -> anyhow::Result<()>
where
    H: HostProbe + ?Sized,
    E: Executor + Send + 'static,
    F: FnMut(u64, &ExecConfig) -> Result<E, ExecError>,
{
    config.check().context("config error")?;
    let flags = parse_features_flags(&config.enable, &config.disable, true)
        .context("failed to parse feature flags")?;

    log::info!("loading target {}/{}...", config.os, config.arch);
    let target = load_target(&config.os, &config.arch, config.sys_dir.as_deref())
        .context("failed to load target")?;

    let corpus = read_corpus(config.corpus.as_deref(), &target).context("failed to read corpus")?;
    log::info!("parsed {} programs", corpus.len());
    if !config.generate && corpus.is_empty() {
        anyhow::bail!("nothing to mutate (--generate=false and no corpus)");
    }

    log::info!("detecting features...");
    let features = host
        .check_features(&target)
        .context("failed to detect host features")?;
    host.setup(&target, features)
        .context("failed to setup host features")?;

    let cross = config.os != HOST_OS;
    let enabled = build_call_list(&target, host, &config.syscalls, cross)
        .context("failed to build enabled syscalls")?;
    log::info!("enabled syscalls: {}", enabled.len());

    let prios = calculate_priorities(&target, &corpus);
    let ct = ChoiceTable::new(&target, &prios, &enabled).context("failed to build choice table")?;

    let exec_config = config.exec_config(env_flags(&flags, features));
    let shared = Arc::new(SharedState::new(
        target,
        corpus,
        Box::new(ChoiceTableGen::new(ct)),
        config.stress_options(),
        stop,
    ));
    let mut pool = StressPool::start(Arc::clone(&shared), |pid| make_executor(pid, &exec_config))
        .context("failed to start workers")?;

    shared.stats.report(REPORT_PERIOD, &shared.stop);
    log::info!("waiting workers to exit...");
    pool.join();
    log::info!("executed {} programs in total", shared.stats.exec_total());
    Ok(())
}

/// Request stop on SIGINT, SIGTERM or SIGQUIT.
pub fn setup_signal_handler(stop: StopToken) -> std::io::Result<()> {
    use signal_hook::consts::TERM_SIGNALS;
    use signal_hook::iterator::exfiltrator::WithOrigin;
    use signal_hook::iterator::SignalsInfo;

    let mut signals = SignalsInfo::<WithOrigin>::new(TERM_SIGNALS)?;
    std::thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || {
            if let Some(info) = signals.forever().next() {
                let name = signal_hook::low_level::signal_name(info.signal)
                    .map(|n| format!("{}({})", n, info.signal))
                    .unwrap_or_else(|| info.signal.to_string());
                let from = match info.process {
                    Some(p) => format!("(pid: {}, uid: {})", p.pid, p.uid),
                    None => "unknown".to_string(),
                };
                log::info!("{} recved, from: {}", name, from);
                stop.stop_req();
            }
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecOpt, Execution};
    use crate::fuzz::features::Features;
    use crate::host::{DisabledCalls, EnabledCalls, HostError};
    use crate::model::{Prog, Target};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    struct FakeHost;

    impl HostProbe for FakeHost {
        fn detect_supported_syscalls(
            &self,
            target: &Target,
        ) -> Result<(EnabledCalls, DisabledCalls), HostError> {
            let enabled = target.syscalls().iter().map(|s| s.id()).collect();
            Ok((enabled, DisabledCalls::default()))
        }

        fn check_features(&self, _: &Target) -> Result<Features, HostError> {
            Ok(0)
        }

        fn setup(&self, _: &Target, _: Features) -> Result<(), HostError> {
            Ok(())
        }
    }

    struct FakeExecutor(Arc<AtomicU64>);

    impl Executor for FakeExecutor {
        fn exec(&mut self, _: &ExecOpt, _: &Target, _: &Prog) -> Result<Execution, ExecError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Execution::default())
        }
    }

    fn test_config() -> Config {
        Config {
            os: "test".to_string(),
            arch: "64".to_string(),
            procs: 2,
            ..Config::default()
        }
    }

    #[test]
    fn nothing_to_mutate() {
        let config = Config {
            generate: false,
            ..test_config()
        };
        let created = AtomicU64::new(0);
        let execs = Arc::new(AtomicU64::new(0));
        let ret = run(
            &config,
            &FakeHost,
            |_, _| {
                created.fetch_add(1, Ordering::SeqCst);
                Ok(FakeExecutor(Arc::clone(&execs)))
            },
            StopToken::new(),
        );
        let e = ret.unwrap_err();
        assert!(e.to_string().contains("nothing to mutate"));
        assert_eq!(created.load(Ordering::SeqCst), 0);
        assert_eq!(execs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn run_until_stop() {
        let config = test_config();
        let stop = StopToken::new();
        let execs = Arc::new(AtomicU64::new(0));
        let stopper = {
            let stop = stop.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                stop.stop_req();
            })
        };
        let mut pids = Vec::new();
        run(
            &config,
            &FakeHost,
            |pid, exec_config| {
                assert_eq!(exec_config.timeout, config.timeout);
                pids.push(pid);
                Ok(FakeExecutor(Arc::clone(&execs)))
            },
            stop,
        )
        .unwrap();
        stopper.join().unwrap();
        assert_eq!(pids, vec![0, 1]);
        assert!(execs.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn unknown_target() {
        let config = Config {
            os: "plan9".to_string(),
            ..test_config()
        };
        let ret = run(
            &config,
            &FakeHost,
            |_, _| Ok(FakeExecutor(Arc::new(AtomicU64::new(0)))),
            StopToken::new(),
        );
        assert!(ret.is_err());
    }
}
