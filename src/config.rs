use crate::{
    exec::{EnvFlags, ExecConfig, ExecOpt},
    fuzz::worker::StressOptions,
    targets::{HOST_ARCH, HOST_OS},
};
use std::{path::PathBuf, time::Duration};

/// Upper bound of parallel workers.
pub const MAX_PROCS: u64 = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub os: String,
    pub arch: String,
    /// Corpus store, directory or single file.
    pub corpus: Option<PathBuf>,
    /// Print executor output of every execution.
    pub output: bool,
    pub procs: u64,
    /// Print each prog before execution.
    pub log_prog: bool,
    /// Generate new progs, otherwise only the corpus is mutated.
    pub generate: bool,
    /// Allow-list of syscalls, empty means all.
    pub syscalls: Vec<String>,
    pub enable: String,
    pub disable: String,
    /// Extra target descriptions.
    pub sys_dir: Option<PathBuf>,
    pub executor: PathBuf,
    pub executor_args: Vec<String>,
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            os: HOST_OS.to_string(),
            arch: HOST_ARCH.to_string(),
            corpus: None,
            output: false,
            procs: std::cmp::min(2 * num_cpus::get() as u64, MAX_PROCS),
            log_prog: false,
            generate: true,
            syscalls: Vec::new(),
            enable: "none".to_string(),
            disable: "none".to_string(),
            sys_dir: None,
            executor: PathBuf::from("./syz-executor"),
            executor_args: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn check(&self) -> anyhow::Result<()> {
        if self.os.is_empty() || self.arch.is_empty() {
            anyhow::bail!("empty target: '{}/{}'", self.os, self.arch);
        }
        if self.procs == 0 || self.procs > MAX_PROCS {
            anyhow::bail!("procs must be in 1..={}, got {}", MAX_PROCS, self.procs);
        }
        if self.timeout.as_millis() == 0 {
            anyhow::bail!("timeout must be positive");
        }
        if let Some(d) = self.sys_dir.as_ref() {
            if !d.is_dir() {
                anyhow::bail!("bad sys dir: {}", d.display());
            }
        }
        Ok(())
    }

    pub fn exec_config(&self, env: EnvFlags) -> ExecConfig {
        ExecConfig {
            executor: self.executor.clone(),
            args: self.executor_args.clone(),
            env,
            timeout: self.timeout,
        }
    }

    pub fn stress_options(&self) -> StressOptions {
        StressOptions {
            procs: self.procs,
            generate: self.generate,
            log_prog: self.log_prog,
            output: self.output,
            exec_opt: ExecOpt::new(),
        }
    }
}
