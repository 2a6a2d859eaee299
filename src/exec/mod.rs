//! Executor driving.
use crate::model::{Prog, Target};
use bytes::Bytes;
use iota::iota;
use std::{path::PathBuf, time::Duration};
use thiserror::Error;

pub mod syz;

pub use syz::SyzExecutor;

/// Env flags to executor.
pub type EnvFlags = u64;

iota! {
    pub const FLAG_DEBUG: EnvFlags = 1 << (iota);   // debug output from executor
    , FLAG_SIGNAL                                    // collect feedback signals (coverage)
    , FLAG_SANDBOX_SETUID                            // impersonate nobody user
    , FLAG_SANDBOX_NAMESPACE                         // use namespaces for sandboxing
    , FLAG_SANDBOX_ANDROID                           // use Android sandboxing for the untrusted_app domain
    , FLAG_EXTRA_COVER                               // collect extra coverage
    , FLAG_ENABLE_TUN                                // setup and use /dev/tun for packet injection
    , FLAG_ENABLE_NETDEV                             // setup more network devices for testing
    , FLAG_ENABLE_NETRESET                           // reset network namespace between programs
    , FLAG_ENABLE_CGROUPS                            // setup cgroups for testing
    , FLAG_ENABLE_BINFMT_MISC                        // setup binfmt_misc for testing
    , FLAG_ENABLE_CLOSEFDS                           // close fds after each program
}

/// Flag for controlling execution behavior.
pub type ExecFlags = u64;

iota! {
    pub const FLAG_COLLECT_COVER : ExecFlags = 1 << (iota);       // collect coverage
    , FLAG_DEDUP_COVER                                 // deduplicate coverage in executor
    , FLAG_INJECT_FAULT                                // inject a fault in this execution
    , FLAG_COLLECT_COMPS                               // collect KCOV comparisons
    , FLAG_THREADED                                    // use multiple threads to mitigate blocked syscalls
    , FLAG_COLLIDE                                     // collide syscalls to provoke data races
}

/// Option for controlling execution behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOpt {
    pub flags: ExecFlags,
}

impl Default for ExecOpt {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecOpt {
    pub const fn new() -> Self {
        Self {
            flags: FLAG_THREADED | FLAG_COLLIDE,
        }
    }

    #[inline]
    pub fn disable(&mut self, flag: u64) {
        self.flags &= u64::MAX ^ flag;
    }

    #[inline]
    pub fn enable(&mut self, flag: u64) {
        self.flags |= flag;
    }
}

/// Config shared by executors of all workers.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Path to executor binary.
    pub executor: PathBuf,
    /// Arguments placed before the `exec` command.
    pub args: Vec<String>,
    pub env: EnvFlags,
    /// Programs running longer than this are killed.
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ExecInfo {
    /// Exit code, `None` if killed.
    pub status: Option<i32>,
    pub elapsed: Duration,
}

/// Result of one execution.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    /// Raw output of executor, stdout followed by stderr.
    pub output: Bytes,
    pub info: ExecInfo,
    pub hanged: bool,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to create execution environment: {0}")]
    Env(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("executor exited with status {code}")]
    ExitStatus { code: i32, output: Bytes },
    #[error("executor killed by signal {signal}")]
    Signal { signal: i32, output: Bytes },
}

impl ExecError {
    /// Output of the failed execution, if any.
    pub fn output(&self) -> Option<&Bytes> {
        match self {
            ExecError::ExitStatus { output, .. } | ExecError::Signal { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Something that runs progs.
pub trait Executor {
    fn exec(&mut self, opt: &ExecOpt, target: &Target, p: &Prog) -> Result<Execution, ExecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_opt_flags() {
        let mut opt = ExecOpt::new();
        assert_eq!(opt.flags, 0x30);
        opt.disable(FLAG_COLLIDE);
        assert_eq!(opt.flags, FLAG_THREADED);
        opt.enable(FLAG_DEDUP_COVER);
        assert_ne!(opt.flags & FLAG_DEDUP_COVER, 0);
    }

    #[test]
    fn env_flag_values() {
        assert_eq!(FLAG_ENABLE_TUN, 1 << 6);
        assert_eq!(FLAG_ENABLE_BINFMT_MISC, 1 << 10);
        assert_eq!(FLAG_ENABLE_CLOSEFDS, 1 << 11);
    }

    #[test]
    fn error_output() {
        let e = ExecError::ExitStatus {
            code: 1,
            output: Bytes::from_static(b"oops"),
        };
        assert_eq!(e.output().map(|o| &o[..]), Some(&b"oops"[..]));
        assert!(ExecError::Env("x".into()).output().is_none());
    }
}
