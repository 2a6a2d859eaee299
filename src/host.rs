//! Host capability probing.
use crate::{
    fuzz::features::{
        log_features, Features, FEATURE_COVERAGE, FEATURE_FAULT, FEATURE_LEAK,
        FEATURE_NET_DEVICES, FEATURE_NET_INJECTION, FEATURE_SANDBOX_SETUID,
    },
    model::{SyscallId, Target, NO_NR},
    targets::HOST_OS,
    HashMap, HashSet,
};
use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub type EnabledCalls = HashSet<SyscallId>;
/// Disabled calls with reasons.
pub type DisabledCalls = HashMap<SyscallId, String>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to read '{0}': {1}")]
    Io(PathBuf, std::io::Error),
}

/// Capabilities of the machine progs run on.
pub trait HostProbe {
    fn detect_supported_syscalls(
        &self,
        target: &Target,
    ) -> Result<(EnabledCalls, DisabledCalls), HostError>;

    fn check_features(&self, target: &Target) -> Result<Features, HostError>;

    fn setup(&self, target: &Target, features: Features) -> Result<(), HostError>;
}

/// Probe the local machine through procfs, sysfs and devfs.
#[derive(Debug, Clone)]
pub struct LocalHost {
    root: PathBuf,
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHost {
    pub fn new() -> Self {
        Self::with_root("/")
    }

    /// Probe files under `root` instead of `/`.
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    fn path(&self, p: &str) -> PathBuf {
        self.root.join(p)
    }

    #[inline]
    fn exists(&self, p: &str) -> bool {
        self.path(p).exists()
    }

    /// Kernel syscall names from kallsyms, `None` if kallsyms is not available.
    fn kallsyms_calls(&self) -> Result<Option<HashSet<String>>, HostError> {
        let path = self.path("proc/kallsyms");
        let syms = match read_to_string(&path) {
            Ok(syms) => syms,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(HostError::Io(path, e)),
        };
        let calls = syms
            .lines()
            .filter_map(|l| l.split_whitespace().nth(2))
            // sys_read, __x64_sys_read, __se_sys_read
            .filter_map(|sym| sym.find("sys_").map(|i| sym[i + 4..].to_string()))
            .collect::<HashSet<_>>();
        Ok(if calls.is_empty() { None } else { Some(calls) })
    }
}

impl HostProbe for LocalHost {
    fn detect_supported_syscalls(
        &self,
        target: &Target,
    ) -> Result<(EnabledCalls, DisabledCalls), HostError> {
        let mut enabled = EnabledCalls::default();
        let mut disabled = DisabledCalls::default();
        let kernel_calls = if target.os() == "linux" {
            self.kallsyms_calls()?
        } else {
            None
        };

        for syscall in target.syscalls() {
            let reason = if syscall.is_pseudo() {
                None
            } else if syscall.nr() == NO_NR {
                Some("no syscall number on this arch")
            } else {
                match kernel_calls.as_ref() {
                    Some(calls) if !calls.contains(syscall.call_name()) => {
                        Some("kernel does not support syscall")
                    }
                    _ => None,
                }
            };
            match reason {
                Some(r) => {
                    disabled.insert(syscall.id(), r.to_string());
                }
                None => {
                    enabled.insert(syscall.id());
                }
            }
        }
        Ok((enabled, disabled))
    }

    fn check_features(&self, target: &Target) -> Result<Features, HostError> {
        if target.os() != HOST_OS {
            return Ok(0);
        }
        let mut features = FEATURE_SANDBOX_SETUID;
        let probes = [
            (FEATURE_COVERAGE, "sys/kernel/debug/kcov"),
            (FEATURE_FAULT, "proc/self/make-it-fail"),
            (FEATURE_LEAK, "sys/kernel/debug/kmemleak"),
            (FEATURE_NET_INJECTION, "dev/net/tun"),
            (FEATURE_NET_DEVICES, "proc/net/dev"),
        ];
        for (f, p) in probes.iter() {
            if self.exists(p) {
                features |= f;
            }
        }
        Ok(features)
    }

    fn setup(&self, _target: &Target, features: Features) -> Result<(), HostError> {
        log_features(features);
        if features & FEATURE_LEAK != 0 {
            let p = self.path("sys/kernel/debug/kmemleak");
            check_writable(&p)?;
        }
        Ok(())
    }
}

fn check_writable(p: &Path) -> Result<(), HostError> {
    std::fs::OpenOptions::new()
        .write(true)
        .open(p)
        .map(|_| ())
        .map_err(|e| HostError::Io(p.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::load_target;
    use std::fs::{create_dir_all, write};

    #[test]
    fn detect_with_kallsyms() {
        let dir = tempfile::tempdir().unwrap();
        create_dir_all(dir.path().join("proc")).unwrap();
        write(
            dir.path().join("proc/kallsyms"),
            "0000000000000000 T __x64_sys_read\n\
             0000000000000000 T __x64_sys_open\n\
             0000000000000000 t do_sys_open\n\
             0000000000000000 T sys_close\n",
        )
        .unwrap();
        let host = LocalHost::with_root(dir.path());
        let t = load_target("linux", "amd64", None).unwrap();
        let (enabled, disabled) = host.detect_supported_syscalls(&t).unwrap();

        let sid = |name| t.syscall_of_name(name).unwrap().id();
        assert!(enabled.contains(&sid("read")));
        assert!(enabled.contains(&sid("open")));
        assert!(enabled.contains(&sid("close")));
        assert!(enabled.contains(&sid("syz_open_dev$tty")));
        assert_eq!(disabled[&sid("write")], "kernel does not support syscall");
        assert_eq!(enabled.len() + disabled.len(), t.syscalls().len());
    }

    #[test]
    fn no_kallsyms_enables_all() {
        let dir = tempfile::tempdir().unwrap();
        let host = LocalHost::with_root(dir.path());
        let t = load_target("linux", "amd64", None).unwrap();
        let (enabled, disabled) = host.detect_supported_syscalls(&t).unwrap();
        assert!(disabled.is_empty());
        assert_eq!(enabled.len(), t.syscalls().len());
    }

    #[test]
    fn features_from_files() {
        let dir = tempfile::tempdir().unwrap();
        create_dir_all(dir.path().join("dev/net")).unwrap();
        write(dir.path().join("dev/net/tun"), "").unwrap();
        let host = LocalHost::with_root(dir.path());
        let t = load_target("linux", "amd64", None).unwrap();
        let features = host.check_features(&t).unwrap();
        if HOST_OS == "linux" {
            assert_ne!(features & FEATURE_NET_INJECTION, 0);
            assert_eq!(features & FEATURE_COVERAGE, 0);
        } else {
            assert_eq!(features, 0);
        }
        host.setup(&t, features).unwrap();
    }
}
