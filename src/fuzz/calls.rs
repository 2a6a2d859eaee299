//! Enabled syscall set.
use crate::{
    host::{DisabledCalls, EnabledCalls, HostError, HostProbe},
    model::{SyscallId, Target},
    HashSet,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallListError {
    #[error("failed to detect host supported syscalls: {0}")]
    Detect(#[from] HostError),
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),
}

/// Build the set of calls usable on `host`.
///
/// With `cross`, the target runs elsewhere and every call is enabled.
pub fn build_call_list<H: HostProbe + ?Sized>(
    target: &Target,
    host: &H,
    allow_list: &[String],
    cross: bool,
) -> Result<EnabledCalls, CallListError> {
    if cross {
        return Ok(target.syscalls().iter().map(|s| s.id()).collect());
    }

    let (mut enabled, mut disabled) = host.detect_supported_syscalls(target)?;
    if allow_list.iter().any(|s| !s.is_empty()) {
        let allowed = parse_enabled_syscalls(target, allow_list)?;
        enabled.retain(|sid| allowed.contains(sid));
        disabled.retain(|sid, _| allowed.contains(sid));
    }
    let mut disabled = disabled.into_iter().collect::<Vec<_>>();
    disabled.sort_unstable();
    for (sid, reason) in disabled {
        log::info!(
            "unsupported syscall: {}: {}",
            target.syscall_of(sid).name(),
            reason
        );
    }

    let (enabled, dropped) = transitively_enabled_calls(target, &enabled);
    let mut dropped = dropped.into_iter().collect::<Vec<_>>();
    dropped.sort_unstable();
    for (sid, reason) in dropped {
        log::info!(
            "transitively unsupported: {}: {}",
            target.syscall_of(sid).name(),
            reason
        );
    }
    Ok(enabled)
}

/// Resolve allow-list patterns to syscall ids, empty patterns are ignored.
pub fn parse_enabled_syscalls(
    target: &Target,
    patterns: &[String],
) -> Result<HashSet<SyscallId>, CallListError> {
    let mut ret = HashSet::default();
    for pattern in patterns.iter().filter(|p| !p.is_empty()) {
        let mut matched = false;
        for syscall in target.syscalls() {
            if match_syscall(syscall.name(), pattern) {
                ret.insert(syscall.id());
                matched = true;
            }
        }
        if !matched {
            return Err(CallListError::UnknownSyscall(pattern.clone()));
        }
    }
    Ok(ret)
}

/// `open` matches `open` and `open$dir`, `open*` matches `openat` too.
pub fn match_syscall(name: &str, pattern: &str) -> bool {
    if name == pattern {
        return true;
    }
    if let Some(rest) = name.strip_prefix(pattern) {
        if rest.starts_with('$') {
            return true;
        }
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    false
}

/// Keep calls whose consumed resources are reachable from the enabled calls.
///
/// A resource is reachable once some kept call creates it, starting from calls
/// that consume no resource. So a call never supplies its own inputs, and calls
/// that only feed each other (e.g. `dup` and `dup3` without any `open`) are
/// dropped together.
///
/// Returns the remaining calls and the dropped ones with reasons.
pub fn transitively_enabled_calls(
    target: &Target,
    enabled: &EnabledCalls,
) -> (EnabledCalls, DisabledCalls) {
    let mut sids = enabled.iter().copied().collect::<Vec<_>>();
    sids.sort_unstable();
    let missing_res = |kept: &EnabledCalls, sid: SyscallId| {
        target
            .syscall_of(sid)
            .input_res()
            .find(|res| !target.ctors(res).iter().any(|ctor| kept.contains(ctor)))
    };

    let mut kept = EnabledCalls::default();
    loop {
        let mut changed = false;
        for &sid in &sids {
            if !kept.contains(&sid) && missing_res(&kept, sid).is_none() {
                kept.insert(sid);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut dropped = DisabledCalls::default();
    for &sid in sids.iter().filter(|sid| !kept.contains(sid)) {
        if let Some(res) = missing_res(&kept, sid) {
            dropped.insert(sid, format!("no syscalls can create resource {}", res));
        }
    }
    (kept, dropped)
}
