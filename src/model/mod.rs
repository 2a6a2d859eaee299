//! Syscall description model.
//!
//! A [`Target`] owns every syscall and resource description of one os/arch pair.
//! Syscalls are identified by [`SyscallId`], which is also their index in
//! [`Target::syscalls`], so sets of calls never depend on pointer identity.
use crate::HashMap;
use std::fmt;
use thiserror::Error;

pub mod parse;
pub mod prog;

pub use prog::{Call, Prog, ResValue, Value};

pub type SyscallId = usize;

/// Syscall number of calls that do not exist on the target arch.
pub const NO_NR: u64 = u64::MAX;

/// Resource description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResDesc {
    name: Box<str>,
    /// Kind chain, from the most general kind to this one, e.g. `[fd, sock, sock_inet]`.
    kinds: Box<[Box<str>]>,
    /// Special values, the first one is the default.
    values: Box<[u64]>,
}

impl ResDesc {
    pub fn new<T: Into<String>>(name: T, kinds: Vec<String>, values: Vec<u64>) -> Self {
        Self {
            name: name.into().into_boxed_str(),
            kinds: kinds.into_iter().map(String::into_boxed_str).collect(),
            values: values.into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn kinds(&self) -> &[Box<str>] {
        &self.kinds
    }

    #[inline(always)]
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    #[inline]
    pub fn default_value(&self) -> u64 {
        self.values.first().copied().unwrap_or(0)
    }

    /// Whether a resource of `self` can be passed where `wanted` is expected.
    ///
    /// `sock` (`[fd, sock]`) can be used as `fd` (`[fd]`), but not the other way around.
    pub fn compatible_with(&self, wanted: &ResDesc) -> bool {
        self.kinds.len() >= wanted.kinds.len() && self.kinds[..wanted.kinds.len()] == wanted.kinds[..]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Int { bits: u64, range: Option<(u64, u64)> },
    Const { val: u64 },
    Flags { vals: Box<[u64]> },
    Res { res: Box<str> },
    Buffer { min_len: usize, max_len: usize },
}

impl Type {
    /// Name of the consumed resource, if any.
    #[inline]
    pub fn res_name(&self) -> Option<&str> {
        match self {
            Type::Res { res } => Some(res),
            _ => None,
        }
    }

    pub fn default_value(&self, target: &Target) -> Value {
        match self {
            Type::Int { range, .. } => Value::Int(range.map(|r| r.0).unwrap_or(0)),
            Type::Const { val } => Value::Int(*val),
            Type::Flags { .. } => Value::Int(0),
            Type::Res { res } => {
                let val = target.res_of(res).map(|r| r.default_value()).unwrap_or(0);
                Value::Res(ResValue::Special(val))
            }
            Type::Buffer { min_len, .. } => Value::Data(vec![0; *min_len].into_boxed_slice()),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int { bits, range: None } => write!(f, "int{}", bits),
            Type::Int {
                bits,
                range: Some((lo, hi)),
            } => write!(f, "int{}[{}:{}]", bits, lo, hi),
            Type::Const { val } => write!(f, "const[{:#x}]", val),
            Type::Flags { vals } => write!(f, "flags{:?}", vals),
            Type::Res { res } => write!(f, "{}", res),
            Type::Buffer { min_len, max_len } => write!(f, "buffer[{}:{}]", min_len, max_len),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    name: Box<str>,
    ty: Type,
}

impl Param {
    pub fn new<T: Into<String>>(name: T, ty: Type) -> Self {
        Self {
            name: name.into().into_boxed_str(),
            ty,
        }
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn ty(&self) -> &Type {
        &self.ty
    }
}

#[derive(Debug, Clone)]
pub struct Syscall {
    /// Unique id of each declared syscall, index in the target.
    id: SyscallId,
    /// Kernel call number, `NO_NR` if absent.
    nr: u64,
    /// Name in description, e.g. `openat$kvm`.
    name: Box<str>,
    /// Name of the kernel call, e.g. `openat`.
    call_name: Box<str>,
    params: Box<[Param]>,
    /// Resource returned by this call.
    ret: Option<Box<str>>,
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            write!(f, "{} {}", param.name, param.ty)?;
            if i != self.params.len() - 1 {
                write!(f, ", ")?;
            }
        }
        write!(f, ")")?;
        if let Some(r) = self.ret.as_ref() {
            write!(f, " {}", r)?;
        }
        Ok(())
    }
}

impl Syscall {
    #[inline(always)]
    pub fn id(&self) -> SyscallId {
        self.id
    }

    #[inline(always)]
    pub fn nr(&self) -> u64 {
        self.nr
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn call_name(&self) -> &str {
        &self.call_name
    }

    #[inline(always)]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    #[inline(always)]
    pub fn ret(&self) -> Option<&str> {
        self.ret.as_deref()
    }

    /// Pseudo syscalls are implemented by the executor itself.
    #[inline]
    pub fn is_pseudo(&self) -> bool {
        self.call_name.starts_with("syz_")
    }

    /// Resources consumed by this call, may contain duplicates.
    pub fn input_res(&self) -> impl Iterator<Item = &str> + '_ {
        self.params.iter().filter_map(|p| p.ty.res_name())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyscallBuilder {
    nr: Option<u64>,
    name: Option<String>,
    call_name: Option<String>,
    params: Vec<Param>,
    ret: Option<String>,
}

impl SyscallBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nr(&mut self, nr: u64) -> &mut Self {
        self.nr = Some(nr);
        self
    }

    pub fn name<T: Into<String>>(&mut self, name: T) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn call_name<T: Into<String>>(&mut self, call_name: T) -> &mut Self {
        self.call_name = Some(call_name.into());
        self
    }

    pub fn params(&mut self, params: Vec<Param>) -> &mut Self {
        self.params = params;
        self
    }

    pub fn ret<T: Into<String>>(&mut self, ret: Option<T>) -> &mut Self {
        self.ret = ret.map(|r| r.into());
        self
    }

    /// Id is assigned by `TargetBuilder`.
    fn build(self, id: SyscallId) -> Result<Syscall, TargetError> {
        let name = self.name.ok_or(TargetError::Missing("syscall name"))?;
        // `openat$kvm` -> `openat`
        let call_name = self
            .call_name
            .unwrap_or_else(|| name.split('$').next().unwrap_or(&name).to_string());
        Ok(Syscall {
            id,
            nr: self.nr.unwrap_or(NO_NR),
            name: name.into_boxed_str(),
            call_name: call_name.into_boxed_str(),
            params: self.params.into_boxed_slice(),
            ret: self.ret.map(String::into_boxed_str),
        })
    }
}

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("duplicated syscall: {0}")]
    DupSyscall(String),
    #[error("duplicated resource: {0}")]
    DupRes(String),
    #[error("unknown resource '{res}' used by '{call}'")]
    UnknownRes { call: String, res: String },
}

/// All information about the syscalls of one os/arch.
#[derive(Debug, Clone)]
pub struct Target {
    os: Box<str>,
    arch: Box<str>,
    revision: Box<str>,
    /// All syscalls, sorted by `SyscallId`.
    syscalls: Vec<Syscall>,
    resources: Vec<ResDesc>,
    syscall_name_mapping: HashMap<Box<str>, SyscallId>,
    res_name_mapping: HashMap<Box<str>, usize>,
    /// Syscalls that output a resource compatible with the key.
    res_ctors: HashMap<Box<str>, Vec<SyscallId>>,
}

impl Target {
    #[inline(always)]
    pub fn os(&self) -> &str {
        &self.os
    }

    #[inline(always)]
    pub fn arch(&self) -> &str {
        &self.arch
    }

    #[inline(always)]
    pub fn revision(&self) -> &str {
        &self.revision
    }

    #[inline]
    pub fn target_name(&self) -> String {
        format!("{}/{}", self.os, self.arch)
    }

    #[inline(always)]
    pub fn syscalls(&self) -> &[Syscall] {
        &self.syscalls
    }

    #[inline(always)]
    pub fn resources(&self) -> &[ResDesc] {
        &self.resources
    }

    #[inline]
    pub fn syscall_of(&self, sid: SyscallId) -> &Syscall {
        &self.syscalls[sid]
    }

    #[inline]
    pub fn syscall_of_name(&self, name: &str) -> Option<&Syscall> {
        let sid = self.syscall_name_mapping.get(name)?;
        Some(&self.syscalls[*sid])
    }

    #[inline]
    pub fn res_of(&self, name: &str) -> Option<&ResDesc> {
        let idx = self.res_name_mapping.get(name)?;
        Some(&self.resources[*idx])
    }

    /// Syscalls that can create resource `res`.
    #[inline]
    pub fn ctors(&self, res: &str) -> &[SyscallId] {
        self.res_ctors.get(res).map(|c| &c[..]).unwrap_or(&[])
    }

    /// Whether the result of `sid` can be used as resource `res`.
    pub fn produces(&self, sid: SyscallId, res: &str) -> bool {
        let out = match self.syscalls[sid].ret() {
            Some(out) => out,
            None => return false,
        };
        match (self.res_of(out), self.res_of(res)) {
            (Some(out), Some(wanted)) => out.compatible_with(wanted),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TargetBuilder {
    os: Option<String>,
    arch: Option<String>,
    revision: Option<String>,
    syscalls: Vec<SyscallBuilder>,
    resources: Vec<ResDesc>,
}

impl TargetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn os<T: Into<String>>(&mut self, os: T) -> &mut Self {
        self.os = Some(os.into());
        self
    }

    pub fn arch<T: Into<String>>(&mut self, arch: T) -> &mut Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn revision<T: Into<String>>(&mut self, revision: T) -> &mut Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn resources(&mut self, resources: Vec<ResDesc>) -> &mut Self {
        self.resources = resources;
        self
    }

    /// Add one syscall, ids follow insertion order.
    pub fn syscall(&mut self, syscall: SyscallBuilder) -> &mut Self {
        self.syscalls.push(syscall);
        self
    }

    pub fn build(&mut self) -> Result<Target, TargetError> {
        let os = self.os.take().ok_or(TargetError::Missing("os"))?;
        let arch = self.arch.take().ok_or(TargetError::Missing("arch"))?;
        let revision = self.revision.take().unwrap_or_default();
        let resources = std::mem::take(&mut self.resources);
        let builders = std::mem::take(&mut self.syscalls);

        let mut res_name_mapping = HashMap::default();
        for (i, res) in resources.iter().enumerate() {
            if res_name_mapping.insert(res.name.clone(), i).is_some() {
                return Err(TargetError::DupRes(res.name().to_string()));
            }
        }

        let mut syscalls = Vec::with_capacity(builders.len());
        let mut syscall_name_mapping = HashMap::default();
        for (id, builder) in builders.into_iter().enumerate() {
            let syscall = builder.build(id)?;
            let used = syscall.input_res().chain(syscall.ret());
            for res in used {
                if !res_name_mapping.contains_key(res) {
                    return Err(TargetError::UnknownRes {
                        call: syscall.name().to_string(),
                        res: res.to_string(),
                    });
                }
            }
            if syscall_name_mapping
                .insert(syscall.name.clone(), id)
                .is_some()
            {
                return Err(TargetError::DupSyscall(syscall.name().to_string()));
            }
            syscalls.push(syscall);
        }

        let mut res_ctors: HashMap<Box<str>, Vec<SyscallId>> = HashMap::default();
        for wanted in resources.iter() {
            let ctors = syscalls
                .iter()
                .filter(|s| {
                    s.ret()
                        .map(|out| resources[res_name_mapping[out]].compatible_with(wanted))
                        .unwrap_or(false)
                })
                .map(|s| s.id())
                .collect();
            res_ctors.insert(wanted.name.clone(), ctors);
        }

        Ok(Target {
            os: os.into_boxed_str(),
            arch: arch.into_boxed_str(),
            revision: revision.into_boxed_str(),
            syscalls,
            resources,
            syscall_name_mapping,
            res_name_mapping,
            res_ctors,
        })
    }
}
