//! Loading target descriptions.
//!
//! Descriptions are json objects with `os`, `arch`, `revision`, `resources` and
//! `syscalls` fields, see `sys/test_64.json`. Numbers may be json numbers or
//! hex strings (`"0xffffff9c"`) for values json can not hold precisely.
use crate::model::{Param, ResDesc, SyscallBuilder, Target, TargetBuilder, TargetError, Type};
use json::JsonValue;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod sys_json;

pub const HOST_OS: &str = std::env::consts::OS;

#[cfg(target_arch = "x86_64")]
pub const HOST_ARCH: &str = "amd64";
#[cfg(target_arch = "x86")]
pub const HOST_ARCH: &str = "386";
#[cfg(target_arch = "aarch64")]
pub const HOST_ARCH: &str = "arm64";
#[cfg(target_arch = "arm")]
pub const HOST_ARCH: &str = "arm";
#[cfg(target_arch = "mips64")]
pub const HOST_ARCH: &str = "mips64le";
#[cfg(target_arch = "powerpc64")]
pub const HOST_ARCH: &str = "ppc64le";
#[cfg(target_arch = "riscv64")]
pub const HOST_ARCH: &str = "riscv64";
#[cfg(target_arch = "s390x")]
pub const HOST_ARCH: &str = "s390x";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unknown target '{0}', supported: {1}")]
    UnknownTarget(String, String),
    #[error("failed to read '{0}': {1}")]
    Io(PathBuf, std::io::Error),
    #[error("json: {0}")]
    Json(#[from] json::Error),
    #[error("bad description: {0}")]
    Desc(String),
    #[error("target: {0}")]
    Target(#[from] TargetError),
}

/// Load target `os/arch`, `<sys_dir>/<os>_<arch>.json` takes precedence over built-in descriptions.
pub fn load_target(os: &str, arch: &str, sys_dir: Option<&Path>) -> Result<Target, LoadError> {
    let name = format!("{}/{}", os, arch);
    if let Some(dir) = sys_dir {
        let f = dir.join(format!("{}_{}.json", os, arch));
        if f.is_file() {
            let desc = std::fs::read_to_string(&f).map_err(|e| LoadError::Io(f.clone(), e))?;
            return parse_target(&desc);
        }
    }
    match sys_json::load(&name) {
        Some(desc) => parse_target(desc),
        None => Err(LoadError::UnknownTarget(
            name,
            sys_json::supported().join(", "),
        )),
    }
}

/// Build target from json description.
pub fn parse_target(desc: &str) -> Result<Target, LoadError> {
    let root = json::parse(desc)?;
    let mut builder = TargetBuilder::new();
    builder
        .os(str_of(&root, "os")?)
        .arch(str_of(&root, "arch")?)
        .revision(root["revision"].as_str().unwrap_or_default());

    let mut resources = Vec::new();
    for res in root["resources"].members() {
        let kinds = res["kinds"]
            .members()
            .map(|k| {
                k.as_str()
                    .map(String::from)
                    .ok_or_else(|| LoadError::Desc(format!("bad kind: {}", k)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let values = res["values"]
            .members()
            .map(num)
            .collect::<Result<Vec<_>, _>>()?;
        resources.push(ResDesc::new(str_of(res, "name")?, kinds, values));
    }
    builder.resources(resources);

    for call in root["syscalls"].members() {
        let mut syscall = SyscallBuilder::new();
        syscall
            .name(str_of(call, "name")?)
            .ret(call["ret"].as_str());
        if !call["nr"].is_null() {
            syscall.nr(num(&call["nr"])?);
        }
        if let Some(call_name) = call["call_name"].as_str() {
            syscall.call_name(call_name);
        }
        let params = call["params"]
            .members()
            .map(|p| Ok(Param::new(str_of(p, "name")?, convert_type(p)?)))
            .collect::<Result<Vec<_>, LoadError>>()?;
        syscall.params(params);
        builder.syscall(syscall);
    }

    Ok(builder.build()?)
}

fn convert_type(p: &JsonValue) -> Result<Type, LoadError> {
    let ty = match str_of(p, "type")? {
        "int" => {
            let bits = if p["bits"].is_null() { 64 } else { num(&p["bits"])? };
            let range = if p["range"].is_null() {
                None
            } else {
                let lo = num(&p["range"][0])?;
                let hi = num(&p["range"][1])?;
                if lo > hi {
                    return Err(LoadError::Desc(format!("bad range: {}", p["range"])));
                }
                Some((lo, hi))
            };
            Type::Int { bits, range }
        }
        "const" => Type::Const {
            val: num(&p["val"])?,
        },
        "flags" => Type::Flags {
            vals: p["vals"].members().map(num).collect::<Result<_, _>>()?,
        },
        "res" => Type::Res {
            res: str_of(p, "res")?.into(),
        },
        "buffer" => {
            let min_len = num(&p["min_len"])? as usize;
            let max_len = num(&p["max_len"])? as usize;
            if min_len > max_len {
                return Err(LoadError::Desc(format!("bad buffer len: {}", p)));
            }
            Type::Buffer { min_len, max_len }
        }
        ty => return Err(LoadError::Desc(format!("unknown type: {}", ty))),
    };
    Ok(ty)
}

fn str_of<'a>(v: &'a JsonValue, key: &str) -> Result<&'a str, LoadError> {
    v[key]
        .as_str()
        .ok_or_else(|| LoadError::Desc(format!("missing '{}' in {}", key, v)))
}

fn num(v: &JsonValue) -> Result<u64, LoadError> {
    if let Some(n) = v.as_u64() {
        return Ok(n);
    }
    v.as_str()
        .and_then(|s| s.strip_prefix("0x"))
        .and_then(|s| u64::from_str_radix(s, 16).ok())
        .ok_or_else(|| LoadError::Desc(format!("bad number: {}", v)))
}
