//! Prog representation and textual form.
use super::{SyscallId, Target, Type};
use std::fmt;

/// Value of a resource argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResValue {
    /// Result of the call at this index of the same prog.
    Ref(usize),
    /// Literal special value.
    Special(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Int(u64),
    Res(ResValue),
    Data(Box<[u8]>),
}

impl Value {
    /// Whether `self` is a legal value of `ty`.
    pub fn fits(&self, ty: &Type) -> bool {
        matches!(
            (self, ty),
            (Value::Int(_), Type::Int { .. })
                | (Value::Int(_), Type::Const { .. })
                | (Value::Int(_), Type::Flags { .. })
                | (Value::Res(_), Type::Res { .. })
                | (Value::Data(_), Type::Buffer { .. })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    pub sid: SyscallId,
    pub args: Vec<Value>,
}

impl Call {
    pub fn new(sid: SyscallId, args: Vec<Value>) -> Self {
        Self { sid, args }
    }

    /// Indexes of the calls whose results this call uses.
    pub fn refs(&self) -> impl Iterator<Item = usize> + '_ {
        self.args.iter().filter_map(|a| match a {
            Value::Res(ResValue::Ref(i)) => Some(*i),
            _ => None,
        })
    }

    fn refs_mut(&mut self) -> impl Iterator<Item = &mut usize> + '_ {
        self.args.iter_mut().filter_map(|a| match a {
            Value::Res(ResValue::Ref(i)) => Some(i),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Prog {
    pub calls: Vec<Call>,
}

impl Prog {
    pub fn new(calls: Vec<Call>) -> Self {
        Self { calls }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Insert `call` at `idx`, the call itself may only use results of calls before `idx`.
    pub fn insert_call(&mut self, idx: usize, call: Call) {
        debug_assert!(call.refs().all(|r| r < idx));
        for c in &mut self.calls[idx..] {
            for r in c.refs_mut() {
                if *r >= idx {
                    *r += 1;
                }
            }
        }
        self.calls.insert(idx, call);
    }

    /// Remove the call at `idx`, users of its result fall back to the default special value.
    pub fn remove_call(&mut self, target: &Target, idx: usize) -> Call {
        let removed = self.calls.remove(idx);
        for c in &mut self.calls[idx..] {
            let syscall = target.syscall_of(c.sid);
            for (arg, param) in c.args.iter_mut().zip(syscall.params()) {
                if let Value::Res(ResValue::Ref(r)) = arg {
                    if *r == idx {
                        *arg = param.ty().default_value(target);
                    } else if *r > idx {
                        *r -= 1;
                    }
                }
            }
        }
        removed
    }

    /// Replace the calls starting from `idx` with the calls of `other`.
    pub fn splice(&mut self, idx: usize, other: &Prog) {
        self.calls.truncate(idx);
        self.calls.extend(other.calls.iter().cloned().map(|mut c| {
            for r in c.refs_mut() {
                *r += idx;
            }
            c
        }));
    }

    /// Keep at most `n` calls.
    #[inline]
    pub fn truncate(&mut self, n: usize) {
        // references only point backwards
        self.calls.truncate(n)
    }

    /// Textual form of `self`.
    pub fn display<'a>(&'a self, target: &'a Target) -> ProgDisplay<'a> {
        ProgDisplay { prog: self, target }
    }
}

pub struct ProgDisplay<'a> {
    prog: &'a Prog,
    target: &'a Target,
}

impl fmt::Display for ProgDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let calls = &self.prog.calls;
        // result name of each referenced call
        let mut names = vec![None; calls.len()];
        for c in calls {
            for r in c.refs() {
                names[r] = Some(0);
            }
        }
        let mut next = 0;
        for n in names.iter_mut().filter(|n| n.is_some()) {
            *n = Some(next);
            next += 1;
        }

        for (i, c) in calls.iter().enumerate() {
            if let Some(n) = names[i] {
                write!(f, "r{} = ", n)?;
            }
            write!(f, "{}(", self.target.syscall_of(c.sid).name())?;
            for (j, arg) in c.args.iter().enumerate() {
                if j != 0 {
                    write!(f, ", ")?;
                }
                match arg {
                    Value::Int(v) | Value::Res(ResValue::Special(v)) => write!(f, "{:#x}", v)?,
                    Value::Res(ResValue::Ref(r)) => match names[*r] {
                        Some(n) => write!(f, "r{}", n)?,
                        None => unreachable!(),
                    },
                    Value::Data(d) => write!(f, "\"{}\"", hex::encode(d))?,
                }
            }
            writeln!(f, ")")?;
        }
        Ok(())
    }
}
