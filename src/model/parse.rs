//! Prog parse.
use super::prog::{Call, Prog, ResValue, Value};
use super::{Syscall, Target, Type};
use crate::HashMap;
use pest::Parser;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "model/prog.pest"]
struct SyntaxParser;

/// How to handle content that does not match the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Any mismatch is an error.
    Strict,
    /// Unknown calls are dropped, bad arguments fall back to default values,
    /// missing arguments are padded and extra ones are truncated.
    NonStrict,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax: {0}")]
    Syntax(Box<pest::error::Error<Rule>>),
    #[error("no calls")]
    NoCalls,
    #[error("line {line}: unknown call '{name}'")]
    UnknownCall { line: usize, name: String },
    #[error("line {line}: '{call}' expects {expected} args, found {found}")]
    ArgCount {
        line: usize,
        call: String,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: bad arg {idx} of '{call}': {reason}")]
    BadArg {
        line: usize,
        call: String,
        idx: usize,
        reason: String,
    },
    #[error("line {line}: undefined resource '{name}'")]
    UndefinedRes { line: usize, name: String },
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        ParseError::Syntax(Box::new(e))
    }
}

type Node<'a> = pest::iterators::Pair<'a, Rule>;

struct Context<'a, 't> {
    target: &'t Target,
    mode: ParseMode,
    /// Result names to call index, `None` for results of dropped calls.
    res: HashMap<&'a str, Option<usize>>,
    prog: Prog,
}

/// Parse textual prog `p` of `target`.
pub fn parse_prog(target: &Target, p: &str, mode: ParseMode) -> Result<Prog, ParseError> {
    let root = SyntaxParser::parse(Rule::Prog, p)?
        .next()
        .ok_or(ParseError::NoCalls)?;
    let mut ctx = Context {
        target,
        mode,
        res: HashMap::default(),
        prog: Prog::default(),
    };
    let mut seen = 0;
    for node in root.into_inner().filter(|n| n.as_rule() == Rule::Call) {
        seen += 1;
        ctx.convert_call(node)?;
    }
    if seen == 0 {
        return Err(ParseError::NoCalls);
    }
    let mut prog = ctx.prog;
    prog.calls.shrink_to_fit();
    Ok(prog)
}

impl<'a, 't> Context<'a, 't> {
    #[inline]
    fn strict(&self) -> bool {
        self.mode == ParseMode::Strict
    }

    fn convert_call(&mut self, node: Node<'a>) -> Result<(), ParseError> {
        debug_assert_eq!(node.as_rule(), Rule::Call);
        let line = node.as_span().start_pos().line_col().0;
        let mut nodes = node.into_inner().peekable();

        let mut ret = None;
        if let Some(n) = nodes.peek() {
            if n.as_rule() == Rule::Ret {
                ret = Some(n.as_str());
                nodes.next();
            }
        }
        let name = match nodes.next() {
            Some(n) => n.as_str(),
            None => return Err(ParseError::NoCalls),
        };
        let target = self.target;
        let syscall = match target.syscall_of_name(name) {
            Some(s) => s,
            None if self.strict() => {
                return Err(ParseError::UnknownCall {
                    line,
                    name: name.to_string(),
                })
            }
            None => {
                if let Some(r) = ret {
                    self.res.insert(r, None);
                }
                return Ok(());
            }
        };

        let arg_nodes = nodes.collect::<Vec<_>>();
        let params = syscall.params();
        if arg_nodes.len() != params.len() && self.strict() {
            return Err(ParseError::ArgCount {
                line,
                call: name.to_string(),
                expected: params.len(),
                found: arg_nodes.len(),
            });
        }
        let mut args = Vec::with_capacity(params.len());
        let mut arg_nodes = arg_nodes.into_iter();
        for (idx, param) in params.iter().enumerate() {
            let val = match arg_nodes.next() {
                Some(n) => self.convert_value(line, syscall, idx, param.ty(), n)?,
                None => param.ty().default_value(target),
            };
            args.push(val);
        }

        let idx = self.prog.len();
        if let Some(r) = ret {
            let v = syscall.ret().map(|_| idx);
            self.res.insert(r, v);
        }
        self.prog.calls.push(Call::new(syscall.id(), args));
        Ok(())
    }

    fn convert_value(
        &self,
        line: usize,
        syscall: &Syscall,
        idx: usize,
        ty: &Type,
        node: Node<'a>,
    ) -> Result<Value, ParseError> {
        let bad = |reason: String| ParseError::BadArg {
            line,
            call: syscall.name().to_string(),
            idx,
            reason,
        };
        let val = match node.as_rule() {
            Rule::Hex => match u64::from_str_radix(&node.as_str()[2..], 16) {
                Ok(v) if ty.res_name().is_some() => Ok(Value::Res(ResValue::Special(v))),
                Ok(v) => Ok(Value::Int(v)),
                Err(e) => Err(bad(e.to_string())),
            },
            Rule::Data => {
                let bytes = node.into_inner().next().map(|n| n.as_str()).unwrap_or("");
                hex::decode(bytes)
                    .map(|d| Value::Data(d.into_boxed_slice()))
                    .map_err(|e| bad(e.to_string()))
            }
            Rule::Ref => {
                let name = node.as_str();
                match self.res.get(name) {
                    Some(Some(i)) => match ty.res_name() {
                        Some(res) if self.target.produces(self.prog.calls[*i].sid, res) => {
                            Ok(Value::Res(ResValue::Ref(*i)))
                        }
                        _ => Err(bad(format!("'{}' can not be used as {}", name, ty))),
                    },
                    // result of a dropped call
                    Some(None) => return Ok(ty.default_value(self.target)),
                    None if self.strict() => {
                        return Err(ParseError::UndefinedRes {
                            line,
                            name: name.to_string(),
                        })
                    }
                    None => return Ok(ty.default_value(self.target)),
                }
            }
            r => unreachable!("unexpected rule: {:?}", r),
        };

        match val {
            Ok(v) if v.fits(ty) => Ok(v),
            Ok(v) if self.strict() => Err(bad(format!("{:?} is not a value of {}", v, ty))),
            Err(e) if self.strict() => Err(e),
            _ => Ok(ty.default_value(self.target)),
        }
    }
}
