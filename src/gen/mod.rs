//! Prog generation.
use crate::{
    model::{Call, Prog, ResValue, SyscallId, Target, Type, Value},
    RngType,
};
use rand::prelude::*;
use select::ChoiceTable;

pub mod select;

/// Max depth of resource constructors generated for one call.
const MAX_CTOR_DEPTH: usize = 3;

/// Generate prog with `ncalls` calls.
pub fn gen_prog(target: &Target, ct: &ChoiceTable, rng: &mut RngType, ncalls: usize) -> Prog {
    let mut p = Prog::default();
    while p.len() < ncalls {
        gen_call(target, ct, rng, &mut p);
    }
    // resource constructors may overshoot
    p.truncate(ncalls);
    p
}

/// Append a call chosen by `ct` to `p`.
#[inline]
pub fn gen_call(target: &Target, ct: &ChoiceTable, rng: &mut RngType, p: &mut Prog) {
    let idx = p.len();
    gen_call_at(target, ct, rng, p, idx)
}

/// Insert a call chosen by `ct` at `idx`, together with constructors of its resources.
pub fn gen_call_at(target: &Target, ct: &ChoiceTable, rng: &mut RngType, p: &mut Prog, idx: usize) {
    let bias = if idx == 0 {
        None
    } else {
        Some(p.calls[rng.gen_range(0..idx)].sid)
    };
    let sid = ct.choose(rng, bias);
    if idx == p.len() {
        gen_one_call(target, ct, rng, p, sid, 0);
        return;
    }

    let mut prefix = Prog::new(p.calls[..idx].to_vec());
    gen_one_call(target, ct, rng, &mut prefix, sid, 0);
    for (i, call) in prefix.calls.drain(idx..).enumerate() {
        p.insert_call(idx + i, call);
    }
}

/// Append call `sid` to `p`.
fn gen_one_call(
    target: &Target,
    ct: &ChoiceTable,
    rng: &mut RngType,
    p: &mut Prog,
    sid: SyscallId,
    depth: usize,
) {
    let syscall = target.syscall_of(sid);
    let mut args = Vec::with_capacity(syscall.params().len());
    for param in syscall.params() {
        let val = match param.ty() {
            Type::Res { res } => gen_res(target, ct, rng, p, res, depth),
            ty => gen_value(rng, ty),
        };
        args.push(val);
    }
    p.calls.push(Call::new(sid, args));
}

fn gen_res(
    target: &Target,
    ct: &ChoiceTable,
    rng: &mut RngType,
    p: &mut Prog,
    res: &str,
    depth: usize,
) -> Value {
    if rng.gen_ratio(9, 10) {
        if let Some(v) = reuse_res(target, rng, p, p.len(), res) {
            return v;
        }
    }
    if depth < MAX_CTOR_DEPTH && rng.gen_ratio(2, 3) {
        if let Some(sid) = ct.ctors_of(res).choose(rng) {
            gen_one_call(target, ct, rng, p, *sid, depth + 1);
            return Value::Res(ResValue::Ref(p.len() - 1));
        }
    }
    special_res(target, rng, res)
}

/// Refer to the result of a call before `idx` usable as `res`.
fn reuse_res(target: &Target, rng: &mut RngType, p: &Prog, idx: usize, res: &str) -> Option<Value> {
    let candidates = p.calls[..idx]
        .iter()
        .enumerate()
        .filter(|(_, c)| target.produces(c.sid, res))
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    candidates
        .choose(rng)
        .map(|i| Value::Res(ResValue::Ref(*i)))
}

fn special_res(target: &Target, rng: &mut RngType, res: &str) -> Value {
    let val = target
        .res_of(res)
        .and_then(|r| r.values().choose(rng).copied())
        .unwrap_or(0);
    Value::Res(ResValue::Special(val))
}

/// Regenerate value of type `ty` for the call at `idx`, never adds calls.
pub fn regen_value(target: &Target, rng: &mut RngType, p: &Prog, idx: usize, ty: &Type) -> Value {
    match ty {
        Type::Res { res } => {
            if rng.gen_ratio(4, 5) {
                if let Some(v) = reuse_res(target, rng, p, idx, res) {
                    return v;
                }
            }
            special_res(target, rng, res)
        }
        ty => gen_value(rng, ty),
    }
}

/// Generate value of non-resource type.
pub fn gen_value(rng: &mut RngType, ty: &Type) -> Value {
    match ty {
        Type::Int { bits, range } => Value::Int(gen_int(rng, *bits, *range)),
        Type::Const { val } => Value::Int(*val),
        Type::Flags { vals } => Value::Int(gen_flags(rng, vals)),
        Type::Buffer { min_len, max_len } => {
            let len = rng.gen_range(*min_len..=*max_len);
            let mut buf = vec![0; len];
            if rng.gen_ratio(4, 5) {
                rng.fill_bytes(&mut buf);
            }
            Value::Data(buf.into_boxed_slice())
        }
        Type::Res { .. } => unreachable!("resource value needs prog context"),
    }
}

#[inline]
pub(crate) fn mask(bits: u64) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1 << bits) - 1
    }
}

fn gen_int(rng: &mut RngType, bits: u64, range: Option<(u64, u64)>) -> u64 {
    if let Some((lo, hi)) = range {
        return rng.gen_range(lo..=hi);
    }
    let m = mask(bits);
    if rng.gen_ratio(1, 3) {
        const SPECIAL: [u64; 6] = [0, 1, 2, 0x7f, 0x80, u64::MAX];
        SPECIAL.choose(rng).map(|v| v & m).unwrap_or(0)
    } else {
        rng.gen::<u64>() & m
    }
}

fn gen_flags(rng: &mut RngType, vals: &[u64]) -> u64 {
    if vals.is_empty() || rng.gen_ratio(1, 10) {
        return 0;
    }
    let n = rng.gen_range(1..=std::cmp::min(3, vals.len()));
    vals.choose_multiple(rng, n).fold(0, |acc, v| acc | v)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gen::select::calculate_priorities;
    use crate::model::parse::{parse_prog, ParseMode};
    use crate::targets::load_target;
    use crate::HashSet;

    fn setup(os: &str, arch: &str) -> (Target, ChoiceTable) {
        let t = load_target(os, arch, None).unwrap();
        let prios = calculate_priorities(&t, &[]);
        let enabled = t.syscalls().iter().map(|s| s.id()).collect::<HashSet<_>>();
        let ct = ChoiceTable::new(&t, &prios, &enabled).unwrap();
        (t, ct)
    }

    /// Every reference points to an earlier call producing a compatible resource.
    pub(crate) fn check_refs(t: &Target, p: &Prog) {
        for (i, c) in p.calls.iter().enumerate() {
            let syscall = t.syscall_of(c.sid);
            assert_eq!(c.args.len(), syscall.params().len());
            for (arg, param) in c.args.iter().zip(syscall.params()) {
                assert!(arg.fits(param.ty()));
                if let Value::Res(ResValue::Ref(r)) = arg {
                    assert!(*r < i);
                    assert!(t.produces(p.calls[*r].sid, param.ty().res_name().unwrap()));
                }
            }
        }
    }

    #[test]
    fn gen_valid_progs() {
        let (t, ct) = setup("linux", "amd64");
        let mut rng = SmallRng::from_entropy();
        for _ in 0..100 {
            let p = gen_prog(&t, &ct, &mut rng, 30);
            assert_eq!(p.len(), 30);
            check_refs(&t, &p);
        }
    }

    #[test]
    fn serialize_round_trip() {
        for (os, arch) in [("linux", "amd64"), ("test", "64")] {
            let (t, ct) = setup(os, arch);
            let mut rng = SmallRng::from_entropy();
            for _ in 0..100 {
                let p = gen_prog(&t, &ct, &mut rng, 30);
                let text = p.display(&t).to_string();
                let p1 = parse_prog(&t, &text, ParseMode::Strict).unwrap();
                assert_eq!(p, p1, "{}", text);
            }
        }
    }

    #[test]
    fn insert_in_middle() {
        let (t, ct) = setup("test", "64");
        let mut rng = SmallRng::from_entropy();
        for _ in 0..100 {
            let mut p = gen_prog(&t, &ct, &mut rng, 10);
            let idx = rng.gen_range(0..=p.len());
            gen_call_at(&t, &ct, &mut rng, &mut p, idx);
            assert!(p.len() > 10);
            check_refs(&t, &p);
        }
    }

    #[test]
    fn int_in_range() {
        let mut rng = SmallRng::from_entropy();
        for _ in 0..1000 {
            let v = gen_int(&mut rng, 8, None);
            assert!(v <= 0xff);
            let v = gen_int(&mut rng, 32, Some((2, 110)));
            assert!((2..=110).contains(&v));
        }
        assert_eq!(mask(64), u64::MAX);
        assert_eq!(mask(16), 0xffff);
    }
}
