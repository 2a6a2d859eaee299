//! Prog mutation.
use crate::{
    gen::{
        gen_call_at, mask, regen_value,
        select::{choose_weighted, ChoiceTable},
    },
    model::{Prog, Target, Type, Value},
    RngType,
};
use rand::prelude::*;

type MutateOp = fn(&Target, &mut RngType, usize, &ChoiceTable, &[Prog], &mut Prog) -> bool;

const MUTATE_OPS: [MutateOp; 4] = [splice, insert_call, mutate_arg, remove_call];
/// Accumulated weights of `MUTATE_OPS`.
const MUTATE_WEIGHTS: [u64; 4] = [1, 21, 31, 32];

/// Mutate `p` in place, keeping at most `ncalls` calls.
///
/// `corpus` is only read, as the source of splicing. Returns false if
/// nothing could be changed.
pub fn mutate(
    target: &Target,
    rng: &mut RngType,
    ncalls: usize,
    ct: &ChoiceTable,
    corpus: &[Prog],
    p: &mut Prog,
) -> bool {
    let mut mutated = false;
    let mut tries = 0;
    while tries < 128 && (!mutated || p.is_empty() || rng.gen_ratio(1, 3)) {
        let op = MUTATE_OPS[choose_weighted(rng, &MUTATE_WEIGHTS)];
        if op(target, rng, ncalls, ct, corpus, p) {
            mutated = true;
        }
        tries += 1;
    }
    p.truncate(ncalls);
    mutated
}

/// Replace the tail of `p` with a random corpus prog.
fn splice(
    _target: &Target,
    rng: &mut RngType,
    _ncalls: usize,
    _ct: &ChoiceTable,
    corpus: &[Prog],
    p: &mut Prog,
) -> bool {
    let other = match corpus.choose(rng) {
        Some(other) if !other.is_empty() => other,
        _ => return false,
    };
    let idx = rng.gen_range(0..=p.len());
    p.splice(idx, other);
    true
}

fn insert_call(
    target: &Target,
    rng: &mut RngType,
    ncalls: usize,
    ct: &ChoiceTable,
    _corpus: &[Prog],
    p: &mut Prog,
) -> bool {
    if p.len() >= ncalls {
        return false;
    }
    // prefer the end, calls there can use more resources
    let idx = if rng.gen_ratio(1, 2) {
        p.len()
    } else {
        rng.gen_range(0..=p.len())
    };
    gen_call_at(target, ct, rng, p, idx);
    true
}

fn mutate_arg(
    target: &Target,
    rng: &mut RngType,
    _ncalls: usize,
    _ct: &ChoiceTable,
    _corpus: &[Prog],
    p: &mut Prog,
) -> bool {
    if p.is_empty() {
        return false;
    }
    let idx = rng.gen_range(0..p.len());
    let syscall = target.syscall_of(p.calls[idx].sid);
    if syscall.params().is_empty() {
        return false;
    }
    let arg_idx = rng.gen_range(0..syscall.params().len());
    let ty = syscall.params()[arg_idx].ty();

    let new_val = match (ty, &p.calls[idx].args[arg_idx]) {
        (Type::Const { .. }, _) => return false,
        (Type::Int { bits, range: None }, Value::Int(v)) if rng.gen::<bool>() => {
            let delta = rng.gen_range(1..=4u64);
            let v = if rng.gen::<bool>() {
                v.wrapping_add(delta)
            } else {
                v.wrapping_sub(delta)
            };
            Value::Int(v & mask(*bits))
        }
        (Type::Buffer { .. }, Value::Data(data)) if !data.is_empty() && rng.gen::<bool>() => {
            let mut data = data.to_vec();
            let i = rng.gen_range(0..data.len());
            data[i] ^= 1 << rng.gen_range(0..8);
            Value::Data(data.into_boxed_slice())
        }
        _ => regen_value(target, rng, p, idx, ty),
    };

    let arg = &mut p.calls[idx].args[arg_idx];
    let changed = *arg != new_val;
    *arg = new_val;
    changed
}

fn remove_call(
    target: &Target,
    rng: &mut RngType,
    _ncalls: usize,
    _ct: &ChoiceTable,
    _corpus: &[Prog],
    p: &mut Prog,
) -> bool {
    if p.is_empty() {
        return false;
    }
    let idx = rng.gen_range(0..p.len());
    p.remove_call(target, idx);
    true
}
