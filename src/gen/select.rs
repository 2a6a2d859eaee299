//! Call priorities and choice table.
//!
//! Priority `prios[a][b]` is how much call `b` is preferred when the prog
//! already contains `a`. The static part comes from resource usage, the
//! dynamic part from call pairs that appear together in the corpus.
use crate::{
    model::{Prog, SyscallId, Target},
    HashMap, HashSet, RngType,
};
use rand::prelude::*;
use thiserror::Error;

pub const PRIO_MIN: u64 = 10;
pub const PRIO_MAX: u64 = 1000;

/// Square matrix over all syscalls of a target.
#[derive(Debug, Clone)]
pub struct Priorities {
    n: usize,
    prios: Vec<u64>,
}

impl Priorities {
    fn new(n: usize, init: u64) -> Self {
        Self {
            n,
            prios: vec![init; n * n],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    pub fn get(&self, a: SyscallId, b: SyscallId) -> u64 {
        self.prios[a * self.n + b]
    }

    #[inline]
    pub fn row(&self, a: SyscallId) -> &[u64] {
        &self.prios[a * self.n..(a + 1) * self.n]
    }

    #[inline]
    fn row_mut(&mut self, a: SyscallId) -> &mut [u64] {
        &mut self.prios[a * self.n..(a + 1) * self.n]
    }

    /// Map each row into `[PRIO_MIN, PRIO_MAX]`.
    fn normalize(&mut self) {
        for a in 0..self.n {
            let row = self.row_mut(a);
            let min = row.iter().copied().min().unwrap_or(0);
            let max = row.iter().copied().max().unwrap_or(0);
            for w in row.iter_mut() {
                *w = if max == min {
                    PRIO_MIN
                } else {
                    PRIO_MIN + (*w - min) * (PRIO_MAX - PRIO_MIN) / (max - min)
                };
            }
        }
    }
}

pub fn calculate_priorities(target: &Target, corpus: &[Prog]) -> Priorities {
    let mut prios = static_priorities(target);
    if !corpus.is_empty() {
        let dynamic = dynamic_priorities(target, corpus);
        for (s, d) in prios.prios.iter_mut().zip(dynamic.prios.iter()) {
            *s = std::cmp::max(*s * *d / PRIO_MAX, 1);
        }
    }
    prios
}

fn static_priorities(target: &Target) -> Priorities {
    const BASE: u64 = 1;
    const INFLUENCE: u64 = 10;
    const SHARED_INPUT: u64 = 5;

    let syscalls = target.syscalls();
    let mut prios = Priorities::new(syscalls.len(), BASE);
    let inputs = syscalls
        .iter()
        .map(|s| s.input_res().collect::<HashSet<_>>())
        .collect::<Vec<_>>();

    for a in syscalls {
        for b in syscalls {
            let mut w = BASE;
            // `a` produces something `b` needs.
            if inputs[b.id()].iter().any(|res| target.produces(a.id(), res)) {
                w += INFLUENCE;
            }
            if inputs[a.id()].intersection(&inputs[b.id()]).next().is_some() {
                w += SHARED_INPUT;
            }
            prios.prios[a.id() * prios.n + b.id()] = w;
        }
    }
    prios.normalize();
    prios
}

fn dynamic_priorities(target: &Target, corpus: &[Prog]) -> Priorities {
    let mut prios = Priorities::new(target.syscalls().len(), 0);
    for p in corpus {
        for (i, a) in p.calls.iter().enumerate() {
            for (j, b) in p.calls.iter().enumerate() {
                if i != j {
                    prios.prios[a.sid * prios.n + b.sid] += 1;
                }
            }
        }
    }
    prios.normalize();
    prios
}

#[derive(Debug, Error)]
pub enum ChoiceTableError {
    #[error("no syscalls enabled")]
    NoEnabledCalls,
}

/// Weighted choice over the enabled calls.
#[derive(Debug, Clone)]
pub struct ChoiceTable {
    /// Enabled calls, sorted.
    enabled: Vec<SyscallId>,
    is_enabled: Vec<bool>,
    /// Accumulated weights over `enabled` of each enabled call, indexed by syscall id.
    runs: Vec<Box<[u64]>>,
    /// Enabled calls able to create each resource.
    ctors: HashMap<Box<str>, Vec<SyscallId>>,
}

impl ChoiceTable {
    pub fn new(
        target: &Target,
        prios: &Priorities,
        enabled: &HashSet<SyscallId>,
    ) -> Result<Self, ChoiceTableError> {
        let mut enabled_calls = enabled.iter().copied().collect::<Vec<_>>();
        if enabled_calls.is_empty() {
            return Err(ChoiceTableError::NoEnabledCalls);
        }
        enabled_calls.sort_unstable();

        let n = target.syscalls().len();
        let mut is_enabled = vec![false; n];
        for sid in enabled_calls.iter().copied() {
            is_enabled[sid] = true;
        }

        let mut runs: Vec<Box<[u64]>> = vec![Box::default(); n];
        for a in enabled_calls.iter().copied() {
            let mut sum = 0;
            runs[a] = enabled_calls
                .iter()
                .map(|b| {
                    sum += prios.get(a, *b);
                    sum
                })
                .collect();
        }

        let ctors: HashMap<Box<str>, Vec<SyscallId>> = target
            .resources()
            .iter()
            .map(|res| {
                let ctors = target
                    .ctors(res.name())
                    .iter()
                    .copied()
                    .filter(|sid| is_enabled[*sid])
                    .collect::<Vec<_>>();
                (res.name().into(), ctors)
            })
            .collect();

        Ok(Self {
            enabled: enabled_calls,
            is_enabled,
            runs,
            ctors,
        })
    }

    /// Choose an enabled call, weighted by priorities of `bias` if it is enabled.
    pub fn choose(&self, rng: &mut RngType, bias: Option<SyscallId>) -> SyscallId {
        match bias {
            Some(bias) if self.is_enabled(bias) => {
                let idx = choose_weighted(rng, &self.runs[bias]);
                self.enabled[idx]
            }
            _ => self.enabled[rng.gen_range(0..self.enabled.len())],
        }
    }

    #[inline]
    pub fn is_enabled(&self, sid: SyscallId) -> bool {
        self.is_enabled.get(sid).copied().unwrap_or(false)
    }

    #[inline]
    pub fn enabled_calls(&self) -> &[SyscallId] {
        &self.enabled
    }

    /// Enabled calls that create a resource compatible with `res`.
    #[inline]
    pub fn ctors_of(&self, res: &str) -> &[SyscallId] {
        self.ctors.get(res).map(|c| &c[..]).unwrap_or(&[])
    }
}

/// Return chosen index based on `weights`.
///
/// Weight is accumulated value. For example, [10, 35, 50] means each item has
/// 10%, 25%, 15% to be chosen.
pub(crate) fn choose_weighted(rng: &mut RngType, weights: &[u64]) -> usize {
    let max = weights.last().copied().unwrap_or(0);
    if max == 0 {
        return rng.gen_range(0..weights.len());
    }
    let n = rng.gen_range(0..max);
    weights.partition_point(|w| *w <= n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse::{parse_prog, ParseMode};
    use crate::targets::load_target;

    #[test]
    fn static_prios_in_range() {
        let t = load_target("test", "64", None).unwrap();
        let prios = calculate_priorities(&t, &[]);
        assert_eq!(prios.len(), t.syscalls().len());
        let open = t.syscall_of_name("test$open").unwrap().id();
        let read = t.syscall_of_name("test$read").unwrap().id();
        let nop = t.syscall_of_name("test$nop").unwrap().id();
        for a in 0..prios.len() {
            assert!(prios.row(a).iter().all(|w| (PRIO_MIN..=PRIO_MAX).contains(w)));
        }
        assert!(prios.get(open, read) > prios.get(open, nop));
    }

    #[test]
    fn corpus_affects_prios() {
        let t = load_target("test", "64", None).unwrap();
        let p = parse_prog(&t, "test$nop()\ntest$close(0x0)\n", ParseMode::Strict).unwrap();
        let nop = t.syscall_of_name("test$nop").unwrap().id();
        let close = t.syscall_of_name("test$close").unwrap().id();
        let sock = t.syscall_of_name("test$sock").unwrap().id();
        let prios = calculate_priorities(&t, &[p]);
        assert!(prios.get(nop, close) > prios.get(nop, sock));
    }

    #[test]
    fn choose_only_enabled() {
        let t = load_target("test", "64", None).unwrap();
        let prios = calculate_priorities(&t, &[]);
        let open = t.syscall_of_name("test$open").unwrap().id();
        let read = t.syscall_of_name("test$read").unwrap().id();
        let nop = t.syscall_of_name("test$nop").unwrap().id();
        let enabled = [open, read].iter().copied().collect::<HashSet<_>>();
        let ct = ChoiceTable::new(&t, &prios, &enabled).unwrap();
        let mut rng = SmallRng::from_entropy();
        for _ in 0..1000 {
            let sid = ct.choose(&mut rng, Some(open));
            assert!(sid == open || sid == read);
            let sid = ct.choose(&mut rng, Some(nop));
            assert!(sid == open || sid == read);
            let sid = ct.choose(&mut rng, None);
            assert!(sid == open || sid == read);
        }
        assert_eq!(ct.ctors_of("fd"), &[open]);
        assert!(ct.ctors_of("sock").is_empty());
        assert!(!ct.is_enabled(nop));
    }

    #[test]
    fn no_enabled_calls() {
        let t = load_target("test", "64", None).unwrap();
        let prios = calculate_priorities(&t, &[]);
        assert!(matches!(
            ChoiceTable::new(&t, &prios, &HashSet::default()),
            Err(ChoiceTableError::NoEnabledCalls)
        ));
    }

    #[test]
    fn weighted_choice() {
        let mut rng = SmallRng::from_entropy();
        let weights = [10, 10, 60];
        let mut hits = [0; 3];
        for _ in 0..10000 {
            hits[choose_weighted(&mut rng, &weights)] += 1;
        }
        // item 1 has zero weight
        assert_eq!(hits[1], 0);
        assert!(hits[2] > hits[0]);
    }
}
