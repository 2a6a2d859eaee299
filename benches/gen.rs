use criterion::{criterion_group, criterion_main, Criterion};
use healer_stress::{
    fuzz::mutation::mutate,
    gen::{
        gen_prog,
        select::{calculate_priorities, ChoiceTable},
    },
    targets::load_target,
    HashSet, RngType,
};
use rand::SeedableRng;

pub fn bench_gen(c: &mut Criterion) {
    let target = load_target("linux", "amd64", None).unwrap();
    let prios = calculate_priorities(&target, &[]);
    let enabled = target.syscalls().iter().map(|s| s.id()).collect::<HashSet<_>>();
    let ct = ChoiceTable::new(&target, &prios, &enabled).unwrap();
    let mut rng = RngType::seed_from_u64(0);

    c.bench_function("gen", |b| b.iter(|| gen_prog(&target, &ct, &mut rng, 30)));

    let corpus = (0..16)
        .map(|_| gen_prog(&target, &ct, &mut rng, 30))
        .collect::<Vec<_>>();
    c.bench_function("mutate", |b| {
        b.iter(|| {
            let mut p = corpus[0].clone();
            mutate(&target, &mut rng, 30, &ct, &corpus, &mut p);
            p
        })
    });
}

criterion_group!(benches, bench_gen);
criterion_main!(benches);
