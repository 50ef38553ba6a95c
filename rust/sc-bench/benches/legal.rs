use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use sc_bench::gen_states;

fn bench_legal_moves(c: &mut Criterion) {
    let mut g = c.benchmark_group("sc_core_legal");
    for &n in &[256usize, 4096usize] {
        let states = gen_states(n, 200);
        g.bench_with_input(BenchmarkId::new("legal_moves_batch", n), &states, |b, s| {
            b.iter(|| {
                for st in s.iter() {
                    black_box(sc_core::legal_moves(black_box(st)));
                }
            })
        });
        g.bench_with_input(BenchmarkId::new("encode_state_batch", n), &states, |b, s| {
            b.iter(|| {
                for st in s.iter() {
                    black_box(sc_core::encode_state(black_box(st)));
                }
            })
        });
    }
    g.finish();
}

criterion_group!(benches, bench_legal_moves);
criterion_main!(benches);
