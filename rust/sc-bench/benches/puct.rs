use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use sc_bench::gen_states;
use sc_mcts::{Mcts, MctsConfig, SearchMode, UniformInference};

fn bench_search(c: &mut Criterion) {
    let states = gen_states(32, 200);
    let mut g = c.benchmark_group("sc_mcts_search");
    for &sims in &[64u32, 256u32] {
        let cfg = MctsConfig {
            simulations: sims,
            ..MctsConfig::default()
        };
        let mut mcts = match Mcts::new(cfg) {
            Ok(m) => m,
            Err(e) => panic!("bench config rejected: {e}"),
        };
        g.bench_with_input(BenchmarkId::new("uniform_search", sims), &states, |b, s| {
            b.iter(|| {
                for (i, st) in s.iter().enumerate() {
                    let mode = SearchMode::SelfPlay {
                        noise_seed: i as u64,
                    };
                    black_box(mcts.run_search(black_box(st), mode, &UniformInference).ok());
                }
            })
        });
    }
    g.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
