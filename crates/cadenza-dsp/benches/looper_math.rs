use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cadenza_dsp::interp::read_cubic;
use cadenza_dsp::reverb::Freeverb;

fn bench_cubic(c: &mut Criterion) {
    let table: Vec<f32> = (0..65_536).map(|i| (i as f32 * 0.01).sin()).collect();
    c.bench_function("cubic read 512", |b| {
        b.iter(|| {
            let mut pos = 100.0f64;
            let mut acc = 0.0;
            for _ in 0..512 {
                acc += read_cubic(&table, pos);
                pos += 1.37;
            }
            black_box(acc)
        })
    });
}

fn bench_reverb(c: &mut Criterion) {
    let mut tank = Freeverb::new(48_000.0, 0);
    c.bench_function("freeverb 512", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for n in 0..512 {
                acc += tank.process(if n == 0 { 1.0 } else { 0.0 });
            }
            black_box(acc)
        })
    });
}

criterion_group!(benches, bench_cubic, bench_reverb);
criterion_main!(benches);
