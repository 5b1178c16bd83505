use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use kscam_driver::components::convert::{copy_mono16, rgb24_to_bgra};

fn make_raw(width: u32, height: u32, bytes_per_pixel: u32) -> Vec<u8> {
    (0..(width * height * bytes_per_pixel) as usize)
        .map(|i| (i % 251) as u8)
        .collect()
}

fn bench_convert(c: &mut Criterion) {
    let mut group = c.benchmark_group("kscam_convert");

    for (width, height) in [(1636u32, 1088u32), (4908, 3264)] {
        let label = format!("{}x{}", width, height);
        group.throughput(Throughput::Elements(u64::from(width * height)));

        let rgb = make_raw(width, height, 3);
        let mut bgra = vec![0u8; (width * height * 4) as usize];
        group.bench_with_input(BenchmarkId::new("rgb24_to_bgra", &label), &rgb, |b, src| {
            b.iter(|| rgb24_to_bgra(&mut bgra, src, width, height))
        });

        let mono = make_raw(width, height, 2);
        let mut out = vec![0u8; mono.len()];
        group.bench_with_input(BenchmarkId::new("copy_mono16", &label), &mono, |b, src| {
            b.iter(|| copy_mono16(&mut out, src, width, height))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_convert);
criterion_main!(benches);
