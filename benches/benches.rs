use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use rand::Rng;

use vidcap::config::DecodeConfig;
use vidcap::decode::{
    bitify, find_pattern_kmp, find_pattern_naive, marker_pattern, BitWidth, Decoder, Endianness,
};

fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

fn bench_bitify(c: &mut Criterion) {
    let buf = random_bytes(1024 * 1024);

    let mut group = c.benchmark_group("bits");
    group.throughput(Throughput::Bytes(buf.len() as u64));
    group.bench_function("bitify_w32_little", |b| {
        b.iter(|| {
            let _ = bitify(&buf, BitWidth::W32, Endianness::Little);
        });
    });
    group.finish();
}

// Marker search over one channel of random data.
fn bench_find_pattern(c: &mut Criterion) {
    let bits = bitify(&random_bytes(256 * 1024), BitWidth::W8, Endianness::Big);
    let pattern = marker_pattern(0x80);

    let mut group = c.benchmark_group("find_pattern");
    group.throughput(Throughput::Elements(bits.len() as u64));
    group.bench_function("kmp", |b| {
        b.iter(|| {
            let _ = find_pattern_kmp(&bits, &pattern);
        });
    });
    group.bench_function("naive", |b| {
        b.iter(|| {
            let _ = find_pattern_naive(&bits, &pattern);
        });
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let buf = random_bytes(2 * 1024 * 1024);
    let decoder = Decoder::new(DecodeConfig::default());

    let mut group = c.benchmark_group("decode");
    group.sample_size(10);
    group.throughput(Throughput::Bytes(buf.len() as u64));
    group.bench_function("random_2mib", |b| {
        b.iter(|| {
            let _ = decoder.decode(&buf);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_bitify, bench_find_pattern, bench_decode);
criterion_main!(benches);
