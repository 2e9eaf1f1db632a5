use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand_core::{OsRng, RngCore};
use region_vault_core::{derive_key, seal_blob_with, RegionConfig, RegionVault};
use std::io::Cursor;
use std::time::Duration;

fn generate_random_data(size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    OsRng.fill_bytes(&mut data);
    data
}

fn benchmark_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_derivation");
    group.sample_size(10); // 65536 rounds per sample
    group.measurement_time(Duration::from_secs(10));

    let salt = [0x5au8; 16];
    group.bench_function("pbkdf2_sha256_65536", |b| {
        b.iter(|| derive_key(black_box(b"benchmark-secret"), black_box(&salt)));
    });

    group.finish();
}

fn benchmark_decrypt_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("decrypt_release");

    // Decryption and wiping only; derivation is measured above
    let vault = RegionVault::new(
        RegionConfig::default()
            .with_kdf_iterations(1)
            .with_lock_memory(false),
    )
    .expect("valid config");

    for size in [16, 1024, 64 * 1024, 1024 * 1024].iter() {
        let data = generate_random_data(*size);
        let blob = seal_blob_with(&data, b"benchmark-secret", &[1; 16], &[2; 16], 1)
            .expect("Sealing failed");

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("region", size), &blob, |b, blob| {
            b.iter(|| {
                let mut secret = b"benchmark-secret".to_vec();
                let handle = vault
                    .decrypt_reader(
                        &mut Cursor::new(black_box(blob.as_slice())),
                        0,
                        blob.len() as i64,
                        &mut secret,
                    )
                    .expect("Decryption failed");
                vault.release(handle).expect("Release failed");
            });
        });
    }

    group.finish();
}

fn benchmark_locked_buffers(c: &mut Criterion) {
    let mut group = c.benchmark_group("locked_buffers");

    let locked = RegionVault::new(RegionConfig::default().with_kdf_iterations(1))
        .expect("valid config");
    let data = generate_random_data(4096);
    let blob = seal_blob_with(&data, b"benchmark-secret", &[1; 16], &[2; 16], 1)
        .expect("Sealing failed");

    group.bench_function("region_4k_locked", |b| {
        b.iter(|| {
            let mut secret = b"benchmark-secret".to_vec();
            let handle = locked
                .decrypt_reader(&mut Cursor::new(blob.as_slice()), 0, blob.len() as i64, &mut secret)
                .expect("Decryption failed");
            drop(handle);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_key_derivation,
    benchmark_decrypt_release,
    benchmark_locked_buffers
);
criterion_main!(benches);
