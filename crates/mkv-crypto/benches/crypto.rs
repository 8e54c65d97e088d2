use mkv_crypto::{decrypt, encrypt, generate_data_key};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [64, 1024, 65536])]
fn bench_encrypt_value(bencher: divan::Bencher, size: usize) {
    let key = generate_data_key();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt(divan::black_box(&data), divan::black_box(key.as_bytes())).unwrap());
}

#[divan::bench(args = [64, 1024, 65536])]
fn bench_decrypt_value(bencher: divan::Bencher, size: usize) {
    let key = generate_data_key();
    let data = make_data(size);
    let encrypted = encrypt(&data, key.as_bytes()).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decrypt(divan::black_box(&encrypted), divan::black_box(key.as_bytes())).unwrap());
}

#[divan::bench]
fn bench_derive_wrapping_key() -> mkv_crypto::WrappingKey {
    let password = secrecy::SecretString::from("kmasc");
    let salt = mkv_crypto::Salt::from_bytes([7u8; 32]);
    mkv_crypto::derive_wrapping_key(divan::black_box(&password), &salt).unwrap()
}

fn main() {
    divan::main();
}
