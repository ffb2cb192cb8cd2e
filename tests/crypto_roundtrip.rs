//! Encryption, homomorphic aggregation, and key lifecycle.

use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use sift_privacy::{
    decrypt_vector, dequantize, encrypt_values, encrypt_values_compact, generate_keypair,
    homomorphic_add, homomorphic_sub, quantize, CryptoError, KeyStore, NttTable, SecurityLevel,
    DEFAULT_SCALE,
};

fn rng(seed: u64) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(seed)
}

#[test]
fn test_quantized_roundtrip_within_bound() {
    let mut rng = rng(11);
    let keys = generate_keypair(SecurityLevel::Bits128, &mut rng);
    let table = NttTable::new(keys.public.params().ring_dim);

    let values = [0.1_f64, 1.5, 999.99, 42.0, 0.3333];
    let quantized: Vec<i64> = values
        .iter()
        .map(|&v| quantize(v, DEFAULT_SCALE).unwrap())
        .collect();

    let ct = encrypt_values(&quantized, &keys.public, &table, &mut rng).unwrap();
    let decrypted = decrypt_vector(&ct, &keys.secret, &table).unwrap();

    for (original, &got) in values.iter().zip(&decrypted) {
        assert!(
            (dequantize(got, DEFAULT_SCALE) - original).abs() < 0.01,
            "value {original} did not survive the round trip"
        );
    }
}

#[test]
fn test_homomorphic_add_matches_plaintext_sum() {
    let mut rng = rng(12);
    let keys = generate_keypair(SecurityLevel::Bits128, &mut rng);
    let table = NttTable::new(keys.public.params().ring_dim);

    let a = vec![100_i64, -250, 0, 7_000_000];
    let b = vec![23_i64, 250, -1, 1];

    let ct_a = encrypt_values(&a, &keys.public, &table, &mut rng).unwrap();
    let ct_b = encrypt_values(&b, &keys.public, &table, &mut rng).unwrap();

    let sum = homomorphic_add(&ct_a, &ct_b).unwrap();
    let decrypted = decrypt_vector(&sum, &keys.secret, &table).unwrap();
    for i in 0..a.len() {
        assert_eq!(decrypted[i], a[i] + b[i]);
    }

    let diff = homomorphic_sub(&ct_a, &ct_b).unwrap();
    let decrypted = decrypt_vector(&diff, &keys.secret, &table).unwrap();
    for i in 0..a.len() {
        assert_eq!(decrypted[i], a[i] - b[i]);
    }
}

#[test]
fn test_many_fold_aggregation_stays_exact() {
    let mut rng = rng(13);
    let keys = generate_keypair(SecurityLevel::Bits128, &mut rng);
    let table = NttTable::new(keys.public.params().ring_dim);

    let per_batch = vec![3_i64, 5, 7];
    let mut acc = encrypt_values(&per_batch, &keys.public, &table, &mut rng).unwrap();
    for _ in 0..99 {
        let next = encrypt_values(&per_batch, &keys.public, &table, &mut rng).unwrap();
        acc = homomorphic_add(&acc, &next).unwrap();
    }

    let decrypted = decrypt_vector(&acc, &keys.secret, &table).unwrap();
    assert_eq!(decrypted[..3], [300, 500, 700]);
}

#[test]
fn test_compact_form_decrypts_and_is_smaller() {
    let mut rng = rng(14);
    let keys = generate_keypair(SecurityLevel::Bits128, &mut rng);
    let table = NttTable::new(keys.public.params().ring_dim);

    let values = vec![17_i64, -5, 123_456];
    let compact = encrypt_values_compact(&values, &keys.secret, &table, &mut rng).unwrap();
    assert!(compact.is_compact());

    let full = encrypt_values(&values, &keys.public, &table, &mut rng).unwrap();
    assert!(compact.ciphertext_len() < full.ciphertext_len());

    // Compact decrypts directly, and the expanded form agrees.
    assert_eq!(
        decrypt_vector(&compact, &keys.secret, &table).unwrap(),
        values
    );
    assert_eq!(
        decrypt_vector(&compact.expand(), &keys.secret, &table).unwrap(),
        values
    );

    // Expanded compact ciphertexts also mix with full ones.
    let mixed = homomorphic_add(&compact.expand(), &full).unwrap();
    let decrypted = decrypt_vector(&mixed, &keys.secret, &table).unwrap();
    assert_eq!(decrypted[..3], [34, -10, 246_912]);
}

#[test]
fn test_dimension_mismatch_rejected() {
    let mut rng = rng(15);
    let keys = generate_keypair(SecurityLevel::Bits128, &mut rng);
    let table = NttTable::new(keys.public.params().ring_dim);

    let a = encrypt_values(&[1, 2, 3], &keys.public, &table, &mut rng).unwrap();
    let b = encrypt_values(&[1, 2], &keys.public, &table, &mut rng).unwrap();
    assert!(matches!(
        homomorphic_add(&a, &b),
        Err(CryptoError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_cross_key_decryption_garbles() {
    let mut rng_a = rng(16);
    let mut rng_b = rng(17);
    let keys_a = generate_keypair(SecurityLevel::Bits128, &mut rng_a);
    let keys_b = generate_keypair(SecurityLevel::Bits128, &mut rng_b);
    let table = NttTable::new(keys_a.public.params().ring_dim);

    let values = vec![1_000_000_i64; 8];
    let ct = encrypt_values(&values, &keys_a.public, &table, &mut rng_a).unwrap();
    let wrong = decrypt_vector(&ct, &keys_b.secret, &table).unwrap();
    assert_ne!(wrong, values);
}

#[test]
fn test_keystore_persists_and_destroys_secret() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.bin");
    let mut rng = rng(18);

    let mut store = KeyStore::generate(SecurityLevel::Bits128, &mut rng);
    let ct = store.encrypt(&[42, -7], false, &mut rng).unwrap();
    store.save(&path).unwrap();

    let reloaded = KeyStore::load(&path).unwrap();
    assert_eq!(reloaded.decrypt(&ct).unwrap(), vec![42, -7]);

    // Destruction is irreversible: memory, then disk.
    let mut reloaded = reloaded;
    reloaded.destroy_secret_key().unwrap();
    assert!(!reloaded.has_secret_key());
    assert!(matches!(
        reloaded.decrypt(&ct),
        Err(CryptoError::KeyNotFound(_))
    ));

    // Encryption still works against the surviving public key.
    let store_after = KeyStore::load(&path).unwrap();
    assert!(store_after.encrypt(&[1], false, &mut rng).is_ok());
}

#[test]
fn test_higher_security_level_uses_larger_ring() {
    let mut rng = rng(19);
    let keys_128 = generate_keypair(SecurityLevel::Bits128, &mut rng);
    let keys_192 = generate_keypair(SecurityLevel::Bits192, &mut rng);
    assert!(keys_192.public.params().ring_dim > keys_128.public.params().ring_dim);

    let table = NttTable::new(keys_192.public.params().ring_dim);
    let ct = encrypt_values(&[9, 8, 7], &keys_192.public, &table, &mut rng).unwrap();
    assert_eq!(
        decrypt_vector(&ct, &keys_192.secret, &table).unwrap(),
        vec![9, 8, 7]
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_quantize_roundtrip_error_bounded(value in 0.1_f64..1000.0) {
        let q = quantize(value, DEFAULT_SCALE).unwrap();
        prop_assert!((dequantize(q, DEFAULT_SCALE) - value).abs() < 0.01);
    }

    #[test]
    fn prop_encrypted_sum_of_counts(counts in proptest::collection::vec(0_i64..10_000, 1..16)) {
        let mut rng = ChaCha20Rng::seed_from_u64(20);
        let keys = generate_keypair(SecurityLevel::Bits128, &mut rng);
        let table = NttTable::new(keys.public.params().ring_dim);

        let ct = encrypt_values(&counts, &keys.public, &table, &mut rng).unwrap();
        let doubled = homomorphic_add(&ct, &ct).unwrap();
        let decrypted = decrypt_vector(&doubled, &keys.secret, &table).unwrap();
        for (i, &c) in counts.iter().enumerate() {
            prop_assert_eq!(decrypted[i], 2 * c);
        }
    }
}
