//! Benchmark compact ciphertext size reduction
//!
//! Compares serialized sizes of full vs compact encrypted vectors and
//! times the seal/aggregate/decrypt path.
//! Run: cargo run --example benchmark_sealing

use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use sift_analytics::privacy::{
    decrypt_vector, encrypt_values, encrypt_values_compact, generate_keypair, homomorphic_add,
    NttTable, SecurityLevel,
};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    println!("Ciphertext Sealing Benchmark (sift-analytics)");
    println!("=============================================\n");

    let mut rng = ChaCha20Rng::seed_from_u64(1);

    for level in [SecurityLevel::Bits128, SecurityLevel::Bits192] {
        let start = Instant::now();
        let keys = generate_keypair(level, &mut rng);
        let keygen = start.elapsed();

        let params = keys.public.params();
        let table = NttTable::new(params.ring_dim);
        println!("Security level: {:?}", level);
        println!("  Ring dimension: {}", params.ring_dim);
        println!("  Key generation: {:?}", keygen);

        // One slot per action code, typical batch shape.
        let counts: Vec<i64> = (0..64).map(|i| (i * 137 % 5000) as i64).collect();

        let start = Instant::now();
        let full = encrypt_values(&counts, &keys.public, &table, &mut rng)?;
        let full_time = start.elapsed();

        let start = Instant::now();
        let compact = encrypt_values_compact(&counts, &keys.secret, &table, &mut rng)?;
        let compact_time = start.elapsed();

        let full_bytes = serde_json::to_vec(&full)?.len();
        let compact_bytes = serde_json::to_vec(&compact)?.len();
        let reduction = 100.0 * (1.0 - compact_bytes as f64 / full_bytes as f64);

        println!(
            "  Full ciphertext:    {} bytes ({:.1} KB) in {:?}",
            full_bytes,
            full_bytes as f64 / 1024.0,
            full_time
        );
        println!(
            "  Compact ciphertext: {} bytes ({:.1} KB) in {:?}",
            compact_bytes,
            compact_bytes as f64 / 1024.0,
            compact_time
        );
        println!("  Reduction: {:.1}%", reduction);

        // Aggregate 100 batches homomorphically and time the whole fold.
        let start = Instant::now();
        let mut acc = full.clone();
        for _ in 0..99 {
            let next = encrypt_values(&counts, &keys.public, &table, &mut rng)?;
            acc = homomorphic_add(&acc, &next)?;
        }
        let fold_time = start.elapsed();

        let start = Instant::now();
        let decrypted = decrypt_vector(&acc, &keys.secret, &table)?;
        let decrypt_time = start.elapsed();

        assert_eq!(decrypted[1], 100 * counts[1]);
        assert_eq!(
            decrypt_vector(&compact.expand(), &keys.secret, &table)?[..64],
            counts[..]
        );
        println!("  100-batch aggregation: {:?}", fold_time);
        println!("  Decryption: {:?}", decrypt_time);
        println!("  [OK] Aggregates and compact expansion decrypt exactly\n");
    }

    println!("Pipeline Impact");
    println!("---------------");
    println!("Compact form stores one ring element plus a 32-byte seed,");
    println!("roughly halving sealed-batch ciphertext size. The processor");
    println!("publishes the full form so batches aggregate without keys.");

    Ok(())
}
