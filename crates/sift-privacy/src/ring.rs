//! Negacyclic polynomial ring Z_q[x]/(x^n + 1)
//!
//! q = 2^60 - 2^14 + 1 is prime with 2-adicity 14, so the negacyclic NTT
//! works for every power-of-two ring dimension up to 8192. 10 generates the
//! full multiplicative group mod q; the 2n-th roots of unity are derived
//! from it at table-construction time rather than hard-coded per dimension.

/// Ciphertext modulus
pub const MODULUS_Q: u64 = 1_152_921_504_606_830_593; // 2^60 - 2^14 + 1

/// Primitive root of the multiplicative group mod q
const GENERATOR: u64 = 10;

#[inline]
pub fn add_mod(a: u64, b: u64) -> u64 {
    let s = a + b; // a, b < q < 2^60: no overflow in u64
    if s >= MODULUS_Q {
        s - MODULUS_Q
    } else {
        s
    }
}

#[inline]
pub fn sub_mod(a: u64, b: u64) -> u64 {
    if a >= b {
        a - b
    } else {
        a + MODULUS_Q - b
    }
}

#[inline]
pub fn mul_mod(a: u64, b: u64) -> u64 {
    ((a as u128 * b as u128) % MODULUS_Q as u128) as u64
}

pub fn pow_mod(mut base: u64, mut exp: u64) -> u64 {
    let mut acc = 1u64;
    base %= MODULUS_Q;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base);
        }
        base = mul_mod(base, base);
        exp >>= 1;
    }
    acc
}

#[inline]
pub fn inv_mod(a: u64) -> u64 {
    pow_mod(a, MODULUS_Q - 2)
}

/// Precomputed NTT twiddle tables for one ring dimension.
///
/// Tables hold powers of psi (a primitive 2n-th root of unity) in
/// bit-reversed order, the layout the merged-twiddle forward/inverse
/// butterflies expect.
#[derive(Debug, Clone)]
pub struct NttTable {
    n: usize,
    psi_rev: Vec<u64>,
    psi_inv_rev: Vec<u64>,
    n_inv: u64,
}

impl NttTable {
    /// Build tables for ring dimension `n` (power of two, <= 8192).
    pub fn new(n: usize) -> Self {
        assert!(n.is_power_of_two() && n >= 2 && n <= 8192, "bad ring dim {}", n);
        let log_n = n.trailing_zeros();

        let psi = pow_mod(GENERATOR, (MODULUS_Q - 1) / (2 * n as u64));
        let psi_inv = inv_mod(psi);

        let mut psi_rev = vec![0u64; n];
        let mut psi_inv_rev = vec![0u64; n];
        for (i, (fwd, inv)) in psi_rev.iter_mut().zip(psi_inv_rev.iter_mut()).enumerate() {
            let r = (i as u32).reverse_bits() >> (32 - log_n);
            *fwd = pow_mod(psi, r as u64);
            *inv = pow_mod(psi_inv, r as u64);
        }

        Self {
            n,
            psi_rev,
            psi_inv_rev,
            n_inv: inv_mod(n as u64),
        }
    }

    pub fn ring_dim(&self) -> usize {
        self.n
    }

    /// In-place forward negacyclic NTT (Cooley-Tukey, twiddles merged with
    /// the psi scaling).
    pub fn forward(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.n);
        let mut t = self.n;
        let mut m = 1;
        while m < self.n {
            t /= 2;
            for i in 0..m {
                let j1 = 2 * i * t;
                let s = self.psi_rev[m + i];
                for j in j1..j1 + t {
                    let u = a[j];
                    let v = mul_mod(a[j + t], s);
                    a[j] = add_mod(u, v);
                    a[j + t] = sub_mod(u, v);
                }
            }
            m *= 2;
        }
    }

    /// In-place inverse negacyclic NTT (Gentleman-Sande).
    pub fn inverse(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.n);
        let mut t = 1;
        let mut m = self.n;
        while m > 1 {
            let h = m / 2;
            let mut j1 = 0;
            for i in 0..h {
                let s = self.psi_inv_rev[h + i];
                for j in j1..j1 + t {
                    let u = a[j];
                    let v = a[j + t];
                    a[j] = add_mod(u, v);
                    a[j + t] = mul_mod(sub_mod(u, v), s);
                }
                j1 += 2 * t;
            }
            t *= 2;
            m = h;
        }
        for x in a.iter_mut() {
            *x = mul_mod(*x, self.n_inv);
        }
    }

    /// Negacyclic product of two ring elements.
    pub fn poly_mul(&self, a: &[u64], b: &[u64]) -> Vec<u64> {
        let mut fa = a.to_vec();
        let mut fb = b.to_vec();
        self.forward(&mut fa);
        self.forward(&mut fb);
        for (x, y) in fa.iter_mut().zip(&fb) {
            *x = mul_mod(*x, *y);
        }
        self.inverse(&mut fa);
        fa
    }
}

pub fn poly_add(a: &[u64], b: &[u64]) -> Vec<u64> {
    a.iter().zip(b).map(|(&x, &y)| add_mod(x, y)).collect()
}

pub fn poly_sub(a: &[u64], b: &[u64]) -> Vec<u64> {
    a.iter().zip(b).map(|(&x, &y)| sub_mod(x, y)).collect()
}

pub fn poly_neg(a: &[u64]) -> Vec<u64> {
    a.iter().map(|&x| if x == 0 { 0 } else { MODULUS_Q - x }).collect()
}
