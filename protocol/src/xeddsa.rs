//! XEdDSA: signing and verifying with an X25519 (Montgomery) key pair by deriving a
//! matching Ed25519 scalar on demand. See the module-level design notes in
//! `crate::x3dh` for how this is used to authenticate a signed prekey.

use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use sha2::{Digest, Sha512};

use crate::constants::{CURVE25519_PUBLIC_LENGTH, CURVE25519_SECRET_LENGTH, SIGNATURE_LENGTH};

/// `p = 2^255 - 19`, little-endian.
const FIELD_PRIME: [u8; 32] = [
    0xed, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0x7f,
];

/// `2^253`, little-endian, used for the `s >= 2^253` rejection check.
const TWO_POW_253: [u8; 32] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0x20,
];

/// Treats `a` and `b` as little-endian unsigned integers and reports whether `a >= b`.
fn bytes_ge(a: &[u8; 32], b: &[u8; 32]) -> bool {
    for i in (0..32).rev() {
        if a[i] != b[i] {
            return a[i] > b[i];
        }
    }
    true
}

/// `H_i(X) = SHA-512(prefix_i || X) mod q`, where `prefix_i` is 32 bytes of `0xFF` with
/// byte 0 replaced by `0xFF - i`.
fn hash_to_scalar(i: u8, parts: &[&[u8]]) -> Scalar {
    let mut prefix = [0xFFu8; 32];
    prefix[0] = 0xFF - i;
    let mut hasher = Sha512::new();
    hasher.update(prefix);
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    Scalar::from_bytes_mod_order_wide(&<[u8; 64]>::try_from(digest.as_slice()).unwrap())
}

/// Derives the Ed25519 signing key `(A, a)` matching an X25519 private scalar `k`, per
/// spec step 4.2: `E = k*B`, `A = compress(E)` with its sign bit forced to 0, and the
/// effective scalar `a = -k mod q` when `E`'s x-coordinate is odd, else `a = k mod q`.
fn derive(k: &[u8; CURVE25519_SECRET_LENGTH]) -> ([u8; CURVE25519_PUBLIC_LENGTH], Scalar) {
    let k_scalar = Scalar::from_bits(*k);
    let e_point = &k_scalar * &ED25519_BASEPOINT_TABLE;
    let compressed = e_point.compress();
    let mut a_bytes = compressed.to_bytes();
    let sign_bit = a_bytes[31] >> 7;
    a_bytes[31] &= 0x7f;
    let a = if sign_bit == 1 { -k_scalar } else { k_scalar };
    (a_bytes, a)
}

/// Signs `message` using the X25519 private scalar `sk`. `nonce_seed` is 64 bytes of
/// caller-supplied randomness (`Z` in spec notation) mixed into the nonce derivation.
pub fn sign(
    sk: &[u8; CURVE25519_SECRET_LENGTH],
    message: &[u8],
    nonce_seed: &[u8; 64],
) -> [u8; SIGNATURE_LENGTH] {
    let (a_bytes, a) = derive(sk);
    let r = hash_to_scalar(1, &[a.as_bytes(), message, nonce_seed]);
    let r_point = (&r * &ED25519_BASEPOINT_TABLE).compress();
    let h = hash_to_scalar(0, &[r_point.as_bytes(), &a_bytes, message]);
    let s = r + h * a;

    let mut sig = [0u8; SIGNATURE_LENGTH];
    sig[..32].copy_from_slice(r_point.as_bytes());
    sig[32..].copy_from_slice(s.as_bytes());
    sig
}

/// Verifies a signature produced by [`sign`] against the X25519 public key `pk` (a
/// Montgomery u-coordinate). Rejects per spec §4.2's explicit conditions before doing
/// any curve arithmetic.
pub fn verify(pk: &[u8; CURVE25519_PUBLIC_LENGTH], message: &[u8], sig: &[u8]) -> bool {
    if sig.len() != SIGNATURE_LENGTH {
        return false;
    }
    let mut r_bytes = [0u8; 32];
    r_bytes.copy_from_slice(&sig[..32]);
    let mut s_bytes = [0u8; 32];
    s_bytes.copy_from_slice(&sig[32..]);

    if bytes_ge(&s_bytes, &TWO_POW_253) {
        return false;
    }
    // top bit set <=> the raw little-endian value is >= 2^255.
    if r_bytes[31] & 0x80 != 0 {
        return false;
    }
    if bytes_ge(pk, &FIELD_PRIME) {
        return false;
    }

    let r_point = match CompressedEdwardsY(r_bytes).decompress() {
        Some(p) => p,
        None => return false,
    };
    let a_point = match MontgomeryPoint(*pk).to_edwards(0) {
        Some(p) => p,
        None => return false,
    };
    let s = match Option::from(Scalar::from_canonical_bytes(s_bytes)) {
        Some(s) => s,
        None => return false,
    };
    let a_bytes = a_point.compress().to_bytes();
    let h = hash_to_scalar(0, &[&r_bytes, &a_bytes, message]);

    let check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&(-h), &a_point, &s);
    check.compress().to_bytes() == r_bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::PrivateKey;

    #[test]
    fn sign_then_verify_succeeds() {
        let sk = PrivateKey::new();
        let pk_bytes = *crate::utils::PublicKey::from(&sk).as_ref();
        let sk_bytes = *sk.as_ref();
        let message = b"signed prekey bytes";
        let z = [0x42u8; 64];

        let sig = sign(&sk_bytes, message, &z);
        assert!(verify(&pk_bytes, message, &sig));
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let sk = PrivateKey::new();
        let pk_bytes = *crate::utils::PublicKey::from(&sk).as_ref();
        let sk_bytes = *sk.as_ref();
        let z = [0x11u8; 64];

        let sig = sign(&sk_bytes, b"original", &z);
        assert!(!verify(&pk_bytes, b"tampered", &sig));
    }

    #[test]
    fn verify_rejects_wrong_length_signature() {
        let sk = PrivateKey::new();
        let pk_bytes = *crate::utils::PublicKey::from(&sk).as_ref();
        assert!(!verify(&pk_bytes, b"msg", &[0u8; 10]));
    }

    #[test]
    fn different_nonce_seeds_produce_different_signatures() {
        let sk = PrivateKey::new();
        let sk_bytes = *sk.as_ref();
        let message = b"same message";

        let sig1 = sign(&sk_bytes, message, &[1u8; 64]);
        let sig2 = sign(&sk_bytes, message, &[2u8; 64]);
        assert_ne!(sig1, sig2);
    }
}
