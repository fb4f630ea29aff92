//! The key-derivation and symmetric-encryption building blocks shared by the plain and
//! header-encrypted Double Ratchet: `KDF_RK`, `KDF_CK`, `KDF_RK_HE`, `ENCRYPT`/`DECRYPT`,
//! and `HENCRYPT`/`HDECRYPT`, all per spec §4.1.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use arrayref::array_ref;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;

use crate::constants::{
    AES256_IV_LENGTH, AES256_SECRET_LENGTH, KDF_ENCRYPT_INFO, KDF_HEADER_ENCRYPT_INFO,
    KDF_HE_INIT_INFO, KDF_RK_INFO,
};
use crate::errors::RatchetError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha512 = Hmac<Sha512>;

/// `KDF_RK(rk, dh_out) -> (rk', ck)`.
pub(crate) fn kdf_rk(
    rk: &[u8; AES256_SECRET_LENGTH],
    dh_out: &[u8; AES256_SECRET_LENGTH],
) -> Result<([u8; AES256_SECRET_LENGTH], [u8; AES256_SECRET_LENGTH]), RatchetError> {
    let hk = Hkdf::<Sha512>::new(Some(rk), dh_out);
    let mut okm = [0u8; 2 * AES256_SECRET_LENGTH];
    hk.expand(KDF_RK_INFO, &mut okm)?;
    let rk_next = *array_ref!(okm, 0, AES256_SECRET_LENGTH);
    let ck = *array_ref!(okm, AES256_SECRET_LENGTH, AES256_SECRET_LENGTH);
    Ok((rk_next, ck))
}

/// `KDF_RK_HE(rk, dh_out) -> (rk', ck, nhk)`.
pub(crate) fn kdf_rk_he(
    rk: &[u8; AES256_SECRET_LENGTH],
    dh_out: &[u8; AES256_SECRET_LENGTH],
) -> Result<
    (
        [u8; AES256_SECRET_LENGTH],
        [u8; AES256_SECRET_LENGTH],
        [u8; AES256_SECRET_LENGTH],
    ),
    RatchetError,
> {
    let hk = Hkdf::<Sha512>::new(Some(rk), dh_out);
    let mut okm = [0u8; 3 * AES256_SECRET_LENGTH];
    hk.expand(KDF_RK_INFO, &mut okm)?;
    let rk_next = *array_ref!(okm, 0, AES256_SECRET_LENGTH);
    let ck = *array_ref!(okm, AES256_SECRET_LENGTH, AES256_SECRET_LENGTH);
    let nhk = *array_ref!(okm, 2 * AES256_SECRET_LENGTH, AES256_SECRET_LENGTH);
    Ok((rk_next, ck, nhk))
}

/// Derives the pair of header keys the header-encrypted ratchet's two sides agree on
/// out-of-band during the handshake (`shared_hka`/`shared_nhkb` in the literature),
/// here derived directly from `SK` rather than carried as extra X3DH output: `(hka, hkb)`.
pub(crate) fn kdf_he_init(
    sk: &[u8; AES256_SECRET_LENGTH],
) -> ([u8; AES256_SECRET_LENGTH], [u8; AES256_SECRET_LENGTH]) {
    let hk = Hkdf::<Sha512>::new(Some(&[0u8; 32]), sk);
    let mut okm = [0u8; 2 * AES256_SECRET_LENGTH];
    hk.expand(KDF_HE_INIT_INFO, &mut okm)
        .expect("64-byte okm is within HKDF-SHA512's output bound");
    (
        *array_ref!(okm, 0, AES256_SECRET_LENGTH),
        *array_ref!(okm, AES256_SECRET_LENGTH, AES256_SECRET_LENGTH),
    )
}

/// `KDF_CK(ck) -> (mk, ck')`. `mk = HMAC-SHA512(ck, 0x01)[..32]`, `ck' = HMAC-SHA512(ck, 0x02)[..32]`.
pub(crate) fn kdf_ck(
    ck: &[u8; AES256_SECRET_LENGTH],
) -> ([u8; AES256_SECRET_LENGTH], [u8; AES256_SECRET_LENGTH]) {
    let mut mac = HmacSha512::new_from_slice(ck).expect("HMAC accepts any key length");
    mac.update(&[0x01]);
    let mk_digest = mac.finalize().into_bytes();

    let mut mac = HmacSha512::new_from_slice(ck).expect("HMAC accepts any key length");
    mac.update(&[0x02]);
    let ck_digest = mac.finalize().into_bytes();

    (
        *array_ref!(mk_digest, 0, AES256_SECRET_LENGTH),
        *array_ref!(ck_digest, 0, AES256_SECRET_LENGTH),
    )
}

/// `ENCRYPT(mk, plaintext, ad) -> hex(ct) || hex(tag)`.
pub(crate) fn encrypt(mk: &[u8; AES256_SECRET_LENGTH], plaintext: &[u8], ad: &[u8]) -> String {
    let (enc_key, auth_key, iv) = encryption_key_material(mk);

    let ct = Aes256CbcEnc::new(&enc_key.into(), &iv.into())
        .encrypt_padded_vec_mut::<aes::cipher::block_padding::Pkcs7>(plaintext);

    let mut mac = HmacSha512::new_from_slice(&auth_key).expect("HMAC accepts any key length");
    mac.update(ad);
    mac.update(plaintext);
    let tag = mac.finalize().into_bytes();

    format!("{}{}", hex::encode(ct), hex::encode(tag))
}

/// `DECRYPT` reverses [`encrypt`]; the trailing 128 hex chars of `payload` are the tag.
pub(crate) fn decrypt(
    mk: &[u8; AES256_SECRET_LENGTH],
    payload: &str,
    ad: &[u8],
) -> Result<Vec<u8>, RatchetError> {
    if payload.len() < 128 {
        return Err(RatchetError::ConversionError);
    }
    let split = payload.len() - 128;
    let ct_hex = &payload[..split];
    let tag_hex = &payload[split..];

    let ct = hex::decode(ct_hex).map_err(|_| RatchetError::ConversionError)?;
    let tag = hex::decode(tag_hex).map_err(|_| RatchetError::ConversionError)?;

    let (enc_key, auth_key, iv) = encryption_key_material(mk);

    let plaintext = Aes256CbcDec::new(&enc_key.into(), &iv.into())
        .decrypt_padded_vec_mut::<aes::cipher::block_padding::Pkcs7>(&ct)
        .map_err(|_| RatchetError::AuthFailure)?;

    let mut mac = HmacSha512::new_from_slice(&auth_key).expect("HMAC accepts any key length");
    mac.update(ad);
    mac.update(&plaintext);
    let expected_tag = mac.finalize().into_bytes();

    if expected_tag.ct_eq(tag.as_slice()).unwrap_u8() != 1 {
        return Err(RatchetError::AuthFailure);
    }
    Ok(plaintext)
}

fn encryption_key_material(
    mk: &[u8; AES256_SECRET_LENGTH],
) -> (
    [u8; AES256_SECRET_LENGTH],
    [u8; AES256_SECRET_LENGTH],
    [u8; AES256_IV_LENGTH],
) {
    let hk = Hkdf::<Sha512>::new(Some(&[0u8; 80]), mk);
    let mut okm = [0u8; 2 * AES256_SECRET_LENGTH + AES256_IV_LENGTH];
    hk.expand(KDF_ENCRYPT_INFO, &mut okm)
        .expect("80-byte okm is within HKDF-SHA512's output bound");
    let enc_key = *array_ref!(okm, 0, AES256_SECRET_LENGTH);
    let auth_key = *array_ref!(okm, AES256_SECRET_LENGTH, AES256_SECRET_LENGTH);
    let iv = *array_ref!(okm, 2 * AES256_SECRET_LENGTH, AES256_IV_LENGTH);
    (enc_key, auth_key, iv)
}

/// `HENCRYPT(hk, header_bytes) -> ct` (raw bytes, not hex-encoded — callers hex-encode
/// for the wire themselves, matching the plain ratchet's payload convention).
pub(crate) fn hencrypt(hk: &[u8; AES256_SECRET_LENGTH], header_bytes: &[u8]) -> Vec<u8> {
    let (enc_key, iv) = header_key_material(hk);
    Aes256CbcEnc::new(&enc_key.into(), &iv.into())
        .encrypt_padded_vec_mut::<aes::cipher::block_padding::Pkcs7>(header_bytes)
}

/// `HDECRYPT(hk, ct)`. Returns `None` ("undecryptable") rather than an error: a failed
/// trial decryption is the HE ratchet's epoch-detection signal, not a fatal condition.
pub(crate) fn hdecrypt(hk: &[u8; AES256_SECRET_LENGTH], ct: &[u8]) -> Option<Vec<u8>> {
    let (enc_key, iv) = header_key_material(hk);
    Aes256CbcDec::new(&enc_key.into(), &iv.into())
        .decrypt_padded_vec_mut::<aes::cipher::block_padding::Pkcs7>(ct)
        .ok()
}

fn header_key_material(
    hk: &[u8; AES256_SECRET_LENGTH],
) -> ([u8; AES256_SECRET_LENGTH], [u8; AES256_IV_LENGTH]) {
    let hkdf = Hkdf::<Sha512>::new(Some(&[0u8; 48]), hk);
    let mut okm = [0u8; AES256_SECRET_LENGTH + AES256_IV_LENGTH];
    hkdf.expand(KDF_HEADER_ENCRYPT_INFO, &mut okm)
        .expect("48-byte okm is within HKDF-SHA512's output bound");
    let enc_key = *array_ref!(okm, 0, AES256_SECRET_LENGTH);
    let iv = *array_ref!(okm, AES256_SECRET_LENGTH, AES256_IV_LENGTH);
    (enc_key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let mk = [7u8; AES256_SECRET_LENGTH];
        let ad = b"associated data";
        let payload = encrypt(&mk, b"hello ratchet", ad);
        let plaintext = decrypt(&mk, &payload, ad).unwrap();
        assert_eq!(plaintext, b"hello ratchet");
    }

    #[test]
    fn decrypt_rejects_tampered_ad() {
        let mk = [9u8; AES256_SECRET_LENGTH];
        let payload = encrypt(&mk, b"hello", b"ad-one");
        assert!(decrypt(&mk, &payload, b"ad-two").is_err());
    }

    #[test]
    fn hencrypt_then_hdecrypt_round_trips() {
        let hk = [3u8; AES256_SECRET_LENGTH];
        let header = b"dh||pn||n";
        let ct = hencrypt(&hk, header);
        assert_eq!(hdecrypt(&hk, &ct).unwrap(), header);
    }

    #[test]
    fn hdecrypt_with_wrong_key_is_undecryptable() {
        let hk1 = [3u8; AES256_SECRET_LENGTH];
        let hk2 = [4u8; AES256_SECRET_LENGTH];
        let ct = hencrypt(&hk1, b"some header bytes");
        assert!(hdecrypt(&hk2, &ct).is_none());
    }

    #[test]
    fn kdf_he_init_produces_distinct_keys() {
        let sk = [6u8; AES256_SECRET_LENGTH];
        let (hka, hkb) = kdf_he_init(&sk);
        assert_ne!(hka, hkb);
        let (hka2, hkb2) = kdf_he_init(&sk);
        assert_eq!(hka, hka2);
        assert_eq!(hkb, hkb2);
    }

    #[test]
    fn kdf_ck_advances_and_differs_from_input() {
        let ck = [1u8; AES256_SECRET_LENGTH];
        let (mk, ck2) = kdf_ck(&ck);
        assert_ne!(mk, ck);
        assert_ne!(ck2, ck);
        assert_ne!(mk, ck2);
    }
}
