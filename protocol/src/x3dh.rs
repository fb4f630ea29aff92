//! This module implements the X3DH (Extended Triple Diffie-Hellman) key agreement protocol.
//!
//! X3DH is used to establish a shared secret between two parties for end-to-end encrypted communication.
//! It combines identity keys, signed pre-keys, and one-time pre-keys to provide forward secrecy and
//! authentication. The derived secret seeds a [`crate::ratchet::Ratchet`] session rather than being
//! handed back as a bare key, so a successful handshake always produces a ready-to-use session.
//!
//! For more information, see the [Signal Protocol specification](https://signal.org/docs/specifications/x3dh/).

use crate::constants::{AES256_SECRET_LENGTH, X3DH_INFO};
use crate::errors::X3DHError;
use crate::ratchet::Ratchet;
use crate::utils::{
    AssociatedData, InitialMessage, PreKeyBundle, PrivateKey, PublicKey, SharedSecret,
    SignedPreKey,
};
use hkdf::Hkdf;
use sha2::Sha512;

/// Generates a new Curve25519 pre-key bundle along with its associated private keys.
///
/// This function does not generate one-time pre-keys.
/// For that functionality, see [`generate_prekey_bundle_with_otpk`].
///
/// # Returns
///
/// * (PreKeyBundle, PrivateKey, PrivateKey) - A tuple where:
///     * [`PreKeyBundle`].
///     * The first [`PrivateKey`] is the identity key.
///     * The second [`PrivateKey`] is the signed pre-key.
pub fn generate_prekey_bundle() -> (PreKeyBundle, PrivateKey, PrivateKey) {
    let identity_key = PrivateKey::new();
    let signed_prekey = SignedPreKey::new();
    (
        PreKeyBundle::new(&identity_key, signed_prekey.public_key),
        identity_key,
        signed_prekey.private_key,
    )
}

/// Generates a new Curve25519 pre-key bundle along with its associated private keys,
/// including one-time pre-keys.
///
/// For a version that excludes one-time pre-keys, see [`generate_prekey_bundle`].
///
/// # Arguments
///
/// * `n` - The number of one-time pre-keys to generate.
///
/// # Returns
///
/// * `(PreKeyBundle, PrivateKey, PrivateKey, Vec<PrivateKey>)` - A tuple where:
///     * [`PreKeyBundle`].
///     * The first [`PrivateKey`] - The identity key.
///     * The second [`PrivateKey`] - The signed pre-key.
///     * Vec<[`PrivateKey`]> - The list of generated one-time pre-keys.
pub fn generate_prekey_bundle_with_otpk(
    n: u32,
) -> (PreKeyBundle, PrivateKey, PrivateKey, Vec<PrivateKey>) {
    let mut otpk_private = Vec::new();
    let mut otpk_public = Vec::new();
    for _ in 0..n {
        let otpk_private_key = PrivateKey::new();
        otpk_public.push(PublicKey::from(&otpk_private_key));
        otpk_private.push(otpk_private_key);
    }

    let ik = PrivateKey::new();
    let spk = SignedPreKey::new();
    let pb = PreKeyBundle::new_with_otpk(&ik, spk.public_key, otpk_public);

    (pb, ik, spk.private_key, otpk_private)
}

/// Combines up to four Diffie-Hellman outputs into the 32-byte `SK` per the X3DH key
/// derivation: `HKDF-SHA512(salt = 32 zero bytes, ikm = 0xFF×32 || DH1 || .. || DHk,
/// info = "My super secret app")`.
fn derive_sk(
    dh1: SharedSecret,
    dh2: SharedSecret,
    dh3: SharedSecret,
    dh4: Option<SharedSecret>,
) -> Result<[u8; AES256_SECRET_LENGTH], X3DHError> {
    let mut ikm = vec![0xFFu8; 32];
    ikm.extend_from_slice(dh1.as_ref());
    ikm.extend_from_slice(dh2.as_ref());
    ikm.extend_from_slice(dh3.as_ref());
    if let Some(dh4) = dh4 {
        ikm.extend_from_slice(dh4.as_ref());
    }

    let hk = Hkdf::<Sha512>::new(Some(&[0u8; 32]), ikm.as_ref());
    let mut okm = [0u8; AES256_SECRET_LENGTH];
    hk.expand(X3DH_INFO, &mut okm)?;
    Ok(okm)
}

/// Processes a received pre-key bundle and performs the X3DH key agreement protocol.
///
/// This function is used by the initiator to establish a shared secret with a recipient
/// by processing the recipient’s pre-key bundle. It performs a series of Diffie-Hellman
/// operations to derive `SK`, initializes a [`Ratchet`] session as the initiator, and
/// returns the initial message to be sent to the responder to complete the handshake.
///
/// # Arguments
///
/// * `ik` - The initiator’s private identity key.
/// * `bundle` - The recipient’s `PreKeyBundle`, containing public identity and pre-keys.
///
/// # Returns
///
/// * `Ok((InitialMessage, Ratchet, AssociatedData))` - A tuple where:
///     * [`InitialMessage`] - to be sent to the responder.
///     * [`Ratchet`] - the initiator's newly initialized Double Ratchet session.
///     * [`AssociatedData`] - `AD`, to be used as associated data on every ratchet message.
///
/// # Errors
///
/// * [`X3DHError::InvalidSignature`] - Returned if the recipient's signed pre-key signature verification fails.
pub fn process_prekey_bundle(
    ik: PrivateKey,
    mut bundle: PreKeyBundle,
) -> Result<(InitialMessage, Ratchet, AssociatedData), X3DHError> {
    if !bundle.verify_signature() {
        return Err(X3DHError::InvalidSignature);
    }

    let ek = PrivateKey::new();
    let p_ek = PublicKey::from(&ek);

    // DH1 = DH(IKA, SPKB)
    let dh1 = ik.diffie_hellman(&bundle.spk);
    // DH2 = DH(EKA, IKB)
    let dh2 = ek.diffie_hellman(&bundle.ik);
    // DH3 = DH(EKA, SPKB)
    let dh3 = ek.diffie_hellman(&bundle.spk);

    let otpk = bundle.otpk.pop();
    // DH4 = DH(EKA, OTPK), if a one-time pre-key was available
    let dh4 = otpk.as_ref().map(|otpk| ek.diffie_hellman(otpk));

    let sk = derive_sk(dh1, dh2, dh3, dh4)?;
    let ad = AssociatedData::new(PublicKey::from(&ik), bundle.ik.clone());
    let ratchet = Ratchet::init_initiator(&sk, bundle.spk.clone())?;

    Ok((
        InitialMessage {
            identity_key: PublicKey::from(&ik),
            ephemeral_key: p_ek,
            prekey_hash: bundle.spk.hash(),
            one_time_key_hash: otpk.map(|otpk| otpk.hash()),
            associated_data: ad.clone(),
        },
        ratchet,
        ad,
    ))
}

/// Processes the initial message sent by the initiator in the X3DH key exchange protocol.
///
/// This function is executed by the responder to derive `SK` from the initiator's public
/// keys included in the initial message, and to initialize a [`Ratchet`] session as the
/// responder, using the responder's signed pre-key pair as the initial ratchet key pair.
///
/// # Arguments
///
/// * `identity_key` - The responder's identity private key.
/// * `signed_prekey` - The responder's signed pre-key pair (private and public).
/// * `one_time_prekey` - An optional one-time pre-key private key, used if referenced by the initiator.
/// * `msg` - The initial message from the initiator.
///
/// # Returns
///
/// * `Ok((Ratchet, AssociatedData))` - the responder's newly initialized Double Ratchet
///   session, and `AD` for use as associated data on every ratchet message.
///
/// # Errors
///
/// * [`X3DHError::HkdfInvalidLengthError`] - Returned if HKDF fails due to incorrect output keying material length.
/// * [`X3DHError::UnknownOneTimePrekey`] - Returned if the message references a one-time pre-key the caller did not supply.
pub fn process_initial_message(
    identity_key: PrivateKey,
    signed_prekey: (PrivateKey, PublicKey),
    one_time_prekey: Option<PrivateKey>,
    msg: InitialMessage,
) -> Result<(Ratchet, AssociatedData), X3DHError> {
    // DH1 = DH(SPKB, IKA)
    let dh1 = signed_prekey.0.diffie_hellman(&msg.identity_key);
    // DH2 = DH(IKB, EKA)
    let dh2 = identity_key.diffie_hellman(&msg.ephemeral_key);
    // DH3 = DH(SPKB, EKA)
    let dh3 = signed_prekey.0.diffie_hellman(&msg.ephemeral_key);

    let dh4 = if msg.one_time_key_hash.is_some() {
        // DH4 = DH(OTPK, EKA)
        let otpk = one_time_prekey.ok_or(X3DHError::UnknownOneTimePrekey)?;
        Some(otpk.diffie_hellman(&msg.ephemeral_key))
    } else {
        None
    };

    let sk = derive_sk(dh1, dh2, dh3, dh4)?;
    let ad = AssociatedData::new(msg.identity_key, PublicKey::from(&identity_key));
    let ratchet = Ratchet::init_responder(&sk, signed_prekey);

    Ok((ratchet, ad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CURVE25519_PUBLIC_LENGTH, SHA256_HASH_LENGTH};
    use crate::utils::SignedPreKey;

    #[test]
    fn test_generate_prekey_bundle() {
        let identity_key = PrivateKey::new();
        let prekey = SignedPreKey::new();
        let pb1 = PreKeyBundle::new(&identity_key, prekey.public_key);
        let pb1_bytes = pb1.to_bytes();
        assert_eq!(pb1_bytes.len(), pb1.size());

        let pb1_base64 = pb1.clone().to_base64();
        let pb2 = PreKeyBundle::try_from(pb1_base64).unwrap();
        assert_eq!(pb2.spk.as_ref(), pb1.spk.as_ref());
    }

    #[test]
    fn test_process_prekey_bundle() {
        let identity_key = PrivateKey::new();
        let identity_key_pub = PublicKey::from(&identity_key);
        let prekey = SignedPreKey::new();
        let pb = PreKeyBundle::new(&identity_key, prekey.public_key);
        let (initial_message, _ratchet, _ad) = process_prekey_bundle(identity_key, pb).unwrap();
        assert_eq!(
            initial_message.identity_key.as_ref(),
            identity_key_pub.as_ref()
        );

        let im_bytes = initial_message.clone().to_bytes();
        assert_eq!(
            im_bytes.len(),
            2 * CURVE25519_PUBLIC_LENGTH + SHA256_HASH_LENGTH + AssociatedData::SIZE
        );
        assert_eq!(
            initial_message.size(),
            2 * CURVE25519_PUBLIC_LENGTH + SHA256_HASH_LENGTH + AssociatedData::SIZE
        );
    }

    #[test]
    fn test_process_initial_message_establishes_matching_sessions() {
        // Bob creates a prekey bundle and sends it to Alice
        let bob_identity_key = PrivateKey::new();
        let bob_prekey = SignedPreKey::new();
        let bob_prekey_public = bob_prekey.public_key.clone();
        let pb = PreKeyBundle::new(&bob_identity_key, bob_prekey.public_key);

        // Alice processes the prekey bundle and sends an initial message to Bob
        let alice_identity_key = PrivateKey::new();
        let (initial_message, mut alice_ratchet, alice_ad) =
            process_prekey_bundle(alice_identity_key, pb).unwrap();

        // Bob processes the initial message and initializes his own ratchet session
        let (mut bob_ratchet, bob_ad) = process_initial_message(
            bob_identity_key,
            (bob_prekey.private_key, bob_prekey_public),
            None,
            initial_message,
        )
        .unwrap();

        assert_eq!(
            alice_ad.clone().to_bytes(),
            bob_ad.clone().to_bytes()
        );

        let (header, ct) = alice_ratchet
            .ratchet_encrypt(b"Hello Bob!", &alice_ad.to_bytes())
            .unwrap();
        let plaintext = bob_ratchet
            .ratchet_decrypt(&header, &ct, &bob_ad.to_bytes())
            .unwrap();
        assert_eq!(plaintext, b"Hello Bob!");
    }

    #[test]
    fn test_generate_process_key_bundle() {
        let (pb, ik, _spk) = generate_prekey_bundle();
        let pik = PublicKey::from(&ik);
        let b64 = pb.to_base64();
        let pb = PreKeyBundle::try_from(b64).unwrap();
        let (im, _ratchet, _ad) = process_prekey_bundle(ik, pb).unwrap();
        assert_eq!(im.identity_key.as_ref(), pik.as_ref());
    }

    #[test]
    fn test_process_prekey_bundle_with_otpk() {
        let (pb, ik, _spk, otpk) = generate_prekey_bundle_with_otpk(5);
        let pik = PublicKey::from(&ik);
        let b64 = pb.to_base64();
        let pb = PreKeyBundle::try_from(b64).unwrap();
        let (im, _ratchet, _ad) = process_prekey_bundle(ik, pb).unwrap();
        assert_eq!(im.identity_key.as_ref(), pik.as_ref());
        assert_eq!(
            im.one_time_key_hash.unwrap(),
            PublicKey::from(&otpk[0]).hash()
        );
    }

    #[test]
    fn test_process_initial_message_with_otpk() {
        let (pb, ik, spk, otpk) = generate_prekey_bundle_with_otpk(5);
        let spk_public = PublicKey::from(&spk);
        let b64 = pb.to_base64();
        let pb = PreKeyBundle::try_from(b64).unwrap();
        let (im, _ratchet, _ad) = process_prekey_bundle(ik, pb).unwrap();
        let im_b64 = im.to_base64();
        let im = InitialMessage::try_from(im_b64).unwrap();
        let (_bob_ratchet, _ad) = process_initial_message(
            PrivateKey::new(),
            (spk, spk_public),
            Some(otpk.into_iter().next().unwrap()),
            im,
        )
        .unwrap();
    }

    #[test]
    fn bundle_with_tampered_signature_is_rejected() {
        let identity_key = PrivateKey::new();
        let other_identity_key = PrivateKey::new();
        let prekey = SignedPreKey::new();
        let mut pb = PreKeyBundle::new(&identity_key, prekey.public_key);
        pb.ik = PublicKey::from(&other_identity_key);
        assert!(matches!(
            process_prekey_bundle(other_identity_key, pb),
            Err(X3DHError::InvalidSignature)
        ));
    }
}
