//! This module provides a collection of utility structures and helper functions essential for the cryptographic protocols.
//! It defines fundamental data types such as `PublicKey`, `PrivateKey`, `SharedSecret`, `Signature`, and `AssociatedData`,
//! along with their serialization, deserialization, and cryptographic operations (e.g., hashing, encryption, decryption).
//! These utilities encapsulate common cryptographic operations and data representations,
//! supporting the X3DH and Double Ratchet implementations.

use crate::constants::{
    AES256_SECRET_LENGTH, CURVE25519_PUBLIC_LENGTH, CURVE25519_SECRET_LENGTH,
    CURVE_ID_X25519, SHA256_HASH_LENGTH, SIGNATURE_LENGTH,
};
use crate::errors::X3DHError;
use crate::ratchet::Ratchet;
use arrayref::array_ref;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A [`PreKeyBundle`] contains the public keys and signature published by a recipient,
/// used by an initiator to establish a shared secret using the X3DH key agreement protocol.
#[derive(Clone, Debug)]
pub struct PreKeyBundle {
    /// The recipient's identity public key.
    /// For more information, see [`PublicKey`].
    pub ik: PublicKey,

    /// The recipient's signed public pre-key.
    /// For more information, see [`PublicKey`].
    pub spk: PublicKey,

    /// An XEdDSA signature of `spk`, produced with the identity private key.
    /// For more information, see [`Signature`].
    pub sig: Signature,

    /// One or more ephemeral one-time pre-keys, X25519 public keys.
    /// If present, the initiator may use one to enhance forward secrecy.
    /// For more information, see [`PublicKey`].
    pub otpk: Vec<PublicKey>,
}

impl PreKeyBundle {

    /// The total byte size of the pre-key bundle, which includes two Curve25519 public keys
    /// and one signature.
    /// This constant is used to verify the expected size of a `PreKeyBundle`.
    pub(crate) const BASE_SIZE: usize =
        CURVE25519_PUBLIC_LENGTH + CURVE25519_PUBLIC_LENGTH + SIGNATURE_LENGTH;

    /// Generates a new pre-key bundle.
    ///
    /// This method does not generate one-time pre-keys.
    /// For that functionality, see [`PreKeyBundle::new_with_otpk`].
    ///
    /// # Arguments
    ///
    /// * `ik` - The recipient's identity key.
    /// * `spk` - The recipient's signed pre-key.
    ///
    /// # Returns
    ///
    /// * [`PreKeyBundle`] - A [`PreKeyBundle`] struct.
    pub fn new(ik: &PrivateKey, spk: PublicKey) -> Self {
        let sig = ik.sign(spk.as_ref());

        PreKeyBundle {
            ik: PublicKey::from(ik),
            spk,
            sig,
            otpk: vec![],
        }
    }

    /// Generates a new pre-key bundle,
    /// including one-time pre-keys.
    ///
    /// For a version that excludes one-time pre-keys, see [`PreKeyBundle::new`].
    ///
    /// # Arguments
    ///
    /// * `ik` - The recipient's identity key.
    /// * `spk` - The recipient's signed pre-key.
    ///
    /// # Returns
    ///
    /// * [`PreKeyBundle`] - A [`PreKeyBundle`] struct.
    pub fn new_with_otpk(ik: &PrivateKey, spk: PublicKey, otpk: Vec<PublicKey>) -> Self {
        let sig = ik.sign(spk.as_ref());
        PreKeyBundle {
            ik: PublicKey::from(ik),
            spk,
            sig,
            otpk,
        }
    }

    /// Adds a one-time pre-key
    ///
    /// # Arguments
    ///
    /// * `otpk` - The one-time pre-key to be added.
    pub fn add_otpk(&mut self, otpk: PublicKey) {
        self.otpk.push(otpk);
    }

    /// Verifies the bundle's XEdDSA signature over `spk` using `ik`. The handshake MUST
    /// abort if this returns `false`.
    pub fn verify_signature(&self) -> bool {
        self.ik.verify(&self.sig, self.spk.as_ref())
    }

    /// Calculates the size of the pre-key bundle.
    ///
    /// # Returns
    ///
    /// * `usize` - The number of elements in the pre-key bundle.
    pub fn size(&self) -> usize {
        CURVE25519_SECRET_LENGTH * 2 + SIGNATURE_LENGTH + self.otpk.len() * CURVE25519_PUBLIC_LENGTH
    }

    /// Converts each element of the pre-key bundle into bytes.
    ///
    /// # Returns
    ///
    /// * `Vec<u8>` - A vector containing the byte representation of each element in the pre-key bundle.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.ik.0.as_ref());
        out.extend_from_slice(self.spk.0.as_ref());
        out.extend_from_slice(self.sig.0.as_ref());
        if !self.otpk.is_empty() {
            for i in 0..self.otpk.len() {
                out.extend_from_slice(self.otpk[i].0.as_ref());
            }
        }
        out
    }

    /// Calculates the base64 of the pre-key bundle.
    ///
    /// # Returns
    ///
    /// * `String` - The base64-encoded string of the pre-key bundle.
    pub fn to_base64(self) -> String {
        general_purpose::STANDARD.encode(self.to_bytes())
    }
}

impl TryFrom<String> for PreKeyBundle {
    type Error = X3DHError;

    /// Converts a base64-encoded string into a [`PreKeyBundle`].
    ///
    /// # Returns
    ///
    /// * [`PreKeyBundle`] - The decoded pre-key bundle.
    ///
    /// # Errors
    ///
    /// * [`X3DHError::Base64DecodeError`] - Returned if `value` is not a valid Base64 string.
    /// * [`X3DHError::InvalidPreKeyBundle`] - Returned if the decoded byte vector does not match the expected size of [`PreKeyBundle::BASE_SIZE`].
    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bytes = general_purpose::STANDARD.decode(value)?;
        if bytes.len() < Self::BASE_SIZE {
            return Err(X3DHError::InvalidPreKeyBundle);
        }

        let identity_key = PublicKey(*array_ref![bytes, 0, CURVE25519_PUBLIC_LENGTH]);
        let signed_prekey = PublicKey(*array_ref![
            bytes,
            CURVE25519_PUBLIC_LENGTH,
            CURVE25519_PUBLIC_LENGTH
        ]);
        let prekey_signature = Signature(*array_ref![
            bytes,
            2 * CURVE25519_PUBLIC_LENGTH,
            SIGNATURE_LENGTH
        ]);
        if bytes.len() > Self::BASE_SIZE {
            let mut one_time_keys = Vec::new();
            for i in 0..(bytes.len() - Self::BASE_SIZE) / CURVE25519_PUBLIC_LENGTH {
                let start = Self::BASE_SIZE + i * CURVE25519_PUBLIC_LENGTH;
                let one_time_prekey =
                    PublicKey(*array_ref![bytes, start, CURVE25519_PUBLIC_LENGTH]);
                one_time_keys.push(one_time_prekey);
            }
            Ok(Self {
                ik: identity_key,
                spk: signed_prekey,
                sig: prekey_signature,
                otpk: one_time_keys,
            })
        } else {
            Ok(Self {
                ik: identity_key,
                spk: signed_prekey,
                sig: prekey_signature,
                otpk: vec![],
            })
        }
    }
}

/// A [`SessionKeys`] bundles a party's end of a [`Ratchet`] session together with the
/// [`AssociatedData`] fixed at handshake time, the pair needed to call `ratchet_encrypt`/
/// `ratchet_decrypt`. Used both for the client-server outer transport and for
/// peer-to-peer messaging sessions between two registered users.
#[derive(Clone)]
pub struct SessionKeys {
    /// The Double Ratchet session established via X3DH.
    ratchet: Option<Ratchet>,

    /// Associated data binding both parties' identity keys, fixed for the session's lifetime.
    aad: Option<AssociatedData>,
}

impl SessionKeys {

    /// Creates a new empty [`SessionKeys`] object
    ///
    /// This method does not init the session object.
    /// For that functionality, see [`SessionKeys::new_with_ratchet`].
    ///
    /// # Returns
    ///
    /// * [`SessionKeys`] - An empty session object
    pub fn new() -> Self {
        Self {
            ratchet: None,
            aad: None,
        }
    }

    /// Creates a [`SessionKeys`] object
    ///
    /// For a version that does not init the session object, see [`SessionKeys::new`].
    ///
    /// # Arguments
    ///
    /// * `ratchet` - The Double Ratchet session established via X3DH.
    /// * `aad` - Optional associated data containing identity information for both parties.
    ///
    /// # Returns
    ///
    /// * [`SessionKeys`] - A session object containing the provided ratchet and associated data.
    pub fn new_with_ratchet(ratchet: Ratchet, aad: Option<AssociatedData>) -> Self {
        Self {
            ratchet: Some(ratchet),
            aad,
        }
    }

    /// Returns the [`Ratchet`] for the current session, if available.
    pub fn get_ratchet(&self) -> Option<Ratchet> {
        self.ratchet.clone()
    }

    /// Returns a mutable reference to the [`Ratchet`] for the current session, if available.
    pub fn get_ratchet_mut(&mut self) -> Option<&mut Ratchet> {
        self.ratchet.as_mut()
    }

    /// Returns the [`AssociatedData`] for the current session, if available.
    ///
    /// # Returns
    ///
    /// * `Option<AssociatedData>`
    ///   * `Some(AssociatedData)` - If the associated data has been set.
    ///   * `None` - If no associated data is present.
    pub fn get_associated_data(&self) -> Option<AssociatedData> {
        self.aad.clone()
    }

    /// Sets the [`Ratchet`] for the current session.
    pub fn set_ratchet(&mut self, ratchet: Ratchet) {
        self.ratchet = Some(ratchet);
    }

    /// Sets the [`AssociatedData`] for the current session.
    ///
    /// # Arguments
    ///
    /// * `aad` - The associated data to assign to the session.
    pub fn set_associated_data(&mut self, aad: AssociatedData) {
        self.aad = Some(aad);
    }

}

/// A 256-bit secret shared between two parties after performing a key agreement (in this case, Diffie-Hellman).
#[derive(Clone, Zeroize, ZeroizeOnDrop, Debug)]
pub struct SharedSecret([u8; AES256_SECRET_LENGTH]);

impl AsRef<[u8; AES256_SECRET_LENGTH]> for SharedSecret {

    /// Returns a shared reference to the current [`SharedSecret`].
    ///
    /// # Returns
    ///
    /// * [`&SharedSecret`] - The shared reference.
    fn as_ref(&self) -> &[u8; AES256_SECRET_LENGTH] {
        &self.0
    }
}

impl From<[u8; AES256_SECRET_LENGTH]> for SharedSecret {

    /// Derives a [`SharedSecret`] from a `[u8; `[AES256_SECRET_LENGTH]`]`.
    ///
    /// # Arguments
    ///
    /// * `value` - The vector.
    ///
    /// # Returns
    ///
    /// * [`SharedSecret`] - The derived shared secret.
    fn from(value: [u8; AES256_SECRET_LENGTH]) -> SharedSecret {
        SharedSecret(value)
    }
}

/// A key pair used as a signed pre-key in the X3DH protocol.
#[derive(Clone)]
pub(crate) struct SignedPreKey {

    /// The private component of the signed pre-key, used for key agreement.
    pub(crate) private_key: PrivateKey,

    /// The public component of the signed pre-key, shared with other parties.
    pub(crate) public_key: PublicKey,
}

impl SignedPreKey {

    /// Generates a new [`SignedPreKey`] key pair.
    /// This function creates a new Curve25519 private key and derives the corresponding public key,
    /// forming a complete signed pre-key pair used in the X3DH protocol.
    ///
    /// # Returns
    ///
    /// * [`SignedPreKey`] - A newly generated key pair containing both private and public keys.
    pub(crate) fn new() -> SignedPreKey {
        let private_key = PrivateKey::new();
        let public_key = PublicKey::from(&private_key);
        SignedPreKey {
            private_key,
            public_key,
        }
    }
}

/// A Curve25519 private key used in the X3DH key exchange for computing shared secrets,
/// and (via XEdDSA) for signing.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; CURVE25519_SECRET_LENGTH]);

impl PrivateKey {

    /// Generates a new Curve25519 private key.
    /// This function uses a cryptographically secure random number generator to produce
    /// a new X25519 `StaticSecret`, returning it as a [`PrivateKey`] for use in key exchanges.
    ///
    /// # Returns
    ///
    /// * [`PrivateKey`] - A randomly generated Curve25519 private key.
    pub fn new() -> PrivateKey {
        let key = StaticSecret::random_from_rng(&mut OsRng);
        PrivateKey(key.to_bytes())
    }

    /// Performs a Diffie-Hellman key exchange with a given public key.
    /// This function computes the shared secret between this private key and a peer’s [`PublicKey`],
    /// returning the resulting [`SharedSecret`] as a byte array.
    ///
    /// # Arguments
    ///
    /// * `public_key` - The public key of the other party involved in the key exchange.
    ///
    /// # Returns
    ///
    /// * [`SharedSecret`] - The derived shared secret.
    pub(crate) fn diffie_hellman(&self, public_key: &PublicKey) -> SharedSecret {
        let dalek_private_key = StaticSecret::from(self.0);
        let dalek_public_key = x25519_dalek::PublicKey::from(public_key.0);
        let shared_secret = dalek_private_key.diffie_hellman(&dalek_public_key);
        SharedSecret(shared_secret.to_bytes())
    }

    /// Signs `message` with the XEdDSA scheme, deriving a matching Ed25519 scalar from
    /// this X25519 private key. See `crate::xeddsa`.
    ///
    /// # Arguments
    ///
    /// * `message` - The bytes to sign, e.g. a peer's signed pre-key.
    ///
    /// # Returns
    ///
    /// * [`Signature`] - The resulting 64-byte XEdDSA signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let mut nonce_seed = [0u8; 64];
        OsRng.fill_bytes(&mut nonce_seed);
        Signature(crate::xeddsa::sign(&self.0, message, &nonce_seed))
    }

    /// Converts the current [`PrivateKey`] into bytes.
    ///
    /// # Returns
    ///
    /// * `Vec<u8>` - A vector of bytes derived from the current [`PrivateKey`].
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Converts the current [`PrivateKey`] into a base64-encoded string.
    ///
    /// # Returns
    ///
    /// * `String` - The base64-encoded string of the current [`PrivateKey`].
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.to_bytes())
    }

    /// Converts a base64-encoded string into a [`PrivateKey`].
    ///
    /// # Arguments
    ///
    /// * `value` - The base64-encoded string to be converted.
    ///
    /// # Returns
    ///
    /// * [`PrivateKey`] - The decoded private key.
    ///
    /// # Errors
    ///
    /// * [`X3DHError::Base64DecodeError`] - Returned if `value` is not a valid Base64 string.
    /// * [`X3DHError::InvalidPrivateKey`] - Returned if the decoded byte vector does not match the expected size of [`CURVE25519_SECRET_LENGTH`].
    pub fn from_base64(value: String) -> Result<PrivateKey, X3DHError> {
        let bytes = general_purpose::STANDARD.decode(value)?;
        if bytes.len() != CURVE25519_SECRET_LENGTH {
            return Err(X3DHError::InvalidPrivateKey);
        }
        let mut arr = [0u8; CURVE25519_SECRET_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(PrivateKey(arr))
    }
}

impl AsRef<[u8; CURVE25519_SECRET_LENGTH]> for PrivateKey {

    /// Returns a shared reference to the current [`PrivateKey`].
    ///
    /// # Returns
    ///
    /// * `&[u8; CURVE25519_SECRET_LENGTH]` - The shared reference.
    fn as_ref(&self) -> &[u8; CURVE25519_SECRET_LENGTH] {
        &self.0
    }
}

/// A Curve25519 public key used in the X3DH protocol to represent identity, ephemeral, and pre-keys.
/// This type can be derived from private keys and is hashable and comparable.
#[derive(Clone, Debug, Eq, Hash)]
pub struct PublicKey(pub [u8; CURVE25519_PUBLIC_LENGTH]);

impl From<PrivateKey> for PublicKey {

    /// Derives a [`PublicKey`] from a [`PrivateKey`].
    ///
    /// # Arguments
    ///
    /// * `private_key` - The private key to be converted.
    ///
    /// # Returns
    ///
    /// * [`PublicKey`] - The derived public key.
    fn from(private_key: PrivateKey) -> PublicKey {
        let dalek_private_key = x25519_dalek::StaticSecret::from(private_key.0);
        let dalek_public_key = x25519_dalek::PublicKey::from(&dalek_private_key);
        PublicKey(dalek_public_key.to_bytes())
    }
}

impl From<&PrivateKey> for PublicKey {

    /// Derives a [`PublicKey`] from a shared reference to a [`PrivateKey`].
    ///
    /// # Arguments
    ///
    /// * `private_key` - The shared reference to the private key to be converted.
    ///
    /// # Returns
    ///
    /// * [`PublicKey`] - The derived public key.
    fn from(private_key: &PrivateKey) -> PublicKey {
        let dalek_private_key = x25519_dalek::StaticSecret::from(private_key.0);
        let dalek_public_key = x25519_dalek::PublicKey::from(&dalek_private_key);
        PublicKey(dalek_public_key.to_bytes())
    }
}

impl From<&[u8; CURVE25519_PUBLIC_LENGTH]> for PublicKey {

    /// Derives a [`PublicKey`] from a shared reference to a `[u8; `[CURVE25519_PUBLIC_LENGTH]`]`.
    ///
    /// # Arguments
    ///
    /// * `value` - The shared reference.
    ///
    /// # Returns
    ///
    /// * [`PublicKey`] - The derived public key.
    fn from(value: &[u8; CURVE25519_PUBLIC_LENGTH]) -> PublicKey {
        PublicKey(*value)
    }

}

impl AsRef<[u8; CURVE25519_PUBLIC_LENGTH]> for PublicKey {

    /// Returns a shared reference to the current [`PublicKey`].
    ///
    /// # Returns
    ///
    /// * `&[u8; CURVE25519_PUBLIC_LENGTH]` - The shared reference.
    fn as_ref(&self) -> &[u8; CURVE25519_PUBLIC_LENGTH] {
        &self.0
    }
}

impl PartialEq for PublicKey {

    /// Compares two [`PublicKey`] instances for equality.
    ///
    /// # Arguments
    ///
    /// * `other` - The other [`PublicKey`] to compare against.
    ///
    /// # Returns
    ///
    /// * `bool` - `true` if the underlying byte representations of both keys are equal, otherwise `false`.
    fn eq(&self, other: &Self) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl PublicKey {

    /// Returns the SHA-256 hash of the current [`PublicKey`].
    ///
    /// # Returns
    ///
    /// * [`Sha256Hash`] - The SHA-256 digest of the public key.
    pub fn hash(&self) -> Sha256Hash {
        let digest = Sha256::digest(self.0.as_ref());
        Sha256Hash(*array_ref![digest, 0, SHA256_HASH_LENGTH])
    }

    /// Verifies an XEdDSA `signature` over `message`, treating this public key's bytes as
    /// the X25519 Montgomery u-coordinate. See `crate::xeddsa`.
    ///
    /// # Returns
    ///
    /// * `bool` - `true` if the signature is valid.
    pub fn verify(&self, signature: &Signature, message: &[u8]) -> bool {
        crate::xeddsa::verify(&self.0, message, signature.as_ref())
    }

    /// Converts the current [`PublicKey`] into a base64-encoded string.
    ///
    /// # Returns
    ///
    /// * `String` - The base64-encoded string of the current [`PublicKey`].
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.0.to_vec())
    }

    /// Converts a base64-encoded string into a [`PublicKey`].
    ///
    /// # Arguments
    ///
    /// * `value` - The base64-encoded string to be converted.
    ///
    /// # Returns
    ///
    /// * `PublicKey` - The decoded public key.
    ///
    /// # Errors
    ///
    /// * [`X3DHError::Base64DecodeError`] - Returned if `value` is not a valid Base64 string.
    /// * [`X3DHError::InvalidPublicKey`] - Returned if the decoded byte vector does not match the expected size of [`CURVE25519_PUBLIC_LENGTH`].
    pub fn from_base64(value: String) -> Result<PublicKey, X3DHError> {
        let bytes = general_purpose::STANDARD.decode(value)?;
        if bytes.len() != CURVE25519_PUBLIC_LENGTH {
            return Err(X3DHError::InvalidPublicKey);
        }
        let mut arr = [0u8; CURVE25519_PUBLIC_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(PublicKey(arr))
    }
}

/// A digital signature used to authenticate public keys within the X3DH protocol.
#[derive(Clone, Debug)]
pub struct Signature(pub [u8; SIGNATURE_LENGTH]);

impl AsRef<[u8; SIGNATURE_LENGTH]> for Signature {

    /// Returns a shared reference to the current [`Signature`].
    ///
    /// # Returns
    ///
    /// * `&[u8; SIGNATURE_LENGTH]` - The shared reference.
    fn as_ref(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }
}

impl From<[u8; SIGNATURE_LENGTH]> for Signature {

    /// Derives a [`Signature`] from a `[u8; `[SIGNATURE_LENGTH]`]`.
    ///
    /// # Arguments
    ///
    /// * `value` - A byte array representing the raw signature data.
    ///
    /// # Returns
    ///
    /// * [`Signature`] - The derived signature.
    fn from(value: [u8; SIGNATURE_LENGTH]) -> Signature {
        Signature(value)
    }
}

/// Additional data exchanged during the X3DH handshake, containing both parties' identity keys.
/// Each key is encoded as `curve_id || public_key`, per the X3DH associated-data format.
#[derive(Clone, Debug)]
pub struct AssociatedData {
    /// The identity public key of the initiator.
    pub(crate) initiator_identity_key: PublicKey,

    /// The identity public key of the responder.
    pub(crate) responder_identity_key: PublicKey,
}


impl AssociatedData {

    /// Total size in bytes of the associated data: two curve-id-prefixed public keys.
    pub const SIZE: usize = 1 + CURVE25519_PUBLIC_LENGTH + 1 + CURVE25519_PUBLIC_LENGTH;

    /// Converts the current [`AssociatedData`] into bytes.
    ///
    /// # Returns
    ///
    /// * `Vec<u8>` - A vector of bytes derived from the current [`AssociatedData`].
    pub fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(CURVE_ID_X25519);
        out.extend_from_slice(self.initiator_identity_key.0.as_ref());
        out.push(CURVE_ID_X25519);
        out.extend_from_slice(self.responder_identity_key.0.as_ref());
        out
    }

    /// Creates a new [`AssociatedData`] instance from two public keys.
    ///
    /// # Arguments
    ///
    /// * `ik` - The identity public key of the initiator.
    /// * `spk` - The identity public key of the responder.
    ///
    /// # Returns
    ///
    /// * [`AssociatedData`] - A new instance containing both public keys.
    pub fn new(ik: PublicKey, spk: PublicKey) -> Self {
        Self {
            initiator_identity_key: ik,
            responder_identity_key: spk,
        }
    }
}

impl TryFrom<&[u8; Self::SIZE]> for AssociatedData {
    type Error = X3DHError;

    /// Attempts to create an [`AssociatedData`] instance from a byte slice of length [`Self::SIZE`].
    ///
    /// # Arguments
    ///
    /// * `value` - A reference to a byte array of length [`Self::SIZE`] representing two
    ///   curve-id-prefixed, concatenated public keys.
    ///
    /// # Returns
    ///
    /// * `Ok(AssociatedData)` - If the conversion is successful.
    fn try_from(value: &[u8; Self::SIZE]) -> Result<Self, Self::Error> {
        let initiator_identity_key =
            PublicKey(*array_ref![value, 1, CURVE25519_PUBLIC_LENGTH]);
        let responder_identity_key = PublicKey(*array_ref![
            value,
            2 + CURVE25519_PUBLIC_LENGTH,
            CURVE25519_PUBLIC_LENGTH
        ]);
        Ok(AssociatedData {
            initiator_identity_key,
            responder_identity_key,
        })
    }
}

/// A SHA-256 hash used for identifying and verifying keys or values in the X3DH protocol.
#[derive(Clone, Eq, Debug)]
pub struct Sha256Hash(pub [u8; SHA256_HASH_LENGTH]);

impl From<&[u8; SHA256_HASH_LENGTH]> for Sha256Hash {

    /// Derives a [`Sha256Hash`] from a shared reference to a `[u8; `[SHA256_HASH_LENGTH]`]`.
    ///
    /// # Arguments
    ///
    /// * `value` - The shared reference.
    ///
    /// # Returns
    ///
    /// * [`Sha256Hash`] - The derived sha-256 hash.
    fn from(value: &[u8; SHA256_HASH_LENGTH]) -> Sha256Hash {
        Sha256Hash(*value)
    }
}

impl Hash for Sha256Hash {

    /// Feeds the internal byte array into the given hasher.
    /// This allows [`Sha256Hash`] to be used in hash maps or sets.
    ///
    /// # Arguments
    ///
    /// * `state` - The hasher state to update.
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialEq for Sha256Hash {

    /// Compares two [`Sha256Hash`] values for equality based on their byte content.
    ///
    /// # Arguments
    ///
    /// * `other` - The other [`Sha256Hash`] to compare with.
    ///
    /// # Returns
    ///
    /// * `true` if the internal byte arrays are equal, otherwise `false`.
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// A message sent by the initiator in the X3DH key exchange protocol.
#[derive(Clone)]
pub struct InitialMessage {
    /// The initiator’s identity public key.
    pub identity_key: PublicKey,

    /// The initiator’s ephemeral public key.
    pub ephemeral_key: PublicKey,

    /// The SHA-256 hash of the responder’s signed pre-key.
    pub prekey_hash: Sha256Hash,

    /// Optional SHA-256 hash of the responder’s one-time pre-key.
    pub one_time_key_hash: Option<Sha256Hash>,

    /// Associated identity key data for both parties.
    pub associated_data: AssociatedData,
}

impl InitialMessage {

    /// The base byte size without an optional one-time prekey hash.
    pub(crate) const BASE_SIZE: usize = CURVE25519_PUBLIC_LENGTH
        + CURVE25519_PUBLIC_LENGTH
        + SHA256_HASH_LENGTH
        + AssociatedData::SIZE;

    /// The total byte size of the message when the one-time prekey hash is included.
    pub(crate) const SIZE_WITH_OTPK: usize = Self::BASE_SIZE + SHA256_HASH_LENGTH;

    /// Returns a clone of the [`AssociatedData`] from the current message.
    ///
    /// # Returns
    ///
    /// * [`AssociatedData`] - The associated data contained in the message.
    pub fn get_associated_data(&self) -> AssociatedData {
        self.associated_data.clone()
    }

    /// Converts the current [`InitialMessage`] into bytes.
    ///
    /// # Returns
    ///
    /// * `Vec<u8>` - A vector of bytes derived from the current [`InitialMessage`].
    pub fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.identity_key.0.as_ref());
        out.extend_from_slice(self.ephemeral_key.0.as_ref());
        out.extend_from_slice(self.prekey_hash.0.as_ref());

        if let Some(one_time_key_hash) = self.one_time_key_hash {
            out.extend_from_slice(one_time_key_hash.0.as_ref());
        }
        out.extend_from_slice(self.associated_data.to_bytes().as_ref());
        out
    }

    /// Converts the current [`InitialMessage`] into a base64-encoded string.
    ///
    /// # Returns
    ///
    /// * `String` - The base64-encoded string of the current [`InitialMessage`].
    pub fn to_base64(self) -> String {
        general_purpose::STANDARD.encode(self.to_bytes())
    }

    /// Calculates the size of the current [`InitialMessage`].
    ///
    /// # Returns
    ///
    /// * `usize` - The size of the current [`InitialMessage`]:
    ///     * [`Self::BASE_SIZE`] - If there is no one-time prekey hash.
    ///     * [`Self::SIZE_WITH_OTPK`] - If there is a one-time prekey hash.
    pub fn size(&self) -> usize {
        if self.one_time_key_hash.is_some() {
            Self::SIZE_WITH_OTPK
        } else {
            Self::BASE_SIZE
        }
    }
}

impl TryFrom<String> for InitialMessage {
    type Error = X3DHError;

    /// Derives a [`InitialMessage`] from base64-encoded string.
    ///
    /// # Arguments
    ///
    /// * `value` - A base64-encoded string.
    ///
    /// # Returns
    ///
    /// * [`InitialMessage`] - The derived initial message.
    ///
    /// # Errors
    ///
    /// * [`X3DHError::Base64DecodeError`] - Returned if `value` is not a valid Base64 string.
    /// * [`X3DHError::InvalidInitialMessage`] - Returned if the decoded byte vector does not match the expected size of [`Self::BASE_SIZE`] or [`Self::SIZE_WITH_OTPK`].
    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bytes = general_purpose::STANDARD.decode(value)?;
        if bytes.len() != Self::BASE_SIZE && bytes.len() != Self::SIZE_WITH_OTPK {
            return Err(X3DHError::InvalidInitialMessage);
        }

        let identity_key = PublicKey(*array_ref![bytes, 0, CURVE25519_PUBLIC_LENGTH]);
        let ephemeral_key = PublicKey(*array_ref![
            bytes,
            CURVE25519_PUBLIC_LENGTH,
            CURVE25519_PUBLIC_LENGTH
        ]);
        let prekey_hash = Sha256Hash(*array_ref![
            bytes,
            2 * CURVE25519_PUBLIC_LENGTH,
            SHA256_HASH_LENGTH
        ]);

        if bytes.len() == Self::SIZE_WITH_OTPK {
            let one_time_key_hash = Sha256Hash(*array_ref![
                bytes,
                2 * CURVE25519_PUBLIC_LENGTH + SHA256_HASH_LENGTH,
                SHA256_HASH_LENGTH
            ]);
            let associated_data = AssociatedData::try_from(array_ref![
                bytes,
                2 * CURVE25519_PUBLIC_LENGTH + 2 * SHA256_HASH_LENGTH,
                AssociatedData::SIZE
            ])?;

            Ok(Self {
                identity_key,
                ephemeral_key,
                prekey_hash,
                one_time_key_hash: Some(one_time_key_hash),
                associated_data,
            })
        } else {
            let associated_data = AssociatedData::try_from(array_ref![
                bytes,
                2 * CURVE25519_PUBLIC_LENGTH + SHA256_HASH_LENGTH,
                AssociatedData::SIZE
            ])?;
            Ok(Self {
                identity_key,
                ephemeral_key,
                prekey_hash,
                one_time_key_hash: None,
                associated_data,
            })
        }
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_prekey_bundle() {
        let ik1 = PrivateKey::new();
        let spk = SignedPreKey::new();

        let pb1 = PreKeyBundle::new(&ik1, spk.public_key);

        let b64 = pb1.clone().to_base64();
        let pb2 = PreKeyBundle::try_from(b64).unwrap();
        assert_eq!(pb1.ik.0, pb2.ik.0);
        assert_eq!(pb1.spk.0, pb2.spk.0);
        assert_eq!(pb1.sig.0, pb2.sig.0);
        assert!(pb2.verify_signature());
    }

    #[test]
    fn test_hash_public_key() {
        let key1 = PublicKey::from(PrivateKey::new());
        let key2 = PublicKey::from(PrivateKey::new());
        assert_ne!(key1.hash().0, key2.hash().0);
    }

    #[test]
    fn test_sign_verify() {
        let ik = PrivateKey::new();
        let p_ik = PublicKey::from(&ik);
        let data = String::from("Hello World!!!");

        let sig = ik.sign(data.as_bytes());
        assert!(p_ik.verify(&sig, data.as_bytes()));
    }

    #[test]
    fn test_associated_data_round_trip() {
        let ik_a = PublicKey::from(PrivateKey::new());
        let ik_b = PublicKey::from(PrivateKey::new());
        let ad = AssociatedData::new(ik_a.clone(), ik_b.clone());
        let bytes = ad.to_bytes();
        let arr: [u8; AssociatedData::SIZE] = bytes.try_into().unwrap();
        let ad2 = AssociatedData::try_from(&arr).unwrap();
        assert_eq!(ad2.initiator_identity_key, ik_a);
        assert_eq!(ad2.responder_identity_key, ik_b);
    }
}
