//! This module defines the custom error types used throughout the cryptographic protocol implementation.
//! It provides two main error enums: `X3DHError` for errors specific to the X3DH key agreement protocol,
//! and `RatchetError` for errors encountered during the Double Ratchet message encryption protocol.
//! These enums ensure precise error reporting and handling for various cryptographic operations.

use std::fmt::{Display, Formatter};

/// Represents errors that can occur during the X3DH key agreement protocol.
#[derive(Debug)]
pub enum X3DHError {

    /// The signed prekey's signature failed XEdDSA verification. Handshake MUST abort.
    InvalidSignature,

    /// Error indicating an invalid key material length during HKDF key derivation.
    HkdfInvalidLengthError(hkdf::InvalidLength),

    /// Error occurring during Base64 decoding of encoded data.
    Base64DecodeError(base64::DecodeError),

    /// Error indicating that a [`crate::utils::PreKeyBundle`] is invalid or corrupted.
    InvalidPreKeyBundle,

    /// Error indicating that an [`crate::utils::InitialMessage`] is invalid or corrupted.
    InvalidInitialMessage,

    /// Error indicating an invalid or corrupted [`crate::utils::PrivateKey`].
    InvalidPrivateKey,

    /// Error indicating an invalid or corrupted [`crate::utils::PublicKey`].
    InvalidPublicKey,

    /// Error indicating a general key validation failure (wrong length, programmer error).
    InvalidKey,

    /// The referenced one-time prekey id is unknown to the responder. Handshake MUST abort.
    UnknownOneTimePrekey,

    /// Initializing the Double Ratchet session from the derived `SK` failed.
    RatchetInitFailed(RatchetError),
}

impl Display for X3DHError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self {
            X3DHError::InvalidSignature => write!(f, "invalid signed-prekey signature"),
            X3DHError::HkdfInvalidLengthError(e) => write!(f, "invalid length: {}", e),
            X3DHError::Base64DecodeError(e) => write!(f, "base64 decode error: {}", e),
            X3DHError::InvalidPreKeyBundle => write!(f, "invalid prekey bundle"),
            X3DHError::InvalidInitialMessage => write!(f, "invalid initial message"),
            X3DHError::InvalidPrivateKey => write!(f, "invalid private key"),
            X3DHError::InvalidPublicKey => write!(f, "invalid public key"),
            X3DHError::InvalidKey => write!(f, "invalid key"),
            X3DHError::UnknownOneTimePrekey => write!(f, "unknown one-time prekey id"),
            X3DHError::RatchetInitFailed(e) => write!(f, "ratchet init failed: {}", e),
        }
    }
}

impl std::error::Error for X3DHError {}

impl From<hkdf::InvalidLength> for X3DHError {
    fn from(value: hkdf::InvalidLength) -> Self {
        X3DHError::HkdfInvalidLengthError(value)
    }
}

impl From<base64::DecodeError> for X3DHError {
    fn from(value: base64::DecodeError) -> Self {
        X3DHError::Base64DecodeError(value)
    }
}

impl From<RatchetError> for X3DHError {
    fn from(value: RatchetError) -> Self {
        X3DHError::RatchetInitFailed(value)
    }
}

/// Represents errors that can occur during the Double Ratchet protocol (plain and header-encrypted).
#[derive(Debug)]
pub enum RatchetError {
    /// Error indicating an invalid key material length during HKDF key derivation.
    HkdfInvalidLengthError(hkdf::InvalidLength),

    /// Error indicating an invalid message header length.
    InvalidHeaderLength(usize),

    /// Send attempted before `CKs` has been populated (responder has not yet received a first message).
    NotInitialized,

    /// Either the AEAD tag on the payload, or (HE variant) the header MAC, failed to authenticate.
    AuthFailure,

    /// The maximum number of skipped messages in one chain would be exceeded by this decrypt.
    MaxSkipsExceeded,

    /// HE variant only: the header decrypted under neither `HKr`, `NHKr`, nor any skipped header key.
    HeaderDecryptFailure,

    /// Error indicating a failure in data type conversion (hex/base64 decode, header parse).
    ConversionError,
}

impl Display for RatchetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self {
            RatchetError::HkdfInvalidLengthError(e) => write!(f, "invalid length: {}", e),
            RatchetError::InvalidHeaderLength(e) => write!(f, "invalid header length: {}", e),
            RatchetError::NotInitialized => write!(f, "sending chain not initialized"),
            RatchetError::AuthFailure => write!(f, "authentication failure"),
            RatchetError::MaxSkipsExceeded => write!(f, "max skips exceeded"),
            RatchetError::HeaderDecryptFailure => write!(f, "header undecryptable"),
            RatchetError::ConversionError => write!(f, "conversion error"),
        }
    }
}

impl std::error::Error for RatchetError {}

impl From<hkdf::InvalidLength> for RatchetError {
    fn from(value: hkdf::InvalidLength) -> Self {
        RatchetError::HkdfInvalidLengthError(value)
    }
}
