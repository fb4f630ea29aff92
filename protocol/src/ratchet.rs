//! The plain Double Ratchet: per-session sending/receiving chains, skipped-message-key
//! caching, and the DH ratchet step that advances the root key on each direction change.

use std::collections::HashMap;

use arrayref::array_ref;

use crate::constants::{AES256_SECRET_LENGTH, CURVE25519_PUBLIC_LENGTH, MAX_SKIP};
use crate::errors::RatchetError;
use crate::kdf;
use crate::utils::{PrivateKey, PublicKey};

/// A ratchet message header: the sender's current DH public key, the length of the
/// previous sending chain (`pn`), and the index of this message within the current
/// sending chain (`n`).
#[derive(Clone, Debug)]
pub struct Header {
    pub dh: PublicKey,
    pub pn: u64,
    pub n: u64,
}

impl Header {
    /// Wire size: a Curve25519 public key plus two big-endian `u64` counters.
    pub const LENGTH: usize = CURVE25519_PUBLIC_LENGTH + 8 + 8;

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut out = [0u8; Self::LENGTH];
        out[..CURVE25519_PUBLIC_LENGTH].copy_from_slice(self.dh.as_ref());
        out[CURVE25519_PUBLIC_LENGTH..CURVE25519_PUBLIC_LENGTH + 8]
            .copy_from_slice(&self.pn.to_be_bytes());
        out[CURVE25519_PUBLIC_LENGTH + 8..].copy_from_slice(&self.n.to_be_bytes());
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl TryFrom<&[u8]> for Header {
    type Error = RatchetError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != Self::LENGTH {
            return Err(RatchetError::InvalidHeaderLength(value.len()));
        }
        let dh = PublicKey::from(array_ref!(value, 0, CURVE25519_PUBLIC_LENGTH));
        let pn = u64::from_be_bytes(*array_ref!(value, CURVE25519_PUBLIC_LENGTH, 8));
        let n = u64::from_be_bytes(*array_ref!(value, CURVE25519_PUBLIC_LENGTH + 8, 8));
        Ok(Header { dh, pn, n })
    }
}

impl TryFrom<&str> for Header {
    type Error = RatchetError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let bytes = hex::decode(value).map_err(|_| RatchetError::ConversionError)?;
        Header::try_from(bytes.as_slice())
    }
}

/// The state of one side of a Double Ratchet session.
#[derive(Clone)]
pub struct Ratchet {
    dh_self: (PrivateKey, PublicKey),
    dh_remote: Option<PublicKey>,
    root_key: [u8; AES256_SECRET_LENGTH],
    chain_key_send: Option<[u8; AES256_SECRET_LENGTH]>,
    chain_key_recv: Option<[u8; AES256_SECRET_LENGTH]>,
    n_send: u64,
    n_recv: u64,
    pn: u64,
    mk_skipped: HashMap<(PublicKey, u64), [u8; AES256_SECRET_LENGTH]>,
}

impl Ratchet {
    /// Initializes a session as the X3DH initiator, given the derived `SK` and the
    /// responder's current ratchet public key (their signed pre-key).
    pub fn init_initiator(
        sk: &[u8; AES256_SECRET_LENGTH],
        remote_dh_public_key: PublicKey,
    ) -> Result<Ratchet, RatchetError> {
        let dh_self_private = PrivateKey::new();
        let dh_self_public = PublicKey::from(&dh_self_private);

        let dh_out = dh_self_private.diffie_hellman(&remote_dh_public_key);
        let (root_key, chain_key_send) = kdf::kdf_rk(sk, dh_out.as_ref())?;

        Ok(Ratchet {
            dh_self: (dh_self_private, dh_self_public),
            dh_remote: Some(remote_dh_public_key),
            root_key,
            chain_key_send: Some(chain_key_send),
            chain_key_recv: None,
            n_send: 0,
            n_recv: 0,
            pn: 0,
            mk_skipped: HashMap::new(),
        })
    }

    /// Initializes a session as the X3DH responder, given the derived `SK` and the
    /// responder's own signed pre-key pair (which doubles as the initial ratchet key).
    /// `CKr` is left unset until the first message arrives and triggers a DH ratchet step.
    pub fn init_responder(
        sk: &[u8; AES256_SECRET_LENGTH],
        dh_key_pair: (PrivateKey, PublicKey),
    ) -> Ratchet {
        Ratchet {
            dh_self: dh_key_pair,
            dh_remote: None,
            root_key: *sk,
            chain_key_send: None,
            chain_key_recv: None,
            n_send: 0,
            n_recv: 0,
            pn: 0,
            mk_skipped: HashMap::new(),
        }
    }

    /// Encrypts `plaintext`, advancing the sending chain by one message key.
    ///
    /// # Errors
    ///
    /// * [`RatchetError::NotInitialized`] - the responder has not yet received a first
    ///   message and has no sending chain.
    pub fn ratchet_encrypt(
        &mut self,
        plaintext: &[u8],
        ad: &[u8],
    ) -> Result<(Header, String), RatchetError> {
        let chain_key = self.chain_key_send.ok_or(RatchetError::NotInitialized)?;
        let (mk, chain_key_next) = kdf::kdf_ck(&chain_key);
        self.chain_key_send = Some(chain_key_next);

        let header = Header {
            dh: self.dh_self.1.clone(),
            pn: self.pn,
            n: self.n_send,
        };
        self.n_send += 1;

        let full_ad = concat_ad(ad, &header.to_bytes());
        let ciphertext = kdf::encrypt(&mk, plaintext, &full_ad);
        Ok((header, ciphertext))
    }

    /// Decrypts a message under `header`, performing a DH ratchet step and/or skipping
    /// message keys as needed. On any failure the session state is rolled back to what
    /// it was before the call, so a rejected message never corrupts the ratchet.
    pub fn ratchet_decrypt(
        &mut self,
        header: &Header,
        ciphertext: &str,
        ad: &[u8],
    ) -> Result<Vec<u8>, RatchetError> {
        let snapshot = self.clone();
        match self.try_ratchet_decrypt(header, ciphertext, ad) {
            Ok(plaintext) => Ok(plaintext),
            Err(err) => {
                *self = snapshot;
                Err(err)
            }
        }
    }

    fn try_ratchet_decrypt(
        &mut self,
        header: &Header,
        ciphertext: &str,
        ad: &[u8],
    ) -> Result<Vec<u8>, RatchetError> {
        if let Some(mk) = self.mk_skipped.remove(&(header.dh.clone(), header.n)) {
            let full_ad = concat_ad(ad, &header.to_bytes());
            return kdf::decrypt(&mk, ciphertext, &full_ad);
        }

        if self.dh_remote.as_ref() != Some(&header.dh) {
            self.skip_message_keys(header.pn)?;
            self.dh_ratchet(header)?;
        }

        self.skip_message_keys(header.n)?;
        let chain_key = self.chain_key_recv.ok_or(RatchetError::NotInitialized)?;
        let (mk, chain_key_next) = kdf::kdf_ck(&chain_key);
        self.chain_key_recv = Some(chain_key_next);
        self.n_recv += 1;

        let full_ad = concat_ad(ad, &header.to_bytes());
        kdf::decrypt(&mk, ciphertext, &full_ad)
    }

    fn skip_message_keys(&mut self, until: u64) -> Result<(), RatchetError> {
        if self.n_recv + MAX_SKIP < until {
            return Err(RatchetError::MaxSkipsExceeded);
        }
        let Some(mut chain_key) = self.chain_key_recv else {
            return Ok(());
        };
        let dh_remote = self
            .dh_remote
            .clone()
            .ok_or(RatchetError::NotInitialized)?;
        while self.n_recv < until {
            let (mk, chain_key_next) = kdf::kdf_ck(&chain_key);
            self.mk_skipped.insert((dh_remote.clone(), self.n_recv), mk);
            chain_key = chain_key_next;
            self.n_recv += 1;
        }
        self.chain_key_recv = Some(chain_key);
        Ok(())
    }

    fn dh_ratchet(&mut self, header: &Header) -> Result<(), RatchetError> {
        self.pn = self.n_send;
        self.n_send = 0;
        self.n_recv = 0;
        self.dh_remote = Some(header.dh.clone());

        let dh_out_recv = self.dh_self.0.diffie_hellman(self.dh_remote.as_ref().unwrap());
        let (root_key, chain_key_recv) = kdf::kdf_rk(&self.root_key, dh_out_recv.as_ref())?;
        self.root_key = root_key;
        self.chain_key_recv = Some(chain_key_recv);

        let new_private = PrivateKey::new();
        let new_public = PublicKey::from(&new_private);
        self.dh_self = (new_private, new_public);

        let dh_out_send = self.dh_self.0.diffie_hellman(self.dh_remote.as_ref().unwrap());
        let (root_key, chain_key_send) = kdf::kdf_rk(&self.root_key, dh_out_send.as_ref())?;
        self.root_key = root_key;
        self.chain_key_send = Some(chain_key_send);

        Ok(())
    }
}

fn concat_ad(ad: &[u8], header_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ad.len() + header_bytes.len());
    out.extend_from_slice(ad);
    out.extend_from_slice(header_bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_pair() -> (Ratchet, Ratchet) {
        let sk = [5u8; AES256_SECRET_LENGTH];
        let bob_spk_private = PrivateKey::new();
        let bob_spk_public = PublicKey::from(&bob_spk_private);

        let alice = Ratchet::init_initiator(&sk, bob_spk_public.clone()).unwrap();
        let bob = Ratchet::init_responder(&sk, (bob_spk_private, bob_spk_public));
        (alice, bob)
    }

    #[test]
    fn in_order_pair_round_trips() {
        let (mut alice, mut bob) = session_pair();
        let (header, ct) = alice.ratchet_encrypt(b"hello bob", b"ad").unwrap();
        let pt = bob.ratchet_decrypt(&header, &ct, b"ad").unwrap();
        assert_eq!(pt, b"hello bob");

        let (header, ct) = bob.ratchet_encrypt(b"hello alice", b"ad").unwrap();
        let pt = alice.ratchet_decrypt(&header, &ct, b"ad").unwrap();
        assert_eq!(pt, b"hello alice");
    }

    #[test]
    fn single_skipped_message_is_recovered_later() {
        let (mut alice, mut bob) = session_pair();
        let (h0, ct0) = alice.ratchet_encrypt(b"first", b"ad").unwrap();
        let (h1, ct1) = alice.ratchet_encrypt(b"second", b"ad").unwrap();

        let pt1 = bob.ratchet_decrypt(&h1, &ct1, b"ad").unwrap();
        assert_eq!(pt1, b"second");

        let pt0 = bob.ratchet_decrypt(&h0, &ct0, b"ad").unwrap();
        assert_eq!(pt0, b"first");
    }

    #[test]
    fn random_order_of_five_messages_all_decrypt() {
        let (mut alice, mut bob) = session_pair();
        let msgs: Vec<(Header, String)> = (0..5)
            .map(|i| {
                alice
                    .ratchet_encrypt(format!("msg {i}").as_bytes(), b"ad")
                    .unwrap()
            })
            .collect();

        for i in [2, 0, 4, 1, 3] {
            let (header, ct) = &msgs[i];
            let pt = bob.ratchet_decrypt(header, ct, b"ad").unwrap();
            assert_eq!(pt, format!("msg {i}").as_bytes());
        }
    }

    #[test]
    fn skip_beyond_max_skip_is_rejected() {
        let (mut alice, mut bob) = session_pair();
        let (h, ct) = alice.ratchet_encrypt(b"warm up", b"ad").unwrap();
        bob.ratchet_decrypt(&h, &ct, b"ad").unwrap();

        let mut last = None;
        for i in 0..(MAX_SKIP + 5) {
            last = Some(alice.ratchet_encrypt(format!("msg {i}").as_bytes(), b"ad").unwrap());
        }
        let (header, ct) = last.unwrap();
        assert!(matches!(
            bob.ratchet_decrypt(&header, &ct, b"ad"),
            Err(RatchetError::MaxSkipsExceeded)
        ));
    }

    #[test]
    fn failed_decrypt_does_not_mutate_session_state() {
        let (mut alice, mut bob) = session_pair();
        let (header, ct) = alice.ratchet_encrypt(b"hello", b"ad").unwrap();
        let n_recv_before = bob.n_recv;
        assert!(bob.ratchet_decrypt(&header, &ct, b"wrong ad").is_err());
        assert_eq!(bob.n_recv, n_recv_before);
        assert!(bob.ratchet_decrypt(&header, &ct, b"ad").is_ok());
    }

    #[test]
    fn responder_cannot_send_before_first_receive() {
        let sk = [9u8; AES256_SECRET_LENGTH];
        let bob_spk_private = PrivateKey::new();
        let bob_spk_public = PublicKey::from(&bob_spk_private);
        let mut bob = Ratchet::init_responder(&sk, (bob_spk_private, bob_spk_public));
        assert!(matches!(
            bob.ratchet_encrypt(b"too early", b"ad"),
            Err(RatchetError::NotInitialized)
        ));
    }
}
