//! The header-encrypted Double Ratchet: like [`crate::ratchet`], but the per-message
//! header is itself encrypted under a rotating header key, so an observer of the wire
//! cannot see the sender's current ratchet public key or message counters. Decrypting a
//! message first requires a trial decryption of the header to detect whether a new DH
//! ratchet epoch has begun, before any chain key is advanced.

use std::collections::HashMap;

use crate::constants::{AES256_SECRET_LENGTH, MAX_SKIP};
use crate::errors::RatchetError;
use crate::kdf;
use crate::ratchet::Header;
use crate::utils::{PrivateKey, PublicKey};

/// The state of one side of a header-encrypted Double Ratchet session.
#[derive(Clone)]
pub struct RatchetHe {
    dh_self: (PrivateKey, PublicKey),
    dh_remote: Option<PublicKey>,
    root_key: [u8; AES256_SECRET_LENGTH],
    chain_key_send: Option<[u8; AES256_SECRET_LENGTH]>,
    chain_key_recv: Option<[u8; AES256_SECRET_LENGTH]>,
    n_send: u64,
    n_recv: u64,
    pn: u64,
    hk_send: Option<[u8; AES256_SECRET_LENGTH]>,
    hk_recv: Option<[u8; AES256_SECRET_LENGTH]>,
    nhk_send: [u8; AES256_SECRET_LENGTH],
    nhk_recv: [u8; AES256_SECRET_LENGTH],
    mk_skipped: HashMap<([u8; AES256_SECRET_LENGTH], u64), [u8; AES256_SECRET_LENGTH]>,
}

impl RatchetHe {
    /// Initializes a session as the X3DH initiator. `shared_hka`/`shared_nhkb` are the
    /// pair of header keys both sides agree on out of band alongside `SK`; see
    /// [`kdf::kdf_he_init`].
    pub fn init_initiator(
        sk: &[u8; AES256_SECRET_LENGTH],
        remote_dh_public_key: PublicKey,
    ) -> Result<RatchetHe, RatchetError> {
        let dh_self_private = PrivateKey::new();
        let dh_self_public = PublicKey::from(&dh_self_private);
        let dh_out = dh_self_private.diffie_hellman(&remote_dh_public_key);
        let (root_key, chain_key_send, nhk_send) = kdf::kdf_rk_he(sk, dh_out.as_ref())?;
        let (shared_hka, shared_nhkb) = kdf::kdf_he_init(sk);

        Ok(RatchetHe {
            dh_self: (dh_self_private, dh_self_public),
            dh_remote: Some(remote_dh_public_key),
            root_key,
            chain_key_send: Some(chain_key_send),
            chain_key_recv: None,
            n_send: 0,
            n_recv: 0,
            pn: 0,
            hk_send: Some(shared_hka),
            hk_recv: None,
            nhk_send,
            nhk_recv: shared_nhkb,
            mk_skipped: HashMap::new(),
        })
    }

    /// Initializes a session as the X3DH responder, given the responder's own signed
    /// pre-key pair (the initial ratchet key). `HKs`/`HKr` are left unset: the responder
    /// sends nothing under a header key until its own first DH ratchet, and decrypts the
    /// initiator's first message via `NHKr` (see [`Self::ratchet_decrypt`]).
    pub fn init_responder(
        sk: &[u8; AES256_SECRET_LENGTH],
        dh_key_pair: (PrivateKey, PublicKey),
    ) -> RatchetHe {
        let (shared_hka, shared_nhkb) = kdf::kdf_he_init(sk);
        RatchetHe {
            dh_self: dh_key_pair,
            dh_remote: None,
            root_key: *sk,
            chain_key_send: None,
            chain_key_recv: None,
            n_send: 0,
            n_recv: 0,
            pn: 0,
            hk_send: None,
            hk_recv: None,
            nhk_send: shared_nhkb,
            nhk_recv: shared_hka,
            mk_skipped: HashMap::new(),
        }
    }

    /// Encrypts `plaintext`, returning the hex-encoded encrypted header and hex-encoded
    /// ciphertext body.
    ///
    /// # Errors
    ///
    /// * [`RatchetError::NotInitialized`] - the responder has not yet received a first
    ///   message and has no sending chain.
    pub fn ratchet_encrypt(
        &mut self,
        plaintext: &[u8],
        ad: &[u8],
    ) -> Result<(String, String), RatchetError> {
        let chain_key = self.chain_key_send.ok_or(RatchetError::NotInitialized)?;
        let hk = self.hk_send.ok_or(RatchetError::NotInitialized)?;
        let (mk, chain_key_next) = kdf::kdf_ck(&chain_key);
        self.chain_key_send = Some(chain_key_next);

        let header = Header {
            dh: self.dh_self.1.clone(),
            pn: self.pn,
            n: self.n_send,
        };
        self.n_send += 1;

        let enc_header = kdf::hencrypt(&hk, &header.to_bytes());
        let enc_header_hex = hex::encode(&enc_header);
        let full_ad = concat_ad(ad, &enc_header);
        let ciphertext = kdf::encrypt(&mk, plaintext, &full_ad);
        Ok((enc_header_hex, ciphertext))
    }

    /// Decrypts a message given its hex-encoded encrypted header and hex-encoded
    /// ciphertext body. On any failure the session state is rolled back to what it was
    /// before the call.
    pub fn ratchet_decrypt(
        &mut self,
        enc_header_hex: &str,
        ciphertext: &str,
        ad: &[u8],
    ) -> Result<Vec<u8>, RatchetError> {
        let snapshot = self.clone();
        match self.try_ratchet_decrypt(enc_header_hex, ciphertext, ad) {
            Ok(plaintext) => Ok(plaintext),
            Err(err) => {
                *self = snapshot;
                Err(err)
            }
        }
    }

    fn try_ratchet_decrypt(
        &mut self,
        enc_header_hex: &str,
        ciphertext: &str,
        ad: &[u8],
    ) -> Result<Vec<u8>, RatchetError> {
        let enc_header = hex::decode(enc_header_hex).map_err(|_| RatchetError::ConversionError)?;

        if let Some(plaintext) = self.try_skipped_message_keys(&enc_header, ciphertext, ad)? {
            return Ok(plaintext);
        }

        let (header, should_ratchet) = self.decrypt_header(&enc_header)?;
        if should_ratchet {
            self.skip_message_keys(header.pn)?;
            self.dh_ratchet(&header);
        }

        self.skip_message_keys(header.n)?;
        let chain_key = self.chain_key_recv.ok_or(RatchetError::NotInitialized)?;
        let (mk, chain_key_next) = kdf::kdf_ck(&chain_key);
        self.chain_key_recv = Some(chain_key_next);
        self.n_recv += 1;

        let full_ad = concat_ad(ad, &enc_header);
        kdf::decrypt(&mk, ciphertext, &full_ad)
    }

    fn try_skipped_message_keys(
        &mut self,
        enc_header: &[u8],
        ciphertext: &str,
        ad: &[u8],
    ) -> Result<Option<Vec<u8>>, RatchetError> {
        let hit = self.mk_skipped.keys().find_map(|(hk, n)| {
            kdf::hdecrypt(hk, enc_header)
                .and_then(|bytes| Header::try_from(bytes.as_slice()).ok())
                .filter(|header| header.n == *n)
                .map(|_| (*hk, *n))
        });

        let Some(key) = hit else {
            return Ok(None);
        };
        let mk = self.mk_skipped.remove(&key).expect("just found this key");
        let full_ad = concat_ad(ad, enc_header);
        Ok(Some(kdf::decrypt(&mk, ciphertext, &full_ad)?))
    }

    /// Tries `HKr` (current epoch), falling back to `NHKr` (next epoch). Returns the
    /// decrypted header and whether a DH ratchet step is now due.
    fn decrypt_header(&self, enc_header: &[u8]) -> Result<(Header, bool), RatchetError> {
        if let Some(hk_recv) = self.hk_recv {
            if let Some(bytes) = kdf::hdecrypt(&hk_recv, enc_header) {
                let header = Header::try_from(bytes.as_slice())?;
                return Ok((header, false));
            }
        }

        let bytes =
            kdf::hdecrypt(&self.nhk_recv, enc_header).ok_or(RatchetError::HeaderDecryptFailure)?;
        let header = Header::try_from(bytes.as_slice())?;
        Ok((header, true))
    }

    fn skip_message_keys(&mut self, until: u64) -> Result<(), RatchetError> {
        if self.n_recv + MAX_SKIP < until {
            return Err(RatchetError::MaxSkipsExceeded);
        }
        let Some(mut chain_key) = self.chain_key_recv else {
            return Ok(());
        };
        let hk_recv = self.hk_recv.ok_or(RatchetError::NotInitialized)?;
        while self.n_recv < until {
            let (mk, chain_key_next) = kdf::kdf_ck(&chain_key);
            self.mk_skipped.insert((hk_recv, self.n_recv), mk);
            chain_key = chain_key_next;
            self.n_recv += 1;
        }
        self.chain_key_recv = Some(chain_key);
        Ok(())
    }

    fn dh_ratchet(&mut self, header: &Header) {
        self.pn = self.n_send;
        self.n_send = 0;
        self.n_recv = 0;
        self.hk_send = Some(self.nhk_send);
        self.hk_recv = Some(self.nhk_recv);
        self.dh_remote = Some(header.dh.clone());

        let dh_out_recv = self.dh_self.0.diffie_hellman(self.dh_remote.as_ref().unwrap());
        let (root_key, chain_key_recv, nhk_recv) =
            kdf::kdf_rk_he(&self.root_key, dh_out_recv.as_ref())
                .expect("HKDF output length is fixed and within bound");
        self.root_key = root_key;
        self.chain_key_recv = Some(chain_key_recv);
        self.nhk_recv = nhk_recv;

        let new_private = PrivateKey::new();
        let new_public = PublicKey::from(&new_private);
        self.dh_self = (new_private, new_public);

        let dh_out_send = self.dh_self.0.diffie_hellman(self.dh_remote.as_ref().unwrap());
        let (root_key, chain_key_send, nhk_send) =
            kdf::kdf_rk_he(&self.root_key, dh_out_send.as_ref())
                .expect("HKDF output length is fixed and within bound");
        self.root_key = root_key;
        self.chain_key_send = Some(chain_key_send);
        self.nhk_send = nhk_send;
    }
}

fn concat_ad(ad: &[u8], enc_header: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ad.len() + enc_header.len());
    out.extend_from_slice(ad);
    out.extend_from_slice(enc_header);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_pair() -> (RatchetHe, RatchetHe) {
        let sk = [5u8; AES256_SECRET_LENGTH];
        let bob_spk_private = PrivateKey::new();
        let bob_spk_public = PublicKey::from(&bob_spk_private);

        let alice = RatchetHe::init_initiator(&sk, bob_spk_public.clone()).unwrap();
        let bob = RatchetHe::init_responder(&sk, (bob_spk_private, bob_spk_public));
        (alice, bob)
    }

    #[test]
    fn in_order_pair_round_trips() {
        let (mut alice, mut bob) = session_pair();
        let (eh, ct) = alice.ratchet_encrypt(b"hello bob", b"ad").unwrap();
        let pt = bob.ratchet_decrypt(&eh, &ct, b"ad").unwrap();
        assert_eq!(pt, b"hello bob");

        let (eh, ct) = bob.ratchet_encrypt(b"hello alice", b"ad").unwrap();
        let pt = alice.ratchet_decrypt(&eh, &ct, b"ad").unwrap();
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
        let msgs: Vec<(String, String)> = (0..5)
            .map(|i| {
                alice
                    .ratchet_encrypt(format!("msg {i}").as_bytes(), b"ad")
                    .unwrap()
            })
            .collect();

        for i in [2, 0, 4, 1, 3] {
            let (eh, ct) = &msgs[i];
            let pt = bob.ratchet_decrypt(eh, ct, b"ad").unwrap();
            assert_eq!(pt, format!("msg {i}").as_bytes());
        }
    }

    #[test]
    fn cross_epoch_skip_is_recovered() {
        let (mut alice, mut bob) = session_pair();
        let (h0, ct0) = alice.ratchet_encrypt(b"epoch one", b"ad").unwrap();
        // Bob replies, advancing Bob into a new DH epoch before Alice's first message
        // is ever delivered.
        let (h1, ct1) = bob_replies_without_seeing(&mut bob, &mut alice);

        let pt0 = bob.ratchet_decrypt(&h0, &ct0, b"ad").unwrap();
        assert_eq!(pt0, b"epoch one");
        let pt1 = alice.ratchet_decrypt(&h1, &ct1, b"ad").unwrap();
        assert_eq!(pt1, b"bob's reply");
    }

    fn bob_replies_without_seeing(
        bob: &mut RatchetHe,
        alice: &mut RatchetHe,
    ) -> (String, String) {
        // Bob can only start sending after processing a message from Alice once, so
        // route a throwaway message through first, then let Bob reply on top of that.
        let (h, ct) = alice.ratchet_encrypt(b"warm up", b"ad").unwrap();
        bob.ratchet_decrypt(&h, &ct, b"ad").unwrap();
        bob.ratchet_encrypt(b"bob's reply", b"ad").unwrap()
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
        let (eh, ct) = last.unwrap();
        assert!(matches!(
            bob.ratchet_decrypt(&eh, &ct, b"ad"),
            Err(RatchetError::MaxSkipsExceeded)
        ));
    }

    #[test]
    fn failed_decrypt_does_not_mutate_session_state() {
        let (mut alice, mut bob) = session_pair();
        let (eh, ct) = alice.ratchet_encrypt(b"hello", b"ad").unwrap();
        let n_recv_before = bob.n_recv;
        assert!(bob.ratchet_decrypt(&eh, &ct, b"wrong ad").is_err());
        assert_eq!(bob.n_recv, n_recv_before);
        assert!(bob.ratchet_decrypt(&eh, &ct, b"ad").is_ok());
    }

    #[test]
    fn responder_cannot_send_before_first_receive() {
        let sk = [9u8; AES256_SECRET_LENGTH];
        let bob_spk_private = PrivateKey::new();
        let bob_spk_public = PublicKey::from(&bob_spk_private);
        let mut bob = RatchetHe::init_responder(&sk, (bob_spk_private, bob_spk_public));
        assert!(matches!(
            bob.ratchet_encrypt(b"too early", b"ad"),
            Err(RatchetError::NotInitialized)
        ));
    }
}
