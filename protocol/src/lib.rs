//! The cryptographic core: X3DH key agreement, XEdDSA signing over X25519 key material,
//! and the plain and header-encrypted Double Ratchet state machines.

pub mod constants;
pub mod errors;
pub mod kdf;
pub mod ratchet;
pub mod ratchet_he;
pub mod utils;
pub mod x3dh;
pub mod xeddsa;
