
// byte size of a Curve25519 private key
pub(crate) const CURVE25519_SECRET_LENGTH: usize = 32;
// byte size of a Curve25519 public key
pub(crate) const CURVE25519_PUBLIC_LENGTH: usize = CURVE25519_SECRET_LENGTH;

pub(crate) const SIGNATURE_LENGTH: usize = 64;
// byte size of a sha256 hash
pub(crate) const SHA256_HASH_LENGTH: usize = 32;
// byte size of an aes256 key
pub(crate) const AES256_SECRET_LENGTH: usize = 32;
// byte size of an aes256-cbc iv
pub(crate) const AES256_IV_LENGTH: usize = 16;

// maximum number of message keys cached per chain before a skip is rejected
pub(crate) const MAX_SKIP: u64 = 32;

pub(crate) const KDF_RK_INFO: &[u8] = b"app-specific-secret-key";
pub(crate) const KDF_ENCRYPT_INFO: &[u8] = b"app-specific-encryption-key";
pub(crate) const KDF_HEADER_ENCRYPT_INFO: &[u8] = b"app-specific-header-encryption-key";
pub(crate) const X3DH_INFO: &[u8] = b"My super secret app";
pub(crate) const KDF_HE_INIT_INFO: &[u8] = b"app-specific-initial-header-keys";

// curve-id prefix used when encoding a public key into X3DH associated data
pub(crate) const CURVE_ID_X25519: u8 = 0x00;
