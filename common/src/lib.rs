//! Shared wire types and transport-layer helpers used by both `client` and `server`:
//! the request/response envelopes exchanged over the websocket, the on-disk server
//! configuration, and the outer-transport encrypt/decrypt helpers built on top of a
//! [`protocol::ratchet::Ratchet`] session.

use std::sync::OnceLock;

use arrayref::array_ref;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use log::error;
use once_cell::sync::Lazy;
use protocol::ratchet::{Header, Ratchet};
use protocol::utils::AssociatedData;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request envelope sent from client to server: an opaque JSON body plus a
/// correlation id the matching [`ResponseWrapper`] will echo back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestWrapper {
    pub request_id: String,
    pub body: Value,
}

/// A response envelope sent from server to client, correlated to a [`RequestWrapper`]
/// by `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseWrapper {
    pub request_id: String,
    pub body: Value,
}

/// A registration request: claims `username` and publishes `bundle` (a base64-encoded
/// [`protocol::utils::PreKeyBundle`]) to the server's directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub bundle: String,
}

/// A relayed message between two registered users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub from: String,
    pub to: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A generic server response: most replies are a single opaque text payload (an error
/// message, a serialized pre-key bundle, an initial X3DH message, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerResponse {
    pub text: String,
}

impl TryFrom<Value> for ServerResponse {
    type Error = ();

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        serde_json::from_value(value).map_err(|_| ())
    }
}

/// Server bootstrap configuration, loaded once from `config/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    server_ip: String,
    server_port: String,
    private_key_server: String,
    public_key_server: String,
    log_level: String,
}

impl AppConfig {
    pub fn get_server_ip(&self) -> String {
        self.server_ip.clone()
    }

    pub fn get_server_port(&self) -> String {
        self.server_port.clone()
    }

    pub fn get_private_key(&self) -> String {
        self.private_key_server.clone()
    }

    pub fn get_public_key(&self) -> String {
        self.public_key_server.clone()
    }

    pub fn get_log_level(&self) -> String {
        self.log_level.clone()
    }
}

fn config_path() -> &'static str {
    static DOCKER_PATH: OnceLock<bool> = OnceLock::new();
    let in_docker = *DOCKER_PATH.get_or_init(|| std::path::Path::new("/.dockerenv").exists());
    if in_docker {
        "/app/config/config.toml"
    } else {
        "config/config.toml"
    }
}

pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    let content = std::fs::read_to_string(config_path())
        .expect("config.toml must be present to boot the server");
    toml::from_str(&content).expect("config.toml must match the expected schema")
});

/// Decrypts a request received over the outer transport: `base64(header || aad || hex(ct||tag))`,
/// where `header`/`ct||tag` are consumed by the session [`Ratchet`].
pub fn decrypt_request(req: &str, ratchet: &mut Ratchet) -> Result<(Value, AssociatedData), ()> {
    let enc_req = match general_purpose::STANDARD.decode(req) {
        Ok(bytes) => bytes,
        Err(_) => {
            error!("Failed to decode request");
            return Err(());
        }
    };
    if enc_req.len() < Header::LENGTH + AssociatedData::SIZE {
        error!("Request too short");
        return Err(());
    }

    let header = Header::try_from(&enc_req[..Header::LENGTH]).map_err(|_| ())?;
    let aad = AssociatedData::try_from(array_ref!(enc_req, Header::LENGTH, AssociatedData::SIZE))
        .map_err(|_| ())?;
    let ciphertext_bytes = &enc_req[Header::LENGTH + AssociatedData::SIZE..];
    let ciphertext = String::from_utf8(ciphertext_bytes.to_vec()).map_err(|_| ())?;

    let plaintext = ratchet
        .ratchet_decrypt(&header, &ciphertext, &aad.clone().to_bytes())
        .map_err(|_| ())?;

    match String::from_utf8(plaintext) {
        Ok(s) => Ok((
            serde_json::from_str::<Value>(&s).unwrap_or(Value::Null),
            aad,
        )),
        Err(e) => {
            error!("Failed to parse request: {}", e);
            Err(())
        }
    }
}

/// Encrypts `plaintext` for the outer transport, the inverse of [`decrypt_request`].
pub fn encrypt_request(
    plaintext: &[u8],
    ratchet: &mut Ratchet,
    aad: &AssociatedData,
) -> Result<String, ()> {
    let ad_bytes = aad.clone().to_bytes();
    let (header, ciphertext) = ratchet
        .ratchet_encrypt(plaintext, &ad_bytes)
        .map_err(|_| ())?;

    let mut out = Vec::new();
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&ad_bytes);
    out.extend_from_slice(ciphertext.as_bytes());
    Ok(general_purpose::STANDARD.encode(out))
}
