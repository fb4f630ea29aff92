pub mod errors;

use std::collections::HashMap;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use common::{RequestWrapper, ResponseWrapper, ServerResponse};
use futures_util::{
    stream::{SplitSink, SplitStream},
    FutureExt, SinkExt, StreamExt,
};
use log::info;
use protocol::ratchet::{Header, Ratchet};
use protocol::utils::{AssociatedData, InitialMessage, PreKeyBundle, PrivateKey, PublicKey, SessionKeys};
use protocol::x3dh::{generate_prekey_bundle, process_initial_message, process_prekey_bundle};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{Message, Utf8Bytes},
    MaybeTlsStream, WebSocketStream,
};

use crate::errors::ClientError;

pub const SERVER_URL: &str = "ws://127.0.0.1:3333";

type Sender = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Receiver = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A chat message as exchanged between the driver and a friend, either on the wire
/// (relayed through the server) or in a friend's local history.
///
/// `msg_type` doubles as the friend-bootstrap channel: `"initial_message"` carries a
/// base64 X3DH [`InitialMessage`] used to open the peer-to-peer ratchet, `"chat"` carries
/// ratchet-encrypted text, and `"close_chat"` tears the friend session down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub to: String,
    pub from: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(msg_type: String, to: String, from: String, text: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            msg_type,
            to,
            from,
            text,
            timestamp,
        }
    }
}

/// One peer-to-peer session: a Double Ratchet bootstrapped via X3DH with that friend,
/// independent of the outer client-server transport ratchet, plus its local message log.
struct Friend {
    ratchet: Ratchet,
    aad: AssociatedData,
    history: Vec<ChatMessage>,
}

impl Friend {
    fn new(ratchet: Ratchet, aad: AssociatedData) -> Self {
        Self {
            ratchet,
            aad,
            history: Vec::new(),
        }
    }
}

pub struct Client {
    friends: HashMap<String, Friend>,
    session: SessionKeys,
    write: Sender,
    read: Receiver,
    /// Relayed chat envelopes read while waiting on a request/response round trip;
    /// drained by [`Client::poll_incoming`] before the socket is polled again.
    pending_incoming: Vec<ChatMessage>,
    pub username: String,
    bundle: PreKeyBundle,
    identity_key: PrivateKey,
    signed_prekey: PrivateKey,
    signed_prekey_public: PublicKey,
}

impl Client {
    pub async fn new() -> Result<Self, ClientError> {
        let (write, read) = Self::connect().await?;
        let (bundle, identity_key, signed_prekey) = generate_prekey_bundle();
        let signed_prekey_public = PublicKey::from(&signed_prekey);
        let mut client = Self {
            friends: HashMap::new(),
            session: SessionKeys::new(),
            write,
            read,
            pending_incoming: Vec::new(),
            username: String::new(),
            bundle,
            identity_key,
            signed_prekey,
            signed_prekey_public,
        };
        client.establish_connection().await?;
        Ok(client)
    }

    async fn connect() -> Result<(Sender, Receiver), ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(SERVER_URL).await?;
        let (write, read) = ws_stream.split();
        Ok((write, read))
    }

    pub fn set_username(&mut self, username: String) {
        self.username = username;
    }

    /// Sends our pre-key bundle to the server and, acting as X3DH responder, derives the
    /// outer-transport ratchet from the server's reply.
    pub async fn establish_connection(&mut self) -> Result<(), ClientError> {
        let msg = json!({
            "request_type": "EstablishConnection",
            "bundle": self.bundle.clone().to_base64()
        });
        self.write
            .send(Message::Text(Utf8Bytes::from(msg.to_string())))
            .await?;

        let Some(Ok(Message::Text(response))) = StreamExt::next(&mut self.read).await else {
            return Err(ClientError::ServerResponseError);
        };
        let json_resp: Value =
            serde_json::from_str(response.as_str()).map_err(|_| ClientError::ServerResponseError)?;
        let server_resp = ServerResponse::try_from(json_resp)?;
        let initial_message = InitialMessage::try_from(server_resp.text)?;

        let (ratchet, aad) = process_initial_message(
            self.identity_key.clone(),
            (self.signed_prekey.clone(), self.signed_prekey_public.clone()),
            None,
            initial_message,
        )?;
        info!("outer transport established with the server");
        self.session.set_ratchet(ratchet);
        self.session.set_associated_data(aad);
        Ok(())
    }

    /// Sends a request over the outer transport and waits for its matching response,
    /// stashing any unrelated relayed chat envelope that arrives in the meantime.
    async fn send_request(&mut self, body: Value) -> Result<Value, ClientError> {
        let request_id = Uuid::new_v4().to_string();
        let wrapper = RequestWrapper {
            request_id: request_id.clone(),
            body,
        };
        let plaintext = serde_json::to_vec(&wrapper).map_err(|_| ClientError::SerializationError)?;
        let aad = self.session.get_associated_data().ok_or(ClientError::ServerResponseError)?;
        let ratchet = self.session.get_ratchet_mut().ok_or(ClientError::ServerResponseError)?;
        let enc = common::encrypt_request(&plaintext, ratchet, &aad).map_err(|_| ClientError::SerializationError)?;

        self.write.send(Message::Text(Utf8Bytes::from(enc))).await?;

        loop {
            let Some(Ok(Message::Text(response))) = StreamExt::next(&mut self.read).await else {
                return Err(ClientError::ServerResponseError);
            };
            let ratchet = self.session.get_ratchet_mut().ok_or(ClientError::ServerResponseError)?;
            let (value, _) =
                common::decrypt_request(&response, ratchet).map_err(|_| ClientError::ServerResponseError)?;

            match serde_json::from_value::<ResponseWrapper>(value.clone()) {
                Ok(resp) if resp.request_id == request_id => return Ok(resp.body),
                Ok(_) => continue,
                Err(_) => {
                    if let Ok(chat) = serde_json::from_value::<ChatMessage>(value) {
                        self.pending_incoming.push(chat);
                    }
                    continue;
                }
            }
        }
    }

    /// Sends a relayed envelope (a friend-bootstrap `InitialMessage` or an already
    /// ratchet-encrypted chat payload) through the server to `to`.
    async fn send_raw_message(&mut self, to: &str, msg_type: &str, text: String) -> Result<(), ClientError> {
        let body = json!({
            "action": "send_message",
            "type": msg_type,
            "from": self.username,
            "to": to,
            "text": text,
            "timestamp": Utc::now(),
        });
        self.send_request(body).await?;
        Ok(())
    }

    pub async fn register_user(&mut self) -> Result<(), ClientError> {
        let body = json!({
            "action": "register",
            "username": self.username,
            "bundle": self.bundle.clone().to_base64(),
        });
        let resp = self.send_request(body).await?;
        let server_resp = ServerResponse::try_from(resp)?;
        if server_resp.text == "registered" {
            Ok(())
        } else {
            Err(ClientError::UserAlreadyExistsError)
        }
    }

    /// Fetches `username`'s published pre-key bundle, runs X3DH as initiator to open a
    /// peer-to-peer ratchet with them, and relays the resulting `InitialMessage` so they
    /// can bootstrap the matching responder session on their end.
    pub async fn get_user_prekey_bundle(&mut self, username: String) -> Result<(), ClientError> {
        let body = json!({
            "action": "get_prekey_bundle",
            "who": username,
        });
        let resp = self.send_request(body).await?;
        let server_resp = ServerResponse::try_from(resp)?;
        let bundle = PreKeyBundle::try_from(server_resp.text)?;

        let (initial_message, ratchet, aad) = process_prekey_bundle(self.identity_key.clone(), bundle)?;
        self.friends.insert(username.clone(), Friend::new(ratchet, aad));
        self.send_raw_message(&username, "initial_message", initial_message.to_base64())
            .await
    }

    pub fn get_friends_count(&self) -> usize {
        self.friends.len()
    }

    pub fn get_open_chats(&self) -> Vec<String> {
        self.friends.keys().cloned().collect()
    }

    pub fn get_chat_history(&self, username: &str) -> Option<Vec<ChatMessage>> {
        self.friends.get(username).map(|f| f.history.clone())
    }

    fn add_chat_message(&mut self, message: ChatMessage, to: &str) {
        if let Some(friend) = self.friends.get_mut(to) {
            friend.history.push(message);
        }
    }

    /// Ratchet-encrypts `message.text` under the friend's session and relays it.
    pub async fn send_chat_message(&mut self, message: ChatMessage) -> Result<(), ClientError> {
        let (header, ciphertext) = {
            let friend = self
                .friends
                .get_mut(&message.to)
                .ok_or(ClientError::UserNotFoundError)?;
            friend
                .ratchet
                .ratchet_encrypt(message.text.as_bytes(), &friend.aad.clone().to_bytes())?
        };
        let mut wire = Vec::with_capacity(Header::LENGTH + ciphertext.len());
        wire.extend_from_slice(&header.to_bytes());
        wire.extend_from_slice(ciphertext.as_bytes());
        let payload = general_purpose::STANDARD.encode(wire);
        self.send_raw_message(&message.to, "chat", payload).await
    }

    /// Decrypts an incoming `"chat"` envelope under the sender's friend ratchet and
    /// appends the plaintext message to that friend's history.
    pub fn decrypt_chat_message(&mut self, message: ChatMessage) -> Result<(), ClientError> {
        let friend = self
            .friends
            .get_mut(&message.from)
            .ok_or(ClientError::UserNotFoundError)?;

        let raw = general_purpose::STANDARD
            .decode(&message.text)
            .map_err(|_| ClientError::SerializationError)?;
        if raw.len() < Header::LENGTH {
            return Err(ClientError::SerializationError);
        }
        let header = Header::try_from(&raw[..Header::LENGTH])?;
        let ciphertext =
            String::from_utf8(raw[Header::LENGTH..].to_vec()).map_err(|_| ClientError::SerializationError)?;
        let plaintext = friend
            .ratchet
            .ratchet_decrypt(&header, &ciphertext, &friend.aad.clone().to_bytes())?;
        let text = String::from_utf8(plaintext).map_err(|_| ClientError::SerializationError)?;

        let mut decrypted = message;
        decrypted.text = text;
        friend.history.push(decrypted);
        Ok(())
    }

    /// Handles an incoming `"initial_message"` envelope: opens the responder side of the
    /// peer-to-peer ratchet with the sender.
    pub fn add_friend(&mut self, message: ChatMessage) -> Result<(), ClientError> {
        let initial_message = InitialMessage::try_from(message.text)?;
        let (ratchet, aad) = process_initial_message(
            self.identity_key.clone(),
            (self.signed_prekey.clone(), self.signed_prekey_public.clone()),
            None,
            initial_message,
        )?;
        self.friends.insert(message.from, Friend::new(ratchet, aad));
        Ok(())
    }

    pub fn remove_friend(&mut self, from: String) {
        self.friends.remove(&from);
    }

    /// Non-blocking check for a relayed chat envelope pushed by the server outside of a
    /// pending request/response round trip. Meant to be polled once per UI tick.
    pub fn poll_incoming(&mut self) -> Option<ChatMessage> {
        if !self.pending_incoming.is_empty() {
            return Some(self.pending_incoming.remove(0));
        }

        let next = StreamExt::next(&mut self.read).now_or_never()?;
        let Some(Ok(Message::Text(text))) = next else {
            return None;
        };
        let ratchet = self.session.get_ratchet_mut()?;
        let (value, _) = common::decrypt_request(&text, ratchet).ok()?;
        serde_json::from_value::<ChatMessage>(value).ok()
    }
}

