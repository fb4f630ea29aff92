use crate::errors::ServerError;
use chrono::{DateTime, Utc};
use common::{RegisterRequest, RequestWrapper, ResponseWrapper, SendMessageRequest, ServerResponse};
use futures_util::{SinkExt, StreamExt};
use log::{error, info};
use protocol::ratchet::Ratchet;
use protocol::utils::{AssociatedData, PreKeyBundle, PrivateKey};
use protocol::x3dh::process_prekey_bundle;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use uuid::Uuid;

pub(crate) type Tx = mpsc::UnboundedSender<Message>;
pub(crate) type PeerMap = Arc<RwLock<HashMap<Uuid, Peer>>>;
pub(crate) type Directory = Arc<RwLock<HashMap<String, Uuid>>>;

/// One live client-to-server session: the outer transport ratchet established when the
/// connection was opened, plus the registered username once `register` has been handled.
pub(crate) struct Peer {
    pub(crate) sender: Tx,
    pub(crate) pb: PreKeyBundle,
    pub(crate) ratchet: Ratchet,
    pub(crate) aad: AssociatedData,
    pub(crate) username: Option<String>,
}

impl Peer {
    pub(crate) fn new(sender: Tx, pb: PreKeyBundle, ratchet: Ratchet, aad: AssociatedData) -> Self {
        Self {
            sender,
            pb,
            ratchet,
            aad,
            username: None,
        }
    }

    pub(crate) fn get_bundle(&mut self) -> PreKeyBundle {
        let otpk = if self.pb.otpk.is_empty() {
            None
        } else {
            Some(self.pb.otpk.remove(0))
        };
        let mut pb = self.pb.clone();
        if let Some(otpk) = otpk {
            pb.otpk = vec![otpk];
        }
        pb
    }
}

pub(crate) struct EstablishConnection<'a>(pub &'a str);

impl<'a> EstablishConnection<'a> {
    pub(crate) fn from_json(request: &'a serde_json::Value) -> Option<Self> {
        match request.get("request_type") {
            None => None,
            Some(req) => {
                let req = req.as_str()?;
                match req {
                    "EstablishConnection" => Some(Self(request.get("bundle")?.as_str()?)),
                    _ => None,
                }
            }
        }
    }
}

pub(crate) fn decrypt_client_request(
    req: &str,
    ratchet: &mut Ratchet,
) -> Result<(Action, String), ServerError> {
    let decrypted = match common::decrypt_request(req, ratchet) {
        Ok((dec, _)) => dec,
        Err(_) => return Err(ServerError::InvalidRequest),
    };

    let (id, req) = match serde_json::from_value::<RequestWrapper>(decrypted) {
        Ok(request) => (request.request_id, request.body),
        Err(_) => return Err(ServerError::InvalidRequest),
    };

    match Action::from_json(&req) {
        Some(action) => Ok((action, id)),
        None => {
            error!("Failed to parse request");
            Err(ServerError::InvalidRequest)
        }
    }
}

pub(crate) enum Action {
    Register(RegisterRequest),
    SendMessage(SendMessageRequest),
    GetPrekeyBundle(String),
}

impl Action {
    pub(crate) fn from_json(request: &serde_json::Value) -> Option<Self> {
        let action = request.get("action")?.as_str()?;
        match action {
            "register" => Some(Self::Register(RegisterRequest {
                username: request.get("username")?.as_str()?.to_string(),
                bundle: request.get("bundle")?.as_str()?.to_string(),
            })),

            "send_message" => {
                let timestamp: DateTime<Utc> = request
                    .get("timestamp")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(Utc::now);
                Some(Self::SendMessage(SendMessageRequest {
                    msg_type: request.get("type")?.as_str()?.to_string(),
                    from: request.get("from")?.as_str()?.to_string(),
                    to: request.get("to")?.as_str()?.to_string(),
                    text: request.get("text")?.as_str()?.to_string(),
                    timestamp,
                }))
            }
            "get_prekey_bundle" => {
                let user = request.get("who")?.as_str()?.to_string();
                Some(Self::GetPrekeyBundle(user))
            }

            _ => None,
        }
    }
}

/// The in-memory bulletin-board server: a directory of registered users' published
/// pre-key bundles and a mailbox relay between their live connections.
pub struct Server {
    ip: String,
    port: String,
    identity_key: PrivateKey,
    peers: PeerMap,
    directory: Directory,
}

impl Server {
    pub fn new(ip: String, port: String) -> Self {
        let identity_key = PrivateKey::from_base64(common::CONFIG.get_private_key())
            .expect("config.toml must carry a valid server identity key");
        Self {
            ip,
            port,
            identity_key,
            peers: Arc::new(RwLock::new(HashMap::new())),
            directory: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn listen(&mut self) {
        let addr = format!("{}:{}", self.ip, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .unwrap_or_else(|e| panic!("failed to bind {}: {}", addr, e));
        info!("listening on {}", addr);

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                    continue;
                }
            };
            info!("new connection from {}", peer_addr);

            let identity_key = self.identity_key.clone();
            let peers = self.peers.clone();
            let directory = self.directory.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, identity_key, peers.clone(), directory.clone()).await
                {
                    error!("connection error: {}", e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    identity_key: PrivateKey,
    peers: PeerMap,
    directory: Directory,
) -> Result<(), ServerError> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| ServerError::GenericError(anyhow::anyhow!(e)))?;
    let (mut write, mut read) = ws_stream.split();

    // First frame on a fresh connection must be the unencrypted `EstablishConnection`
    // handshake carrying the client's pre-key bundle.
    let Some(Ok(Message::Text(first))) = read.next().await else {
        return Err(ServerError::InvalidRequest);
    };
    let request: serde_json::Value =
        serde_json::from_str(first.as_str()).map_err(|_| ServerError::InvalidRequest)?;
    let bundle_b64 = EstablishConnection::from_json(&request)
        .ok_or(ServerError::InvalidRequest)?
        .0
        .to_string();
    let client_bundle = PreKeyBundle::try_from(bundle_b64)?;

    let (initial_message, ratchet, aad) = process_prekey_bundle(identity_key, client_bundle.clone())?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let connection_id = Uuid::new_v4();
    peers.write().await.insert(
        connection_id,
        Peer::new(tx.clone(), client_bundle, ratchet, aad),
    );

    let ack = json!({ "text": initial_message.to_base64() });
    write
        .send(Message::Text(Utf8Bytes::from(ack.to_string())))
        .await
        .map_err(|e| ServerError::GenericError(anyhow::anyhow!(e)))?;

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = read.next().await {
        let Message::Text(text) = msg else { continue };
        if let Err(e) = handle_request(&text, connection_id, &peers, &directory, &tx).await {
            error!("request error: {}", e);
        }
    }

    peers.write().await.remove(&connection_id);
    writer_task.abort();
    Ok(())
}

async fn handle_request(
    text: &str,
    connection_id: Uuid,
    peers: &PeerMap,
    directory: &Directory,
    tx: &Tx,
) -> Result<(), ServerError> {
    let (action, request_id, aad) = {
        let mut peers_write = peers.write().await;
        let peer = peers_write
            .get_mut(&connection_id)
            .ok_or(ServerError::InvalidRequest)?;
        let (action, request_id) = decrypt_client_request(text, &mut peer.ratchet)?;
        (action, request_id, peer.aad.clone())
    };

    let response_body = match action {
        Action::Register(req) => handle_register(req, connection_id, peers, directory).await?,
        Action::GetPrekeyBundle(username) => handle_get_bundle(username, peers, directory).await?,
        Action::SendMessage(req) => {
            handle_send_message(req, peers, directory).await?;
            json!({ "text": "sent" })
        }
    };

    let response = ResponseWrapper {
        request_id,
        body: response_body,
    };
    let plaintext = serde_json::to_vec(&response).map_err(|_| ServerError::InvalidRequest)?;

    let mut peers_write = peers.write().await;
    let peer = peers_write
        .get_mut(&connection_id)
        .ok_or(ServerError::InvalidRequest)?;
    let enc = common::encrypt_request(&plaintext, &mut peer.ratchet, &aad)
        .map_err(|_| ServerError::InvalidRequest)?;
    drop(peers_write);

    tx.send(Message::Text(Utf8Bytes::from(enc)))
        .map_err(|e| ServerError::GenericError(anyhow::anyhow!(e)))?;
    Ok(())
}

async fn handle_register(
    req: RegisterRequest,
    connection_id: Uuid,
    peers: &PeerMap,
    directory: &Directory,
) -> Result<serde_json::Value, ServerError> {
    if directory.read().await.contains_key(&req.username) {
        return Err(ServerError::UserAlreadyExists);
    }
    let bundle = PreKeyBundle::try_from(req.bundle)?;

    let mut peers_write = peers.write().await;
    let peer = peers_write
        .get_mut(&connection_id)
        .ok_or(ServerError::InvalidRequest)?;
    peer.pb = bundle;
    peer.username = Some(req.username.clone());
    drop(peers_write);

    directory.write().await.insert(req.username, connection_id);
    Ok(json!({ "text": "registered" }))
}

async fn handle_get_bundle(
    username: String,
    peers: &PeerMap,
    directory: &Directory,
) -> Result<serde_json::Value, ServerError> {
    let connection_id = *directory
        .read()
        .await
        .get(&username)
        .ok_or(ServerError::UserNotFoundError)?;
    let mut peers_write = peers.write().await;
    let peer = peers_write
        .get_mut(&connection_id)
        .ok_or(ServerError::UserNotFoundError)?;
    Ok(json!({ "text": peer.get_bundle().to_base64() }))
}

async fn handle_send_message(req: SendMessageRequest, peers: &PeerMap, directory: &Directory) -> Result<(), ServerError> {
    let connection_id = *directory
        .read()
        .await
        .get(&req.to)
        .ok_or(ServerError::UserNotFoundError)?;

    let (tx, ratchet_header_ad) = {
        let mut peers_write = peers.write().await;
        let peer = peers_write
            .get_mut(&connection_id)
            .ok_or(ServerError::UserNotFoundError)?;
        (peer.sender.clone(), peer.aad.clone())
    };

    let relayed = json!({
        "type": req.msg_type,
        "from": req.from,
        "text": req.text,
        "timestamp": req.timestamp,
    });
    let plaintext = relayed.to_string().into_bytes();

    let enc = {
        let mut peers_write = peers.write().await;
        let peer = peers_write
            .get_mut(&connection_id)
            .ok_or(ServerError::UserNotFoundError)?;
        common::encrypt_request(&plaintext, &mut peer.ratchet, &ratchet_header_ad)
            .map_err(|_| ServerError::InvalidRequest)?
    };

    tx.send(Message::Text(Utf8Bytes::from(enc)))
        .map_err(|e| ServerError::GenericError(anyhow::anyhow!(e)))
}
