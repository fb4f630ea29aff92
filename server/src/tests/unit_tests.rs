#![allow(warnings)]

use common::{RequestWrapper, ResponseWrapper};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use uuid::Uuid;

use protocol::utils::{PreKeyBundle, PrivateKey, PublicKey};
use protocol::{
    utils::{AssociatedData, InitialMessage},
    x3dh::{generate_prekey_bundle, generate_prekey_bundle_with_otpk, process_initial_message},
};

const URL: &str = "ws://127.0.0.1:3333";

/// Establishes the outer-transport ratchet against a live server, returning the ratchet
/// and its associated data so the test can drive `register`/`get_prekey_bundle` requests.
async fn connect_and_handshake(
    write: &mut (impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    read: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> (
    protocol::ratchet::Ratchet,
    AssociatedData,
    PreKeyBundle,
    PrivateKey,
    PrivateKey,
) {
    let (pb, ik, spk) = generate_prekey_bundle();
    let msg = json!({
        "request_type": "EstablishConnection",
        "bundle": pb.clone().to_base64()
    });
    write
        .send(Message::Text(Utf8Bytes::from(msg.to_string())))
        .await
        .unwrap();

    let Some(Ok(Message::Text(response))) = read.next().await else {
        panic!("did not receive connection establishment acknowledgment");
    };
    let json_req: Value = serde_json::from_str(response.as_str()).unwrap();
    let initial_msg = json_req.get("text").unwrap().as_str().unwrap().to_string();
    let initial_msg = InitialMessage::try_from(initial_msg).unwrap();
    let spk_public = PublicKey::from(&spk);
    let (ratchet, aad) = process_initial_message(ik.clone(), (spk.clone(), spk_public), None, initial_msg.clone())
        .expect("valid initial message");
    (ratchet, aad, pb, ik, spk)
}

fn wrap_request(action: Value) -> RequestWrapper {
    RequestWrapper {
        request_id: Uuid::new_v4().to_string(),
        body: action,
    }
}

#[tokio::test]
async fn test_secure_connection_establishment() {
    let (ws_stream, _) = tokio_tungstenite::connect_async(URL)
        .await
        .expect("failed to connect");
    let (mut write, mut read) = ws_stream.split();
    connect_and_handshake(&mut write, &mut read).await;
}

#[tokio::test]
async fn test_registration() {
    let (ws_stream, _) = tokio_tungstenite::connect_async(URL)
        .await
        .expect("failed to connect");
    let (mut write, mut read) = ws_stream.split();
    let (mut ratchet, aad, pb, _, _) = connect_and_handshake(&mut write, &mut read).await;

    let register = wrap_request(json!({
        "action": "register",
        "username": "Luc",
        "bundle": pb.clone().to_base64(),
    }));
    let plaintext = serde_json::to_vec(&register).unwrap();
    let enc_req = common::encrypt_request(&plaintext, &mut ratchet, &aad).unwrap();

    write
        .send(Message::Text(Utf8Bytes::from(enc_req)))
        .await
        .expect("failed to send registration");

    let Some(Ok(Message::Text(response))) = read.next().await else {
        panic!("did not receive registration response");
    };
    let (body, _) = common::decrypt_request(response.as_str(), &mut ratchet).unwrap();
    let resp: ResponseWrapper = serde_json::from_value(body).unwrap();
    assert_eq!(resp.request_id, register.request_id);
    assert_eq!(resp.body.get("text").and_then(Value::as_str), Some("registered"));
}

#[tokio::test]
async fn test_get_bundle() {
    let (ws_stream, _) = tokio_tungstenite::connect_async(URL)
        .await
        .expect("failed to connect");
    let (mut write, mut read) = ws_stream.split();
    let (mut ratchet, aad, pb, _, _) = connect_and_handshake(&mut write, &mut read).await;

    let username = format!("lucio-{}", Uuid::new_v4());
    let register = wrap_request(json!({
        "action": "register",
        "username": username,
        "bundle": pb.clone().to_base64(),
    }));
    let plaintext = serde_json::to_vec(&register).unwrap();
    let enc_req = common::encrypt_request(&plaintext, &mut ratchet, &aad).unwrap();
    write
        .send(Message::Text(Utf8Bytes::from(enc_req)))
        .await
        .unwrap();
    read.next().await.expect("registration response");

    let get_bundle = wrap_request(json!({
        "action": "get_prekey_bundle",
        "who": username,
    }));
    let plaintext = serde_json::to_vec(&get_bundle).unwrap();
    let enc_req = common::encrypt_request(&plaintext, &mut ratchet, &aad).unwrap();
    write
        .send(Message::Text(Utf8Bytes::from(enc_req)))
        .await
        .unwrap();

    let Some(Ok(Message::Text(response))) = read.next().await else {
        panic!("did not receive bundle response");
    };
    let (body, _) = common::decrypt_request(response.as_str(), &mut ratchet).unwrap();
    let resp: ResponseWrapper = serde_json::from_value(body).unwrap();
    let bundle_b64 = resp.body.get("text").unwrap().as_str().unwrap().to_string();
    let fetched = PreKeyBundle::try_from(bundle_b64).expect("failed to parse prekey bundle");
    assert_eq!(fetched.ik, pb.ik);
}

/// `get_prekey_bundle` must hand out one-time prekeys oldest-first and leave none to
/// give out once the supply is exhausted.
#[tokio::test]
async fn test_get_bundle_drains_one_time_prekeys_fifo() {
    let (ws_stream, _) = tokio_tungstenite::connect_async(URL)
        .await
        .expect("failed to connect");
    let (mut write, mut read) = ws_stream.split();
    let (mut ratchet, aad, _, _, _) = connect_and_handshake(&mut write, &mut read).await;

    let (otpk_bundle, _, _, _) = generate_prekey_bundle_with_otpk(3);
    let expected_otpks = otpk_bundle.otpk.clone();

    let username = format!("otpk-{}", Uuid::new_v4());
    let register = wrap_request(json!({
        "action": "register",
        "username": username,
        "bundle": otpk_bundle.clone().to_base64(),
    }));
    let plaintext = serde_json::to_vec(&register).unwrap();
    let enc_req = common::encrypt_request(&plaintext, &mut ratchet, &aad).unwrap();
    write
        .send(Message::Text(Utf8Bytes::from(enc_req)))
        .await
        .unwrap();
    read.next().await.expect("registration response");

    for expected in &expected_otpks {
        let get_bundle = wrap_request(json!({
            "action": "get_prekey_bundle",
            "who": username,
        }));
        let plaintext = serde_json::to_vec(&get_bundle).unwrap();
        let enc_req = common::encrypt_request(&plaintext, &mut ratchet, &aad).unwrap();
        write
            .send(Message::Text(Utf8Bytes::from(enc_req)))
            .await
            .unwrap();

        let Some(Ok(Message::Text(response))) = read.next().await else {
            panic!("did not receive bundle response");
        };
        let (body, _) = common::decrypt_request(response.as_str(), &mut ratchet).unwrap();
        let resp: ResponseWrapper = serde_json::from_value(body).unwrap();
        let bundle_b64 = resp.body.get("text").unwrap().as_str().unwrap().to_string();
        let fetched = PreKeyBundle::try_from(bundle_b64).expect("failed to parse prekey bundle");
        assert_eq!(
            fetched.otpk,
            vec![expected.clone()],
            "one-time prekeys must be handed out oldest-first"
        );
    }

    let get_bundle = wrap_request(json!({
        "action": "get_prekey_bundle",
        "who": username,
    }));
    let plaintext = serde_json::to_vec(&get_bundle).unwrap();
    let enc_req = common::encrypt_request(&plaintext, &mut ratchet, &aad).unwrap();
    write
        .send(Message::Text(Utf8Bytes::from(enc_req)))
        .await
        .unwrap();

    let Some(Ok(Message::Text(response))) = read.next().await else {
        panic!("did not receive bundle response");
    };
    let (body, _) = common::decrypt_request(response.as_str(), &mut ratchet).unwrap();
    let resp: ResponseWrapper = serde_json::from_value(body).unwrap();
    let bundle_b64 = resp.body.get("text").unwrap().as_str().unwrap().to_string();
    let fetched = PreKeyBundle::try_from(bundle_b64).expect("failed to parse prekey bundle");
    assert!(
        fetched.otpk.is_empty(),
        "one-time prekey must be absent once the supply is exhausted"
    );
}
