// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::core::frame::{decode, encode, DecodedMessage};
use crate::error::ProtocolError;
use crate::protocol::command::CommandCode;
use crate::protocol::handshake::*;
use crate::utils::crypto::{hmac_sha256, CipherKey};

const LOCAL_KEY: &[u8; 16] = b"0123456789abcdef";

fn key() -> CipherKey {
    CipherKey::from_slice(LOCAL_KEY).unwrap()
}

/// Seal a payload and open it again as the peer would see it
fn over_the_wire(seqno: u32, cmd: CommandCode, payload: &[u8], key: &CipherKey) -> DecodedMessage {
    let frame = encode(seqno, cmd.code(), payload, key).unwrap();
    decode(&frame, key).unwrap()
}

#[test]
fn test_handshake_flow() {
    let mut client = ClientHandshakeState::with_nonce(key(), *LOCAL_KEY);
    let mut device = DeviceHandshakeState::with_nonce(key(), std::array::from_fn(|i| i as u8));

    // =================== Step 1: Client start ===================
    let start = client.start().expect("start should succeed");
    assert_eq!(start, LOCAL_KEY);
    assert_eq!(client.state(), HandshakeState::AwaitingResponse);

    // =================== Step 2: Device responds ===================
    let start_msg = over_the_wire(2, CommandCode::SessKeyNegStart, &start, &key());
    let resp = device.respond(&start_msg).expect("device should respond");
    assert_eq!(resp.len(), RESPONSE_MIN_LEN);
    assert_eq!(&resp[4..20], &std::array::from_fn::<u8, 16, _>(|i| i as u8));

    // =================== Step 3: Client verifies and finishes ===================
    let resp_msg = over_the_wire(1, CommandCode::SessKeyNegResp, &resp, &key());
    client.verify_response(&resp_msg).expect("device proof should verify");
    assert_eq!(client.state(), HandshakeState::KeyConfirmed);

    let (finish, client_key) = client.finish().expect("finish should succeed");
    assert_eq!(client.state(), HandshakeState::Derived);

    // =================== Step 4: Device finalizes ===================
    let finish_msg = over_the_wire(3, CommandCode::SessKeyNegFinish, &finish, &key());
    let device_key = device.finalize(&finish_msg).expect("client proof should verify");

    assert_eq!(client_key, device_key, "both sides must derive the same key");
    assert_eq!(
        client_key.as_bytes(),
        hex::decode("52723dcb1e501db933331c8debb3c89a").unwrap()
    );
}

#[test]
fn test_response_hmac_is_recorded_value() {
    let mut device = DeviceHandshakeState::with_nonce(key(), [0u8; 16]);
    let start_msg = over_the_wire(2, CommandCode::SessKeyNegStart, LOCAL_KEY, &key());
    let resp = device.respond(&start_msg).unwrap();
    assert_eq!(
        hex::encode(&resp[20..52]),
        "fb5b26229c20b7ed866706a2fbfae67e3f404bb6abe77ff45063a459a42924a4"
    );
}

#[test]
fn test_forged_response_hmac_is_rejected() {
    let mut client = ClientHandshakeState::new(key());
    client.start().unwrap();

    let mut forged = vec![0u8; RESPONSE_MIN_LEN];
    forged[4..20].copy_from_slice(&[9u8; 16]);
    let wrong_key = CipherKey::from_slice(b"fedcba9876543210").unwrap();
    let tag = hmac_sha256(&wrong_key, client.local_nonce()).unwrap();
    forged[20..52].copy_from_slice(&tag);

    let msg = over_the_wire(1, CommandCode::SessKeyNegResp, &forged, &key());
    let err = client.verify_response(&msg).unwrap_err();
    assert!(matches!(err, ProtocolError::HandshakeAuthFailed(_)));
    assert_eq!(client.state(), HandshakeState::Failed);

    // A failed run cannot be finished
    assert!(matches!(
        client.finish(),
        Err(ProtocolError::HandshakeOutOfOrder {
            attempted: HandshakeStep::Finish
        })
    ));
}

#[test]
fn test_short_response_is_malformed() {
    let mut client = ClientHandshakeState::new(key());
    client.start().unwrap();

    let msg = over_the_wire(1, CommandCode::SessKeyNegResp, &[0u8; 51], &key());
    assert!(matches!(
        client.verify_response(&msg),
        Err(ProtocolError::MalformedPayload(_))
    ));
    assert_eq!(client.state(), HandshakeState::Failed);
}

#[test]
fn test_wrong_response_command_is_rejected() {
    let mut client = ClientHandshakeState::new(key());
    client.start().unwrap();

    let msg = over_the_wire(1, CommandCode::ControlNew, &[0u8; 52], &key());
    assert!(matches!(
        client.verify_response(&msg),
        Err(ProtocolError::UnexpectedCommand {
            expected: 4,
            actual: 13
        })
    ));
}

#[test]
fn test_out_of_order_steps() {
    let mut client = ClientHandshakeState::new(key());
    assert!(matches!(
        client.finish(),
        Err(ProtocolError::HandshakeOutOfOrder {
            attempted: HandshakeStep::Finish
        })
    ));
    assert_eq!(client.state(), HandshakeState::Failed);

    let mut client = ClientHandshakeState::new(key());
    client.start().unwrap();
    assert!(matches!(
        client.start(),
        Err(ProtocolError::HandshakeOutOfOrder {
            attempted: HandshakeStep::Start
        })
    ));
}

#[test]
fn test_device_rejects_forged_finish() {
    let mut client = ClientHandshakeState::new(key());
    let mut device = DeviceHandshakeState::new(key());

    let start = client.start().unwrap();
    let start_msg = over_the_wire(2, CommandCode::SessKeyNegStart, &start, &key());
    device.respond(&start_msg).unwrap();

    let bogus = over_the_wire(3, CommandCode::SessKeyNegFinish, &[0u8; 32], &key());
    assert!(matches!(
        device.finalize(&bogus),
        Err(ProtocolError::HandshakeAuthFailed(_))
    ));
}

#[test]
fn test_device_rejects_finish_before_start() {
    let mut device = DeviceHandshakeState::new(key());
    let msg = over_the_wire(3, CommandCode::SessKeyNegFinish, &[0u8; 32], &key());
    assert!(matches!(
        device.finalize(&msg),
        Err(ProtocolError::HandshakeOutOfOrder { .. })
    ));
}
