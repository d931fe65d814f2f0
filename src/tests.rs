use crate::close::{decode_close_payload, encode_close_payload, CloseCode};
use crate::config::WebSocketConfig;
use crate::connection::{ConnectionState, WebSocket};
use crate::error::Error;
use crate::frame::{OpCode, Role};
use crate::message::MessageKind;
use crate::queue::WriteQueue;
use crate::read::FrameReader;
use crate::write::encode_frame;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Keep-alive off by default so tests control every byte on the wire.
fn quiet_config() -> WebSocketConfig {
    WebSocketConfig {
        keep_alive_interval: Duration::ZERO,
        ..WebSocketConfig::default()
    }
}

fn server(stream: DuplexStream) -> WebSocket<DuplexStream> {
    WebSocket::new(stream, Role::Server, quiet_config())
}

fn client(stream: DuplexStream) -> WebSocket<DuplexStream> {
    WebSocket::new(stream, Role::Client, quiet_config())
}

async fn read_close_frame(peer: &mut DuplexStream) -> (CloseCode, String) {
    let mut header = [0u8; 2];
    peer.read_exact(&mut header).await.unwrap();
    assert_eq!(header[0], 0x88);
    let len = (header[1] & 0x7F) as usize;
    let mut payload = vec![0u8; len];
    peer.read_exact(&mut payload).await.unwrap();
    decode_close_payload(&payload)
}

#[test]
fn test_opcode() {
    let res = OpCode::from(0x0).unwrap();
    assert_eq!(res, OpCode::Continue);

    let opcode = OpCode::Text;
    assert_eq!(opcode.as_u8(), 0x1);

    assert!(OpCode::Close.is_control());
    assert!(!OpCode::Text.is_control());

    // 0x3 through 0x7 and 0xB through 0xF are reserved
    assert!(OpCode::from(0x3).is_err());
    assert!(OpCode::from(0xF).is_err());
}

#[test]
fn test_close_payload_codec() {
    let payload = encode_close_payload(CloseCode::NormalClosure, "bye");
    assert_eq!(payload, vec![0x03, 0xE8, b'b', b'y', b'e']);

    let (code, reason) = decode_close_payload(&payload);
    assert_eq!(code, CloseCode::NormalClosure);
    assert_eq!(reason, "bye");

    // A blank reason collapses to the code alone
    let payload = encode_close_payload(CloseCode::ProtocolError, "   ");
    assert_eq!(payload, vec![0x03, 0xEA]);

    // Fewer than two payload bytes means the peer sent no status
    assert_eq!(
        decode_close_payload(&[]),
        (CloseCode::NoStatusReceived, String::new())
    );
    assert_eq!(
        decode_close_payload(&[0x03]),
        (CloseCode::NoStatusReceived, String::new())
    );
}

#[test]
fn test_close_reason_truncation() {
    let long_reason = "a".repeat(200);
    let payload = encode_close_payload(CloseCode::NormalClosure, &long_reason);
    assert_eq!(payload.len(), 125);

    // Multi-byte chars are cut at a char boundary, never through one
    let accented = "é".repeat(70);
    let payload = encode_close_payload(CloseCode::NormalClosure, &accented);
    assert!(payload.len() <= 125);
    assert!(std::str::from_utf8(&payload[2..]).is_ok());
}

#[test]
fn test_close_code_numeric_mapping() {
    assert_eq!(CloseCode::NormalClosure.as_u16(), 1000);
    assert_eq!(CloseCode::MessageTooBig.as_u16(), 1009);
    assert_eq!(CloseCode::from_u16(1002), CloseCode::ProtocolError);
    assert_eq!(CloseCode::from_u16(1005), CloseCode::NoStatusReceived);
    assert_eq!(CloseCode::from_u16(4000), CloseCode::Other(4000));
    assert_eq!(CloseCode::Other(4000).as_u16(), 4000);
}

#[tokio::test]
async fn test_frame_codec_round_trip() {
    // Lengths covering the base, 16-bit and 64-bit length encodings
    for len in [0usize, 5, 125, 126, 65535, 65536] {
        for role in [Role::Server, Role::Client] {
            let (mut local, peer) = duplex(1 << 20);
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();

            let mut encoded = BytesMut::new();
            encode_frame(OpCode::Binary, &payload, true, role, &mut encoded);

            // Mask bit mirrors the role
            assert_eq!(encoded[1] & 0x80 != 0, role.is_client(), "len {len}");

            local.write_all(&encoded).await.unwrap();

            let (read_half, _write_half) = tokio::io::split(peer);
            let mut reader = FrameReader::new(read_half, false);
            let mut dest = vec![0u8; len.max(1)];
            let frame = reader.read_frame(&mut dest).await.unwrap();

            assert!(frame.final_fragment);
            assert_eq!(frame.opcode, OpCode::Binary);
            assert_eq!(frame.payload_len, len);
            assert_eq!(&dest[..len], &payload[..]);
        }
    }
}

#[tokio::test]
async fn test_reader_rejects_reserved_opcode() {
    let (mut local, peer) = duplex(256);
    local.write_all(&[0x83, 0x00]).await.unwrap();

    let (read_half, _write_half) = tokio::io::split(peer);
    let mut reader = FrameReader::new(read_half, false);
    let mut dest = [0u8; 16];
    assert!(matches!(
        reader.read_frame(&mut dest).await,
        Err(Error::InvalidOpcode)
    ));
}

#[tokio::test]
async fn test_reader_rejects_rsv_bits() {
    let (mut local, peer) = duplex(256);
    // FIN + RSV2 + Text
    local.write_all(&[0xA1, 0x00]).await.unwrap();

    let (read_half, _write_half) = tokio::io::split(peer);
    let mut reader = FrameReader::new(read_half, false);
    let mut dest = [0u8; 16];
    assert!(matches!(
        reader.read_frame(&mut dest).await,
        Err(Error::RSVNotZero)
    ));
}

#[tokio::test]
async fn test_reader_rejects_fragmented_control_frame() {
    let (mut local, peer) = duplex(256);
    // Ping with FIN clear
    local.write_all(&[0x09, 0x00]).await.unwrap();

    let (read_half, _write_half) = tokio::io::split(peer);
    let mut reader = FrameReader::new(read_half, false);
    let mut dest = [0u8; 16];
    assert!(matches!(
        reader.read_frame(&mut dest).await,
        Err(Error::ControlFramesFragmented)
    ));
}

#[tokio::test]
async fn test_reader_rejects_oversize_control_frame() {
    let (mut local, peer) = duplex(256);
    // Ping escaping to the 16-bit length
    local.write_all(&[0x89, 126]).await.unwrap();

    let (read_half, _write_half) = tokio::io::split(peer);
    let mut reader = FrameReader::new(read_half, false);
    let mut dest = [0u8; 256];
    assert!(matches!(
        reader.read_frame(&mut dest).await,
        Err(Error::ControlFramePayloadSize)
    ));
}

#[tokio::test]
async fn test_reader_buffer_overflow() {
    let (mut local, peer) = duplex(256);
    local.write_all(&[0x82, 0x20]).await.unwrap();

    let (read_half, _write_half) = tokio::io::split(peer);
    let mut reader = FrameReader::new(read_half, false);
    let mut dest = [0u8; 16];
    assert!(matches!(
        reader.read_frame(&mut dest).await,
        Err(Error::BufferOverflow(32, 16))
    ));
}

#[tokio::test]
async fn test_reader_unexpected_end() {
    let (mut local, peer) = duplex(256);
    // Header promises 5 payload bytes, the stream delivers 2 and closes
    local.write_all(&[0x82, 0x05, 0xAA, 0xBB]).await.unwrap();
    drop(local);

    let (read_half, _write_half) = tokio::io::split(peer);
    let mut reader = FrameReader::new(read_half, false);
    let mut dest = [0u8; 16];
    assert!(matches!(
        reader.read_frame(&mut dest).await,
        Err(Error::UnexpectedEnd)
    ));
}

// Scenario S1: unfragmented text frame, server role.
#[tokio::test]
async fn test_short_text_echo() {
    init_logs();
    let (local, mut peer) = duplex(4096);
    let ws = server(local);

    peer.write_all(&[0x81, 0x05, 0x48, 0x65, 0x6C, 0x6C, 0x6F])
        .await
        .unwrap();

    let mut buf = [0u8; 64];
    let received = ws.receive(&mut buf, &CancellationToken::new()).await.unwrap();
    assert_eq!(received.count, 5);
    assert_eq!(received.kind, MessageKind::Text);
    assert!(received.end_of_message);
    assert_eq!(&buf[..5], b"Hello");
}

// Scenario S2: masked client-to-server frame.
#[tokio::test]
async fn test_masked_client_frame() {
    let (local, mut peer) = duplex(4096);
    let ws = server(local);

    peer.write_all(&[
        0x81, 0x85, 0x37, 0xFA, 0x21, 0x3D, 0x7F, 0x9F, 0x4D, 0x51, 0x58,
    ])
    .await
    .unwrap();

    let mut buf = [0u8; 64];
    let received = ws.receive(&mut buf, &CancellationToken::new()).await.unwrap();
    assert_eq!(received.count, 5);
    assert_eq!(&buf[..5], b"Hello");
}

// Scenario S3: fragmented binary message, continuation labeled with the
// type the message started with.
#[tokio::test]
async fn test_fragmented_binary() {
    let (local, mut peer) = duplex(4096);
    let ws = server(local);
    let cancel = CancellationToken::new();

    peer.write_all(&[0x02, 0x03, 0xAA, 0xBB, 0xCC]).await.unwrap();
    peer.write_all(&[0x80, 0x02, 0xDD, 0xEE]).await.unwrap();

    let mut buf = [0u8; 64];
    let first = ws.receive(&mut buf, &cancel).await.unwrap();
    assert_eq!(first.count, 3);
    assert_eq!(first.kind, MessageKind::Binary);
    assert!(!first.end_of_message);
    assert_eq!(&buf[..3], &[0xAA, 0xBB, 0xCC]);

    let second = ws.receive(&mut buf, &cancel).await.unwrap();
    assert_eq!(second.count, 2);
    assert_eq!(second.kind, MessageKind::Binary);
    assert!(second.end_of_message);
    assert_eq!(&buf[..2], &[0xDD, 0xEE]);
}

// Scenario S4: pings are answered inside the receive loop and never
// surface to the caller.
#[tokio::test]
async fn test_ping_auto_reply() {
    let (local, mut peer) = duplex(4096);
    let ws = server(local);

    peer.write_all(&[0x89, 0x04, 0x70, 0x69, 0x6E, 0x67]).await.unwrap();
    peer.write_all(&[0x81, 0x02, b'h', b'i']).await.unwrap();

    let mut buf = [0u8; 64];
    let received = ws.receive(&mut buf, &CancellationToken::new()).await.unwrap();
    // The ping was swallowed; the caller sees the text frame behind it
    assert_eq!(received.kind, MessageKind::Text);
    assert_eq!(&buf[..2], b"hi");

    let mut pong = [0u8; 6];
    peer.read_exact(&mut pong).await.unwrap();
    assert_eq!(pong, [0x8A, 0x04, 0x70, 0x69, 0x6E, 0x67]);
}

// Scenario S5: locally initiated close handshake.
#[tokio::test]
async fn test_graceful_close_local() {
    init_logs();
    let (local, mut peer) = duplex(4096);
    let ws = server(local);
    let cancel = CancellationToken::new();

    ws.close(CloseCode::NormalClosure, "bye", &cancel).await.unwrap();
    assert_eq!(ws.state(), ConnectionState::CloseSent);

    let mut wire = [0u8; 7];
    peer.read_exact(&mut wire).await.unwrap();
    assert_eq!(wire, [0x88, 0x05, 0x03, 0xE8, 0x62, 0x79, 0x65]);

    // Peer acknowledges with a bare status
    peer.write_all(&[0x88, 0x02, 0x03, 0xE8]).await.unwrap();

    let mut buf = [0u8; 64];
    let received = ws.receive(&mut buf, &cancel).await.unwrap();
    assert_eq!(received.kind, MessageKind::Close);
    assert_eq!(received.count, 2);
    assert_eq!(received.close_status, Some(CloseCode::NormalClosure));
    assert_eq!(received.close_reason.as_deref(), Some(""));
    assert_eq!(ws.state(), ConnectionState::Closed);
    assert_eq!(ws.close_status(), Some(CloseCode::NormalClosure));

    // The handshake is done; further receives report the terminal state
    assert!(matches!(
        ws.receive(&mut buf, &cancel).await,
        Err(Error::InvalidState(ConnectionState::Closed))
    ));
}

// Remote-initiated close: the received payload is echoed back.
#[tokio::test]
async fn test_graceful_close_remote() {
    let (local, mut peer) = duplex(4096);
    let ws = server(local);

    peer.write_all(&[0x88, 0x02, 0x03, 0xE8]).await.unwrap();

    let mut buf = [0u8; 64];
    let received = ws.receive(&mut buf, &CancellationToken::new()).await.unwrap();
    assert_eq!(received.kind, MessageKind::Close);
    assert_eq!(received.close_status, Some(CloseCode::NormalClosure));
    assert_eq!(ws.state(), ConnectionState::Closed);

    let (code, reason) = read_close_frame(&mut peer).await;
    assert_eq!(code, CloseCode::NormalClosure);
    assert_eq!(reason, "");
}

// Scenario S6: 64-bit extended length with the high bit set.
#[tokio::test]
async fn test_oversize_declared_length() {
    let (local, mut peer) = duplex(4096);
    let ws = server(local);

    let mut frame = vec![0x82, 0x7F];
    frame.extend_from_slice(&[0x80, 0, 0, 0, 0, 0, 0, 0]);
    peer.write_all(&frame).await.unwrap();

    let mut buf = [0u8; 64];
    let err = ws
        .receive(&mut buf, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PayloadLengthOutOfRange));

    // The peer learns why, within the auto-close bound
    let (code, _reason) = timeout(Duration::from_secs(3), read_close_frame(&mut peer))
        .await
        .unwrap();
    assert_eq!(code, CloseCode::ProtocolError);
    assert!(ws.state().is_terminal());
}

#[tokio::test]
async fn test_receive_cancellation_closes_output() {
    let (local, mut peer) = duplex(4096);
    let ws = server(local);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut buf = [0u8; 64];
    let err = ws.receive(&mut buf, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    let (code, _reason) = read_close_frame(&mut peer).await;
    assert_eq!(code, CloseCode::EndpointUnavailable);
    assert_eq!(ws.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_send_fragmented_uses_continuation_opcode() {
    let (local, mut peer) = duplex(4096);
    let ws = server(local);
    let cancel = CancellationToken::new();

    ws.send(b"he", MessageKind::Text, false, &cancel).await.unwrap();
    ws.send(b"llo", MessageKind::Text, true, &cancel).await.unwrap();
    ws.send(b"!", MessageKind::Text, true, &cancel).await.unwrap();

    let mut wire = [0u8; 12];
    peer.read_exact(&mut wire).await.unwrap();
    // Text without FIN, Continue with FIN, then a fresh Text frame
    assert_eq!(&wire[..4], &[0x01, 0x02, b'h', b'e']);
    assert_eq!(&wire[4..9], &[0x80, 0x03, b'l', b'l', b'o']);
    assert_eq!(&wire[9..], &[0x81, 0x01, b'!']);
}

#[tokio::test]
async fn test_client_sends_masked_frames() {
    let (local, mut peer) = duplex(4096);
    let ws = client(local);

    ws.send(b"Hello", MessageKind::Text, true, &CancellationToken::new())
        .await
        .unwrap();

    let mut wire = [0u8; 11];
    peer.read_exact(&mut wire).await.unwrap();
    assert_eq!(wire[0], 0x81);
    assert_eq!(wire[1], 0x85);

    let mask = [wire[2], wire[3], wire[4], wire[5]];
    let unmasked: Vec<u8> = wire[6..]
        .iter()
        .enumerate()
        .map(|(i, byte)| byte ^ mask[i % 4])
        .collect();
    assert_eq!(unmasked, b"Hello");
}

#[tokio::test]
async fn test_send_rejects_close_kind() {
    let (local, _peer) = duplex(4096);
    let ws = server(local);

    let err = ws
        .send(b"", MessageKind::Close, true, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CloseViaSend));
}

#[tokio::test]
async fn test_ping_payload_limit() {
    let (local, _peer) = duplex(4096);
    let ws = server(local);

    let oversize = [0u8; 126];
    let err = ws
        .send_ping(&oversize, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ControlFramePayloadSize));
}

#[tokio::test]
async fn test_write_queue_fifo_under_contention() {
    let (local, mut peer) = duplex(1 << 20);
    let (_read_half, write_half) = tokio::io::split(local);
    let queue = WriteQueue::start(write_half);

    let producers = 4u8;
    let per_producer = 25u8;
    let mut handles = Vec::new();
    for producer in 0..producers {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            for seq in 0..per_producer {
                queue.send(Bytes::from(vec![producer, seq])).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let total = producers as usize * per_producer as usize * 2;
    let mut wire = vec![0u8; total];
    peer.read_exact(&mut wire).await.unwrap();

    // Interleaving across producers is fine; reordering within one is not
    let mut next = [0u8; 4];
    for pair in wire.chunks(2) {
        let producer = pair[0] as usize;
        assert_eq!(pair[1], next[producer]);
        next[producer] += 1;
    }
    assert!(next.iter().all(|&count| count == per_producer));
}

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let (local, mut peer) = duplex(4096);
    let ws = server(local);
    let cancel = CancellationToken::new();

    ws.dispose().await;
    assert_eq!(ws.state(), ConnectionState::Closed);

    let (code, _reason) = read_close_frame(&mut peer).await;
    assert_eq!(code, CloseCode::EndpointUnavailable);

    // Second dispose is a no-op, and public operations report the
    // terminal state
    ws.dispose().await;
    let mut buf = [0u8; 16];
    assert!(matches!(
        ws.receive(&mut buf, &cancel).await,
        Err(Error::InvalidState(ConnectionState::Closed))
    ));
    assert!(matches!(
        ws.send(b"x", MessageKind::Binary, true, &cancel).await,
        Err(Error::InvalidState(ConnectionState::Closed))
    ));
    assert!(matches!(
        ws.close(CloseCode::NormalClosure, "", &cancel).await,
        Err(Error::InvalidState(ConnectionState::Closed))
    ));
}

#[tokio::test]
async fn test_abort_is_terminal_and_silent() {
    let (local, mut peer) = duplex(4096);
    let ws = server(local);

    ws.abort();
    assert_eq!(ws.state(), ConnectionState::Aborted);

    // No close frame goes out on abort
    ws.dispose().await;
    let mut end = [0u8; 1];
    assert_eq!(peer.read(&mut end).await.unwrap(), 0);
}

#[tokio::test]
async fn test_keep_alive_pings() {
    let (local, mut peer) = duplex(4096);
    let config = WebSocketConfig {
        keep_alive_interval: Duration::from_millis(25),
        ..WebSocketConfig::default()
    };
    let _ws = WebSocket::new(local, Role::Server, config);

    let mut header = [0u8; 2];
    timeout(Duration::from_secs(1), peer.read_exact(&mut header))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(header, [0x89, 0x08]);

    let mut payload = [0u8; 8];
    peer.read_exact(&mut payload).await.unwrap();
    assert_eq!(u64::from_be_bytes(payload), 1);
}

#[tokio::test]
async fn test_pong_observer_gets_payload() {
    let (local, mut peer) = duplex(4096);
    let ws = server(local);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    ws.on_pong(move |payload| {
        let _ = tx.send(payload.to_vec());
    });

    peer.write_all(&[0x8A, 0x03, b'a', b'b', b'c']).await.unwrap();
    peer.write_all(&[0x81, 0x01, b'x']).await.unwrap();

    let mut buf = [0u8; 16];
    let received = ws.receive(&mut buf, &CancellationToken::new()).await.unwrap();
    assert_eq!(received.kind, MessageKind::Text);

    assert_eq!(rx.recv().await.unwrap(), b"abc");
}

#[tokio::test]
async fn test_permessage_deflate_recorded_not_applied() {
    let (local, mut peer) = duplex(4096);
    let config = WebSocketConfig {
        keep_alive_interval: Duration::ZERO,
        negotiated_extensions: Some(String::from(
            "permessage-deflate; client_max_window_bits=12",
        )),
        ..WebSocketConfig::default()
    };
    let ws = WebSocket::new(local, Role::Server, config);
    assert!(ws.permessage_deflate());

    // Outbound frames still carry RSV1 = 0
    ws.send(b"hi", MessageKind::Text, true, &CancellationToken::new())
        .await
        .unwrap();
    let mut wire = [0u8; 4];
    peer.read_exact(&mut wire).await.unwrap();
    assert_eq!(wire[0], 0x81);
}
