use bytes::BytesMut;
use pactline_protocol::{
	DEFAULT_MAX_FRAME_SIZE, FramingError, HandshakeRequest, HandshakeResponse, HubMessage, RECORD_SEPARATOR,
	decode_frame, encode_frame, encode_frame_default, encode_frame_into, try_decode_frame_from_buffer,
};
use serde_json::json;

#[test]
fn handshake_request_wire_shape() {
	let frame = encode_frame_default(&HandshakeRequest::default()).expect("encode");
	assert_eq!(frame, b"{\"protocol\":\"json\",\"version\":1}\x1e".to_vec());
}

#[test]
fn empty_handshake_response_is_success() {
	let (resp, used) = decode_frame::<HandshakeResponse>(b"{}\x1e", DEFAULT_MAX_FRAME_SIZE).expect("decode");
	assert_eq!(used, 3);
	assert!(resp.error.is_none());

	let (resp, _) =
		decode_frame::<HandshakeResponse>(b"{\"error\":\"bad protocol\"}\x1e", DEFAULT_MAX_FRAME_SIZE).expect("decode");
	assert_eq!(resp.error.as_deref(), Some("bad protocol"));
}

#[test]
fn decode_requires_separator() {
	let err = decode_frame::<HubMessage>(b"{\"type\":6}", DEFAULT_MAX_FRAME_SIZE).unwrap_err();
	match err {
		FramingError::Incomplete { have } => assert_eq!(have, 10),
		other => panic!("unexpected error: {other:?}"),
	}
}

#[test]
fn try_decode_from_buffer_incremental() {
	let msg = HubMessage::invocation(None, "ReceiveMessage", vec![json!({"id": "m1"})]);
	let frame = encode_frame_default(&msg).expect("encode");

	let mut buf = BytesMut::new();

	buf.extend_from_slice(&frame[..5]);
	assert!(
		try_decode_frame_from_buffer::<HubMessage>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
			.expect("ok")
			.is_none()
	);

	buf.extend_from_slice(&frame[5..]);
	let decoded = try_decode_frame_from_buffer::<HubMessage>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("some");

	assert_eq!(decoded, msg);
	assert!(buf.is_empty());
}

#[test]
fn several_records_in_one_chunk() {
	let mut buf = BytesMut::new();
	encode_frame_into(&mut buf, &HubMessage::Ping, DEFAULT_MAX_FRAME_SIZE).expect("ping");
	encode_frame_into(
		&mut buf,
		&HubMessage::Completion {
			invocation_id: "1".to_string(),
			result: None,
			error: None,
		},
		DEFAULT_MAX_FRAME_SIZE,
	)
	.expect("completion");

	let first = try_decode_frame_from_buffer::<HubMessage>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("some");
	assert_eq!(first, HubMessage::Ping);

	let second = try_decode_frame_from_buffer::<HubMessage>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("some");
	assert!(matches!(second, HubMessage::Completion { .. }));
	assert!(buf.is_empty());
}

#[test]
fn malformed_record_is_consumed() {
	let mut buf = BytesMut::new();
	buf.extend_from_slice(b"{not json}");
	buf.extend_from_slice(&[RECORD_SEPARATOR]);
	encode_frame_into(&mut buf, &HubMessage::Ping, DEFAULT_MAX_FRAME_SIZE).expect("ping");

	let err = try_decode_frame_from_buffer::<HubMessage>(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
	assert!(matches!(err, FramingError::Json(_)));

	let next = try_decode_frame_from_buffer::<HubMessage>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("some");
	assert_eq!(next, HubMessage::Ping);
}

#[test]
fn encode_rejects_too_large() {
	let msg = HubMessage::invocation(None, "SendMessage", vec![json!("a".repeat(10_000))]);

	let err = encode_frame(&msg, 32).unwrap_err();
	match err {
		FramingError::FrameTooLarge { len, max } => {
			assert!(len > max);
		}
		other => panic!("unexpected error: {other:?}"),
	}
}

#[test]
fn unterminated_oversized_buffer_is_rejected() {
	let mut buf = BytesMut::new();
	buf.extend_from_slice(&vec![b'x'; 64]);

	let err = try_decode_frame_from_buffer::<HubMessage>(&mut buf, 32).unwrap_err();
	match err {
		FramingError::FrameTooLarge { .. } => {}
		other => panic!("unexpected error: {other:?}"),
	}
}
