#![forbid(unsafe_code)]

pub mod frames;
pub mod framing;
pub mod hub;
pub mod mapper;

pub use frames::{MessageFrame, OutgoingMessageFrame, PresenceFrame, TypingFrame};
pub use framing::{
	DEFAULT_MAX_FRAME_SIZE, FramingError, RECORD_SEPARATOR, decode_frame, encode_frame, encode_frame_default,
	encode_frame_into, try_decode_frame_from_buffer,
};
pub use hub::{HandshakeRequest, HandshakeResponse, HubMessage};
pub use mapper::{
	HubEvent, MappingContext, MappingError, MessageIntent, PresenceEvent, PresenceKind, SYSTEM_AUTHOR_ID,
	TypingEvent, parse_hub_event, room_arguments, to_domain_message, to_outgoing_frame,
};

/// Hub method names (client → server).
pub mod methods {
	pub const JOIN_ROOM: &str = "JoinRoom";
	pub const LEAVE_ROOM: &str = "LeaveRoom";
	pub const SEND_MESSAGE: &str = "SendMessage";
	pub const START_TYPING: &str = "StartTyping";
	pub const STOP_TYPING: &str = "StopTyping";
}

/// Hub event names (server → client).
pub mod events {
	pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
	pub const USER_TYPING: &str = "UserTyping";
	pub const USER_JOINED: &str = "UserJoined";
	pub const USER_LEFT: &str = "UserLeft";
	pub const ERROR: &str = "Error";
}

/// Protocol version constants.
pub mod version {
	/// Hub protocol name sent in the handshake.
	pub const PROTOCOL_NAME: &str = "json";
	/// Hub protocol version sent in the handshake.
	pub const PROTOCOL_VERSION: u32 = 1;
}
