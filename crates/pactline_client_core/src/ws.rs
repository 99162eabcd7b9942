use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use futures_util::{Sink, SinkExt as _, Stream, StreamExt as _};
use pactline_protocol::{
	DEFAULT_MAX_FRAME_SIZE, FramingError, HandshakeRequest, HandshakeResponse, HubMessage, encode_frame,
	try_decode_frame_from_buffer,
};
use pactline_util::endpoint::HubEndpoint;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::api::{HubConnector, HubLink, HubSession, Inbound};
use crate::settings::ClientSettings;
use crate::{ClientCoreError, SecretString};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, ClientCoreError>>>>>;

/// Websocket transport tuning.
#[derive(Debug, Clone)]
pub struct WsConfig {
	/// Timeout for connect + handshake.
	pub connect_timeout: Duration,
	/// Timeout for a single invocation's completion.
	pub invocation_timeout: Duration,
	/// Interval of client keepalive pings.
	pub keepalive_interval: Duration,
	/// Silence after which the server is considered gone.
	pub server_timeout: Duration,
	/// Maximum inbound/outbound record size.
	pub max_frame_bytes: usize,
	/// Depth of the inbound event channel.
	pub inbound_capacity: usize,
}

impl Default for WsConfig {
	fn default() -> Self {
		Self {
			connect_timeout: Duration::from_secs(15),
			invocation_timeout: Duration::from_secs(30),
			keepalive_interval: Duration::from_secs(15),
			server_timeout: Duration::from_secs(30),
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			inbound_capacity: 1024,
		}
	}
}

impl WsConfig {
	pub fn from_settings(settings: &ClientSettings) -> Self {
		Self {
			connect_timeout: settings.connect_timeout,
			invocation_timeout: settings.invocation_timeout,
			max_frame_bytes: settings.max_frame_bytes,
			..Self::default()
		}
	}
}

/// `HubConnector` over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsHubConnector {
	cfg: WsConfig,
}

impl WsHubConnector {
	pub fn new(cfg: WsConfig) -> Self {
		Self { cfg }
	}
}

#[async_trait::async_trait]
impl HubConnector for WsHubConnector {
	async fn connect(
		&self,
		endpoint: &HubEndpoint,
		access_token: Option<&SecretString>,
	) -> Result<HubSession, ClientCoreError> {
		let cfg = &self.cfg;
		let url = endpoint.connect_url(access_token.map(SecretString::expose));

		info!(endpoint = %endpoint, "connecting to hub");
		let (ws, _) = tokio::time::timeout(cfg.connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
			.await
			.map_err(|_| ClientCoreError::Connect(format!("connect timeout after {:?} ({endpoint})", cfg.connect_timeout)))?
			.map_err(|e| ClientCoreError::Connect(format!("{endpoint}: {e}")))?;

		let (mut sink, mut stream) = ws.split();

		let handshake = frame_text(encode_frame(&HandshakeRequest::default(), cfg.max_frame_bytes)?)?;
		sink.send(Message::text(handshake))
			.await
			.map_err(|e| ClientCoreError::Handshake(format!("send handshake: {e}")))?;

		let mut buf = BytesMut::new();
		let response = tokio::time::timeout(cfg.connect_timeout, read_handshake(&mut stream, &mut buf, cfg.max_frame_bytes))
			.await
			.map_err(|_| ClientCoreError::Handshake(format!("no handshake response after {:?}", cfg.connect_timeout)))??;

		if let Some(err) = response.error {
			return Err(ClientCoreError::Handshake(err));
		}
		debug!(endpoint = %endpoint, "hub handshake accepted");

		let ping = frame_text(encode_frame(&HubMessage::Ping, cfg.max_frame_bytes)?)?;

		let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
		let (inbound_tx, inbound_rx) = mpsc::channel(cfg.inbound_capacity.max(1));
		let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
		let closed = Arc::new(AtomicBool::new(false));

		tokio::spawn(write_loop(sink, out_rx, cfg.keepalive_interval, ping.clone()));
		tokio::spawn(
			Reader {
				stream,
				buf,
				max_frame_bytes: cfg.max_frame_bytes,
				server_timeout: cfg.server_timeout,
				inbound: inbound_tx,
				out: out_tx.clone(),
				ping,
				pending: pending.clone(),
				closed: closed.clone(),
			}
			.run(),
		);

		let link = WsHubLink {
			out: out_tx,
			pending,
			next_id: AtomicU64::new(1),
			closed,
			invocation_timeout: cfg.invocation_timeout,
			max_frame_bytes: cfg.max_frame_bytes,
		};

		Ok(HubSession {
			link: Arc::new(link),
			inbound: inbound_rx,
		})
	}
}

struct WsHubLink {
	out: mpsc::UnboundedSender<Message>,
	pending: PendingMap,
	next_id: AtomicU64,
	closed: Arc<AtomicBool>,
	invocation_timeout: Duration,
	max_frame_bytes: usize,
}

impl WsHubLink {
	fn push(&self, msg: &HubMessage) -> Result<(), ClientCoreError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(ClientCoreError::Closed("link closed".to_string()));
		}
		let text = frame_text(encode_frame(msg, self.max_frame_bytes)?)?;
		self.out
			.send(Message::text(text))
			.map_err(|_| ClientCoreError::Closed("writer stopped".to_string()))
	}
}

#[async_trait::async_trait]
impl HubLink for WsHubLink {
	async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Value, ClientCoreError> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id.clone(), tx);

		if let Err(e) = self.push(&HubMessage::invocation(Some(id.clone()), target, arguments)) {
			self.pending.lock().remove(&id);
			return Err(e);
		}

		let outcome = tokio::time::timeout(self.invocation_timeout, rx).await;
		match outcome {
			Ok(Ok(Ok(value))) => Ok(value),
			Ok(Ok(Err(ClientCoreError::Remote { message, .. }))) => Err(ClientCoreError::Remote {
				target: target.to_string(),
				message,
			}),
			Ok(Ok(Err(e))) => Err(e),
			Ok(Err(_)) => Err(ClientCoreError::Closed(format!("{target}: connection dropped before completion"))),
			Err(_) => {
				self.pending.lock().remove(&id);
				Err(ClientCoreError::Timeout(format!(
					"{target}: no completion after {:?}",
					self.invocation_timeout
				)))
			}
		}
	}

	async fn send(&self, target: &str, arguments: Vec<Value>) -> Result<(), ClientCoreError> {
		self.push(&HubMessage::invocation(None, target, arguments))
	}

	fn close(&self, reason: &str) {
		if self.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		debug!(reason, "closing hub link");
		let _ = self.out.send(Message::Close(None));
		fail_pending(&self.pending, reason);
	}
}

async fn read_handshake<S>(stream: &mut S, buf: &mut BytesMut, max_frame_bytes: usize) -> Result<HandshakeResponse, ClientCoreError>
where
	S: Stream<Item = Result<Message, WsError>> + Unpin,
{
	loop {
		if let Some(resp) = try_decode_frame_from_buffer::<HandshakeResponse>(buf, max_frame_bytes)? {
			return Ok(resp);
		}

		match stream.next().await {
			Some(Ok(msg)) => {
				if let Incoming::Close(reason) = absorb(buf, msg) {
					return Err(ClientCoreError::Handshake(format!(
						"closed during handshake: {}",
						reason.unwrap_or_else(|| "no reason".to_string())
					)));
				}
			}
			Some(Err(e)) => return Err(ClientCoreError::Handshake(format!("read handshake: {e}"))),
			None => return Err(ClientCoreError::Handshake("socket ended during handshake".to_string())),
		}
	}
}

async fn write_loop<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Message>, keepalive: Duration, ping: String)
where
	S: Sink<Message, Error = WsError> + Unpin,
{
	let mut ticker = tokio::time::interval(keepalive);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	ticker.tick().await;

	loop {
		tokio::select! {
			msg = rx.recv() => {
				let Some(msg) = msg else {
					break;
				};
				let closing = matches!(msg, Message::Close(_));
				if let Err(e) = sink.send(msg).await {
					debug!(error = %e, "hub write failed");
					break;
				}
				if closing {
					break;
				}
			}
			_ = ticker.tick() => {
				if let Err(e) = sink.send(Message::text(ping.clone())).await {
					debug!(error = %e, "hub keepalive failed");
					break;
				}
			}
		}
	}

	let _ = sink.close().await;
}

struct Reader<S> {
	stream: S,
	buf: BytesMut,
	max_frame_bytes: usize,
	server_timeout: Duration,
	inbound: mpsc::Sender<Inbound>,
	out: mpsc::UnboundedSender<Message>,
	ping: String,
	pending: PendingMap,
	closed: Arc<AtomicBool>,
}

enum Flow {
	Continue,
	Stop { error: Option<String>, allow_reconnect: bool },
}

impl<S> Reader<S>
where
	S: Stream<Item = Result<Message, WsError>> + Unpin,
{
	async fn run(mut self) {
		let (error, allow_reconnect) = self.read_until_closed().await;

		let locally_closed = self.closed.swap(true, Ordering::AcqRel);
		fail_pending(&self.pending, error.as_deref().unwrap_or("connection closed"));

		if locally_closed {
			debug!("hub reader stopped after local close");
		} else {
			info!(error = ?error, allow_reconnect, "hub connection closed");
			let _ = self.out.send(Message::Close(None));
		}

		let _ = self
			.inbound
			.send(Inbound::Closed {
				error,
				allow_reconnect: allow_reconnect && !locally_closed,
			})
			.await;
	}

	async fn read_until_closed(&mut self) -> (Option<String>, bool) {
		loop {
			loop {
				match try_decode_frame_from_buffer::<HubMessage>(&mut self.buf, self.max_frame_bytes) {
					Ok(Some(msg)) => {
						if let Flow::Stop { error, allow_reconnect } = self.handle(msg).await {
							return (error, allow_reconnect);
						}
					}
					Ok(None) => break,
					Err(FramingError::FrameTooLarge { len, max }) => {
						return (Some(format!("inbound record too large: len={len} max={max}")), true);
					}
					Err(e) => {
						warn!(error = %e, "dropping undecodable hub record");
					}
				}
			}

			let next = match tokio::time::timeout(self.server_timeout, self.stream.next()).await {
				Ok(next) => next,
				Err(_) => {
					return (
						Some(format!("no message from server within {:?}", self.server_timeout)),
						true,
					);
				}
			};

			match next {
				Some(Ok(msg)) => {
					if let Incoming::Close(reason) = absorb(&mut self.buf, msg) {
						return (reason, true);
					}
				}
				Some(Err(e)) => return (Some(format!("websocket error: {e}")), true),
				None => return (Some("websocket stream ended".to_string()), true),
			}
		}
	}

	async fn handle(&mut self, msg: HubMessage) -> Flow {
		match msg {
			HubMessage::Invocation { target, arguments, .. } => {
				if self.inbound.send(Inbound::Event { target, arguments }).await.is_err() {
					debug!("inbound receiver dropped; stopping hub reader");
					return Flow::Stop {
						error: None,
						allow_reconnect: false,
					};
				}
			}
			HubMessage::Completion {
				invocation_id,
				result,
				error,
			} => {
				let waiter = self.pending.lock().remove(&invocation_id);
				match waiter {
					Some(tx) => {
						let outcome = match error {
							Some(message) => Err(ClientCoreError::Remote {
								target: String::new(),
								message,
							}),
							None => Ok(result.unwrap_or(Value::Null)),
						};
						let _ = tx.send(outcome);
					}
					None => debug!(invocation_id = %invocation_id, "completion for unknown invocation"),
				}
			}
			HubMessage::Ping => {
				let _ = self.out.send(Message::text(self.ping.clone()));
			}
			HubMessage::Close { error, allow_reconnect } => {
				return Flow::Stop { error, allow_reconnect };
			}
			HubMessage::Unsupported { kind } => {
				debug!(kind, "ignoring unsupported hub message");
			}
		}
		Flow::Continue
	}
}

enum Incoming {
	Data,
	Close(Option<String>),
}

fn absorb(buf: &mut BytesMut, msg: Message) -> Incoming {
	match msg {
		Message::Text(text) => {
			buf.extend_from_slice(text.as_str().as_bytes());
			Incoming::Data
		}
		Message::Binary(bytes) => {
			buf.extend_from_slice(&bytes);
			Incoming::Data
		}
		Message::Close(frame) => Incoming::Close(
			frame
				.map(|f| f.reason.as_str().to_string())
				.filter(|r| !r.is_empty()),
		),
		// Websocket-level ping/pong is answered by tungstenite.
		_ => Incoming::Data,
	}
}

fn fail_pending(pending: &PendingMap, reason: &str) {
	let waiters: Vec<_> = pending.lock().drain().collect();
	for (_, tx) in waiters {
		let _ = tx.send(Err(ClientCoreError::Closed(reason.to_string())));
	}
}

fn frame_text(frame: Vec<u8>) -> Result<String, ClientCoreError> {
	String::from_utf8(frame).map_err(|e| ClientCoreError::Protocol(format!("non-utf8 record: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn absorb_appends_text_and_binary() {
		let mut buf = BytesMut::new();
		assert!(matches!(absorb(&mut buf, Message::text("{}\u{1e}")), Incoming::Data));
		assert!(matches!(
			absorb(&mut buf, Message::Binary(bytes::Bytes::from_static(b"{\"type\":6}\x1e"))),
			Incoming::Data
		));

		let first = try_decode_frame_from_buffer::<HandshakeResponse>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
			.expect("ok")
			.expect("some");
		assert!(first.error.is_none());

		let second = try_decode_frame_from_buffer::<HubMessage>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
			.expect("ok")
			.expect("some");
		assert_eq!(second, HubMessage::Ping);
	}

	#[test]
	fn close_without_reason_has_no_error() {
		let mut buf = BytesMut::new();
		assert!(matches!(absorb(&mut buf, Message::Close(None)), Incoming::Close(None)));
	}

	#[tokio::test]
	async fn fail_pending_wakes_waiters() {
		let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
		let (tx, rx) = oneshot::channel();
		pending.lock().insert("1".to_string(), tx);

		fail_pending(&pending, "bye");

		match rx.await.expect("sent") {
			Err(ClientCoreError::Closed(reason)) => assert_eq!(reason, "bye"),
			other => panic!("unexpected outcome: {other:?}"),
		}
		assert!(pending.lock().is_empty());
	}
}
