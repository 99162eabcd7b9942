#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use pactline_client_core::{ClientCoreError, HubConnector, HubLink, HubSession, Inbound, SecretString};
use pactline_domain::{Author, AuthorKind, Message, MessageId, MessageKind, Page, PageRequest, RoomKey};
use pactline_protocol::{MappingContext, events, methods};
use pactline_sync::{
	ApiError, ConnectionManager, ManagerOptions, MessageSource, ReconnectSchedule, StaticToken,
};
use pactline_util::endpoint::{DEFAULT_HUB_PATH, HubEndpoint};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

static LOG_INIT: OnceLock<()> = OnceLock::new();

pub fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("PACTLINE_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

pub const WAIT: Duration = Duration::from_secs(2);

/// Poll `check` until it holds or the wait budget runs out.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
	let deadline = tokio::time::Instant::now() + WAIT;
	while !check() {
		assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
}

pub fn room(s: &str) -> RoomKey {
	RoomKey::parse(s).expect("room key")
}

/// In-process stand-in for the realtime hub.
#[derive(Clone, Default)]
pub struct FakeHub {
	state: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
	connects: usize,
	failing_connects: usize,
	connect_gate: Option<oneshot::Receiver<()>>,
	sessions: Vec<FakeSession>,
	invocations: Vec<(String, Vec<Value>)>,
	sends: Vec<(String, Vec<Value>)>,
	join_failures: HashSet<String>,
	join_gates: HashMap<String, oneshot::Receiver<()>>,
	closed_links: usize,
	tokens: Vec<Option<String>>,
}

struct FakeSession {
	inbound: mpsc::Sender<Inbound>,
	/// Set once the server side has dropped this session.
	severed: Arc<AtomicBool>,
}

fn room_of(arguments: &[Value]) -> String {
	let part = |i: usize| arguments.get(i).and_then(Value::as_str).unwrap_or_default().to_string();
	format!("{}:{}", part(0), part(1))
}

impl FakeHub {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn connector(&self) -> Arc<dyn HubConnector> {
		Arc::new(FakeConnector { hub: self.clone() })
	}

	pub fn manager(&self) -> ConnectionManager {
		self.manager_with(ReconnectSchedule::new([Duration::ZERO, Duration::ZERO]))
	}

	pub fn manager_with(&self, reconnect: ReconnectSchedule) -> ConnectionManager {
		init_test_logging();
		let endpoint = HubEndpoint::from_base_url("https://api.pactline.test", DEFAULT_HUB_PATH).expect("endpoint");
		let options = ManagerOptions {
			reconnect,
			mapping: MappingContext {
				current_user_id: Some("me".to_string()),
			},
			..ManagerOptions::default()
		};
		ConnectionManager::new(
			self.connector(),
			endpoint,
			Arc::new(StaticToken(Some(SecretString::new("provider-token")))),
			options,
		)
	}

	pub fn connects(&self) -> usize {
		self.state.lock().connects
	}

	pub fn closed_links(&self) -> usize {
		self.state.lock().closed_links
	}

	pub fn tokens(&self) -> Vec<Option<String>> {
		self.state.lock().tokens.clone()
	}

	pub fn fail_next_connects(&self, n: usize) {
		self.state.lock().failing_connects = n;
	}

	/// Park the next connect until the returned sender fires.
	pub fn hold_connect(&self) -> oneshot::Sender<()> {
		let (tx, rx) = oneshot::channel();
		self.state.lock().connect_gate = Some(rx);
		tx
	}

	pub fn fail_join(&self, room: &RoomKey) {
		self.state.lock().join_failures.insert(room.to_string());
	}

	/// Park the next join of `room` until the returned sender fires.
	pub fn hold_join(&self, room: &RoomKey) -> oneshot::Sender<()> {
		let (tx, rx) = oneshot::channel();
		self.state.lock().join_gates.insert(room.to_string(), rx);
		tx
	}

	/// Rooms passed to `method`, in call order.
	pub fn calls(&self, method: &str) -> Vec<String> {
		self.state
			.lock()
			.invocations
			.iter()
			.filter(|(m, _)| m == method)
			.map(|(_, args)| room_of(args))
			.collect()
	}

	pub fn invocation_args(&self, method: &str) -> Vec<Vec<Value>> {
		self.state
			.lock()
			.invocations
			.iter()
			.filter(|(m, _)| m == method)
			.map(|(_, args)| args.clone())
			.collect()
	}

	pub fn sends(&self, method: &str) -> Vec<String> {
		self.state
			.lock()
			.sends
			.iter()
			.filter(|(m, _)| m == method)
			.map(|(_, args)| room_of(args))
			.collect()
	}

	fn latest_session(&self) -> mpsc::Sender<Inbound> {
		self.state.lock().sessions.last().map(|s| s.inbound.clone()).expect("no session")
	}

	pub async fn push(&self, target: &str, arguments: Vec<Value>) {
		self.latest_session()
			.send(Inbound::Event {
				target: target.to_string(),
				arguments,
			})
			.await
			.expect("session closed");
	}

	pub async fn push_message(&self, id: &str, room: &RoomKey, text: &str) {
		self.push(events::RECEIVE_MESSAGE, message_args(id, room, text)).await;
	}

	/// End the current session from the server side. Calls still pending on
	/// it fail once they resume.
	pub async fn drop_connection(&self, allow_reconnect: bool) {
		let inbound = {
			let state = self.state.lock();
			let session = state.sessions.last().expect("no session");
			session.severed.store(true, Ordering::SeqCst);
			session.inbound.clone()
		};
		inbound
			.send(Inbound::Closed {
				error: Some("server went away".to_string()),
				allow_reconnect,
			})
			.await
			.expect("session closed");
	}
}

pub fn message_args(id: &str, room: &RoomKey, text: &str) -> Vec<Value> {
	vec![json!({
		"id": id,
		"systemId": room.system_id.as_str(),
		"entityId": room.entity_id.as_str(),
		"text": text,
		"authorId": "u-ana",
		"authorName": "Ana",
		"sentAt": "2026-03-01T10:00:00Z",
	})]
}

struct FakeConnector {
	hub: FakeHub,
}

#[async_trait::async_trait]
impl HubConnector for FakeConnector {
	async fn connect(
		&self,
		_endpoint: &HubEndpoint,
		access_token: Option<&SecretString>,
	) -> Result<HubSession, ClientCoreError> {
		let gate = self.hub.state.lock().connect_gate.take();
		if let Some(gate) = gate {
			let _ = gate.await;
		}

		let mut state = self.hub.state.lock();
		state.connects += 1;
		state.tokens.push(access_token.map(|t| t.expose().to_string()));
		if state.failing_connects > 0 {
			state.failing_connects -= 1;
			return Err(ClientCoreError::Connect("connection refused".to_string()));
		}

		let (tx, rx) = mpsc::channel(64);
		let severed = Arc::new(AtomicBool::new(false));
		state.sessions.push(FakeSession {
			inbound: tx,
			severed: Arc::clone(&severed),
		});

		Ok(HubSession {
			link: Arc::new(FakeLink {
				hub: self.hub.clone(),
				closed: AtomicBool::new(false),
				severed,
			}),
			inbound: rx,
		})
	}
}

struct FakeLink {
	hub: FakeHub,
	closed: AtomicBool,
	severed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl HubLink for FakeLink {
	async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Value, ClientCoreError> {
		let room = room_of(&arguments);
		let gate = {
			let mut state = self.hub.state.lock();
			state.invocations.push((target.to_string(), arguments));
			if target == methods::JOIN_ROOM && state.join_failures.contains(&room) {
				return Err(ClientCoreError::Remote {
					target: target.to_string(),
					message: format!("no access to {room}"),
				});
			}
			if target == methods::JOIN_ROOM {
				state.join_gates.remove(&room)
			} else {
				None
			}
		};

		if let Some(gate) = gate {
			let _ = gate.await;
		}
		if self.closed.load(Ordering::SeqCst) {
			return Err(ClientCoreError::Closed("link closed".to_string()));
		}
		if self.severed.load(Ordering::SeqCst) {
			return Err(ClientCoreError::Closed("server went away".to_string()));
		}
		Ok(Value::Null)
	}

	async fn send(&self, target: &str, arguments: Vec<Value>) -> Result<(), ClientCoreError> {
		self.hub.state.lock().sends.push((target.to_string(), arguments));
		Ok(())
	}

	fn close(&self, _reason: &str) {
		if !self.closed.swap(true, Ordering::SeqCst) {
			self.hub.state.lock().closed_links += 1;
		}
	}
}

pub fn message(id: &str, room: &RoomKey, minute: u32) -> Message {
	Message {
		id: MessageId::new(id).expect("message id"),
		room: room.clone(),
		author: Author {
			id: "u-ana".to_string(),
			display_name: "Ana".to_string(),
			kind: AuthorKind::User,
		},
		content: format!("message {id}"),
		kind: MessageKind::Text,
		sent_at: Utc
			.with_ymd_and_hms(2026, 3, 1, 10, minute, 0)
			.single()
			.expect("timestamp"),
		last_edited_at: None,
		read_by_current_user: false,
	}
}

pub fn page(items: Vec<Message>, current_page: u32, page_size: u32, total_items: u64, has_next_page: bool) -> Page<Message> {
	Page {
		items,
		total_items,
		current_page,
		page_size,
		has_next_page,
		has_previous_page: current_page > 1,
	}
}

/// History backend serving pre-baked pages.
#[derive(Clone, Default)]
pub struct FakeHistory {
	pages: Arc<Mutex<HashMap<u32, Page<Message>>>>,
	requests: Arc<Mutex<Vec<PageRequest>>>,
	gate: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
}

impl FakeHistory {
	pub fn with_page(self, page: Page<Message>) -> Self {
		self.pages.lock().insert(page.current_page, page);
		self
	}

	pub fn requests(&self) -> Vec<PageRequest> {
		self.requests.lock().clone()
	}

	/// Park the next `list` call until the returned sender fires.
	pub fn hold(&self) -> oneshot::Sender<()> {
		let (tx, rx) = oneshot::channel();
		*self.gate.lock() = Some(rx);
		tx
	}
}

#[async_trait::async_trait]
impl MessageSource for FakeHistory {
	async fn list(&self, _room: &RoomKey, request: PageRequest) -> Result<Page<Message>, ApiError> {
		self.requests.lock().push(request);
		let gate = self.gate.lock().take();
		if let Some(gate) = gate {
			let _ = gate.await;
		}
		self.pages
			.lock()
			.get(&request.page)
			.cloned()
			.ok_or_else(|| ApiError::NotFound(format!("page {}", request.page)))
	}
}
