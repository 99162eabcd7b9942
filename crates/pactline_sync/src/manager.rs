use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt as _;
use futures::future::{BoxFuture, Shared};
use pactline_client_core::{
	ClientCoreError, ClientSettings, ConfigError, HubConnector, HubLink, HubSession, Inbound, SecretString,
};
use pactline_domain::RoomKey;
use pactline_protocol::{
	HubEvent, MappingContext, MessageIntent, PresenceEvent, methods, parse_hub_event, room_arguments, to_outgoing_frame,
};
use pactline_util::endpoint::HubEndpoint;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{StaticToken, TokenProvider};
use crate::error::{ConnectionError, RoomOperationError};
use crate::presence::PresenceBroadcaster;
use crate::reconnect::ReconnectSchedule;
use crate::registry::{MessageSubscription, RegistryConfig, RoomEventRegistry, TypingSubscription};

/// Coarse connection status for UI badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
	#[default]
	Idle,
	Connecting,
	Connected,
	Error,
}

/// Lifecycle notifications published alongside the state observable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
	Connecting,
	Connected,
	Reconnecting { attempt: u32, delay: Duration },
	Reconnected { rejoined: usize, failed: Vec<RoomKey> },
	Closed { reason: Option<String> },
	ServerError { message: String },
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
	/// Delays between reconnect attempts; empty disables reconnecting.
	pub reconnect: ReconnectSchedule,
	pub mapping: MappingContext,
	pub registry: RegistryConfig,
	pub presence_capacity: usize,
	pub event_capacity: usize,
}

impl Default for ManagerOptions {
	fn default() -> Self {
		Self {
			reconnect: ReconnectSchedule::default(),
			mapping: MappingContext::default(),
			registry: RegistryConfig::default(),
			presence_capacity: 256,
			event_capacity: 64,
		}
	}
}

impl ManagerOptions {
	pub fn from_settings(settings: &ClientSettings) -> Self {
		Self {
			reconnect: ReconnectSchedule::from_settings(settings),
			mapping: MappingContext {
				current_user_id: settings.current_user_id.clone(),
			},
			registry: RegistryConfig {
				subscriber_queue_capacity: settings.room_queue_capacity,
			},
			..Self::default()
		}
	}
}

type ConnectFuture = Shared<BoxFuture<'static, Result<(), ConnectionError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectMode {
	Initial,
	Reconnect,
}

/// Owner of the single hub connection and the joined-room set.
///
/// Cheap to clone; clones share one connection. Call `dispose` to tear it
/// down explicitly.
#[derive(Clone)]
pub struct ConnectionManager {
	inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ConnectionManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectionManager")
			.field("endpoint", &self.inner.endpoint.as_str())
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

struct ManagerInner {
	connector: Arc<dyn HubConnector>,
	endpoint: HubEndpoint,
	tokens: Arc<dyn TokenProvider>,
	options: ManagerOptions,
	state_tx: watch::Sender<ConnectionState>,
	events_tx: broadcast::Sender<ConnectionEvent>,
	registry: RoomEventRegistry,
	presence: PresenceBroadcaster,
	session: Mutex<SessionSlot>,
	rooms: Mutex<RoomBook>,
	token_override: Mutex<Option<SecretString>>,
}

#[derive(Default)]
struct SessionSlot {
	/// Bumped by `dispose`; work started under an older value is discarded.
	lifecycle: u64,
	next_session: u64,
	next_attempt: u64,
	current: Option<LiveSession>,
	/// Id of the attempt behind `connecting`; a finished attempt only clears
	/// the slot while it still owns it.
	attempt: Option<u64>,
	connecting: Option<ConnectFuture>,
	connect_task: Option<JoinHandle<Result<(), ConnectionError>>>,
}

/// A session installed by one connect attempt, with its rejoin tally.
struct Established {
	session: u64,
	rejoined: usize,
	failed: Vec<RoomKey>,
}

struct LiveSession {
	id: u64,
	link: Arc<dyn HubLink>,
	supervisor: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct RoomBook {
	epoch: u64,
	active: HashSet<RoomKey>,
	/// Bumped by every leave so a join that raced it can tell.
	generations: HashMap<RoomKey, u64>,
}

impl RoomBook {
	fn ticket(&self, room: &RoomKey) -> (u64, u64) {
		(self.epoch, self.generations.get(room).copied().unwrap_or(0))
	}

	fn bump(&mut self, room: &RoomKey) {
		*self.generations.entry(room.clone()).or_insert(0) += 1;
	}
}

impl ConnectionManager {
	pub fn new(
		connector: Arc<dyn HubConnector>,
		endpoint: HubEndpoint,
		tokens: Arc<dyn TokenProvider>,
		options: ManagerOptions,
	) -> Self {
		let (state_tx, _) = watch::channel(ConnectionState::Idle);
		let (events_tx, _) = broadcast::channel(options.event_capacity.max(1));
		let registry = RoomEventRegistry::new(options.registry.clone());
		let presence = PresenceBroadcaster::new(options.presence_capacity);

		Self {
			inner: Arc::new(ManagerInner {
				connector,
				endpoint,
				tokens,
				options,
				state_tx,
				events_tx,
				registry,
				presence,
				session: Mutex::new(SessionSlot::default()),
				rooms: Mutex::new(RoomBook::default()),
				token_override: Mutex::new(None),
			}),
		}
	}

	/// Build from client settings. Fails when no base API URL is configured.
	pub fn from_settings(settings: &ClientSettings, connector: Arc<dyn HubConnector>) -> Result<Self, ConfigError> {
		let endpoint = settings.hub_endpoint()?;
		Ok(Self::new(
			connector,
			endpoint,
			Arc::new(StaticToken(settings.auth_token.clone())),
			ManagerOptions::from_settings(settings),
		))
	}

	pub fn endpoint(&self) -> &HubEndpoint {
		&self.inner.endpoint
	}

	pub fn state(&self) -> ConnectionState {
		*self.inner.state_tx.borrow()
	}

	pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
		self.inner.state_tx.subscribe()
	}

	pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
		self.inner.events_tx.subscribe()
	}

	pub fn registry(&self) -> &RoomEventRegistry {
		&self.inner.registry
	}

	/// Register a message handler. It only receives events once `room` is joined.
	pub fn on_message(&self, room: &RoomKey) -> MessageSubscription {
		self.inner.registry.on_message(room)
	}

	pub fn on_typing(&self, room: &RoomKey) -> TypingSubscription {
		self.inner.registry.on_typing(room)
	}

	pub fn on_presence(&self) -> broadcast::Receiver<PresenceEvent> {
		self.inner.presence.subscribe()
	}

	pub fn active_rooms(&self) -> Vec<RoomKey> {
		let mut rooms: Vec<RoomKey> = self.inner.rooms.lock().active.iter().cloned().collect();
		rooms.sort();
		rooms
	}

	pub fn is_room_active(&self, room: &RoomKey) -> bool {
		self.inner.rooms.lock().active.contains(room)
	}

	/// Connect if needed. Concurrent callers share one attempt; an already
	/// connected manager returns immediately. A token given here takes
	/// precedence over the token provider for this and later connects.
	pub async fn initialize(&self, token: Option<SecretString>) -> Result<(), ConnectionError> {
		if let Some(token) = token {
			*self.inner.token_override.lock() = Some(token);
		}

		let attempt = {
			let mut slot = self.inner.session.lock();
			if slot.current.is_some() {
				return Ok(());
			}
			match &slot.connecting {
				Some(attempt) => attempt.clone(),
				None => ManagerInner::start_connect(&self.inner, &mut slot, ConnectMode::Initial),
			}
		};

		attempt.await
	}

	/// Join `room`. A no-op for rooms that are already active.
	pub async fn join_room(&self, room: &RoomKey) -> Result<(), RoomOperationError> {
		let ticket = {
			let book = self.inner.rooms.lock();
			if book.active.contains(room) {
				return Ok(());
			}
			book.ticket(room)
		};

		let link = self.inner.link().ok_or(RoomOperationError::NotConnected)?;
		link.invoke(methods::JOIN_ROOM, room_arguments(room))
			.await
			.map_err(|source| RoomOperationError::Remote {
				operation: "join",
				room: room.clone(),
				source,
			})?;

		{
			let mut book = self.inner.rooms.lock();
			if book.ticket(room) != ticket {
				debug!(room = %room, "join completed after a leave; not activating");
				return Err(RoomOperationError::Superseded { room: room.clone() });
			}
			book.active.insert(room.clone());
		}

		self.inner.update_room_gauge();
		info!(room = %room, "joined room");
		Ok(())
	}

	/// Leave `room`. Local handlers and membership are dropped before the
	/// remote call, whatever its outcome.
	pub async fn leave_room(&self, room: &RoomKey) -> Result<(), RoomOperationError> {
		let was_active = {
			let mut book = self.inner.rooms.lock();
			book.bump(room);
			book.active.remove(room)
		};
		self.inner.registry.remove_room(room);
		self.inner.update_room_gauge();
		debug!(room = %room, was_active, "left room locally");

		let Some(link) = self.inner.link() else {
			return Ok(());
		};

		link.invoke(methods::LEAVE_ROOM, room_arguments(room))
			.await
			.map(|_| ())
			.map_err(|source| {
				warn!(room = %room, error = %source, "remote leave failed");
				RoomOperationError::Remote {
					operation: "leave",
					room: room.clone(),
					source,
				}
			})
	}

	/// Send a chat message to its room.
	pub async fn send_message(&self, intent: MessageIntent) -> Result<(), RoomOperationError> {
		let room = intent.room.clone();
		let frame = to_outgoing_frame(intent)?;
		let payload = serde_json::to_value(&frame).map_err(|e| RoomOperationError::Encode(e.to_string()))?;

		let link = self.inner.link().ok_or(RoomOperationError::NotConnected)?;
		link.invoke(methods::SEND_MESSAGE, vec![payload])
			.await
			.map(|_| ())
			.map_err(|source| RoomOperationError::Remote {
				operation: "send",
				room,
				source,
			})
	}

	/// Fire-and-forget typing indicator.
	pub async fn start_typing(&self, room: &RoomKey) {
		self.inner.fire_and_forget(methods::START_TYPING, room).await;
	}

	pub async fn stop_typing(&self, room: &RoomKey) {
		self.inner.fire_and_forget(methods::STOP_TYPING, room).await;
	}

	/// Close the connection, stop reconnecting and forget all rooms and
	/// handlers. A later `initialize` starts from scratch.
	pub fn dispose(&self) {
		let (session, task) = {
			let mut slot = self.inner.session.lock();
			slot.lifecycle += 1;
			slot.attempt = None;
			slot.connecting = None;
			(slot.current.take(), slot.connect_task.take())
		};

		if let Some(task) = task {
			task.abort();
		}
		if let Some(session) = session {
			session.supervisor.abort();
			session.link.close("disposed");
		}

		{
			let mut book = self.inner.rooms.lock();
			book.epoch += 1;
			book.active.clear();
			book.generations.clear();
		}
		self.inner.registry.clear();
		self.inner.update_room_gauge();

		self.inner.set_state(ConnectionState::Idle);
		self.inner.emit(ConnectionEvent::Closed {
			reason: Some("disposed".to_string()),
		});
		info!("connection manager disposed");
	}
}

impl ManagerInner {
	fn start_connect(inner: &Arc<Self>, slot: &mut SessionSlot, mode: ConnectMode) -> ConnectFuture {
		slot.next_attempt += 1;
		let attempt_id = slot.next_attempt;
		let lifecycle = slot.lifecycle;
		let worker = Arc::clone(inner);
		let attempt: ConnectFuture = async move { worker.run_connect(attempt_id, lifecycle, mode).await }
			.boxed()
			.shared();

		slot.attempt = Some(attempt_id);
		slot.connecting = Some(attempt.clone());
		slot.connect_task = Some(tokio::spawn(attempt.clone()));
		attempt
	}

	async fn run_connect(self: Arc<Self>, attempt: u64, lifecycle: u64, mode: ConnectMode) -> Result<(), ConnectionError> {
		let result = match mode {
			ConnectMode::Initial => self.connect_once(lifecycle).await,
			ConnectMode::Reconnect => self.reconnect(lifecycle).await,
		};

		let (owned, session_alive) = {
			let mut slot = self.session.lock();
			if slot.attempt != Some(attempt) {
				(false, false)
			} else {
				slot.attempt = None;
				slot.connecting = None;
				slot.connect_task = None;
				let alive = match (&result, &slot.current) {
					(Ok(done), Some(current)) => current.id == done.session,
					_ => false,
				};
				(true, alive)
			}
		};

		if !owned {
			debug!(attempt, "superseded connect attempt finished");
			return result.map(|_| ());
		}

		match result {
			Ok(done) if session_alive => {
				self.emit(ConnectionEvent::Connected);
				if mode == ConnectMode::Reconnect || done.rejoined > 0 || !done.failed.is_empty() {
					self.emit(ConnectionEvent::Reconnected {
						rejoined: done.rejoined,
						failed: done.failed,
					});
				}
				Ok(())
			}
			// The session closed while rooms were being rejoined; the close
			// handler has already reported it.
			Ok(done) => {
				debug!(session = done.session, "hub session lost while rejoining rooms");
				Err(ConnectionError::Connect("connection lost while rejoining rooms".to_string()))
			}
			Err(e) => {
				warn!(error = %e, "hub connection failed");
				self.set_state(ConnectionState::Error);
				self.emit(ConnectionEvent::Closed {
					reason: Some(e.to_string()),
				});
				Err(e)
			}
		}
	}

	/// One connect + install + rejoin.
	async fn connect_once(self: &Arc<Self>, lifecycle: u64) -> Result<Established, ConnectionError> {
		self.set_state(ConnectionState::Connecting);
		self.emit(ConnectionEvent::Connecting);

		let override_token = self.token_override.lock().clone();
		let token = match override_token {
			Some(token) => Some(token),
			None => self.tokens.access_token().await,
		};

		let HubSession { link, inbound } = self.connector.connect(&self.endpoint, token.as_ref()).await?;

		let installed = {
			let mut slot = self.session.lock();
			if slot.lifecycle == lifecycle {
				slot.next_session += 1;
				let id = slot.next_session;
				let supervisor = tokio::spawn(supervise(Arc::downgrade(self), id, inbound));
				slot.current = Some(LiveSession {
					id,
					link: Arc::clone(&link),
					supervisor,
				});
				Some(id)
			} else {
				None
			}
		};

		let Some(session) = installed else {
			link.close("disposed");
			return Err(ConnectionError::Disposed);
		};

		info!(endpoint = %self.endpoint, session, "hub connected");
		self.set_state(ConnectionState::Connected);

		let (rejoined, failed) = self.rejoin_rooms(session, &link).await;
		Ok(Established {
			session,
			rejoined,
			failed,
		})
	}

	async fn reconnect(self: &Arc<Self>, lifecycle: u64) -> Result<Established, ConnectionError> {
		let schedule = &self.options.reconnect;
		let mut last_error = "connection lost".to_string();
		let mut attempt: u32 = 0;

		while let Some(delay) = schedule.delay_for(attempt + 1) {
			attempt += 1;
			metrics::counter!("pactline_sync_reconnect_attempts_total").increment(1);
			info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting to hub");
			self.emit(ConnectionEvent::Reconnecting { attempt, delay });

			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}
			if self.session.lock().lifecycle != lifecycle {
				return Err(ConnectionError::Disposed);
			}

			match self.connect_once(lifecycle).await {
				Ok(done) => {
					info!(attempt, rejoined = done.rejoined, failed = done.failed.len(), "hub reconnected");
					return Ok(done);
				}
				Err(ConnectionError::Disposed) => return Err(ConnectionError::Disposed),
				Err(e) => {
					warn!(attempt, error = %e, "reconnect attempt failed");
					last_error = e.to_string();
				}
			}
		}

		Err(ConnectionError::ReconnectExhausted {
			attempts: schedule.attempts(),
			last_error,
		})
	}

	/// Re-issue joins for every active room. A room the hub refuses is
	/// dropped (with its handlers) without stopping the others; transport
	/// errors keep the room for the next session. Stops once `session` is no
	/// longer the live one.
	async fn rejoin_rooms(&self, session: u64, link: &Arc<dyn HubLink>) -> (usize, Vec<RoomKey>) {
		let rooms: Vec<(RoomKey, (u64, u64))> = {
			let book = self.rooms.lock();
			let mut rooms: Vec<_> = book.active.iter().map(|r| (r.clone(), book.ticket(r))).collect();
			rooms.sort();
			rooms
		};

		let mut rejoined = 0;
		let mut failed = Vec::new();

		for (room, ticket) in rooms {
			if !self.is_current_session(session) {
				debug!(session, "session replaced; rejoin stopped");
				break;
			}

			match link.invoke(methods::JOIN_ROOM, room_arguments(&room)).await {
				Ok(_) => {
					rejoined += 1;
					debug!(room = %room, "room rejoined");
				}
				Err(e @ ClientCoreError::Remote { .. }) => {
					warn!(room = %room, error = %e, "rejoin failed; dropping room");
					metrics::counter!("pactline_sync_rejoin_failures_total").increment(1);

					let evicted = {
						let mut book = self.rooms.lock();
						book.ticket(&room) == ticket && book.active.remove(&room)
					};
					if evicted {
						self.registry.remove_room(&room);
					}
					failed.push(room);
				}
				Err(e) => {
					warn!(room = %room, error = %e, "rejoin interrupted; keeping room");
				}
			}
		}

		self.update_room_gauge();
		(rejoined, failed)
	}

	fn on_session_closed(self: &Arc<Self>, session_id: u64, error: Option<String>, allow_reconnect: bool) {
		let reconnecting = {
			let mut slot = self.session.lock();
			match &slot.current {
				Some(s) if s.id == session_id => {}
				_ => return,
			}
			slot.current = None;

			if allow_reconnect && !self.options.reconnect.is_empty() {
				self.set_state(ConnectionState::Connecting);
				let _ = Self::start_connect(self, &mut slot, ConnectMode::Reconnect);
				true
			} else {
				false
			}
		};

		warn!(error = ?error, allow_reconnect, reconnecting, "hub connection lost");
		self.emit(ConnectionEvent::Closed { reason: error });

		if !reconnecting {
			self.set_state(ConnectionState::Error);
		}
	}

	fn dispatch(&self, target: &str, arguments: Vec<serde_json::Value>) {
		match parse_hub_event(target, arguments, &self.options.mapping) {
			Ok(Some(HubEvent::Message(message))) => {
				if !self.is_active(&message.room) {
					debug!(room = %message.room, "message for inactive room dropped");
					return;
				}
				let delivered = self.registry.publish_message(&message.room, &message);
				debug!(room = %message.room, message_id = %message.id, delivered, "message dispatched");
			}
			Ok(Some(HubEvent::Typing(typing))) => {
				if self.is_active(&typing.room) {
					self.registry.publish_typing(&typing.room, &typing);
				}
			}
			Ok(Some(HubEvent::Presence(presence))) => {
				self.presence.publish(presence);
			}
			Ok(Some(HubEvent::ServerError(message))) => {
				warn!(error = %message, "hub reported an error");
				self.emit(ConnectionEvent::ServerError { message });
			}
			Ok(None) => debug!(method = %target, "unhandled hub event"),
			Err(e) => {
				warn!(method = %target, error = %e, "dropping malformed hub frame");
				metrics::counter!("pactline_sync_malformed_frames_total").increment(1);
			}
		}
	}

	async fn fire_and_forget(&self, method: &'static str, room: &RoomKey) {
		let Some(link) = self.link() else {
			debug!(room = %room, method, "not connected; typing indicator skipped");
			return;
		};
		if let Err(e) = link.send(method, room_arguments(room)).await {
			debug!(room = %room, method, error = %e, "typing indicator failed");
		}
	}

	fn link(&self) -> Option<Arc<dyn HubLink>> {
		self.session.lock().current.as_ref().map(|s| Arc::clone(&s.link))
	}

	fn is_current_session(&self, session: u64) -> bool {
		self.session.lock().current.as_ref().is_some_and(|s| s.id == session)
	}

	fn is_active(&self, room: &RoomKey) -> bool {
		self.rooms.lock().active.contains(room)
	}

	fn set_state(&self, next: ConnectionState) {
		self.state_tx.send_if_modified(|current| {
			if *current == next {
				return false;
			}
			debug!(from = ?*current, to = ?next, "connection state changed");
			*current = next;
			true
		});
	}

	fn emit(&self, event: ConnectionEvent) {
		let _ = self.events_tx.send(event);
	}

	fn update_room_gauge(&self) {
		let count = self.rooms.lock().active.len();
		metrics::gauge!("pactline_sync_active_rooms").set(count as f64);
	}
}

async fn supervise(manager: Weak<ManagerInner>, session_id: u64, mut inbound: mpsc::Receiver<Inbound>) {
	let (error, allow_reconnect) = loop {
		match inbound.recv().await {
			Some(Inbound::Event { target, arguments }) => {
				let Some(inner) = manager.upgrade() else {
					return;
				};
				inner.dispatch(&target, arguments);
			}
			Some(Inbound::Closed { error, allow_reconnect }) => break (error, allow_reconnect),
			None => break (Some("inbound stream ended".to_string()), true),
		}
	};

	if let Some(inner) = manager.upgrade() {
		inner.on_session_closed(session_id, error, allow_reconnect);
	}
}
