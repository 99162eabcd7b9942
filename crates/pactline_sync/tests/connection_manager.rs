#![forbid(unsafe_code)]

mod support;

use std::time::Duration;

use pactline_client_core::SecretString;
use pactline_protocol::{MessageIntent, PresenceKind, events, methods};
use pactline_sync::{ConnectionError, ConnectionEvent, ConnectionState, ReconnectSchedule, RoomItem, RoomOperationError};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;

use support::{FakeHub, WAIT, eventually, room};

async fn next_event(
	events: &mut broadcast::Receiver<ConnectionEvent>,
	pred: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
	timeout(WAIT, async {
		loop {
			match events.recv().await {
				Ok(event) if pred(&event) => return event,
				Ok(_) | Err(RecvError::Lagged(_)) => continue,
				Err(RecvError::Closed) => panic!("event stream closed"),
			}
		}
	})
	.await
	.expect("timed out waiting for connection event")
}

#[tokio::test]
async fn concurrent_initialize_shares_one_connect() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let gate = hub.hold_connect();

	let first = tokio::spawn({
		let manager = manager.clone();
		async move { manager.initialize(None).await }
	});
	let second = tokio::spawn({
		let manager = manager.clone();
		async move { manager.initialize(None).await }
	});

	eventually("connecting state", || manager.state() == ConnectionState::Connecting).await;
	tokio::task::yield_now().await;
	gate.send(()).expect("connect parked");

	assert_eq!(first.await.expect("join"), Ok(()));
	assert_eq!(second.await.expect("join"), Ok(()));
	assert_eq!(manager.state(), ConnectionState::Connected);

	manager.initialize(None).await.expect("already connected");
	assert_eq!(hub.connects(), 1);
}

#[tokio::test]
async fn explicit_token_takes_precedence_over_provider() {
	let hub = FakeHub::new();
	let manager = hub.manager();

	manager
		.initialize(Some(SecretString::new("explicit")))
		.await
		.expect("connect");

	assert_eq!(hub.tokens(), vec![Some("explicit".to_string())]);
}

#[tokio::test]
async fn failed_initial_connect_reports_error_and_can_retry() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	hub.fail_next_connects(1);

	let err = manager.initialize(None).await.expect_err("refused");
	assert!(matches!(err, ConnectionError::Connect(_)), "{err:?}");
	assert_eq!(manager.state(), ConnectionState::Error);

	manager.initialize(None).await.expect("second attempt");
	assert_eq!(manager.state(), ConnectionState::Connected);
	assert_eq!(hub.connects(), 2);
}

#[tokio::test]
async fn room_operations_need_a_connection() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let contracts = room("contracts:1");

	let err = manager.join_room(&contracts).await.expect_err("not connected");
	assert!(matches!(err, RoomOperationError::NotConnected));
	assert!(manager.active_rooms().is_empty());

	// Leaving is local-first and succeeds without a connection.
	manager.leave_room(&contracts).await.expect("local leave");
}

#[tokio::test]
async fn join_is_idempotent_and_delivers_messages() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let contracts = room("contracts:1");
	manager.initialize(None).await.expect("connect");

	let mut messages = manager.on_message(&contracts);
	manager.join_room(&contracts).await.expect("join");
	manager.join_room(&contracts).await.expect("second join");
	assert_eq!(hub.calls(methods::JOIN_ROOM), vec!["contracts:1".to_string()]);
	assert!(manager.is_room_active(&contracts));

	hub.push_message("m-1", &contracts, "hello").await;

	let item = timeout(WAIT, messages.recv()).await.expect("delivered").expect("open");
	let RoomItem::Event(message) = item else {
		panic!("unexpected {item:?}");
	};
	assert_eq!(message.id.as_str(), "m-1");
	assert_eq!(message.content, "hello");
	assert_eq!(message.author.display_name, "Ana");
}

#[tokio::test]
async fn messages_for_rooms_not_joined_are_dropped() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let joined = room("contracts:1");
	let other = room("contracts:2");
	manager.initialize(None).await.expect("connect");

	let mut joined_rx = manager.on_message(&joined);
	let mut other_rx = manager.on_message(&other);
	manager.join_room(&joined).await.expect("join");

	hub.push_message("m-other", &other, "not for us").await;
	hub.push_message("m-joined", &joined, "for us").await;

	let item = timeout(WAIT, joined_rx.recv()).await.expect("delivered").expect("open");
	assert!(matches!(item, RoomItem::Event(ref m) if m.id.as_str() == "m-joined"));
	assert!(other_rx.try_recv().is_none());
}

#[tokio::test]
async fn malformed_frame_reaches_no_handler() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let contracts = room("contracts:1");
	manager.initialize(None).await.expect("connect");

	let mut messages = manager.on_message(&contracts);
	manager.join_room(&contracts).await.expect("join");

	hub.push(
		events::RECEIVE_MESSAGE,
		vec![json!({ "systemId": "contracts", "entityId": "1", "text": "no id", "authorId": "u-ana", "sentAt": "2026-03-01T10:00:00Z" })],
	)
	.await;
	hub.push_message("m-valid", &contracts, "after").await;

	let item = timeout(WAIT, messages.recv()).await.expect("delivered").expect("open");
	assert!(matches!(item, RoomItem::Event(ref m) if m.id.as_str() == "m-valid"));
	assert!(messages.try_recv().is_none());
	assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn leave_during_pending_join_wins() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let contracts = room("contracts:1");
	manager.initialize(None).await.expect("connect");

	let _messages = manager.on_message(&contracts);
	let gate = hub.hold_join(&contracts);
	let join = tokio::spawn({
		let manager = manager.clone();
		let contracts = contracts.clone();
		async move { manager.join_room(&contracts).await }
	});

	eventually("join invoked", || hub.calls(methods::JOIN_ROOM).len() == 1).await;
	manager.leave_room(&contracts).await.expect("leave");
	gate.send(()).expect("join parked");

	let outcome = join.await.expect("join task");
	assert!(matches!(outcome, Err(RoomOperationError::Superseded { .. })), "{outcome:?}");
	assert!(!manager.is_room_active(&contracts));
	assert!(!manager.registry().has_handlers(&contracts));
	assert_eq!(hub.calls(methods::LEAVE_ROOM), vec!["contracts:1".to_string()]);
}

#[tokio::test]
async fn reconnect_rejoins_every_active_room() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let a = room("contracts:1");
	let b = room("contracts:2");
	manager.initialize(None).await.expect("connect");
	manager.join_room(&b).await.expect("join b");
	manager.join_room(&a).await.expect("join a");

	let mut events = manager.events();
	hub.drop_connection(true).await;

	let event = next_event(&mut events, |e| matches!(e, ConnectionEvent::Reconnected { .. })).await;
	assert_eq!(
		event,
		ConnectionEvent::Reconnected {
			rejoined: 2,
			failed: Vec::new()
		}
	);
	assert_eq!(manager.state(), ConnectionState::Connected);
	assert_eq!(hub.connects(), 2);
	assert_eq!(
		hub.calls(methods::JOIN_ROOM),
		vec!["contracts:2", "contracts:1", "contracts:1", "contracts:2"]
	);
	assert_eq!(manager.active_rooms(), vec![a, b]);
}

#[tokio::test]
async fn failed_rejoin_drops_only_that_room() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let kept = room("contracts:1");
	let lost = room("contracts:2");
	manager.initialize(None).await.expect("connect");

	let mut kept_rx = manager.on_message(&kept);
	let _lost_rx = manager.on_message(&lost);
	manager.join_room(&kept).await.expect("join kept");
	manager.join_room(&lost).await.expect("join lost");

	hub.fail_join(&lost);
	let mut events = manager.events();
	hub.drop_connection(true).await;

	let event = next_event(&mut events, |e| matches!(e, ConnectionEvent::Reconnected { .. })).await;
	assert_eq!(
		event,
		ConnectionEvent::Reconnected {
			rejoined: 1,
			failed: vec![lost.clone()]
		}
	);
	assert_eq!(manager.active_rooms(), vec![kept.clone()]);
	assert!(manager.registry().has_handlers(&kept));
	assert!(!manager.registry().has_handlers(&lost));

	hub.push_message("m-after", &kept, "still here").await;
	let item = timeout(WAIT, kept_rx.recv()).await.expect("delivered").expect("open");
	assert!(matches!(item, RoomItem::Event(ref m) if m.id.as_str() == "m-after"));
}

#[tokio::test]
async fn session_lost_mid_rejoin_keeps_rooms_for_the_next_session() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let a = room("contracts:1");
	let b = room("contracts:2");
	manager.initialize(None).await.expect("connect");
	let _a_rx = manager.on_message(&a);
	manager.join_room(&a).await.expect("join a");
	manager.join_room(&b).await.expect("join b");

	let mut events = manager.events();
	let rejoin_gate = hub.hold_join(&a);
	hub.drop_connection(true).await;
	eventually("rejoin parked on the second session", || {
		hub.connects() == 2 && hub.calls(methods::JOIN_ROOM).len() == 3
	})
	.await;

	// The second session dies as well; its replacement waits at the connector.
	let connect_gate = hub.hold_connect();
	hub.drop_connection(true).await;
	eventually("replacement attempt started", || manager.state() == ConnectionState::Connecting).await;

	rejoin_gate.send(()).expect("rejoin parked");
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(manager.active_rooms(), vec![a.clone(), b.clone()]);
	assert!(manager.registry().has_handlers(&a));

	let waiting = tokio::spawn({
		let manager = manager.clone();
		async move { manager.initialize(None).await }
	});
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(hub.connects(), 2, "initialize must join the pending reconnect");

	connect_gate.send(()).expect("connect parked");
	waiting.await.expect("initialize task").expect("initialize");

	let event = next_event(&mut events, |e| matches!(e, ConnectionEvent::Reconnected { .. })).await;
	assert_eq!(
		event,
		ConnectionEvent::Reconnected {
			rejoined: 2,
			failed: Vec::new()
		}
	);
	assert_eq!(hub.connects(), 3);
	assert_eq!(manager.state(), ConnectionState::Connected);
	assert_eq!(manager.active_rooms(), vec![a.clone(), b]);
	assert!(manager.registry().has_handlers(&a));
}

#[tokio::test]
async fn manual_reconnect_reports_rooms_that_could_not_rejoin() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let kept = room("contracts:1");
	let lost = room("contracts:2");
	manager.initialize(None).await.expect("connect");
	manager.join_room(&kept).await.expect("join kept");
	manager.join_room(&lost).await.expect("join lost");

	hub.drop_connection(false).await;
	eventually("error state", || manager.state() == ConnectionState::Error).await;

	hub.fail_join(&lost);
	let mut events = manager.events();
	manager.initialize(None).await.expect("connect again");

	let event = next_event(&mut events, |e| matches!(e, ConnectionEvent::Reconnected { .. })).await;
	assert_eq!(
		event,
		ConnectionEvent::Reconnected {
			rejoined: 1,
			failed: vec![lost]
		}
	);
	assert_eq!(manager.active_rooms(), vec![kept]);
}

#[tokio::test]
async fn reconnect_gives_up_after_schedule() {
	let hub = FakeHub::new();
	let manager = hub.manager_with(ReconnectSchedule::new([Duration::ZERO, Duration::from_millis(10)]));
	manager.initialize(None).await.expect("connect");

	let mut events = manager.events();
	hub.fail_next_connects(2);
	hub.drop_connection(true).await;

	let attempt = next_event(&mut events, |e| matches!(e, ConnectionEvent::Reconnecting { attempt: 2, .. })).await;
	assert_eq!(
		attempt,
		ConnectionEvent::Reconnecting {
			attempt: 2,
			delay: Duration::from_millis(10)
		}
	);

	eventually("error state", || manager.state() == ConnectionState::Error).await;
	assert_eq!(hub.connects(), 3);

	let err = manager.initialize(None).await;
	assert_eq!(err, Ok(()));
	assert_eq!(hub.connects(), 4);
}

#[tokio::test]
async fn server_close_without_reconnect_flag_stops() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	manager.initialize(None).await.expect("connect");

	let mut events = manager.events();
	hub.drop_connection(false).await;

	let event = next_event(&mut events, |e| matches!(e, ConnectionEvent::Closed { .. })).await;
	assert_eq!(
		event,
		ConnectionEvent::Closed {
			reason: Some("server went away".to_string())
		}
	);
	eventually("error state", || manager.state() == ConnectionState::Error).await;
	assert_eq!(hub.connects(), 1);
}

#[tokio::test]
async fn disabled_schedule_never_reconnects() {
	let hub = FakeHub::new();
	let manager = hub.manager_with(ReconnectSchedule::disabled());
	manager.initialize(None).await.expect("connect");

	hub.drop_connection(true).await;
	eventually("error state", || manager.state() == ConnectionState::Error).await;
	assert_eq!(hub.connects(), 1);
}

#[tokio::test]
async fn dispose_forgets_rooms_and_handlers() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let contracts = room("contracts:1");
	manager.initialize(None).await.expect("connect");

	let mut messages = manager.on_message(&contracts);
	manager.join_room(&contracts).await.expect("join");

	manager.dispose();

	assert_eq!(manager.state(), ConnectionState::Idle);
	assert!(manager.active_rooms().is_empty());
	assert!(manager.registry().rooms().is_empty());
	assert_eq!(hub.closed_links(), 1);
	assert!(timeout(WAIT, messages.recv()).await.expect("ended").is_none());

	manager.initialize(None).await.expect("reconnect after dispose");
	assert_eq!(hub.connects(), 2);
	assert_eq!(hub.calls(methods::JOIN_ROOM).len(), 1);
}

#[tokio::test]
async fn dispose_during_connect_discards_the_session() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let gate = hub.hold_connect();

	let pending = tokio::spawn({
		let manager = manager.clone();
		async move { manager.initialize(None).await }
	});
	eventually("connecting state", || manager.state() == ConnectionState::Connecting).await;

	manager.dispose();
	let _ = gate.send(());

	// The spawned attempt was aborted; its awaiter still sees it resolve.
	let outcome = timeout(WAIT, pending).await.expect("resolved").expect("join");
	assert_eq!(outcome, Err(ConnectionError::Disposed));
	assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn send_message_invokes_hub_with_frame() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let contracts = room("contracts:1");
	manager.initialize(None).await.expect("connect");

	manager
		.send_message(MessageIntent {
			room: contracts.clone(),
			text: "hi all".to_string(),
			author_id: "me".to_string(),
			author_name: None,
		})
		.await
		.expect("send");

	let sent = hub.invocation_args(methods::SEND_MESSAGE);
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0][0]["text"], "hi all");
	assert_eq!(sent[0][0]["systemId"], "contracts");

	let err = manager
		.send_message(MessageIntent {
			room: contracts,
			text: "   ".to_string(),
			author_id: "me".to_string(),
			author_name: None,
		})
		.await
		.expect_err("blank text");
	assert!(matches!(err, RoomOperationError::InvalidMessage(_)));
}

#[tokio::test]
async fn typing_indicators_are_fire_and_forget() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let contracts = room("contracts:1");

	// Not connected: silently skipped.
	manager.start_typing(&contracts).await;

	manager.initialize(None).await.expect("connect");
	manager.start_typing(&contracts).await;
	manager.stop_typing(&contracts).await;

	assert_eq!(hub.sends(methods::START_TYPING), vec!["contracts:1".to_string()]);
	assert_eq!(hub.sends(methods::STOP_TYPING), vec!["contracts:1".to_string()]);
	assert!(hub.calls(methods::START_TYPING).is_empty());
}

#[tokio::test]
async fn typing_events_reach_room_handlers() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	let contracts = room("contracts:1");
	manager.initialize(None).await.expect("connect");

	let mut typing = manager.on_typing(&contracts);
	manager.join_room(&contracts).await.expect("join");

	hub.push(
		events::USER_TYPING,
		vec![json!({ "systemId": "contracts", "entityId": "1", "authorId": "u-bo", "authorName": "Bo" })],
	)
	.await;

	let item = timeout(WAIT, typing.recv()).await.expect("delivered").expect("open");
	let RoomItem::Event(event) = item else {
		panic!("unexpected {item:?}");
	};
	assert_eq!(event.author_id, "u-bo");
	assert_eq!(event.author_name.as_deref(), Some("Bo"));
}

#[tokio::test]
async fn presence_and_server_errors_are_broadcast() {
	let hub = FakeHub::new();
	let manager = hub.manager();
	manager.initialize(None).await.expect("connect");

	let mut presence = manager.on_presence();
	let mut lifecycle = manager.events();

	hub.push(events::USER_JOINED, vec![json!({ "userId": "u-bo", "userName": "Bo" })]).await;
	hub.push(events::ERROR, vec![json!("rate limited")]).await;

	let joined = timeout(WAIT, presence.recv()).await.expect("delivered").expect("open");
	assert_eq!(joined.kind, PresenceKind::Joined);
	assert_eq!(joined.user_id, "u-bo");
	assert!(joined.room.is_none());

	let event = next_event(&mut lifecycle, |e| matches!(e, ConnectionEvent::ServerError { .. })).await;
	assert_eq!(
		event,
		ConnectionEvent::ServerError {
			message: "rate limited".to_string()
		}
	);
	assert_eq!(manager.state(), ConnectionState::Connected);
}
