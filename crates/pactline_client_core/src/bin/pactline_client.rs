#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::Context as _;
use pactline_client_core::{
	HubConnector as _, Inbound, SecretString, WsConfig, WsHubConnector, default_config_path,
	load_client_settings_from_path,
};
use pactline_domain::RoomKey;
use pactline_protocol::{HubEvent, MappingContext, methods, parse_hub_event, room_arguments};
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: pactline_client [--api-base url] [--token token] [--config path] [--room system:entity]...\n\
\n\
Options:\n\
	--api-base  Base API URL; the hub endpoint is derived from it\n\
	            Default: api_base_url from the config file or PACTLINE_API_BASE_URL\n\
	--token     Bearer token passed to the hub as access_token\n\
	            Default: auth_token from the config file or PACTLINE_AUTH_TOKEN\n\
	--config    Config file (default: ~/.pactline/config.toml)\n\
	--room      Room to join, as system:entity (repeatable; default: contracts:demo)\n\
	--help      Show this help\n\
\n\
Examples:\n\
	pactline_client --api-base http://localhost:5000 --room contracts:42\n\
	pactline_client --api-base https://api.example.com --room contracts:1 --room contracts:2\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,pactline_client_core=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

struct Args {
	api_base: Option<String>,
	token: Option<String>,
	config: Option<PathBuf>,
	rooms: Vec<RoomKey>,
}

fn parse_args() -> Args {
	let mut args = Args {
		api_base: None,
		token: None,
		config: None,
		rooms: Vec::new(),
	};

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--api-base" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--api-base must be non-empty");
					usage_and_exit();
				}
				args.api_base = Some(v);
			}
			"--token" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.token = Some(v);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.config = Some(PathBuf::from(v));
			}
			"--room" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let room = RoomKey::parse(&v).unwrap_or_else(|e| {
					eprintln!("Invalid --room value {v:?}: {e}");
					usage_and_exit()
				});
				args.rooms.push(room);
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	if args.rooms.is_empty() {
		args.rooms.push(RoomKey::parse("contracts:demo").unwrap_or_else(|_| usage_and_exit()));
	}

	args
}

fn print_event(event: HubEvent) {
	match event {
		HubEvent::Message(m) => {
			let edited = if m.is_edited() { " (edited)" } else { "" };
			println!("[{}] {}: {}{edited}", m.room, m.author.display_name, m.content);
		}
		HubEvent::Typing(t) => {
			println!(
				"[{}] {} is typing",
				t.room,
				t.author_name.as_deref().unwrap_or(t.author_id.as_str())
			);
		}
		HubEvent::Presence(p) => {
			println!("{:?}: {}", p.kind, p.user_name.as_deref().unwrap_or(p.user_id.as_str()));
		}
		HubEvent::ServerError(message) => {
			eprintln!("server error: {message}");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => default_config_path()?,
	};
	let mut settings = load_client_settings_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded client config (toml + env overrides)");

	if let Some(base) = args.api_base {
		settings.api_base_url = Some(base);
	}
	if let Some(token) = args.token.filter(|t| !t.trim().is_empty()) {
		settings.auth_token = Some(SecretString::new(token));
	}

	let endpoint = settings.hub_endpoint().context("derive hub endpoint")?;
	let connector = WsHubConnector::new(WsConfig::from_settings(&settings));
	let mut session = connector
		.connect(&endpoint, settings.auth_token.as_ref())
		.await
		.context("connect to hub")?;

	let ctx = MappingContext {
		current_user_id: settings.current_user_id.clone(),
	};

	for room in &args.rooms {
		session
			.link
			.invoke(methods::JOIN_ROOM, room_arguments(room))
			.await
			.with_context(|| format!("join {room}"))?;
		info!(room = %room, "joined room");
	}

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!("interrupted; leaving rooms");
				for room in &args.rooms {
					if let Err(e) = session.link.invoke(methods::LEAVE_ROOM, room_arguments(room)).await {
						warn!(room = %room, error = %e, "leave failed");
					}
				}
				session.link.close("client exit");
				break;
			}
			inbound = session.inbound.recv() => {
				match inbound {
					Some(Inbound::Event { target, arguments }) => match parse_hub_event(&target, arguments, &ctx) {
						Ok(Some(event)) => print_event(event),
						Ok(None) => info!(method = %target, "ignoring unknown hub event"),
						Err(e) => warn!(method = %target, error = %e, "dropping malformed hub event"),
					},
					Some(Inbound::Closed { error, allow_reconnect }) => {
						warn!(error = ?error, allow_reconnect, "hub connection closed");
						break;
					}
					None => break,
				}
			}
		}
	}

	Ok(())
}
