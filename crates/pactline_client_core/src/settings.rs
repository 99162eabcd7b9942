use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use pactline_protocol::DEFAULT_MAX_FRAME_SIZE;
use pactline_util::endpoint::{DEFAULT_HUB_PATH, HubEndpoint};
use pactline_util::env::{parse_env_bool, parse_ms_list};
use serde::Deserialize;
use tracing::{info, warn};

use crate::SecretString;

/// Reconnect delays used when none are configured.
pub const DEFAULT_RECONNECT_SCHEDULE_MS: [u64; 4] = [0, 2_000, 10_000, 30_000];

/// Default per-subscriber queue depth for room channels.
pub const DEFAULT_ROOM_QUEUE_CAPACITY: usize = 256;

/// Configuration errors that make the realtime subsystem unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
	#[error("no base API URL configured (set api_base_url or PACTLINE_API_BASE_URL)")]
	MissingBaseUrl,

	#[error("invalid base API URL {url:?}: {reason}")]
	InvalidBaseUrl { url: String, reason: String },
}

/// Default config path: `~/.pactline/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".pactline").join("config.toml"))
}

/// Load client settings from the default path plus env overrides.
pub fn load_client_settings() -> anyhow::Result<ClientSettings> {
	let path = default_config_path()?;
	load_client_settings_from_path(&path)
}

/// Same as `load_client_settings` but with an explicit config path.
pub fn load_client_settings_from_path(path: &Path) -> anyhow::Result<ClientSettings> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ClientSettings::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Client settings for the realtime subsystem.
#[derive(Debug, Clone)]
pub struct ClientSettings {
	/// Base URL of the REST API; the hub endpoint is derived from it.
	pub api_base_url: Option<String>,
	/// Hub path relative to the base URL.
	pub hub_path: String,
	/// Bearer token handed to the hub when no token provider is wired.
	pub auth_token: Option<SecretString>,
	/// Id of the signed-in user; used to mark own messages as read.
	pub current_user_id: Option<String>,
	/// Timeout for connect + handshake.
	pub connect_timeout: Duration,
	/// Timeout for a single hub invocation.
	pub invocation_timeout: Duration,
	/// Delays between reconnect attempts after an unexpected close.
	pub reconnect_schedule: Vec<Duration>,
	/// Whether the manager reconnects automatically.
	pub auto_reconnect: bool,
	/// Queue depth of each room subscriber channel.
	pub room_queue_capacity: usize,
	/// Maximum inbound/outbound frame size.
	pub max_frame_bytes: usize,
}

impl Default for ClientSettings {
	fn default() -> Self {
		Self {
			api_base_url: None,
			hub_path: DEFAULT_HUB_PATH.to_string(),
			auth_token: None,
			current_user_id: None,
			connect_timeout: Duration::from_secs(15),
			invocation_timeout: Duration::from_secs(30),
			reconnect_schedule: DEFAULT_RECONNECT_SCHEDULE_MS.iter().copied().map(Duration::from_millis).collect(),
			auto_reconnect: true,
			room_queue_capacity: DEFAULT_ROOM_QUEUE_CAPACITY,
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

impl ClientSettings {
	/// Derive the hub websocket endpoint from the base API URL.
	pub fn hub_endpoint(&self) -> Result<HubEndpoint, ConfigError> {
		let base = self
			.api_base_url
			.as_deref()
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.ok_or(ConfigError::MissingBaseUrl)?;

		HubEndpoint::from_base_url(base, &self.hub_path).map_err(|reason| ConfigError::InvalidBaseUrl {
			url: base.to_string(),
			reason,
		})
	}

	fn from_file(file: FileConfig) -> Self {
		let defaults = Self::default();

		let reconnect_schedule = match file.connection.reconnect_schedule_ms {
			Some(ms) if !ms.is_empty() => ms.into_iter().map(Duration::from_millis).collect(),
			_ => defaults.reconnect_schedule,
		};

		Self {
			api_base_url: file.api_base_url.filter(|s| !s.trim().is_empty()),
			hub_path: file
				.hub_path
				.filter(|s| !s.trim().is_empty())
				.unwrap_or(defaults.hub_path),
			auth_token: file.auth_token.filter(|s| !s.trim().is_empty()).map(SecretString::new),
			current_user_id: file.current_user_id.filter(|s| !s.trim().is_empty()),
			connect_timeout: file
				.connection
				.connect_timeout_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.connect_timeout),
			invocation_timeout: file
				.connection
				.invocation_timeout_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.invocation_timeout),
			reconnect_schedule,
			auto_reconnect: file.connection.auto_reconnect.unwrap_or(defaults.auto_reconnect),
			room_queue_capacity: file
				.connection
				.room_queue_capacity
				.filter(|v| *v > 0)
				.unwrap_or(defaults.room_queue_capacity),
			max_frame_bytes: file
				.connection
				.max_frame_bytes
				.filter(|v| *v > 0)
				.unwrap_or(defaults.max_frame_bytes),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	api_base_url: Option<String>,
	hub_path: Option<String>,
	auth_token: Option<String>,
	current_user_id: Option<String>,

	#[serde(default)]
	connection: FileConnectionSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConnectionSettings {
	connect_timeout_ms: Option<u64>,
	invocation_timeout_ms: Option<u64>,
	reconnect_schedule_ms: Option<Vec<u64>>,
	auto_reconnect: Option<bool>,
	room_queue_capacity: Option<usize>,
	max_frame_bytes: Option<usize>,
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ClientSettings) {
	apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut ClientSettings, var: impl Fn(&str) -> Option<String>) {
	if let Some(v) = var("PACTLINE_API_BASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.api_base_url = Some(v);
			info!("client config: api_base_url overridden by env");
		}
	}

	if let Some(v) = var("PACTLINE_HUB_PATH") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.hub_path = v;
			info!("client config: hub_path overridden by env");
		}
	}

	if let Some(v) = var("PACTLINE_AUTH_TOKEN") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.auth_token = Some(SecretString::new(v));
			info!("client auth: auth_token overridden by env");
		}
	}

	if let Some(v) = var("PACTLINE_CURRENT_USER_ID") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.current_user_id = Some(v);
			info!("client config: current_user_id overridden by env");
		}
	}

	if let Some(v) = var("PACTLINE_CONNECT_TIMEOUT_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
	{
		cfg.connect_timeout = Duration::from_millis(ms);
		info!(ms, "client config: connect_timeout overridden by env");
	}

	if let Some(v) = var("PACTLINE_RECONNECT_SCHEDULE_MS") {
		match parse_ms_list(&v) {
			Some(ms) => {
				info!(schedule = ?ms, "client config: reconnect_schedule overridden by env");
				cfg.reconnect_schedule = ms.into_iter().map(Duration::from_millis).collect();
			}
			None => warn!(value = %v, "ignoring invalid PACTLINE_RECONNECT_SCHEDULE_MS"),
		}
	}

	if let Some(v) = var("PACTLINE_AUTO_RECONNECT")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.auto_reconnect = enabled;
		info!(enabled, "client config: auto_reconnect overridden by env");
	}

	if let Some(v) = var("PACTLINE_ROOM_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.room_queue_capacity = capacity;
		info!(capacity, "client config: room_queue_capacity overridden by env");
	}
}
