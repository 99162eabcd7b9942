#![forbid(unsafe_code)]

pub mod endpoint {
	use url::Url;

	/// Default hub path appended to the base API URL.
	pub const DEFAULT_HUB_PATH: &str = "hubs/chat";

	/// Websocket endpoint of the realtime hub, derived from the base API URL.
	#[derive(Debug, Clone, PartialEq, Eq)]
	pub struct HubEndpoint {
		url: Url,
	}

	impl HubEndpoint {
		/// Derive the hub endpoint from `base` (`http(s)://` or `ws(s)://`) and a
		/// relative hub path.
		///
		/// `http` maps to `ws` and `https` to `wss`. Any path on the base URL is
		/// kept, so `https://api.example.com/v2` + `hubs/chat` yields
		/// `wss://api.example.com/v2/hubs/chat`.
		pub fn from_base_url(base: &str, hub_path: &str) -> Result<Self, String> {
			let base = base.trim();
			if base.is_empty() {
				return Err("base API URL must be non-empty".to_string());
			}

			let mut url = Url::parse(base).map_err(|e| format!("invalid base API URL {base}: {e}"))?;

			let scheme = match url.scheme() {
				"http" | "ws" => "ws",
				"https" | "wss" => "wss",
				other => {
					return Err(format!(
						"unsupported base API URL scheme {other} (expected http, https, ws or wss): {base}"
					));
				}
			};

			if url.host_str().is_none_or(|h| h.is_empty()) {
				return Err(format!("base API URL has no host: {base}"));
			}

			url.set_scheme(scheme)
				.map_err(|_| format!("cannot switch base API URL to {scheme}: {base}"))?;
			url.set_query(None);
			url.set_fragment(None);

			let hub_path = hub_path.trim().trim_matches('/');
			if !hub_path.is_empty() {
				let joined = format!("{}/{}", url.path().trim_end_matches('/'), hub_path);
				url.set_path(&joined);
			}

			Ok(Self { url })
		}

		pub fn as_str(&self) -> &str {
			self.url.as_str()
		}

		pub fn url(&self) -> &Url {
			&self.url
		}

		/// Connection URL carrying the bearer token as `access_token`, the way
		/// browser websockets pass credentials.
		pub fn connect_url(&self, access_token: Option<&str>) -> Url {
			let mut url = self.url.clone();
			if let Some(token) = access_token.map(str::trim).filter(|t| !t.is_empty()) {
				url.query_pairs_mut().append_pair("access_token", token);
			}
			url
		}
	}

	impl std::fmt::Display for HubEndpoint {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			f.write_str(self.url.as_str())
		}
	}

}

pub mod env {
	/// Parse a boolean-ish env value; `None` when unrecognised.
	pub fn parse_env_bool(v: &str) -> Option<bool> {
		match v.trim().to_ascii_lowercase().as_str() {
			"1" | "true" | "yes" | "on" => Some(true),
			"0" | "false" | "no" | "off" => Some(false),
			_ => None,
		}
	}

	/// Parse a comma separated list of millisecond values.
	pub fn parse_ms_list(v: &str) -> Option<Vec<u64>> {
		let parts: Vec<&str> = v.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
		if parts.is_empty() {
			return None;
		}
		parts.into_iter().map(|p| p.parse::<u64>().ok()).collect()
	}

}
