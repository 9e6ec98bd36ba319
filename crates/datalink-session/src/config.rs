use std::str::FromStr;
use std::time::Duration;

use datalink_frame::DEFAULT_MAX_PAYLOAD;
use datalink_transport::{LISTEN_PORT, PEER_PORT};
use serde::{Deserialize, Serialize};

use crate::error::LinkError;

/// Which connection roles the session may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RolePolicy {
    /// Only accept inbound connections.
    ServerOnly,
    /// Only connect out.
    ClientOnly,
    /// Connect out first, fall back to listening.
    #[default]
    Either,
}

impl RolePolicy {
    pub fn allows_client(self) -> bool {
        matches!(self, RolePolicy::ClientOnly | RolePolicy::Either)
    }

    pub fn allows_server(self) -> bool {
        matches!(self, RolePolicy::ServerOnly | RolePolicy::Either)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RolePolicy::ServerOnly => "server-only",
            RolePolicy::ClientOnly => "client-only",
            RolePolicy::Either => "either",
        }
    }
}

impl FromStr for RolePolicy {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server-only" | "server" => Ok(RolePolicy::ServerOnly),
            "client-only" | "client" => Ok(RolePolicy::ClientOnly),
            "either" => Ok(RolePolicy::Either),
            other => Err(LinkError::Config(format!("unknown role policy '{other}'"))),
        }
    }
}

/// Identity announced in our HELLO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalIdentity {
    pub application: String,
    pub version: [u32; 3],
    pub path: String,
    pub exe: String,
    pub plugin: Option<String>,
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self {
            application: "datalink".to_string(),
            version: crate_version(),
            path: String::new(),
            exe: std::env::current_exe()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            plugin: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}

fn crate_version() -> [u32; 3] {
    let mut parts = env!("CARGO_PKG_VERSION")
        .split(['.', '-'])
        .map(|p| p.parse::<u32>().unwrap_or(0));
    [
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    ]
}

/// Session configuration. Read once when the session is created.
///
/// Loadable from JSON; durations are given in milliseconds and every field
/// falls back to its default when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Peer host for the client role.
    pub host: String,
    /// Peer port for the client role.
    pub port: u16,
    /// Port bound in the server role. 0 picks an ephemeral port.
    pub listen_port: u16,
    pub role: RolePolicy,

    /// Bound on one outbound connect attempt.
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    /// How long Listening/Connecting may last without a completed handshake.
    #[serde(rename = "handshake_timeout_ms", with = "duration_ms")]
    pub handshake_timeout: Duration,
    /// Silence after which a connected peer is considered lost.
    #[serde(rename = "keepalive_timeout_ms", with = "duration_ms")]
    pub keepalive_timeout: Duration,
    /// Send PING after this much outbound silence, when `ping_enabled`.
    #[serde(rename = "ping_interval_ms", with = "duration_ms")]
    pub ping_interval: Duration,
    pub ping_enabled: bool,
    /// How long queued outbound bytes may wait on a peer that stopped reading.
    #[serde(rename = "write_stall_timeout_ms", with = "duration_ms")]
    pub write_stall_timeout: Duration,
    /// Periodic reconnect while the remain-connected intent is set.
    #[serde(rename = "reconnect_interval_ms", with = "duration_ms")]
    pub reconnect_interval: Duration,

    /// Adapt the sequence burst to the receiver's acknowledgements.
    pub adaptive_rate: bool,
    /// Frames per tick when adaptive rate is off.
    pub fixed_burst: usize,
    /// Upper bound on messages handled per drain.
    pub max_messages_per_poll: usize,
    /// Nominal scheduler interval.
    #[serde(rename = "tick_interval_ms", with = "duration_ms")]
    pub tick_interval: Duration,
    pub max_payload: usize,

    /// Peer applications that host exactly one character per scene.
    pub single_scene_apps: Vec<String>,
    pub identity: LocalIdentity,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: PEER_PORT,
            listen_port: LISTEN_PORT,
            role: RolePolicy::Either,
            connect_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(60),
            keepalive_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(20),
            ping_enabled: false,
            write_stall_timeout: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(10),
            adaptive_rate: true,
            fixed_burst: crate::rate::FIXED_BURST,
            max_messages_per_poll: 1000,
            tick_interval: Duration::from_micros(33_333),
            max_payload: DEFAULT_MAX_PAYLOAD,
            single_scene_apps: vec!["Character Creator".to_string()],
            identity: LocalIdentity::default(),
        }
    }
}

impl LinkConfig {
    /// Parse a JSON config document.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text).map_err(|err| LinkError::Config(err.to_string()))
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_role(mut self, role: RolePolicy) -> Self {
        self.role = role;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_timeout = timeout;
        self
    }

    pub fn with_write_stall_timeout(mut self, timeout: Duration) -> Self {
        self.write_stall_timeout = timeout;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Enable PING after `interval` of outbound silence.
    pub fn with_ping(mut self, interval: Duration) -> Self {
        self.ping_enabled = true;
        self.ping_interval = interval;
        self
    }

    pub fn with_adaptive_rate(mut self, enabled: bool) -> Self {
        self.adaptive_rate = enabled;
        self
    }

    pub fn with_identity(mut self, identity: LocalIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// True when `application` hosts a single character per scene.
    pub fn is_single_scene_app(&self, application: &str) -> bool {
        self.single_scene_apps.iter().any(|app| app == application)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
