use serde::{Deserialize, Serialize};
use tracing::info;

// ---------------------------------------------------------------------------
// Mesh configuration — loaded from environment variables
// ---------------------------------------------------------------------------

/// Configuration handed to the peer session manager at construction.
///
/// Every field can be set via an environment variable prefixed with
/// `LIVEMESH_`.  Defaults are suitable for local development against a public
/// STUN server; production deployments should supply their own TURN relay.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Signaling relay endpoint (opaque to the core; the channel
    /// implementation interprets it).
    pub signaling_url: String,

    // ── ICE ─────────────────────────────────────────────────────────────
    /// STUN server URLs handed to every peer connection.
    pub stun_urls: Vec<String>,
    /// TURN relay URLs (empty = direct/STUN only).
    pub turn_urls: Vec<String>,
    /// TURN username (long-term credentials).
    pub turn_username: String,
    /// TURN password.
    pub turn_password: String,

    // ── Recording surface ───────────────────────────────────────────────
    /// Width of the compositor surface in pixels.
    pub recording_width: u32,
    /// Height of the compositor surface in pixels.
    pub recording_height: u32,
    /// Target frame rate of the compositor draw tick.
    pub recording_fps: u32,

    // ── Logging ─────────────────────────────────────────────────────────
    pub log_level: String,
}

impl MeshConfig {
    /// Load configuration from environment variables.
    ///
    /// Automatically loads a `.env` file if present (via `dotenvy`).
    pub fn from_env() -> Self {
        // Best-effort .env loading — ignore errors.
        let _ = dotenvy::dotenv();

        let signaling_url = env_or("LIVEMESH_SIGNALING_URL", "ws://localhost:5000");

        let stun_urls = env_csv("LIVEMESH_STUN_URLS", &["stun:stun.l.google.com:19302"]);
        let turn_urls = env_csv("LIVEMESH_TURN_URLS", &[]);
        let turn_username = env_or("LIVEMESH_TURN_USERNAME", "");
        let turn_password = env_or("LIVEMESH_TURN_PASSWORD", "");

        let recording_width = env_or("LIVEMESH_RECORDING_WIDTH", "1280")
            .parse::<u32>()
            .unwrap_or(1280);
        let recording_height = env_or("LIVEMESH_RECORDING_HEIGHT", "720")
            .parse::<u32>()
            .unwrap_or(720);
        let recording_fps = env_or("LIVEMESH_RECORDING_FPS", "30")
            .parse::<u32>()
            .unwrap_or(30);

        let log_level = env_or("LIVEMESH_LOG_LEVEL", "info");

        let config = MeshConfig {
            signaling_url,
            stun_urls,
            turn_urls,
            turn_username,
            turn_password,
            recording_width,
            recording_height,
            recording_fps,
            log_level,
        };

        config.log_summary();
        config
    }

    /// Build the ICE server list for a peer connection.
    ///
    /// STUN entries carry no credentials; TURN entries carry the configured
    /// long-term credentials.
    pub fn ice_servers(&self) -> Vec<IceServerConfig> {
        let mut servers: Vec<IceServerConfig> = Vec::new();

        for url in &self.stun_urls {
            servers.push(IceServerConfig {
                urls: vec![url.clone()],
                username: None,
                credential: None,
            });
        }

        for url in &self.turn_urls {
            servers.push(IceServerConfig {
                urls: vec![url.clone()],
                username: Some(self.turn_username.clone()),
                credential: Some(self.turn_password.clone()),
            });
        }

        servers
    }

    fn log_summary(&self) {
        info!("──── LiveMesh Configuration ────");
        info!("  signaling_url    : {}", self.signaling_url);
        info!("  stun_urls        : {:?}", self.stun_urls);
        info!("  turn_urls        : {:?}", self.turn_urls);
        info!(
            "  recording        : {}x{} @ {} fps",
            self.recording_width, self.recording_height, self.recording_fps
        );
        info!("  log_level        : {}", self.log_level);
        info!("────────────────────────────────");
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            signaling_url: "ws://localhost:5000".into(),
            stun_urls: vec!["stun:stun.l.google.com:19302".into()],
            turn_urls: vec![],
            turn_username: String::new(),
            turn_password: String::new(),
            recording_width: 1280,
            recording_height: 720,
            recording_fps: 30,
            log_level: "info".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ICE server configuration
// ---------------------------------------------------------------------------

/// ICE server entry, JSON-compatible with the W3C `RTCIceServer` dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

// ---------------------------------------------------------------------------
// Environment helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_csv(key: &str, defaults: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => defaults.iter().map(|s| s.to_string()).collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
