use std::env;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path for snapshots and trade history.
    pub db_path: String,
    /// Broker feed WebSocket URL.
    pub feed_url: String,
    /// Account-id prefixes classified as simulated (case-insensitive).
    pub sim_prefixes: Vec<String>,
    /// Explicit per-account sim baselines, applied once at startup.
    pub sim_baselines: Vec<(String, f64)>,
    /// Baseline for sim accounts recovered from snapshots with no explicit
    /// baseline entry.
    pub sim_default_baseline: Option<f64>,
    /// Minimum interval between snapshot flushes (ms).
    pub snapshot_debounce_ms: u64,
    /// Tick lane capacity; oldest ticks are dropped past this.
    pub tick_buffer: usize,
    /// Outbound broadcast capacity.
    pub outbound_buffer: usize,
    /// Per-symbol instrument point values.
    pub point_values: Vec<(String, f64)>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        // Parse sim baselines from SIM_BASELINES env var
        // Format: "account|amount,account2|amount2"
        let sim_baselines = env::var("SIM_BASELINES")
            .ok()
            .map(|s| parse_pairs(&s))
            .unwrap_or_default();

        // Parse point values from POINT_VALUES env var
        // Format: "SYMBOL|value,SYMBOL2|value2"
        let point_values = env::var("POINT_VALUES")
            .ok()
            .map(|s| parse_pairs(&s))
            .unwrap_or_else(default_point_values);

        let sim_prefixes = env::var("SIM_ACCOUNT_PREFIXES")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "sim".to_string(),
                    "demo".to_string(),
                    "paper".to_string(),
                    "playback".to_string(),
                ]
            });

        Self {
            db_path: env::var("KEEL_DB_PATH").unwrap_or_else(|_| "keel.db".to_string()),
            feed_url: env::var("KEEL_FEED_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:8765/feed".to_string()),
            sim_prefixes,
            sim_baselines,
            sim_default_baseline: env::var("SIM_DEFAULT_BASELINE")
                .ok()
                .and_then(|v| v.parse().ok()),
            snapshot_debounce_ms: env::var("SNAPSHOT_DEBOUNCE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            tick_buffer: env::var("TICK_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024),
            outbound_buffer: env::var("OUTBOUND_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024),
            point_values,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Parse "name|number,name2|number2" pair lists.
fn parse_pairs(s: &str) -> Vec<(String, f64)> {
    s.split(',')
        .filter_map(|pair| {
            let parts: Vec<&str> = pair.split('|').collect();
            if parts.len() >= 2 {
                let name = parts[0].trim();
                let value: f64 = parts[1].trim().parse().ok()?;
                if name.is_empty() {
                    None
                } else {
                    Some((name.to_string(), value))
                }
            } else {
                None
            }
        })
        .collect()
}

/// Common index futures point values.
fn default_point_values() -> Vec<(String, f64)> {
    vec![
        ("ES".to_string(), 50.0),
        ("MES".to_string(), 5.0),
        ("NQ".to_string(), 20.0),
        ("MNQ".to_string(), 2.0),
        ("YM".to_string(), 5.0),
        ("RTY".to_string(), 50.0),
    ]
}
