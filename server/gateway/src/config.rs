use clap::Parser;

/// Process configuration. Grounded on
/// `Duocast-TSOD/server/gateway/src/config.rs`'s `clap::Parser` struct;
/// fields cover the listener, TLS material, and the tunables spec.md §9
/// leaves as "tunable but normative defaults" (retention window/sweep,
/// rate-limiter capacities, inactivity deadline). INI file loading and the
/// `[mysql]` persistence section are out of scope (non-goal) — nothing
/// here reads an INI file.
#[derive(Parser, Debug, Clone)]
#[command(name = "chat-gateway", about = "Real-time chat backend gateway")]
pub struct Config {
    /// TCP listen address, e.g. "0.0.0.0:7000".
    #[arg(long, env = "CHAT_LISTEN", default_value = "0.0.0.0:7000")]
    pub listen: String,

    /// PEM certificate chain. When omitted (together with `tls_key_pem`) a
    /// self-signed certificate is generated for `localhost` at startup.
    #[arg(long, env = "CHAT_TLS_CERT_PEM")]
    pub tls_cert_pem: Option<String>,

    #[arg(long, env = "CHAT_TLS_KEY_PEM")]
    pub tls_key_pem: Option<String>,

    /// Global rate-limiter bucket capacity / refill-per-second (spec.md §4.3 default 500).
    #[arg(long, default_value_t = 500.0)]
    pub rate_limit_global_capacity: f64,

    /// Per-peer rate-limiter bucket capacity / refill-per-second (spec.md §4.3 default 5).
    #[arg(long, default_value_t = 5.0)]
    pub rate_limit_peer_capacity: f64,

    /// How often the rate limiter evicts idle per-peer buckets, in seconds.
    #[arg(long, default_value_t = 30)]
    pub rate_limit_sweep_secs: u64,

    /// A per-peer bucket idle for longer than this (seconds) is evicted.
    #[arg(long, default_value_t = 60)]
    pub rate_limit_idle_secs: u64,

    /// Message retention window, in days (spec.md §4.7/§4.8 default 7).
    #[arg(long, default_value_t = 7)]
    pub retention_days: i64,

    /// How often the retention sweep runs, in minutes (default 10).
    #[arg(long, default_value_t = 10)]
    pub retention_sweep_minutes: u64,

    /// Per-connection inactivity deadline, in seconds (spec.md §4.2 default 60).
    #[arg(long, default_value_t = 60)]
    pub inactivity_deadline_secs: u64,

    /// Heartbeat flood threshold: at most this many HeartBeat frames per
    /// `heartbeat_window_secs` before the connection is dropped (default 10/10s).
    #[arg(long, default_value_t = 10)]
    pub heartbeat_limit: u32,

    #[arg(long, default_value_t = 10)]
    pub heartbeat_window_secs: u64,

    /// Worker pool size; spec.md §5 requires `max(12, hardware_concurrency)`.
    #[arg(long)]
    pub worker_threads: Option<usize>,
}

impl Config {
    pub fn resolved_worker_threads(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .max(12)
    }
}
