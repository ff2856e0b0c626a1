use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Port for the HTTP API server.
    #[arg(long, env = "HTTP_PORT", default_value = "3000")]
    pub http_port: u16,

    /// Static bearer token for admin surfaces (dashboard API, admin room).
    /// Admin authentication always fails when unset.
    #[arg(long, env = "ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// Optional API key required for clients to open a WebSocket connection.
    /// If set, clients must provide this key as a `key` query parameter.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    // --- Storage Args ---
    /// Record store type (redis, memory)
    #[arg(long, env = "STORAGE_TYPE", default_value = "redis")]
    pub storage_type: String,

    /// Record store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "STORAGE_HOST", default_value = "redis://127.0.0.1:6379")]
    pub storage_host: String,

    /// Prefix for record store keys.
    #[arg(long, env = "STORAGE_PREFIX", default_value = "studio:")]
    pub storage_prefix: String,

    /// Maximum number of messages returned per history fetch.
    #[arg(long, env = "HISTORY_LIMIT", default_value = "200")]
    pub history_limit: usize,

    // --- Booking Args ---
    /// Minimum separation in minutes enforced between two booked slots.
    #[arg(long, env = "COLLISION_WINDOW_MINUTES", default_value = "30")]
    pub collision_window_minutes: i64,

    /// Comma-separated appointment slots offered to clients (e.g. "8:30 AM").
    #[arg(
        long,
        env = "BOOKING_SLOTS",
        default_value = "8:30 AM,9:00 AM",
        value_delimiter = ','
    )]
    pub booking_slots: Vec<String>,

    // --- Notification Args ---
    /// HTTP email relay endpoint. Email notifications are disabled when
    /// unset.
    #[arg(long, env = "NOTIFY_URL")]
    pub notify_url: Option<String>,

    /// Bearer key for the email relay.
    #[arg(long, env = "NOTIFY_API_KEY")]
    pub notify_api_key: Option<String>,

    /// From address for outbound notification email.
    #[arg(long, env = "NOTIFY_FROM", default_value = "studio@localhost")]
    pub notify_from: String,

    /// Destination address for outbound notification email.
    #[arg(long, env = "NOTIFY_TO", default_value = "owner@localhost")]
    pub notify_to: String,

    // --- TLS Args ---
    /// Optional path to the TLS certificate file (PEM format) for enabling
    /// WSS/HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling
    /// WSS/HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Default for Args {
    fn default() -> Self {
        Args::parse_from(["studio-relay"])
    }
}
