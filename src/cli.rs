//! CLI for this application
//!
use crate::limiters::Algorithm;
use crate::queue::ProcessingMode;
use crate::settings;

#[derive(Clone, Debug, clap::Parser)]
#[command(name = "interlink", version, about = "Cross-application communication layer")]
pub struct Cli {
    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("INTERLINK_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // HTTP API listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("INTERLINK_HTTP_LISTEN_PORT"),
        help = "Port to bind the HTTP API server to"
    )]
    pub listen_port: u16,

    // Rate limit settings: max requests (per window)
    #[clap(
        long,
        default_value = "100",
        env("INTERLINK_RATE_LIMIT_MAX_REQUESTS"),
        help = "Max events admitted per key per window"
    )]
    pub rate_limit_max_requests: u32,

    // Rate limit settings: window length
    #[clap(
        long,
        default_value = "60000",
        env("INTERLINK_RATE_LIMIT_WINDOW_MS"),
        help = "Rate limit window in milliseconds"
    )]
    pub rate_limit_window_ms: u64,

    #[clap(
        long,
        default_value = "sliding-window",
        env("INTERLINK_RATE_LIMIT_ALGORITHM"),
        help = "'sliding-window', 'token-bucket', or 'fixed-window'"
    )]
    pub rate_limit_algorithm: Algorithm,

    #[clap(
        long,
        default_value = "60000",
        env("INTERLINK_RATE_LIMIT_SWEEP_INTERVAL_MS"),
        help = "How often expired rate limit entries are removed"
    )]
    pub rate_limit_sweep_interval_ms: u64,

    #[clap(
        long,
        default_value = "1000",
        env("INTERLINK_QUEUE_MAX_SIZE"),
        help = "Maximum number of queued messages"
    )]
    pub queue_max_size: usize,

    #[clap(
        long,
        default_value = "priority",
        env("INTERLINK_QUEUE_MODE"),
        help = "Queue ordering: 'fifo', 'lifo', or 'priority'"
    )]
    pub queue_mode: ProcessingMode,

    #[clap(
        long,
        env("INTERLINK_QUEUE_PERSISTENCE"),
        help = "Persist queued messages to storage"
    )]
    pub queue_persistence: bool,

    #[clap(
        long,
        default_value = "1000",
        env("INTERLINK_QUEUE_PROCESSING_INTERVAL_MS"),
        help = "Interval of the background queue drain"
    )]
    pub queue_processing_interval_ms: u64,

    #[clap(
        long,
        default_value = "3",
        env("INTERLINK_QUEUE_MAX_RETRIES"),
        help = "Failed attempts retried before a message is dropped"
    )]
    pub queue_max_retries: u32,

    #[clap(
        long,
        default_value = "1000",
        env("INTERLINK_QUEUE_INITIAL_DELAY_MS"),
        help = "Delay before the first retry"
    )]
    pub queue_initial_delay_ms: u64,

    #[clap(
        long,
        default_value = "2.0",
        env("INTERLINK_QUEUE_BACKOFF_MULTIPLIER"),
        help = "Multiplier applied to the delay after each failure"
    )]
    pub queue_backoff_multiplier: f64,

    #[clap(
        long,
        default_value = "30000",
        env("INTERLINK_QUEUE_MAX_DELAY_MS"),
        help = "Upper bound for retry delays"
    )]
    pub queue_max_delay_ms: u64,
}

impl Cli {
    pub fn into_settings(self) -> settings::Settings {
        settings::Settings {
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            rate_limit: settings::RateLimitSettings {
                max_requests: self.rate_limit_max_requests,
                window_ms: self.rate_limit_window_ms,
                algorithm: self.rate_limit_algorithm,
                sweep_interval_ms: self.rate_limit_sweep_interval_ms,
            },
            queue: settings::QueueSettings {
                max_size: self.queue_max_size,
                processing_mode: self.queue_mode,
                persistence: self.queue_persistence,
                processing_interval_ms: self.queue_processing_interval_ms,
                retry: settings::RetrySettings {
                    max_retries: self.queue_max_retries,
                    initial_delay_ms: self.queue_initial_delay_ms,
                    backoff_multiplier: self.queue_backoff_multiplier,
                    max_delay_ms: self.queue_max_delay_ms,
                },
            },
            conflict_history_limit: settings::CONFLICT_HISTORY_LIMIT,
        }
    }
}
