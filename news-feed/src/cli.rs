use std::net::SocketAddr;

use clap::Parser;

use crate::settings::{Settings, SettingsError};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "News feed service with fanout-on-write", long_about = None)]
pub struct Cli {
    /// Socket address the HTTP API binds to. Use port 0 for an ephemeral port.
    #[arg(long, env = "NEWSFEED_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Page size used when a feed request does not ask for one.
    #[arg(long, env = "NEWSFEED_DEFAULT_PAGE_SIZE", default_value_t = 20)]
    pub default_page_size: usize,

    /// Upper bound applied to requested page sizes.
    #[arg(long, env = "NEWSFEED_MAX_PAGE_SIZE", default_value_t = 20)]
    pub max_page_size: usize,

    /// Number of fanout worker tasks.
    #[arg(long, env = "NEWSFEED_FANOUT_WORKERS", default_value_t = 4)]
    pub fanout_workers: usize,

    /// Fanout jobs that may wait in the queue before enqueueing blocks.
    #[arg(long, env = "NEWSFEED_FANOUT_QUEUE", default_value_t = 1024)]
    pub fanout_queue_capacity: usize,

    /// Recipient count from which one fanout writes in parallel.
    #[arg(long, env = "NEWSFEED_PARALLEL_THRESHOLD", default_value_t = 256)]
    pub parallel_threshold: usize,
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings, SettingsError> {
        Settings {
            listen: self.listen,
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
            fanout_workers: self.fanout_workers,
            fanout_queue_capacity: self.fanout_queue_capacity,
            parallel_threshold: self.parallel_threshold,
        }
        .validate()
    }
}
