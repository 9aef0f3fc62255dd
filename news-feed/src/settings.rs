use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{0} must be at least 1")]
    Zero(&'static str),

    #[error("default page size {default} exceeds the maximum {max}")]
    DefaultAboveMax { default: usize, max: usize },
}

/// Validated runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub listen: SocketAddr,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub fanout_workers: usize,
    pub fanout_queue_capacity: usize,
    /// Recipient count from which a single fanout writes in parallel.
    pub parallel_threshold: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8000)),
            default_page_size: 20,
            max_page_size: 20,
            fanout_workers: 4,
            fanout_queue_capacity: 1024,
            parallel_threshold: 256,
        }
    }
}

impl Settings {
    pub fn validate(self) -> Result<Self, SettingsError> {
        for (name, value) in [
            ("default page size", self.default_page_size),
            ("max page size", self.max_page_size),
            ("fanout workers", self.fanout_workers),
            ("fanout queue capacity", self.fanout_queue_capacity),
        ] {
            if value == 0 {
                return Err(SettingsError::Zero(name));
            }
        }

        if self.default_page_size > self.max_page_size {
            return Err(SettingsError::DefaultAboveMax {
                default: self.default_page_size,
                max: self.max_page_size,
            });
        }

        Ok(self)
    }

    /// Page size to use for a request: the default when none was asked for,
    /// otherwise the request clamped into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}
