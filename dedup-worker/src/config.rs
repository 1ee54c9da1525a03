use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "worker")]
    pub worker_name: String,

    #[envconfig(default = "100")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(default = "1024")]
    pub max_concurrent_dedups: usize,

    #[envconfig(nested = true)]
    pub group_mutation_retry: GroupMutationRetryConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// Backoff used for the optimistic-concurrency retry loop around group
/// mutation, fed into `dedup_common::retry::RetryPolicy`.
#[derive(Envconfig, Clone)]
pub struct GroupMutationRetryConfig {
    #[envconfig(default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(default = "20")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(default = "1000")]
    pub maximum_interval: EnvMsDuration,

    #[envconfig(default = "5")]
    pub max_attempts: u32,
}
