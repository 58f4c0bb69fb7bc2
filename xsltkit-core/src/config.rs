//! Worker pool configuration

use std::env;

/// Environment variable overriding the worker count
pub const THREADS_ENV: &str = "XSLTKIT_THREADS";
/// Environment variable overriding the worker stack size, in bytes
pub const STACK_SIZE_ENV: &str = "XSLTKIT_STACK_SIZE";

/// Default worker stack size. Stylesheet recursion runs on the worker stack.
pub const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub threads: usize,
    pub stack_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            threads: num_cpus::get(),
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl Config {
    /// Defaults, overridden by `XSLTKIT_THREADS` and `XSLTKIT_STACK_SIZE`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();
        if let Some(threads) = positive(THREADS_ENV, lookup(THREADS_ENV)) {
            config.threads = threads;
        }
        if let Some(stack_size) = positive(STACK_SIZE_ENV, lookup(STACK_SIZE_ENV)) {
            config.stack_size = stack_size;
        }
        config
    }

    /// Override the worker count, e.g. from a command-line flag
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        if let Some(threads) = threads.filter(|&n| n > 0) {
            self.threads = threads;
        }
        self
    }
}

fn positive(key: &str, value: Option<String>) -> Option<usize> {
    let value = value?;
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(%key, %value, "ignoring invalid value, expected a positive integer");
            None
        }
    }
}
