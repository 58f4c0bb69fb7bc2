//! Process-wide worker pool
//!
//! The rayon global pool is built at most once. Calling [`configure`] before
//! the first async operation sizes it; otherwise the first [`spawn`] falls
//! back to the environment configuration.

use once_cell::sync::OnceCell;

use crate::config::Config;

static CONFIGURED: OnceCell<Config> = OnceCell::new();

/// Build the global pool from `config`
///
/// Returns the configuration in effect, which is the first one applied if
/// the pool was already built.
pub fn configure(config: &Config) -> &'static Config {
    CONFIGURED.get_or_init(|| {
        let built = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .stack_size(config.stack_size)
            .thread_name(|i| format!("xsltkit-worker-{}", i))
            .build_global()
            .ok(); // Ignore error if pool already initialized
        match built {
            Some(()) => tracing::debug!(
                threads = config.threads,
                stack_size = config.stack_size,
                "worker pool started"
            ),
            None => tracing::debug!("worker pool was already initialized elsewhere"),
        }
        config.clone()
    })
}

/// Configuration in effect, if the pool has been configured
pub fn current() -> Option<&'static Config> {
    CONFIGURED.get()
}

/// Number of worker threads
pub fn threads() -> usize {
    rayon::current_num_threads()
}

/// Run `job` on the pool without blocking the caller
pub fn spawn(job: impl FnOnce() + Send + 'static) {
    if CONFIGURED.get().is_none() {
        configure(&Config::from_env());
    }
    rayon::spawn(job);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_spawn_runs_job() {
        let (tx, rx) = mpsc::channel();
        spawn(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        });
        let name = rx.recv().unwrap();
        assert!(current().is_some());
        // another test may have configured the pool first
        if let Some(name) = name {
            assert!(name.starts_with("xsltkit-worker-") || name.contains("rayon"));
        }
    }
}
