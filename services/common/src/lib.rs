use std::{
    env, fs, io,
    net::SocketAddr,
    panic,
    path::{Path, PathBuf},
    str::FromStr,
    thread,
    time::{Duration, SystemTime},
};
use tokio::net::TcpListener;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

const DEFAULT_LOG_DIR: &str = "/var/log/studio";

/// Keeps the non-blocking file writer alive; drop it only on shutdown.
pub struct TracingGuards {
    _file_guard: Option<WorkerGuard>,
}

pub fn init_tracing(service_name: &str) -> TracingGuards {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_root = PathBuf::from(env_opt("LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()))
        .join(service_name);
    let stdout_layer = fmt::layer().with_writer(io::stdout);

    let file_writer = fs::create_dir_all(&log_root)
        .ok()
        .and_then(|_| {
            // The rolling appender panics on unwritable directories.
            panic::catch_unwind(|| {
                tracing_appender::rolling::daily(&log_root, format!("{service_name}.log"))
            })
            .ok()
        })
        .map(tracing_appender::non_blocking);

    let file_guard = match file_writer {
        Some((writer, guard)) => {
            let subscriber = Registry::default()
                .with(filter)
                .with(stdout_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer));
            let _ = tracing::subscriber::set_global_default(subscriber);
            Some(guard)
        }
        None => {
            let subscriber = Registry::default().with(filter).with(stdout_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
            None
        }
    };

    if file_guard.is_some() {
        let retention_days = env_or("LOG_RETENTION_DAYS", 14u64);
        let cleanup_interval = env_or("LOG_CLEANUP_INTERVAL_MINUTES", 360u64);
        spawn_log_cleanup(log_root, retention_days, cleanup_interval);
    }

    TracingGuards {
        _file_guard: file_guard,
    }
}

/// Typed environment value with a fallback when unset or unparsable.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key)
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

/// Trimmed, non-empty environment value.
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Comma-separated list, each entry trimmed; empty entries are dropped.
pub fn env_csv(key: &str) -> Vec<String> {
    env_opt(key)
        .map(|value| split_csv(&value))
        .unwrap_or_default()
}

pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn spawn_log_cleanup(log_root: PathBuf, retention_days: u64, cleanup_interval_minutes: u64) {
    if retention_days == 0 || cleanup_interval_minutes == 0 {
        return;
    }

    let retention = Duration::from_secs(retention_days * 24 * 60 * 60);
    let interval = Duration::from_secs(cleanup_interval_minutes * 60);

    thread::spawn(move || loop {
        if let Some(cutoff) = SystemTime::now().checked_sub(retention) {
            if let Err(err) = prune_logs_older_than(&log_root, cutoff) {
                tracing::warn!(error = %err, path = %log_root.display(), "log cleanup failed");
            }
        }
        thread::sleep(interval);
    });
}

fn prune_logs_older_than(root: &Path, cutoff: SystemTime) -> io::Result<()> {
    for entry in fs::read_dir(root)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            prune_logs_older_than(&path, cutoff)?;
            continue;
        }
        let modified = match entry.metadata().and_then(|metadata| metadata.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        if modified < cutoff {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

pub async fn bind_listener(port: u16) -> io::Result<TcpListener> {
    // All interfaces, so the service works inside containers.
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr).await
}

pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "sigterm handler unavailable");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::split_csv;

    #[test]
    fn csv_entries_are_trimmed_and_empty_ones_dropped() {
        let entries = split_csv(" a@x.com, ,B@x.com ,,");
        assert_eq!(entries, vec!["a@x.com".to_string(), "B@x.com".to_string()]);
    }
}
