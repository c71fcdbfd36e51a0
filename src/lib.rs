pub mod cni;
pub mod error;
pub mod nft;
pub mod plugin;

#[cfg(target_os = "linux")]
pub mod security;

pub use error::{Error, Result};
pub use plugin::{FirewallPlugin, PortmapPlugin};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initializes logging. Stdout belongs to the CNI result document, so
/// console output goes to stderr; `BRIDGEWALL_LOG_FILE` redirects it to a
/// file instead (the runtime passes no flags, so file logging is
/// environment-driven). Returns the appender guard that must stay alive
/// for the process lifetime.
pub fn init_logging(debug: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("BRIDGEWALL_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match std::env::var("BRIDGEWALL_LOG_FILE") {
        Ok(path) if !path.is_empty() => {
            let file_appender = tracing_appender::rolling::never("", &path);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let subscriber = subscriber.with(fmt::layer().with_writer(non_blocking));
            if tracing::subscriber::set_global_default(subscriber).is_err() {
                eprintln!("logging already initialized");
            }
            Some(guard)
        }
        _ => {
            let subscriber = subscriber.with(fmt::layer().with_writer(std::io::stderr));
            if tracing::subscriber::set_global_default(subscriber).is_err() {
                eprintln!("logging already initialized");
            }
            None
        }
    }
}
