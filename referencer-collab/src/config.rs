//! Coordinator and server configuration.
//!
//! Environment variables read by [`ServerConfig::from_env`]:
//!
//! | Variable                     | Default          |
//! |------------------------------|------------------|
//! | `HOST`                       | `0.0.0.0`        |
//! | `PORT`                       | `4444`           |
//! | `DB_DIR`                     | `data/yjs-docs`  |
//! | `ARCHIVE_DIR`                | `data/archive`   |
//! | `COLLAB_DEBOUNCE_MS`         | `1000`           |
//! | `COLLAB_FLUSH_INTERVAL_SECS` | `300`            |
//! | `COLLAB_FAST_TIER_LIMIT`     | `131072`         |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 4444;

/// Shortest accepted debounce or flush interval.
pub const MIN_TIMER: Duration = Duration::from_millis(1);
/// Longest accepted debounce or flush interval (30 days).
pub const MAX_TIMER: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Per-room timing and limits.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Quiet period before a fast-tier save (default: 1s)
    pub debounce: Duration,
    /// Periodic slow-tier flush interval (default: 5min)
    pub flush_interval: Duration,
    /// Largest state in bytes written to the fast tier (default: 128 KiB)
    pub fast_tier_limit: usize,
    /// Outbound queue length per connection (default: 256)
    pub outbound_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            flush_interval: Duration::from_secs(5 * 60),
            fast_tier_limit: 128 * 1024,
            outbound_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    /// Short timers so tests observe saves quickly.
    pub fn for_testing() -> Self {
        Self {
            debounce: Duration::from_millis(30),
            flush_interval: Duration::from_secs(3600),
            fast_tier_limit: 128 * 1024,
            outbound_capacity: 64,
        }
    }

    /// Clamp timers into `MIN_TIMER..=MAX_TIMER` and the outbound queue
    /// to at least one slot. Tokio intervals reject a zero period and
    /// deadlines past the clock range overflow.
    pub fn validated(self) -> Self {
        let debounce = clamp_timer("debounce", self.debounce);
        let flush_interval = clamp_timer("flush interval", self.flush_interval);
        let outbound_capacity = if self.outbound_capacity == 0 {
            log::warn!("Outbound capacity must be positive, using 1");
            1
        } else {
            self.outbound_capacity
        };
        Self {
            debounce,
            flush_interval,
            outbound_capacity,
            ..self
        }
    }
}

fn clamp_timer(name: &str, value: Duration) -> Duration {
    let clamped = value.clamp(MIN_TIMER, MAX_TIMER);
    if clamped != value {
        log::warn!("Clamped {name} from {value:?} to {clamped:?}");
    }
    clamped
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: "0.0.0.0:4444")
    pub bind_addr: String,
    /// Fast tier RocksDB directory
    pub storage_path: PathBuf,
    /// Slow tier archive directory
    pub archive_path: PathBuf,
    pub coordinator: CoordinatorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("{DEFAULT_HOST}:{DEFAULT_PORT}"),
            storage_path: PathBuf::from("data/yjs-docs"),
            archive_path: PathBuf::from("data/archive"),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their default;
    /// unparsable values keep their default and log a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let coordinator = CoordinatorConfig::default();

        let host = lookup("HOST")
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port: u16 = parse_or(&lookup, "PORT", DEFAULT_PORT);

        let debounce_ms = parse_or(&lookup, "COLLAB_DEBOUNCE_MS", coordinator.debounce.as_millis() as u64);
        let flush_secs = parse_or(
            &lookup,
            "COLLAB_FLUSH_INTERVAL_SECS",
            coordinator.flush_interval.as_secs(),
        );
        let fast_tier_limit = parse_or(&lookup, "COLLAB_FAST_TIER_LIMIT", coordinator.fast_tier_limit);

        // A zero interval would make the periodic timer panic
        let flush_secs = if flush_secs == 0 {
            log::warn!("COLLAB_FLUSH_INTERVAL_SECS must be positive, using default");
            coordinator.flush_interval.as_secs()
        } else {
            flush_secs
        };

        Self {
            bind_addr: format!("{host}:{port}"),
            storage_path: lookup("DB_DIR").map(PathBuf::from).unwrap_or(defaults.storage_path),
            archive_path: lookup("ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.archive_path),
            coordinator: CoordinatorConfig {
                debounce: Duration::from_millis(debounce_ms),
                flush_interval: Duration::from_secs(flush_secs),
                fast_tier_limit,
                ..coordinator
            }
            .validated(),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid {key}={raw:?}, using default {default}");
            default
        }),
    }
}
