//! Logging setup and the component event macros.
//!
//! Every event the crate emits through [`log_event!`], [`debug_event!`] or
//! [`warn_event!`] uses `datapool::<component>` as its tracing target, so
//! components filter independently of the module they live in:
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! registry = "debug"      # datapool::registry
//! mirror = "info"         # datapool::mirror
//! "notify::inotify" = "trace"  # qualified keys are used as given
//! ```
//!
//! `RUST_LOG` replaces the configured filter entirely:
//! ```bash
//! RUST_LOG=datapool::folder=debug datapool watch src
//! ```

use std::sync::Once;

use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Target prefix shared by every component.
pub const TARGET_ROOT: &str = "datapool";

static INIT: Once = Once::new();

/// Wall clock, milliseconds, no date.
struct ClockTime;

impl FormatTime for ClockTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Full tracing target for a `[logging.modules]` key.
///
/// Bare component names live under [`TARGET_ROOT`]; the root itself and
/// anything already qualified with `::` pass through.
pub fn target_for(module: &str) -> String {
    if module == TARGET_ROOT || module.contains("::") {
        module.to_string()
    } else {
        format!("{TARGET_ROOT}::{module}")
    }
}

/// The `EnvFilter` directive string for `config`, overrides sorted by key.
pub fn directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<(&String, &String)> = config.modules.iter().collect();
    modules.sort();
    let mut out = config.default.clone();
    for (module, level) in modules {
        out.push(',');
        out.push_str(&target_for(module));
        out.push('=');
        out.push_str(level);
    }
    out
}

fn filter(config: &LoggingConfig) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    let directives = directives(config);
    EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("Warning: invalid [logging] settings '{directives}': {e}");
        EnvFilter::new(&config.default)
    })
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(ClockTime)
            .with_filter(filter(config));
        tracing_subscriber::registry().with(layer).init();
    });
}

/// Info-level event for a component.
///
/// ```ignore
/// log_event!("mirror", "imported", "{} entries", index.len());
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:literal, $event:expr) => {
        tracing::info!(target: concat!("datapool::", $component), "{}", $event)
    };
    ($component:literal, $event:expr, $($arg:tt)*) => {
        tracing::info!(target: concat!("datapool::", $component), "{}: {}", $event, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug_event {
    ($component:literal, $event:expr) => {
        tracing::debug!(target: concat!("datapool::", $component), "{}", $event)
    };
    ($component:literal, $event:expr, $($arg:tt)*) => {
        tracing::debug!(target: concat!("datapool::", $component), "{}: {}", $event, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn_event {
    ($component:literal, $($arg:tt)*) => {
        tracing::warn!(target: concat!("datapool::", $component), $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tracing::Level;

    fn config(modules: &[(&str, &str)]) -> LoggingConfig {
        LoggingConfig {
            default: "warn".to_string(),
            modules: modules
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_bare_keys_map_to_component_targets() {
        assert_eq!(target_for("registry"), "datapool::registry");
        assert_eq!(target_for("datapool"), "datapool");
        assert_eq!(target_for("notify::inotify"), "notify::inotify");
        assert_eq!(
            directives(&config(&[("registry", "debug"), ("folder", "info")])),
            "warn,datapool::folder=info,datapool::registry=debug"
        );
    }

    #[test]
    fn test_module_override_enables_component_events() {
        let filter = EnvFilter::new(directives(&config(&[("registry", "debug")])));
        let subscriber = tracing_subscriber::registry().with(filter);

        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(target: "datapool::registry", Level::DEBUG));
            assert!(!tracing::enabled!(target: "datapool::folder", Level::DEBUG));
            assert!(tracing::enabled!(target: "datapool::folder", Level::WARN));
        });
    }
}
