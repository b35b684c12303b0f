use crate::config::Config;
use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// HTTP stack modules on both sides of the sign-in: the reqwest client and the
/// axum loopback listener. At debug level they log every connection.
const HTTP_STACK_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "axum", "tower", "mio"];

pub struct Logger {}

impl Logger {
    /// Installs a terminal logger at the configured level.
    ///
    /// The HTTP stack is only shown at TRACE. Fails if a global logger is
    /// already installed.
    pub fn init_logger(config: &Config) -> Result<(), SetLoggerError> {
        TermLogger::init(
            config.log_level_filter,
            Self::build_log_config(config.log_level_filter),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
    }

    /// Module prefixes silenced at `level`.
    fn ignored_modules(level: LevelFilter) -> &'static [&'static str] {
        match level {
            LevelFilter::Trace => &[],
            _ => HTTP_STACK_MODULES,
        }
    }

    fn build_log_config(level: LevelFilter) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();
        for module in Self::ignored_modules(level) {
            builder.add_filter_ignore_str(module);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_shows_http_stack() {
        assert!(Logger::ignored_modules(LevelFilter::Trace).is_empty());
    }

    #[test]
    fn test_other_levels_hide_http_stack() {
        for level in [
            LevelFilter::Off,
            LevelFilter::Error,
            LevelFilter::Warn,
            LevelFilter::Info,
            LevelFilter::Debug,
        ] {
            let ignored = Logger::ignored_modules(level);
            for module in ["hyper", "reqwest", "axum", "mio"] {
                assert!(ignored.contains(&module), "{module} shown at {level}");
            }
            // Our own crates are never filtered
            assert!(!ignored.iter().any(|m| m.starts_with("qonic")));
        }
    }
}
