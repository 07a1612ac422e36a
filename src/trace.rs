//! Internal diagnostics channel, configured once from the environment.
//!
//! `LANTERN_LOG` selects the minimum level (`debug`, `info`, `warn`,
//! `error`; default `warn` so the core is silent in normal use).
//! `LANTERN_LOG_FORMAT=json` switches from text lines to JSON lines.
//! Everything goes to stderr.

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Json,
}

struct Config {
    min_level: Level,
    format: Format,
}

fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| {
        let min_level = match std::env::var("LANTERN_LOG")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "debug" => Level::Debug,
            "info" => Level::Info,
            "error" => Level::Error,
            // Default to warn (also covers empty / unrecognised values)
            _ => Level::Warn,
        };

        let format = match std::env::var("LANTERN_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => Format::Json,
            _ => Format::Text,
        };

        Config { min_level, format }
    })
}

pub(crate) fn enabled(level: Level) -> bool {
    level >= config().min_level
}

pub(crate) fn emit(level: Level, target: &str, message: &str) {
    if !enabled(level) {
        return;
    }
    match config().format {
        Format::Text => eprintln!("[{}] {}: {}", level.label(), target, message),
        Format::Json => {
            let record = serde_json::json!({
                "level": level.label(),
                "target": target,
                "message": message,
            });
            eprintln!("{}", record);
        }
    }
}
