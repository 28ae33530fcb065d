//! Tracing setup: compact terminal output, plus daily log files when a log
//! directory is configured.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Longest `message` field written before truncation.
const MAX_MESSAGE_CHARS: usize = 280;

/// Install the global subscriber. Hold the returned guard until exit so the
/// file writer flushes.
pub fn init_tracing(debug: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let field_formatter = format::debug_fn(|writer, field, value| {
        if field.name() == "message" {
            let formatted = format!("{value:?}");
            let (truncated, was_truncated) = truncate_for_log(&formatted, MAX_MESSAGE_CHARS);
            if was_truncated {
                write!(writer, "{truncated}...")
            } else {
                write!(writer, "{formatted}")
            }
        } else {
            write!(writer, "{}={value:?}", field.name())
        }
    });

    let terminal_layer = tracing_subscriber::fmt::layer()
        .fmt_fields(field_formatter.clone())
        .compact();

    match log_dir {
        Some(log_dir) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, "tamamo.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .fmt_fields(field_formatter)
                .compact();

            tracing_subscriber::registry()
                .with(build_env_filter(debug))
                .with(terminal_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(build_env_filter(debug))
                .with(terminal_layer)
                .init();
            None
        }
    }
}

/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `--debug`.
fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

fn truncate_for_log(message: &str, max_chars: usize) -> (&str, bool) {
    match message.char_indices().nth(max_chars) {
        Some((byte_index, _character)) => (&message[..byte_index], true),
        None => (message, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_for_log_handles_multibyte_characters() {
        let (truncated, was_truncated) = truncate_for_log("スレッド返信", 3);

        assert!(was_truncated);
        assert_eq!(truncated, "スレッ");
    }

    #[test]
    fn truncate_for_log_returns_original_when_within_limit() {
        let (truncated, was_truncated) = truncate_for_log("hello", 10);

        assert!(!was_truncated);
        assert_eq!(truncated, "hello");
    }
}
