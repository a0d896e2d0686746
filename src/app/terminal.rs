//! Terminal plumbing: log setup, progress bars and the y/N prompt.

use std::io::{self, BufRead, IsTerminal, Write};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Log level for a `-v` count: warn by default, info with `-v`, debug from `-vv`.
pub(crate) fn default_log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Installs the stderr subscriber. `RUST_LOG` wins over the `-v` level.
pub(crate) fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_env_filter(filter)
        .init();
}

/// Progress bar for a batch, drawn on stderr only when it is a terminal.
pub(crate) fn batch_progress(total: usize, desc: &str, unit: &str) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(
        Some(u64::try_from(total).unwrap_or(u64::MAX)),
        if io::stderr().is_terminal() {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        },
    );
    let template = format!("{{msg}}: {{percent:>3}}%|{{bar:30}}| {{pos}}/{{len}} [{{elapsed}}] {unit}");
    bar.set_style(
        ProgressStyle::with_template(&template).unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(desc.to_string());
    bar
}

/// Asks a yes/no question on stderr and reads the answer from `input`.
///
/// Anything but `y`/`yes` (including end of input) counts as no.
pub(crate) fn confirm(prompt: &str, input: &mut impl BufRead) -> io::Result<bool> {
    let mut stderr = io::stderr();
    write!(stderr, "{prompt} [y/N]: ")?;
    stderr.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level_mapping() {
        assert_eq!(default_log_level(0), "warn");
        assert_eq!(default_log_level(1), "info");
        assert_eq!(default_log_level(2), "debug");
        assert_eq!(default_log_level(9), "debug");
    }

    #[test]
    fn test_confirm_accepts_yes() {
        assert!(confirm("continue?", &mut &b"y\n"[..]).unwrap());
        assert!(confirm("continue?", &mut &b"YES\n"[..]).unwrap());
    }

    #[test]
    fn test_confirm_defaults_to_no() {
        assert!(!confirm("continue?", &mut &b"\n"[..]).unwrap());
        assert!(!confirm("continue?", &mut &b"nope\n"[..]).unwrap());
        assert!(!confirm("continue?", &mut &b""[..]).unwrap());
    }

    #[test]
    fn test_batch_progress_length() {
        let bar = batch_progress(5, "Scanning", "file");
        assert_eq!(bar.length(), Some(5));
        assert_eq!(bar.message(), "Scanning");
    }
}
