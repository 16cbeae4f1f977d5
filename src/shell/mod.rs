// SPDX-License-Identifier: Apache-2.0

//! Global shell: logging initialization plus a thin progress/output layer.
//!
//! Mirrors the split hipcheck-style tools use between a `log`-based
//! diagnostic stream (verbosity-gated, goes to stderr via `env_logger`) and
//! a user-facing results stream (`Shell::println`), with an
//! [`indicatif::MultiProgress`] backing any progress bars so the two never
//! interleave badly on a terminal.

pub mod verbosity;

use console::Style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt::Display;
use std::sync::OnceLock;
use verbosity::Verbosity;

static GLOBAL_SHELL: OnceLock<Shell> = OnceLock::new();

/// Global handle to the running shell, initialized once per process.
#[derive(Debug)]
pub struct Shell {
    multi_progress: MultiProgress,
    verbosity: Verbosity,
}

impl Shell {
    /// Initialize logging (`env_logger`) and the global shell. Idempotent:
    /// a second call is a no-op rather than a panic, since tests and the
    /// CLI entry point may both want to guarantee initialization.
    pub fn init(verbosity: Verbosity) {
        if GLOBAL_SHELL.get().is_some() {
            return;
        }

        let _ = env_logger::Builder::from_default_env()
            .filter_level(verbosity.log_filter())
            .format_timestamp_millis()
            .try_init();

        console::set_colors_enabled(!crate::config::color_disabled());
        console::set_colors_enabled_stderr(!crate::config::color_disabled());

        let multi_progress = MultiProgress::new();
        if verbosity == Verbosity::Silent {
            multi_progress.set_draw_target(ProgressDrawTarget::hidden());
        }

        let _ = GLOBAL_SHELL.set(Shell {
            multi_progress,
            verbosity,
        });
    }

    pub fn is_init() -> bool {
        GLOBAL_SHELL.get().is_some()
    }

    fn get() -> &'static Shell {
        GLOBAL_SHELL
            .get()
            .expect("Shell::init must be called before use")
    }

    pub fn verbosity() -> Verbosity {
        Self::get().verbosity
    }

    /// Spawn a spinner under the shared [`MultiProgress`], hidden entirely
    /// when verbosity is silent.
    pub fn spinner(message: impl Into<String>) -> ProgressBar {
        let shell = Self::get();
        let bar = shell.multi_progress.add(ProgressBar::new_spinner());
        if shell.verbosity != Verbosity::Silent {
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            bar.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {msg}")
                    .expect("static template parses"),
            );
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        bar.set_message(message.into());
        bar
    }

    /// Print a user-facing result line, suspended above any active
    /// progress bars. Suppressed entirely at `Silent` verbosity.
    pub fn println(msg: impl Display) {
        if Self::verbosity() == Verbosity::Silent {
            return;
        }
        Self::get().multi_progress.suspend(|| println!("{msg}"));
    }

    /// Print a status line with a colored phase label, e.g. `[scan] ...`.
    pub fn print_status(phase: impl Display, msg: impl Display) {
        if Self::verbosity() == Verbosity::Silent {
            return;
        }
        let label = Style::new().cyan().bold().apply_to(phase);
        Self::get()
            .multi_progress
            .suspend(|| println!("[{label}] {msg}"));
    }

    /// Print an error regardless of verbosity; errors always go to stderr.
    pub fn print_error(err: &crate::error::Error) {
        let label = Style::new().red().bold().apply_to("error");
        Shell::get()
            .multi_progress
            .suspend(|| eprintln!("{label}: {err}"));
    }
}

/// Truncate `s` to at most `n` characters. When there's room for one
/// (`n >= 4`), the cut is marked with a trailing `...`; for `n <= 3`
/// there isn't space left for a meaningful suffix, so the string is just
/// cut short with none. A string already within `n` characters is
/// returned unchanged.
pub fn ellipsis(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    if n <= 3 {
        return s.chars().take(n).collect();
    }
    let truncated: String = s.chars().take(n - 3).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_expected_log_filters() {
        assert_eq!(Verbosity::Silent.log_filter(), log::LevelFilter::Off);
        assert_eq!(Verbosity::Quiet.log_filter(), log::LevelFilter::Warn);
        assert_eq!(Verbosity::Normal.log_filter(), log::LevelFilter::Info);
        assert_eq!(Verbosity::Debug.log_filter(), log::LevelFilter::Debug);
    }

    #[test]
    fn ellipsis_leaves_short_strings_untouched() {
        assert_eq!(ellipsis("hi", 10), "hi");
    }

    #[test]
    fn ellipsis_truncates_with_a_suffix_when_there_is_room() {
        let out = ellipsis("a long message that needs cutting", 10);
        assert_eq!(out.chars().count(), 10);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn ellipsis_truncates_without_a_suffix_when_there_is_no_room() {
        let out = ellipsis("abcdef", 3);
        assert_eq!(out, "abc");
    }

    #[test]
    fn ellipsis_never_exceeds_n_characters() {
        for n in 0..20usize {
            let out = ellipsis("the quick brown fox jumps over the lazy dog", n);
            assert!(out.chars().count() <= n);
        }
    }
}
