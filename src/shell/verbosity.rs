// SPDX-License-Identifier: Apache-2.0

//! Verbosity levels, controlled by `-v`/`-vv`/`-vvv` on the CLI.

/// How verbose shell output and logging should be.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum Verbosity {
    /// Output results only, no progress indicators or logs.
    #[value(hide = true)]
    Silent,
    /// Output results and warnings, no progress indicators.
    Quiet,
    /// Output results, progress indicators, and info-level logs.
    #[default]
    Normal,
    /// Normal plus debug-level logs. Selected by `-v`.
    Debug,
    /// Debug plus trace-level logs. Selected by `-vv` or higher.
    Trace,
}

impl Verbosity {
    /// Map a `-v` repeat count onto a verbosity level, starting from
    /// `Normal`.
    pub fn from_flag_count(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }

    pub fn log_filter(self) -> log::LevelFilter {
        match self {
            Verbosity::Silent => log::LevelFilter::Off,
            Verbosity::Quiet => log::LevelFilter::Warn,
            Verbosity::Normal => log::LevelFilter::Info,
            Verbosity::Debug => log::LevelFilter::Debug,
            Verbosity::Trace => log::LevelFilter::Trace,
        }
    }
}
