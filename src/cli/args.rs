//! Command-line argument definitions
// (c) 2025 Ross Younger

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::styles::CLAP_STYLES;
use crate::client::ClientArgs;
use crate::config::ConfigurationOverrides;

/// Options that control diagnostic output, common to every mode
#[derive(Debug, Clone, Default, clap::Args)]
pub(crate) struct OutputOptions {
    /// Enable detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=fileshed=debug` in the environment.
    /// If present, `RUST_LOG` overrides this option.
    #[arg(short, long, action, global = true, help_heading("Output"))]
    pub(crate) debug: bool,

    /// Quiet mode: reports only errors
    #[arg(
        short,
        long,
        action,
        global = true,
        conflicts_with("debug"),
        help_heading("Output")
    )]
    pub(crate) quiet: bool,

    /// Log to a file
    ///
    /// By default the log receives everything printed to stderr.
    /// To override this behaviour, set the environment variable `RUST_LOG_FILE_DETAIL` (same semantics as `RUST_LOG`).
    #[arg(
        short('l'),
        long,
        value_name("FILE"),
        global = true,
        help_heading("Output")
    )]
    pub(crate) log_file: Option<PathBuf>,
}

/// What to do
#[derive(Debug, Clone, Subcommand)]
pub(crate) enum MainMode {
    /// Runs the server until interrupted
    Server(ConfigurationOverrides),
    /// Connects to a server and performs one operation
    Client(ClientArgs),
    /// Shows the configuration files read, each setting, and where it came from
    ShowConfig(ConfigurationOverrides),
}

/// Shared multi-user file storage
#[derive(Debug, Parser)]
#[command(
    name = "fileshed",
    author,
    version,
    about,
    styles = CLAP_STYLES,
    propagate_version = true,
    infer_subcommands = true
)]
pub(crate) struct CliArgs {
    /// Read configuration from this file instead of the standard locations
    #[arg(long, value_name = "FILE", global = true, help_heading("Configuration"))]
    pub(crate) config: Option<PathBuf>,

    #[command(flatten)]
    pub(crate) output: OutputOptions,

    #[command(subcommand)]
    pub(crate) mode: MainMode,
}

impl CliArgs {
    /// Parses the given arguments. Help and version requests come back as errors, as with clap.
    pub(crate) fn custom_parse<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args)
    }

    /// The command-line configuration overrides, if this mode takes any
    pub(crate) fn overrides(&self) -> Option<&ConfigurationOverrides> {
        match &self.mode {
            MainMode::Server(o) | MainMode::ShowConfig(o) => Some(o),
            MainMode::Client(_) => None,
        }
    }
}
