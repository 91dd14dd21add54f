//! Main CLI for fileshed
// (c) 2025 Ross Younger

use std::ffi::OsString;
use std::process::ExitCode;

use anstream::{eprintln, println};
use anyhow::{Context as _, Result};

use super::args::{CliArgs, MainMode, OutputOptions};
use super::styles::{stderr_supports_colour, ERROR, RESET};
use crate::client::client_main;
use crate::config::{Configuration, Manager};
use crate::server::server_main;
use crate::util::{setup_tracing, trace_level};

/// Main CLI entrypoint
///
/// Call this from `main`, passing the arguments to use.
/// Normally you will call `cli(std::env::args_os())` but you can pass in alternate arguments for CLI testing.
///
/// # Note
/// This function may start a tokio runtime and perform work in it.
#[must_use]
pub fn cli<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    #[allow(clippy::match_bool)] // improved readability
    cli_inner(args)
        .inspect_err(|e| {
            if crate::util::tracing_is_initialised() {
                tracing::error!("{e:#}");
            } else {
                eprintln!("{ERROR}Error:{RESET} {e:#}");
            }
        })
        .map_or(ExitCode::FAILURE, |success| match success {
            true => ExitCode::SUCCESS,
            false => ExitCode::FAILURE,
        })
}

/// Inner CLI logic
///
/// # Return
/// true indicates success. false indicates a failure where the callee has output to stderr.
fn cli_inner<I, T>(args: I) -> Result<bool>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let Some(args) = parse_args(args)? else {
        return Ok(true); // help/version shown; exit
    };

    let mut manager = Manager::standard(args.config.as_deref());
    if let Some(overrides) = args.overrides() {
        manager.merge_provider(overrides.clone());
    }
    handle_mode(args.mode, &manager, &args.output)
}

fn parse_args<I, T>(args: I) -> Result<Option<CliArgs>>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    use clap::error::ErrorKind::{DisplayHelp, DisplayVersion};
    match CliArgs::custom_parse(args) {
        Ok(args) => Ok(Some(args)),
        Err(e) if matches!(e.kind(), DisplayHelp | DisplayVersion) => {
            println!("{}", e.render().ansi());
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn start_tracing(output: &OutputOptions, config: &Configuration) -> Result<()> {
    setup_tracing(
        trace_level(output.debug, output.quiet),
        output.log_file.as_deref(),
        config.time_format,
        stderr_supports_colour(),
    ) // to provoke error: set RUST_LOG=.
}

// MODE HANDLERS ///////////////////////////////////////////////////////////

#[tokio::main]
async fn handle_mode(mode: MainMode, manager: &Manager, output: &OutputOptions) -> Result<bool> {
    match mode {
        MainMode::ShowConfig(_) => {
            println!("{}", manager.display());
            // Report problems after showing where the values came from
            let _ = manager.configuration()?;
            Ok(true)
        }
        MainMode::Server(_) => {
            let config = manager.configuration()?;
            start_tracing(output, &config)?;
            tracing::info!("{}", config.summary());
            server_main(&config).await.context("server failed")?;
            Ok(true)
        }
        MainMode::Client(args) => {
            let config = manager.configuration()?;
            start_tracing(output, &config)?;
            // this mode may return false
            client_main(&args, &config).await
        }
    }
}
