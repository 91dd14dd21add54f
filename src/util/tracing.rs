//! Log output set-up
// (c) 2025 Ross Younger

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Context as _;
use serde::{de, Deserialize, Serialize};
use strum::VariantNames as _;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc, FormatTime};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

static INITIALISED: AtomicBool = AtomicBool::new(false);

/// Filter for console output; also the log file's, unless [`FILE_FILTER_VAR`] is set
const CONSOLE_FILTER_VAR: &str = "RUST_LOG";
/// Filter for the log file
const FILE_FILTER_VAR: &str = "RUST_LOG_FILE_DETAIL";

/// Computes the trace level from the usual pair of verbosity flags
#[must_use]
pub fn trace_level(debug: bool, quiet: bool) -> &'static str {
    if debug {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    }
}

/// Selects the format of time stamps in log messages
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
    clap::ValueEnum,
    Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "kebab-case")]
pub enum TimeFormat {
    /// Local time, as "year-month-day HH:MM:SS"
    #[default]
    Local,
    /// UTC, as "year-month-day HH:MM:SS"
    Utc,
    /// Local time with offset, as [RFC 3339](https://datatracker.ietf.org/doc/html/rfc3339),
    /// e.g. `2010-03-14T18:32:03+01:00`
    Rfc3339,
}

impl<'de> Deserialize<'de> for TimeFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.to_ascii_lowercase()
            .parse()
            .map_err(|_| de::Error::unknown_variant(&s, TimeFormat::VARIANTS))
    }
}

/// Timestamp writer for a [`TimeFormat`]
enum Timer {
    Local(ChronoLocal),
    Utc(ChronoUtc),
}

impl From<TimeFormat> for Timer {
    fn from(format: TimeFormat) -> Self {
        match format {
            TimeFormat::Local => Self::Local(ChronoLocal::new("%Y-%m-%d %H:%M:%SL".into())),
            TimeFormat::Utc => Self::Utc(ChronoUtc::new("%Y-%m-%d %H:%M:%SZ".into())),
            TimeFormat::Rfc3339 => Self::Local(ChronoLocal::rfc_3339()),
        }
    }
}

impl FormatTime for Timer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        match self {
            Timer::Local(t) => t.format_time(w),
            Timer::Utc(t) => t.format_time(w),
        }
    }
}

/// Reads a filter from `var`. If it is unset, we log only our own events at `level`.
///
/// # Return
/// The filter, and whether it came from the environment
fn env_filter(var: &str, level: &str) -> anyhow::Result<(EnvFilter, bool)> {
    match std::env::var(var) {
        Ok(spec) => EnvFilter::try_new(&spec)
            .map(|f| (f, true))
            .with_context(|| format!("{var} (set in environment) was not understood")),
        Err(_) => Ok((EnvFilter::try_new(format!("fileshed={level}"))?, false)),
    }
}

type BoxedLayer = Box<dyn tracing_subscriber::Layer<Registry> + Send + Sync>;

fn layer<W>(writer: W, filter: (EnvFilter, bool), time_format: TimeFormat, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter, from_env) = filter;
    tracing_subscriber::fmt::layer()
        .compact()
        // A user-supplied filter may let in other crates' events, so say where they came from
        .with_target(from_env)
        .with_ansi(ansi)
        .with_timer(Timer::from(time_format))
        .with_writer(writer)
        .with_filter(filter)
        .boxed()
}

/// The stderr layer, and the log file layer if requested
fn layers(
    level: &str,
    log_file: Option<&Path>,
    time_format: TimeFormat,
    ansi: bool,
) -> anyhow::Result<Vec<BoxedLayer>> {
    let mut layers = vec![layer(
        std::io::stderr,
        env_filter(CONSOLE_FILTER_VAR, level)?,
        time_format,
        ansi,
    )];
    if let Some(path) = log_file {
        let file = File::create(path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        let filter = if std::env::var_os(FILE_FILTER_VAR).is_some() {
            env_filter(FILE_FILTER_VAR, level)?
        } else {
            env_filter(CONSOLE_FILTER_VAR, level)?
        };
        layers.push(layer(Mutex::new(file), filter, time_format, false));
    }
    Ok(layers)
}

/// Installs the global log subscriber: to stderr, and optionally to a file.
///
/// By default only fileshed's own events are logged, at `level`.
/// `RUST_LOG` replaces that filter; `RUST_LOG_FILE_DETAIL`, if set, replaces it for the file only.
/// Filter syntax is described at <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html>.
///
/// **CAUTION:** If this fails, nothing is installed; the caller must report the error some other way.
///
/// Only the first successful call has any effect.
pub fn setup(
    level: &str,
    log_file: Option<&Path>,
    time_format: TimeFormat,
    ansi: bool,
) -> anyhow::Result<()> {
    if is_initialized() {
        tracing::warn!("logging is already set up (ignoring)");
        return Ok(());
    }
    let layers = layers(level, log_file, time_format, ansi)?;
    INITIALISED.store(true, Ordering::Relaxed);
    tracing_subscriber::registry().with(layers).init();
    Ok(())
}

/// Has [`setup`] succeeded in this process?
#[must_use]
pub fn is_initialized() -> bool {
    INITIALISED.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rusty_fork::rusty_fork_test;
    use tempfile::TempDir;

    use super::{layers, setup, trace_level, TimeFormat};

    #[test]
    fn trace_levels() {
        assert_eq!(trace_level(true, true), "debug");
        assert_eq!(trace_level(false, true), "error");
        assert_eq!(trace_level(false, false), "info");
    }

    #[test]
    fn time_format_deserializes_case_insensitively() {
        #[derive(serde::Deserialize)]
        struct T {
            tf: TimeFormat,
        }
        let t: T = toml::from_str("tf = \"RFC3339\"").unwrap();
        assert_eq!(t.tf, TimeFormat::Rfc3339);
        assert!(toml::from_str::<T>("tf = \"martian\"").is_err());
    }

    #[test]
    fn log_file_adds_a_layer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");
        assert_eq!(layers("info", None, TimeFormat::Local, false).unwrap().len(), 1);
        assert_eq!(
            layers("info", Some(&path), TimeFormat::Utc, false)
                .unwrap()
                .len(),
            2
        );
        assert!(path.exists());
    }

    #[test]
    fn unwritable_log_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no-such-dir").join("test.log");
        assert!(layers("info", Some(&path), TimeFormat::Utc, false).is_err());
    }

    #[test]
    fn invalid_level() {
        assert!(layers("invalid_level", None, TimeFormat::Utc, false).is_err());
    }

    // these tests affect global state, so need to run in forks
    rusty_fork_test! {
        #[test]
        fn setup_twice() {
            setup("debug", None, TimeFormat::Utc, false).unwrap();
            assert!(super::is_initialized());
            // a second call must succeed (albeit with a warning)
            setup("debug", None, TimeFormat::Utc, false).unwrap();
        }

        #[test]
        fn bad_rust_log_is_an_error() {
            std::env::set_var("RUST_LOG", "fileshed=notalevel[");
            assert!(setup("info", None, TimeFormat::Utc, false).is_err());
            assert!(!super::is_initialized());
        }
    }
}
