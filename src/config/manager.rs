//! Configuration file wrangling
// (c) 2025 Ross Younger

use std::fmt::Display;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use figment::providers::{Env, Format as _, Toml};
use figment::value::Value;
use figment::{Figment, Metadata, Provider};
use serde::Deserialize;
use tracing::debug;

use super::{Configuration, SystemDefault};
use crate::cli::styles::{HEADER, INFO, RESET};

/// Prefix for environment variables that set configuration fields
pub const ENV_PREFIX: &str = "FILESHED_";

/// Processes and merges all possible configuration sources.
///
/// Run `fileshed show-config` to see which files were read and where each value came from.
#[derive(Debug)]
pub struct Manager {
    /// Configuration data
    data: Figment,
    /// The files we looked for, whether or not they existed
    files: Vec<PathBuf>,
}

impl Manager {
    /// Constructor. Hard-wired defaults are always applied, at the lowest priority.
    fn new(apply_env: bool, config_files: &[PathBuf]) -> Self {
        let mut new1 = Self {
            data: Figment::new(),
            files: Vec::new(),
        };
        new1.apply_system_default();
        for p in config_files {
            new1.add_config(p);
        }
        if apply_env {
            new1.merge_provider(Env::prefixed(ENV_PREFIX));
        }
        new1
    }

    /// General constructor for production use
    ///
    /// If `explicit_file` is given, that is the only configuration file read.
    /// Otherwise, the standard system and user files are read, if present.
    #[must_use]
    pub fn standard(explicit_file: Option<&Path>) -> Self {
        let files = match explicit_file {
            Some(f) => vec![f.to_path_buf()],
            None => Self::config_files(),
        };
        Self::new(true, &files)
    }

    /// Testing/internal constructor, does not read files from system or apply environment
    #[must_use]
    #[cfg(test)]
    pub(crate) fn without_files() -> Self {
        Self::new(false, &[])
    }

    /// The system-wide configuration file
    #[must_use]
    pub fn system_config_path() -> Option<PathBuf> {
        cfg!(unix).then(|| PathBuf::from("/etc/fileshed.toml"))
    }

    /// The current user's configuration file
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("fileshed").join("fileshed.toml"))
    }

    /// Returns the list of configuration files we read, lowest priority first.
    ///
    /// This is a function of platform and the current user.
    #[must_use]
    pub fn config_files() -> Vec<PathBuf> {
        Self::system_config_path()
            .into_iter()
            .chain(Self::user_config_path())
            .collect()
    }

    fn add_config(&mut self, path: &Path) {
        self.files.push(path.to_path_buf());
        if !path.exists() {
            debug!("configuration file {} not present", path.display());
            return;
        }
        self.merge_provider(Toml::file(path));
    }

    /// Merges in a data set, which is some sort of [figment::Provider](https://docs.rs/figment/latest/figment/trait.Provider.html).
    /// This uses figment's `merge` operation, which prefers to _replace_ existing items.
    ///
    /// The command line overrides are merged in this way, as [`ConfigurationOverrides`](super::ConfigurationOverrides).
    pub fn merge_provider<T>(&mut self, provider: T)
    where
        T: Provider,
    {
        let f = std::mem::take(&mut self.data);
        self.data = f.merge(provider); // in the error case, this leaves the provider in a fused state
    }

    /// Applies the system default settings, at a lower priority than everything else
    pub fn apply_system_default(&mut self) {
        let f = std::mem::take(&mut self.data);
        self.data = f.join(SystemDefault {});
    }

    /// Attempts to extract a particular struct from the data.
    ///
    /// Within fileshed, `T` is usually [Configuration], but it isn't intrinsically required to be.
    pub fn get<'de, T>(&self) -> Result<T, figment::Error>
    where
        T: Deserialize<'de>,
    {
        self.data.extract_lossy::<T>()
    }

    /// Extracts and validates the [Configuration]
    pub fn configuration(&self) -> anyhow::Result<Configuration> {
        self.get::<Configuration>()
            .context("invalid configuration")?
            .validate()
    }

    /// Creates an ephemeral structure that displays every configuration field,
    /// its value, and where that value came from.
    #[must_use]
    pub fn display(&self) -> DisplayAdapter<'_> {
        DisplayAdapter { source: self }
    }
}

/// Pretty-printing type wrapper to Manager
#[derive(Debug)]
pub struct DisplayAdapter<'a> {
    source: &'a Manager,
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(_, s) => s.clone(),
        Value::Char(_, c) => c.to_string(),
        Value::Bool(_, b) => b.to_string(),
        Value::Num(_, num) => num
            .to_u128()
            .map(|u| u.to_string())
            .or_else(|| num.to_i128().map(|i| i.to_string()))
            .or_else(|| num.to_f64().map(|f| f.to_string()))
            .unwrap_or_default(),
        Value::Empty(_, _) => "<empty>".into(),
        Value::Dict(_, dict) => format!("<{} entries>", dict.len()),
        Value::Array(_, vec) => format!(
            "[{}]",
            vec.iter().map(render_value).collect::<Vec<_>>().join(",")
        ),
    }
}

fn render_source(meta: Option<&Metadata>) -> String {
    meta.map(|m| {
        m.source
            .as_ref()
            .map_or_else(|| m.name.to_string(), figment::Source::to_string)
    })
    .unwrap_or_default()
}

impl Display for DisplayAdapter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = &self.source.data;
        writeln!(f, "{HEADER}Configuration files{RESET}")?;
        for p in &self.source.files {
            let note = if p.exists() { "" } else { " (not present)" };
            writeln!(f, "  {}{note}", p.display())?;
        }
        writeln!(f, "{HEADER}Settings{RESET}")?;
        for field in Configuration::FIELD_NAMES {
            let value = data
                .find_value(field)
                .map(|v| render_value(&v))
                .unwrap_or_default();
            writeln!(
                f,
                "  {INFO}{field:<18}{RESET} {value:<24} {}",
                render_source(data.find_metadata(field))
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use figment::Jail;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    use super::Manager;
    use crate::config::{Configuration, ConfigurationOverrides};
    use crate::util::TimeFormat;

    #[test]
    fn defaults() {
        let mgr = Manager::without_files();
        let result = mgr.get::<Configuration>().unwrap();
        assert_eq!(&result, Configuration::system_default());
    }

    #[test]
    fn cli_overrides_defaults() {
        let entered = ConfigurationOverrides {
            port: Some(12345),
            ..Default::default()
        };
        let expected = Configuration {
            port: 12345,
            ..Configuration::system_default().clone()
        };
        let mut mgr = Manager::without_files();
        mgr.merge_provider(entered);
        assert_eq!(mgr.get::<Configuration>().unwrap(), expected);
    }

    #[test]
    fn layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "system.toml",
                r#"
                port = 1000
                storage_root = "/srv/system"
                time_format = "utc"
                "#,
            )?;
            jail.create_file("user.toml", "port = 2000\n")?;
            jail.set_env("FILESHED_HANDSHAKE_TIMEOUT", "7");
            jail.set_env("FILESHED_RESCAN_STORAGE", "false");

            let mut mgr = Manager::new(
                true,
                &[PathBuf::from("system.toml"), PathBuf::from("user.toml")],
            );
            mgr.merge_provider(ConfigurationOverrides {
                shutdown_timeout: Some(9),
                ..Default::default()
            });
            let cfg = mgr.configuration().unwrap();
            assert_eq!(cfg.port, 2000);
            assert_eq!(cfg.storage_root, PathBuf::from("/srv/system"));
            assert_eq!(cfg.time_format, TimeFormat::Utc);
            assert_eq!(cfg.handshake_timeout, 7);
            assert!(!cfg.rescan_storage);
            assert_eq!(cfg.shutdown_timeout, 9);
            assert_eq!(cfg.max_frame_size, Configuration::system_default().max_frame_size);
            Ok(())
        });
    }

    #[test]
    fn type_error() {
        #[derive(Deserialize)]
        struct Test {
            magic: i32,
        }
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "port = \"not a number\"\nmagic = 42\n")?;
            let mgr = Manager::new(false, &[PathBuf::from("bad.toml")]);
            // The file merges, but you can't extract a Configuration from it...
            assert!(mgr.configuration().is_err());
            // ...while other things can still be extracted
            assert_eq!(mgr.get::<Test>().unwrap().magic, 42);
            Ok(())
        });
    }

    #[test]
    fn validation_applies() {
        let mut mgr = Manager::without_files();
        mgr.merge_provider(ConfigurationOverrides {
            max_frame_size: Some(0),
            ..Default::default()
        });
        assert!(mgr.configuration().is_err());
    }

    #[test]
    fn missing_file_is_ignored() {
        let mgr = Manager::new(false, &[PathBuf::from("/nonexistent/fileshed.toml")]);
        assert!(mgr.configuration().is_ok());
        let s = mgr.display().to_string();
        assert!(s.contains("(not present)"));
    }

    #[test]
    fn display_shows_sources() {
        let mut mgr = Manager::without_files();
        mgr.merge_provider(ConfigurationOverrides {
            port: Some(9999),
            ..Default::default()
        });
        let s = mgr.display().to_string();
        let port_line = s.lines().find(|l| l.contains("port")).unwrap();
        assert!(port_line.contains("9999"));
        assert!(port_line.contains("command line"));
        let root_line = s.lines().find(|l| l.contains("storage_root")).unwrap();
        assert!(root_line.contains("./fileshed-data"));
        assert!(root_line.contains("default"));
    }
}
