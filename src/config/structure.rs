//! Configuration structure
// (c) 2025 Ross Younger

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use figment::{providers::Serialized, Metadata, Profile, Provider};
use human_repr::HumanCount as _;
use serde::{Deserialize, Serialize};

use crate::cli::styles::{INFO, RESET};
use crate::protocol::common::DEFAULT_MAX_FRAME_SIZE;
use crate::server::ConnectionSettings;
use crate::util::TimeFormat;

/// The set of configurable options supported by fileshed.
///
/// ### Configuration files
///
/// Configuration files are TOML. Every field is optional; anything not given falls back to
/// a lower priority source. See [the module documentation](crate::config) for the list of sources.
///
/// ### Environment
///
/// Any field may be set by an environment variable `FILESHED_<FIELD>`, e.g. `FILESHED_PORT=9000`.
///
/// ### Developer notes
/// There is no `default()`.
/// You can access the hard-wired configuration defaults through [`Configuration::system_default()`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Configuration {
    /// TCP port the server listens on. 0 means any free port.
    pub port: u16,
    /// Local address the server binds to
    pub bind_address: IpAddr,
    /// Directory holding every user's files
    pub storage_root: PathBuf,
    /// Largest frame, in bytes, the server will send or accept. This also bounds the size of a file.
    pub max_frame_size: u32,
    /// Seconds a new connection has to complete its handshake
    pub handshake_timeout: u64,
    /// Seconds the server waits for connections to close when stopping
    pub shutdown_timeout: u64,
    /// Whether to rebuild the file list from the storage root at start-up
    pub rescan_storage: bool,
    /// Format of timestamps in log messages
    pub time_format: TimeFormat,
}

static SYSTEM_DEFAULT_CONFIG: LazyLock<Configuration> = LazyLock::new(|| Configuration {
    port: 7878,
    bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    storage_root: PathBuf::from("./fileshed-data"),
    max_frame_size: DEFAULT_MAX_FRAME_SIZE,
    handshake_timeout: 30,
    shutdown_timeout: 5,
    rescan_storage: true,
    time_format: TimeFormat::Local,
});

impl Configuration {
    /// The names of all fields, in display order
    pub const FIELD_NAMES: [&'static str; 8] = [
        "port",
        "bind_address",
        "storage_root",
        "max_frame_size",
        "handshake_timeout",
        "shutdown_timeout",
        "rescan_storage",
        "time_format",
    ];

    /// Returns the system default settings
    #[must_use]
    pub fn system_default() -> &'static Self {
        &SYSTEM_DEFAULT_CONFIG
    }

    /// The address to listen on
    #[must_use]
    pub fn listen_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Accessor for `handshake_timeout`, as a Duration
    #[must_use]
    pub fn handshake_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }

    /// Accessor for `shutdown_timeout`, as a Duration
    #[must_use]
    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    /// The subset of settings each connection handler needs
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            max_frame_size: self.max_frame_size,
            handshake_timeout: self.handshake_timeout_duration(),
        }
    }

    /// Performs additional validation checks on a configuration object
    pub fn try_validate(&self) -> Result<()> {
        if self.max_frame_size == 0 {
            anyhow::bail!("The maximum frame size ({INFO}max_frame_size{RESET}) must not be zero");
        }
        if self.handshake_timeout == 0 {
            anyhow::bail!("The handshake timeout ({INFO}handshake_timeout{RESET}) must not be zero");
        }
        if self.shutdown_timeout == 0 {
            anyhow::bail!("The shutdown timeout ({INFO}shutdown_timeout{RESET}) must not be zero");
        }
        if self.storage_root.as_os_str().is_empty() {
            anyhow::bail!("The storage root ({INFO}storage_root{RESET}) must not be empty");
        }
        Ok(())
    }

    /// Performs additional validation checks on the configuration.
    pub fn validate(self) -> Result<Self> {
        self.try_validate()?;
        Ok(self)
    }

    /// One-line summary for the log
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "storage {root}, max file size {max}, handshake timeout {hs}s",
            root = self.storage_root.display(),
            max = u64::from(self.max_frame_size).human_count_bytes(),
            hs = self.handshake_timeout,
        )
    }
}

/// Command-line overrides for [`Configuration`].
///
/// Every member is optional; only those the user actually gave are merged in, so
/// anything not given comes from a lower priority source.
#[derive(Debug, Clone, Default, PartialEq, Eq, clap::Args, Serialize)]
pub struct ConfigurationOverrides {
    /// TCP port to listen on [default: 7878]
    #[arg(short, long, value_name = "port", help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Local address to bind to [default: 0.0.0.0]
    #[arg(long("bind"), value_name = "address", help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<IpAddr>,

    /// Directory to keep files in [default: ./fileshed-data]
    #[arg(long, value_name = "dir", help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,

    /// Largest frame (and so, largest file) to accept, in bytes [default: 64MiB]
    #[arg(long, value_name = "bytes", help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frame_size: Option<u32>,

    /// Seconds a new connection has to complete its handshake [default: 30]
    #[arg(long, value_name = "sec", help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout: Option<u64>,

    /// Seconds to wait for connections to close on shutdown [default: 5]
    #[arg(long, value_name = "sec", help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout: Option<u64>,

    /// Rebuild the file list from the storage root at start-up [default: true]
    #[arg(long, value_name = "bool", help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rescan_storage: Option<bool>,

    /// Format of timestamps in log messages [default: local]
    #[arg(long, value_name = "format", help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_format: Option<TimeFormat>,
}

impl Provider for ConfigurationOverrides {
    fn metadata(&self) -> Metadata {
        Metadata::named("command line")
    }

    fn data(
        &self,
    ) -> std::result::Result<figment::value::Map<Profile, figment::value::Dict>, figment::Error>
    {
        Serialized::defaults(self).data()
    }
}
