// (c) 2025 Ross Younger
//! # 📖 Configuration management
//!
//! fileshed obtains run-time configuration from the following sources, in order of priority:
//! 1. Command-line options
//! 2. Environment variables named `FILESHED_<FIELD>` (for example `FILESHED_PORT=9000`)
//! 3. Configuration files. Later files override earlier ones.
//!    * The system-wide file; on Unix, this is `/etc/fileshed.toml`
//!    * The user's file, `fileshed/fileshed.toml` in the platform configuration directory
//!      (on Linux, `~/.config/fileshed/fileshed.toml`)
//!    * If `--config FILE` is given, that file is read _instead of_ both of the above.
//! 4. Hard-wired defaults
//!
//! Run `fileshed show-config` to see the files we read, the current value of every setting,
//! and where each value came from.
//!
//! ## File format
//!
//! Configuration files are TOML. All fields are optional.
//!
//! ```toml
//! port = 7878
//! bind_address = "127.0.0.1"
//! storage_root = "/srv/fileshed"
//! max_frame_size = 16777216
//! handshake_timeout = 30
//! shutdown_timeout = 5
//! rescan_storage = true
//! time_format = "utc"
//! ```
//!
//! ## Configurable options
//!
//! The set of supported fields is the [Configuration] structure.

mod manager;
mod structure;
mod sysdefault;

pub use manager::{DisplayAdapter, Manager, ENV_PREFIX};
pub use structure::{Configuration, ConfigurationOverrides};
use sysdefault::SystemDefault;
