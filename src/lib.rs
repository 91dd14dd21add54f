// (c) 2025 Ross Younger

#![allow(clippy::doc_markdown)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! fileshed is a small shared file store. One server holds files for many users;
//! clients connect over TCP, identify themselves by username, and upload, list,
//! download and delete files.
//!
//! ## Overview
//! - Every file belongs to the user who uploaded it. Anybody may list or download any file;
//!   only the owner may replace or delete it.
//! - A username may be connected at most once at a time.
//! - When somebody downloads your file while you are connected, you are told about it.
//! - File contents live on the server's filesystem and survive a restart.
//!
//! #### What fileshed is not
//!
//! * Secure. There is no authentication beyond the username, and no encryption.
//! * A filesystem. There are no directories, permissions or partial transfers.
//!
//! ## 🧰 Getting Started
//!
//! * Start a server: `fileshed server --storage-root /srv/fileshed`
//! * Upload a file: `fileshed client -s myserver:7878 -u alice upload notes.txt`
//! * See what's there: `fileshed client -s myserver:7878 -u bob list`
//! * Fetch it: `fileshed client -s myserver:7878 -u bob download alice notes.txt`
//! * Stay connected and watch for notifications: `fileshed client -s myserver:7878 -u alice shell`
//!
//! ## 📖 Documentation
//!
//! * [The wire protocol](protocol)
//! * [Configuring the server](config)
//!
//! ## Using fileshed as a library
//!
//! The server is a [`Server`](server::Server), which may be started from a [`Configuration`].
//! The client side is a [`ClientSession`](client::ClientSession).

mod cli;
pub use cli::cli;
pub use cli::styles;

pub mod client;

pub mod config;
pub use config::Configuration;

pub mod protocol;
pub mod server;
pub mod storage;
pub mod util;
