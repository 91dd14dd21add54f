//! Client side: the session driver, and client-mode CLI
// (c) 2025 Ross Younger

mod driver;
pub use driver::{ClientError, ClientSession, ClientState};

mod main_loop;
pub use main_loop::client_main;

mod options;
pub use options::{ClientArgs, ClientCommand};
