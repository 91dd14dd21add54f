//! Options specific to client mode
// (c) 2025 Ross Younger

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Client-side options, which are not persistent configuration
#[derive(Debug, Clone, clap::Args)]
pub struct ClientArgs {
    /// The server to connect to, as HOST:PORT
    #[arg(short, long, value_name = "host:port")]
    pub server: String,

    /// The username to connect as
    #[arg(short, long, value_name = "name")]
    pub user: String,

    /// What to do
    #[command(subcommand)]
    pub command: ClientCommand,
}

/// Client operations
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ClientCommand {
    /// Uploads a local file, replacing any previous file of yours with the same name
    Upload {
        /// The file to upload. It is stored under its base name.
        file: PathBuf,
    },
    /// Lists every file on the server, with its owner
    #[command(alias = "ls")]
    List,
    /// Downloads a file
    Download {
        /// The user who owns the file
        owner: String,
        /// The name of the file
        filename: String,
        /// Directory to write the file into
        #[arg(short, long, value_name = "dir", default_value = ".")]
        output: PathBuf,
    },
    /// Deletes one of your files
    #[command(alias = "rm")]
    Delete {
        /// The name of the file
        filename: String,
    },
    /// Reads commands from standard input, one per line, printing notifications as they arrive
    Shell,
}

/// One line of input to the interactive shell
#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub(crate) struct ShellLine {
    #[command(subcommand)]
    pub(crate) command: ClientCommand,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::{ClientCommand, ShellLine};
    use clap::Parser as _;

    #[test]
    fn shell_lines() {
        let line = ShellLine::try_parse_from(["upload", "notes.txt"]).unwrap();
        assert_eq!(
            line.command,
            ClientCommand::Upload {
                file: PathBuf::from("notes.txt")
            }
        );
        let line = ShellLine::try_parse_from(["ls"]).unwrap();
        assert_eq!(line.command, ClientCommand::List);
        let line = ShellLine::try_parse_from(["download", "alice", "a.txt"]).unwrap();
        assert_eq!(
            line.command,
            ClientCommand::Download {
                owner: "alice".into(),
                filename: "a.txt".into(),
                output: PathBuf::from(".")
            }
        );
        assert!(ShellLine::try_parse_from(["frobnicate"]).is_err());
        assert!(ShellLine::try_parse_from(["delete"]).is_err());
    }
}
