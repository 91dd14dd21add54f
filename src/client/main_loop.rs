//! Client-mode main loop
// (c) 2025 Ross Younger

use std::path::{Path, PathBuf};

use anstream::{eprintln, println};
use anyhow::{Context as _, Result};
use clap::Parser as _;
use human_repr::HumanCount as _;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::driver::{ClientError, ClientSession, ClientState};
use super::options::{ClientArgs, ClientCommand, ShellLine};
use crate::cli::styles::{ERROR, INFO, RESET, SUCCESS, WARNING};
use crate::config::Configuration;
use crate::protocol::WireCodec;
use crate::storage::{validate_name, NameKind};

/// Main client-mode entrypoint.
///
/// Of the configuration, only `max_frame_size` applies to the client; it should match the server's.
///
/// # Return
/// true indicates success. false indicates a failure we have already reported.
/// An Error is a failure we have not reported.
pub async fn client_main(args: &ClientArgs, config: &Configuration) -> Result<bool> {
    let codec = WireCodec::new(config.max_frame_size);
    let mut session = ClientSession::connect(&args.server, &args.user, codec)
        .await
        .with_context(|| format!("connecting to {} as {}", args.server, args.user))?;
    info!("Connected to {} as {}", args.server, args.user);
    let mut notifications = session
        .take_notifications()
        .context("notification channel unavailable")?;

    let success = if args.command == ClientCommand::Shell {
        shell(&session, &mut notifications).await?
    } else {
        let ok = report(run_command(&session, &args.command).await);
        print_pending(&mut notifications);
        ok
    };
    session.disconnect().await;
    Ok(success)
}

/// Prints the outcome of a command.
/// Errors from the server are reported but are not fatal.
fn report(result: Result<String, CommandError>) -> bool {
    match result {
        Ok(msg) => {
            if !msg.is_empty() {
                println!("{msg}");
            }
            true
        }
        Err(CommandError::Server(e)) => {
            eprintln!("{ERROR}Error:{RESET} {e}");
            false
        }
        Err(CommandError::Local(e)) => {
            eprintln!("{ERROR}Error:{RESET} {e:#}");
            false
        }
    }
}

fn print_notification(text: &str) {
    println!("{INFO}Notification:{RESET} {text}");
}

fn print_pending(notifications: &mut mpsc::UnboundedReceiver<String>) {
    while let Ok(text) = notifications.try_recv() {
        print_notification(&text);
    }
}

/// Something that went wrong running a single command
#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error(transparent)]
    Server(#[from] ClientError),
    #[error(transparent)]
    Local(#[from] anyhow::Error),
}

/// Runs one command against the session.
///
/// # Return
/// A message to show the user on success
async fn run_command(
    session: &ClientSession,
    command: &ClientCommand,
) -> Result<String, CommandError> {
    match command {
        ClientCommand::Upload { file } => {
            let filename = base_name(file)?;
            let content = tokio::fs::read(file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let size = content.len();
            session.upload(&filename, content).await?;
            Ok(format!(
                "{SUCCESS}Uploaded{RESET} {filename} ({})",
                size.human_count_bytes()
            ))
        }
        ClientCommand::List => {
            let entries = session.list().await?;
            if entries.is_empty() {
                return Ok(format!("{WARNING}No files{RESET}"));
            }
            Ok(entries
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"))
        }
        ClientCommand::Download {
            owner,
            filename,
            output,
        } => {
            let (name, content) = session.download(owner, filename).await?;
            let dest = destination(output, &name)?;
            tokio::fs::write(&dest, &content)
                .await
                .with_context(|| format!("writing {}", dest.display()))?;
            Ok(format!(
                "{SUCCESS}Downloaded{RESET} {name} from {owner} to {} ({})",
                dest.display(),
                content.len().human_count_bytes()
            ))
        }
        ClientCommand::Delete { filename } => {
            session.delete(filename).await?;
            Ok(format!("{SUCCESS}Deleted{RESET} {filename}"))
        }
        ClientCommand::Shell => Err(anyhow::anyhow!("already in the shell").into()),
    }
}

/// The name a local file is uploaded under
fn base_name(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} does not have a usable file name", path.display()))?;
    Ok(name.to_string())
}

/// Where to write a downloaded file, refusing any name that would escape the output directory
fn destination(dir: &Path, filename: &str) -> Result<PathBuf> {
    validate_name(NameKind::Filename, filename)
        .context("server sent an unusable file name")?;
    Ok(dir.join(filename))
}

const SHELL_HELP: &str = "Commands: upload FILE | list | download OWNER FILENAME [-o DIR] | delete FILENAME | quit";

/// Interactive mode: reads commands from stdin, printing notifications as they arrive
async fn shell(
    session: &ClientSession,
    notifications: &mut mpsc::UnboundedReceiver<String>,
) -> Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut all_ok = true;
    println!("{INFO}{SHELL_HELP}{RESET}");
    loop {
        tokio::select! {
            Some(text) = notifications.recv() => print_notification(&text),
            line = lines.next_line() => {
                let Some(line) = line.context("reading standard input")? else {
                    debug!("end of input");
                    break;
                };
                let words: Vec<&str> = line.split_whitespace().collect();
                match words.as_slice() {
                    [] => continue,
                    ["quit" | "exit"] => break,
                    ["help"] => {
                        println!("{SHELL_HELP}");
                        continue;
                    }
                    _ => (),
                }
                match ShellLine::try_parse_from(&words) {
                    Ok(ShellLine { command: ClientCommand::Shell }) => println!("{SHELL_HELP}"),
                    Ok(ShellLine { command }) => {
                        all_ok &= report(run_command(session, &command).await);
                        if session.state() == ClientState::Disconnected {
                            eprintln!("{ERROR}Connection closed by server{RESET}");
                            print_pending(notifications);
                            return Ok(false);
                        }
                    }
                    Err(e) => eprintln!("{}", e.render().ansi()),
                }
            }
        }
    }
    Ok(all_ok)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{base_name, destination};

    #[test]
    fn upload_names() {
        assert_eq!(base_name(Path::new("/tmp/dir/notes.txt")).unwrap(), "notes.txt");
        assert_eq!(base_name(Path::new("notes.txt")).unwrap(), "notes.txt");
        assert!(base_name(Path::new("/")).is_err());
        assert!(base_name(Path::new("..")).is_err());
    }

    #[test]
    fn download_destinations() {
        assert_eq!(
            destination(Path::new("out"), "a.txt").unwrap(),
            PathBuf::from("out/a.txt")
        );
        assert!(destination(Path::new("out"), "../escape").is_err());
        assert!(destination(Path::new("out"), "..").is_err());
    }
}
