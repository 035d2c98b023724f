//! Line-oriented chat console.
//!
//! Stands in for the display and joystick front-end: each stdin line is a
//! command, and plain text goes to the open conversation.

use crate::config::parse_address;
use crate::{component_info, component_warn};
use meshtalk_chat::{AppError, ChatApp};
use meshtalk_transport::UdpMesh;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Lines shown by `/history` when no count is given
pub const DEFAULT_HISTORY_LINES: usize = 6;

/// Marker shown next to contacts with unread messages
pub const UNREAD_MARKER: &str = "*";

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List contacts
    Contacts,
    /// Open a conversation
    Open(String),
    /// Close the open conversation
    Close,
    /// Send text to a named contact
    Msg {
        /// Contact name
        to: String,
        /// Text to send
        text: String,
    },
    /// Send text to the open conversation
    Say(String),
    /// Broadcast our name and address
    Announce,
    /// Show recent lines with a contact
    History {
        /// Contact name
        name: String,
        /// Lines to show
        count: usize,
    },
    /// Set our mesh address
    Provision(u16),
    /// Show router counters
    Stats,
    /// Forget all contacts and history
    Reset,
    /// Show the command list
    Help,
    /// Leave
    Quit,
}

/// Console input errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Blank line
    #[error("empty input")]
    Empty,
    /// Unrecognized command
    #[error("unknown command /{0} (try /help)")]
    UnknownCommand(String),
    /// Missing or malformed argument
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Parse one console line
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };

    let (cmd, args) = match rest.split_once(char::is_whitespace) {
        Some((cmd, args)) => (cmd, args.trim()),
        None => (rest, ""),
    };

    match cmd {
        "contacts" | "c" => Ok(Command::Contacts),
        "open" | "o" if !args.is_empty() => Ok(Command::Open(args.to_string())),
        "open" | "o" => Err(ParseError::Usage("/open <name>")),
        "close" => Ok(Command::Close),
        "msg" | "m" => match args.split_once(char::is_whitespace) {
            Some((to, text)) if !text.trim().is_empty() => Ok(Command::Msg {
                to: to.to_string(),
                text: text.trim().to_string(),
            }),
            _ => Err(ParseError::Usage("/msg <name> <text>")),
        },
        "announce" | "a" => Ok(Command::Announce),
        "history" | "h" => {
            let mut parts = args.split_whitespace();
            let name = parts
                .next()
                .ok_or(ParseError::Usage("/history <name> [count]"))?;
            let count = match parts.next() {
                Some(n) => n
                    .parse()
                    .map_err(|_| ParseError::Usage("/history <name> [count]"))?,
                None => DEFAULT_HISTORY_LINES,
            };
            Ok(Command::History {
                name: name.to_string(),
                count,
            })
        }
        "provision" => parse_address(args)
            .map(Command::Provision)
            .map_err(|_| ParseError::Usage("/provision <address>")),
        "stats" => Ok(Command::Stats),
        "reset" => Ok(Command::Reset),
        "help" | "?" => Ok(Command::Help),
        "quit" | "q" | "exit" => Ok(Command::Quit),
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

/// Executes commands against a running node
pub struct Console {
    app: Arc<ChatApp>,
    transport: Arc<UdpMesh>,
    shown_unread: HashSet<String>,
}

impl Console {
    /// Create a console for `app`
    pub fn new(app: Arc<ChatApp>, transport: Arc<UdpMesh>) -> Self {
        Self {
            app,
            transport,
            shown_unread: HashSet::new(),
        }
    }

    /// Run one command. Returns false when the user asked to quit.
    pub async fn execute(&mut self, command: Command) -> bool {
        if let Err(e) = self.run(command.clone()).await {
            println!("! {}", e);
            component_warn!("ui", "Command {:?} failed [{}]: {}", command, e.error_code(), e);
        }
        command != Command::Quit
    }

    async fn run(&mut self, command: Command) -> Result<(), AppError> {
        match command {
            Command::Contacts => {
                let names = self.app.get_contact_names().await?;
                if names.is_empty() {
                    println!("(no contacts)");
                }
                for name in names {
                    let marker = if self.app.has_unread(&name).await? {
                        UNREAD_MARKER
                    } else {
                        " "
                    };
                    println!("{} {}", marker, name);
                }
            }
            Command::Open(name) => {
                self.app.open_conversation(&name).await?;
                self.shown_unread.remove(&name);
                println!("-- {} --", name);
                for line in self.app.get_recent_messages(&name, DEFAULT_HISTORY_LINES).await? {
                    println!("{}", line);
                }
            }
            Command::Close => self.app.close_conversation().await,
            Command::Msg { to, text } => self.app.send_text(&to, &text).await?,
            Command::Say(text) => match self.app.open_conversation_name().await? {
                Some(to) => self.app.send_text(&to, &text).await?,
                None => println!("! no open conversation (use /open <name> or /msg)"),
            },
            Command::Announce => {
                self.app.broadcast_self_announce().await?;
                println!("announced");
            }
            Command::History { name, count } => {
                for line in self.app.get_recent_messages(&name, count).await? {
                    println!("{}", line);
                }
            }
            Command::Provision(address) => {
                self.app.identity().set_address(address);
                self.transport.set_local_address(address);
                component_info!("ui", "Provisioned as 0x{:04X}", address);
                println!("provisioned as 0x{:04X}", address);
            }
            Command::Stats => {
                let stats = self.app.stats();
                println!(
                    "in={} accepted={} out={} checksum_failures={} framing_errors={} \
                     send_failures={}",
                    stats.frames_in,
                    stats.frames_accepted,
                    stats.frames_out,
                    stats.checksum_failures,
                    stats.framing_errors,
                    stats.send_failures
                );
            }
            Command::Reset => {
                self.app.factory_reset().await?;
                self.shown_unread.clear();
                println!("all contacts and history cleared");
            }
            Command::Help => print_help(),
            Command::Quit => {}
        }
        Ok(())
    }

    /// Periodic refresh: announce contacts that gained unread messages
    pub async fn refresh(&mut self) -> Result<(), AppError> {
        for name in self.app.get_contact_names().await? {
            if self.app.has_unread(&name).await? {
                if self.shown_unread.insert(name.clone()) {
                    println!("{} new message from {}", UNREAD_MARKER, name);
                }
            } else {
                self.shown_unread.remove(&name);
            }
        }
        Ok(())
    }
}

fn print_help() {
    println!("/contacts               list contacts (* = unread)");
    println!("/open <name>            open a conversation");
    println!("/close                  close the conversation");
    println!("<text>                  send to the open conversation");
    println!("/msg <name> <text>      send to a contact");
    println!("/announce               broadcast our name and address");
    println!("/history <name> [n]     show recent lines");
    println!("/provision <address>    set our mesh address");
    println!("/stats                  router counters");
    println!("/reset                  forget all contacts and history");
    println!("/quit                   leave");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("/contacts"), Ok(Command::Contacts));
        assert_eq!(parse("  /open Alice "), Ok(Command::Open("Alice".to_string())));
        assert_eq!(
            parse("/msg Bob hello there"),
            Ok(Command::Msg {
                to: "Bob".to_string(),
                text: "hello there".to_string()
            })
        );
        assert_eq!(
            parse("/history Bob 3"),
            Ok(Command::History {
                name: "Bob".to_string(),
                count: 3
            })
        );
        assert_eq!(
            parse("/history Bob"),
            Ok(Command::History {
                name: "Bob".to_string(),
                count: DEFAULT_HISTORY_LINES
            })
        );
        assert_eq!(parse("/provision 0x0004"), Ok(Command::Provision(4)));
        assert_eq!(parse("/quit"), Ok(Command::Quit));
    }

    #[test]
    fn test_plain_text_is_say() {
        assert_eq!(parse("hi there"), Ok(Command::Say("hi there".to_string())));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert_eq!(parse("/open"), Err(ParseError::Usage("/open <name>")));
        assert_eq!(parse("/msg Bob"), Err(ParseError::Usage("/msg <name> <text>")));
        assert_eq!(
            parse("/history Bob many"),
            Err(ParseError::Usage("/history <name> [count]"))
        );
        assert!(matches!(parse("/provision zz"), Err(ParseError::Usage(_))));
        assert_eq!(
            parse("/dance"),
            Err(ParseError::UnknownCommand("dance".to_string()))
        );
    }
}
