//! Local command grammar typed by the user.
//!
//! Commands are colon-delimited:
//!
//! - `join`, `list`, `leave`, `exit`
//! - `bc:<text>` broadcast to everyone
//! - `dm:<user>:<text>` direct message
//! - `creategroup:<name>:<user>:<user>...`
//! - `msggroup:<group>:<text>`
//!
//! Text without any colon is an implicit broadcast. Everything after the
//! last required field is message text and may itself contain colons.

use anyhow::{Result, anyhow, bail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join,
    Broadcast { text: String },
    Direct { to: String, text: String },
    CreateGroup { name: String, members: Vec<String> },
    MessageGroup { group: String, text: String },
    List,
    Leave,
    Exit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            bail!("empty command");
        }

        let Some((head, rest)) = line.split_once(':') else {
            return Ok(match line.trim().to_ascii_lowercase().as_str() {
                "join" => Command::Join,
                "list" => Command::List,
                "leave" => Command::Leave,
                "exit" => Command::Exit,
                _ => Command::Broadcast {
                    text: line.to_string(),
                },
            });
        };

        match head.trim().to_ascii_lowercase().as_str() {
            "join" => Ok(Command::Join),
            "list" => Ok(Command::List),
            "leave" => Ok(Command::Leave),
            "exit" => Ok(Command::Exit),
            "bc" => Ok(Command::Broadcast {
                text: rest.to_string(),
            }),
            "dm" => {
                let (to, text) = split_target(rest, "dm:<user>:<text>")?;
                Ok(Command::Direct { to, text })
            }
            "msggroup" => {
                let (group, text) = split_target(rest, "msggroup:<group>:<text>")?;
                Ok(Command::MessageGroup { group, text })
            }
            "creategroup" => {
                let mut parts = rest.split(':').map(str::trim);
                let name = parts.next().unwrap_or_default();
                if name.is_empty() {
                    bail!("usage: creategroup:<name>:<user>:<user>...");
                }
                let members: Vec<String> = parts
                    .filter(|member| !member.is_empty())
                    .map(str::to_string)
                    .collect();
                if members.is_empty() {
                    bail!("a group needs at least one other member");
                }
                Ok(Command::CreateGroup {
                    name: name.to_string(),
                    members,
                })
            }
            other => Err(anyhow!("unknown command '{other}'")),
        }
    }
}

fn split_target(rest: &str, usage: &str) -> Result<(String, String)> {
    match rest.split_once(':') {
        Some((target, text)) if !target.trim().is_empty() => {
            Ok((target.trim().to_string(), text.to_string()))
        }
        _ => Err(anyhow!("usage: {usage}")),
    }
}
