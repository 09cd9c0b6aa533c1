//! Group chat over UDP with fixed-size frames.
//!
//! Every datagram is one 1153-byte frame: a kind byte followed by
//! NUL-terminated username, body and group name fields. The modules split
//! along the same lines as the protocol:
//!
//! - [`message`] defines the frame layout, message kinds and error codes.
//! - [`sessions`] and [`groups`] hold the server's registries.
//! - [`roster`] splits the online user list into LIST pages and joins them
//!   back together on the client.
//! - [`dispatch`] is the server state machine: one frame in, frames out.
//! - [`server`] runs the dispatcher on a Tokio UDP socket.
//! - [`command`] parses what the user types.
//! - [`client`] performs the join handshake and runs the receiver worker and
//!   control loop.
//! - [`cli`] parses the command-line interface for server and client modes.

pub mod cli;
pub mod client;
pub mod command;
pub mod dispatch;
pub mod groups;
pub mod message;
pub mod roster;
pub mod server;
pub mod sessions;
