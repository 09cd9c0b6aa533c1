use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server on a UDP socket.
    Server(ServerArgs),
    /// Join a server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:8867")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name other users will see. Must not contain ':'.
    #[arg(long)]
    pub username: String,

    /// Address of the server to join.
    #[arg(long, default_value = "127.0.0.1:8867")]
    pub server: SocketAddr,

    /// Local address for the client socket.
    #[arg(long, default_value = "0.0.0.0:0")]
    pub bind: SocketAddr,

    /// How long to wait for the server to acknowledge the join.
    #[arg(long, default_value_t = 3000)]
    pub join_timeout_ms: u64,
}
