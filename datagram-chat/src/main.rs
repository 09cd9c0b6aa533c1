use std::{
    io::{self, BufRead, Write},
    thread::{self, JoinHandle},
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{info, warn};

use datagram_chat::{
    cli::{Cli, ClientArgs, Command},
    client::{Client, ClientConfig, DisplayEvent},
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let server = Server::bind(args.listen).await?;
            let addr = server.local_addr()?;
            info!("server listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("server exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => tokio::task::spawn_blocking(move || run_client(args)).await??,
    }

    Ok(())
}

fn run_client(args: ClientArgs) -> Result<()> {
    let client = Client::connect(&ClientConfig::from(args))?;

    let (command_tx, command_rx) = unbounded();
    let (display_tx, display_rx) = unbounded();
    spawn_input(command_tx)?;
    let display = spawn_display(display_rx)?;

    client.run(command_rx, display_tx)?;
    display
        .join()
        .map_err(|_| anyhow!("display thread panicked"))?;
    Ok(())
}

/// Feeds stdin lines to the control loop. Dropping the sender on EOF is how
/// the loop learns that input is gone.
fn spawn_input(commands: Sender<String>) -> Result<()> {
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if commands.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = ?err, "failed to read stdin");
                        break;
                    }
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(())
}

fn spawn_display(events: Receiver<DisplayEvent>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("display".to_string())
        .spawn(move || {
            for event in events {
                let closed = event == DisplayEvent::Closed;
                let written = if event.is_error() {
                    write_line(&mut io::stderr().lock(), &event)
                } else {
                    write_line(&mut io::stdout().lock(), &event)
                };
                if let Err(err) = written {
                    warn!(error = ?err, "failed to write to terminal");
                }
                if closed {
                    break;
                }
            }
        })
        .context("failed to spawn display thread")
}

fn write_line(out: &mut impl Write, event: &DisplayEvent) -> io::Result<()> {
    writeln!(out, "{event}")?;
    out.flush()
}
