//! Client side of the protocol.
//!
//! After the join handshake three actors run side by side:
//!
//! - **Receiver worker**: an OS thread blocked on the socket. It decodes each
//!   datagram and forwards it to the control loop. It stops after EXIT, or
//!   after the leave acknowledgement once a leave has been requested.
//! - **Input source**: whatever feeds command lines (stdin in the binary).
//! - **Control loop**: waits on both channels with a short timeout, encodes
//!   commands into frames and turns inbound frames into [`DisplayEvent`]s.
//!
//! The only state shared with the receiver is the leave flag in
//! [`ClientState`].

use std::{
    fmt, io,
    net::{SocketAddr, UdpSocket},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, never, unbounded};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    cli::ClientArgs,
    command::Command,
    message::{ErrorCode, FRAME_LEN, Kind, Message},
    roster::RosterCollector,
};

/// Longest the control loop waits before checking its channels again.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub username: String,
    pub server: SocketAddr,
    pub bind: SocketAddr,
    pub join_timeout: Duration,
}

impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        Self {
            username: args.username,
            server: args.server,
            bind: args.bind,
            join_timeout: Duration::from_millis(args.join_timeout_ms),
        }
    }
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("username must be non-empty and must not contain ':'")]
    InvalidUsername,
    #[error("server rejected join: {0}")]
    Rejected(ErrorCode),
    #[error("server rejected join with an unknown error code")]
    RejectedUnknown,
    #[error("no join acknowledgement within {0:?}")]
    TimedOut(Duration),
    #[error("socket error during join: {0}")]
    Io(#[from] io::Error),
}

/// State shared between the control loop and the receiver worker.
#[derive(Debug)]
pub struct ClientState {
    username: String,
    has_requested_leave: AtomicBool,
}

impl ClientState {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            has_requested_leave: AtomicBool::new(false),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Must happen before the LEAVE frame is sent so the receiver sees the
    /// flag when the acknowledgement arrives.
    pub fn request_leave(&self) {
        self.has_requested_leave.store(true, Ordering::Release);
    }

    pub fn has_requested_leave(&self) -> bool {
        self.has_requested_leave.load(Ordering::Acquire)
    }
}

/// What the control loop hands to whoever presents the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Joined { username: String },
    Chat { from: String, text: String },
    Direct { from: String, text: String },
    Group { group: String, from: String, text: String },
    Roster { users: Vec<String> },
    UserLeft { username: String },
    Error { code: Option<ErrorCode> },
    /// Local problem with typed input; nothing was sent.
    Notice(String),
    Closed,
}

impl DisplayEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, DisplayEvent::Error { .. } | DisplayEvent::Notice(_))
    }
}

impl fmt::Display for DisplayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayEvent::Joined { username } => write!(f, "*** joined as {username}"),
            DisplayEvent::Chat { from, text } => write!(f, "<{from}> {text}"),
            DisplayEvent::Direct { from, text } => write!(f, "[dm] <{from}> {text}"),
            DisplayEvent::Group { group, from, text } => write!(f, "[{group}] <{from}> {text}"),
            DisplayEvent::Roster { users } => write!(f, "*** online: {}", users.join(", ")),
            DisplayEvent::UserLeft { username } => write!(f, "*** {username} left the chat"),
            DisplayEvent::Error { code: Some(code) } => write!(f, "!!! server error: {code}"),
            DisplayEvent::Error { code: None } => write!(f, "!!! server error"),
            DisplayEvent::Notice(text) => write!(f, "!!! {text}"),
            DisplayEvent::Closed => write!(f, "*** disconnected"),
        }
    }
}

/// A client that has completed the join handshake.
pub struct Client {
    socket: UdpSocket,
    server: SocketAddr,
    state: Arc<ClientState>,
    inbound: Receiver<Message>,
    receiver: JoinHandle<()>,
}

impl Client {
    /// Binds a socket, joins the server and starts the receiver worker.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        if config.username.is_empty() || config.username.contains(':') {
            return Err(JoinError::InvalidUsername.into());
        }

        let socket = UdpSocket::bind(config.bind)
            .with_context(|| format!("failed to bind {}", config.bind))?;
        join(&socket, config).with_context(|| format!("failed to join {}", config.server))?;
        info!(server = %config.server, username = %config.username, "joined chat");

        let state = Arc::new(ClientState::new(config.username.clone()));
        let (inbound_tx, inbound) = unbounded();
        let receiver_socket = socket.try_clone().context("failed to clone client socket")?;
        let receiver = spawn_receiver(receiver_socket, Arc::clone(&state), inbound_tx)?;

        Ok(Self {
            socket,
            server: config.server,
            state,
            inbound,
            receiver,
        })
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Runs the control loop until EXIT or a confirmed leave, then closes the
    /// display and waits for the receiver worker.
    pub fn run(self, commands: Receiver<String>, display: Sender<DisplayEvent>) -> Result<()> {
        let Client {
            socket,
            server,
            state,
            inbound,
            receiver,
        } = self;

        let mut control = ControlLoop {
            socket,
            server,
            state,
            display,
            roster: RosterCollector::new(),
        };
        control.show(DisplayEvent::Joined {
            username: control.state.username().to_string(),
        });
        control.run(&commands, &inbound);

        control.show(DisplayEvent::Closed);
        receiver
            .join()
            .map_err(|_| anyhow!("receiver thread panicked"))?;
        debug!("client stopped");
        Ok(())
    }
}

fn join(socket: &UdpSocket, config: &ClientConfig) -> Result<(), JoinError> {
    socket.send_to(&Message::join(&config.username).encode(), config.server)?;
    debug!(server = %config.server, "join sent, waiting for acknowledgement");

    let deadline = Instant::now() + config.join_timeout;
    let mut buffer = [0u8; FRAME_LEN + 1];
    let outcome = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break Err(JoinError::TimedOut(config.join_timeout));
        }
        socket.set_read_timeout(Some(remaining))?;

        let len = match socket.recv_from(&mut buffer) {
            Ok((len, _)) => len,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(err) => break Err(err.into()),
        };

        match Message::decode(&buffer[..len]) {
            Ok(message) if message.kind() == Kind::JoinAck => break Ok(()),
            Ok(message) if message.kind() == Kind::Error => {
                break Err(match message.error_code() {
                    Some(code) => JoinError::Rejected(code),
                    None => JoinError::RejectedUnknown,
                });
            }
            Ok(message) => debug!(kind = ?message.kind(), "ignoring frame before join acknowledgement"),
            Err(err) => debug!(error = %err, "ignoring malformed frame during join"),
        }
    };

    socket.set_read_timeout(None)?;
    outcome
}

fn spawn_receiver(
    socket: UdpSocket,
    state: Arc<ClientState>,
    inbound: Sender<Message>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("chat-receiver".to_string())
        .spawn(move || receive_loop(&socket, &state, &inbound))
        .context("failed to spawn receiver thread")
}

fn receive_loop(socket: &UdpSocket, state: &ClientState, inbound: &Sender<Message>) {
    let mut buffer = [0u8; FRAME_LEN + 1];
    loop {
        let (len, peer) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(error = ?err, "receiver stopping after socket error");
                return;
            }
        };

        let message = match Message::decode(&buffer[..len]) {
            Ok(message) => message,
            Err(err) => {
                debug!(%peer, error = %err, "dropping malformed datagram");
                continue;
            }
        };

        let last = message.kind() == Kind::Exit
            || (message.kind() == Kind::LeaveAck && state.has_requested_leave());
        if inbound.send(message).is_err() {
            debug!("control loop gone, receiver stopping");
            return;
        }
        if last {
            debug!("receiver finished");
            return;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Stop,
}

struct ControlLoop {
    socket: UdpSocket,
    server: SocketAddr,
    state: Arc<ClientState>,
    display: Sender<DisplayEvent>,
    roster: RosterCollector,
}

impl ControlLoop {
    fn run(&mut self, commands: &Receiver<String>, inbound: &Receiver<Message>) {
        let idle = never();
        let mut input_open = true;

        loop {
            let input = if input_open { commands } else { &idle };
            let step = crossbeam_channel::select! {
                recv(input) -> line => match line {
                    Ok(line) => self.handle_line(&line),
                    Err(_) => {
                        debug!("input closed");
                        input_open = false;
                        if self.state.has_requested_leave() {
                            Step::Continue
                        } else {
                            self.send_command(&Command::Leave)
                        }
                    }
                },
                recv(inbound) -> message => match message {
                    Ok(message) => self.handle_inbound(&message),
                    Err(_) => {
                        debug!("receiver gone");
                        Step::Stop
                    }
                },
                default(POLL_INTERVAL) => Step::Continue,
            };
            if step == Step::Stop {
                break;
            }
        }
    }

    fn handle_line(&mut self, line: &str) -> Step {
        if self.state.has_requested_leave() {
            debug!(line, "leave pending, dropping command");
            return Step::Continue;
        }
        match Command::parse(line) {
            Ok(command) => self.send_command(&command),
            Err(err) => {
                debug!(error = %err, "rejected command");
                self.show(DisplayEvent::Notice(err.to_string()));
                Step::Continue
            }
        }
    }

    fn send_command(&self, command: &Command) -> Step {
        let username = self.state.username();
        let message = match command {
            Command::Join => Message::join(username),
            Command::Broadcast { text } => Message::broadcast(username, text),
            Command::Direct { to, text } => Message::direct(username, &format!("{to}:{text}")),
            Command::CreateGroup { name, members } => Message::create_group(name, members.as_slice()),
            Command::MessageGroup { group, text } => Message::message_group(group, text),
            Command::List => Message::list(username, ""),
            Command::Leave => {
                self.state.request_leave();
                Message::leave()
            }
            Command::Exit => Message::exit(),
        };
        self.send(&message);

        match command {
            Command::Exit => Step::Stop,
            _ => Step::Continue,
        }
    }

    fn handle_inbound(&mut self, message: &Message) -> Step {
        match message.kind() {
            Kind::Broadcast => self.show(DisplayEvent::Chat {
                from: message.username().into_owned(),
                text: message.body().into_owned(),
            }),
            Kind::Direct => self.show(DisplayEvent::Direct {
                from: message.username().into_owned(),
                text: message.body().into_owned(),
            }),
            Kind::MessageGroup => self.show(DisplayEvent::Group {
                group: message.groupname().into_owned(),
                from: message.username().into_owned(),
                text: message.body().into_owned(),
            }),
            Kind::List => {
                if let Some(users) = self.roster.accept(message) {
                    self.show(DisplayEvent::Roster { users });
                }
            }
            Kind::Leave => self.show(DisplayEvent::UserLeft {
                username: message.username().into_owned(),
            }),
            Kind::Error => self.show(DisplayEvent::Error {
                code: message.error_code(),
            }),
            Kind::LeaveAck => {
                if self.state.has_requested_leave() {
                    info!("leave acknowledged");
                    return Step::Stop;
                }
                debug!("ignoring unsolicited leave acknowledgement");
            }
            Kind::Exit => {
                info!("server requested exit");
                return Step::Stop;
            }
            Kind::Join | Kind::JoinAck | Kind::CreateGroup => {
                debug!(kind = ?message.kind(), "ignoring unexpected frame from server");
            }
        }
        Step::Continue
    }

    fn show(&self, event: DisplayEvent) {
        if self.display.send(event).is_err() {
            debug!("display closed, dropping event");
        }
    }

    fn send(&self, message: &Message) {
        if let Err(err) = self.socket.send_to(&message.encode(), self.server) {
            warn!(error = ?err, kind = ?message.kind(), "failed to send to server");
        }
    }
}
