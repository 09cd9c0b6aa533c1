//! Fixed-layout wire frame shared by the server and the client.
//!
//! Every datagram is exactly [`FRAME_LEN`] bytes, whatever its kind:
//!
//! ```text
//! [0]            kind tag
//! [1..65]        username   (NUL-terminated)
//! [65..1089]     body       (NUL-terminated)
//! [1089..1153]   groupname  (NUL-terminated)
//! ```
//!
//! Text longer than a field is cut to the field size minus one byte so the
//! terminator always fits. Truncation is silent.

use std::{borrow::Cow, fmt};

use thiserror::Error;

pub const USERNAME_LEN: usize = 64;
pub const BODY_LEN: usize = 1024;
pub const GROUPNAME_LEN: usize = 64;
pub const FRAME_LEN: usize = 1 + USERNAME_LEN + BODY_LEN + GROUPNAME_LEN;

/// Port the server listens on unless told otherwise.
pub const SERVER_PORT: u16 = 8867;

const USERNAME_START: usize = 1;
const BODY_START: usize = USERNAME_START + USERNAME_LEN;
const GROUPNAME_START: usize = BODY_START + BODY_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Join = 0,
    JoinAck = 1,
    Broadcast = 2,
    Direct = 3,
    List = 4,
    Leave = 5,
    LeaveAck = 6,
    Exit = 7,
    CreateGroup = 8,
    MessageGroup = 9,
    Error = 10,
}

impl Kind {
    pub fn from_tag(tag: u8) -> Result<Self, FrameError> {
        let kind = match tag {
            0 => Kind::Join,
            1 => Kind::JoinAck,
            2 => Kind::Broadcast,
            3 => Kind::Direct,
            4 => Kind::List,
            5 => Kind::Leave,
            6 => Kind::LeaveAck,
            7 => Kind::Exit,
            8 => Kind::CreateGroup,
            9 => Kind::MessageGroup,
            10 => Kind::Error,
            other => return Err(FrameError::UnknownKind(other)),
        };
        Ok(kind)
    }
}

/// Codes carried in the first two body bytes of an ERROR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UserAlreadyOnline,
    UnknownUsername,
    UnexpectedMessage,
}

impl ErrorCode {
    pub const fn code(self) -> u16 {
        match self {
            ErrorCode::UserAlreadyOnline => 0,
            ErrorCode::UnknownUsername => 1,
            ErrorCode::UnexpectedMessage => 2,
        }
    }

    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(ErrorCode::UserAlreadyOnline),
            1 => Some(ErrorCode::UnknownUsername),
            2 => Some(ErrorCode::UnexpectedMessage),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorCode::UserAlreadyOnline => "user already online",
            ErrorCode::UnknownUsername => "unknown username",
            ErrorCode::UnexpectedMessage => "unexpected message",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("expected a {expected}-byte frame, got {actual} bytes")]
    WrongLength { expected: usize, actual: usize },
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
}

/// A zero-initialised text field of `N` bytes whose last byte is always NUL.
#[derive(Clone, Copy, PartialEq, Eq)]
struct Field<const N: usize>([u8; N]);

impl<const N: usize> Field<N> {
    fn empty() -> Self {
        Self([0; N])
    }

    fn from_text(text: &str) -> Self {
        let mut field = Self::empty();
        let len = truncated_len(text, N - 1);
        field.0[..len].copy_from_slice(&text.as_bytes()[..len]);
        field
    }

    fn from_wire(bytes: &[u8]) -> Self {
        let mut field = Self::empty();
        field.0.copy_from_slice(bytes);
        field.0[N - 1] = 0;
        field
    }

    fn text(&self) -> Cow<'_, str> {
        let end = self.0.iter().position(|&byte| byte == 0).unwrap_or(N);
        String::from_utf8_lossy(&self.0[..end])
    }
}

/// Longest prefix of `text` that fits in `max` bytes without splitting a character.
fn truncated_len(text: &str, max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// One protocol message. Carries no identity beyond its content.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    kind: Kind,
    username: Field<USERNAME_LEN>,
    body: Field<BODY_LEN>,
    groupname: Field<GROUPNAME_LEN>,
}

impl Message {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            username: Field::empty(),
            body: Field::empty(),
            groupname: Field::empty(),
        }
    }

    fn with_username(mut self, username: &str) -> Self {
        self.username = Field::from_text(username);
        self
    }

    fn with_body(mut self, body: &str) -> Self {
        self.body = Field::from_text(body);
        self
    }

    fn with_groupname(mut self, groupname: &str) -> Self {
        self.groupname = Field::from_text(groupname);
        self
    }

    pub fn join(username: &str) -> Self {
        Self::new(Kind::Join).with_username(username)
    }

    pub fn join_ack() -> Self {
        Self::new(Kind::JoinAck)
    }

    pub fn broadcast(username: &str, body: &str) -> Self {
        Self::new(Kind::Broadcast)
            .with_username(username)
            .with_body(body)
    }

    /// Client to server the body is `"<recipient>:<text>"`; server to client
    /// it is the text alone and `username` names the sender.
    pub fn direct(username: &str, body: &str) -> Self {
        Self::new(Kind::Direct).with_username(username).with_body(body)
    }

    /// Both fields double as roster page buffers when sent by the server.
    pub fn list(username: &str, body: &str) -> Self {
        Self::new(Kind::List).with_username(username).with_body(body)
    }

    pub fn leave() -> Self {
        Self::new(Kind::Leave)
    }

    /// Server notice that `username` has left.
    pub fn leave_notice(username: &str) -> Self {
        Self::new(Kind::Leave).with_username(username)
    }

    pub fn leave_ack() -> Self {
        Self::new(Kind::LeaveAck)
    }

    pub fn exit() -> Self {
        Self::new(Kind::Exit)
    }

    /// The body is `"<groupname>:<member>:<member>..."`. Members that would
    /// overflow the body are left out whole rather than cut.
    pub fn create_group<S: AsRef<str>>(groupname: &str, members: &[S]) -> Self {
        let mut body = String::from(&groupname[..truncated_len(groupname, GROUPNAME_LEN - 1)]);
        for member in members {
            let member = member.as_ref();
            if body.len() + 1 + member.len() > BODY_LEN - 1 {
                break;
            }
            body.push(':');
            body.push_str(member);
        }
        Self::new(Kind::CreateGroup)
            .with_groupname(groupname)
            .with_body(&body)
    }

    /// Group message request; the server looks the group up by `username`.
    pub fn message_group(groupname: &str, body: &str) -> Self {
        Self::new(Kind::MessageGroup)
            .with_username(groupname)
            .with_groupname(groupname)
            .with_body(body)
    }

    /// Group message as delivered to members, tagged with its sender.
    pub fn group_delivery(sender: &str, groupname: &str, body: &str) -> Self {
        Self::new(Kind::MessageGroup)
            .with_username(sender)
            .with_groupname(groupname)
            .with_body(body)
    }

    pub fn error(code: ErrorCode) -> Self {
        let mut message = Self::new(Kind::Error);
        message.body.0[..2].copy_from_slice(&code.code().to_be_bytes());
        message
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn username(&self) -> Cow<'_, str> {
        self.username.text()
    }

    pub fn body(&self) -> Cow<'_, str> {
        self.body.text()
    }

    pub fn groupname(&self) -> Cow<'_, str> {
        self.groupname.text()
    }

    /// Decoded error code of an ERROR frame; `None` for other kinds or unknown codes.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.kind != Kind::Error {
            return None;
        }
        ErrorCode::from_code(u16::from_be_bytes([self.body.0[0], self.body.0[1]]))
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = self.kind as u8;
        frame[USERNAME_START..BODY_START].copy_from_slice(&self.username.0);
        frame[BODY_START..GROUPNAME_START].copy_from_slice(&self.body.0);
        frame[GROUPNAME_START..].copy_from_slice(&self.groupname.0);
        frame
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != FRAME_LEN {
            return Err(FrameError::WrongLength {
                expected: FRAME_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            kind: Kind::from_tag(bytes[0])?,
            username: Field::from_wire(&bytes[USERNAME_START..BODY_START]),
            body: Field::from_wire(&bytes[BODY_START..GROUPNAME_START]),
            groupname: Field::from_wire(&bytes[GROUPNAME_START..]),
        })
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Message");
        out.field("kind", &self.kind)
            .field("username", &self.username())
            .field("groupname", &self.groupname());
        match self.kind {
            Kind::Error => out.field("error_code", &self.error_code()),
            _ => out.field("body", &self.body()),
        };
        out.finish()
    }
}
