//! Server-side table of online users.
//!
//! A session binds a unique username to the UDP address it joined from.
//! Sessions are kept in join order so roster pages come out the same way
//! every time within a run.

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub address: SocketAddr,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("user '{0}' is already online")]
    AlreadyOnline(String),
    #[error("no session bound to {0}")]
    NotFound(SocketAddr),
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session unless `username` already has one.
    pub fn register(&mut self, username: &str, address: SocketAddr) -> Result<(), SessionError> {
        if self.is_online(username) {
            return Err(SessionError::AlreadyOnline(username.to_string()));
        }
        self.sessions.push(Session {
            username: username.to_string(),
            address,
        });
        Ok(())
    }

    /// Removes the session bound to `address` and returns its username.
    pub fn unregister_by_address(&mut self, address: SocketAddr) -> Result<String, SessionError> {
        let index = self
            .sessions
            .iter()
            .position(|session| session.address == address)
            .ok_or(SessionError::NotFound(address))?;
        Ok(self.sessions.remove(index).username)
    }

    pub fn lookup(&self, username: &str) -> Option<SocketAddr> {
        self.sessions
            .iter()
            .find(|session| session.username == username)
            .map(|session| session.address)
    }

    pub fn username_of(&self, address: SocketAddr) -> Option<&str> {
        self.sessions
            .iter()
            .find(|session| session.address == address)
            .map(|session| session.username.as_str())
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.lookup(username).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn addresses(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.sessions.iter().map(|session| session.address)
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().map(|session| session.username.as_str())
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
