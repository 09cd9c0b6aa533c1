//! Server protocol state machine.
//!
//! [`Dispatcher`] owns the session and group registries and turns each
//! inbound frame into a list of outgoing frames. It does no I/O of its own,
//! which keeps the UDP loop in [`crate::server`] down to receive, dispatch,
//! send.

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::{
    groups::GroupRegistry,
    message::{ErrorCode, Kind, Message},
    roster::{self, END_TOKEN},
    sessions::SessionRegistry,
};

/// Display name used for messages the server originates.
pub const SERVER_NAME: &str = "Server";

/// A frame addressed to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub to: SocketAddr,
    pub message: Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

/// Result of handling one datagram.
#[derive(Debug)]
pub struct Outcome {
    pub outgoing: Vec<Outgoing>,
    pub flow: Flow,
}

impl Outcome {
    fn proceed(outgoing: Vec<Outgoing>) -> Self {
        Self {
            outgoing,
            flow: Flow::Continue,
        }
    }
}

/// Where roster pages go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListTarget {
    /// Every online session, used after a join.
    All,
    /// Only the peer that asked.
    Requester(SocketAddr),
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    sessions: SessionRegistry,
    groups: GroupRegistry,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    /// Decodes and handles one datagram. Undecodable datagrams are dropped.
    pub fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) -> Outcome {
        match Message::decode(bytes) {
            Ok(message) => self.handle(message, from),
            Err(err) => {
                warn!(peer = %from, error = %err, "dropping malformed datagram");
                Outcome::proceed(Vec::new())
            }
        }
    }

    pub fn handle(&mut self, message: Message, from: SocketAddr) -> Outcome {
        debug!(peer = %from, kind = ?message.kind(), "handling message");
        let mut out = Vec::new();
        match message.kind() {
            Kind::Join => self.handle_join(&message, from, &mut out),
            Kind::Broadcast => self.handle_broadcast(&message, from, &mut out),
            Kind::Direct => self.handle_direct(&message, from, &mut out),
            Kind::List => self.handle_list(ListTarget::Requester(from), &mut out),
            Kind::Leave => self.handle_leave(from, &mut out),
            Kind::Exit => {
                self.handle_exit(from, &mut out);
                return Outcome {
                    outgoing: out,
                    flow: Flow::Terminate,
                };
            }
            Kind::CreateGroup => self.handle_create_group(&message, from, &mut out),
            Kind::MessageGroup => self.handle_message_group(&message, from, &mut out),
            Kind::JoinAck | Kind::LeaveAck => {
                debug!(peer = %from, kind = ?message.kind(), "client sent a server-only message");
                reply_error(ErrorCode::UnexpectedMessage, from, &mut out);
            }
            Kind::Error => debug!(peer = %from, "ignoring error frame from client"),
        }
        Outcome::proceed(out)
    }

    /// Sends EXIT to every session and forgets them all.
    pub fn shutdown(&mut self) -> Vec<Outgoing> {
        let out = self
            .sessions
            .addresses()
            .map(|to| Outgoing {
                to,
                message: Message::exit(),
            })
            .collect();
        self.sessions.clear();
        out
    }

    fn handle_join(&mut self, message: &Message, from: SocketAddr, out: &mut Vec<Outgoing>) {
        let username = message.username();
        if username.is_empty() || username.contains(':') || username == END_TOKEN {
            warn!(peer = %from, %username, "rejecting unusable username");
            reply_error(ErrorCode::UnexpectedMessage, from, out);
            return;
        }

        if let Err(err) = self.sessions.register(&username, from) {
            info!(peer = %from, error = %err, "join rejected");
            reply_error(ErrorCode::UserAlreadyOnline, from, out);
            return;
        }

        info!(peer = %from, %username, "user joined");
        send(out, from, Message::join_ack());

        let notice = Message::broadcast(SERVER_NAME, &format!("{username} has joined the chat."));
        for session in self.sessions.iter().filter(|session| session.address != from) {
            send(out, session.address, notice.clone());
        }

        self.handle_list(ListTarget::All, out);
    }

    fn handle_broadcast(&mut self, message: &Message, from: SocketAddr, out: &mut Vec<Outgoing>) {
        let forward = Message::broadcast(&message.username(), &message.body());
        for to in self.sessions.addresses().filter(|address| *address != from) {
            send(out, to, forward.clone());
        }
    }

    fn handle_direct(&mut self, message: &Message, from: SocketAddr, out: &mut Vec<Outgoing>) {
        let body = message.body();
        let Some((recipient, text)) = body.split_once(':') else {
            debug!(peer = %from, "direct message without recipient separator");
            reply_error(ErrorCode::UnexpectedMessage, from, out);
            return;
        };

        match self.sessions.lookup(recipient) {
            Some(to) => send(out, to, Message::direct(&message.username(), text)),
            None => {
                debug!(peer = %from, recipient, "direct message to unknown user");
                reply_error(ErrorCode::UnknownUsername, from, out);
            }
        }
    }

    fn handle_list(&mut self, target: ListTarget, out: &mut Vec<Outgoing>) {
        let pages = roster::paginate(self.sessions.usernames());
        debug!(pages = pages.len(), ?target, "sending roster");
        for page in pages {
            match target {
                ListTarget::All => {
                    for to in self.sessions.addresses() {
                        send(out, to, page.clone());
                    }
                }
                ListTarget::Requester(to) => send(out, to, page),
            }
        }
    }

    fn handle_leave(&mut self, from: SocketAddr, out: &mut Vec<Outgoing>) {
        let username = match self.sessions.unregister_by_address(from) {
            Ok(username) => username,
            Err(err) => {
                debug!(peer = %from, error = %err, "leave from unknown peer");
                reply_error(ErrorCode::UnknownUsername, from, out);
                return;
            }
        };

        info!(peer = %from, %username, "user left");
        send(out, from, Message::leave_ack());
        let notice = Message::leave_notice(&username);
        for to in self.sessions.addresses() {
            send(out, to, notice.clone());
        }
    }

    fn handle_exit(&mut self, from: SocketAddr, out: &mut Vec<Outgoing>) {
        info!(peer = %from, sessions = self.sessions.len(), "exit requested, shutting down");
        out.extend(self.shutdown());
    }

    fn handle_create_group(&mut self, message: &Message, from: SocketAddr, out: &mut Vec<Outgoing>) {
        let body = message.body();
        let mut tokens = body.split(':');
        let name = tokens.next().unwrap_or_default();
        let requested: Vec<&str> = tokens.filter(|token| !token.is_empty()).collect();

        let Some(creator) = self.sessions.username_of(from).map(str::to_string) else {
            debug!(peer = %from, "create group from unknown peer");
            reply_error(ErrorCode::UnexpectedMessage, from, out);
            return;
        };
        if name.is_empty() {
            debug!(peer = %from, "create group without a name");
            reply_error(ErrorCode::UnexpectedMessage, from, out);
            return;
        }

        let sessions = &self.sessions;
        match self
            .groups
            .create(name, &requested, &creator, |member| sessions.is_online(member))
        {
            Ok(members) => {
                info!(group = name, ?members, "group created");
                let confirmation = format!("Group '{name}' created successfully.");
                send(out, from, Message::broadcast(SERVER_NAME, &confirmation));
            }
            Err(err) => {
                info!(peer = %from, error = %err, "group creation rejected");
                reply_error(ErrorCode::UnexpectedMessage, from, out);
            }
        }
    }

    fn handle_message_group(&mut self, message: &Message, from: SocketAddr, out: &mut Vec<Outgoing>) {
        let group = message.username();
        let Some(members) = self.groups.members_of(&group) else {
            debug!(peer = %from, %group, "message to unknown group");
            reply_error(ErrorCode::UnknownUsername, from, out);
            return;
        };

        let sender = self.sessions.username_of(from).unwrap_or(&group);
        let delivery = Message::group_delivery(sender, &group, &message.body());
        for member in members {
            match self.sessions.lookup(member) {
                Some(to) => send(out, to, delivery.clone()),
                None => debug!(%group, %member, "skipping offline group member"),
            }
        }
    }
}

fn send(out: &mut Vec<Outgoing>, to: SocketAddr, message: Message) {
    out.push(Outgoing { to, message });
}

fn reply_error(code: ErrorCode, to: SocketAddr, out: &mut Vec<Outgoing>) {
    send(out, to, Message::error(code));
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: SocketAddr = addr(1001);
    const BOB: SocketAddr = addr(1002);
    const CAROL: SocketAddr = addr(1003);

    const fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), port)
    }

    fn sent_to(outcome: &Outcome, to: SocketAddr) -> Vec<&Message> {
        outcome
            .outgoing
            .iter()
            .filter(|outgoing| outgoing.to == to)
            .map(|outgoing| &outgoing.message)
            .collect()
    }

    fn joined(names: &[(&str, SocketAddr)]) -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        for (name, address) in names {
            let outcome = dispatcher.handle(Message::join(name), *address);
            assert_eq!(sent_to(&outcome, *address)[0].kind(), Kind::JoinAck);
        }
        dispatcher
    }

    #[test]
    fn join_acks_announces_and_sends_roster_to_everyone() {
        let mut dispatcher = joined(&[("alice", ALICE)]);
        let outcome = dispatcher.handle(Message::join("bob"), BOB);

        let to_bob = sent_to(&outcome, BOB);
        assert_eq!(to_bob[0].kind(), Kind::JoinAck);
        assert_eq!(to_bob[1].kind(), Kind::List);
        assert_eq!(to_bob[1].username(), "alice:bob:END");
        assert_eq!(to_bob.len(), 2);

        let to_alice = sent_to(&outcome, ALICE);
        assert_eq!(to_alice[0].kind(), Kind::Broadcast);
        assert_eq!(to_alice[0].username(), SERVER_NAME);
        assert_eq!(to_alice[0].body(), "bob has joined the chat.");
        assert_eq!(to_alice[1].username(), "alice:bob:END");
        assert_eq!(outcome.flow, Flow::Continue);
    }

    #[test]
    fn duplicate_join_gets_error_and_keeps_first_session() {
        let mut dispatcher = joined(&[("alice", ALICE)]);
        let outcome = dispatcher.handle(Message::join("alice"), BOB);

        assert_eq!(outcome.outgoing.len(), 1);
        assert_eq!(
            sent_to(&outcome, BOB)[0].error_code(),
            Some(ErrorCode::UserAlreadyOnline)
        );
        assert_eq!(dispatcher.sessions().lookup("alice"), Some(ALICE));
    }

    #[test]
    fn unusable_usernames_are_rejected() {
        let mut dispatcher = Dispatcher::new();
        for name in ["", "a:b", "END"] {
            let outcome = dispatcher.handle(Message::join(name), ALICE);
            assert_eq!(
                sent_to(&outcome, ALICE)[0].error_code(),
                Some(ErrorCode::UnexpectedMessage)
            );
        }
        assert!(dispatcher.sessions().is_empty());
    }

    #[test]
    fn broadcast_skips_sender_by_address() {
        let mut dispatcher = joined(&[("alice", ALICE), ("bob", BOB), ("carol", CAROL)]);
        let outcome = dispatcher.handle(Message::broadcast("alice", "hello"), ALICE);

        assert!(sent_to(&outcome, ALICE).is_empty());
        for peer in [BOB, CAROL] {
            let received = sent_to(&outcome, peer);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].username(), "alice");
            assert_eq!(received[0].body(), "hello");
        }
    }

    #[test]
    fn direct_message_keeps_extra_colons() {
        let mut dispatcher = joined(&[("alice", ALICE), ("bob", BOB)]);
        let outcome = dispatcher.handle(Message::direct("alice", "bob:meet at 10:30"), ALICE);

        let received = sent_to(&outcome, BOB);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind(), Kind::Direct);
        assert_eq!(received[0].username(), "alice");
        assert_eq!(received[0].body(), "meet at 10:30");
    }

    #[test]
    fn direct_message_errors() {
        let mut dispatcher = joined(&[("alice", ALICE)]);

        let unknown = dispatcher.handle(Message::direct("alice", "zed:hi"), ALICE);
        assert_eq!(
            sent_to(&unknown, ALICE)[0].error_code(),
            Some(ErrorCode::UnknownUsername)
        );

        let malformed = dispatcher.handle(Message::direct("alice", "no separator"), ALICE);
        assert_eq!(
            sent_to(&malformed, ALICE)[0].error_code(),
            Some(ErrorCode::UnexpectedMessage)
        );
    }

    #[test]
    fn list_request_goes_only_to_requester() {
        let mut dispatcher = joined(&[("alice", ALICE), ("bob", BOB)]);
        let outcome = dispatcher.handle(Message::list("alice", ""), ALICE);

        assert_eq!(outcome.outgoing.len(), 1);
        assert_eq!(sent_to(&outcome, ALICE)[0].username(), "alice:bob:END");
    }

    #[test]
    fn leave_twice_from_same_address() {
        let mut dispatcher = joined(&[("alice", ALICE), ("bob", BOB)]);

        let first = dispatcher.handle(Message::leave(), BOB);
        assert_eq!(sent_to(&first, BOB)[0].kind(), Kind::LeaveAck);
        let notice = sent_to(&first, ALICE);
        assert_eq!(notice[0].kind(), Kind::Leave);
        assert_eq!(notice[0].username(), "bob");
        assert!(!dispatcher.sessions().is_online("bob"));

        let second = dispatcher.handle(Message::leave(), BOB);
        assert_eq!(second.outgoing.len(), 1);
        assert_eq!(
            sent_to(&second, BOB)[0].error_code(),
            Some(ErrorCode::UnknownUsername)
        );
    }

    #[test]
    fn acks_from_clients_are_unexpected() {
        let mut dispatcher = joined(&[("alice", ALICE)]);
        for message in [Message::join_ack(), Message::leave_ack()] {
            let outcome = dispatcher.handle(message, ALICE);
            assert_eq!(
                sent_to(&outcome, ALICE)[0].error_code(),
                Some(ErrorCode::UnexpectedMessage)
            );
        }
    }

    #[test]
    fn error_frames_from_clients_are_ignored() {
        let mut dispatcher = joined(&[("alice", ALICE)]);
        let outcome = dispatcher.handle(Message::error(ErrorCode::UnknownUsername), ALICE);
        assert!(outcome.outgoing.is_empty());
        assert_eq!(outcome.flow, Flow::Continue);
    }

    #[test]
    fn exit_notifies_everyone_and_terminates() {
        let mut dispatcher = joined(&[("alice", ALICE), ("bob", BOB)]);
        let outcome = dispatcher.handle(Message::exit(), ALICE);

        assert_eq!(outcome.flow, Flow::Terminate);
        for peer in [ALICE, BOB] {
            assert_eq!(sent_to(&outcome, peer)[0].kind(), Kind::Exit);
        }
        assert!(dispatcher.sessions().is_empty());
    }

    #[test]
    fn malformed_datagram_is_dropped() {
        let mut dispatcher = joined(&[("alice", ALICE)]);
        let outcome = dispatcher.handle_datagram(b"short", ALICE);
        assert!(outcome.outgoing.is_empty());
        assert_eq!(outcome.flow, Flow::Continue);
        assert!(dispatcher.sessions().is_online("alice"));
    }

    #[test]
    fn create_group_includes_creator_and_confirms_to_requester_only() {
        let mut dispatcher = joined(&[("alice", ALICE), ("bob", BOB)]);
        let outcome = dispatcher.handle(Message::create_group("team", &["bob"]), ALICE);

        assert_eq!(outcome.outgoing.len(), 1);
        let confirmation = sent_to(&outcome, ALICE)[0];
        assert_eq!(confirmation.kind(), Kind::Broadcast);
        assert_eq!(confirmation.username(), SERVER_NAME);
        assert_eq!(confirmation.body(), "Group 'team' created successfully.");
        assert_eq!(dispatcher.groups().members_of("team").unwrap(), ["bob", "alice"]);
    }

    #[test]
    fn create_group_failures_are_unexpected_message() {
        let mut dispatcher = joined(&[("alice", ALICE), ("bob", BOB)]);

        let lonely = dispatcher.handle(Message::create_group("solo", &["zed"]), ALICE);
        assert_eq!(
            sent_to(&lonely, ALICE)[0].error_code(),
            Some(ErrorCode::UnexpectedMessage)
        );

        dispatcher.handle(Message::create_group("team", &["bob"]), ALICE);
        let taken = dispatcher.handle(Message::create_group("team", &["alice"]), BOB);
        assert_eq!(
            sent_to(&taken, BOB)[0].error_code(),
            Some(ErrorCode::UnexpectedMessage)
        );

        let stranger = dispatcher.handle(Message::create_group("other", &["alice"]), CAROL);
        assert_eq!(
            sent_to(&stranger, CAROL)[0].error_code(),
            Some(ErrorCode::UnexpectedMessage)
        );
    }

    #[test]
    fn group_message_reaches_online_members_and_skips_departed() {
        let mut dispatcher = joined(&[("alice", ALICE), ("bob", BOB), ("carol", CAROL)]);
        dispatcher.handle(Message::create_group("team", &["bob", "carol"]), ALICE);
        dispatcher.handle(Message::leave(), CAROL);

        let outcome = dispatcher.handle(Message::message_group("team", "hi"), ALICE);
        assert!(sent_to(&outcome, CAROL).is_empty());
        for peer in [ALICE, BOB] {
            let received = sent_to(&outcome, peer);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].kind(), Kind::MessageGroup);
            assert_eq!(received[0].groupname(), "team");
            assert_eq!(received[0].username(), "alice");
            assert_eq!(received[0].body(), "hi");
        }
        assert_eq!(dispatcher.groups().members_of("team").unwrap().len(), 3);
    }

    #[test]
    fn group_message_to_unknown_group() {
        let mut dispatcher = joined(&[("alice", ALICE)]);
        let outcome = dispatcher.handle(Message::message_group("ghosts", "boo"), ALICE);
        assert_eq!(
            sent_to(&outcome, ALICE)[0].error_code(),
            Some(ErrorCode::UnknownUsername)
        );
    }
}
