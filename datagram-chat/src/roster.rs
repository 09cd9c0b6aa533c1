//! LIST pagination.
//!
//! The online roster is spread over as many LIST frames as needed. Each page
//! fills the username field with `"<name>:"` entries first, then spills into
//! the body field. A page is emitted when a name fits in neither field, and
//! the name that did not fit opens the next page. After the last name the
//! token `END` is appended to whichever field is still being filled, or to
//! the body when the username field has no room for it. When neither has
//! room the final page goes out without it.

use tracing::{debug, warn};

use crate::message::{BODY_LEN, Message, USERNAME_LEN};

/// Token that marks the end of the roster.
pub const END_TOKEN: &str = "END";

const DELIMITER: char = ':';

/// Text buffer with a hard byte capacity that refuses appends instead of overflowing.
#[derive(Debug, Clone)]
pub struct BoundedText {
    text: String,
    capacity: usize,
}

impl BoundedText {
    pub fn new(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `piece` whole, or returns `false` and leaves the buffer untouched.
    pub fn try_push(&mut self, piece: &str) -> bool {
        if piece.len() > self.remaining() {
            return false;
        }
        self.text.push_str(piece);
        true
    }

    /// Appends `"<name>:"` whole, or returns `false`.
    pub fn try_push_entry(&mut self, name: &str) -> bool {
        if name.len() + DELIMITER.len_utf8() > self.remaining() {
            return false;
        }
        self.text.push_str(name);
        self.text.push(DELIMITER);
        true
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.text.len()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}

struct PageBuilder {
    username: BoundedText,
    body: BoundedText,
    spilled: bool,
}

impl PageBuilder {
    fn new() -> Self {
        // One byte of each field is reserved for the terminator.
        Self {
            username: BoundedText::new(USERNAME_LEN - 1),
            body: BoundedText::new(BODY_LEN - 1),
            spilled: false,
        }
    }

    fn push_name(&mut self, name: &str) -> bool {
        if !self.spilled {
            if self.username.try_push_entry(name) {
                return true;
            }
            self.spilled = true;
        }
        self.body.try_push_entry(name)
    }

    fn push_end(&mut self) -> bool {
        if !self.spilled && self.username.try_push(END_TOKEN) {
            return true;
        }
        self.body.try_push(END_TOKEN)
    }

    fn finish(&mut self) -> Message {
        let page = Message::list(self.username.as_str(), self.body.as_str());
        self.username.clear();
        self.body.clear();
        self.spilled = false;
        page
    }
}

/// Splits `names` into LIST pages. Always returns at least one page.
pub fn paginate<'a, I>(names: I) -> Vec<Message>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut builder = PageBuilder::new();
    let mut pages = Vec::new();

    for name in names {
        if builder.push_name(name) {
            continue;
        }
        pages.push(builder.finish());
        if !builder.push_name(name) {
            warn!(name, "username does not fit an empty roster page, skipping");
        }
    }

    if !builder.push_end() {
        debug!(pages = pages.len() + 1, "no room for roster terminator on final page");
    }
    pages.push(builder.finish());
    pages
}

/// Reassembles roster pages on the receiving side.
#[derive(Debug, Default)]
pub struct RosterCollector {
    names: Vec<String>,
}

impl RosterCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one LIST page. Returns the complete roster once `END` is seen;
    /// anything after the token is ignored.
    pub fn accept(&mut self, page: &Message) -> Option<Vec<String>> {
        let username = page.username();
        let body = page.body();
        for token in username.split(DELIMITER).chain(body.split(DELIMITER)) {
            if token.is_empty() {
                continue;
            }
            if token == END_TOKEN {
                return Some(std::mem::take(&mut self.names));
            }
            self.names.push(token.to_string());
        }
        None
    }

    /// Names gathered from pages seen since the last complete roster.
    pub fn pending(&self) -> &[String] {
        &self.names
    }
}
