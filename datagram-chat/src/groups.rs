//! Named recipient sets created with CREATEGROUP.
//!
//! Membership is a snapshot taken at creation. Members who later leave stay
//! listed; delivery skips whoever is offline at the time.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("group '{0}' already exists")]
    AlreadyExists(String),
    #[error("group '{name}' needs at least 2 online members, found {found}")]
    InsufficientMembers { name: String, found: usize },
}

#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: HashMap<String, Vec<String>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `name` from the online subset of `requested` plus `creator`.
    ///
    /// Membership is checked before the name, so a request that is short on
    /// members reports that even when the name is also taken.
    pub fn create<S, F>(
        &mut self,
        name: &str,
        requested: &[S],
        creator: &str,
        is_online: F,
    ) -> Result<&[String], GroupError>
    where
        S: AsRef<str>,
        F: Fn(&str) -> bool,
    {
        let mut members: Vec<String> = Vec::new();
        for member in requested.iter().map(AsRef::as_ref) {
            if is_online(member) && !members.iter().any(|existing| existing == member) {
                members.push(member.to_string());
            }
        }
        if !members.iter().any(|existing| existing == creator) {
            members.push(creator.to_string());
        }

        if members.len() < 2 {
            return Err(GroupError::InsufficientMembers {
                name: name.to_string(),
                found: members.len(),
            });
        }
        if self.groups.contains_key(name) {
            return Err(GroupError::AlreadyExists(name.to_string()));
        }

        Ok(self.groups.entry(name.to_string()).or_insert(members).as_slice())
    }

    pub fn members_of(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
