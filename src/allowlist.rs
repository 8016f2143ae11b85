//! Admission allow-lists for inbound messages.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::message::{ChatId, ChatKind};

/// One allow-list record as produced by the config loader.
///
/// Only `jid` carries meaning; `name` is a display label for humans editing
/// the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedEntry {
    pub jid: String,
    #[serde(default)]
    pub name: String,
}

impl AllowedEntry {
    pub fn new(jid: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            name: String::new(),
        }
    }
}

/// The two disjoint sets of chat identifiers messages are accepted from.
///
/// An empty set denies every source of that kind; there is no wildcard.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    groups: HashSet<String>,
    users: HashSet<String>,
}

impl AllowList {
    pub fn new(groups: &[AllowedEntry], users: &[AllowedEntry]) -> Self {
        Self {
            groups: groups.iter().map(|e| e.jid.clone()).collect(),
            users: users.iter().map(|e| e.jid.clone()).collect(),
        }
    }

    /// Whether a message from this chat passes the admission gate.
    pub fn permits(&self, chat: &ChatId) -> bool {
        match chat.kind {
            ChatKind::Group => self.groups.contains(&chat.jid),
            ChatKind::User => self.users.contains(&chat.jid),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.users.is_empty()
    }
}

/// On-disk shape of `allowlist.json` in the data directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllowListFile {
    #[serde(default)]
    pub groups: Vec<AllowedEntry>,
    #[serde(default)]
    pub users: Vec<AllowedEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_denies_everyone() {
        let list = AllowList::default();
        assert!(!list.permits(&ChatId::user("a@host")));
        assert!(!list.permits(&ChatId::group("g@group")));
    }

    #[test]
    fn user_entry_does_not_admit_group() {
        let list = AllowList::new(&[], &[AllowedEntry::new("a@host")]);
        assert!(list.permits(&ChatId::user("a@host")));
        assert!(!list.permits(&ChatId::group("a@host")));
    }

    #[test]
    fn group_entry_admits_group_only() {
        let list = AllowList::new(&[AllowedEntry::new("g@group")], &[]);
        assert!(list.permits(&ChatId::group("g@group")));
        assert!(!list.permits(&ChatId::user("g@group")));
        assert!(!list.permits(&ChatId::group("other@group")));
    }
}
