//! Message models shared by the store and the backends

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

bitflags! {
    /// Message flags as a bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Flags: u8 {
        /// Message has been read
        const SEEN = 1 << 0;
        /// Message has been answered
        const ANSWERED = 1 << 1;
        /// Message is flagged/starred
        const FLAGGED = 1 << 2;
        /// Message is marked for deletion
        const DELETED = 1 << 3;
        /// Message arrived since the last session
        const RECENT = 1 << 4;
        /// Message is a draft
        const DRAFT = 1 << 5;
    }
}

impl Flags {
    /// Parse flags from IMAP system flag names
    pub fn from_imap_flags(flags: &[&str]) -> Self {
        let mut result = Flags::empty();

        for flag in flags {
            match flag.to_lowercase().as_str() {
                "\\seen" => result |= Flags::SEEN,
                "\\answered" => result |= Flags::ANSWERED,
                "\\flagged" => result |= Flags::FLAGGED,
                "\\deleted" => result |= Flags::DELETED,
                "\\recent" => result |= Flags::RECENT,
                "\\draft" => result |= Flags::DRAFT,
                _ => {}
            }
        }

        result
    }

    /// Convert to IMAP flag strings for STORE command
    pub fn to_imap_flags(self) -> Vec<&'static str> {
        let mut flags = Vec::new();

        if self.contains(Flags::SEEN) {
            flags.push("\\Seen");
        }
        if self.contains(Flags::ANSWERED) {
            flags.push("\\Answered");
        }
        if self.contains(Flags::FLAGGED) {
            flags.push("\\Flagged");
        }
        if self.contains(Flags::DELETED) {
            flags.push("\\Deleted");
        }
        if self.contains(Flags::RECENT) {
            flags.push("\\Recent");
        }
        if self.contains(Flags::DRAFT) {
            flags.push("\\Draft");
        }

        flags
    }
}

/// Email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub address: String,
}

impl Address {
    pub fn new(name: Option<String>, address: String) -> Self {
        Self { name, address }
    }

    /// Format as "Name <address>" or just "address"
    pub fn to_display_string(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.address),
            _ => self.address.clone(),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

/// Parsed summary headers of a message
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Date header
    pub date: Option<DateTime<Utc>>,
    /// Subject line
    pub subject: String,
    /// From addresses
    pub from: Vec<Address>,
    /// Reply-To addresses
    pub reply_to: Vec<Address>,
    /// To addresses
    pub to: Vec<Address>,
    /// CC addresses
    pub cc: Vec<Address>,
    /// BCC addresses
    pub bcc: Vec<Address>,
    /// Message-ID header, without angle brackets
    pub message_id: String,
    /// In-Reply-To header, without angle brackets
    pub in_reply_to: String,
}

impl Envelope {
    /// Get the subject, with a default for empty
    pub fn subject(&self) -> &str {
        if self.subject.is_empty() {
            "(No subject)"
        } else {
            &self.subject
        }
    }

    /// Get the primary sender's display string
    pub fn from_display(&self) -> String {
        self.from
            .first()
            .map(|a| a.to_display_string())
            .unwrap_or_else(|| "(Unknown sender)".to_string())
    }
}

/// MIME structure of a message body
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BodyStructure {
    /// Primary MIME type (e.g., "text")
    pub mime_type: String,
    /// MIME subtype (e.g., "plain")
    pub mime_subtype: String,
    /// Content-Type parameters
    pub params: HashMap<String, String>,
    /// Content-Transfer-Encoding
    pub encoding: Option<String>,
    /// Content-Disposition (e.g., "attachment")
    pub disposition: Option<String>,
    /// Child parts of a multipart body
    pub parts: Vec<BodyStructure>,
}

impl BodyStructure {
    /// Full MIME type as "type/subtype"
    pub fn full_mime_type(&self) -> String {
        format!("{}/{}", self.mime_type, self.mime_subtype)
    }

    /// Walk to a nested part by its 1-based index path
    pub fn part_at(&self, path: &[usize]) -> Option<&BodyStructure> {
        let mut current = self;
        for index in path {
            current = current.parts.get(index.checked_sub(1)?)?;
        }
        Some(current)
    }

    /// Check whether any part is an attachment
    pub fn has_attachments(&self) -> bool {
        self.disposition.as_deref() == Some("attachment")
            || self.parts.iter().any(|p| p.has_attachments())
    }
}

/// One cached message; fields fill in as responses arrive
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageInfo {
    /// Backend-assigned stable identifier
    pub uid: u32,
    /// Envelope data, absent until headers are fetched
    pub envelope: Option<Envelope>,
    /// Message flags
    pub flags: Flags,
    /// Backend labels (e.g., Gmail labels, notmuch tags)
    pub labels: Vec<String>,
    /// Size in bytes
    pub size: u32,
    /// Date the backend received the message
    pub internal_date: Option<DateTime<Utc>>,
    /// Body structure, absent until fetched
    pub body_structure: Option<BodyStructure>,
    /// References header, oldest first, without angle brackets
    pub references: Vec<String>,
}

impl MessageInfo {
    /// Create an empty record for a uid
    pub fn new(uid: u32) -> Self {
        Self {
            uid,
            ..Default::default()
        }
    }

    /// Merge a newer record into this one.
    ///
    /// Populated fields are never replaced by empty ones. Flags and labels
    /// always take the newer value.
    pub fn merge(&mut self, from: &MessageInfo) {
        if from.body_structure.is_some() {
            self.body_structure = from.body_structure.clone();
        }
        if from.envelope.is_some() {
            self.envelope = from.envelope.clone();
        }
        self.flags = from.flags;
        self.labels = from.labels.clone();
        if from.size != 0 {
            self.size = from.size;
        }
        if from.internal_date.is_some() {
            self.internal_date = from.internal_date;
        }
        if !from.references.is_empty() {
            self.references = from.references.clone();
        }
    }

    /// Message-ID from the envelope, if known
    pub fn message_id(&self) -> Option<&str> {
        self.envelope
            .as_ref()
            .map(|e| e.message_id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Parent message ids, oldest first: References, then In-Reply-To
    /// when it is not already the last reference
    pub fn parent_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .references
            .iter()
            .map(String::as_str)
            .filter(|id| !id.is_empty())
            .collect();
        if let Some(irt) = self
            .envelope
            .as_ref()
            .map(|e| e.in_reply_to.as_str())
            .filter(|id| !id.is_empty())
        {
            if ids.last() != Some(&irt) {
                ids.push(irt);
            }
        }
        ids
    }

    /// Check if message is read
    pub fn is_read(&self) -> bool {
        self.flags.contains(Flags::SEEN)
    }
}

/// Full raw content of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullMessage {
    pub uid: u32,
    pub content: Vec<u8>,
}

/// Metadata about a directory
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectoryInfo {
    pub name: String,
    pub exists: u32,
    pub recent: u32,
    pub unseen: u32,
}

/// What a backend can do natively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Server-side threading
    pub thread: bool,
    /// Server-side sorting
    pub sort: bool,
}

/// Reply tree as sent by a backend with native threading
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThreadTree {
    pub uid: u32,
    pub children: Vec<ThreadTree>,
}

impl ThreadTree {
    pub fn leaf(uid: u32) -> Self {
        Self {
            uid,
            children: Vec::new(),
        }
    }

    pub fn with_children(uid: u32, children: Vec<ThreadTree>) -> Self {
        Self { uid, children }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(subject: &str) -> Envelope {
        Envelope {
            subject: subject.to_string(),
            message_id: format!("{}@example.com", subject),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_keeps_populated_fields() {
        let mut existing = MessageInfo {
            uid: 7,
            envelope: Some(envelope("hello")),
            size: 1024,
            internal_date: Some(Utc::now()),
            body_structure: Some(BodyStructure {
                mime_type: "text".into(),
                mime_subtype: "plain".into(),
                ..Default::default()
            }),
            references: vec!["root@example.com".into()],
            flags: Flags::SEEN,
            labels: vec!["inbox".into()],
        };
        let before = existing.clone();

        // A flags-only update carries nothing else
        let update = MessageInfo {
            uid: 7,
            flags: Flags::SEEN | Flags::FLAGGED,
            ..Default::default()
        };
        existing.merge(&update);

        assert_eq!(existing.envelope, before.envelope);
        assert_eq!(existing.size, 1024);
        assert_eq!(existing.internal_date, before.internal_date);
        assert_eq!(existing.body_structure, before.body_structure);
        assert_eq!(existing.references, before.references);
        assert_eq!(existing.flags, Flags::SEEN | Flags::FLAGGED);
        assert!(existing.labels.is_empty());
    }

    #[test]
    fn test_merge_fills_missing_fields() {
        let mut partial = MessageInfo::new(3);
        let full = MessageInfo {
            uid: 3,
            envelope: Some(envelope("full")),
            size: 42,
            ..Default::default()
        };
        partial.merge(&full);
        assert_eq!(partial.envelope.as_ref().unwrap().subject, "full");
        assert_eq!(partial.size, 42);
    }

    #[test]
    fn test_parent_ids() {
        let mut info = MessageInfo::new(1);
        info.references = vec!["a@x".into(), "b@x".into()];
        info.envelope = Some(Envelope {
            in_reply_to: "b@x".into(),
            ..Default::default()
        });
        assert_eq!(info.parent_ids(), vec!["a@x", "b@x"]);

        info.envelope.as_mut().unwrap().in_reply_to = "c@x".into();
        assert_eq!(info.parent_ids(), vec!["a@x", "b@x", "c@x"]);
    }

    #[test]
    fn test_imap_flags() {
        let flags = Flags::from_imap_flags(&["\\Seen", "\\FLAGGED", "$Junk"]);
        assert_eq!(flags, Flags::SEEN | Flags::FLAGGED);
        assert_eq!(flags.to_imap_flags(), vec!["\\Seen", "\\Flagged"]);
    }

    #[test]
    fn test_body_part_lookup() {
        let body = BodyStructure {
            mime_type: "multipart".into(),
            mime_subtype: "mixed".into(),
            parts: vec![
                BodyStructure {
                    mime_type: "text".into(),
                    mime_subtype: "plain".into(),
                    ..Default::default()
                },
                BodyStructure {
                    mime_type: "application".into(),
                    mime_subtype: "pdf".into(),
                    disposition: Some("attachment".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(body.part_at(&[2]).unwrap().full_mime_type(), "application/pdf");
        assert!(body.part_at(&[3]).is_none());
        assert!(body.part_at(&[0]).is_none());
        assert!(body.has_attachments());
    }
}
