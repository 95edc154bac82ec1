//! Mbox file loading

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mail_parser::mailbox::mbox::MessageIterator;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

/// One message of an mbox file
#[derive(Debug, Clone)]
pub struct MboxMessage {
    /// Date from the `From ` separator line
    pub received: Option<DateTime<Utc>>,
    pub raw: Vec<u8>,
}

/// Read every message of the mbox at `path`
pub fn read_mbox(path: &Path) -> Result<Vec<MboxMessage>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let messages = parse_mbox(BufReader::new(file));
    debug!("Read {} messages from {}", messages.len(), path.display());
    Ok(messages)
}

/// Split mbox data into messages, skipping unreadable entries
pub fn parse_mbox<R: BufRead>(reader: R) -> Vec<MboxMessage> {
    let mut messages = Vec::new();
    for (i, entry) in MessageIterator::new(reader).enumerate() {
        match entry {
            Ok(message) => messages.push(MboxMessage {
                received: DateTime::from_timestamp(message.internal_date() as i64, 0)
                    .filter(|d| d.timestamp() != 0),
                raw: message.contents().to_vec(),
            }),
            Err(_) => warn!("Skipping unreadable mbox entry {}", i),
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    const MBOX: &str = "From alice@example.com Tue Mar  5 10:30:00 2024\n\
From: alice@example.com\n\
Subject: first\n\
\n\
hello\n\
\n\
From bob@example.com Wed Mar  6 08:00:00 2024\n\
From: bob@example.com\n\
Subject: second\n\
\n\
>From the archive\n";

    #[test]
    fn test_parse_mbox() {
        let messages = parse_mbox(MBOX.as_bytes());
        assert_eq!(messages.len(), 2);
        let first = String::from_utf8_lossy(&messages[0].raw);
        assert!(first.contains("Subject: first"));
        let second = String::from_utf8_lossy(&messages[1].raw);
        assert!(second.contains("Subject: second"));
    }
}
