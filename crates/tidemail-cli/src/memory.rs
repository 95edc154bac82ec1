//! In-memory mailbox backend

use crate::mbox::MboxMessage;
use async_trait::async_trait;
use mail_parser::{MessageParser, PartType};
use tidemail_core::{parse_message_info, sort_messages};
use tidemail_worker::{
    Action, Backend, Capabilities, DirectoryInfo, Flags, FullMessage, Message, MessageInfo,
    MessagePoster, Response, SearchCriteria, WorkerError, WorkerInteractor, WorkerResult,
};
use tracing::{debug, warn};

struct Stored {
    info: MessageInfo,
    raw: Vec<u8>,
}

/// A single folder held in memory.
///
/// Sorting, filtering and search run locally; threads are left to the store.
pub struct MemoryBackend {
    directory: String,
    messages: Vec<Stored>,
    next_uid: u32,
    open: bool,
}

impl MemoryBackend {
    /// Load messages into a folder named `directory`, numbering uids from 1
    pub fn new(directory: &str, messages: Vec<MboxMessage>) -> Self {
        let mut backend = Self {
            directory: directory.to_string(),
            messages: Vec::with_capacity(messages.len()),
            next_uid: 1,
            open: false,
        };
        for message in messages {
            if let Err(e) = backend.append(message.raw, Flags::empty(), message.received) {
                warn!("Skipping message: {}", e);
            }
        }
        backend
    }

    fn append(
        &mut self,
        raw: Vec<u8>,
        flags: Flags,
        received: Option<chrono::DateTime<chrono::Utc>>,
    ) -> WorkerResult<u32> {
        let uid = self.next_uid;
        let mut info = parse_message_info(uid, &raw).map_err(|e| WorkerError::Backend(e.to_string()))?;
        info.flags = flags;
        info.internal_date = received.or_else(|| info.envelope.as_ref().and_then(|e| e.date));
        self.messages.push(Stored { info, raw });
        self.next_uid += 1;
        Ok(uid)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn find(&self, uid: u32) -> Option<&Stored> {
        self.messages.iter().find(|m| m.info.uid == uid)
    }

    fn require_open(&self) -> WorkerResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(WorkerError::InvalidAction("no directory open".to_string()))
        }
    }

    fn matching(&self, criteria: Option<&SearchCriteria>) -> Vec<&Stored> {
        self.messages
            .iter()
            .filter(|m| criteria.map_or(true, |c| matches(c, m)))
            .collect()
    }

    /// Apply `change` to each known uid and report the new state
    fn update<F>(&mut self, action: &Message<Action>, poster: &MessagePoster, uids: &[u32], change: F)
    where
        F: Fn(&mut MessageInfo),
    {
        for stored in self.messages.iter_mut().filter(|m| uids.contains(&m.info.uid)) {
            change(&mut stored.info);
            poster.respond(
                action,
                Response::MessageInfo {
                    info: stored.info.clone(),
                    needs_flags: false,
                },
            );
        }
    }
}

/// Local search: terms match the subject, or the raw message for body and
/// full-text searches
fn matches(criteria: &SearchCriteria, stored: &Stored) -> bool {
    if !criteria.search_body && !criteria.search_all {
        return criteria.matches(&stored.info);
    }
    let headers_only = SearchCriteria {
        terms: Vec::new(),
        ..criteria.clone()
    };
    let text = String::from_utf8_lossy(&stored.raw).to_lowercase();
    headers_only.matches(&stored.info)
        && criteria
            .terms
            .iter()
            .all(|t| text.contains(&t.to_lowercase()))
}

/// Decoded content of the part at a 1-based index path
fn body_part(raw: &[u8], path: &[usize]) -> Option<Vec<u8>> {
    let message = MessageParser::default().parse(raw)?;
    let mut part = message.parts.first()?;
    for &index in path {
        let PartType::Multipart(children) = &part.body else {
            return None;
        };
        let id = *children.get(index.checked_sub(1)?)?;
        part = message.part(id)?;
    }
    Some(part.contents().to_vec())
}

#[async_trait]
impl Backend for MemoryBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            thread: false,
            sort: true,
        }
    }

    async fn handle(&mut self, action: &Message<Action>, poster: &MessagePoster) -> WorkerResult<()> {
        match &action.body {
            Action::Connect | Action::Disconnect => Ok(()),
            Action::ListDirectories => {
                let unseen = self
                    .messages
                    .iter()
                    .filter(|m| !m.info.flags.contains(Flags::SEEN))
                    .count();
                poster.respond(
                    action,
                    Response::Directory(DirectoryInfo {
                        name: self.directory.clone(),
                        exists: self.messages.len() as u32,
                        recent: 0,
                        unseen: unseen as u32,
                    }),
                );
                Ok(())
            }
            Action::OpenDirectory { directory } => {
                if *directory != self.directory {
                    return Err(WorkerError::Backend(format!("no such directory: {}", directory)));
                }
                self.open = true;
                Ok(())
            }
            Action::FetchDirectoryContents { sort, filter } => {
                self.require_open()?;
                let mut infos: Vec<MessageInfo> = self
                    .matching(filter.as_ref())
                    .into_iter()
                    .map(|m| m.info.clone())
                    .collect();
                sort_messages(&mut infos, sort);
                debug!("Listing {} of {} messages", infos.len(), self.messages.len());
                poster.respond(
                    action,
                    Response::DirectoryContents {
                        uids: infos.iter().map(|m| m.uid).collect(),
                    },
                );
                Ok(())
            }
            Action::FetchMessageHeaders { uids } | Action::FetchMessageFlags { uids } => {
                self.require_open()?;
                for uid in uids {
                    if let Some(stored) = self.find(*uid) {
                        poster.respond(
                            action,
                            Response::MessageInfo {
                                info: stored.info.clone(),
                                needs_flags: false,
                            },
                        );
                    }
                }
                Ok(())
            }
            Action::FetchFullMessages { uids } => {
                self.require_open()?;
                for uid in uids {
                    if let Some(stored) = self.find(*uid) {
                        poster.respond(
                            action,
                            Response::FullMessage(FullMessage {
                                uid: *uid,
                                content: stored.raw.clone(),
                            }),
                        );
                    }
                }
                Ok(())
            }
            Action::FetchMessageBodyPart { uid, part } => {
                let stored = self
                    .find(*uid)
                    .ok_or_else(|| WorkerError::Backend(format!("no message with uid {}", uid)))?;
                let content = body_part(&stored.raw, part)
                    .ok_or_else(|| WorkerError::Backend(format!("uid {}: no part {:?}", uid, part)))?;
                poster.respond(action, Response::MessageBodyPart { uid: *uid, part: content });
                Ok(())
            }
            Action::DeleteMessages { uids } => {
                self.require_open()?;
                let before = self.messages.len();
                self.messages.retain(|m| !uids.contains(&m.info.uid));
                debug!("Deleted {} messages", before - self.messages.len());
                poster.respond(action, Response::MessagesDeleted { uids: uids.clone() });
                Ok(())
            }
            Action::FlagMessages { uids, flags, enable } => {
                self.update(action, poster, uids, |info| info.flags.set(*flags, *enable));
                Ok(())
            }
            Action::AnsweredMessages { uids, answered } => {
                self.update(action, poster, uids, |info| info.flags.set(Flags::ANSWERED, *answered));
                Ok(())
            }
            Action::ModifyLabels { uids, add, remove } => {
                self.update(action, poster, uids, |info| {
                    info.labels.retain(|l| !remove.contains(l));
                    for label in add {
                        if !info.labels.contains(label) {
                            info.labels.push(label.clone());
                        }
                    }
                });
                Ok(())
            }
            Action::SearchDirectory { criteria } => {
                self.require_open()?;
                let uids = self
                    .matching(Some(criteria))
                    .into_iter()
                    .map(|m| m.info.uid)
                    .collect();
                poster.respond(action, Response::SearchResults { uids });
                Ok(())
            }
            Action::AppendMessage {
                destination,
                flags,
                date,
                content,
            } => {
                if *destination != self.directory {
                    return Err(WorkerError::Backend(format!("no such directory: {}", destination)));
                }
                let uid = self.append(content.clone(), *flags, Some(*date))?;
                debug!(uid, "Appended message");
                Ok(())
            }
            Action::FetchDirectoryThreaded { .. }
            | Action::CreateDirectory { .. }
            | Action::RemoveDirectory { .. }
            | Action::CopyMessages { .. }
            | Action::MoveMessages { .. } => Err(WorkerError::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemail_worker::{channel, MessageId, SortCriterion, SortField};

    fn mbox_message(subject: &str, date: &str, body: &str) -> MboxMessage {
        let raw = format!(
            "From: sender@example.com\r\nSubject: {}\r\nDate: {}\r\nMessage-ID: <{}@example.com>\r\n\r\n{}\r\n",
            subject,
            date,
            subject.replace(' ', "-"),
            body
        );
        MboxMessage {
            received: None,
            raw: raw.into_bytes(),
        }
    }

    fn backend() -> MemoryBackend {
        MemoryBackend::new(
            "INBOX",
            vec![
                mbox_message("lunch plans", "Wed, 6 Mar 2024 12:00:00 +0000", "pizza?"),
                mbox_message("weekly report", "Mon, 4 Mar 2024 09:00:00 +0000", "numbers attached"),
                mbox_message("more lunch", "Tue, 5 Mar 2024 12:00:00 +0000", "sushi instead"),
            ],
        )
    }

    fn action(body: Action) -> Message<Action> {
        Message {
            id: MessageId(1),
            in_response_to: None,
            body,
        }
    }

    /// Run one action and collect everything it posted
    async fn run(backend: &mut MemoryBackend, body: Action) -> (WorkerResult<()>, Vec<Response>) {
        let (_worker, mut rx, endpoint) = channel::<()>(backend.capabilities());
        let result = backend.handle(&action(body), &endpoint.poster()).await;
        let mut responses = Vec::new();
        while let Ok(message) = rx.try_recv() {
            responses.push(message.body);
        }
        (result, responses)
    }

    #[tokio::test]
    async fn test_listing_needs_open_directory() {
        let mut backend = backend();
        let contents = Action::FetchDirectoryContents {
            sort: Vec::new(),
            filter: None,
        };
        let (result, _) = run(&mut backend, contents.clone()).await;
        assert!(matches!(result, Err(WorkerError::InvalidAction(_))));

        let (result, _) = run(&mut backend, Action::OpenDirectory { directory: "Archive".into() }).await;
        assert!(result.is_err());
        run(&mut backend, Action::OpenDirectory { directory: "INBOX".into() }).await.0.unwrap();

        let (_, responses) = run(&mut backend, contents).await;
        assert_eq!(responses, vec![Response::DirectoryContents { uids: vec![1, 2, 3] }]);
    }

    #[tokio::test]
    async fn test_sorted_and_filtered_listing() {
        let mut backend = backend();
        backend.open = true;

        let (_, responses) = run(
            &mut backend,
            Action::FetchDirectoryContents {
                sort: vec![SortCriterion::new(SortField::Date)],
                filter: None,
            },
        )
        .await;
        assert_eq!(responses, vec![Response::DirectoryContents { uids: vec![2, 3, 1] }]);

        let (_, responses) = run(
            &mut backend,
            Action::FetchDirectoryContents {
                sort: vec![SortCriterion::reversed(SortField::Date)],
                filter: Some(SearchCriteria::terms(["lunch"])),
            },
        )
        .await;
        assert_eq!(responses, vec![Response::DirectoryContents { uids: vec![1, 3] }]);
    }

    #[tokio::test]
    async fn test_body_search() {
        let mut backend = backend();
        backend.open = true;
        let criteria = SearchCriteria {
            search_body: true,
            ..SearchCriteria::terms(["sushi"])
        };
        let (_, responses) = run(&mut backend, Action::SearchDirectory { criteria }).await;
        assert_eq!(responses, vec![Response::SearchResults { uids: vec![3] }]);
    }

    #[tokio::test]
    async fn test_flags_and_delete() {
        let mut backend = backend();
        backend.open = true;

        let (_, responses) = run(
            &mut backend,
            Action::FlagMessages {
                uids: vec![2],
                flags: Flags::SEEN,
                enable: true,
            },
        )
        .await;
        assert!(matches!(
            &responses[..],
            [Response::MessageInfo { info, .. }] if info.uid == 2 && info.flags.contains(Flags::SEEN)
        ));

        let (_, responses) = run(&mut backend, Action::DeleteMessages { uids: vec![2] }).await;
        assert_eq!(responses, vec![Response::MessagesDeleted { uids: vec![2] }]);
        assert_eq!(backend.len(), 2);
        assert!(backend.find(2).is_none());
    }

    #[tokio::test]
    async fn test_unsupported_actions() {
        let mut backend = backend();
        let (result, _) = run(
            &mut backend,
            Action::MoveMessages {
                uids: vec![1],
                destination: "Archive".into(),
            },
        )
        .await;
        assert!(matches!(result, Err(WorkerError::Unsupported)));
    }

    #[test]
    fn test_body_part_path() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nfirst\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nsecond\r\n--b--\r\n";
        assert_eq!(body_part(raw, &[2]).as_deref(), Some(&b"second"[..]));
        assert_eq!(body_part(raw, &[3]), None);
        assert_eq!(body_part(raw, &[0]), None);
    }
}
