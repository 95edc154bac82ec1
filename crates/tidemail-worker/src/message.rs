//! Action and response envelopes exchanged with a backend

use crate::criteria::{SearchCriteria, SortCriterion};
use crate::models::{DirectoryInfo, Flags, FullMessage, MessageInfo, ThreadTree};
use chrono::{DateTime, Utc};
use std::fmt;

/// Identifier shared by actions and responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Id used by replies that no posted action is waiting for
    pub const UNSOLICITED: MessageId = MessageId(0);
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Requests sent from the store to a backend
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Establish the backend connection
    Connect,
    /// Tear down the backend connection
    Disconnect,
    /// List available directories
    ListDirectories,
    /// Open a directory for subsequent message actions
    OpenDirectory { directory: String },
    /// Fetch the ordered uid list of the open directory
    FetchDirectoryContents {
        sort: Vec<SortCriterion>,
        filter: Option<SearchCriteria>,
    },
    /// Fetch the server-side thread forest of the open directory
    FetchDirectoryThreaded {
        sort: Vec<SortCriterion>,
        filter: Option<SearchCriteria>,
        thread_context: bool,
    },
    /// Create a directory
    CreateDirectory { directory: String, quiet: bool },
    /// Remove a directory
    RemoveDirectory { directory: String, quiet: bool },
    /// Fetch envelopes and flags
    FetchMessageHeaders { uids: Vec<u32> },
    /// Fetch complete raw messages
    FetchFullMessages { uids: Vec<u32> },
    /// Fetch one body part by its 1-based index path
    FetchMessageBodyPart { uid: u32, part: Vec<usize> },
    /// Refresh flags only
    FetchMessageFlags { uids: Vec<u32> },
    /// Delete messages
    DeleteMessages { uids: Vec<u32> },
    /// Copy messages to another directory
    CopyMessages { uids: Vec<u32>, destination: String },
    /// Move messages to another directory
    MoveMessages { uids: Vec<u32>, destination: String },
    /// Set or clear flags
    FlagMessages {
        uids: Vec<u32>,
        flags: Flags,
        enable: bool,
    },
    /// Set or clear the answered flag
    AnsweredMessages { uids: Vec<u32>, answered: bool },
    /// Add and remove labels
    ModifyLabels {
        uids: Vec<u32>,
        add: Vec<String>,
        remove: Vec<String>,
    },
    /// Search the open directory
    SearchDirectory { criteria: SearchCriteria },
    /// Append a raw message to a directory
    AppendMessage {
        destination: String,
        flags: Flags,
        date: DateTime<Utc>,
        content: Vec<u8>,
    },
}

/// Discriminant of an [`Action`], carried by responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Connect,
    Disconnect,
    ListDirectories,
    OpenDirectory,
    FetchDirectoryContents,
    FetchDirectoryThreaded,
    CreateDirectory,
    RemoveDirectory,
    FetchMessageHeaders,
    FetchFullMessages,
    FetchMessageBodyPart,
    FetchMessageFlags,
    DeleteMessages,
    CopyMessages,
    MoveMessages,
    FlagMessages,
    AnsweredMessages,
    ModifyLabels,
    SearchDirectory,
    AppendMessage,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Connect => ActionKind::Connect,
            Action::Disconnect => ActionKind::Disconnect,
            Action::ListDirectories => ActionKind::ListDirectories,
            Action::OpenDirectory { .. } => ActionKind::OpenDirectory,
            Action::FetchDirectoryContents { .. } => ActionKind::FetchDirectoryContents,
            Action::FetchDirectoryThreaded { .. } => ActionKind::FetchDirectoryThreaded,
            Action::CreateDirectory { .. } => ActionKind::CreateDirectory,
            Action::RemoveDirectory { .. } => ActionKind::RemoveDirectory,
            Action::FetchMessageHeaders { .. } => ActionKind::FetchMessageHeaders,
            Action::FetchFullMessages { .. } => ActionKind::FetchFullMessages,
            Action::FetchMessageBodyPart { .. } => ActionKind::FetchMessageBodyPart,
            Action::FetchMessageFlags { .. } => ActionKind::FetchMessageFlags,
            Action::DeleteMessages { .. } => ActionKind::DeleteMessages,
            Action::CopyMessages { .. } => ActionKind::CopyMessages,
            Action::MoveMessages { .. } => ActionKind::MoveMessages,
            Action::FlagMessages { .. } => ActionKind::FlagMessages,
            Action::AnsweredMessages { .. } => ActionKind::AnsweredMessages,
            Action::ModifyLabels { .. } => ActionKind::ModifyLabels,
            Action::SearchDirectory { .. } => ActionKind::SearchDirectory,
            Action::AppendMessage { .. } => ActionKind::AppendMessage,
        }
    }
}

/// Messages sent from a backend back to the store
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The action completed
    Done,
    /// The action failed
    Error(String),
    /// The backend cannot perform the action
    Unsupported,
    /// The action was abandoned
    Cancelled,
    /// One directory of a listing
    Directory(DirectoryInfo),
    /// Ordered uid list of the open directory
    DirectoryContents { uids: Vec<u32> },
    /// Server-side thread forest of the open directory
    DirectoryThreaded { threads: Vec<ThreadTree> },
    /// Partial or full metadata for one message
    MessageInfo {
        info: MessageInfo,
        needs_flags: bool,
    },
    /// Complete raw content of one message
    FullMessage(FullMessage),
    /// Content of one body part
    MessageBodyPart { uid: u32, part: Vec<u8> },
    /// Messages removed from the open directory
    MessagesDeleted { uids: Vec<u32> },
    /// Uids matching a search
    SearchResults { uids: Vec<u32> },
    /// Labels known to the backend
    LabelList { labels: Vec<String> },
}

impl Response {
    /// Terminal responses end an action's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Response::Done | Response::Error(_) | Response::Unsupported | Response::Cancelled
        )
    }

    /// Error and Unsupported both undo optimistic state
    pub fn is_failure(&self) -> bool {
        matches!(self, Response::Error(_) | Response::Unsupported)
    }
}

/// The action a response belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InResponseTo {
    pub id: MessageId,
    pub kind: ActionKind,
}

/// An action or response with its routing information
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    pub id: MessageId,
    pub in_response_to: Option<InResponseTo>,
    pub body: T,
}

impl Message<Action> {
    pub fn kind(&self) -> ActionKind {
        self.body.kind()
    }

    /// Routing information for a response to this action
    pub fn reply_ref(&self) -> InResponseTo {
        InResponseTo {
            id: self.id,
            kind: self.body.kind(),
        }
    }
}

impl Message<Response> {
    /// Id of the action this response answers
    pub fn action_id(&self) -> Option<MessageId> {
        self.in_response_to.map(|r| r.id)
    }

    /// Whether this answers an action of the given kind
    pub fn responds_to(&self, kind: ActionKind) -> bool {
        self.in_response_to.map(|r| r.kind) == Some(kind)
    }
}
