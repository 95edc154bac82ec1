//! Per-folder message store
//!
//! The store is the single owner of a folder's view state. It posts actions
//! through its [`Worker`] and folds every response into its cache in
//! [`MessageStore::process_message`]. Only the debounce timers run outside
//! of that path, and they touch nothing but the flags buffer and the
//! thread state, each behind its own lock.

use crate::config::StoreConfig;
use crate::iterator::{fix_bounds, move_index, wrap_bounds, IterFactory};
use crate::marker::Marker;
use crate::sort::sort_by_order;
use crate::thread::{ThreadBuilder, ThreadForest, ThreadNode};
use crate::{CoreError, CoreResult};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tidemail_worker::{
    Action, ActionKind, Callback, Capabilities, Flags, FullMessage, Message, MessageId,
    MessageInfo, Response, SearchCriteria, SortCriterion, Worker, WorkerContext,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives the body of one fully fetched message
pub type BodyCallback = Rc<dyn Fn(&FullMessage)>;

/// Receives filtered search results
pub type SearchCallback = Box<dyn FnOnce(&mut MessageStore, Vec<u32>)>;

/// Receives the content of one body part
pub type BodyPartCallback = Box<dyn FnOnce(&mut MessageStore, Vec<u8>)>;

/// Notification hooks for the UI layer.
///
/// Hooks run synchronously while a response is folded and must not block.
#[derive(Default)]
pub struct StoreHooks {
    on_update: Option<Box<dyn Fn(&MessageStore)>>,
    on_filter_change: Option<Box<dyn Fn(&MessageStore)>>,
    on_update_dirs: Option<Box<dyn Fn()>>,
    on_select: Option<Box<dyn Fn(Option<&MessageInfo>)>>,
    new_email: Option<Box<dyn Fn(&MessageInfo)>>,
    directory_change: Option<Box<dyn Fn()>>,
}

/// Thread view settings that rebuilds run with
#[derive(Debug, Clone, Copy)]
struct ThreadParams {
    reverse: bool,
    sort_siblings: bool,
    factory: IterFactory,
}

/// Threaded view state shared with the rebuild timer
#[derive(Debug, Default)]
struct ThreadState {
    builder: ThreadBuilder,
    forest: ThreadForest,
    built: bool,
    /// Flattened display list
    uids: Vec<u32>,
    /// Cursor index to restore once a pending rebuild lands
    reselect: Option<usize>,
    /// A debounced rebuild has not run yet
    scheduled: bool,
    rebuilds: u64,
}

impl ThreadState {
    fn rebuild(&mut self, uids: &[u32], params: ThreadParams) {
        self.forest = self.builder.threads(uids, params.sort_siblings);
        self.built = true;
        self.scheduled = false;
        self.rebuilds += 1;
        self.flatten(params);
    }

    fn replace(&mut self, mut forest: ThreadForest, params: ThreadParams) {
        self.builder.apply_folds(&mut forest);
        self.forest = forest;
        self.built = true;
        self.flatten(params);
    }

    fn flatten(&mut self, params: ThreadParams) {
        self.uids = self.forest.flatten(params.reverse, params.factory);
    }

    fn fold(&mut self, uid: u32, folded: bool, params: ThreadParams) -> CoreResult<()> {
        if !self.built {
            return Err(CoreError::ThreadsUnavailable);
        }
        self.forest.set_descendants_hidden(uid, folded)?;
        self.builder.set_folded(uid, folded, &self.forest);
        self.flatten(params);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A message removed by a deletion, kept until the action ends.
///
/// `index` is the position in the uid list as it stood before the
/// `MessagesDeleted` batch that removed it.
#[derive(Debug)]
struct Removed {
    index: usize,
    uid: u32,
    info: Option<MessageInfo>,
    was_result: bool,
}

/// Optimistic change to undo if its action fails
#[derive(Debug)]
enum Rollback {
    /// `removed` holds one journal entry per `MessagesDeleted` batch
    Removal { marked: Vec<u32>, removed: Vec<Vec<Removed>> },
    Metadata(Vec<(u32, Flags, Vec<String>)>),
}

/// A caller waiting on header fetches it may not have posted itself
struct HeaderWaiter {
    actions: HashSet<MessageId>,
    uids: HashSet<u32>,
    outcome: Option<Message<Response>>,
    callback: Callback<MessageStore>,
}

/// Cached view of one open folder
pub struct MessageStore {
    worker: Worker<MessageStore>,

    /// Ordered known uids, in backend order
    uids: Vec<u32>,
    /// Every uid of `uids`; `None` until its headers arrive
    messages: HashMap<u32, Option<MessageInfo>>,
    deleted: HashSet<u32>,
    sorting: bool,

    scroll_offset: usize,
    scroll_len: usize,

    selected: Option<u32>,
    marker: Marker,

    results: Vec<u32>,
    result_index: Option<usize>,
    filter: Option<SearchCriteria>,

    sort_criteria: Vec<SortCriterion>,
    sort_default: Vec<SortCriterion>,

    threaded_view: bool,
    reverse_thread_order: bool,
    thread_context: bool,
    sort_thread_siblings: bool,
    build_threads: bool,
    threads: Arc<Mutex<ThreadState>>,
    thread_delay: Duration,
    thread_debounce: Option<JoinHandle<()>>,
    rebuild_tx: mpsc::UnboundedSender<()>,
    rebuild_rx: Option<mpsc::UnboundedReceiver<()>>,

    pending_headers: HashMap<u32, MessageId>,
    header_waiters: Vec<HeaderWaiter>,
    pending_bodies: HashMap<u32, MessageId>,
    body_callbacks: HashMap<u32, Vec<BodyCallback>>,
    rollbacks: HashMap<MessageId, Rollback>,

    needs_flags: Arc<Mutex<Vec<u32>>>,
    flags_delay: Duration,
    flags_debounce: Option<JoinHandle<()>>,

    iter_factory: IterFactory,
    hooks: StoreHooks,
}

impl WorkerContext for MessageStore {
    fn worker_mut(&mut self) -> &mut Worker<Self> {
        &mut self.worker
    }
}

impl MessageStore {
    /// Create a store over a connected worker.
    ///
    /// A backend without native threading forces client-side threads.
    pub fn new(worker: Worker<MessageStore>, config: &StoreConfig) -> CoreResult<Self> {
        let sort_default = config.default_sort_criteria()?;
        let build_threads = config.client_threads || !worker.capabilities().thread;
        let (rebuild_tx, rebuild_rx) = mpsc::unbounded_channel();

        Ok(Self {
            worker,
            uids: Vec::new(),
            messages: HashMap::new(),
            deleted: HashSet::new(),
            sorting: false,
            scroll_offset: 0,
            scroll_len: config.scroll_len,
            selected: None,
            marker: Marker::new(),
            results: Vec::new(),
            result_index: None,
            filter: None,
            sort_criteria: sort_default.clone(),
            sort_default,
            threaded_view: config.threaded,
            reverse_thread_order: config.reverse_thread_order,
            thread_context: config.thread_context,
            sort_thread_siblings: config.sort_thread_siblings,
            build_threads,
            threads: Arc::new(Mutex::new(ThreadState::default())),
            thread_delay: config.client_threads_delay(),
            thread_debounce: None,
            rebuild_tx,
            rebuild_rx: Some(rebuild_rx),
            pending_headers: HashMap::new(),
            header_waiters: Vec::new(),
            pending_bodies: HashMap::new(),
            body_callbacks: HashMap::new(),
            rollbacks: HashMap::new(),
            needs_flags: Arc::new(Mutex::new(Vec::new())),
            flags_delay: config.flags_delay(),
            flags_debounce: None,
            iter_factory: IterFactory::new(config.reverse_order),
            hooks: StoreHooks::default(),
        })
    }

    /// Receiver that fires once per debounced thread rebuild.
    ///
    /// The owner calls [`MessageStore::threads_rebuilt`] for each event.
    pub fn take_rebuild_events(&mut self) -> Option<mpsc::UnboundedReceiver<()>> {
        self.rebuild_rx.take()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.worker.capabilities()
    }

    pub fn worker(&self) -> &Worker<MessageStore> {
        &self.worker
    }

    pub fn worker_mut(&mut self) -> &mut Worker<MessageStore> {
        &mut self.worker
    }

    // Hooks

    pub fn on_update(&mut self, f: impl Fn(&MessageStore) + 'static) {
        self.hooks.on_update = Some(Box::new(f));
    }

    pub fn on_filter_change(&mut self, f: impl Fn(&MessageStore) + 'static) {
        self.hooks.on_filter_change = Some(Box::new(f));
    }

    pub fn on_update_dirs(&mut self, f: impl Fn() + 'static) {
        self.hooks.on_update_dirs = Some(Box::new(f));
    }

    pub fn on_select(&mut self, f: impl Fn(Option<&MessageInfo>) + 'static) {
        self.hooks.on_select = Some(Box::new(f));
    }

    /// Called for unseen recent messages as their headers arrive
    pub fn on_new_email(&mut self, f: impl Fn(&MessageInfo) + 'static) {
        self.hooks.new_email = Some(Box::new(f));
    }

    /// Called when a refresh lists messages not seen before
    pub fn on_directory_change(&mut self, f: impl Fn() + 'static) {
        self.hooks.directory_change = Some(Box::new(f));
    }

    // Message loop

    /// Fold a response into the store, then hand it to the callback of the
    /// action it answers
    pub fn process_message(&mut self, message: &Message<Response>) {
        self.update(message);
        Worker::process_message(self, message);
    }

    /// Apply one inbound response to the cached state
    pub fn update(&mut self, message: &Message<Response>) {
        let mut new_uids: Vec<u32> = Vec::new();
        let mut update = false;
        let mut update_threads = false;

        match &message.body {
            Response::Done if message.responds_to(ActionKind::OpenDirectory) => {
                self.sort(self.sort_criteria.clone(), None);
                update = true;
            }
            Response::DirectoryContents { uids } => {
                new_uids = self.replace_uids(uids.clone());
                if self.threaded_view {
                    self.run_thread_builder_now();
                }
                update = true;
            }
            Response::DirectoryThreaded { threads } => {
                let params = self.thread_params();
                let all = {
                    let mut state = lock(&self.threads);
                    state.replace(ThreadForest::from_trees(threads), params);
                    state.forest.all_uids(params.reverse, params.factory)
                };
                new_uids = self.replace_uids(all);
                update = true;
            }
            Response::MessageInfo { info, needs_flags } => {
                self.fold_message_info(info, *needs_flags);
                update = true;
                update_threads = true;
            }
            Response::FullMessage(full) => {
                if self.pending_bodies.remove(&full.uid).is_some() {
                    if let Some(callbacks) = self.body_callbacks.remove(&full.uid) {
                        for cb in callbacks {
                            cb(full);
                        }
                    }
                }
            }
            Response::MessagesDeleted { uids } => {
                if self.uids.len() < uids.len() {
                    debug!("Ignoring deletion of {} uids from {} known", uids.len(), self.uids.len());
                } else {
                    self.remove_uids(uids, message.action_id());
                    update_threads = true;
                }
                update = true;
            }
            _ => {}
        }

        if update {
            self.changed(update_threads);
        }

        if !new_uids.is_empty() {
            self.fetch_headers(&new_uids, None);
            if let Some(hook) = &self.hooks.directory_change {
                hook();
            }
        }
    }

    /// Replace the uid list, keeping cached entries. Returns the new uids
    /// that fall inside the visible window.
    fn replace_uids(&mut self, uids: Vec<u32>) -> Vec<u32> {
        let visible = self
            .iter_factory
            .visible_range(uids.len(), self.scroll_offset, self.scroll_len);
        let mut messages = HashMap::with_capacity(uids.len());
        let mut new_uids = Vec::new();
        for (i, &uid) in uids.iter().enumerate() {
            match self.messages.remove(&uid) {
                Some(info) => {
                    messages.insert(uid, info);
                }
                None => {
                    if messages.insert(uid, None).is_none() && visible.contains(&i) {
                        new_uids.push(uid);
                    }
                }
            }
        }
        self.messages = messages;
        self.uids = uids;
        new_uids
    }

    fn fold_message_info(&mut self, info: &MessageInfo, needs_flags: bool) {
        let uid = info.uid;
        let mut arrived = false;
        match self.messages.get_mut(&uid) {
            Some(Some(existing)) => existing.merge(info),
            Some(slot) if info.envelope.is_some() => {
                *slot = Some(info.clone());
                arrived = true;
            }
            Some(_) => {}
            // Unlisted uids are not cached; the next refresh decides
            None => debug!(uid, "Info for unlisted message"),
        }
        if arrived && self.selected == Some(uid) {
            self.notify_select();
        }

        if needs_flags {
            lock(&self.needs_flags).push(uid);
            self.fetch_flags();
        }

        if !info.flags.contains(Flags::SEEN) && info.flags.contains(Flags::RECENT) && info.envelope.is_some() {
            if let Some(hook) = &self.hooks.new_email {
                hook(info);
            }
        }

        let merged = self.messages.get(&uid).and_then(Option::as_ref).unwrap_or(info);
        lock(&self.threads).builder.update(merged);
    }

    /// Drop confirmed deletions from every view of the folder
    fn remove_uids(&mut self, uids: &[u32], action: Option<MessageId>) {
        let to_delete: HashSet<u32> = uids.iter().copied().collect();

        let mut removed: Vec<Removed> = self
            .uids
            .iter()
            .enumerate()
            .filter(|(_, uid)| to_delete.contains(uid))
            .map(|(index, &uid)| Removed {
                index,
                uid,
                info: None,
                was_result: false,
            })
            .collect();
        for entry in &mut removed {
            entry.info = self.messages.remove(&entry.uid).flatten();
            entry.was_result = self.results.contains(&entry.uid);
        }
        for uid in &to_delete {
            self.messages.remove(uid);
            self.deleted.remove(uid);
        }

        self.uids.retain(|uid| !to_delete.contains(uid));
        self.results.retain(|uid| !to_delete.contains(uid));
        self.result_index = match self.result_index {
            Some(_) if self.results.is_empty() => None,
            Some(i) => Some(i.min(self.results.len() - 1)),
            None => None,
        };
        self.marker.prune(uids);

        let params = self.thread_params();
        {
            let mut state = lock(&self.threads);
            for &uid in &to_delete {
                state.forest.set_deleted(uid, true);
            }
            state.flatten(params);
        }

        if let Some(Rollback::Removal { removed: journal, .. }) =
            action.and_then(|id| self.rollbacks.get_mut(&id))
        {
            journal.push(removed);
        }

        if self.uids.is_empty() {
            self.clear_selection();
        }
    }

    fn changed(&mut self, threads: bool) {
        if let Some(hook) = &self.hooks.on_update {
            hook(self);
        }
        if let Some(hook) = &self.hooks.on_update_dirs {
            hook();
        }
        if self.threaded_view && threads {
            if self.build_threads {
                self.run_thread_builder();
            } else {
                let params = self.thread_params();
                lock(&self.threads).flatten(params);
            }
        }
    }

    // Fetching

    /// Visible window of the listing, in display rows
    pub fn update_scroll(&mut self, offset: usize, len: usize) {
        self.scroll_offset = offset;
        self.scroll_len = len;
    }

    /// Fetch headers for `uids`.
    ///
    /// Uids with a fetch already in flight are not requested again. `cb`
    /// sees the info of each requested uid and one final terminal response
    /// once every fetch covering them has ended.
    pub fn fetch_headers(&mut self, uids: &[u32], cb: Option<Callback<Self>>) {
        let mut covering: HashSet<MessageId> = HashSet::new();
        let mut to_fetch: Vec<u32> = Vec::new();
        let mut seen: HashSet<u32> = HashSet::new();
        for &uid in uids {
            if !seen.insert(uid) {
                continue;
            }
            match self.pending_headers.get(&uid) {
                Some(&id) => {
                    covering.insert(id);
                }
                None => to_fetch.push(uid),
            }
        }

        if !to_fetch.is_empty() {
            let id = self.worker.post_action(
                Action::FetchMessageHeaders {
                    uids: to_fetch.clone(),
                },
                Some(Box::new(Self::headers_response)),
            );
            for uid in to_fetch {
                self.pending_headers.insert(uid, id);
            }
            covering.insert(id);
        }

        let Some(mut cb) = cb else {
            return;
        };
        if covering.is_empty() {
            let done = Message {
                id: MessageId::UNSOLICITED,
                in_response_to: None,
                body: Response::Done,
            };
            cb(self, &done);
            return;
        }
        self.header_waiters.push(HeaderWaiter {
            actions: covering,
            uids: seen,
            outcome: None,
            callback: cb,
        });
    }

    fn headers_response(store: &mut MessageStore, message: &Message<Response>) {
        let Some(id) = message.action_id() else {
            return;
        };
        if message.body.is_terminal() {
            store.pending_headers.retain(|_, pending| *pending != id);
        }

        let mut waiters = std::mem::take(&mut store.header_waiters);
        let mut kept = Vec::with_capacity(waiters.len());
        for mut waiter in waiters.drain(..) {
            if !waiter.actions.contains(&id) {
                kept.push(waiter);
                continue;
            }
            if !message.body.is_terminal() {
                let relevant = match &message.body {
                    Response::MessageInfo { info, .. } => waiter.uids.contains(&info.uid),
                    _ => true,
                };
                if relevant {
                    (waiter.callback)(store, message);
                }
                kept.push(waiter);
                continue;
            }

            waiter.actions.remove(&id);
            let keep_outcome = matches!(
                waiter.outcome.as_ref().map(|m| &m.body),
                Some(Response::Error(_)) | Some(Response::Unsupported) | Some(Response::Cancelled)
            );
            if !keep_outcome {
                waiter.outcome = Some(message.clone());
            }
            if waiter.actions.is_empty() {
                if let Some(outcome) = waiter.outcome.take() {
                    (waiter.callback)(store, &outcome);
                }
            } else {
                kept.push(waiter);
            }
        }
        // Callbacks may have registered new waiters meanwhile
        kept.append(&mut store.header_waiters);
        store.header_waiters = kept;
    }

    /// Fetch full messages.
    ///
    /// `cb` runs once per uid when its body arrives, whether this call or an
    /// earlier one requested it.
    pub fn fetch_full(&mut self, uids: &[u32], cb: Option<BodyCallback>) {
        let mut to_fetch: Vec<u32> = Vec::new();
        for &uid in uids {
            if let Some(cb) = &cb {
                self.body_callbacks.entry(uid).or_default().push(Rc::clone(cb));
            }
            if !self.pending_bodies.contains_key(&uid) && !to_fetch.contains(&uid) {
                to_fetch.push(uid);
            }
        }
        if to_fetch.is_empty() {
            return;
        }

        let id = self.worker.post_action(
            Action::FetchFullMessages {
                uids: to_fetch.clone(),
            },
            Some(Box::new(|store: &mut MessageStore, message: &Message<Response>| {
                if !message.body.is_terminal() {
                    return;
                }
                let Some(id) = message.action_id() else {
                    return;
                };
                let unanswered: Vec<u32> = store
                    .pending_bodies
                    .iter()
                    .filter(|(_, &pending)| pending == id)
                    .map(|(&uid, _)| uid)
                    .collect();
                for uid in unanswered {
                    store.pending_bodies.remove(&uid);
                    store.body_callbacks.remove(&uid);
                }
            })),
        );
        for uid in to_fetch {
            self.pending_bodies.insert(uid, id);
        }
    }

    /// Fetch one body part by its 1-based index path
    pub fn fetch_body_part(&mut self, uid: u32, part: Vec<usize>, cb: BodyPartCallback) {
        let mut cb = Some(cb);
        self.worker.post_action(
            Action::FetchMessageBodyPart { uid, part },
            Some(Box::new(move |store: &mut MessageStore, message: &Message<Response>| {
                if let Response::MessageBodyPart { part, .. } = &message.body {
                    if let Some(cb) = cb.take() {
                        cb(store, part.clone());
                    }
                }
            })),
        );
    }

    fn fetch_flags(&mut self) {
        if let Some(timer) = self.flags_debounce.take() {
            timer.abort();
        }
        let sender = self.worker.sender();
        let buffer = Arc::clone(&self.needs_flags);
        let flush = move || {
            let uids = std::mem::take(&mut *lock(&buffer));
            if !uids.is_empty() {
                debug!("Refreshing flags of {} messages", uids.len());
                sender.post(Action::FetchMessageFlags { uids });
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) if !self.flags_delay.is_zero() => {
                let delay = self.flags_delay;
                self.flags_debounce = Some(handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    flush();
                }));
            }
            _ => flush(),
        }
    }

    // Threads

    fn thread_params(&self) -> ThreadParams {
        ThreadParams {
            reverse: self.reverse_thread_order,
            sort_siblings: self.sort_thread_siblings,
            factory: self.iter_factory,
        }
    }

    fn run_thread_builder(&mut self) {
        if let Some(timer) = self.thread_debounce.take() {
            timer.abort();
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) if !self.thread_delay.is_zero() => handle,
            _ => {
                self.run_thread_builder_now();
                return;
            }
        };

        let threads = Arc::clone(&self.threads);
        let events = self.rebuild_tx.clone();
        let uids = self.uids.clone();
        let params = self.thread_params();
        let delay = self.thread_delay;
        lock(&self.threads).scheduled = true;
        self.thread_debounce = Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&threads).rebuild(&uids, params);
            // The store may be gone already
            let _ = events.send(());
        }));
    }

    /// Rebuild threads without debounce
    fn run_thread_builder_now(&mut self) {
        if let Some(timer) = self.thread_debounce.take() {
            timer.abort();
        }
        let params = self.thread_params();
        lock(&self.threads).rebuild(&self.uids, params);
        self.apply_reselect();
        if let Some(hook) = &self.hooks.on_update {
            hook(self);
        }
    }

    /// Finish a debounced rebuild: restore the cursor and notify the UI
    pub fn threads_rebuilt(&mut self) {
        self.apply_reselect();
        if let Some(hook) = &self.hooks.on_update {
            hook(self);
        }
    }

    fn apply_reselect(&mut self) {
        let reselect = lock(&self.threads).reselect.take();
        if let Some(index) = reselect {
            if let Some(&uid) = self.uids().get(index) {
                self.select_priv(Some(uid));
            }
        }
    }

    /// Number of local thread rebuilds so far
    pub fn thread_rebuilds(&self) -> u64 {
        lock(&self.threads).rebuilds
    }

    /// Whether a debounced thread rebuild is still due
    pub fn is_rebuild_pending(&self) -> bool {
        lock(&self.threads).scheduled
    }

    pub fn threaded_view(&self) -> bool {
        self.threaded_view
    }

    pub fn build_threads(&self) -> bool {
        self.build_threads
    }

    pub fn set_threaded_view(&mut self, threaded: bool) {
        self.threaded_view = threaded;
        if self.build_threads {
            if threaded {
                self.run_thread_builder();
            } else if let Some(timer) = self.thread_debounce.take() {
                timer.abort();
                lock(&self.threads).scheduled = false;
            }
            return;
        }
        self.sort(self.sort_criteria.clone(), None);
    }

    pub fn reverse_thread_order(&self) -> bool {
        self.reverse_thread_order
    }

    pub fn set_reverse_thread_order(&mut self, reverse: bool) {
        self.reverse_thread_order = reverse;
        let params = self.thread_params();
        lock(&self.threads).flatten(params);
        self.changed(false);
    }

    pub fn thread_context(&self) -> bool {
        self.thread_context
    }

    /// Toggle other-folder context in server-side threads
    pub fn toggle_thread_context(&mut self) {
        if !self.threaded_view {
            return;
        }
        self.thread_context = !self.thread_context;
        self.sort(self.sort_criteria.clone(), None);
    }

    /// Thread node of a uid
    pub fn thread(&self, uid: u32) -> CoreResult<ThreadNode> {
        let state = lock(&self.threads);
        if !state.built {
            return Err(CoreError::ThreadsUnavailable);
        }
        state
            .forest
            .node(uid)
            .copied()
            .ok_or(CoreError::ThreadNotFound(uid))
    }

    pub fn selected_thread(&mut self) -> CoreResult<ThreadNode> {
        match self.selected_uid() {
            Some(uid) => self.thread(uid),
            None => Err(CoreError::ThreadsUnavailable),
        }
    }

    /// Snapshot of the current forest
    pub fn threads(&self) -> CoreResult<ThreadForest> {
        let state = lock(&self.threads);
        if !state.built {
            return Err(CoreError::ThreadsUnavailable);
        }
        Ok(state.forest.clone())
    }

    /// Hide the replies below `uid`
    pub fn fold(&mut self, uid: u32) -> CoreResult<()> {
        self.set_folded(uid, true)
    }

    /// Show the replies below `uid` again
    pub fn unfold(&mut self, uid: u32) -> CoreResult<()> {
        self.set_folded(uid, false)
    }

    fn set_folded(&mut self, uid: u32, folded: bool) -> CoreResult<()> {
        let params = self.thread_params();
        lock(&self.threads).fold(uid, folded, params)?;
        self.select(uid);
        Ok(())
    }

    // Listing and selection

    /// Display list: threaded when threads are shown, flat otherwise
    pub fn uids(&self) -> Vec<u32> {
        if self.threaded_view {
            let state = lock(&self.threads);
            if !state.uids.is_empty() {
                return state.uids.clone();
            }
        }
        self.uids.clone()
    }

    /// Every known uid in backend order
    pub fn all_uids(&self) -> &[u32] {
        &self.uids
    }

    pub fn iter_factory(&self) -> IterFactory {
        self.iter_factory
    }

    pub fn message(&self, uid: u32) -> Option<&MessageInfo> {
        self.messages.get(&uid).and_then(Option::as_ref)
    }

    /// Whether the uid is listed, fetched or not
    pub fn contains(&self, uid: u32) -> bool {
        self.messages.contains_key(&uid)
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    /// Whether the uid is awaiting a delete or move
    pub fn is_deleted(&self, uid: u32) -> bool {
        self.deleted.contains(&uid)
    }

    pub fn is_sorting(&self) -> bool {
        self.sorting
    }

    pub fn is_header_pending(&self, uid: u32) -> bool {
        self.pending_headers.contains_key(&uid)
    }

    pub fn is_body_pending(&self, uid: u32) -> bool {
        self.pending_bodies.contains_key(&uid)
    }

    pub fn selected(&self) -> Option<&MessageInfo> {
        self.selected.and_then(|uid| self.message(uid))
    }

    /// Selected uid, selecting the first displayed message if none is
    pub fn selected_uid(&mut self) -> Option<u32> {
        if self.selected.is_none() {
            let uids = self.uids();
            if !uids.is_empty() {
                let start = self.iter_factory.iter(&uids).start_index();
                self.select(uids[start]);
            }
        }
        self.selected
    }

    /// Index of the selection in [`MessageStore::uids`]
    pub fn selected_index(&self) -> Option<usize> {
        self.selected.and_then(|uid| self.find_index_by_uid(uid))
    }

    pub fn find_index_by_uid(&self, uid: u32) -> Option<usize> {
        self.uids().iter().position(|&u| u == uid)
    }

    /// Move the cursor and drop any pending thread repositioning
    pub fn select(&mut self, uid: u32) {
        lock(&self.threads).reselect = None;
        self.select_priv(Some(uid));
    }

    pub fn clear_selection(&mut self) {
        lock(&self.threads).reselect = None;
        self.select_priv(None);
    }

    fn select_priv(&mut self, uid: Option<u32>) {
        self.selected = uid;
        self.update_visual_mark();
        self.notify_select();
    }

    fn notify_select(&self) {
        if let Some(hook) = &self.hooks.on_select {
            hook(self.selected());
        }
    }

    /// Move the cursor by `delta` displayed rows, clamped to the listing
    pub fn next_prev(&mut self, delta: i64) {
        let uids = self.uids();
        if uids.is_empty() {
            return;
        }
        let iter = self.iter_factory.iter(&uids);
        let current = self
            .selected_uid()
            .and_then(|uid| uids.iter().position(|&u| u == uid));
        let Some(current) = current else {
            self.select(uids[iter.start_index()]);
            return;
        };

        let index = move_index(current, delta, &iter, fix_bounds);
        self.select(uids[index]);

        if self.build_threads && self.threaded_view {
            let mut state = lock(&self.threads);
            if state.scheduled {
                state.reselect = Some(index);
            }
        }

        self.update_results();
    }

    pub fn next(&mut self) {
        self.next_prev(1);
    }

    pub fn prev(&mut self) {
        self.next_prev(-1);
    }

    // Sorting, searching and filtering

    pub fn sort_criteria(&self) -> &[SortCriterion] {
        &self.sort_criteria
    }

    pub fn filter(&self) -> Option<&SearchCriteria> {
        self.filter.as_ref()
    }

    /// Refetch the listing with new criteria.
    ///
    /// Once the refetch ends the selection is kept, or moved to the row at
    /// the same distance from the end of the listing if it disappeared.
    pub fn sort(&mut self, criteria: Vec<SortCriterion>, cb: Option<Callback<Self>>) {
        self.sort_criteria = criteria.clone();
        self.sorting = true;

        let offset = self.uids().len() as i64
            - self.selected_index().map_or(0, |i| i as i64 + 1);
        let mut cb = cb;
        let handle_return: Callback<Self> = Box::new(move |store: &mut MessageStore, message: &Message<Response>| {
            if message.body.is_terminal() {
                if let Some(uid) = store.selected_uid() {
                    store.select(uid);
                }
                if store.selected_index().is_none() {
                    store.clear_selection();
                    store.next_prev(offset);
                }
                store.sorting = false;
            }
            if let Some(cb) = cb.as_mut() {
                cb(store, message);
            }
        });

        let action = if self.threaded_view && !self.build_threads {
            Action::FetchDirectoryThreaded {
                sort: criteria,
                filter: self.filter.clone(),
                thread_context: self.thread_context,
            }
        } else {
            Action::FetchDirectoryContents {
                sort: criteria,
                filter: self.filter.clone(),
            }
        };
        self.worker.post_action(action, Some(handle_return));
    }

    /// Search the folder.
    ///
    /// `cb` receives the hits that are listed in this store, in the
    /// storage order of [`MessageStore::uids`].
    pub fn search(&mut self, criteria: SearchCriteria, cb: SearchCallback) {
        let mut cb = Some(cb);
        self.worker.post_action(
            Action::SearchDirectory { criteria },
            Some(Box::new(move |store: &mut MessageStore, message: &Message<Response>| {
                if let Response::SearchResults { uids } = &message.body {
                    if let Some(cb) = cb.take() {
                        let results = store.known_results(uids);
                        cb(store, results);
                    }
                }
            })),
        );
    }

    fn known_results(&self, uids: &[u32]) -> Vec<u32> {
        let mut seen = HashSet::new();
        let mut results: Vec<u32> = uids
            .iter()
            .copied()
            .filter(|uid| self.messages.contains_key(uid) && seen.insert(*uid))
            .collect();
        // Folded hits follow the displayed ones
        let mut order = self.uids();
        order.extend_from_slice(&self.uids);
        sort_by_order(&mut results, &order);
        results
    }

    /// Make `results` the active search and select the first hit
    pub fn apply_search(&mut self, results: Vec<u32>) {
        self.results = results;
        self.result_index = None;
        self.next_result();
    }

    pub fn results(&self) -> &[u32] {
        &self.results
    }

    pub fn is_result(&self, uid: u32) -> bool {
        self.results.contains(&uid)
    }

    fn update_results(&mut self) {
        if self.results.is_empty() || self.result_index.is_none() {
            return;
        }
        let Some(uid) = self.selected else {
            return;
        };
        if let Some(i) = self.results.iter().position(|&u| u == uid) {
            self.result_index = Some(i);
        }
    }

    fn next_prev_result(&mut self, delta: i64) {
        if self.results.is_empty() {
            return;
        }
        let iter = self.iter_factory.iter(&self.results);
        let index = match self.result_index {
            None => iter.start_index(),
            Some(i) => move_index(i, delta, &iter, wrap_bounds),
        };
        self.result_index = Some(index);
        let uid = self.results[index];
        self.select(uid);
        self.changed(false);
    }

    pub fn next_result(&mut self) {
        self.next_prev_result(1);
    }

    pub fn prev_result(&mut self) {
        self.next_prev_result(-1);
    }

    /// Narrow the listing; filters accumulate until cleared
    pub fn set_filter(&mut self, criteria: SearchCriteria) {
        self.filter = Some(match self.filter.take() {
            Some(current) => current.combine(criteria),
            None => criteria,
        });
        if let Some(hook) = &self.hooks.on_filter_change {
            hook(self);
        }
        self.sort(self.sort_criteria.clone(), None);
    }

    /// Drop filter and search results and refetch with the default sort
    pub fn apply_clear(&mut self) {
        self.filter = None;
        self.results.clear();
        self.result_index = None;
        if let Some(hook) = &self.hooks.on_filter_change {
            hook(self);
        }
        self.sort(self.sort_default.clone(), None);
    }

    // Mutations

    /// Wrap a caller callback so a failed action undoes its optimistic
    /// change before the caller sees the failure
    fn mutation_callback(cb: Option<Callback<Self>>) -> Callback<Self> {
        let mut cb = cb;
        Box::new(move |store: &mut MessageStore, message: &Message<Response>| {
            if message.body.is_terminal() {
                let rollback = message.action_id().and_then(|id| store.rollbacks.remove(&id));
                if let Some(rollback) = rollback {
                    if message.body.is_failure() {
                        store.roll_back(rollback);
                    }
                }
            }
            if let Some(cb) = cb.as_mut() {
                cb(store, message);
            }
        })
    }

    fn roll_back(&mut self, rollback: Rollback) {
        match rollback {
            Rollback::Removal { marked, removed } => {
                info!("Restoring {} messages after failed removal", marked.len());
                for uid in &marked {
                    self.deleted.remove(uid);
                }
                // Undo batches newest first; within a batch indices ascend
                for entry in removed.into_iter().rev().flatten() {
                    let at = entry.index.min(self.uids.len());
                    self.uids.insert(at, entry.uid);
                    self.messages.insert(entry.uid, entry.info);
                    if entry.was_result {
                        self.results.push(entry.uid);
                    }
                    lock(&self.threads).forest.set_deleted(entry.uid, false);
                }
                let params = self.thread_params();
                lock(&self.threads).flatten(params);
                let order = self.uids();
                sort_by_order(&mut self.results, &order);
                self.changed(true);
            }
            Rollback::Metadata(previous) => {
                for (uid, flags, labels) in previous {
                    if let Some(Some(info)) = self.messages.get_mut(&uid) {
                        info.flags = flags;
                        info.labels = labels;
                    }
                }
                self.changed(false);
            }
        }
    }

    fn post_mutation(&mut self, action: Action, rollback: Rollback, cb: Option<Callback<Self>>) -> MessageId {
        let id = self.worker.post_action(action, Some(Self::mutation_callback(cb)));
        self.rollbacks.insert(id, rollback);
        id
    }

    /// Delete messages, hiding them until the backend confirms
    pub fn delete(&mut self, uids: &[u32], cb: Option<Callback<Self>>) {
        self.deleted.extend(uids.iter().copied());
        self.post_mutation(
            Action::DeleteMessages { uids: uids.to_vec() },
            Rollback::Removal {
                marked: uids.to_vec(),
                removed: Vec::new(),
            },
            cb,
        );
    }

    /// Copy messages, creating the destination first when asked
    pub fn copy_messages(&mut self, uids: &[u32], destination: &str, create_dest: bool, cb: Option<Callback<Self>>) {
        let action = Action::CopyMessages {
            uids: uids.to_vec(),
            destination: destination.to_string(),
        };
        self.after_create(destination, create_dest, move |store| {
            store.worker.post_action(action, cb);
        });
    }

    /// Move messages, hiding them until the backend confirms
    pub fn move_messages(&mut self, uids: &[u32], destination: &str, create_dest: bool, cb: Option<Callback<Self>>) {
        self.deleted.extend(uids.iter().copied());
        let action = Action::MoveMessages {
            uids: uids.to_vec(),
            destination: destination.to_string(),
        };
        let rollback = Rollback::Removal {
            marked: uids.to_vec(),
            removed: Vec::new(),
        };
        self.after_create(destination, create_dest, move |store| {
            store.post_mutation(action, rollback, cb);
        });
    }

    /// Run `then` now, or once a quiet create of `destination` has ended
    fn after_create(&mut self, destination: &str, create: bool, then: impl FnOnce(&mut MessageStore) + 'static) {
        if !create {
            then(self);
            return;
        }
        let mut then = Some(then);
        self.worker.post_action(
            Action::CreateDirectory {
                directory: destination.to_string(),
                quiet: true,
            },
            Some(Box::new(move |store: &mut MessageStore, message: &Message<Response>| {
                if message.body.is_terminal() {
                    if let Some(then) = then.take() {
                        then(store);
                    }
                }
            })),
        );
    }

    /// Apply `change` to cached messages, returning what it replaced
    fn change_local(&mut self, uids: &[u32], change: impl Fn(&mut MessageInfo)) -> Rollback {
        let mut previous = Vec::new();
        for uid in uids {
            if let Some(Some(info)) = self.messages.get_mut(uid) {
                previous.push((*uid, info.flags, info.labels.clone()));
                change(info);
            }
        }
        Rollback::Metadata(previous)
    }

    pub fn flag(&mut self, uids: &[u32], flags: Flags, enable: bool, cb: Option<Callback<Self>>) {
        let rollback = self.change_local(uids, |info| info.flags.set(flags, enable));
        self.post_mutation(
            Action::FlagMessages {
                uids: uids.to_vec(),
                flags,
                enable,
            },
            rollback,
            cb,
        );
        self.changed(false);
    }

    pub fn answered(&mut self, uids: &[u32], answered: bool, cb: Option<Callback<Self>>) {
        let rollback = self.change_local(uids, |info| info.flags.set(Flags::ANSWERED, answered));
        self.post_mutation(
            Action::AnsweredMessages {
                uids: uids.to_vec(),
                answered,
            },
            rollback,
            cb,
        );
        self.changed(false);
    }

    pub fn modify_labels(&mut self, uids: &[u32], add: &[String], remove: &[String], cb: Option<Callback<Self>>) {
        let rollback = self.change_local(uids, |info| {
            info.labels.retain(|l| !remove.contains(l));
            for label in add {
                if !info.labels.contains(label) {
                    info.labels.push(label.clone());
                }
            }
        });
        self.post_mutation(
            Action::ModifyLabels {
                uids: uids.to_vec(),
                add: add.to_vec(),
                remove: remove.to_vec(),
            },
            rollback,
            cb,
        );
        self.changed(false);
    }

    // Marking

    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    pub fn marker_mut(&mut self) -> &mut Marker {
        &mut self.marker
    }

    /// Enter or leave visual marking at the selection
    pub fn toggle_visual_mark(&mut self, clear: bool) {
        let selected = self.selected_uid();
        self.marker.toggle_visual_mark(clear, selected);
    }

    fn update_visual_mark(&mut self) {
        if !self.marker.is_visual() {
            return;
        }
        let uids = self.uids();
        self.marker.update_visual_mark(&uids, self.selected);
    }

    /// Marked uids in display order
    pub fn marked(&self) -> Vec<u32> {
        self.marker.marked(&self.uids())
    }
}

impl Drop for MessageStore {
    fn drop(&mut self) {
        for timer in [self.thread_debounce.take(), self.flags_debounce.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
        if !self.pending_headers.is_empty() || !self.pending_bodies.is_empty() {
            warn!(
                headers = self.pending_headers.len(),
                bodies = self.pending_bodies.len(),
                "Store dropped with fetches in flight"
            );
        }
    }
}
