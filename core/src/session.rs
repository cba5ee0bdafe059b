/// Inbox session: drives the conversation store from REST, polling and push
use crate::auth::{Actor, SocketAuth};
use crate::config::Config;
use crate::error::{InboxError, Result};
use crate::messenger_types::{assigned_seller_label, DeliveryStatus, InboxEvent, PushEvent, Seller};
use crate::store::{optimistic, ConversationStore, Draft, PushOutcome, SummaryOutcome};
use crate::transport::{InboxApi, MediaFile, MetaPatch, PushHandle, PushUpdate, ReplyRequest};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;
const THREAD_FETCH_CONCURRENCY: usize = 8;

/// One signed-in inbox.
///
/// Every asynchronous result is stamped with the identity epoch it was
/// requested under; results that land after a logout or identity switch are
/// dropped instead of being merged into the new identity's store.
pub struct InboxSession<A: InboxApi + 'static> {
    config: Arc<Config>,
    api: Arc<RwLock<Arc<A>>>,
    store: Arc<RwLock<ConversationStore>>,
    sellers: Arc<RwLock<Vec<Seller>>>,
    socket: Arc<RwLock<Option<SocketAuth>>>,
    push: Arc<Mutex<Option<PushHandle>>>,
    events: broadcast::Sender<InboxEvent>,
    epoch: Arc<AtomicU64>,
    shutdown: Arc<RwLock<bool>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<A: InboxApi + 'static> Clone for InboxSession<A> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            api: self.api.clone(),
            store: self.store.clone(),
            sellers: self.sellers.clone(),
            socket: self.socket.clone(),
            push: self.push.clone(),
            events: self.events.clone(),
            epoch: self.epoch.clone(),
            shutdown: self.shutdown.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<A: InboxApi + 'static> InboxSession<A> {
    pub fn new(api: A, config: Config, actor: Actor) -> Self {
        let store = new_store(actor, &config);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config: Arc::new(config),
            api: Arc::new(RwLock::new(Arc::new(api))),
            store: Arc::new(RwLock::new(store)),
            sellers: Arc::new(RwLock::new(Vec::new())),
            socket: Arc::new(RwLock::new(None)),
            push: Arc::new(Mutex::new(None)),
            events,
            epoch: Arc::new(AtomicU64::new(0)),
            shutdown: Arc::new(RwLock::new(false)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.events.subscribe()
    }

    /// Shared store; the presentation layer reads from it
    pub fn store(&self) -> Arc<RwLock<ConversationStore>> {
        self.store.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load everything, then start the poll loops
    pub async fn start(&self) -> Result<()> {
        self.load_initial().await?;

        let session = self.clone();
        let conversations = tokio::spawn(async move { session.run_conversation_poll().await });
        let session = self.clone();
        let thread = tokio::spawn(async move { session.run_thread_poll().await });

        let mut tasks = self.tasks.lock().await;
        tasks.push(conversations);
        tasks.push(thread);
        Ok(())
    }

    /// Feed push updates for `socket` into the store
    pub async fn attach_push(
        &self,
        handle: PushHandle,
        updates: mpsc::Receiver<PushUpdate>,
        socket: Option<SocketAuth>,
    ) {
        *self.socket.write().await = socket;
        if let Some(old) = self.push.lock().await.replace(handle) {
            old.shutdown();
        }
        let session = self.clone();
        let listener = tokio::spawn(async move { session.run_push_listener(updates).await });
        self.tasks.lock().await.push(listener);
    }

    /// Stop all background work; late results are discarded
    pub async fn shutdown(&self) {
        *self.shutdown.write().await = true;
        {
            let _store = self.store.write().await;
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        if let Some(push) = self.push.lock().await.take() {
            push.shutdown();
        }
        info!("Inbox session stopped");
    }

    /// Replace the signed-in identity without restarting the session
    pub async fn switch_identity(&self, api: A, actor: Actor, socket: Option<SocketAuth>) -> Result<()> {
        // Client first: requests stamped with the new epoch must use it
        *self.api.write().await = Arc::new(api);
        {
            let mut store = self.store.write().await;
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *store = new_store(actor, &self.config);
            *self.socket.write().await = socket.clone();
        }
        self.sellers.write().await.clear();
        if let Some(push) = self.push.lock().await.as_ref() {
            push.set_auth(socket);
        }
        self.emit(InboxEvent::SelectionChanged {
            conversation_id: None,
        });
        self.emit(InboxEvent::ConversationsUpdated);
        self.load_initial().await
    }

    // ─── Ingestion ───────────────────────────────────────────────────────────

    /// Summaries plus every visible thread
    pub async fn load_initial(&self) -> Result<()> {
        let epoch = self.current_epoch();
        let api = self.api().await;
        let rows = match api.list_conversations().await {
            Ok(rows) => rows,
            Err(e) => {
                if let InboxError::Unauthorized { login_path, .. } = &e {
                    warn!("Session rejected, login required at {}", login_path);
                    self.emit(InboxEvent::LoginRequired {
                        login_path: login_path.clone(),
                    });
                }
                return Err(e);
            }
        };
        let outcome = match self.store_at(epoch).await {
            Some(mut store) => store.apply_summary_snapshot(rows),
            None => return Err(InboxError::SessionClosed),
        };
        self.report_summary(&outcome);
        let loaded = self.store.read().await.conversation_ids().len();
        info!(
            "Loaded {} conversation(s), fetching {} thread(s)",
            loaded,
            outcome.missing_threads.len()
        );
        self.fetch_threads(epoch, &outcome.missing_threads).await;

        if self.store.read().await.actor().is_admin() {
            self.load_sellers().await;
        }
        self.auto_select().await;
        Ok(())
    }

    /// One summary poll; also fetches threads the poll newly revealed
    pub async fn poll_conversations(&self) -> Result<SummaryOutcome> {
        let epoch = self.current_epoch();
        let rows = self.api().await.list_conversations().await?;
        let outcome = match self.store_at(epoch).await {
            Some(mut store) => store.apply_summary_snapshot(rows),
            None => return Err(InboxError::SessionClosed),
        };
        self.report_summary(&outcome);
        self.fetch_threads(epoch, &outcome.missing_threads).await;
        Ok(outcome)
    }

    /// Refresh the open thread; a no-op when nothing is selected
    pub async fn poll_active_thread(&self) -> Result<bool> {
        let active = self.store.read().await.active().map(str::to_string);
        match active {
            Some(id) => self.fetch_thread(self.current_epoch(), &id, false).await,
            None => Ok(false),
        }
    }

    pub async fn handle_push(&self, event: PushEvent) -> PushOutcome {
        let outcome = self.store.write().await.apply_push(event);
        self.after_push(&outcome).await;
        outcome
    }

    /// Apply `event` only if `auth` is still this session's push identity.
    ///
    /// The check runs under the store lock, which `switch_identity` also holds
    /// while it swaps the store and socket, so a buffered event from the old
    /// connection never lands in the new store.
    async fn handle_push_from(&self, auth: &SocketAuth, event: PushEvent) -> Option<PushOutcome> {
        let outcome = {
            let mut store = self.store.write().await;
            if self.socket.read().await.as_ref() != Some(auth) {
                return None;
            }
            store.apply_push(event)
        };
        self.after_push(&outcome).await;
        Some(outcome)
    }

    async fn after_push(&self, outcome: &PushOutcome) {
        self.report_push(outcome);
        if outcome.thread_changed {
            self.auto_select().await;
        }
    }

    // ─── Intents ─────────────────────────────────────────────────────────────

    /// Select a conversation and mark it read on the server
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<()> {
        let epoch = self.current_epoch();
        self.store.write().await.open_conversation(conversation_id);
        self.emit(InboxEvent::SelectionChanged {
            conversation_id: Some(conversation_id.to_string()),
        });
        self.emit(InboxEvent::ConversationsUpdated);
        self.fetch_thread(epoch, conversation_id, true).await?;
        Ok(())
    }

    pub async fn close_conversation(&self) {
        self.store.write().await.close_conversation();
        self.emit(InboxEvent::SelectionChanged {
            conversation_id: None,
        });
    }

    /// Send a text reply with an optimistic placeholder.
    ///
    /// On failure the placeholder is removed and the error returned.
    pub async fn send_text(&self, draft: Draft) -> Result<()> {
        let text = draft.text.trim().to_string();
        if text.is_empty() || draft.conversation_id.is_empty() {
            return Err(InboxError::InvalidInput("Nothing to send".to_string()));
        }
        let draft = Draft { text, ..draft };
        let epoch = self.current_epoch();
        let conversation_id = draft.conversation_id.clone();

        let role = self.store.read().await.actor().role;
        let placeholder = optimistic::placeholder(&draft, role, None, Utc::now());
        let local_id = placeholder
            .local_id()
            .map(str::to_string)
            .unwrap_or_default();
        self.store.write().await.insert_optimistic(placeholder);
        self.emit_thread(&conversation_id);

        let request = ReplyRequest {
            conversation_id: conversation_id.clone(),
            message: draft.text.clone(),
            reply_to_message_id: draft.reply_to_message_id.clone(),
            client_message_id: Some(local_id.clone()),
        };
        match self.api().await.send_reply(&request).await {
            Ok(()) => {
                match self.store_at(epoch).await {
                    Some(mut store) => store.mark_sent(&conversation_id, &local_id),
                    None => return Ok(()),
                };
                self.emit_thread(&conversation_id);
                if let Err(e) = self.fetch_thread(epoch, &conversation_id, false).await {
                    debug!("Refresh after send failed: {}", e);
                }
                Ok(())
            }
            Err(e) => {
                if let Some(mut store) = self.store_at(epoch).await {
                    store.remove_optimistic(&conversation_id, &local_id);
                    drop(store);
                    self.emit_thread(&conversation_id);
                }
                Err(self.fail("send", "Send failed", e))
            }
        }
    }

    /// Upload attachments; the server's copy arrives through the next refresh
    pub async fn send_media(&self, conversation_id: &str, files: Vec<MediaFile>) -> Result<()> {
        let epoch = self.current_epoch();
        if let Err(e) = self.api().await.send_media(conversation_id, &files).await {
            return Err(self.fail("send_media", "Media send failed", e));
        }
        if let Err(e) = self.fetch_thread(epoch, conversation_id, false).await {
            debug!("Refresh after media send failed: {}", e);
        }
        Ok(())
    }

    /// Assign to `seller_id`, or unassign with `None`
    pub async fn assign_seller(&self, conversation_id: &str, seller_id: Option<String>) -> Result<()> {
        self.update_meta(conversation_id, MetaPatch::Assign(seller_id)).await
    }

    pub async fn set_delivery_status(&self, conversation_id: &str, status: DeliveryStatus) -> Result<()> {
        self.update_meta(conversation_id, MetaPatch::Status(status)).await
    }

    async fn update_meta(&self, conversation_id: &str, patch: MetaPatch) -> Result<()> {
        let epoch = self.current_epoch();
        let meta = match self.api().await.update_meta(conversation_id, &patch).await {
            Ok(meta) => meta,
            Err(e) => return Err(self.fail("update_meta", "Update failed", e)),
        };
        if let Some(mut store) = self.store_at(epoch).await {
            let outcome = store.apply_meta(conversation_id, &meta);
            drop(store);
            self.report_push(&outcome);
        }
        Ok(())
    }

    /// Send a copy of `message` into another conversation
    pub async fn forward_message(&self, target_conversation_id: &str, message: &str) -> Result<()> {
        if target_conversation_id.is_empty() {
            return Err(InboxError::InvalidInput("No forward target".to_string()));
        }
        let epoch = self.current_epoch();
        if let Err(e) = self
            .api()
            .await
            .forward_message(target_conversation_id, message)
            .await
        {
            return Err(self.fail("forward", "Forward failed", e));
        }
        if self.store.read().await.is_loaded(target_conversation_id) {
            if let Err(e) = self.fetch_thread(epoch, target_conversation_id, false).await {
                debug!("Refresh after forward failed: {}", e);
            }
        }
        Ok(())
    }

    pub async fn mark_unread(&self, conversation_id: &str) -> Result<()> {
        let epoch = self.current_epoch();
        let state = match self.api().await.mark_unread(conversation_id).await {
            Ok(state) => state,
            Err(e) => return Err(self.fail("mark_unread", "Mark unread failed", e)),
        };
        if let Some(mut store) = self.store_at(epoch).await {
            store.apply_mark_unread(conversation_id, &state);
            drop(store);
            self.emit(InboxEvent::ConversationsUpdated);
        }
        Ok(())
    }

    /// Refresh the seller directory; failures leave the previous list
    pub async fn load_sellers(&self) -> Vec<Seller> {
        let epoch = self.current_epoch();
        match self.api().await.list_sellers().await {
            Ok(sellers) if self.is_current(epoch) => {
                *self.sellers.write().await = sellers.clone();
                sellers
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!("Loading sellers failed: {}", e);
                self.sellers.read().await.clone()
            }
        }
    }

    pub async fn sellers(&self) -> Vec<Seller> {
        self.sellers.read().await.clone()
    }

    /// Label for whoever `conversation_id` is assigned to
    pub async fn assigned_label(&self, conversation_id: &str) -> String {
        let assigned = self
            .store
            .read()
            .await
            .summary(conversation_id)
            .and_then(|s| s.assigned_seller_id.clone());
        assigned_seller_label(&self.sellers.read().await, assigned.as_deref())
    }

    // ─── Background loops ────────────────────────────────────────────────────

    async fn run_conversation_poll(&self) {
        let mut ticker = interval(self.config.conversation_poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately and the initial load just ran
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if *self.shutdown.read().await {
                break;
            }
            if let Err(e) = self.poll_conversations().await {
                debug!("Conversation poll failed: {}", e);
            }
        }
    }

    async fn run_thread_poll(&self) {
        let mut ticker = interval(self.config.thread_poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if *self.shutdown.read().await {
                break;
            }
            if let Err(e) = self.poll_active_thread().await {
                debug!("Thread poll failed: {}", e);
            }
        }
    }

    async fn run_push_listener(&self, mut updates: mpsc::Receiver<PushUpdate>) {
        // Identity of the connection the buffered events came from
        let mut connected: Option<SocketAuth> = None;
        while let Some(update) = updates.recv().await {
            match update {
                PushUpdate::Connected { auth } => {
                    let current = self.socket.read().await.as_ref() == Some(&auth);
                    connected = Some(auth);
                    if current {
                        self.emit(InboxEvent::PushConnected);
                    }
                }
                PushUpdate::Disconnected { reason } => {
                    connected = None;
                    self.emit(InboxEvent::PushDisconnected { reason });
                }
                PushUpdate::Event(event) => {
                    let applied = match &connected {
                        Some(auth) => self.handle_push_from(auth, event).await.is_some(),
                        None => false,
                    };
                    if !applied {
                        debug!("Dropping push event from a previous identity");
                    }
                }
            }
        }
        debug!("Push listener finished");
    }

    // ─── Helpers ─────────────────────────────────────────────────────────────

    async fn api(&self) -> Arc<A> {
        self.api.read().await.clone()
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch
    }

    /// Write access to the store, or `None` once `epoch` has passed. Epoch
    /// bumps happen under this same lock.
    async fn store_at(&self, epoch: u64) -> Option<RwLockWriteGuard<'_, ConversationStore>> {
        let store = self.store.write().await;
        self.is_current(epoch).then_some(store)
    }

    async fn fetch_thread(&self, epoch: u64, conversation_id: &str, mark_read: bool) -> Result<bool> {
        let ticket = self.store.write().await.next_ticket();
        let page = self.api().await.fetch_messages(conversation_id, mark_read).await?;
        let changed = match self.store_at(epoch).await {
            Some(mut store) => store.apply_thread_snapshot(conversation_id, ticket, page),
            None => return Ok(false),
        };
        if changed {
            self.emit_thread(conversation_id);
        }
        Ok(changed)
    }

    /// Fetch several threads concurrently; each page is applied as it lands
    async fn fetch_threads(&self, epoch: u64, ids: &[String]) {
        stream::iter(ids.iter().cloned())
            .for_each_concurrent(THREAD_FETCH_CONCURRENCY, |id| async move {
                if let Err(e) = self.fetch_thread(epoch, &id, false).await {
                    warn!("Fetching messages for {} failed: {}", id, e);
                }
            })
            .await;
    }

    /// Open the newest conversation when nothing is selected
    async fn auto_select(&self) {
        if !self.config.auto_select {
            return;
        }
        let newest = {
            let store = self.store.read().await;
            if store.active().is_some() {
                return;
            }
            store.newest_conversation_id()
        };
        if let Some(id) = newest {
            if let Err(e) = self.open_conversation(&id).await {
                debug!("Auto-select of {} failed: {}", id, e);
            }
        }
    }

    fn report_summary(&self, outcome: &SummaryOutcome) {
        self.emit(InboxEvent::ConversationsUpdated);
        if outcome.selection_cleared {
            self.emit(InboxEvent::SelectionChanged {
                conversation_id: None,
            });
        }
    }

    fn report_push(&self, outcome: &PushOutcome) {
        if outcome.summary_changed || outcome.evicted {
            self.emit(InboxEvent::ConversationsUpdated);
        }
        if outcome.thread_changed {
            if let Some(id) = &outcome.conversation_id {
                self.emit_thread(id);
            }
        }
        if outcome.selection_cleared {
            self.emit(InboxEvent::SelectionChanged {
                conversation_id: None,
            });
        }
    }

    fn fail(&self, action: &str, fallback: &str, error: InboxError) -> InboxError {
        warn!("{} failed: {}", action, error);
        self.emit(InboxEvent::ActionFailed {
            action: action.to_string(),
            message: error.user_message(fallback),
        });
        error
    }

    fn emit_thread(&self, conversation_id: &str) {
        self.emit(InboxEvent::ThreadUpdated {
            conversation_id: conversation_id.to_string(),
        });
    }

    fn emit(&self, event: InboxEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn new_store(actor: Actor, config: &Config) -> ConversationStore {
    ConversationStore::new(
        actor,
        config.optimistic_match_window,
        config.read_override_max_polls,
    )
}
