/// Conversation store: reconciles REST snapshots, polls and push events into
/// one ordered, deduplicated timeline per conversation.
///
/// Every ingestion path funnels into the same merge rules:
///   - server snapshots replace a thread but keep unconfirmed optimistic sends
///   - pushed messages are appended, never duplicated
///   - threads are re-sorted by timestamp after every change
pub mod optimistic;
pub mod read_markers;

use crate::auth::Actor;
use crate::messenger_types::{
    ConversationSummary, Message, MetaUpdate, Platform, PushEvent, SendState,
};
use crate::transport::{MessagePage, UnreadState};
use crate::visibility;
use chrono::Duration;
use std::collections::HashMap;
use tracing::debug;

pub use optimistic::Draft;
pub use read_markers::{ReadMarker, ReadOverrides, Ticks};

/// Issued before a message fetch. A response carrying an older ticket than the
/// last one applied to the same conversation is discarded as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

/// What a summary snapshot changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SummaryOutcome {
    /// Conversations whose history has never been loaded
    pub missing_threads: Vec<String>,
    /// Conversations dropped because the server no longer lists them
    pub evicted: Vec<String>,
    pub selection_cleared: bool,
}

/// What a push event changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub conversation_id: Option<String>,
    pub thread_changed: bool,
    pub summary_changed: bool,
    pub evicted: bool,
    pub selection_cleared: bool,
}

/// Candidate destination when forwarding a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub conversation_id: String,
    pub title: String,
    pub profile_pic: String,
}

pub struct ConversationStore {
    actor: Actor,
    match_window: Duration,
    summaries: HashMap<String, ConversationSummary>,
    threads: HashMap<String, Vec<Message>>,
    markers: HashMap<String, ReadMarker>,
    overrides: ReadOverrides,
    active: Option<String>,
    next_ticket: u64,
    /// Last snapshot ticket applied per conversation; presence means "history loaded"
    applied: HashMap<String, FetchTicket>,
}

impl ConversationStore {
    pub fn new(actor: Actor, match_window: std::time::Duration, override_max_polls: u32) -> Self {
        let match_window =
            Duration::from_std(match_window).unwrap_or_else(|_| Duration::seconds(30));
        Self {
            actor,
            match_window,
            summaries: HashMap::new(),
            threads: HashMap::new(),
            markers: HashMap::new(),
            overrides: ReadOverrides::new(override_max_polls),
            active: None,
            next_ticket: 0,
            applied: HashMap::new(),
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn summary(&self, conversation_id: &str) -> Option<&ConversationSummary> {
        self.summaries.get(conversation_id)
    }

    pub fn thread(&self, conversation_id: &str) -> &[Message] {
        self.threads
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_thread(&self, conversation_id: &str) -> bool {
        self.threads.contains_key(conversation_id)
    }

    pub fn is_loaded(&self, conversation_id: &str) -> bool {
        self.applied.contains_key(conversation_id)
    }

    pub fn read_marker(&self, conversation_id: &str) -> ReadMarker {
        self.markers.get(conversation_id).copied().unwrap_or_default()
    }

    pub fn has_read_override(&self, conversation_id: &str) -> bool {
        self.overrides.is_held(conversation_id)
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.summaries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Reset to the empty state (logout / new session)
    pub fn clear(&mut self) {
        self.summaries.clear();
        self.threads.clear();
        self.markers.clear();
        self.overrides.clear();
        self.applied.clear();
        self.active = None;
    }

    // ─── Merge primitive ─────────────────────────────────────────────────────

    /// Insert `msg` into its conversation unless an equivalent entry exists.
    ///
    /// A confirmed message that matches an optimistic placeholder replaces the
    /// placeholder in place. Returns whether the thread changed.
    pub fn merge_message(&mut self, msg: Message) -> bool {
        let window = self.match_window;
        let list = self.threads.entry(msg.conversation_id.clone()).or_default();

        if msg.is_optimistic() {
            if list.iter().any(|m| m.local_id() == msg.local_id()) {
                return false;
            }
            list.push(msg);
            sort_thread(list);
            return true;
        }

        if list
            .iter()
            .any(|m| !m.is_optimistic() && same_message(m, &msg))
        {
            return false;
        }

        match list
            .iter()
            .position(|m| optimistic::confirms(m, &msg, window))
        {
            Some(pos) => list[pos] = msg,
            None => list.push(msg),
        }
        sort_thread(list);
        true
    }

    // ─── Ingestion ───────────────────────────────────────────────────────────

    pub fn next_ticket(&mut self) -> FetchTicket {
        self.next_ticket += 1;
        FetchTicket(self.next_ticket)
    }

    /// Apply an authoritative message list for one conversation.
    ///
    /// Optimistic entries survive unless the snapshot confirms them; read
    /// watermarks only move forward. Returns `false` if the snapshot was
    /// stale or the conversation is not visible to this actor.
    pub fn apply_thread_snapshot(
        &mut self,
        conversation_id: &str,
        ticket: FetchTicket,
        page: MessagePage,
    ) -> bool {
        if let Some(last) = self.applied.get(conversation_id) {
            if ticket <= *last {
                debug!("Discarding stale snapshot for {}", conversation_id);
                return false;
            }
        }
        if !self.is_visible_id(conversation_id) {
            debug!("Ignoring snapshot for hidden conversation {}", conversation_id);
            return false;
        }
        self.applied.insert(conversation_id.to_string(), ticket);

        let mut next: Vec<Message> = Vec::with_capacity(page.messages.len());
        for msg in page.messages {
            if !next.iter().any(|m| same_message(m, &msg)) {
                next.push(msg);
            }
        }
        if let Some(previous) = self.threads.get(conversation_id) {
            next.extend(previous.iter().filter(|m| m.is_optimistic()).cloned());
        }
        sort_thread(&mut next);
        let retired = optimistic::retire_confirmed(&mut next, self.match_window);
        if retired > 0 {
            debug!("Retired {} confirmed optimistic message(s) in {}", retired, conversation_id);
        }
        self.threads.insert(conversation_id.to_string(), next);

        let marker = self.markers.entry(conversation_id.to_string()).or_default();
        if let Some(read_at) = page.read_at {
            marker.observe_read_at(read_at);
        }
        if let Some(customer_read_at) = page.customer_read_at {
            marker.observe_customer_read_at(customer_read_at);
        }
        true
    }

    /// Apply an authoritative conversation summary list
    pub fn apply_summary_snapshot(&mut self, rows: Vec<ConversationSummary>) -> SummaryOutcome {
        for id in self.overrides.on_poll(self.active.as_deref()) {
            debug!("Read override for {} expired", id);
        }

        let mut next = HashMap::with_capacity(rows.len());
        for mut row in rows {
            if !visibility::is_visible(&self.actor, row.assigned_seller_id.as_deref()) {
                continue;
            }
            if self.overrides.is_held(&row.conversation_id) {
                row.clear_unread();
            }
            next.insert(row.conversation_id.clone(), row);
        }
        self.summaries = next;

        let mut outcome = SummaryOutcome::default();
        if !self.actor.is_admin() {
            let mut gone: Vec<String> = self
                .threads
                .keys()
                .filter(|id| !self.summaries.contains_key(*id))
                .cloned()
                .collect();
            gone.sort();
            for id in gone {
                self.evict(&id);
                outcome.evicted.push(id);
            }
            if let Some(active) = self.active.clone() {
                if !self.summaries.contains_key(&active) {
                    self.active = None;
                    outcome.selection_cleared = true;
                }
            }
        }

        outcome.missing_threads = self
            .summaries
            .keys()
            .filter(|id| !self.applied.contains_key(*id))
            .cloned()
            .collect();
        outcome.missing_threads.sort();
        outcome
    }

    pub fn apply_push(&mut self, event: PushEvent) -> PushOutcome {
        match event {
            PushEvent::NewMessage(wire) => match Message::from_wire(wire) {
                Some(msg) => self.ingest_pushed_message(msg),
                None => {
                    debug!("Dropping pushed message without conversation id");
                    PushOutcome::default()
                }
            },
            PushEvent::ConversationMeta(meta) => match meta.conversation_id.clone() {
                Some(id) => self.apply_meta(&id, &meta),
                None => PushOutcome::default(),
            },
        }
    }

    fn ingest_pushed_message(&mut self, msg: Message) -> PushOutcome {
        let id = msg.conversation_id.clone();
        if !self.is_visible_id(&id) {
            debug!("Ignoring pushed message for hidden conversation {}", id);
            return PushOutcome::default();
        }

        let counts_unread = msg.is_customer() && self.active.as_deref() != Some(id.as_str());
        let preview = msg.clone();
        let thread_changed = self.merge_message(msg);

        let summary = self
            .summaries
            .entry(id.clone())
            .or_insert_with(|| ConversationSummary::new(id.clone()));
        if let Some(name) = &preview.customer_name {
            summary.customer_name = name.clone();
        }
        if let Some(pic) = &preview.customer_profile_pic {
            summary.customer_profile_pic = pic.clone();
        }
        if preview.platform != Platform::Unknown {
            summary.platform = preview.platform;
        }
        if !preview.page_id.is_empty() {
            summary.page_id = preview.page_id.clone();
        }
        if summary.last_time.map_or(true, |t| preview.timestamp >= t) {
            summary.last_message = preview.text.clone();
            summary.last_time = Some(preview.timestamp);
        }

        // A redelivered event must not count twice
        if counts_unread && thread_changed {
            let count = summary.unread_count + 1;
            summary.set_unread(count, true);
            self.overrides.release(&id);
        }

        PushOutcome {
            conversation_id: Some(id),
            thread_changed,
            summary_changed: true,
            evicted: false,
            selection_cleared: false,
        }
    }

    /// Apply an assignment / status change. A seller drops conversations that
    /// now belong to someone else.
    pub fn apply_meta(&mut self, conversation_id: &str, meta: &MetaUpdate) -> PushOutcome {
        let mut outcome = PushOutcome {
            conversation_id: Some(conversation_id.to_string()),
            ..Default::default()
        };
        if let Some(summary) = self.summaries.get_mut(conversation_id) {
            summary.apply_meta(meta);
            outcome.summary_changed = true;
        }
        if !visibility::is_visible(&self.actor, meta.assigned_seller_id.as_deref()) {
            outcome.evicted = self.evict(conversation_id);
            if self.active.as_deref() == Some(conversation_id) {
                self.active = None;
                outcome.selection_cleared = true;
            }
        }
        outcome
    }

    // ─── Read state ──────────────────────────────────────────────────────────

    /// Select a conversation and hide its unread dot right away
    pub fn open_conversation(&mut self, conversation_id: &str) {
        self.active = Some(conversation_id.to_string());
        self.overrides.hold(conversation_id);
        if let Some(summary) = self.summaries.get_mut(conversation_id) {
            summary.clear_unread();
        }
    }

    pub fn close_conversation(&mut self) {
        self.active = None;
    }

    /// Apply the server's answer to an explicit mark-unread verbatim
    pub fn apply_mark_unread(&mut self, conversation_id: &str, state: &UnreadState) {
        self.overrides.release(conversation_id);
        if let Some(summary) = self.summaries.get_mut(conversation_id) {
            summary.set_unread(state.unread_count, state.is_unread);
        }
        self.markers
            .entry(conversation_id.to_string())
            .or_default()
            .reset_read_at(state.read_at.flatten());
    }

    // ─── Optimistic sends ────────────────────────────────────────────────────

    pub fn insert_optimistic(&mut self, msg: Message) -> bool {
        msg.is_optimistic() && self.merge_message(msg)
    }

    /// `Sending → Sent` once the reply request succeeded
    pub fn mark_sent(&mut self, conversation_id: &str, local_id: &str) -> bool {
        let Some(list) = self.threads.get_mut(conversation_id) else {
            return false;
        };
        match list
            .iter_mut()
            .filter_map(|m| m.local.as_mut())
            .find(|l| l.local_id == local_id)
        {
            Some(local) => {
                local.state = SendState::Sent;
                true
            }
            None => false,
        }
    }

    /// Roll back a failed send
    pub fn remove_optimistic(&mut self, conversation_id: &str, local_id: &str) -> bool {
        let Some(list) = self.threads.get_mut(conversation_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|m| m.local_id() != Some(local_id));
        before != list.len()
    }

    // ─── Derived views ───────────────────────────────────────────────────────

    /// Summary rows with previews taken from the newest cached message
    pub fn conversation_rows(&self) -> Vec<ConversationSummary> {
        self.summaries
            .values()
            .map(|summary| {
                let mut row = summary.clone();
                if let Some(last) = self.thread(&row.conversation_id).last() {
                    if let Some(name) = last.customer_name.as_ref().filter(|n| !n.is_empty()) {
                        row.customer_name = name.clone();
                    }
                    if let Some(pic) = last.customer_profile_pic.as_ref().filter(|p| !p.is_empty()) {
                        row.customer_profile_pic = pic.clone();
                    }
                    if last.platform != Platform::Unknown {
                        row.platform = last.platform;
                    }
                    if !last.page_id.is_empty() {
                        row.page_id = last.page_id.clone();
                    }
                    row.last_message = last.text.clone();
                    row.last_time = Some(last.timestamp);
                }
                row
            })
            .collect()
    }

    /// The list view: visible rows matching `query`, newest activity first
    pub fn visible_conversations(&self, query: &str) -> Vec<ConversationSummary> {
        let rows = self.conversation_rows();
        visibility::filter_conversations(&rows, &self.actor, query)
    }

    /// Conversation whose newest message is the most recent
    pub fn newest_conversation_id(&self) -> Option<String> {
        self.threads
            .iter()
            .filter(|(id, _)| self.is_visible_id(id))
            .filter_map(|(id, list)| list.last().map(|m| (m.timestamp, id)))
            .max()
            .map(|(_, id)| id.clone())
    }

    /// Header title for a conversation
    pub fn thread_title(&self, conversation_id: &str) -> String {
        self.thread(conversation_id)
            .iter()
            .rev()
            .find_map(|m| m.customer_name.clone().filter(|n| !n.is_empty()))
            .or_else(|| {
                self.summaries
                    .get(conversation_id)
                    .map(|s| s.customer_name.clone())
                    .filter(|n| !n.is_empty())
            })
            .unwrap_or_else(|| conversation_id.to_string())
    }

    /// Other cached conversations a message can be forwarded to, by title
    pub fn forward_targets(&self, exclude: Option<&str>) -> Vec<ForwardTarget> {
        let mut targets: Vec<ForwardTarget> = self
            .threads
            .keys()
            .filter(|id| Some(id.as_str()) != exclude)
            .map(|id| ForwardTarget {
                conversation_id: id.clone(),
                title: self.thread_title(id),
                profile_pic: self
                    .thread(id)
                    .iter()
                    .rev()
                    .find_map(|m| m.customer_profile_pic.clone())
                    .unwrap_or_default(),
            })
            .collect();
        targets.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.conversation_id.cmp(&b.conversation_id)));
        targets
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn is_visible_id(&self, conversation_id: &str) -> bool {
        let assigned = self
            .summaries
            .get(conversation_id)
            .and_then(|s| s.assigned_seller_id.as_deref());
        visibility::is_visible(&self.actor, assigned)
    }

    fn evict(&mut self, conversation_id: &str) -> bool {
        let had_summary = self.summaries.remove(conversation_id).is_some();
        let had_thread = self.threads.remove(conversation_id).is_some();
        self.markers.remove(conversation_id);
        self.overrides.release(conversation_id);
        self.applied.remove(conversation_id);
        if had_summary || had_thread {
            debug!("Evicted conversation {}", conversation_id);
        }
        had_summary || had_thread
    }
}

/// Identity of two confirmed messages: server id when both have one, then the
/// echoed correlation id, then exact content (origin, text, timestamp).
fn same_message(a: &Message, b: &Message) -> bool {
    if a.conversation_id != b.conversation_id {
        return false;
    }
    if let (Some(x), Some(y)) = (&a.id, &b.id) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (&a.client_message_id, &b.client_message_id) {
        return x == y;
    }
    a.origin == b.origin && a.text == b.text && a.timestamp == b.timestamp
}

/// Stable sort: equal timestamps keep insertion order
fn sort_thread(list: &mut [Message]) {
    list.sort_by_key(|m| m.timestamp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger_types::{DeliveryStatus, Origin};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn customer(id: &str, conv: &str, text: &str, secs: i64) -> Message {
        Message {
            id: Some(id.to_string()),
            conversation_id: conv.to_string(),
            origin: Origin::Customer,
            sender_name: None,
            customer_name: Some("Anika".to_string()),
            customer_profile_pic: None,
            text: text.to_string(),
            platform: Platform::Facebook,
            page_id: "P1".to_string(),
            timestamp: at(secs),
            reply_to_message_id: None,
            client_message_id: None,
            local: None,
        }
    }

    fn store() -> ConversationStore {
        ConversationStore::new(Actor::admin(), std::time::Duration::from_secs(30), 6)
    }

    #[test]
    fn test_merge_sorts_and_dedups() {
        let mut store = store();
        assert!(store.merge_message(customer("m2", "C1", "second", 20)));
        assert!(store.merge_message(customer("m1", "C1", "first", 10)));
        assert!(!store.merge_message(customer("m2", "C1", "second", 20)));
        let texts: Vec<&str> = store.thread("C1").iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut store = store();
        store.merge_message(customer("a", "C1", "a", 10));
        store.merge_message(customer("b", "C1", "b", 10));
        store.merge_message(customer("c", "C1", "c", 5));
        let ids: Vec<&str> = store.thread("C1").iter().filter_map(|m| m.id.as_deref()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_idless_duplicates_collapse_on_exact_content() {
        let mut store = store();
        let mut msg = customer("x", "C1", "ok", 10);
        msg.id = None;
        assert!(store.merge_message(msg.clone()));
        assert!(!store.merge_message(msg.clone()));
        let mut later = msg;
        later.timestamp = at(12);
        assert!(store.merge_message(later));
        assert_eq!(store.thread("C1").len(), 2);
    }

    #[test]
    fn test_stale_snapshot_is_discarded() {
        let mut store = store();
        let old = store.next_ticket();
        let new = store.next_ticket();
        let page = |msgs: Vec<Message>| MessagePage {
            messages: msgs,
            ..Default::default()
        };
        assert!(store.apply_thread_snapshot(
            "C1",
            new,
            page(vec![customer("m1", "C1", "a", 1), customer("m2", "C1", "b", 2)])
        ));
        assert!(!store.apply_thread_snapshot("C1", old, page(vec![customer("m1", "C1", "a", 1)])));
        assert_eq!(store.thread("C1").len(), 2);
    }

    #[test]
    fn test_meta_push_updates_summary() {
        let mut store = store();
        store.apply_summary_snapshot(vec![ConversationSummary::new("C1")]);
        let outcome = store.apply_meta(
            "C1",
            &MetaUpdate {
                conversation_id: Some("C1".to_string()),
                assigned_seller_id: Some("S2".to_string()),
                delivery_status: DeliveryStatus::Hold,
                assigned_at: None,
            },
        );
        assert!(outcome.summary_changed);
        assert!(!outcome.evicted);
        let summary = store.summary("C1").unwrap();
        assert_eq!(summary.assigned_seller_id.as_deref(), Some("S2"));
        assert_eq!(summary.delivery_status, DeliveryStatus::Hold);
    }

    #[test]
    fn test_forward_targets_exclude_source() {
        let mut store = store();
        store.merge_message(customer("m1", "C1", "a", 1));
        let mut other = customer("m2", "C2", "b", 2);
        other.customer_name = Some("Bilal".to_string());
        store.merge_message(other);
        store.merge_message(customer("m3", "C3", "c", 3));

        let targets = store.forward_targets(Some("C3"));
        let titles: Vec<&str> = targets.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Anika", "Bilal"]);
        assert_eq!(store.newest_conversation_id().as_deref(), Some("C3"));
    }
}
