/// Conversation store behaviour across snapshots, pushes and local intents
extern crate inbox_core;

use chrono::{DateTime, TimeZone, Utc};
use inbox_core::auth::{Actor, Role};
use inbox_core::messenger_types::{
    AgentRole, ConversationSummary, DeliveryStatus, Message, MetaUpdate, Origin, Platform,
    PushEvent, SendState, WireMessage,
};
use inbox_core::store::{optimistic, ConversationStore, Draft, Ticks};
use inbox_core::transport::{MessagePage, UnreadState};
use std::time::Duration;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn store_for(actor: Actor) -> ConversationStore {
    ConversationStore::new(actor, Duration::from_secs(30), 6)
}

fn summary(id: &str, assigned: Option<&str>, unread: u32) -> ConversationSummary {
    let mut row = ConversationSummary::new(id);
    row.customer_name = format!("Customer {}", id);
    row.assigned_seller_id = assigned.map(str::to_string);
    row.set_unread(unread, unread > 0);
    row
}

fn server_msg(id: &str, conv: &str, origin: Origin, text: &str, secs: i64) -> Message {
    Message {
        id: Some(id.to_string()),
        conversation_id: conv.to_string(),
        origin,
        sender_name: None,
        customer_name: None,
        customer_profile_pic: None,
        text: text.to_string(),
        platform: Platform::Instagram,
        page_id: "P1".to_string(),
        timestamp: at(secs),
        reply_to_message_id: None,
        client_message_id: None,
        local: None,
    }
}

fn page(messages: Vec<Message>) -> MessagePage {
    MessagePage {
        messages,
        ..Default::default()
    }
}

fn push_customer(conv: &str, id: &str, text: &str, secs: i64) -> PushEvent {
    PushEvent::NewMessage(WireMessage {
        id: Some(id.to_string()),
        conversation_id: Some(conv.to_string()),
        sender: Some("customer".to_string()),
        message: Some(text.to_string()),
        timestamp: Some(serde_json::json!(at(secs).to_rfc3339())),
        ..Default::default()
    })
}

fn is_sorted(list: &[Message]) -> bool {
    list.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
}

#[test]
fn test_same_message_twice_is_one_entry() {
    let mut store = store_for(Actor::admin());
    let msg = server_msg("m1", "C1", Origin::Customer, "hi", 10);
    assert!(store.merge_message(msg.clone()));
    assert!(!store.merge_message(msg));
    assert_eq!(store.thread("C1").len(), 1);

    // An optimistic placeholder and its server copy count once
    let draft = Draft {
        conversation_id: "C1".to_string(),
        text: "thanks".to_string(),
        reply_to_message_id: None,
    };
    let mut local = optimistic::placeholder(&draft, Role::Admin, None, at(20));
    local.client_message_id = None;
    let local_id = local.local_id().unwrap().to_string();
    store.insert_optimistic(local);
    store.mark_sent("C1", &local_id);
    store.merge_message(server_msg("m2", "C1", Origin::Agent(Some(AgentRole::Admin)), "thanks", 29));
    let thanks: Vec<&Message> = store.thread("C1").iter().filter(|m| m.text == "thanks").collect();
    assert_eq!(thanks.len(), 1);
    assert!(!thanks[0].is_optimistic());
}

#[test]
fn test_thread_stays_sorted_after_every_merge() {
    let mut store = store_for(Actor::admin());
    for (i, secs) in [50, 10, 30, 30, 5, 70, 20].iter().enumerate() {
        store.merge_message(server_msg(&format!("m{}", i), "C1", Origin::Customer, "x", *secs));
        assert!(is_sorted(store.thread("C1")));
    }
    assert_eq!(store.thread("C1").len(), 7);
}

#[test]
fn test_read_override_hides_lagging_unread_until_qualifying_push() {
    let mut store = store_for(Actor::admin());
    store.apply_summary_snapshot(vec![summary("C1", None, 0), summary("C2", None, 0)]);
    store.open_conversation("C1");
    store.close_conversation();

    // Server lag: the poll still reports three unread messages
    store.apply_summary_snapshot(vec![summary("C1", None, 3), summary("C2", None, 0)]);
    assert!(!store.summary("C1").unwrap().has_unread());
    assert!(store.has_read_override("C1"));

    // A new customer message while C1 is not open clears the override
    let outcome = store.apply_push(push_customer("C1", "m9", "are you there?", 100));
    assert!(outcome.thread_changed);
    assert!(!store.has_read_override("C1"));
    assert_eq!(store.summary("C1").unwrap().unread_count, 1);

    store.apply_summary_snapshot(vec![summary("C1", None, 3), summary("C2", None, 0)]);
    assert_eq!(store.summary("C1").unwrap().unread_count, 3);
}

#[test]
fn test_read_override_expires_after_max_polls() {
    let mut store = ConversationStore::new(Actor::admin(), Duration::from_secs(30), 2);
    store.apply_summary_snapshot(vec![summary("C1", None, 0)]);
    store.open_conversation("C1");
    store.close_conversation();

    for _ in 0..2 {
        store.apply_summary_snapshot(vec![summary("C1", None, 4)]);
        assert!(!store.summary("C1").unwrap().has_unread());
    }
    store.apply_summary_snapshot(vec![summary("C1", None, 4)]);
    assert_eq!(store.summary("C1").unwrap().unread_count, 4);
}

#[test]
fn test_open_conversation_never_ages_or_counts_unread() {
    let mut store = ConversationStore::new(Actor::admin(), Duration::from_secs(30), 1);
    store.apply_summary_snapshot(vec![summary("C1", None, 2)]);
    store.open_conversation("C1");
    assert!(!store.summary("C1").unwrap().has_unread());

    for _ in 0..5 {
        store.apply_summary_snapshot(vec![summary("C1", None, 2)]);
    }
    assert!(!store.summary("C1").unwrap().has_unread());

    store.apply_push(push_customer("C1", "m1", "hello", 10));
    assert!(!store.summary("C1").unwrap().has_unread());
}

#[test]
fn test_agent_push_updates_preview_without_unread() {
    let mut store = store_for(Actor::admin());
    store.apply_summary_snapshot(vec![summary("C1", None, 0)]);
    let event = PushEvent::NewMessage(WireMessage {
        id: Some("a1".to_string()),
        conversation_id: Some("C1".to_string()),
        sender: Some("bot".to_string()),
        sender_role: Some("ai".to_string()),
        message: Some("We ship tomorrow".to_string()),
        timestamp: Some(serde_json::json!(at(40).timestamp_millis())),
        ..Default::default()
    });
    store.apply_push(event);
    let row = store.summary("C1").unwrap();
    assert_eq!(row.last_message, "We ship tomorrow");
    assert_eq!(row.last_time, Some(at(40)));
    assert!(!row.has_unread());
}

#[test]
fn test_duplicate_push_counts_once() {
    let mut store = store_for(Actor::admin());
    store.apply_summary_snapshot(vec![summary("C1", None, 0)]);
    store.apply_push(push_customer("C1", "m1", "hi", 10));
    store.apply_push(push_customer("C1", "m1", "hi", 10));
    assert_eq!(store.thread("C1").len(), 1);
    assert_eq!(store.summary("C1").unwrap().unread_count, 1);
}

#[test]
fn test_seller_never_sees_other_sellers_threads() {
    let mut store = store_for(Actor::seller("S1"));
    let outcome = store.apply_summary_snapshot(vec![
        summary("C1", None, 0),
        summary("C2", Some("S2"), 1),
        summary("C3", Some("S1"), 0),
    ]);
    assert_eq!(outcome.missing_threads, vec!["C1".to_string(), "C3".to_string()]);

    let ids: Vec<String> = store
        .visible_conversations("")
        .into_iter()
        .map(|r| r.conversation_id)
        .collect();
    assert!(ids.contains(&"C1".to_string()));
    assert!(ids.contains(&"C3".to_string()));
    assert!(!ids.contains(&"C2".to_string()));

    // Pushes for a thread the seller cannot see are ignored
    store.apply_meta(
        "C2",
        &MetaUpdate {
            conversation_id: Some("C2".to_string()),
            assigned_seller_id: Some("S2".to_string()),
            delivery_status: DeliveryStatus::Confirmed,
            assigned_at: None,
        },
    );
    assert!(!store.has_thread("C2"));
}

#[test]
fn test_unassigned_conversation_visible_to_every_seller() {
    for seller in ["S1", "S2", "S77"] {
        let mut store = store_for(Actor::seller(seller));
        store.apply_summary_snapshot(vec![summary("C1", None, 0)]);
        assert_eq!(store.visible_conversations("").len(), 1);
    }
}

#[test]
fn test_optimistic_lifecycle() {
    let mut store = store_for(Actor::admin());
    let draft = Draft {
        conversation_id: "C1".to_string(),
        text: "hello".to_string(),
        reply_to_message_id: None,
    };
    let placeholder = optimistic::placeholder(&draft, Role::Admin, None, at(0));
    let local_id = placeholder.local_id().unwrap().to_string();
    store.insert_optimistic(placeholder);

    let thread = store.thread("C1");
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].local.as_ref().unwrap().state, SendState::Sending);
    assert_eq!(store.read_marker("C1").ticks(&thread[0]), Some(Ticks::Sending));

    assert!(store.mark_sent("C1", &local_id));
    let thread = store.thread("C1");
    assert_eq!(thread[0].local.as_ref().unwrap().state, SendState::Sent);
    assert_eq!(store.read_marker("C1").ticks(&thread[0]), Some(Ticks::Sent));

    // Refresh returns the server copy without a correlation id
    let ticket = store.next_ticket();
    store.apply_thread_snapshot(
        "C1",
        ticket,
        page(vec![server_msg("s1", "C1", Origin::Agent(Some(AgentRole::Admin)), "hello", 4)]),
    );
    let hellos: Vec<&Message> = store.thread("C1").iter().filter(|m| m.text == "hello").collect();
    assert_eq!(hellos.len(), 1);
    assert!(!hellos[0].is_optimistic());
}

#[test]
fn test_repeated_text_is_not_confirmed_by_earlier_message() {
    let mut store = store_for(Actor::admin());
    let earlier = server_msg("s1", "C1", Origin::Agent(Some(AgentRole::Admin)), "ok", 100);
    store.merge_message(earlier.clone());

    let draft = Draft {
        conversation_id: "C1".to_string(),
        text: "ok".to_string(),
        reply_to_message_id: None,
    };
    let mut follow_up = optimistic::placeholder(&draft, Role::Admin, None, at(110));
    follow_up.client_message_id = None;
    let local_id = follow_up.local_id().unwrap().to_string();
    store.insert_optimistic(follow_up);
    assert!(store.mark_sent("C1", &local_id));

    // The server has not stored the follow-up yet
    let ticket = store.next_ticket();
    store.apply_thread_snapshot("C1", ticket, page(vec![earlier]));
    let oks: Vec<&Message> = store.thread("C1").iter().filter(|m| m.text == "ok").collect();
    assert_eq!(oks.len(), 2);
    assert!(oks[1].is_optimistic());
}

#[test]
fn test_push_does_not_retire_unacknowledged_placeholder() {
    let mut store = store_for(Actor::admin());
    let draft = Draft {
        conversation_id: "C1".to_string(),
        text: "checking".to_string(),
        reply_to_message_id: None,
    };
    let mut local = optimistic::placeholder(&draft, Role::Admin, None, at(0));
    local.client_message_id = None;
    let local_id = local.local_id().unwrap().to_string();
    store.insert_optimistic(local);

    // Still sending: an uncorrelated echo is kept alongside the placeholder
    let echo = server_msg("s1", "C1", Origin::Agent(Some(AgentRole::Admin)), "checking", 2);
    assert!(store.merge_message(echo.clone()));
    assert_eq!(store.thread("C1").len(), 2);

    // Once acknowledged, the next refresh folds them into one
    store.mark_sent("C1", &local_id);
    let ticket = store.next_ticket();
    store.apply_thread_snapshot("C1", ticket, page(vec![echo]));
    let thread = store.thread("C1");
    assert_eq!(thread.len(), 1);
    assert!(!thread[0].is_optimistic());
}

#[test]
fn test_snapshot_keeps_unconfirmed_placeholder() {
    let mut store = store_for(Actor::admin());
    let draft = Draft {
        conversation_id: "C1".to_string(),
        text: "on its way".to_string(),
        reply_to_message_id: None,
    };
    store.insert_optimistic(optimistic::placeholder(&draft, Role::Admin, None, at(50)));
    let ticket = store.next_ticket();
    store.apply_thread_snapshot(
        "C1",
        ticket,
        page(vec![server_msg("m1", "C1", Origin::Customer, "where is it?", 10)]),
    );
    let thread = store.thread("C1");
    assert_eq!(thread.len(), 2);
    assert!(thread[1].is_optimistic());
}

#[test]
fn test_failed_send_rolls_back() {
    let mut store = store_for(Actor::admin());
    store.merge_message(server_msg("m1", "C1", Origin::Customer, "hi", 0));
    let before: Vec<Message> = store.thread("C1").to_vec();

    let draft = Draft {
        conversation_id: "C1".to_string(),
        text: "hello".to_string(),
        reply_to_message_id: None,
    };
    let placeholder = optimistic::placeholder(&draft, Role::Seller, None, at(5));
    let local_id = placeholder.local_id().unwrap().to_string();
    store.insert_optimistic(placeholder);
    assert!(store.remove_optimistic("C1", &local_id));
    assert_eq!(store.thread("C1"), before.as_slice());
}

#[test]
fn test_concurrent_poll_and_push_converge() {
    let m1 = server_msg("m1", "C1", Origin::Customer, "one", 10);
    let m2 = server_msg("m2", "C1", Origin::Agent(Some(AgentRole::Seller)), "two", 20);
    let m3 = server_msg("m3", "C1", Origin::Customer, "three", 30);

    // Either arrival order ends in the same three-message thread
    for push_first in [true, false] {
        let mut store = store_for(Actor::admin());
        store.apply_summary_snapshot(vec![summary("C1", None, 0)]);
        let t0 = store.next_ticket();
        store.apply_thread_snapshot("C1", t0, page(vec![m1.clone(), m2.clone()]));

        let ticket = store.next_ticket();
        let push = push_customer("C1", "m3", "three", 30);
        if push_first {
            store.apply_push(push);
            store.apply_thread_snapshot("C1", ticket, page(vec![m1.clone(), m2.clone(), m3.clone()]));
        } else {
            store.apply_thread_snapshot("C1", ticket, page(vec![m1.clone(), m2.clone(), m3.clone()]));
            store.apply_push(push);
        }

        let ids: Vec<&str> = store.thread("C1").iter().filter_map(|m| m.id.as_deref()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }
}

#[test]
fn test_reassignment_evicts_open_conversation_for_seller() {
    let mut store = store_for(Actor::seller("S1"));
    store.apply_summary_snapshot(vec![summary("C1", None, 0)]);
    let ticket = store.next_ticket();
    store.apply_thread_snapshot("C1", ticket, page(vec![server_msg("m1", "C1", Origin::Customer, "hi", 1)]));
    store.open_conversation("C1");

    let outcome = store.apply_push(PushEvent::ConversationMeta(MetaUpdate {
        conversation_id: Some("C1".to_string()),
        assigned_seller_id: Some("S2".to_string()),
        delivery_status: DeliveryStatus::Hold,
        assigned_at: Some(at(60)),
    }));
    assert!(outcome.evicted);
    assert!(outcome.selection_cleared);
    assert!(!store.has_thread("C1"));
    assert!(store.summary("C1").is_none());
    assert_eq!(store.active(), None);
}

#[test]
fn test_reassignment_keeps_conversation_for_admin() {
    let mut store = store_for(Actor::admin());
    store.apply_summary_snapshot(vec![summary("C1", None, 0)]);
    store.open_conversation("C1");
    let outcome = store.apply_push(PushEvent::ConversationMeta(MetaUpdate {
        conversation_id: Some("C1".to_string()),
        assigned_seller_id: Some("S2".to_string()),
        delivery_status: DeliveryStatus::Delivered,
        assigned_at: None,
    }));
    assert!(!outcome.evicted);
    assert_eq!(store.active(), Some("C1"));
    assert_eq!(store.summary("C1").unwrap().delivery_status, DeliveryStatus::Delivered);
}

#[test]
fn test_seller_poll_evicts_threads_gone_from_server() {
    let mut store = store_for(Actor::seller("S1"));
    store.apply_summary_snapshot(vec![summary("C1", None, 0), summary("C2", None, 0)]);
    for id in ["C1", "C2"] {
        let ticket = store.next_ticket();
        store.apply_thread_snapshot(id, ticket, page(vec![server_msg(&format!("{}-m", id), id, Origin::Customer, "x", 1)]));
    }
    store.open_conversation("C2");

    let outcome = store.apply_summary_snapshot(vec![summary("C1", None, 0)]);
    assert_eq!(outcome.evicted, vec!["C2".to_string()]);
    assert!(outcome.selection_cleared);
    assert!(outcome.missing_threads.is_empty());
}

#[test]
fn test_watermarks_and_mark_unread() {
    let mut store = store_for(Actor::admin());
    store.apply_summary_snapshot(vec![summary("C1", None, 0)]);
    let t1 = store.next_ticket();
    store.apply_thread_snapshot(
        "C1",
        t1,
        MessagePage {
            messages: vec![server_msg("m1", "C1", Origin::Customer, "hi", 10)],
            read_at: Some(Some(at(20))),
            customer_read_at: Some(Some(at(15))),
        },
    );
    // An older watermark from a later poll does not regress
    let t2 = store.next_ticket();
    store.apply_thread_snapshot(
        "C1",
        t2,
        MessagePage {
            messages: vec![server_msg("m1", "C1", Origin::Customer, "hi", 10)],
            read_at: Some(Some(at(5))),
            customer_read_at: None,
        },
    );
    assert_eq!(store.read_marker("C1").read_at, Some(at(20)));
    assert_eq!(store.read_marker("C1").customer_read_at, Some(at(15)));

    store.open_conversation("C1");
    store.apply_mark_unread(
        "C1",
        &UnreadState {
            unread_count: 1,
            is_unread: true,
            read_at: Some(None),
        },
    );
    assert!(!store.has_read_override("C1"));
    assert_eq!(store.summary("C1").unwrap().unread_count, 1);
    assert_eq!(store.read_marker("C1").read_at, None);
    assert!(store.read_marker("C1").is_unseen(&store.thread("C1")[0]));
}

#[test]
fn test_search_and_preview_come_from_thread() {
    let mut store = store_for(Actor::admin());
    store.apply_summary_snapshot(vec![summary("C1", None, 0), summary("C2", None, 0)]);
    let mut latest = server_msg("m1", "C2", Origin::Customer, "newest text", 500);
    latest.customer_name = Some("Rumana".to_string());
    store.merge_message(latest);

    let rows = store.visible_conversations("");
    assert_eq!(rows[0].conversation_id, "C2");
    assert_eq!(rows[0].last_message, "newest text");
    assert_eq!(rows[0].customer_name, "Rumana");

    let found = store.visible_conversations("RUM");
    assert_eq!(found.len(), 1);
}
