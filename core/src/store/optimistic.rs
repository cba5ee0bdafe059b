/// Optimistic sends: local placeholders shown before the server confirms them
use crate::auth::Role;
use crate::messenger_types::{AgentRole, LocalSend, Message, Origin, Platform, SendState};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Outgoing text reply as the user submitted it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub conversation_id: String,
    pub text: String,
    pub reply_to_message_id: Option<String>,
}

/// Build the placeholder for a draft. Its local id doubles as the
/// idempotency key sent with the reply so the server copy can be correlated.
pub fn placeholder(draft: &Draft, role: Role, sender_name: Option<String>, now: DateTime<Utc>) -> Message {
    let local_id = Uuid::new_v4().to_string();
    let agent = match role {
        Role::Admin => AgentRole::Admin,
        Role::Seller => AgentRole::Seller,
    };
    Message {
        id: None,
        conversation_id: draft.conversation_id.clone(),
        origin: Origin::Agent(Some(agent)),
        sender_name,
        customer_name: None,
        customer_profile_pic: None,
        text: draft.text.clone(),
        platform: Platform::Unknown,
        page_id: String::new(),
        timestamp: now,
        reply_to_message_id: draft.reply_to_message_id.clone(),
        client_message_id: Some(local_id.clone()),
        local: Some(LocalSend {
            local_id,
            state: SendState::Sending,
        }),
    }
}

/// Whether `server` is the confirmed copy of the optimistic `local` message.
///
/// A matching correlation id is conclusive. Without one, the server copy must
/// be an outbound message in the same conversation with identical text and a
/// timestamp no earlier than the placeholder and at most `window` after it.
pub fn is_server_copy(local: &Message, server: &Message, window: Duration) -> bool {
    if server.is_optimistic() || local.local.is_none() {
        return false;
    }
    if server.is_customer() || server.conversation_id != local.conversation_id {
        return false;
    }
    if let (Some(a), Some(b)) = (&local.client_message_id, &server.client_message_id) {
        return a == b;
    }
    if server.text != local.text {
        return false;
    }
    let skew = server.timestamp.signed_duration_since(local.timestamp);
    skew >= Duration::zero() && skew <= window
}

/// Whether `server` may replace `local` in a thread. Correlated copies retire
/// a placeholder in any state; heuristic matches only once it is `Sent`.
pub fn confirms(local: &Message, server: &Message, window: Duration) -> bool {
    let Some(state) = local.local.as_ref().map(|l| l.state) else {
        return false;
    };
    let correlated =
        local.client_message_id.is_some() && local.client_message_id == server.client_message_id;
    if !correlated && state != SendState::Sent {
        return false;
    }
    is_server_copy(local, server, window)
}

/// Drop optimistic entries that `server` rows confirm. Each server row absorbs
/// at most one placeholder. Heuristic matches only retire placeholders already
/// in the `Sent` state; correlated matches retire them in any state.
///
/// Returns the number of placeholders removed.
pub fn retire_confirmed(list: &mut Vec<Message>, window: Duration) -> usize {
    let server_rows: Vec<usize> = list
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.is_optimistic() && !m.is_customer())
        .map(|(i, _)| i)
        .collect();

    let mut claimed = vec![false; list.len()];
    let mut retired = vec![false; list.len()];

    for (i, local) in list.iter().enumerate() {
        if !local.is_optimistic() {
            continue;
        }
        for &j in &server_rows {
            if claimed[j] {
                continue;
            }
            if confirms(local, &list[j], window) {
                claimed[j] = true;
                retired[i] = true;
                break;
            }
        }
    }

    let before = list.len();
    let mut idx = 0;
    list.retain(|_| {
        let keep = !retired[idx];
        idx += 1;
        keep
    });
    before - list.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn draft(text: &str) -> Draft {
        Draft {
            conversation_id: "C1".to_string(),
            text: text.to_string(),
            reply_to_message_id: None,
        }
    }

    fn server_copy(text: &str, secs: i64) -> Message {
        Message {
            id: Some(format!("srv-{}", secs)),
            conversation_id: "C1".to_string(),
            origin: Origin::Agent(Some(AgentRole::Seller)),
            sender_name: None,
            customer_name: None,
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

    fn mark_sent(msg: &mut Message) {
        if let Some(local) = msg.local.as_mut() {
            local.state = SendState::Sent;
        }
    }

    #[test]
    fn test_placeholder_shape() {
        let msg = placeholder(&draft("hello"), Role::Seller, Some("Rina".to_string()), at(0));
        assert_eq!(msg.origin, Origin::Agent(Some(AgentRole::Seller)));
        assert_eq!(msg.local.as_ref().unwrap().state, SendState::Sending);
        assert_eq!(msg.client_message_id.as_deref(), msg.local_id());
    }

    #[test]
    fn test_heuristic_window() {
        let window = Duration::seconds(30);
        let local = placeholder(&draft("hello"), Role::Admin, None, at(0));
        assert!(is_server_copy(&local, &server_copy("hello", 12), window));
        assert!(is_server_copy(&local, &server_copy("hello", 30), window));
        assert!(!is_server_copy(&local, &server_copy("hello", 31), window));
        // An earlier server row is a previous message, not this one's copy
        assert!(!is_server_copy(&local, &server_copy("hello", -1), window));
        assert!(!is_server_copy(&local, &server_copy("hello", -10), window));
        assert!(!is_server_copy(&local, &server_copy("hello!", 1), window));

        let mut customer = server_copy("hello", 1);
        customer.origin = Origin::Customer;
        assert!(!is_server_copy(&local, &customer, window));
    }

    #[test]
    fn test_correlation_id_is_conclusive() {
        let window = Duration::seconds(30);
        let local = placeholder(&draft("hello"), Role::Admin, None, at(0));
        let mut echoed = server_copy("hello", 600);
        echoed.client_message_id = local.client_message_id.clone();
        assert!(is_server_copy(&local, &echoed, window));

        let mut other = server_copy("hello", 1);
        other.client_message_id = Some("someone-else".to_string());
        assert!(!is_server_copy(&local, &other, window));
    }

    #[test]
    fn test_retire_only_sent_on_heuristic() {
        let window = Duration::seconds(30);
        let mut sending = placeholder(&draft("hello"), Role::Admin, None, at(0));
        sending.client_message_id = None;
        let mut list = vec![sending, server_copy("hello", 2)];
        assert_eq!(retire_confirmed(&mut list, window), 0);

        mark_sent(&mut list[0]);
        assert_eq!(retire_confirmed(&mut list, window), 1);
        assert_eq!(list.len(), 1);
        assert!(!list[0].is_optimistic());
    }

    #[test]
    fn test_confirms_heuristic_needs_sent() {
        let window = Duration::seconds(30);
        let mut local = placeholder(&draft("hello"), Role::Seller, None, at(0));
        let mut echoed = server_copy("hello", 2);
        echoed.client_message_id = local.client_message_id.clone();
        assert!(confirms(&local, &echoed, window));

        local.client_message_id = None;
        assert!(!confirms(&local, &server_copy("hello", 2), window));
        mark_sent(&mut local);
        assert!(confirms(&local, &server_copy("hello", 2), window));
        assert!(!confirms(&server_copy("hello", 0), &server_copy("hello", 2), window));
    }

    #[test]
    fn test_one_server_row_absorbs_one_placeholder() {
        let window = Duration::seconds(30);
        let mut first = placeholder(&draft("ok"), Role::Admin, None, at(0));
        let mut second = placeholder(&draft("ok"), Role::Admin, None, at(3));
        first.client_message_id = None;
        second.client_message_id = None;
        mark_sent(&mut first);
        mark_sent(&mut second);
        let mut list = vec![first, second, server_copy("ok", 1)];
        assert_eq!(retire_confirmed(&mut list, window), 1);
        assert_eq!(list.iter().filter(|m| m.is_optimistic()).count(), 1);
    }
}
