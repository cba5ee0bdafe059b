/// Role-based conversation visibility, search and ordering for the list view
use crate::auth::Actor;
use crate::messenger_types::ConversationSummary;

/// Admins see everything. Sellers see unassigned conversations and their own.
pub fn is_visible(actor: &Actor, assigned_seller_id: Option<&str>) -> bool {
    if actor.is_admin() {
        return true;
    }
    match assigned_seller_id {
        None => true,
        Some(assigned) => actor.seller_id.as_deref() == Some(assigned),
    }
}

/// Case-insensitive substring match on the customer's name
pub fn matches_search(summary: &ConversationSummary, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    summary.customer_name.to_lowercase().contains(&query)
}

/// Visible conversations matching `query`, most recent activity first
pub fn filter_conversations<'a, I>(rows: I, actor: &Actor, query: &str) -> Vec<ConversationSummary>
where
    I: IntoIterator<Item = &'a ConversationSummary>,
{
    let mut out: Vec<ConversationSummary> = rows
        .into_iter()
        .filter(|row| is_visible(actor, row.assigned_seller_id.as_deref()))
        .filter(|row| matches_search(row, query))
        .cloned()
        .collect();
    // `None` sorts below any instant, so undated rows sink to the bottom
    out.sort_by(|a, b| {
        b.last_time
            .cmp(&a.last_time)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
    });
    out
}
