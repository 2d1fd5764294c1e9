//! Contact graph: requests, responses, lists and user search.
//!
//! Edges are stored once per unordered pair in canonical form
//! (`user_id_1 < user_id_2`) with status pending / accepted / blocked.

use crate::connection::{ConnCtx, ConnHandle};
use crate::state::AppState;
use msgr_protocol::ServerMessage;
use tracing::{info, warn};

const STATUS_PENDING: i64 = 0;
const STATUS_ACCEPTED: i64 = 1;
const STATUS_BLOCKED: i64 = 2;

/// The canonical pair key for an undirected edge.
fn canonical_pair(id_a: i64, id_b: i64) -> (i64, i64) {
    (id_a.min(id_b), id_a.max(id_b))
}

pub async fn handle_search_users(state: &AppState, ctx: &ConnCtx, term: &str) {
    let Some(username) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "search request from unauthenticated connection");
        return;
    };
    let term = term.trim();
    if term.is_empty() {
        ctx.handle.send(&ServerMessage::SearchResults { users: Vec::new() });
        return;
    }
    let users = match state.db.lock().await.search_users(term, &username) {
        Ok(users) => users,
        Err(e) => {
            warn!(username, error = %e, "user search failed");
            Vec::new()
        }
    };
    ctx.handle.send(&ServerMessage::SearchResults { users });
}

pub async fn handle_add_contact_request(state: &AppState, ctx: &ConnCtx, to_username: &str) {
    let Some(from_username) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "contact request from unauthenticated connection");
        return;
    };
    let to_username = to_username.trim();
    let fail = |reason: &str| ServerMessage::AddContactFailure {
        reason: reason.to_owned(),
    };

    if to_username.is_empty() {
        ctx.handle.send(&fail("Invalid username."));
        return;
    }
    if from_username == to_username {
        ctx.handle.send(&fail("You cannot add yourself as a contact."));
        return;
    }

    let outcome = {
        let db = state.db.lock().await;
        add_contact_edge(&db, &from_username, to_username)
    };
    let (from_displayname, from_avatar_url) = match outcome {
        Ok(profile) => profile,
        Err(reason) => {
            ctx.handle.send(&fail(reason));
            return;
        }
    };
    info!(from = %from_username, to = %to_username, "contact request created");

    if let Some(target) = state.lookup(to_username).await {
        target.send(&ServerMessage::IncomingContactRequest {
            from_username: from_username.clone(),
            from_displayname,
            from_avatar_url,
        });
    }
    ctx.handle.send(&ServerMessage::AddContactSuccess {
        reason: format!("Contact request sent to {to_username}."),
    });
}

/// Insert the pending edge, returning the requester's display name and
/// avatar for the push notification.  Errors are the wire-facing reasons.
fn add_contact_edge(
    db: &crate::db::Db,
    from_username: &str,
    to_username: &str,
) -> Result<(String, String), &'static str> {
    let from_id = db
        .user_id(from_username)
        .map_err(|_| "Database error.")?
        .ok_or("The requested user does not exist.")?;
    let to_id = db
        .user_id(to_username)
        .map_err(|_| "Database error.")?
        .ok_or("The requested user does not exist.")?;

    let (id_1, id_2) = canonical_pair(from_id, to_id);
    if let Some(status) = db.contact_status(id_1, id_2).map_err(|_| "Database error.")? {
        return Err(match status {
            STATUS_PENDING => "A request to this user is already pending.",
            STATUS_ACCEPTED => "This user is already in your contacts.",
            STATUS_BLOCKED => "This contact is blocked.",
            _ => "A relationship with this user already exists.",
        });
    }
    db.insert_contact_request(id_1, id_2)
        .map_err(|_| "Database error.")?;

    let profile = db
        .profile(from_username)
        .ok()
        .flatten()
        .map(|p| (p.display_name, p.avatar_url))
        .unwrap_or_else(|| (from_username.to_owned(), String::new()));
    Ok(profile)
}

pub async fn handle_contact_request_response(
    state: &AppState,
    ctx: &ConnCtx,
    from_username: &str,
    response: &str,
) {
    let Some(responder) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "contact response from unauthenticated connection");
        return;
    };

    let pair = {
        let db = state.db.lock().await;
        let from_id = db.user_id(from_username).ok().flatten();
        let responder_id = db.user_id(&responder).ok().flatten();
        match (from_id, responder_id) {
            (Some(a), Some(b)) => Some(canonical_pair(a, b)),
            _ => None,
        }
    };
    let Some((id_1, id_2)) = pair else {
        warn!(from = %from_username, responder = %responder, "contact response for unknown user");
        return;
    };

    match response {
        "accepted" => {
            let accepted = state
                .db
                .lock()
                .await
                .accept_contact(id_1, id_2)
                .unwrap_or(false);
            if !accepted {
                return;
            }
            info!(responder = %responder, from = %from_username, "contact request accepted");
            // Both sides get a fresh contact list and online set.
            for username in [from_username, responder.as_str()] {
                if let Some(handle) = state.lookup(username).await {
                    send_contact_list(state, &handle, username).await;
                    let users = state.online_users().await;
                    handle.send(&ServerMessage::UserList { users });
                }
            }
        }
        "declined" => {
            if state.db.lock().await.delete_pending_contact(id_1, id_2).is_ok() {
                info!(responder = %responder, from = %from_username, "contact request declined");
            }
        }
        other => {
            warn!(response = other, "unknown contact response value");
        }
    }
}

/// Push the accepted-contact list; sent after login and after either side
/// accepts a request.
pub async fn send_contact_list(state: &AppState, handle: &ConnHandle, username: &str) {
    let users = {
        let db = state.db.lock().await;
        db.user_id(username)
            .ok()
            .flatten()
            .and_then(|id| db.contacts_of(id).ok())
            .unwrap_or_default()
    };
    handle.send(&ServerMessage::ContactList { users });
}

/// Push pending requests after login; nothing is sent when there are none.
pub async fn send_pending_requests(state: &AppState, handle: &ConnHandle, username: &str) {
    let requests = {
        let db = state.db.lock().await;
        db.user_id(username)
            .ok()
            .flatten()
            .and_then(|id| db.pending_requests_for(id).ok())
            .unwrap_or_default()
    };
    if requests.is_empty() {
        return;
    }
    handle.send(&ServerMessage::PendingRequestsList { requests });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pair_orders_ids() {
        assert_eq!(canonical_pair(5, 2), (2, 5));
        assert_eq!(canonical_pair(2, 5), (2, 5));
    }

    #[test]
    fn add_contact_edge_reports_existing_status() {
        let db = crate::db::Db::open_in_memory().expect("db");
        for name in ["alice", "bob"] {
            db.create_user(name, name, "h", "s").expect("create");
        }

        add_contact_edge(&db, "alice", "bob").expect("first request");
        assert_eq!(
            add_contact_edge(&db, "alice", "bob").expect_err("duplicate"),
            "A request to this user is already pending."
        );
        assert_eq!(
            add_contact_edge(&db, "bob", "alice").expect_err("reverse duplicate"),
            "A request to this user is already pending."
        );

        let a = db.user_id("alice").expect("id").expect("alice");
        let b = db.user_id("bob").expect("id").expect("bob");
        let (lo, hi) = canonical_pair(a, b);
        db.accept_contact(lo, hi).expect("accept");
        assert_eq!(
            add_contact_edge(&db, "alice", "bob").expect_err("accepted"),
            "This user is already in your contacts."
        );
    }

    #[test]
    fn add_contact_edge_rejects_unknown_target() {
        let db = crate::db::Db::open_in_memory().expect("db");
        db.create_user("alice", "alice", "h", "s").expect("create");
        assert_eq!(
            add_contact_edge(&db, "alice", "ghost").expect_err("unknown"),
            "The requested user does not exist."
        );
    }
}
