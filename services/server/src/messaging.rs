//! Private messages: persistence, echo, relay, receipts, edit/delete,
//! history pagination and typing indicators.
//!
//! The send path is: persist first, echo the server-assigned row back to
//! the sender (with the client's `temp_id` so its optimistic row can be
//! reconciled), then relay to the recipient iff one is bound.  An offline
//! recipient needs nothing further; the row is already durable and shows
//! up in the next history fetch.

use crate::connection::ConnCtx;
use crate::db;
use crate::state::AppState;
use msgr_protocol::{ChatMessage, ServerMessage};
use tracing::{info, warn};

#[allow(clippy::too_many_arguments)]
pub async fn handle_private_message(
    state: &AppState,
    ctx: &ConnCtx,
    claimed_from: Option<&str>,
    to_user: &str,
    payload: &str,
    reply_to_id: i64,
    temp_id: &str,
    file_id: &str,
    file_name: &str,
    file_url: &str,
) {
    let Some(from_user) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "private message from unauthenticated connection");
        return;
    };
    // The sender identity comes from the binding; a mismatched claim is a
    // security event, not a recoverable input.
    if let Some(claimed) = claimed_from {
        if !claimed.is_empty() && claimed != from_user {
            warn!(
                bound = %from_user,
                claimed = %claimed,
                "impersonation attempt refused"
            );
            ctx.handle.send(&ServerMessage::Error {
                reason: "Authentication mismatch".to_owned(),
            });
            return;
        }
    }

    let timestamp = db::now_timestamp();
    let reply_to = (reply_to_id > 0).then_some(reply_to_id);
    let inserted = state.db.lock().await.insert_message(
        &from_user, to_user, payload, &timestamp, reply_to, file_id, file_name, file_url,
    );
    let id = match inserted {
        Ok(id) => id,
        Err(e) => {
            warn!(from = %from_user, error = %e, "failed to persist message");
            ctx.handle.send(&ServerMessage::MessageSendFailed {
                temp_id: temp_id.to_owned(),
                reason: "Database error".to_owned(),
            });
            return;
        }
    };
    info!(id, from = %from_user, to = %to_user, "message stored");

    let mut message = ChatMessage {
        id,
        from_user: from_user.clone(),
        to_user: to_user.to_owned(),
        payload: payload.to_owned(),
        timestamp,
        is_delivered: 0,
        is_read: 0,
        is_edited: 0,
        reply_to_id: reply_to,
        file_id: file_id.to_owned(),
        file_name: file_name.to_owned(),
        file_url: file_url.to_owned(),
        temp_id: Some(temp_id.to_owned()),
    };
    ctx.handle.send(&ServerMessage::PrivateMessage(message.clone()));

    // The recipient never sees the sender's temp_id.
    message.temp_id = None;
    if let Some(recipient) = state.lookup(to_user).await {
        recipient.send(&ServerMessage::PrivateMessage(message));
    }
}

/// Which receipt flag a notification flips.
#[derive(Clone, Copy)]
pub enum Receipt {
    Delivered,
    Read,
}

/// Flip the receipt flag (monotone, duplicate receipts are no-ops) and
/// forward the same-typed notification to the original sender when bound.
/// A store failure aborts the receipt; an offline sender just means the
/// flag waits in the row for the next history load.
pub async fn handle_receipt(state: &AppState, ctx: &ConnCtx, kind: Receipt, id: i64) {
    if state.bound_username(ctx.conn_id()).await.is_none() {
        warn!(conn = ctx.conn_id(), "receipt from unauthenticated connection");
        return;
    }

    let sender = {
        let db = state.db.lock().await;
        let updated = match kind {
            Receipt::Delivered => db.mark_delivered(id),
            Receipt::Read => db.mark_read(id),
        };
        if let Err(e) = updated {
            warn!(id, error = %e, "failed to update receipt flag");
            return;
        }
        db.message_parties(id)
    };
    let Ok(Some((sender, _))) = sender else {
        warn!(id, "receipt for unknown message id");
        return;
    };

    if let Some(handle) = state.lookup(&sender).await {
        let notification = match kind {
            Receipt::Delivered => ServerMessage::MessageDelivered { id },
            Receipt::Read => ServerMessage::MessageRead { id },
        };
        handle.send(&notification);
    }
}

pub async fn handle_edit_message(state: &AppState, ctx: &ConnCtx, id: i64, payload: &str) {
    let Some(requesting_user) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "edit request from unauthenticated connection");
        return;
    };
    if id == 0 {
        warn!("edit request with invalid message id");
        return;
    }

    let parties = {
        let db = state.db.lock().await;
        match db.message_parties(id) {
            Ok(Some((from_user, to_user))) => {
                if from_user != requesting_user {
                    warn!(
                        user = %requesting_user,
                        author = %from_user,
                        id,
                        "edit refused: not the author"
                    );
                    return;
                }
                if let Err(e) = db.edit_message(id, payload) {
                    warn!(id, error = %e, "failed to update message payload");
                    return;
                }
                (from_user, to_user)
            }
            _ => {
                warn!(id, "edit request for unknown message id");
                return;
            }
        }
    };
    info!(user = %requesting_user, id, "message edited");
    notify_both_sides(state, &parties, |with_user| ServerMessage::EditMessage {
        id,
        payload: payload.to_owned(),
        with_user,
    })
    .await;
}

pub async fn handle_delete_message(state: &AppState, ctx: &ConnCtx, id: i64) {
    let Some(requesting_user) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "delete request from unauthenticated connection");
        return;
    };
    if id == 0 {
        warn!("delete request with invalid message id");
        return;
    }

    let parties = {
        let db = state.db.lock().await;
        match db.message_parties(id) {
            Ok(Some((from_user, to_user))) => {
                if from_user != requesting_user {
                    warn!(
                        user = %requesting_user,
                        author = %from_user,
                        id,
                        "delete refused: not the author"
                    );
                    return;
                }
                if let Err(e) = db.delete_message(id) {
                    warn!(id, error = %e, "failed to delete message");
                    return;
                }
                (from_user, to_user)
            }
            _ => {
                warn!(id, "delete request for unknown message id");
                return;
            }
        }
    };
    info!(user = %requesting_user, id, "message deleted");
    notify_both_sides(state, &parties, |with_user| ServerMessage::DeleteMessage {
        id,
        with_user,
    })
    .await;
}

/// Send an edit/delete notification to both participants when bound; each
/// side receives the *other* participant as `with_user`.
async fn notify_both_sides<F>(state: &AppState, (from_user, to_user): &(String, String), make: F)
where
    F: Fn(String) -> ServerMessage,
{
    if let Some(handle) = state.lookup(from_user).await {
        handle.send(&make(to_user.clone()));
    }
    if let Some(handle) = state.lookup(to_user).await {
        handle.send(&make(from_user.clone()));
    }
}

pub async fn handle_get_history(state: &AppState, ctx: &ConnCtx, with_user: &str, before_id: i64) {
    let Some(requesting_user) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "history request from unauthenticated connection");
        return;
    };
    if with_user.is_empty() {
        warn!(user = %requesting_user, "history request missing with_user");
        return;
    }

    let history = state
        .db
        .lock()
        .await
        .history(&requesting_user, with_user, before_id)
        .unwrap_or_else(|e| {
            warn!(user = %requesting_user, error = %e, "failed to fetch history");
            Vec::new()
        });

    let response = if before_id > 0 {
        ServerMessage::OldHistoryData {
            with_user: with_user.to_owned(),
            history,
        }
    } else {
        ServerMessage::HistoryData {
            with_user: with_user.to_owned(),
            history,
        }
    };
    ctx.handle.send(&response);
}

/// Stateless relay; nothing is persisted and an offline recipient is not
/// an error.
pub async fn handle_typing(state: &AppState, ctx: &ConnCtx, to_user: &str) {
    let Some(from_user) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "typing indicator from unauthenticated connection");
        return;
    };
    if to_user.is_empty() {
        return;
    }
    if let Some(handle) = state.lookup(to_user).await {
        handle.send(&ServerMessage::Typing { from_user });
    }
}
