//! Command dispatch: the single place that maps wire `type` tags to
//! behavior, plus the shared disconnect cleanup both transports run.

use crate::connection::ConnCtx;
use crate::state::AppState;
use crate::{auth, calls, contacts, messaging};
use msgr_protocol::{ClientCommand, ServerMessage};
use thiserror::Error;
use tracing::{debug, info, warn};

/// A violation that is fatal for the connection (spec'd protocol errors).
/// Recoverable problems (unknown command, bad field shapes) get an `error`
/// reply instead and leave the connection up.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("payload is not a JSON object")]
    MalformedPayload,
    #[error("payload has no type field")]
    MissingType,
}

/// Parse one decrypted payload and run its handler to completion.
pub async fn dispatch_payload(
    state: &AppState,
    ctx: &ConnCtx,
    payload: &[u8],
) -> Result<(), ProtocolViolation> {
    let value: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(_) => {
            warn!(conn = ctx.conn_id(), "received malformed JSON");
            ctx.handle.send(&ServerMessage::Error {
                reason: "Malformed JSON".to_owned(),
            });
            return Err(ProtocolViolation::MalformedPayload);
        }
    };
    if !value.is_object() {
        warn!(conn = ctx.conn_id(), "payload is not a JSON object");
        ctx.handle.send(&ServerMessage::Error {
            reason: "Malformed JSON".to_owned(),
        });
        return Err(ProtocolViolation::MalformedPayload);
    }
    let Some(command_type) = value.get("type").and_then(|t| t.as_str()).map(ToOwned::to_owned)
    else {
        warn!(conn = ctx.conn_id(), "payload has no type field");
        ctx.handle.send(&ServerMessage::Error {
            reason: "Malformed JSON".to_owned(),
        });
        return Err(ProtocolViolation::MissingType);
    };

    let command = match serde_json::from_value::<ClientCommand>(value) {
        Ok(command) => command,
        Err(e) => {
            if KNOWN_COMMANDS.contains(&command_type.as_str()) {
                debug!(conn = ctx.conn_id(), command = %command_type, error = %e, "bad command shape");
                ctx.handle.send(&ServerMessage::Error {
                    reason: "Invalid request format".to_owned(),
                });
            } else {
                info!(conn = ctx.conn_id(), command = %command_type, "unknown command");
                ctx.handle.send(&ServerMessage::Error {
                    reason: format!("Unknown command: {command_type}"),
                });
            }
            return Ok(());
        }
    };

    debug!(conn = ctx.conn_id(), command = %command_type, "dispatching");
    run_handler(state, ctx, command).await;
    Ok(())
}

const KNOWN_COMMANDS: &[&str] = &[
    "handshake",
    "register",
    "login",
    "token_login",
    "logout_request",
    "update_profile",
    "search_users",
    "add_contact_request",
    "contact_request_response",
    "private_message",
    "get_history",
    "delete_message",
    "edit_message",
    "typing",
    "message_delivered",
    "message_read",
    "call_request",
    "call_accepted",
    "call_rejected",
    "call_end",
    "get_call_history",
];

async fn run_handler(state: &AppState, ctx: &ConnCtx, command: ClientCommand) {
    match command {
        ClientCommand::Handshake { key } => auth::handle_handshake(ctx, &key),
        ClientCommand::Register {
            username,
            displayname,
            password,
        } => auth::handle_register(state, ctx, &username, &displayname, &password).await,
        ClientCommand::Login { username, password } => {
            auth::handle_login(state, ctx, &username, &password).await;
        }
        ClientCommand::TokenLogin { username, token } => {
            auth::handle_token_login(state, ctx, &username, &token).await;
        }
        ClientCommand::LogoutRequest => auth::handle_logout(state, ctx).await,
        ClientCommand::UpdateProfile {
            display_name,
            status_message,
            avatar_url,
        } => {
            auth::handle_update_profile(state, ctx, &display_name, &status_message, &avatar_url)
                .await;
        }
        ClientCommand::SearchUsers { term } => {
            contacts::handle_search_users(state, ctx, &term).await;
        }
        ClientCommand::AddContactRequest { username } => {
            contacts::handle_add_contact_request(state, ctx, &username).await;
        }
        ClientCommand::ContactRequestResponse {
            from_username,
            response,
        } => {
            contacts::handle_contact_request_response(state, ctx, &from_username, &response).await;
        }
        ClientCommand::PrivateMessage {
            from_user,
            to_user,
            payload,
            reply_to_id,
            temp_id,
            file_id,
            file_name,
            file_url,
        } => {
            messaging::handle_private_message(
                state,
                ctx,
                from_user.as_deref(),
                &to_user,
                &payload,
                reply_to_id,
                &temp_id,
                &file_id,
                &file_name,
                &file_url,
            )
            .await;
        }
        ClientCommand::GetHistory {
            with_user,
            before_id,
        } => messaging::handle_get_history(state, ctx, &with_user, before_id).await,
        ClientCommand::DeleteMessage { id } => {
            messaging::handle_delete_message(state, ctx, id).await;
        }
        ClientCommand::EditMessage { id, payload } => {
            messaging::handle_edit_message(state, ctx, id, &payload).await;
        }
        ClientCommand::Typing { to_user } => messaging::handle_typing(state, ctx, &to_user).await,
        ClientCommand::MessageDelivered { id } => {
            messaging::handle_receipt(state, ctx, messaging::Receipt::Delivered, id).await;
        }
        ClientCommand::MessageRead { id } => {
            messaging::handle_receipt(state, ctx, messaging::Receipt::Read, id).await;
        }
        ClientCommand::CallRequest {
            to,
            call_id,
            caller_ip,
            caller_port,
        } => calls::handle_call_request(state, ctx, &to, &call_id, &caller_ip, caller_port).await,
        ClientCommand::CallAccepted {
            call_id,
            callee_ip,
            callee_port,
        } => calls::handle_call_accepted(state, ctx, &call_id, &callee_ip, callee_port).await,
        ClientCommand::CallRejected { call_id } => {
            calls::handle_call_rejected(state, ctx, &call_id).await;
        }
        ClientCommand::CallEnd { call_id } => calls::handle_call_end(state, ctx, &call_id).await,
        ClientCommand::GetCallHistory => calls::handle_get_call_history(state, ctx).await,
    }
}

/// Shared teardown for both transports: drop the presence binding, record
/// `last_seen`, broadcast the shrunken online set, then complete any calls
/// the connection was part of.
pub async fn disconnect_cleanup(state: &AppState, conn_id: u64) {
    if let Some(username) = state.unbind_conn(conn_id).await {
        info!(username, "user disconnected");
        if let Err(e) = state.db.lock().await.touch_last_seen(&username) {
            warn!(username, error = %e, "failed to update last_seen");
        }
        state.broadcast_user_list().await;
    }
    calls::sweep_calls_for_conn(state, conn_id).await;
}
