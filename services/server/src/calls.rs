//! Call signalling: the ringing -> connected -> terminal state machine,
//! the active-call table, and the persistent call log.
//!
//! The server never touches media; it relays the `(ip, port)` hints the
//! peers exchange and keeps the call record honest.

use crate::connection::ConnCtx;
use crate::state::{ActiveCall, AppState};
use msgr_protocol::ServerMessage;
use tracing::{info, warn};

pub async fn handle_call_request(
    state: &AppState,
    ctx: &ConnCtx,
    to_user: &str,
    call_id: &str,
    caller_ip: &str,
    caller_port: u16,
) {
    let Some(caller) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "call request from unauthenticated connection");
        return;
    };

    if let Err(e) = state
        .db
        .lock()
        .await
        .create_call(call_id, &caller, to_user, caller_ip, caller_port)
    {
        warn!(call_id, error = %e, "failed to create call record");
        ctx.handle.send(&ServerMessage::Error {
            reason: "Database error".to_owned(),
        });
        return;
    }

    let Some(callee_handle) = state.lookup(to_user).await else {
        // Offline callee: terminal immediately, never enters the active
        // table.  The caller infers the timeout locally.
        info!(call_id, callee = %to_user, "callee offline, call marked missed");
        if let Err(e) = state.db.lock().await.call_ended(call_id, "missed") {
            warn!(call_id, error = %e, "failed to mark call missed");
        }
        return;
    };

    state
        .add_call(ActiveCall {
            call_id: call_id.to_owned(),
            caller: caller.clone(),
            callee: to_user.to_owned(),
            caller_conn: ctx.conn_id(),
            callee_conn: Some(callee_handle.id),
            caller_ip: caller_ip.to_owned(),
            caller_port,
        })
        .await;

    callee_handle.send(&ServerMessage::CallRequest {
        from: caller.clone(),
        call_id: call_id.to_owned(),
        caller_ip: caller_ip.to_owned(),
        caller_port,
    });
    info!(call_id, caller = %caller, callee = %to_user, "call ringing");
}

pub async fn handle_call_accepted(
    state: &AppState,
    ctx: &ConnCtx,
    call_id: &str,
    callee_ip: &str,
    callee_port: u16,
) {
    let Some(responding_user) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "call accept from unauthenticated connection");
        return;
    };
    let Some(call) = state.get_call(call_id).await else {
        warn!(call_id, "accept for unknown call id");
        return;
    };

    if let Err(e) = state
        .db
        .lock()
        .await
        .call_connected(call_id, callee_ip, callee_port)
    {
        warn!(call_id, error = %e, "failed to mark call connected");
        return;
    }
    state.set_callee_conn(call_id, ctx.conn_id()).await;

    if let Some(caller_handle) = state.lookup(&call.caller).await {
        caller_handle.send(&ServerMessage::CallAccepted {
            from: responding_user,
            call_id: call_id.to_owned(),
            callee_ip: callee_ip.to_owned(),
            callee_port,
        });
        info!(call_id, "call connected");
    } else {
        warn!(call_id, "caller vanished before the accept could be relayed");
    }
}

pub async fn handle_call_rejected(state: &AppState, ctx: &ConnCtx, call_id: &str) {
    let Some(responding_user) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "call reject from unauthenticated connection");
        return;
    };
    let Some(call) = state.get_call(call_id).await else {
        warn!(call_id, "reject for unknown call id");
        return;
    };
    // Only the ringing side may reject.
    if call.callee != responding_user {
        warn!(
            call_id,
            user = %responding_user,
            "unauthorized call rejection refused"
        );
        return;
    }

    if let Err(e) = state.db.lock().await.call_ended(call_id, "rejected") {
        warn!(call_id, error = %e, "failed to mark call rejected");
        return;
    }
    state.remove_call(call_id).await;
    info!(call_id, callee = %responding_user, "call rejected");

    if let Some(caller_handle) = state.lookup(&call.caller).await {
        caller_handle.send(&ServerMessage::CallRejected {
            call_id: call_id.to_owned(),
            from: responding_user,
        });
    }
}

pub async fn handle_call_end(state: &AppState, ctx: &ConnCtx, call_id: &str) {
    let Some(current_user) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "call end from unauthenticated connection");
        return;
    };
    let Some(call) = state.get_call(call_id).await else {
        warn!(call_id, "end for unknown call id");
        return;
    };
    if call.caller != current_user && call.callee != current_user {
        warn!(call_id, user = %current_user, "unauthorized call end refused");
        return;
    }

    if let Err(e) = state.db.lock().await.call_ended(call_id, "completed") {
        warn!(call_id, error = %e, "failed to mark call completed");
        return;
    }
    state.remove_call(call_id).await;
    info!(call_id, ended_by = %current_user, "call completed");

    let peer = call.peer_of(&current_user);
    if let Some(peer_handle) = state.lookup(peer).await {
        peer_handle.send(&ServerMessage::CallEnd {
            call_id: call_id.to_owned(),
            from: current_user,
        });
    }
}

pub async fn handle_get_call_history(state: &AppState, ctx: &ConnCtx) {
    let Some(username) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "call history request from unauthenticated connection");
        return;
    };
    match state.db.lock().await.call_history(&username) {
        Ok(calls) => ctx.handle.send(&ServerMessage::CallHistory { calls }),
        Err(e) => {
            warn!(username, error = %e, "failed to fetch call history");
            ctx.handle.send(&ServerMessage::Error {
                reason: "Failed to fetch call history".to_owned(),
            });
        }
    }
}

/// Disconnect sweep: complete every active call the departing connection
/// participated in, exactly as a voluntary `call_end` from that side.
pub async fn sweep_calls_for_conn(state: &AppState, conn_id: u64) {
    for call in state.take_calls_involving(conn_id).await {
        let (departed, peer) = if call.caller_conn == conn_id {
            (&call.caller, &call.callee)
        } else {
            (&call.callee, &call.caller)
        };
        info!(call_id = %call.call_id, departed = %departed, "terminating call after disconnect");

        if let Err(e) = state.db.lock().await.call_ended(&call.call_id, "completed") {
            warn!(call_id = %call.call_id, error = %e, "failed to complete call during sweep");
        }
        if let Some(peer_handle) = state.lookup(peer).await {
            peer_handle.send(&ServerMessage::CallEnd {
                call_id: call.call_id.clone(),
                from: departed.clone(),
            });
        }
    }
}
