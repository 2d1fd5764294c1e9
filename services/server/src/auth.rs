//! Account registration, password and token login, logout, profile updates,
//! and the crypto handshake.
//!
//! Login failures are deliberately generic: a missing account and a wrong
//! password both produce "Invalid credentials".

use crate::connection::ConnCtx;
use crate::contacts;
use crate::crypto;
use crate::state::AppState;
use base64::Engine as _;
use msgr_protocol::{ServerMessage, UnreadCount};
use tracing::{debug, info, warn};

/// Usernames that would read like SQL keywords are refused outright,
/// compared case-insensitively as substrings.
const SQL_KEYWORD_BLOCKLIST: &[&str] = &["select", "insert", "update", "delete", "drop", "union"];

pub fn validate_username(username: &str) -> Result<(), &'static str> {
    if username.len() < 3 || username.len() > 20 {
        return Err("Invalid username (3-20 characters required)");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("Username contains invalid characters (allowed: a-z, A-Z, 0-9, _, -)");
    }
    let lowered = username.to_ascii_lowercase();
    if SQL_KEYWORD_BLOCKLIST.iter().any(|kw| lowered.contains(kw)) {
        return Err("Username contains a reserved word");
    }
    Ok(())
}

/// First frame of a stream connection: the client's public key.  The reply
/// goes out in cleartext form; everything after it is sealed.  The message
/// transport has no crypto session, so the command is ignored there.
pub fn handle_handshake(ctx: &ConnCtx, key_b64: &str) {
    let Some(crypto) = &ctx.crypto else {
        debug!(conn = ctx.conn_id(), "handshake on message transport, ignoring");
        return;
    };
    let mut session = crypto.lock().expect("crypto lock");
    if session.is_ready() {
        warn!(conn = ctx.conn_id(), "handshake attempted on an already encrypted connection");
        return;
    }
    let Ok(client_key) = base64::engine::general_purpose::STANDARD.decode(key_b64) else {
        warn!(conn = ctx.conn_id(), "handshake key is not valid base64");
        return;
    };
    if let Err(e) = session.establish(&client_key) {
        warn!(conn = ctx.conn_id(), error = %e, "handshake rejected");
        return;
    }
    let reply = ServerMessage::Handshake {
        key: session.public_key_b64(),
    };
    drop(session);
    ctx.handle.send_clear(&reply);
    info!(conn = ctx.conn_id(), "handshake complete, connection secured");
}

pub async fn handle_register(
    state: &AppState,
    ctx: &ConnCtx,
    username: &str,
    displayname: &str,
    password: &str,
) {
    let username = username.trim();
    let displayname = displayname.trim();

    if let Err(reason) = validate_username(username) {
        warn!(username, "registration rejected: invalid username");
        ctx.handle.send(&ServerMessage::RegisterFailure {
            reason: reason.to_owned(),
        });
        return;
    }
    let displayname = if displayname.is_empty() { username } else { displayname };

    let salt = crypto::generate_salt();
    let password_hash = crypto::hash_password(password, &salt);

    let created = state
        .db
        .lock()
        .await
        .create_user(username, displayname, &password_hash, &hex::encode(salt));
    match created {
        Ok(true) => {
            info!(username, "new user registered");
            ctx.handle.send(&ServerMessage::RegisterSuccess {
                username: username.to_owned(),
                displayname: displayname.to_owned(),
            });
            state.broadcast_user_list().await;
        }
        Ok(false) => {
            warn!(username, "registration failed: username already taken");
            ctx.handle.send(&ServerMessage::RegisterFailure {
                reason: "Username already exists".to_owned(),
            });
        }
        Err(e) => {
            warn!(username, error = %e, "registration failed: store error");
            ctx.handle.send(&ServerMessage::RegisterFailure {
                reason: "Database error".to_owned(),
            });
        }
    }
}

pub async fn handle_login(state: &AppState, ctx: &ConnCtx, username: &str, password: &str) {
    let username = username.trim();
    let fail = |reason: &str| ServerMessage::LoginFailure {
        reason: reason.to_owned(),
    };

    if username.is_empty() {
        ctx.handle.send(&fail("Username cannot be empty"));
        return;
    }
    if password.is_empty() {
        ctx.handle.send(&fail("Password cannot be empty"));
        return;
    }

    let row = match state.db.lock().await.auth_row(username) {
        Ok(row) => row,
        Err(e) => {
            warn!(username, error = %e, "login failed: store error");
            ctx.handle.send(&fail("Database error"));
            return;
        }
    };
    // Unknown user and wrong password must be indistinguishable.
    let Some(row) = row else {
        warn!(username, "login failed: unknown user");
        ctx.handle.send(&fail("Invalid credentials"));
        return;
    };
    let Ok(salt) = hex::decode(&row.salt) else {
        warn!(username, "login failed: stored salt is not valid hex");
        ctx.handle.send(&fail("Server error"));
        return;
    };
    if crypto::hash_password(password, &salt) != row.password_hash {
        warn!(username, "login failed: incorrect password");
        ctx.handle.send(&fail("Invalid credentials"));
        return;
    }

    let token = issue_token(state, username).await;
    info!(username, "user authenticated");
    complete_login(
        state,
        ctx,
        username,
        &row.display_name,
        &row.status_message,
        &row.avatar_url,
        &token,
    )
    .await;
}

pub async fn handle_token_login(state: &AppState, ctx: &ConnCtx, username: &str, token: &str) {
    if !validate_token(state, username, token).await {
        warn!(username, "token login rejected");
        ctx.handle.send(&ServerMessage::TokenLoginFailure {
            reason: "Invalid or expired token".to_owned(),
        });
        return;
    }
    let profile = match state.db.lock().await.profile(username) {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            ctx.handle.send(&ServerMessage::TokenLoginFailure {
                reason: "User not found".to_owned(),
            });
            return;
        }
        Err(e) => {
            warn!(username, error = %e, "token login failed: store error");
            ctx.handle.send(&ServerMessage::TokenLoginFailure {
                reason: "Database error".to_owned(),
            });
            return;
        }
    };
    info!(username, "user authenticated via token");
    complete_login(
        state,
        ctx,
        username,
        &profile.display_name,
        &profile.status_message,
        &profile.avatar_url,
        token,
    )
    .await;
}

pub async fn handle_logout(state: &AppState, ctx: &ConnCtx) {
    let Some(username) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "logout request from unauthenticated connection");
        ctx.handle.send(&ServerMessage::LogoutFailure {
            reason: "Not authenticated".to_owned(),
        });
        return;
    };

    state.evict_token(&username).await;
    if let Err(e) = state.db.lock().await.delete_token(&username) {
        warn!(username, error = %e, "failed to delete token");
        ctx.handle.send(&ServerMessage::LogoutFailure {
            reason: "Database error".to_owned(),
        });
        return;
    }

    state.unbind_conn(ctx.conn_id()).await;
    state.broadcast_user_list().await;
    ctx.handle.send(&ServerMessage::LogoutSuccess);
    info!(username, "user logged out");
}

pub async fn handle_update_profile(
    state: &AppState,
    ctx: &ConnCtx,
    display_name: &str,
    status_message: &str,
    avatar_url: &str,
) {
    let Some(username) = state.bound_username(ctx.conn_id()).await else {
        warn!(conn = ctx.conn_id(), "profile update from unauthenticated connection");
        return;
    };

    let updated = state
        .db
        .lock()
        .await
        .update_profile(&username, display_name, status_message, avatar_url);
    match updated {
        Ok(()) => {
            info!(username, "profile updated");
            ctx.handle.send(&ServerMessage::UpdateProfileResult {
                success: true,
                username: Some(username),
                displayname: Some(display_name.to_owned()),
                status_message: Some(status_message.to_owned()),
                avatar_url: Some(avatar_url.to_owned()),
                reason: None,
            });
        }
        Err(e) => {
            warn!(username, error = %e, "profile update failed");
            ctx.handle.send(&ServerMessage::UpdateProfileResult {
                success: false,
                username: None,
                displayname: None,
                status_message: None,
                avatar_url: None,
                reason: Some("Database error".to_owned()),
            });
        }
    }
}

/// Shared tail of both login paths: bind the connection, reply
/// `login_success`, push the contact list, pending requests and unread
/// counts, then broadcast the new online set.
async fn complete_login(
    state: &AppState,
    ctx: &ConnCtx,
    username: &str,
    displayname: &str,
    statusmessage: &str,
    avatar_url: &str,
    token: &str,
) {
    state.bind(username, ctx.handle.clone()).await;
    ctx.handle.send(&ServerMessage::LoginSuccess {
        username: username.to_owned(),
        displayname: displayname.to_owned(),
        statusmessage: statusmessage.to_owned(),
        avatar_url: avatar_url.to_owned(),
        token: token.to_owned(),
    });

    contacts::send_contact_list(state, &ctx.handle, username).await;
    contacts::send_pending_requests(state, &ctx.handle, username).await;
    send_unread_counts(state, ctx, username).await;

    state.broadcast_user_list().await;
}

async fn send_unread_counts(state: &AppState, ctx: &ConnCtx, username: &str) {
    match state.db.lock().await.unread_counts(username) {
        Ok(counts) => {
            let counts = counts
                .into_iter()
                .map(|(username, count)| UnreadCount { username, count })
                .collect();
            ctx.handle.send(&ServerMessage::UnreadCounts { counts });
        }
        Err(e) => warn!(username, error = %e, "failed to gather unread counts"),
    }
}

/// Issue and persist a fresh token; the previous row for the username is
/// replaced.  A store failure leaves the cached token usable for this
/// process lifetime only.
async fn issue_token(state: &AppState, username: &str) -> String {
    let token = crypto::generate_token(username);
    if let Err(e) = state.db.lock().await.upsert_token(username, &token) {
        warn!(username, error = %e, "failed to persist token");
    }
    state.cache_token(username, &token).await;
    token
}

/// A token is valid iff the cache matches, or the store holds the same
/// token unexpired.  Expired rows are deleted on sight.
async fn validate_token(state: &AppState, username: &str, token: &str) -> bool {
    if state.cached_token_matches(username, token).await {
        return true;
    }
    let db = state.db.lock().await;
    let Ok(Some((stored, expires_at))) = db.token_row(username) else {
        return false;
    };
    let expired = crate::db::parse_timestamp(&expires_at)
        .is_none_or(|t| t < chrono::Utc::now().naive_utc());
    if expired {
        debug!(username, "token expired, deleting row");
        let _ = db.delete_token(username);
        return false;
    }
    if stored != token {
        return false;
    }
    drop(db);
    state.cache_token(username, token).await;
    true
}
