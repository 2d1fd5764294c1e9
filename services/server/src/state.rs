//! In-memory registries shared by all handlers.
//!
//! Three maps live here: the presence registry (both directions under one
//! lock so they can never disagree), the active-call table, and the token
//! cache.  The cache is advisory; the store stays authoritative on every
//! cold path.  Lock order where both are needed: presence before calls.

use crate::connection::ConnHandle;
use crate::db::Db;
use msgr_protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Live signalling state of one call; present only while the persisted
/// status is `ringing` or `connected`.
#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub call_id: String,
    pub caller: String,
    pub callee: String,
    pub caller_conn: u64,
    pub callee_conn: Option<u64>,
    pub caller_ip: String,
    pub caller_port: u16,
}

impl ActiveCall {
    pub fn involves_conn(&self, conn_id: u64) -> bool {
        self.caller_conn == conn_id || self.callee_conn == Some(conn_id)
    }

    /// The other participant's username, from `username`'s side.
    pub fn peer_of(&self, username: &str) -> &str {
        if self.caller == username {
            &self.callee
        } else {
            &self.caller
        }
    }
}

#[derive(Default)]
struct Presence {
    by_user: HashMap<String, ConnHandle>,
    by_conn: HashMap<u64, String>,
}

pub struct AppState {
    pub db: Mutex<Db>,
    presence: RwLock<Presence>,
    active_calls: RwLock<HashMap<String, ActiveCall>>,
    token_cache: RwLock<HashMap<String, String>>,
    next_conn_id: AtomicU64,
}

impl AppState {
    pub fn new(db: Db) -> Arc<Self> {
        Arc::new(Self {
            db: Mutex::new(db),
            presence: RwLock::new(Presence::default()),
            active_calls: RwLock::new(HashMap::new()),
            token_cache: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    // -- presence -----------------------------------------------------------

    /// Bind a username to a connection.  A second login for a live username
    /// replaces the binding; the prior connection is dropped from the
    /// registry but not closed.
    pub async fn bind(&self, username: &str, handle: ConnHandle) {
        let mut presence = self.presence.write().await;
        // A connection that re-authenticates sheds its previous username.
        if let Some(prev) = presence.by_conn.remove(&handle.id) {
            if prev != username {
                presence.by_user.remove(&prev);
            }
        }
        if let Some(old) = presence.by_user.insert(username.to_owned(), handle.clone()) {
            presence.by_conn.remove(&old.id);
        }
        presence.by_conn.insert(handle.id, username.to_owned());
    }

    /// Remove a connection from both directions.  Returns the username that
    /// was bound, if any.  A connection whose binding was already replaced
    /// by a newer login unbinds to nothing.
    pub async fn unbind_conn(&self, conn_id: u64) -> Option<String> {
        let mut presence = self.presence.write().await;
        let username = presence.by_conn.remove(&conn_id)?;
        if presence.by_user.get(&username).is_some_and(|h| h.id == conn_id) {
            presence.by_user.remove(&username);
        }
        Some(username)
    }

    pub async fn lookup(&self, username: &str) -> Option<ConnHandle> {
        self.presence.read().await.by_user.get(username).cloned()
    }

    pub async fn bound_username(&self, conn_id: u64) -> Option<String> {
        self.presence.read().await.by_conn.get(&conn_id).cloned()
    }

    pub async fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.presence.read().await.by_user.keys().cloned().collect();
        users.sort();
        users
    }

    /// Push the current online set to every bound connection.
    pub async fn broadcast_user_list(&self) {
        let (users, handles) = {
            let presence = self.presence.read().await;
            let mut users: Vec<String> = presence.by_user.keys().cloned().collect();
            users.sort();
            let handles: Vec<ConnHandle> = presence.by_user.values().cloned().collect();
            (users, handles)
        };
        let msg = ServerMessage::UserList { users };
        for handle in handles {
            handle.send(&msg);
        }
    }

    // -- active calls -------------------------------------------------------

    pub async fn add_call(&self, call: ActiveCall) {
        self.active_calls.write().await.insert(call.call_id.clone(), call);
    }

    pub async fn get_call(&self, call_id: &str) -> Option<ActiveCall> {
        self.active_calls.read().await.get(call_id).cloned()
    }

    pub async fn remove_call(&self, call_id: &str) -> Option<ActiveCall> {
        self.active_calls.write().await.remove(call_id)
    }

    /// Re-point the callee side at the connection that actually accepted.
    pub async fn set_callee_conn(&self, call_id: &str, conn_id: u64) {
        if let Some(call) = self.active_calls.write().await.get_mut(call_id) {
            call.callee_conn = Some(conn_id);
        }
    }

    /// Remove and return every active call the connection participates in.
    pub async fn take_calls_involving(&self, conn_id: u64) -> Vec<ActiveCall> {
        let mut calls = self.active_calls.write().await;
        let ids: Vec<String> = calls
            .values()
            .filter(|c| c.involves_conn(conn_id))
            .map(|c| c.call_id.clone())
            .collect();
        ids.into_iter().filter_map(|id| calls.remove(&id)).collect()
    }

    // -- token cache --------------------------------------------------------

    pub async fn cache_token(&self, username: &str, token: &str) {
        self.token_cache
            .write()
            .await
            .insert(username.to_owned(), token.to_owned());
    }

    pub async fn cached_token_matches(&self, username: &str, token: &str) -> bool {
        self.token_cache
            .read()
            .await
            .get(username)
            .is_some_and(|t| t == token)
    }

    pub async fn evict_token(&self, username: &str) {
        self.token_cache.write().await.remove(username);
    }
}
