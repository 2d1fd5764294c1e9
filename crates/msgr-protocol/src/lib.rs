// msgr-protocol: Messenger wire protocol types and serialization.
//
// Every message on the wire is a JSON object with a top-level `type` field
// used for discriminated deserialization.  The enum variants map 1:1 to the
// frozen command and response names; the field spellings (`fromUser`,
// `with_user`, `temp_id`, ...) are part of the contract and must not change.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// The full server view of a chat message.
///
/// Used three ways: as the echo back to the sender (with `temp_id` set so the
/// client can reconcile its optimistic row), as the relayed copy to the
/// recipient (`temp_id` stripped), and as one entry of a history response.
///
/// Status flags are serialized as 0/1 integers, matching the stored columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    #[serde(rename = "fromUser")]
    pub from_user: String,
    #[serde(rename = "toUser")]
    pub to_user: String,
    pub payload: String,
    /// Server-issued, `YYYY-MM-DDTHH:MM:SS` UTC.
    pub timestamp: String,
    pub is_delivered: i64,
    pub is_read: i64,
    pub is_edited: i64,
    /// Id of the quoted message; absent when the message is not a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<i64>,
    /// Attachment triple; empty strings when the message carries no file.
    /// The server never dereferences these, it only stores and relays them.
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_url: String,
    /// Client-chosen reconciliation id; present only on the sender echo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

/// One entry of a `contact_list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactEntry {
    pub username: String,
    pub displayname: String,
    #[serde(default)]
    pub last_seen: String,
    #[serde(default)]
    pub statusmessage: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// One entry of a `search_results` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub username: String,
    pub displayname: String,
}

/// One entry of a `pending_requests_list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    #[serde(rename = "fromUsername")]
    pub from_username: String,
    #[serde(rename = "fromDisplayname")]
    pub from_displayname: String,
    #[serde(rename = "fromAvatarUrl", default)]
    pub from_avatar_url: String,
}

/// One entry of an `unread_counts` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub username: String,
    pub count: i64,
}

/// One entry of a `call_history` response.
///
/// `call_type` is derived per requester: "outgoing" when they placed the
/// call, "incoming" otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallHistoryEntry {
    pub call_id: String,
    pub caller: String,
    pub callee: String,
    /// One of `ringing`, `connected`, `completed`, `missed`, `rejected`.
    pub status: String,
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    pub duration_seconds: i64,
    pub call_type: String,
}

// ---------------------------------------------------------------------------
// Client -> Server commands
// ---------------------------------------------------------------------------

/// All commands a client may send.
///
/// Deserializes using the `type` field as a tag:
///
/// ```json
/// { "type": "private_message", "toUser": "bob", "payload": "hi", ... }
/// ```
///
/// Identity rule: any `fromUser`-style field here is advisory only.  The
/// server derives the sender from the connection's bound username and
/// refuses mismatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ClientCommand {
    /// First frame on a fresh stream connection: the client's X25519 public
    /// key, base64 of exactly 32 bytes.  Ignored on the WebSocket transport.
    Handshake {
        key: String,
    },
    Register {
        username: String,
        #[serde(default)]
        displayname: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    TokenLogin {
        username: String,
        token: String,
    },
    LogoutRequest,
    UpdateProfile {
        #[serde(default)]
        display_name: String,
        #[serde(default)]
        status_message: String,
        #[serde(default)]
        avatar_url: String,
    },
    SearchUsers {
        #[serde(default)]
        term: String,
    },
    AddContactRequest {
        username: String,
    },
    ContactRequestResponse {
        #[serde(rename = "fromUsername")]
        from_username: String,
        response: String,
    },
    PrivateMessage {
        #[serde(rename = "fromUser", default)]
        from_user: Option<String>,
        #[serde(rename = "toUser")]
        to_user: String,
        payload: String,
        /// 0 means "not a reply".
        #[serde(default)]
        reply_to_id: i64,
        #[serde(default)]
        temp_id: String,
        #[serde(default)]
        file_id: String,
        #[serde(default)]
        file_name: String,
        #[serde(default)]
        file_url: String,
    },
    GetHistory {
        with_user: String,
        /// Pagination cursor; 0 (or absent) requests the newest page.
        #[serde(default)]
        before_id: i64,
    },
    DeleteMessage {
        id: i64,
    },
    EditMessage {
        id: i64,
        payload: String,
    },
    Typing {
        #[serde(rename = "toUser")]
        to_user: String,
    },
    MessageDelivered {
        id: i64,
    },
    MessageRead {
        id: i64,
    },
    CallRequest {
        to: String,
        call_id: String,
        caller_ip: String,
        caller_port: u16,
    },
    CallAccepted {
        call_id: String,
        callee_ip: String,
        callee_port: u16,
    },
    CallRejected {
        call_id: String,
    },
    CallEnd {
        call_id: String,
    },
    GetCallHistory,
}

// ---------------------------------------------------------------------------
// Server -> Client messages
// ---------------------------------------------------------------------------

/// All messages the server may send.
///
/// Serializes using the `type` field as a tag, mirroring [`ClientCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake reply: the server's X25519 public key.  Always sent in
    /// cleartext frame form; the client finalizes its key on receipt.
    Handshake {
        key: String,
    },
    RegisterSuccess {
        username: String,
        displayname: String,
    },
    RegisterFailure {
        reason: String,
    },
    LoginSuccess {
        username: String,
        displayname: String,
        statusmessage: String,
        avatar_url: String,
        /// 64 lowercase hex chars; valid for 30 days.
        token: String,
    },
    LoginFailure {
        reason: String,
    },
    TokenLoginFailure {
        reason: String,
    },
    LogoutSuccess,
    LogoutFailure {
        reason: String,
    },
    UpdateProfileResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        displayname: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Broadcast of the full online set after every presence change.
    UserList {
        users: Vec<String>,
    },
    ContactList {
        users: Vec<ContactEntry>,
    },
    PendingRequestsList {
        requests: Vec<PendingRequest>,
    },
    SearchResults {
        users: Vec<UserSummary>,
    },
    AddContactSuccess {
        reason: String,
    },
    AddContactFailure {
        reason: String,
    },
    IncomingContactRequest {
        #[serde(rename = "fromUsername")]
        from_username: String,
        #[serde(rename = "fromDisplayname")]
        from_displayname: String,
        #[serde(rename = "fromAvatarUrl", default)]
        from_avatar_url: String,
    },
    UnreadCounts {
        counts: Vec<UnreadCount>,
    },
    /// Initial page of a conversation (no cursor supplied).
    HistoryData {
        with_user: String,
        history: Vec<ChatMessage>,
    },
    /// Older page of a conversation (cursor supplied).
    OldHistoryData {
        with_user: String,
        history: Vec<ChatMessage>,
    },
    PrivateMessage(ChatMessage),
    MessageSendFailed {
        temp_id: String,
        reason: String,
    },
    EditMessage {
        id: i64,
        payload: String,
        /// The *other* participant from the receiving client's perspective,
        /// so it can locate the affected chat.
        with_user: String,
    },
    DeleteMessage {
        id: i64,
        with_user: String,
    },
    Typing {
        #[serde(rename = "fromUser")]
        from_user: String,
    },
    MessageDelivered {
        id: i64,
    },
    MessageRead {
        id: i64,
    },
    CallRequest {
        from: String,
        call_id: String,
        caller_ip: String,
        caller_port: u16,
    },
    CallAccepted {
        from: String,
        call_id: String,
        callee_ip: String,
        callee_port: u16,
    },
    CallRejected {
        call_id: String,
        from: String,
    },
    CallEnd {
        call_id: String,
        from: String,
    },
    CallHistory {
        calls: Vec<CallHistoryEntry>,
    },
    Error {
        reason: String,
    },
}

impl ServerMessage {
    /// The wire value of this message's `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Handshake { .. } => "handshake",
            ServerMessage::RegisterSuccess { .. } => "register_success",
            ServerMessage::RegisterFailure { .. } => "register_failure",
            ServerMessage::LoginSuccess { .. } => "login_success",
            ServerMessage::LoginFailure { .. } => "login_failure",
            ServerMessage::TokenLoginFailure { .. } => "token_login_failure",
            ServerMessage::LogoutSuccess => "logout_success",
            ServerMessage::LogoutFailure { .. } => "logout_failure",
            ServerMessage::UpdateProfileResult { .. } => "update_profile_result",
            ServerMessage::UserList { .. } => "user_list",
            ServerMessage::ContactList { .. } => "contact_list",
            ServerMessage::PendingRequestsList { .. } => "pending_requests_list",
            ServerMessage::SearchResults { .. } => "search_results",
            ServerMessage::AddContactSuccess { .. } => "add_contact_success",
            ServerMessage::AddContactFailure { .. } => "add_contact_failure",
            ServerMessage::IncomingContactRequest { .. } => "incoming_contact_request",
            ServerMessage::UnreadCounts { .. } => "unread_counts",
            ServerMessage::HistoryData { .. } => "history_data",
            ServerMessage::OldHistoryData { .. } => "old_history_data",
            ServerMessage::PrivateMessage(_) => "private_message",
            ServerMessage::MessageSendFailed { .. } => "message_send_failed",
            ServerMessage::EditMessage { .. } => "edit_message",
            ServerMessage::DeleteMessage { .. } => "delete_message",
            ServerMessage::Typing { .. } => "typing",
            ServerMessage::MessageDelivered { .. } => "message_delivered",
            ServerMessage::MessageRead { .. } => "message_read",
            ServerMessage::CallRequest { .. } => "call_request",
            ServerMessage::CallAccepted { .. } => "call_accepted",
            ServerMessage::CallRejected { .. } => "call_rejected",
            ServerMessage::CallEnd { .. } => "call_end",
            ServerMessage::CallHistory { .. } => "call_history",
            ServerMessage::Error { .. } => "error",
        }
    }
}
