//! Contract tests over literal wire JSON: every example here is frozen —
//! a failure means a client-visible protocol break, not a refactor detail.

use msgr_protocol::{ClientCommand, ServerMessage};
use serde_json::json;

fn parse(json_text: &str) -> ClientCommand {
    serde_json::from_str(json_text)
        .unwrap_or_else(|e| panic!("failed to parse {json_text}: {e}"))
}

#[test]
fn every_client_command_tag_parses() {
    let examples = [
        r#"{"type":"handshake","key":"QUJDREVGR0hJSktMTU5PUFFSU1RVVldYWVpBQkNERUY="}"#,
        r#"{"type":"register","username":"alice","displayname":"Alice","password":"pw"}"#,
        r#"{"type":"login","username":"alice","password":"pw"}"#,
        r#"{"type":"token_login","username":"alice","token":"abc123"}"#,
        r#"{"type":"logout_request"}"#,
        r#"{"type":"update_profile","display_name":"A","status_message":"hi","avatar_url":""}"#,
        r#"{"type":"search_users","term":"bo"}"#,
        r#"{"type":"add_contact_request","username":"bob"}"#,
        r#"{"type":"contact_request_response","fromUsername":"alice","response":"accepted"}"#,
        r#"{"type":"private_message","fromUser":"alice","toUser":"bob","payload":"hi","reply_to_id":0,"temp_id":"t-1"}"#,
        r#"{"type":"get_history","with_user":"bob","before_id":0}"#,
        r#"{"type":"delete_message","id":7}"#,
        r#"{"type":"edit_message","id":7,"payload":"new"}"#,
        r#"{"type":"typing","toUser":"bob"}"#,
        r#"{"type":"message_delivered","id":7}"#,
        r#"{"type":"message_read","id":7}"#,
        r#"{"type":"call_request","to":"bob","call_id":"c-1","caller_ip":"1.2.3.4","caller_port":40000}"#,
        r#"{"type":"call_accepted","call_id":"c-1","callee_ip":"5.6.7.8","callee_port":40001}"#,
        r#"{"type":"call_rejected","call_id":"c-1"}"#,
        r#"{"type":"call_end","call_id":"c-1"}"#,
        r#"{"type":"get_call_history"}"#,
    ];
    for example in examples {
        parse(example);
    }
}

#[test]
fn optional_message_fields_default_when_absent() {
    let cmd = parse(r#"{"type":"private_message","toUser":"bob","payload":"hi"}"#);
    match cmd {
        ClientCommand::PrivateMessage {
            from_user,
            reply_to_id,
            temp_id,
            file_id,
            ..
        } => {
            assert_eq!(from_user, None);
            assert_eq!(reply_to_id, 0);
            assert_eq!(temp_id, "");
            assert_eq!(file_id, "");
        }
        other => panic!("expected private_message, got {other:?}"),
    }

    let cmd = parse(r#"{"type":"get_history","with_user":"bob"}"#);
    match cmd {
        ClientCommand::GetHistory { before_id, .. } => assert_eq!(before_id, 0),
        other => panic!("expected get_history, got {other:?}"),
    }
}

#[test]
fn file_attachment_triple_is_carried_opaquely() {
    let cmd = parse(
        r#"{"type":"private_message","toUser":"bob","payload":"","temp_id":"t-1",
            "file_id":"f-9","file_name":"cat.png","file_url":"https://files.test/f-9"}"#,
    );
    match cmd {
        ClientCommand::PrivateMessage {
            file_id,
            file_name,
            file_url,
            ..
        } => {
            assert_eq!(file_id, "f-9");
            assert_eq!(file_name, "cat.png");
            assert_eq!(file_url, "https://files.test/f-9");
        }
        other => panic!("expected private_message, got {other:?}"),
    }
}

#[test]
fn login_success_shape_is_frozen() {
    let msg = ServerMessage::LoginSuccess {
        username: "alice".to_owned(),
        displayname: "Alice".to_owned(),
        statusmessage: "hi".to_owned(),
        avatar_url: String::new(),
        token: "ab".repeat(32),
    };
    let value = serde_json::to_value(&msg).expect("serialize");
    assert_eq!(
        value,
        json!({
            "type": "login_success",
            "username": "alice",
            "displayname": "Alice",
            "statusmessage": "hi",
            "avatar_url": "",
            "token": "ab".repeat(32),
        })
    );
}

#[test]
fn push_message_shapes_are_frozen() {
    let value = serde_json::to_value(ServerMessage::UserList {
        users: vec!["alice".to_owned(), "bob".to_owned()],
    })
    .expect("serialize");
    assert_eq!(value, json!({"type": "user_list", "users": ["alice", "bob"]}));

    let value = serde_json::to_value(ServerMessage::IncomingContactRequest {
        from_username: "alice".to_owned(),
        from_displayname: "Alice".to_owned(),
        from_avatar_url: String::new(),
    })
    .expect("serialize");
    assert_eq!(
        value,
        json!({
            "type": "incoming_contact_request",
            "fromUsername": "alice",
            "fromDisplayname": "Alice",
            "fromAvatarUrl": "",
        })
    );

    let value = serde_json::to_value(ServerMessage::Typing {
        from_user: "alice".to_owned(),
    })
    .expect("serialize");
    assert_eq!(value, json!({"type": "typing", "fromUser": "alice"}));
}

#[test]
fn call_signalling_shapes_are_frozen() {
    let value = serde_json::to_value(ServerMessage::CallRequest {
        from: "alice".to_owned(),
        call_id: "c-1".to_owned(),
        caller_ip: "1.2.3.4".to_owned(),
        caller_port: 40000,
    })
    .expect("serialize");
    assert_eq!(
        value,
        json!({
            "type": "call_request",
            "from": "alice",
            "call_id": "c-1",
            "caller_ip": "1.2.3.4",
            "caller_port": 40000,
        })
    );

    let value = serde_json::to_value(ServerMessage::CallEnd {
        call_id: "c-1".to_owned(),
        from: "alice".to_owned(),
    })
    .expect("serialize");
    assert_eq!(value, json!({"type": "call_end", "call_id": "c-1", "from": "alice"}));
}

#[test]
fn server_messages_round_trip_through_their_own_tags() {
    let messages = vec![
        ServerMessage::RegisterSuccess {
            username: "alice".to_owned(),
            displayname: "Alice".to_owned(),
        },
        ServerMessage::TokenLoginFailure {
            reason: "Invalid or expired token".to_owned(),
        },
        ServerMessage::LogoutSuccess,
        ServerMessage::HistoryData {
            with_user: "bob".to_owned(),
            history: Vec::new(),
        },
        ServerMessage::OldHistoryData {
            with_user: "bob".to_owned(),
            history: Vec::new(),
        },
        ServerMessage::UnreadCounts { counts: Vec::new() },
        ServerMessage::CallHistory { calls: Vec::new() },
    ];
    for msg in messages {
        let text = serde_json::to_string(&msg).expect("serialize");
        let back: ServerMessage = serde_json::from_str(&text).expect("reparse");
        assert_eq!(back.type_name(), msg.type_name());
    }
}
