//! The messaging engine end to end: echo + relay, receipts, offline
//! delivery via history, edit/delete authorization and typing.

mod common;

use common::{login, register, register_and_login, start_server};
use serde_json::json;

#[tokio::test]
async fn relay_with_both_online_carries_echo_and_receipts() {
    let server = start_server().await;
    let mut alice = register_and_login(&server, "alice", "pw-a").await;
    let mut bob = register_and_login(&server, "bob", "pw-b").await;

    alice
        .send(&json!({
            "type": "private_message",
            "fromUser": "alice",
            "toUser": "bob",
            "payload": "hi",
            "temp_id": "t-1"
        }))
        .await
        .expect("send");

    // Echo to the sender: full server view plus the original temp_id.
    let echo = alice.recv_type("private_message").await.expect("echo");
    assert_eq!(echo["fromUser"], "alice");
    assert_eq!(echo["toUser"], "bob");
    assert_eq!(echo["payload"], "hi");
    assert_eq!(echo["temp_id"], "t-1");
    assert_eq!(echo["is_delivered"], 0);
    assert_eq!(echo["is_read"], 0);
    assert_eq!(echo["is_edited"], 0);
    let id = echo["id"].as_i64().expect("server id");
    assert!(id > 0);
    assert!(echo["timestamp"].as_str().is_some());

    // Relayed copy to the recipient: same object, no temp_id.
    let relayed = bob.recv_type("private_message").await.expect("relay");
    assert_eq!(relayed["id"], id);
    assert_eq!(relayed["payload"], "hi");
    assert!(relayed.get("temp_id").is_none());

    // Delivery receipt flows back to the sender.
    bob.send(&json!({"type": "message_delivered", "id": id}))
        .await
        .expect("send receipt");
    let delivered = alice.recv_type("message_delivered").await.expect("receipt");
    assert_eq!(delivered["id"], id);

    bob.send(&json!({"type": "message_read", "id": id}))
        .await
        .expect("send receipt");
    let read = alice.recv_type("message_read").await.expect("receipt");
    assert_eq!(read["id"], id);

    // Flags stuck at 1 in the stored row.
    bob.send(&json!({"type": "get_history", "with_user": "alice"}))
        .await
        .expect("send");
    let history = bob.recv_type("history_data").await.expect("history");
    let row = &history["history"].as_array().expect("rows")[0];
    assert_eq!(row["is_delivered"], 1);
    assert_eq!(row["is_read"], 1);
}

#[tokio::test]
async fn impersonated_from_user_is_refused() {
    let server = start_server().await;
    register(&server, "bob", "pw-b").await;
    let mut alice = register_and_login(&server, "alice", "pw-a").await;

    alice
        .send(&json!({
            "type": "private_message",
            "fromUser": "bob",
            "toUser": "alice",
            "payload": "spoofed",
            "temp_id": "t-1"
        }))
        .await
        .expect("send");
    let error = alice.recv_type("error").await.expect("error");
    assert_eq!(error["reason"], "Authentication mismatch");

    // Nothing was persisted.
    alice
        .send(&json!({"type": "get_history", "with_user": "bob"}))
        .await
        .expect("send");
    let history = alice.recv_type("history_data").await.expect("history");
    assert_eq!(history["history"].as_array().expect("rows").len(), 0);
}

#[tokio::test]
async fn offline_recipient_gets_unread_counts_and_history_on_login() {
    let server = start_server().await;
    register(&server, "bob", "pw-b").await;
    let mut alice = register_and_login(&server, "alice", "pw-a").await;

    alice
        .send(&json!({
            "type": "private_message",
            "toUser": "bob",
            "payload": "catch up later",
            "temp_id": "t-1"
        }))
        .await
        .expect("send");
    alice.recv_type("private_message").await.expect("echo");

    // Bob logs in afterwards; the unread summary names alice.
    let mut bob = login(&server, "bob", "pw-b").await;
    let unread = bob.recv_type("unread_counts").await.expect("unread");
    let counts = unread["counts"].as_array().expect("counts");
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0]["username"], "alice");
    assert_eq!(counts[0]["count"], 1);

    bob.send(&json!({"type": "get_history", "with_user": "alice"}))
        .await
        .expect("send");
    let history = bob.recv_type("history_data").await.expect("history");
    let rows = history["history"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["payload"], "catch up later");
    assert_eq!(rows[0]["is_delivered"], 0);
    assert_eq!(rows[0]["is_read"], 0);
}

#[tokio::test]
async fn history_cursor_returns_older_page_ascending() {
    let server = start_server().await;
    let mut alice = register_and_login(&server, "alice", "pw-a").await;
    register(&server, "bob", "pw-b").await;

    for i in 0..25 {
        alice
            .send(&json!({
                "type": "private_message",
                "toUser": "bob",
                "payload": format!("m{i}"),
                "temp_id": format!("t-{i}")
            }))
            .await
            .expect("send");
        alice.recv_type("private_message").await.expect("echo");
    }

    alice
        .send(&json!({"type": "get_history", "with_user": "bob"}))
        .await
        .expect("send");
    let newest = alice.recv_type("history_data").await.expect("history");
    let rows = newest["history"].as_array().expect("rows");
    assert_eq!(rows.len(), 20);
    assert_eq!(rows.last().expect("row")["payload"], "m24");
    let ids: Vec<i64> = rows.iter().map(|r| r["id"].as_i64().expect("id")).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ascending in response");

    alice
        .send(&json!({"type": "get_history", "with_user": "bob", "before_id": ids[0]}))
        .await
        .expect("send");
    let older = alice.recv_type("old_history_data").await.expect("older page");
    let rows = older["history"].as_array().expect("rows");
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|r| r["id"].as_i64().expect("id") < ids[0]));
}

#[tokio::test]
async fn only_the_author_can_edit_and_delete() {
    let server = start_server().await;
    let mut alice = register_and_login(&server, "alice", "pw-a").await;
    let mut bob = register_and_login(&server, "bob", "pw-b").await;

    alice
        .send(&json!({
            "type": "private_message",
            "toUser": "bob",
            "payload": "original",
            "temp_id": "t-1"
        }))
        .await
        .expect("send");
    let echo = alice.recv_type("private_message").await.expect("echo");
    let id = echo["id"].as_i64().expect("id");
    bob.recv_type("private_message").await.expect("relay");

    // A non-author edit is silently dropped.
    bob.send(&json!({"type": "edit_message", "id": id, "payload": "hijacked"}))
        .await
        .expect("send");
    bob.send(&json!({"type": "get_history", "with_user": "alice"}))
        .await
        .expect("send");
    let history = bob.recv_type("history_data").await.expect("history");
    let row = &history["history"].as_array().expect("rows")[0];
    assert_eq!(row["payload"], "original");
    assert_eq!(row["is_edited"], 0);

    // The author's edit reaches both sides with their respective peers.
    alice
        .send(&json!({"type": "edit_message", "id": id, "payload": "edited"}))
        .await
        .expect("send");
    let to_author = alice.recv_type("edit_message").await.expect("edit echo");
    assert_eq!(to_author["payload"], "edited");
    assert_eq!(to_author["with_user"], "bob");
    let to_peer = bob.recv_type("edit_message").await.expect("edit relay");
    assert_eq!(to_peer["with_user"], "alice");

    // Delete mirrors the same authorization and fan-out.
    alice
        .send(&json!({"type": "delete_message", "id": id}))
        .await
        .expect("send");
    let deleted = bob.recv_type("delete_message").await.expect("delete relay");
    assert_eq!(deleted["id"], id);
    assert_eq!(deleted["with_user"], "alice");

    alice
        .send(&json!({"type": "get_history", "with_user": "bob"}))
        .await
        .expect("send");
    let history = alice.recv_type("history_data").await.expect("history");
    assert_eq!(history["history"].as_array().expect("rows").len(), 0);
}

#[tokio::test]
async fn typing_is_relayed_only_while_recipient_is_online() {
    let server = start_server().await;
    let mut alice = register_and_login(&server, "alice", "pw-a").await;
    let mut bob = register_and_login(&server, "bob", "pw-b").await;

    alice
        .send(&json!({"type": "typing", "toUser": "bob"}))
        .await
        .expect("send");
    let typing = bob.recv_type("typing").await.expect("typing");
    assert_eq!(typing["fromUser"], "alice");

    // Offline recipient: nothing persisted, nothing relayed; the sender's
    // next command still works.
    drop(bob);
    alice
        .send(&json!({"type": "typing", "toUser": "bob"}))
        .await
        .expect("send");
    alice
        .send(&json!({"type": "get_history", "with_user": "bob"}))
        .await
        .expect("send");
    alice.recv_type("history_data").await.expect("still responsive");
}
