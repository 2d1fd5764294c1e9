//! Call signalling: the full ringing -> connected -> completed lifecycle,
//! rejection, missed calls, authorization and the disconnect sweep.

mod common;

use common::{register, register_and_login, start_server};
use serde_json::json;

#[tokio::test]
async fn request_accept_end_lifecycle() {
    let server = start_server().await;
    let mut alice = register_and_login(&server, "alice", "pw-a").await;
    let mut bob = register_and_login(&server, "bob", "pw-b").await;

    alice
        .send(&json!({
            "type": "call_request",
            "to": "bob",
            "call_id": "c-1",
            "caller_ip": "1.2.3.4",
            "caller_port": 40000
        }))
        .await
        .expect("send");
    let ringing = bob.recv_type("call_request").await.expect("ring");
    assert_eq!(ringing["from"], "alice");
    assert_eq!(ringing["call_id"], "c-1");
    assert_eq!(ringing["caller_ip"], "1.2.3.4");
    assert_eq!(ringing["caller_port"], 40000);

    bob.send(&json!({
        "type": "call_accepted",
        "call_id": "c-1",
        "callee_ip": "5.6.7.8",
        "callee_port": 40001
    }))
    .await
    .expect("send");
    let accepted = alice.recv_type("call_accepted").await.expect("accept");
    assert_eq!(accepted["from"], "bob");
    assert_eq!(accepted["callee_ip"], "5.6.7.8");
    assert_eq!(accepted["callee_port"], 40001);

    alice
        .send(&json!({"type": "call_end", "call_id": "c-1"}))
        .await
        .expect("send");
    let ended = bob.recv_type("call_end").await.expect("end");
    assert_eq!(ended["call_id"], "c-1");
    assert_eq!(ended["from"], "alice");

    // Both perspectives appear in the log with the right direction.
    alice
        .send(&json!({"type": "get_call_history"}))
        .await
        .expect("send");
    let history = alice.recv_type("call_history").await.expect("history");
    let calls = history["calls"].as_array().expect("calls");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["status"], "completed");
    assert_eq!(calls[0]["call_type"], "outgoing");
    assert!(calls[0]["duration_seconds"].as_i64().expect("duration") >= 0);

    bob.send(&json!({"type": "get_call_history"}))
        .await
        .expect("send");
    let history = bob.recv_type("call_history").await.expect("history");
    assert_eq!(history["calls"][0]["call_type"], "incoming");
}

#[tokio::test]
async fn rejected_call_is_terminal() {
    let server = start_server().await;
    let mut alice = register_and_login(&server, "alice", "pw-a").await;
    let mut bob = register_and_login(&server, "bob", "pw-b").await;

    alice
        .send(&json!({
            "type": "call_request",
            "to": "bob",
            "call_id": "c-2",
            "caller_ip": "1.2.3.4",
            "caller_port": 40000
        }))
        .await
        .expect("send");
    bob.recv_type("call_request").await.expect("ring");

    bob.send(&json!({"type": "call_rejected", "call_id": "c-2"}))
        .await
        .expect("send");
    let rejected = alice.recv_type("call_rejected").await.expect("reject");
    assert_eq!(rejected["from"], "bob");

    // The active entry is gone: a later end for the same id is a no-op.
    alice
        .send(&json!({"type": "call_end", "call_id": "c-2"}))
        .await
        .expect("send");
    alice
        .send(&json!({"type": "get_call_history"}))
        .await
        .expect("send");
    let history = alice.recv_type("call_history").await.expect("history");
    assert_eq!(history["calls"][0]["status"], "rejected");
}

#[tokio::test]
async fn call_to_offline_user_is_missed_immediately() {
    let server = start_server().await;
    register(&server, "bob", "pw-b").await;
    let mut alice = register_and_login(&server, "alice", "pw-a").await;

    alice
        .send(&json!({
            "type": "call_request",
            "to": "bob",
            "call_id": "c-3",
            "caller_ip": "1.2.3.4",
            "caller_port": 40000
        }))
        .await
        .expect("send");

    alice
        .send(&json!({"type": "get_call_history"}))
        .await
        .expect("send");
    let history = alice.recv_type("call_history").await.expect("history");
    let calls = history["calls"].as_array().expect("calls");
    assert_eq!(calls[0]["status"], "missed");
    assert_eq!(calls[0]["duration_seconds"], 0);
}

#[tokio::test]
async fn only_the_callee_may_reject_and_only_participants_may_end() {
    let server = start_server().await;
    let mut alice = register_and_login(&server, "alice", "pw-a").await;
    let mut bob = register_and_login(&server, "bob", "pw-b").await;
    let mut carol = register_and_login(&server, "carol", "pw-c").await;

    alice
        .send(&json!({
            "type": "call_request",
            "to": "bob",
            "call_id": "c-4",
            "caller_ip": "1.2.3.4",
            "caller_port": 40000
        }))
        .await
        .expect("send");
    bob.recv_type("call_request").await.expect("ring");

    // Neither an outsider's end nor the caller's own "reject" moves the
    // state machine.
    carol
        .send(&json!({"type": "call_end", "call_id": "c-4"}))
        .await
        .expect("send");
    alice
        .send(&json!({"type": "call_rejected", "call_id": "c-4"}))
        .await
        .expect("send");

    bob.send(&json!({
        "type": "call_accepted",
        "call_id": "c-4",
        "callee_ip": "5.6.7.8",
        "callee_port": 40001
    }))
    .await
    .expect("send");
    let accepted = alice.recv_type("call_accepted").await.expect("still ringing");
    assert_eq!(accepted["call_id"], "c-4");
}

#[tokio::test]
async fn disconnect_mid_call_completes_and_notifies_peer() {
    let server = start_server().await;
    let mut alice = register_and_login(&server, "alice", "pw-a").await;
    let mut bob = register_and_login(&server, "bob", "pw-b").await;

    alice
        .send(&json!({
            "type": "call_request",
            "to": "bob",
            "call_id": "c-5",
            "caller_ip": "1.2.3.4",
            "caller_port": 40000
        }))
        .await
        .expect("send");
    bob.recv_type("call_request").await.expect("ring");
    bob.send(&json!({
        "type": "call_accepted",
        "call_id": "c-5",
        "callee_ip": "5.6.7.8",
        "callee_port": 40001
    }))
    .await
    .expect("send");
    alice.recv_type("call_accepted").await.expect("connected");

    // Alice's connection drops mid-call; the sweep completes the record
    // and tells Bob who left.
    drop(alice);
    let ended = bob.recv_type("call_end").await.expect("sweep notification");
    assert_eq!(ended["call_id"], "c-5");
    assert_eq!(ended["from"], "alice");

    bob.send(&json!({"type": "get_call_history"}))
        .await
        .expect("send");
    let history = bob.recv_type("call_history").await.expect("history");
    assert_eq!(history["calls"][0]["status"], "completed");
    assert_eq!(history["calls"][0]["call_type"], "incoming");
}
