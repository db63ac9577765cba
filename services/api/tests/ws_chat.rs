mod common;

use common::{ScriptedLlm, app_state, spawn_app, test_config, tool_call};
use onboard_api::state::AppState;
use futures::{SinkExt, StreamExt};
use onboard_core::llm_client::LLMStreamEvent;
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/ws/onboard", addr))
        .await
        .unwrap();
    ws
}

/// Next JSON event from the server, or `None` once the socket closes.
async fn next_event(ws: &mut Client) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for the server");
        match frame {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn send(ws: &mut Client, text: &str) {
    ws.send(Message::text(text)).await.unwrap();
}

async fn start(ws: &mut Client) -> String {
    send(ws, r#"{"action":"start","schema":{}}"#).await;
    let event = next_event(ws).await.unwrap();
    assert_eq!(event["type"], "session_started");
    event["session_id"].as_str().unwrap().to_string()
}

struct Harness {
    addr: SocketAddr,
    llm: Arc<ScriptedLlm>,
    state: Arc<AppState>,
    _dir: TempDir,
}

async fn harness(replies: Vec<Vec<LLMStreamEvent>>) -> Harness {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedLlm::new(replies));
    let state = app_state(test_config(&dir, "http://127.0.0.1:9/calls", None), llm.clone());
    Harness {
        addr: spawn_app(state.clone()).await,
        llm,
        state,
        _dir: dir,
    }
}

async fn spawn_with(replies: Vec<Vec<LLMStreamEvent>>) -> (SocketAddr, Arc<ScriptedLlm>, TempDir) {
    let h = harness(replies).await;
    (h.addr, h.llm, h._dir)
}

/// Collects events up to and including `message_complete`.
async fn collect_turn(ws: &mut Client) -> Vec<Value> {
    let mut events = Vec::new();
    loop {
        let event = next_event(ws).await.expect("socket closed mid-turn");
        let done = event["type"] == "message_complete";
        events.push(event);
        if done {
            return events;
        }
    }
}

#[tokio::test]
async fn test_exit_before_any_turn_ends_conversation() {
    let (addr, llm, _dir) = spawn_with(vec![]).await;
    let mut ws = connect(addr).await;
    let session_id = start(&mut ws).await;

    send(&mut ws, "\"exit\"").await;

    let ended = next_event(&mut ws).await.unwrap();
    assert_eq!(ended["type"], "conversation_ended");
    assert_eq!(ended["session_id"], session_id);
    assert_eq!(ended["answers"], json!({}));
    assert!(next_event(&mut ws).await.is_none());
    assert!(llm.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_termination_phrases_ignore_case_and_whitespace() {
    let (addr, _llm, _dir) = spawn_with(vec![]).await;
    let mut ws = connect(addr).await;
    start(&mut ws).await;

    send(&mut ws, "  Bye ").await;

    assert_eq!(
        next_event(&mut ws).await.unwrap()["type"],
        "conversation_ended"
    );
    assert!(next_event(&mut ws).await.is_none());
}

#[tokio::test]
async fn test_messages_before_start_are_rejected_but_connection_stays_open() {
    let (addr, _llm, _dir) = spawn_with(vec![]).await;
    let mut ws = connect(addr).await;

    send(&mut ws, "hello").await;
    let event = next_event(&mut ws).await.unwrap();
    assert_eq!(event["type"], "error");

    start(&mut ws).await;
}

#[tokio::test]
async fn test_malformed_message_reports_error_and_keeps_session() {
    let (addr, _llm, _dir) = spawn_with(vec![]).await;
    let mut ws = connect(addr).await;
    start(&mut ws).await;

    send(&mut ws, "{not json").await;
    assert_eq!(next_event(&mut ws).await.unwrap()["type"], "error");

    send(&mut ws, r#"{"action":"start"}"#).await;
    assert_eq!(next_event(&mut ws).await.unwrap()["type"], "error");

    send(&mut ws, r#"{"action":"end"}"#).await;
    assert_eq!(
        next_event(&mut ws).await.unwrap()["type"],
        "conversation_ended"
    );
}

#[tokio::test]
async fn test_turn_streams_tool_activity_and_saves_answer() {
    let (addr, llm, _dir) = spawn_with(vec![
        vec![LLMStreamEvent::ToolCalls(vec![tool_call(
            "call_1",
            "save_answer",
            r#"{"key":"full_name","value":"Ana"}"#,
        )])],
        vec![
            LLMStreamEvent::TextChunk("Nice to meet you, Ana. ".to_string()),
            LLMStreamEvent::TextChunk("How big is your team?".to_string()),
        ],
    ])
    .await;
    let mut ws = connect(addr).await;
    let session_id = start(&mut ws).await;

    send(&mut ws, r#"{"action":"message","text":"My name is Ana"}"#).await;

    let mut events = Vec::new();
    loop {
        let event = next_event(&mut ws).await.unwrap();
        let done = event["type"] == "message_complete";
        events.push(event);
        if done {
            break;
        }
    }
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();

    let call = events.iter().find(|e| e["type"] == "tool_call").unwrap();
    assert_eq!(call["name"], "save_answer");
    assert_eq!(call["arguments"], json!({"key": "full_name", "value": "Ana"}));

    let output = events.iter().find(|e| e["type"] == "tool_output").unwrap();
    assert_eq!(output["is_error"], false);
    assert_eq!(output["output"], "OK. Saved 'full_name' = 'Ana'.");

    let saved = events.iter().find(|e| e["type"] == "answer_saved").unwrap();
    assert_eq!(saved["key"], "full_name");
    assert_eq!(saved["value"], "Ana");

    let deltas: String = events
        .iter()
        .filter(|e| e["type"] == "delta")
        .map(|e| e["content"].as_str().unwrap())
        .collect();
    assert_eq!(deltas, "Nice to meet you, Ana. How big is your team?");

    let complete = events.last().unwrap();
    assert_eq!(complete["content"], deltas);
    assert_eq!(complete["turn"], 1);
    assert!(
        types.iter().position(|t| *t == "tool_call").unwrap()
            < types.iter().position(|t| *t == "delta").unwrap()
    );

    // The second model call sees the tool result.
    assert_eq!(llm.requests.lock().unwrap().len(), 2);

    let snapshot: Value = reqwest::get(format!("http://{}/session/{}", addr, session_id))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshot["answers"], json!({"full_name": "Ana"}));
    assert_eq!(snapshot["turns"], 1);

    send(&mut ws, "done").await;
    let ended = next_event(&mut ws).await.unwrap();
    assert_eq!(ended["type"], "conversation_ended");
    assert_eq!(ended["answers"], json!({"full_name": "Ana"}));
}

#[tokio::test]
async fn test_system_prompt_lists_missing_fields() {
    let (addr, llm, _dir) = spawn_with(vec![vec![LLMStreamEvent::TextChunk(
        "Hi! What is your full name?".to_string(),
    )]])
    .await;
    let mut ws = connect(addr).await;
    start(&mut ws).await;

    send(&mut ws, "hello").await;
    loop {
        if next_event(&mut ws).await.unwrap()["type"] == "message_complete" {
            break;
        }
    }

    let requests = llm.requests.lock().unwrap();
    let system = serde_json::to_value(&requests[0][0]).unwrap();
    assert_eq!(system["role"], "system");
    let prompt = system["content"].as_str().unwrap();
    assert!(prompt.contains("**Still missing:**"));
    assert!(prompt.contains("full_name"));
    assert!(prompt.contains("team_size"));
}

#[tokio::test]
async fn test_failed_turn_reports_error_and_closes() {
    let (addr, _llm, _dir) = spawn_with(vec![]).await;
    let mut ws = connect(addr).await;
    start(&mut ws).await;

    send(&mut ws, "hello").await;

    let event = next_event(&mut ws).await.unwrap();
    assert_eq!(event["type"], "error");
    assert!(next_event(&mut ws).await.is_none());
}

#[tokio::test]
async fn test_idle_sweep_does_not_end_a_connected_session() {
    let h = harness(vec![vec![LLMStreamEvent::TextChunk(
        "Welcome back!".to_string(),
    )]])
    .await;
    let mut ws = connect(h.addr).await;
    let session_id = start(&mut ws).await;

    // Give the chat loop time to attach before sweeping far in the future.
    let id = uuid::Uuid::parse_str(&session_id).unwrap();
    for _ in 0..50 {
        if h.state.sessions.get(id).await.unwrap().connections > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let much_later = chrono::Utc::now() + chrono::Duration::hours(2);
    assert_eq!(h.state.sessions.purge_expired(much_later).await, 0);

    send(&mut ws, "hello").await;
    let events = collect_turn(&mut ws).await;
    assert!(events.iter().all(|e| e["type"] != "error"));
    assert_eq!(events.last().unwrap()["content"], "Welcome back!");
    assert_eq!(events.last().unwrap()["turn"], 1);

    send(&mut ws, "bye").await;
    assert_eq!(
        next_event(&mut ws).await.unwrap()["type"],
        "conversation_ended"
    );
    assert!(next_event(&mut ws).await.is_none());

    // Once the connection is gone the session ages out normally.
    for _ in 0..50 {
        if h.state.sessions.get(id).await.unwrap().connections == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let much_later = chrono::Utc::now() + chrono::Duration::hours(2);
    assert_eq!(h.state.sessions.purge_expired(much_later).await, 1);
}

#[tokio::test]
async fn test_bad_tool_arguments_are_reported_to_the_model() {
    let h = harness(vec![
        vec![LLMStreamEvent::ToolCalls(vec![
            tool_call("call_1", "save_answer", r#"{"key":1}"#),
            tool_call("call_2", "save_answer", r#"["full_name","Ana"]"#),
            tool_call("call_3", "delete_everything", r#"{}"#),
        ])],
        vec![LLMStreamEvent::TextChunk(
            "Sorry, could you repeat your name?".to_string(),
        )],
    ])
    .await;
    let mut ws = connect(h.addr).await;
    let session_id = start(&mut ws).await;

    send(&mut ws, "My name is Ana").await;
    let events = collect_turn(&mut ws).await;

    let outputs: Vec<&Value> = events
        .iter()
        .filter(|e| e["type"] == "tool_output")
        .collect();
    assert_eq!(outputs.len(), 3);
    assert!(outputs.iter().all(|o| o["is_error"] == true));
    assert!(events.iter().all(|e| e["type"] != "answer_saved"));
    assert_eq!(
        events.last().unwrap()["content"],
        "Sorry, could you repeat your name?"
    );

    // The model saw one tool message per call on its second round.
    let requests = h.llm.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    let tool_messages = requests[1]
        .iter()
        .filter(|m| serde_json::to_value(m).unwrap()["role"] == "tool")
        .count();
    assert_eq!(tool_messages, 3);
    drop(requests);

    let id = uuid::Uuid::parse_str(&session_id).unwrap();
    assert!(h.state.sessions.get(id).await.unwrap().answers.is_empty());
}
