//! End-to-end turn behavior against a scripted provider and an in-memory
//! journal store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use std::sync::atomic::Ordering;

use common::{
    collect, failing_harness, harness, harness_with, settle, tokens, tuning, FailingStore, Script,
};
use lx_domain::chat::{ChatRole, DEFAULT_CHAT_TITLE};
use lx_domain::message::Role;
use lx_gateway::runtime::{TurnEvent, TurnInput, TurnRejected, TurnTuning};
use lx_retrieval::{Retriever, Snippet};
use lx_store::ConversationStore;

const USER: &str = "alice";

fn input(chat_id: i64, content: &str) -> TurnInput {
    TurnInput {
        chat_id,
        user_id: USER.into(),
        content: content.into(),
    }
}

fn count<F: Fn(&TurnEvent) -> bool>(events: &[TurnEvent], f: F) -> usize {
    events.iter().filter(|e| f(e)).count()
}

#[tokio::test]
async fn streams_persists_and_retitles() {
    let h = harness(Script::default());
    let chat = h.store.create_chat(USER, None).await.unwrap();
    assert_eq!(chat.title, DEFAULT_CHAT_TITLE);

    let handle = h.orchestrator.start(input(chat.id, "Hello")).await.unwrap();
    let events = collect(handle.events).await;

    assert!(matches!(&events[0], TurnEvent::UserMessage { content, .. } if content == "Hello"));
    assert_eq!(tokens(&events), vec!["Hi", " there", "!"]);
    assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));
    assert_eq!(count(&events, |e| matches!(e, TurnEvent::Error { .. })), 0);
    assert_eq!(
        count(&events, |e| matches!(e, TurnEvent::NeedFile { content: false })),
        1
    );

    let titles: Vec<&String> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Title { content } => Some(content),
            _ => None,
        })
        .collect();
    assert_eq!(titles.len(), 1);
    assert!(!titles[0].is_empty() && titles[0].chars().count() <= 15);

    let messages = h.store.list_messages(chat.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, ChatRole::User);
    assert_eq!(messages[1].role, ChatRole::Assistant);
    assert_eq!(messages[1].content, "Hi there!");
    assert!(messages[1].is_complete);

    let stored = h.store.get_chat(chat.id).await.unwrap().unwrap();
    assert_eq!(&stored.title, titles[0]);
}

#[tokio::test]
async fn upstream_failure_keeps_partial_reply() {
    let h = harness(Script {
        deltas: vec!["Par".into(), "tial".into()],
        fail_after: Some(1),
        ..Script::default()
    });
    let chat = h.store.create_chat(USER, None).await.unwrap();

    let handle = h.orchestrator.start(input(chat.id, "Hello")).await.unwrap();
    let events = collect(handle.events).await;

    let apology = TurnTuning::default().apology;
    assert_eq!(tokens(&events), vec!["Par".to_string(), apology]);
    assert_eq!(count(&events, |e| matches!(e, TurnEvent::Error { .. })), 1);
    assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));

    let messages = h.store.list_messages(chat.id).await.unwrap();
    let reply = &messages[1];
    assert_eq!(reply.content, "Par");
    assert!(reply.is_complete);
}

#[tokio::test]
async fn failure_before_first_delta_still_finalizes() {
    let h = harness(Script {
        deltas: vec!["never".into()],
        fail_after: Some(0),
        ..Script::default()
    });
    let chat = h.store.create_chat(USER, None).await.unwrap();

    let events = collect(h.orchestrator.start(input(chat.id, "Hello")).await.unwrap().events).await;
    assert_eq!(tokens(&events), vec![TurnTuning::default().apology]);

    let reply = &h.store.list_messages(chat.id).await.unwrap()[1];
    assert_eq!(reply.content, "");
    assert!(reply.is_complete);
}

#[tokio::test]
async fn second_turn_sees_first_turn_as_history() {
    let h = harness(Script::default());
    let chat = h.store.create_chat(USER, None).await.unwrap();

    collect(h.orchestrator.start(input(chat.id, "Hello")).await.unwrap().events).await;
    h.provider.set_script(Script {
        deltas: vec!["Fine".into()],
        ..Script::default()
    });
    collect(h.orchestrator.start(input(chat.id, "How are you?")).await.unwrap().events).await;

    let requests = h.provider.stream_requests.lock().clone();
    assert_eq!(requests.len(), 2);
    let second: Vec<(Role, &str)> = requests[1]
        .messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(second[0].0, Role::System);
    assert_eq!(
        &second[1..],
        &[
            (Role::User, "Hello"),
            (Role::Assistant, "Hi there!"),
            (Role::User, "How are you?"),
        ]
    );
}

#[tokio::test]
async fn failing_title_does_not_block_the_answer() {
    let h = harness(Script {
        title: None,
        ..Script::default()
    });
    let chat = h.store.create_chat(USER, None).await.unwrap();

    let events = collect(h.orchestrator.start(input(chat.id, "Hello")).await.unwrap().events).await;
    assert_eq!(tokens(&events), vec!["Hi", " there", "!"]);
    assert_eq!(count(&events, |e| matches!(e, TurnEvent::Title { .. })), 0);
    assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));

    let stored = h.store.get_chat(chat.id).await.unwrap().unwrap();
    assert_eq!(stored.title, DEFAULT_CHAT_TITLE);
    assert!(h.store.list_messages(chat.id).await.unwrap()[1].is_complete);
}

#[tokio::test]
async fn slow_title_times_out_without_change() {
    let h = harness_with(
        Script {
            title_delay: Duration::from_secs(5),
            ..Script::default()
        },
        TurnTuning {
            aux_timeout: Duration::from_millis(50),
            ..tuning()
        },
        Arc::new(lx_retrieval::NoopRetriever),
    );
    let chat = h.store.create_chat(USER, None).await.unwrap();

    let events = collect(h.orchestrator.start(input(chat.id, "Hello")).await.unwrap().events).await;
    assert_eq!(count(&events, |e| matches!(e, TurnEvent::Title { .. })), 0);
    assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));
    assert_eq!(
        h.store.get_chat(chat.id).await.unwrap().unwrap().title,
        DEFAULT_CHAT_TITLE
    );
}

#[tokio::test]
async fn unchanged_title_emits_no_event() {
    let h = harness(Script {
        title: Some(DEFAULT_CHAT_TITLE.into()),
        ..Script::default()
    });
    let chat = h.store.create_chat(USER, None).await.unwrap();

    let events = collect(h.orchestrator.start(input(chat.id, "Hello")).await.unwrap().events).await;
    assert_eq!(count(&events, |e| matches!(e, TurnEvent::Title { .. })), 0);
}

#[tokio::test]
async fn token_order_survives_interleaved_aux_events() {
    let deltas: Vec<String> = (0..6).map(|i| format!("d{i} ")).collect();
    let h = harness(Script {
        deltas: deltas.clone(),
        delta_gap: Duration::from_millis(15),
        title_delay: Duration::from_millis(35),
        classifier: "TRUE".into(),
        ..Script::default()
    });
    let chat = h.store.create_chat(USER, None).await.unwrap();

    let events = collect(h.orchestrator.start(input(chat.id, "看看这份合同")).await.unwrap().events).await;
    assert_eq!(tokens(&events), deltas);
    assert_eq!(
        count(&events, |e| matches!(e, TurnEvent::NeedFile { content: true })),
        1
    );
    assert_eq!(count(&events, |e| matches!(e, TurnEvent::Title { .. })), 1);
}

#[tokio::test]
async fn disconnect_mid_stream_completes_partial_reply() {
    let deltas: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
    let h = harness(Script {
        deltas: deltas.clone(),
        delta_gap: Duration::from_millis(20),
        ..Script::default()
    });
    let chat = h.store.create_chat(USER, None).await.unwrap();

    let mut rx = h.orchestrator.start(input(chat.id, "Hello")).await.unwrap().events;
    let mut received = String::new();
    let mut seen = 0;
    while seen < 3 {
        if let Some(TurnEvent::Token { content }) = rx.recv().await {
            received.push_str(&content);
            seen += 1;
        }
    }
    drop(rx);
    settle(&h.locks, chat.id).await;

    let reply = &h.store.list_messages(chat.id).await.unwrap()[1];
    assert!(reply.is_complete);
    assert!(reply.content.starts_with(&received));
    assert!(deltas.concat().starts_with(&reply.content));
    assert!(reply.content.len() < deltas.concat().len());
}

#[tokio::test]
async fn at_most_one_incomplete_message_while_streaming() {
    let deltas: Vec<String> = (0..8).map(|i| format!("x{i}")).collect();
    let h = harness(Script {
        deltas: deltas.clone(),
        delta_gap: Duration::from_millis(10),
        ..Script::default()
    });
    let chat = h.store.create_chat(USER, None).await.unwrap();

    let mut rx = h.orchestrator.start(input(chat.id, "Hello")).await.unwrap().events;
    let mut streamed = String::new();
    while let Some(event) = rx.recv().await {
        if let TurnEvent::Token { content } = event {
            streamed.push_str(&content);
            let incomplete = h.store.incomplete_messages(chat.id).await.unwrap();
            assert!(incomplete.len() <= 1);
            if let Some(m) = incomplete.first() {
                // Checkpoints never run ahead of what the stream produced.
                assert!(deltas.concat().starts_with(&m.content));
            }
        }
    }
    assert_eq!(streamed, deltas.concat());
    assert!(h.store.incomplete_messages(chat.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn turns_on_one_chat_run_in_order() {
    let h = harness(Script {
        delta_gap: Duration::from_millis(10),
        ..Script::default()
    });
    let chat = h.store.create_chat(USER, None).await.unwrap();

    let first = h.orchestrator.start(input(chat.id, "one")).await.unwrap();
    let orchestrator = h.orchestrator.clone();
    let chat_id = chat.id;
    let second = tokio::spawn(async move {
        let handle = orchestrator.start(input(chat_id, "two")).await.unwrap();
        collect(handle.events).await
    });

    collect(first.events).await;
    second.await.unwrap();
    settle(&h.locks, chat.id).await;

    let messages = h.store.list_messages(chat.id).await.unwrap();
    let roles: Vec<(ChatRole, &str)> = messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        roles,
        vec![
            (ChatRole::User, "one"),
            (ChatRole::Assistant, "Hi there!"),
            (ChatRole::User, "two"),
            (ChatRole::Assistant, "Hi there!"),
        ]
    );
}

#[tokio::test]
async fn rejects_empty_and_unknown_or_foreign_chats() {
    let h = harness(Script::default());
    let chat = h.store.create_chat(USER, None).await.unwrap();

    assert!(matches!(
        h.orchestrator.start(input(chat.id, "   ")).await,
        Err(TurnRejected::EmptyContent)
    ));
    assert!(matches!(
        h.orchestrator.start(input(999, "Hello")).await,
        Err(TurnRejected::ChatNotFound(999))
    ));
    let foreign = TurnInput {
        chat_id: chat.id,
        user_id: "mallory".into(),
        content: "Hello".into(),
    };
    assert!(matches!(
        h.orchestrator.start(foreign).await,
        Err(TurnRejected::ChatNotFound(_))
    ));
    assert!(h.store.list_messages(chat.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_checkpoint_ends_turn_with_error_and_no_done() {
    let (store, _provider, orchestrator) = failing_harness(FailingStore {
        content_writes_allowed: Some(1),
        ..FailingStore::new()
    });
    let chat = store.create_chat(USER, None).await.unwrap();

    let handle = orchestrator.start(input(chat.id, "Hello")).await.unwrap();
    let events = collect(handle.events).await;

    assert_eq!(tokens(&events), vec!["Hi", " there"]);
    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::Error { content } if content == "failed to save reply")));
    assert!(!events.iter().any(|e| matches!(e, TurnEvent::Done { .. })));
    assert_eq!(store.mark_complete_calls.load(Ordering::SeqCst), 1);

    // Only the checkpoint that landed survives, and the row is closed out.
    let messages = store.list_messages(chat.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "Hi");
    assert!(messages[1].is_complete);
    assert!(store.incomplete_messages(chat.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unsaved_user_message_stops_before_the_model_is_called() {
    let (store, provider, orchestrator) = failing_harness(FailingStore {
        fail_user_messages: true,
        ..FailingStore::new()
    });
    let chat = store.create_chat(USER, None).await.unwrap();

    let handle = orchestrator.start(input(chat.id, "Hello")).await.unwrap();
    let events = collect(handle.events).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        TurnEvent::Error { content } if content == "failed to save message"
    ));
    assert!(store.list_messages(chat.id).await.unwrap().is_empty());
    assert!(provider.stream_requests.lock().is_empty());
    assert_eq!(store.mark_complete_calls.load(Ordering::SeqCst), 0);
}

struct FixedRetriever;

#[async_trait::async_trait]
impl Retriever for FixedRetriever {
    async fn search(&self, _query: &str, user_id: &str, _top_k: u32) -> Vec<Snippet> {
        assert_eq!(user_id, USER);
        vec![Snippet {
            content: "劳动合同法第十条".into(),
            score: 0.9,
            metadata: serde_json::Value::Null,
        }]
    }
}

#[tokio::test]
async fn retrieved_snippets_reach_the_system_prompt() {
    let h = harness_with(Script::default(), tuning(), Arc::new(FixedRetriever));
    let chat = h.store.create_chat(USER, None).await.unwrap();

    collect(h.orchestrator.start(input(chat.id, "劳动合同怎么签？")).await.unwrap().events).await;

    let requests = h.provider.stream_requests.lock().clone();
    let system = &requests[0].messages[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("相关文档内容：劳动合同法第十条"));
}
