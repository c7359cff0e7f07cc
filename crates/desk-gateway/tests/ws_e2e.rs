use std::net::SocketAddr;
use std::sync::Arc;

use desk_core::orchestrator::{APOLOGY, ConversationOrchestrator, OrchestratorConfig};
use desk_gateway::{AppState, IndexJob, build_router};
use desk_llm::mock::MockProvider;
use desk_llm::provider::embed_fn;
use desk_memory::document::{ChunkerConfig, DirectorySource, DocumentChunker, IndexingPipeline};
use desk_memory::{KnowledgeIndex, LocalVectorStore, SessionMemoryStore};
use futures::{SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;

const DIM: usize = 128;

struct Harness {
    addr: SocketAddr,
    memory: Arc<SessionMemoryStore>,
    _docs: tempfile::TempDir,
}

async fn start(provider: MockProvider) -> Harness {
    let docs = tempfile::tempdir().unwrap();
    let provider = Arc::new(provider.with_dimensions(DIM));
    let index = Arc::new(KnowledgeIndex::new(
        Arc::new(LocalVectorStore::new()),
        "articles_store",
        DIM,
        embed_fn(Arc::clone(&provider)),
    ));
    let memory = Arc::new(SessionMemoryStore::default());
    let pipeline = IndexingPipeline::new(
        Arc::new(DirectorySource::new(docs.path())),
        Arc::clone(&index),
        DocumentChunker::new(ChunkerConfig::default()).unwrap(),
    );
    let conversation = Arc::new(ConversationOrchestrator::new(
        provider,
        Arc::clone(&index),
        Arc::clone(&memory),
        OrchestratorConfig::default(),
    ));
    let state = AppState::new(
        conversation,
        index,
        Arc::clone(&memory),
        Arc::new(IndexJob::new(Arc::new(pipeline), "")),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(state, 1_048_576);
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Harness {
        addr,
        memory,
        _docs: docs,
    }
}

async fn recv_json<S>(ws: &mut S) -> serde_json::Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = ws.next().await.unwrap().unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn json_and_raw_frames_get_replies_on_one_connection() {
    let harness = start(MockProvider::with_responses(vec![
        "Try restarting.".into(),
        "Raw text understood.".into(),
    ]))
    .await;
    let url = format!("ws://{}/ws?session_id=e2e", harness.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    ws.send(Message::text(r#"{"message": "my laptop is slow"}"#))
        .await
        .unwrap();
    let first = recv_json(&mut ws).await;
    assert_eq!(first["response"], "Try restarting.");
    assert!(first["sources"].is_array());

    ws.send(Message::text("not-json-text")).await.unwrap();
    let second = recv_json(&mut ws).await;
    assert_eq!(second["response"], "Raw text understood.");

    let stored = harness.memory.read("e2e").await;
    assert_eq!(stored.len(), 4);
    assert_eq!(stored[2].content, "not-json-text");

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn empty_frame_is_ignored() {
    let harness = start(MockProvider::with_responses(vec!["answer".into()])).await;
    let url = format!("ws://{}/ws?session_id=quiet", harness.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    ws.send(Message::text(r#"{"message": "  "}"#)).await.unwrap();
    ws.send(Message::text("real question")).await.unwrap();

    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["response"], "answer");
    assert_eq!(harness.memory.read("quiet").await.len(), 2);
}

#[tokio::test]
async fn peer_address_is_the_default_session() {
    let harness = start(MockProvider::default()).await;
    let url = format!("ws://{}/ws", harness.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    ws.send(Message::text("hello")).await.unwrap();
    recv_json(&mut ws).await;

    assert_eq!(harness.memory.read("127.0.0.1").await.len(), 2);
}

#[tokio::test]
async fn completion_failure_replies_with_apology_and_keeps_connection() {
    let harness = start(MockProvider::failing()).await;
    let url = format!("ws://{}/ws?session_id=broken", harness.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    for _ in 0..2 {
        ws.send(Message::text("help")).await.unwrap();
        let reply = recv_json(&mut ws).await;
        assert_eq!(reply["response"], APOLOGY);
        assert_eq!(reply["sources"], serde_json::json!([]));
    }
    assert_eq!(harness.memory.read("broken").await.len(), 2);
}
