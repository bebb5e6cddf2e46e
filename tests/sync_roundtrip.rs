#![cfg(all(feature = "web", feature = "sync"))]

use serde_json::json;
use std::path::Path;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wordbook_rs::client::{SyncClient, SyncError};
use wordbook_rs::store::{BookStore, DirectoryStore, Document};
use wordbook_rs::web::{WebConfig, WebError, serve_on};
use wordbook_rs::{CURRENT_SPEC, WordBookState, WordDraft};

struct Server {
    client: SyncClient,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), WebError>>,
}

impl Server {
    async fn shutdown(self) {
        let _ = self.stop.send(());
        self.handle.await.unwrap().unwrap();
    }
}

async fn start(root: &Path) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = WebConfig {
        data_dir: root.join("books"),
        legacy_state: Some(root.join("state.json")),
        ..WebConfig::default()
    };
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        serve_on(listener, &config, async {
            let _ = stopped.await;
        })
        .await
    });
    Server {
        client: SyncClient::new(format!("http://{addr}")),
        stop,
        handle,
    }
}

fn seed_legacy_template(root: &Path) {
    let store = DirectoryStore::open(root.join("books")).unwrap();
    let words: Vec<_> = (0..10)
        .map(|idx| json!({ "name": format!(" word{idx} "), "starred": idx % 2 == 0 }))
        .collect();
    let doc = json!({
        "spec": "wordbook/1",
        "id": "base",
        "name": "Base",
        "version": 3,
        "_words": words,
        "filterStarred": true,
    });
    store.insert(Document::new(doc).unwrap()).unwrap();
}

#[tokio::test]
async fn pull_mutate_push_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    seed_legacy_template(dir.path());
    let server = start(dir.path()).await;
    let client = server.client.clone();

    assert_eq!(client.ping().await.unwrap(), "pong");

    let rows = client.list_overviews().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].word_count, 10);

    let book = client.pull("base").await.unwrap();
    assert_eq!(book.spec, CURRENT_SPEC);
    assert_eq!(book.words.len(), 10);
    assert_eq!(book.words[0].name, "word0");
    assert_eq!(book.words[0].stars, 1);
    assert_eq!(book.words[1].stars, 0);

    let mut state = WordBookState::new(book);
    state.save_word(WordDraft::named("zeal").remark("great enthusiasm"));
    assert!(state.is_dirty());
    client.push_state(&mut state).await.unwrap();
    assert!(!state.is_dirty());

    let again = client.pull("base").await.unwrap();
    assert_eq!(again.words.len(), 11);
    assert_eq!(again.version, state.book().version);

    let created = client.create("base", "Half", 50.0).await.unwrap();
    assert_eq!(created.id, "half");
    assert_eq!(created.word_count, 6);

    let versions: Vec<_> = client
        .list_overviews()
        .await
        .unwrap()
        .iter()
        .map(|row| row.version)
        .collect();
    let mut sorted = versions.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(versions, sorted);

    client.remove("half").await.unwrap();
    let err = client.pull("half").await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");

    server.shutdown().await;
}

#[tokio::test]
async fn legacy_state_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(dir.path()).await;
    let client = server.client.clone();

    let mut state = WordBookState::new(wordbook_rs::WordBook::empty("state", "State"));
    state.load_default();
    client.push_legacy(state.book()).await.unwrap();
    let pulled = client.pull_legacy().await.unwrap();
    assert_eq!(pulled.words.len(), state.book().words.len());

    server.shutdown().await;
}

#[tokio::test]
async fn failed_push_leaves_the_book_dirty() {
    let dir = tempfile::tempdir().unwrap();
    seed_legacy_template(dir.path());
    let server = start(dir.path()).await;
    let client = server.client.clone();
    let book = client.pull("base").await.unwrap();
    server.shutdown().await;

    let mut state = WordBookState::new(book);
    state.set_current_word_stars(3);
    assert!(state.is_dirty());
    let err = client.push_state(&mut state).await.unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)));
    assert!(state.is_dirty());
}
