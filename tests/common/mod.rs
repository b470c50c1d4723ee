//! Shared harness: a server on an ephemeral port over a temporary SQLite
//! database and blob root, with scripted model and search doubles.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chathome::auth::IdentityGate;
use chathome::blob::FsBlobStore;
use chathome::config::parse_config;
use chathome::provider::{CallPurpose, ScriptedProvider};
use chathome::server::{router, AppServices, AppState};
use chathome::sqlite_store::SqliteStore;
use chathome::web_search::{SearchProvider, StaticSearch};
use chathome::{db, migrate, users};
use chathome_core::context::{ContentPart, TurnContent};
use chathome_core::search::SearchHit;
use chathome_core::store::Store;
use serde_json::Value;
use tempfile::TempDir;

pub const SECRET: &[u8] = b"integration-secret";

pub struct TestApp {
    pub base: String,
    pub client: reqwest::Client,
    pub store: Arc<dyn Store>,
    pub provider: Arc<ScriptedProvider>,
    pub search: Arc<StaticSearch>,
    pub blob_root: PathBuf,
    pub pat_id: String,
    pub pat: String,
    pub kai: String,
    _tmp: TempDir,
}

pub async fn spawn_app() -> TestApp {
    let tmp = TempDir::new().unwrap();
    let toml = format!(
        r#"[db]
path = "{root}/chathome.sqlite"

[storage]
blob_root = "{root}/blobs"

[search]
auto_classify = false
"#,
        root = tmp.path().display()
    );
    let config = parse_config(&toml).unwrap();
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));

    let provider = Arc::new(ScriptedProvider::new());
    let search = Arc::new(StaticSearch::hits(vec![SearchHit {
        title: "Rust 1.80 released".into(),
        link: "https://blog.rust-lang.org/".into(),
        snippet: "LazyCell and LazyLock are stable.".into(),
    }]));

    let pat = users::add_user(store.as_ref(), "pat", "Pat", "adult", None)
        .await
        .unwrap();
    let kai = users::add_user(store.as_ref(), "kai", "Kai", "kid", None)
        .await
        .unwrap();
    let gate = IdentityGate::new(store.clone(), SECRET);

    let services = AppServices {
        store: store.clone(),
        blobs: Arc::new(FsBlobStore::new(&config.storage.blob_root)),
        provider: provider.clone(),
        search: Some(search.clone() as Arc<dyn SearchProvider>),
    };
    let app = router(&config, AppState::new(&config, services, SECRET));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        store,
        provider,
        search,
        blob_root: config.storage.blob_root.clone(),
        pat_id: pat.id.clone(),
        pat: gate.issue(&pat, 3600).unwrap(),
        kai: gate.issue(&kai, 3600).unwrap(),
        _tmp: tmp,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn send(&self, token: &str, accept: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/api/chat/send"))
            .bearer_auth(token)
            .header("accept", accept)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn upload(&self, token: &str, name: &str, mime: &str, bytes: Vec<u8>) -> reqwest::Response {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str(mime)
            .unwrap();
        let form = reqwest::multipart::Form::new().part("file", part);
        self.client
            .post(self.url("/api/chat/upload"))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    pub async fn conversation(&self, token: &str, id: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/api/chat/conversations/{}", id)))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }
}

pub fn sse_events(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(|d| serde_json::from_str(d.trim()).unwrap())
        .collect()
}

pub fn user_parts(provider: &ScriptedProvider) -> Vec<String> {
    let call = provider.calls_for(CallPurpose::Chat).pop().unwrap();
    match &call.messages.last().unwrap().content {
        TurnContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.clone()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect(),
        TurnContent::Text(t) => vec![t.clone()],
    }
}

