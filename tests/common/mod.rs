#![allow(dead_code)]

use std::{
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, header::CONTENT_TYPE},
};
use plantuml_gateway::{
    application::{
        gateway::RenderGateway,
        render::{PlantUmlRenderer, WorkspaceManager},
        storage::{ArtifactPublisher, ArtifactStore, StorageError},
    },
    domain::{render::RenderedArtifact, storage_key::StorageKey},
    infra::http::{GatewayState, build_router},
};
use tempfile::TempDir;

pub const PUBLIC_BASE: &str = "https://diagrams-bucket.nyc3.digitaloceanspaces.com";

/// Writes a PNG header followed by the diagram source to `<outdir>/<base>.png`.
pub const STUB_RENDERS_PNG: &str = r#"base=$(basename "$2" .puml)
printf '\211PNG\r\n\032\n' > "$4/$base.png"
cat "$2" >> "$4/$base.png""#;

/// Mimics PlantUML rejecting a diagram.
pub const STUB_SYNTAX_ERROR: &str = r#"echo "Error line 2 in file: $2" >&2
echo "Some diagram description contains errors" >&2
exit 200"#;

#[derive(Default)]
pub struct MemoryStore {
    pub puts: Mutex<Vec<(String, Vec<u8>)>>,
    pub fail: bool,
}

impl MemoryStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.puts
            .lock()
            .expect("puts lock")
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put_public(
        &self,
        key: &StorageKey,
        artifact: &RenderedArtifact,
    ) -> Result<(), StorageError> {
        if self.fail {
            return Err(StorageError::put(key, "SignatureDoesNotMatch"));
        }
        self.puts
            .lock()
            .expect("puts lock")
            .push((key.to_string(), artifact.bytes().to_vec()));
        Ok(())
    }

    fn public_url(&self, key: &StorageKey) -> String {
        format!("{PUBLIC_BASE}/{key}")
    }
}

pub struct TestApp {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub router: Router,
}

impl TestApp {
    pub fn new(script: &str) -> Self {
        Self::with_store(script, MemoryStore::default())
    }

    pub fn with_store(script: &str, store: MemoryStore) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let script_path = dir.path().join("fake-plantuml.sh");
        fs::write(&script_path, format!("#!/bin/sh\nset -eu\n{script}\n")).expect("write stub");

        let store = Arc::new(store);
        let gateway = RenderGateway::new(
            WorkspaceManager::new(dir.path().join("workspaces")),
            PlantUmlRenderer::new(
                PathBuf::from("/bin/sh"),
                vec![script_path.into_os_string()],
                Duration::from_secs(10),
            ),
            ArtifactPublisher::new(store.clone(), "diagrams"),
        );
        let router = build_router(GatewayState::new(gateway), 64 * 1024);

        Self { dir, store, router }
    }

    pub fn leftover_workspaces(&self) -> usize {
        let root = self.dir.path().join("workspaces");
        if !root.exists() {
            return 0;
        }
        fs::read_dir(root).expect("read workspace root").count()
    }
}

pub fn render_request(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/plantuml2png")
        .header(CONTENT_TYPE, "application/json")
        .body(body.into())
        .expect("request should build")
}

pub fn json_request(value: serde_json::Value) -> Request<Body> {
    render_request(serde_json::to_vec(&value).expect("serialize body"))
}
