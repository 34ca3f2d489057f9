//! Request orchestration for the render-and-deliver pipeline.
//!
//! A request moves through `Parsing -> Rendering -> Delivering -> Completed`;
//! any stage may end in `Failed`. The workspace acquired for rendering is
//! released before [`RenderGateway::handle`] returns, whatever the outcome.

use std::time::Instant;

use metrics::counter;
use tracing::{Instrument, Span, info, info_span, warn};

use crate::{
    application::{
        error::GatewayError,
        render::{PlantUmlRenderer, Workspace, WorkspaceManager},
        storage::ArtifactPublisher,
    },
    domain::render::{DeliveryMode, RenderRequest, ResponseEnvelope, UrlEnvelope},
};

pub const METRIC_REQUESTS_TOTAL: &str = "plantuml_gateway_requests_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parsing,
    Rendering,
    Delivering,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Parsing => "parsing",
            Stage::Rendering => "rendering",
            Stage::Delivering => "delivering",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

#[derive(Clone)]
pub struct RenderGateway {
    workspaces: WorkspaceManager,
    renderer: PlantUmlRenderer,
    publisher: ArtifactPublisher,
}

impl RenderGateway {
    pub fn new(
        workspaces: WorkspaceManager,
        renderer: PlantUmlRenderer,
        publisher: ArtifactPublisher,
    ) -> Self {
        Self {
            workspaces,
            renderer,
            publisher,
        }
    }

    /// Handle one raw request body end to end.
    ///
    /// Runs inside a `render_request` span whose `stage` field follows the request.
    pub async fn handle(&self, body: &[u8]) -> Result<ResponseEnvelope, GatewayError> {
        let started_at = Instant::now();
        let span = info_span!("render_request", stage = Stage::Parsing.as_str());
        let mut stage = Stage::Parsing;
        let result = self
            .run(body, &mut stage)
            .instrument(span.clone())
            .await;

        let terminal = if result.is_ok() {
            Stage::Completed
        } else {
            Stage::Failed
        };
        span.record("stage", terminal.as_str());

        let (outcome, stage_label) = match &result {
            Ok(envelope) => (envelope.delivery_mode().as_str(), terminal.as_str()),
            Err(err) => (err.kind().as_str(), stage.as_str()),
        };
        counter!(
            METRIC_REQUESTS_TOTAL,
            "outcome" => outcome,
            "stage" => stage_label
        )
        .increment(1);

        span.in_scope(|| match &result {
            Ok(envelope) => info!(
                target = "application::gateway",
                op = "gateway::handle",
                result = "ok",
                delivery = envelope.delivery_mode().as_str(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Render request completed"
            ),
            Err(err) => warn!(
                target = "application::gateway",
                op = "gateway::handle",
                result = "error",
                failed_during = stage.as_str(),
                failure_kind = err.kind().as_str(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "Render request failed"
            ),
        });

        result
    }

    async fn run(&self, body: &[u8], stage: &mut Stage) -> Result<ResponseEnvelope, GatewayError> {
        let request = RenderRequest::from_json_slice(body).map_err(GatewayError::InvalidRequest)?;

        advance(stage, Stage::Rendering);
        let workspace = self.workspaces.acquire().await?;
        let result = self.render_and_deliver(&request, &workspace, stage).await;

        let path = workspace.path().to_path_buf();
        if let Err(err) = workspace.release().await {
            warn!(
                target = "application::gateway",
                op = "gateway::release_workspace",
                result = "error",
                path = %path.display(),
                error = %err,
                "Failed to remove workspace"
            );
        }

        result
    }

    async fn render_and_deliver(
        &self,
        request: &RenderRequest,
        workspace: &Workspace,
        stage: &mut Stage,
    ) -> Result<ResponseEnvelope, GatewayError> {
        let artifact = self.renderer.render(&request.diagram, workspace).await?;

        advance(stage, Stage::Delivering);
        match DeliveryMode::select(request.deliver_inline) {
            DeliveryMode::Inline => Ok(ResponseEnvelope::Inline(artifact)),
            DeliveryMode::Url => {
                let published = self.publisher.publish(artifact).await?;
                Ok(ResponseEnvelope::Url(UrlEnvelope::image(published.url)))
            }
        }
    }
}

/// Move to `next` and mirror it onto the current request span.
fn advance(stage: &mut Stage, next: Stage) {
    *stage = next;
    Span::current().record("stage", next.as_str());
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        application::{
            error::FailureKind,
            render::RenderError,
            storage::{ArtifactStore, StorageError},
        },
        domain::{render::RenderedArtifact, storage_key::StorageKey},
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::{
        fs,
        path::{Path, PathBuf},
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tempfile::TempDir;
    use tracing_subscriber::{
        Layer,
        layer::{Context, SubscriberExt},
    };

    const STUB_OK: &str = r#"base=$(basename "$2" .puml)
printf '\211PNG\r\n\032\n' > "$4/$base.png"
cat "$2" >> "$4/$base.png""#;

    #[derive(Default)]
    struct MemoryStore {
        puts: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    #[async_trait]
    impl ArtifactStore for MemoryStore {
        async fn put_public(
            &self,
            key: &StorageKey,
            artifact: &RenderedArtifact,
        ) -> Result<(), StorageError> {
            self.puts
                .lock()
                .expect("puts lock")
                .push((key.to_string(), artifact.bytes().to_vec()));
            if self.fail {
                return Err(StorageError::put(key, "InvalidAccessKeyId"));
            }
            Ok(())
        }

        fn public_url(&self, key: &StorageKey) -> String {
            format!("https://diagrams-bucket.nyc3.digitaloceanspaces.com/{key}")
        }
    }

    struct Harness {
        dir: TempDir,
        store: Arc<MemoryStore>,
        gateway: RenderGateway,
    }

    impl Harness {
        fn new(script: &str) -> Self {
            Self::with_store(script, MemoryStore::default(), Duration::from_secs(10))
        }

        fn with_store(script: &str, store: MemoryStore, timeout: Duration) -> Self {
            let dir = TempDir::new().expect("temp dir");
            let marker = dir.path().join("invoked");
            let script_path = dir.path().join("fake-plantuml.sh");
            fs::write(
                &script_path,
                format!(
                    "#!/bin/sh\nset -eu\ntouch \"{}\"\n{script}\n",
                    marker.display()
                ),
            )
            .expect("write script");

            let store = Arc::new(store);
            let gateway = RenderGateway::new(
                WorkspaceManager::new(dir.path().join("workspaces")),
                PlantUmlRenderer::new(
                    PathBuf::from("/bin/sh"),
                    vec![script_path.into_os_string()],
                    timeout,
                ),
                ArtifactPublisher::new(store.clone(), "diagrams"),
            );
            Self {
                dir,
                store,
                gateway,
            }
        }

        fn renderer_invoked(&self) -> bool {
            self.dir.path().join("invoked").exists()
        }

        fn uploads(&self) -> usize {
            self.store.puts.lock().expect("puts lock").len()
        }

        fn leftover_workspaces(&self) -> usize {
            let root = self.dir.path().join("workspaces");
            if !root.exists() {
                return 0;
            }
            fs::read_dir(root).expect("read workspace root").count()
        }
    }

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).expect("serialize body")
    }

    fn expected_png(diagram: &str) -> Vec<u8> {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(diagram.as_bytes());
        bytes
    }

    #[tokio::test]
    async fn url_delivery_uploads_and_returns_envelope() {
        let harness = Harness::new(STUB_OK);
        let diagram = "@startuml\nAlice->Bob: hi\n@enduml";

        let envelope = harness
            .gateway
            .handle(&body(json!({ "diagram": diagram })))
            .await
            .expect("rendered");

        let ResponseEnvelope::Url(envelope) = envelope else {
            panic!("expected url envelope");
        };
        assert_eq!(envelope.kind, "image");
        assert_eq!(envelope.source, "url");
        assert!(
            envelope
                .url
                .starts_with("https://diagrams-bucket.nyc3.digitaloceanspaces.com/diagrams/"),
            "{}",
            envelope.url
        );
        assert!(envelope.url.ends_with(".png"));

        let puts = harness.store.puts.lock().expect("puts lock");
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].1, expected_png(diagram));
        assert_eq!(harness.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn inline_delivery_returns_renderer_output_without_upload() {
        let harness = Harness::new(STUB_OK);
        let diagram = "@startuml\nA->B\n@enduml";

        let envelope = harness
            .gateway
            .handle(&body(json!({ "diagram": diagram, "download": true })))
            .await
            .expect("rendered");

        let ResponseEnvelope::Inline(artifact) = envelope else {
            panic!("expected inline artifact");
        };
        assert_eq!(artifact.bytes().as_ref(), expected_png(diagram).as_slice());
        assert_eq!(harness.uploads(), 0);
        assert_eq!(harness.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn missing_diagram_short_circuits() {
        let harness = Harness::new(STUB_OK);

        for raw in [b"{}".to_vec(), b"not json".to_vec(), body(json!({"diagram": ""}))] {
            let err = harness.gateway.handle(&raw).await.expect_err("rejected");
            assert_eq!(err.kind(), FailureKind::ClientInput);
        }

        assert!(!harness.renderer_invoked());
        assert_eq!(harness.uploads(), 0);
        assert_eq!(harness.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn failing_renderer_is_always_a_renderer_failure() {
        let harness = Harness::new("echo 'Error line 2 in file' >&2\nexit 1");

        for _ in 0..3 {
            let err = harness
                .gateway
                .handle(&body(json!({ "diagram": "@startuml\nbroken\n@enduml" })))
                .await
                .expect_err("renderer fails");
            assert_eq!(err.kind(), FailureKind::Renderer);
            assert!(matches!(err, GatewayError::Render(RenderError::Exit { .. })));
        }

        assert_eq!(harness.uploads(), 0);
        assert_eq!(harness.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn storage_failure_is_classified_and_cleans_up() {
        let harness = Harness::with_store(
            STUB_OK,
            MemoryStore {
                fail: true,
                ..Default::default()
            },
            Duration::from_secs(10),
        );

        let err = harness
            .gateway
            .handle(&body(json!({ "diagram": "@startuml\n@enduml" })))
            .await
            .expect_err("upload fails");

        assert_eq!(err.kind(), FailureKind::Storage);
        assert!(err.to_string().contains("InvalidAccessKeyId"));
        assert_eq!(harness.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn timed_out_render_cleans_up_workspace() {
        let harness = Harness::with_store(
            "exec sleep 30",
            MemoryStore::default(),
            Duration::from_millis(200),
        );

        let err = harness
            .gateway
            .handle(&body(json!({ "diagram": "@startuml\n@enduml" })))
            .await
            .expect_err("times out");

        assert_eq!(err.kind(), FailureKind::Renderer);
        assert_eq!(harness.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn cancelled_request_leaves_no_workspace_behind() {
        let harness = Harness::with_store(
            "exec sleep 30",
            MemoryStore::default(),
            Duration::from_secs(60),
        );

        let request = body(json!({ "diagram": "@startuml\n@enduml" }));
        let cancelled =
            tokio::time::timeout(Duration::from_secs(1), harness.gateway.handle(&request))
                .await;

        assert!(cancelled.is_err(), "request should still be in flight");
        assert!(harness.renderer_invoked());
        assert_eq!(harness.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn workspace_failure_is_a_resource_failure() {
        let harness = Harness::new(STUB_OK);
        let blocked_root: &Path = &harness.dir.path().join("blocked");
        fs::write(blocked_root, b"file").expect("write blocker");
        let gateway = RenderGateway::new(
            WorkspaceManager::new(blocked_root.join("workspaces")),
            harness.gateway.renderer.clone(),
            harness.gateway.publisher.clone(),
        );

        let err = gateway
            .handle(&body(json!({ "diagram": "@startuml\n@enduml" })))
            .await
            .expect_err("workspace cannot be created");

        assert_eq!(err.kind(), FailureKind::Resource);
        assert!(!harness.renderer_invoked());
    }

    #[derive(Clone, Default)]
    struct StageRecorder {
        stages: Arc<Mutex<Vec<String>>>,
    }

    struct StageVisitor<'a>(&'a mut Vec<String>);

    impl tracing::field::Visit for StageVisitor<'_> {
        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            if field.name() == "stage" {
                self.0.push(value.to_string());
            }
        }

        fn record_debug(&mut self, _field: &tracing::field::Field, _value: &dyn std::fmt::Debug) {}
    }

    impl<S: tracing::Subscriber> Layer<S> for StageRecorder {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: Context<'_, S>,
        ) {
            if attrs.metadata().name() == "render_request" {
                attrs.record(&mut StageVisitor(&mut self.stages.lock().expect("stages lock")));
            }
        }

        fn on_record(
            &self,
            _id: &tracing::span::Id,
            values: &tracing::span::Record<'_>,
            _ctx: Context<'_, S>,
        ) {
            values.record(&mut StageVisitor(&mut self.stages.lock().expect("stages lock")));
        }
    }

    impl StageRecorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.stages.lock().expect("stages lock"))
        }
    }

    #[tokio::test]
    async fn request_span_tracks_each_stage() {
        let recorder = StageRecorder::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(recorder.clone()));

        let harness = Harness::new(STUB_OK);
        harness
            .gateway
            .handle(&body(json!({ "diagram": "@startuml\n@enduml" })))
            .await
            .expect("rendered");
        assert_eq!(
            recorder.take(),
            ["parsing", "rendering", "delivering", "completed"]
        );

        harness.gateway.handle(b"{}").await.expect_err("rejected");
        assert_eq!(recorder.take(), ["parsing", "failed"]);

        let failing = Harness::new("exit 3");
        failing
            .gateway
            .handle(&body(json!({ "diagram": "@startuml\n@enduml" })))
            .await
            .expect_err("renderer fails");
        assert_eq!(recorder.take(), ["parsing", "rendering", "failed"]);
    }
}
