use std::{
    ffi::OsString,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use metrics::histogram;
use thiserror::Error;
use tokio::{fs, process::Command};
use tracing::{info, warn};

use super::workspace::Workspace;
use crate::{application::error::FailureKind, domain::render::RenderedArtifact};

pub const METRIC_RENDER_MS: &str = "plantuml_gateway_render_ms";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to write diagram source: {0}")]
    WriteSource(#[source] io::Error),
    #[error("PlantUML renderer unavailable: {0}")]
    NotFound(#[source] io::Error),
    #[error("failed to run PlantUML renderer: {0}")]
    Spawn(#[source] io::Error),
    #[error("PlantUML invocation failed ({}): {stderr}", describe_exit(.exit_code))]
    Exit {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("PlantUML exited successfully but wrote no PNG to `{path}`")]
    MissingOutput { path: PathBuf },
    #[error("PlantUML did not finish within {timeout:?}")]
    TimedOut { timeout: Duration },
    #[error("failed to read rendered PNG: {0}")]
    ReadOutput(#[source] io::Error),
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

impl RenderError {
    /// Diagram faults are renderer failures; a broken host environment is a resource failure.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RenderError::Exit { .. }
            | RenderError::MissingOutput { .. }
            | RenderError::TimedOut { .. } => FailureKind::Renderer,
            RenderError::WriteSource(_)
            | RenderError::NotFound(_)
            | RenderError::Spawn(_)
            | RenderError::ReadOutput(_) => FailureKind::Resource,
        }
    }
}

/// Invokes PlantUML as `<program> [leading args] -tpng <source> -o <workspace>`.
#[derive(Debug, Clone)]
pub struct PlantUmlRenderer {
    program: PathBuf,
    leading_args: Vec<OsString>,
    timeout: Duration,
}

impl PlantUmlRenderer {
    pub fn new(program: PathBuf, leading_args: Vec<OsString>, timeout: Duration) -> Self {
        Self {
            program,
            leading_args,
            timeout,
        }
    }

    /// `java -jar <jar>` style invocation.
    pub fn with_jar(program: PathBuf, jar: &Path, timeout: Duration) -> Self {
        Self::new(
            program,
            vec![OsString::from("-jar"), jar.as_os_str().to_os_string()],
            timeout,
        )
    }

    /// Render `diagram` inside `workspace` and return the PNG bytes.
    ///
    /// The subprocess is killed if this future is dropped or the timeout elapses.
    pub async fn render(
        &self,
        diagram: &str,
        workspace: &Workspace,
    ) -> Result<RenderedArtifact, RenderError> {
        let started_at = Instant::now();
        let source_path = workspace.source_path();
        let output_path = workspace.output_path();

        fs::write(&source_path, diagram.as_bytes())
            .await
            .map_err(|err| {
                warn!(
                    target = "application::render::plantuml",
                    op = "plantuml::render",
                    result = "error",
                    error_code = "write_source",
                    path = %source_path.display(),
                    error = %err,
                    "Failed to write PlantUML source"
                );
                RenderError::WriteSource(err)
            })?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg("-tpng")
            .arg(&source_path)
            .arg("-o")
            .arg(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let cli_started_at = Instant::now();
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|err| {
                warn!(
                    target = "application::render::plantuml",
                    op = "plantuml::render",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn_cli",
                    program = %self.program.display(),
                    error = %err,
                    "Failed to run PlantUML"
                );
                if err.kind() == ErrorKind::NotFound {
                    RenderError::NotFound(err)
                } else {
                    RenderError::Spawn(err)
                }
            })?,
            Err(_) => {
                warn!(
                    target = "application::render::plantuml",
                    op = "plantuml::render",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "timeout",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "PlantUML timed out; subprocess killed"
                );
                return Err(RenderError::TimedOut {
                    timeout: self.timeout,
                });
            }
        };
        let cli_elapsed_ms = cli_started_at.elapsed().as_millis() as u64;

        if !output.status.success() {
            let exit_code = output.status.code();
            let exit_code_value = exit_code.map(i64::from).unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                target = "application::render::plantuml",
                op = "plantuml::render",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                cli_elapsed_ms,
                exit_code = exit_code_value,
                error_code = "plantuml_cli",
                stderr = %stderr,
                "PlantUML invocation failed"
            );
            return Err(RenderError::Exit { exit_code, stderr });
        }

        let rendered = match fs::read(&output_path).await {
            Ok(bytes) => Some(RenderedArtifact::png(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(RenderError::ReadOutput(err)),
        };
        let artifact = match rendered {
            Some(artifact) if !artifact.is_empty() => artifact,
            _ => {
                warn!(
                    target = "application::render::plantuml",
                    op = "plantuml::render",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    cli_elapsed_ms,
                    error_code = "missing_output",
                    path = %output_path.display(),
                    "PlantUML produced no output"
                );
                return Err(RenderError::MissingOutput { path: output_path });
            }
        };

        histogram!(METRIC_RENDER_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        info!(
            target = "application::render::plantuml",
            op = "plantuml::render",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            cli_elapsed_ms,
            png_bytes = artifact.len(),
            "PlantUML diagram rendered"
        );

        Ok(artifact)
    }
}
