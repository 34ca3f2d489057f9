//! Turning diagram source into PNG bytes.
//!
//! Rendering happens inside a per-request [`Workspace`]; the renderer itself
//! holds no state between requests.

mod plantuml;
mod workspace;

use crate::config::RendererSettings;

pub use plantuml::{METRIC_RENDER_MS, PlantUmlRenderer, RenderError};
pub use workspace::{Workspace, WorkspaceError, WorkspaceManager};

impl From<&RendererSettings> for PlantUmlRenderer {
    fn from(settings: &RendererSettings) -> Self {
        match settings.jar.as_deref() {
            Some(jar) => PlantUmlRenderer::with_jar(settings.program.clone(), jar, settings.timeout),
            None => PlantUmlRenderer::new(settings.program.clone(), Vec::new(), settings.timeout),
        }
    }
}

impl From<&RendererSettings> for WorkspaceManager {
    fn from(settings: &RendererSettings) -> Self {
        WorkspaceManager::new(settings.workspace_root.clone())
    }
}
