use std::{future::IntoFuture, process, sync::Arc};

use plantuml_gateway::{
    application::{
        error::AppError,
        gateway::RenderGateway,
        render::{PlantUmlRenderer, WorkspaceManager},
        storage::{ArtifactPublisher, ArtifactStore},
    },
    config,
    infra::{
        error::InfraError,
        http::{self, GatewayState},
        object_store::S3ArtifactStore,
        telemetry,
    },
};
use tokio::sync::oneshot;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckConfig(_) => run_check_config(settings),
    }
}

fn build_gateway(settings: &config::Settings) -> Result<RenderGateway, AppError> {
    let store: Arc<dyn ArtifactStore> = Arc::new(S3ArtifactStore::from_settings(&settings.storage)?);
    let publisher = ArtifactPublisher::new(store, settings.storage.folder.clone());

    Ok(RenderGateway::new(
        WorkspaceManager::from(&settings.renderer),
        PlantUmlRenderer::from(&settings.renderer),
        publisher,
    ))
}

fn run_check_config(settings: config::Settings) -> Result<(), AppError> {
    build_gateway(&settings)?;
    info!(
        target = "plantuml_gateway::bootstrap",
        addr = %settings.server.addr,
        renderer = %settings.renderer.program.display(),
        jar = ?settings.renderer.jar,
        workspace_root = %settings.renderer.workspace_root.display(),
        storage = ?settings.storage,
        "configuration is valid"
    );
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let gateway = build_gateway(&settings)?;
    let router = http::build_router(
        GatewayState::new(gateway),
        settings.server.max_body_bytes.get(),
    );

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "plantuml_gateway::bootstrap",
        addr = %settings.server.addr,
        renderer = %settings.renderer.program.display(),
        timeout_ms = settings.renderer.timeout.as_millis() as u64,
        "listening"
    );

    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        })
        .into_future();

    let grace = settings.server.graceful_shutdown;
    let grace_elapsed = async move {
        match signalled_rx.await {
            Ok(()) => tokio::time::sleep(grace).await,
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = grace_elapsed => {
            warn!(
                target = "plantuml_gateway::bootstrap",
                grace_ms = grace.as_millis() as u64,
                "graceful shutdown timed out; dropping in-flight requests"
            );
        }
    }

    info!(target = "plantuml_gateway::bootstrap", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(
                target = "plantuml_gateway::bootstrap",
                error = %err,
                "failed to listen for ctrl-c"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(
                    target = "plantuml_gateway::bootstrap",
                    error = %err,
                    "failed to listen for SIGTERM"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!(
        target = "plantuml_gateway::bootstrap",
        "shutdown signal received"
    );
}
