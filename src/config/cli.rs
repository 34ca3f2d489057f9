use std::path::PathBuf;

use clap::{Args, FromArgMatches, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the gateway binary.
#[derive(Debug, Parser)]
#[command(
    name = "plantuml-gateway",
    version,
    about = "Render PlantUML diagrams to PNG over HTTP"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PLANTUML_GATEWAY_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP gateway.
    Serve(Box<ServeArgs>),
    /// Resolve and validate configuration, then exit.
    #[command(name = "check-config")]
    CheckConfig(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

impl ServeArgs {
    /// Serve arguments for a bare invocation: no flags, so only `env` fallbacks apply.
    pub fn from_env() -> Result<Self, clap::Error> {
        let command = Self::augment_args(clap::Command::new("serve"));
        let matches = command.try_get_matches_from(["serve"])?;
        Self::from_arg_matches(&matches)
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct RendererOverrides {
    /// Override the program used to launch PlantUML (usually `java`).
    #[arg(long = "renderer-program", value_name = "PATH")]
    pub program: Option<PathBuf>,

    /// Override the PlantUML jar passed via `-jar`; an empty value runs the program directly.
    #[arg(long = "plantuml-jar", env = "PLANTUML_JAR", value_name = "PATH")]
    pub jar: Option<String>,

    /// Override the renderer deadline.
    #[arg(long = "renderer-timeout-seconds", value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Override the directory holding per-request workspaces.
    #[arg(long = "renderer-workspace-root", value_name = "PATH")]
    pub workspace_root: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the object storage region.
    #[arg(long = "storage-region", env = "SPACE_REGION", value_name = "REGION")]
    pub region: Option<String>,

    /// Override the object storage bucket.
    #[arg(long = "storage-bucket", env = "SPACE_BUCKET", value_name = "BUCKET")]
    pub bucket: Option<String>,

    /// Override the storage provider domain used to derive endpoint and public URLs.
    #[arg(long = "storage-domain", value_name = "DOMAIN")]
    pub domain: Option<String>,

    /// Override the S3 API endpoint.
    #[arg(long = "storage-endpoint", env = "SPACE_ENDPOINT", value_name = "URL")]
    pub endpoint: Option<String>,

    /// Override the storage access key.
    #[arg(
        long = "storage-access-key",
        env = "SPACE_ACCESS_KEY",
        value_name = "KEY",
        hide_env_values = true
    )]
    pub access_key: Option<String>,

    /// Override the storage secret key.
    #[arg(
        long = "storage-secret-key",
        env = "SPACE_SECRET_KEY",
        value_name = "SECRET",
        hide_env_values = true
    )]
    pub secret_key: Option<String>,

    /// Override the key prefix uploaded diagrams are stored under.
    #[arg(long = "storage-folder", env = "SPACE_FOLDER", value_name = "PREFIX")]
    pub folder: Option<String>,

    /// Override the base URL public links are built from.
    #[arg(long = "storage-public-base-url", value_name = "URL")]
    pub public_base_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub renderer: RendererOverrides,

    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", env = "PORT", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the maximum accepted request body size in bytes.
    #[arg(long = "server-max-body-bytes", value_name = "BYTES")]
    pub server_max_body_bytes: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}
