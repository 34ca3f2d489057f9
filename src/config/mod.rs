//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    fmt,
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CliArgs, Command, RendererOverrides, ServeArgs, ServeOverrides, StorageOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "plantuml-gateway";
const ENV_PREFIX: &str = "PLANTUML_GATEWAY";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;
const DEFAULT_RENDERER_PROGRAM: &str = "java";
const DEFAULT_PLANTUML_JAR: &str = "/app/plantuml.jar";
const DEFAULT_RENDERER_TIMEOUT_SECS: u64 = 60;
const DEFAULT_WORKSPACE_DIR_NAME: &str = "plantuml-gateway";
const DEFAULT_STORAGE_REGION: &str = "nyc3";
const DEFAULT_STORAGE_DOMAIN: &str = "digitaloceanspaces.com";
const DEFAULT_STORAGE_FOLDER: &str = "diagrams";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub renderer: RendererSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub max_body_bytes: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub program: PathBuf,
    /// `None` runs `program` directly instead of `program -jar <jar>`.
    pub jar: Option<PathBuf>,
    pub timeout: Duration,
    pub workspace_root: PathBuf,
}

#[derive(Clone)]
pub struct StorageSettings {
    pub region: String,
    pub bucket: Option<String>,
    pub domain: String,
    pub endpoint: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub folder: String,
    pub public_base_url: Option<String>,
}

impl StorageSettings {
    /// Base URL public object links are built from: the explicit override, or
    /// `https://<bucket>.<region>.<domain>` when a bucket is configured.
    pub fn resolved_public_base_url(&self) -> Option<String> {
        if let Some(base) = self.public_base_url.as_ref() {
            return Some(base.clone());
        }
        self.bucket
            .as_ref()
            .map(|bucket| format!("https://{bucket}.{}.{}", self.region, self.domain))
    }
}

impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSettings")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("domain", &self.domain)
            .field("endpoint", &self.endpoint)
            .field("access_key", &redacted(&self.access_key))
            .field("secret_key", &redacted(&self.secret_key))
            .field("folder", &self.folder)
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("failed to read serve overrides from the environment: {0}")]
    Env(#[from] clap::Error),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) | Some(Command::CheckConfig(args)) => {
            raw.apply_serve_overrides(&args.overrides)
        }
        None => raw.apply_serve_overrides(&ServeArgs::from_env()?.overrides),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    renderer: RawRendererSettings,
    storage: RawStorageSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(limit) = overrides.server_max_body_bytes {
            self.server.max_body_bytes = Some(limit);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }

        self.apply_renderer_overrides(&overrides.renderer);
        self.apply_storage_overrides(&overrides.storage);
    }

    fn apply_renderer_overrides(&mut self, overrides: &RendererOverrides) {
        if let Some(program) = overrides.program.as_ref() {
            self.renderer.program = Some(program.clone());
        }
        if let Some(jar) = overrides.jar.as_ref() {
            self.renderer.jar = Some(jar.clone());
        }
        if let Some(seconds) = overrides.timeout_seconds {
            self.renderer.timeout_seconds = Some(seconds);
        }
        if let Some(root) = overrides.workspace_root.as_ref() {
            self.renderer.workspace_root = Some(root.clone());
        }
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        let storage = &mut self.storage;
        let pairs = [
            (&mut storage.region, &overrides.region),
            (&mut storage.bucket, &overrides.bucket),
            (&mut storage.domain, &overrides.domain),
            (&mut storage.endpoint, &overrides.endpoint),
            (&mut storage.access_key, &overrides.access_key),
            (&mut storage.secret_key, &overrides.secret_key),
            (&mut storage.folder, &overrides.folder),
            (&mut storage.public_base_url, &overrides.public_base_url),
        ];
        for (target, value) in pairs {
            if let Some(value) = value.as_ref() {
                *target = Some(value.clone());
            }
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            renderer,
            storage,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            renderer: build_renderer_settings(renderer)?,
            storage: build_storage_settings(storage)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = trimmed(server.host).unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let max_body_value = server.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    let max_body_usize = usize::try_from(max_body_value).map_err(|_| {
        LoadError::invalid(
            "server.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;
    let max_body_bytes = NonZeroUsize::new(max_body_usize).ok_or_else(|| {
        LoadError::invalid("server.max_body_bytes", "must be greater than zero")
    })?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        max_body_bytes,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match trimmed(logging.level) {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_renderer_settings(renderer: RawRendererSettings) -> Result<RendererSettings, LoadError> {
    let program = renderer
        .program
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RENDERER_PROGRAM));
    if program.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "renderer.program",
            "path must not be empty",
        ));
    }

    let jar = match renderer.jar {
        Some(jar) => trimmed(Some(jar)).map(PathBuf::from),
        None => Some(PathBuf::from(DEFAULT_PLANTUML_JAR)),
    };

    let timeout_secs = renderer
        .timeout_seconds
        .unwrap_or(DEFAULT_RENDERER_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "renderer.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let workspace_root = renderer
        .workspace_root
        .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_WORKSPACE_DIR_NAME));
    if workspace_root.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "renderer.workspace_root",
            "path must not be empty",
        ));
    }

    Ok(RendererSettings {
        program,
        jar,
        timeout: Duration::from_secs(timeout_secs),
        workspace_root,
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let region = trimmed(storage.region).unwrap_or_else(|| DEFAULT_STORAGE_REGION.to_string());
    let domain = trimmed(storage.domain)
        .map(|domain| domain.trim_matches('.').to_string())
        .unwrap_or_else(|| DEFAULT_STORAGE_DOMAIN.to_string());
    if domain.is_empty() {
        return Err(LoadError::invalid("storage.domain", "must not be empty"));
    }

    let endpoint = trimmed(storage.endpoint).unwrap_or_else(|| format!("https://{region}.{domain}"));
    ensure_http_url("storage.endpoint", &endpoint)?;

    let public_base_url = trimmed(storage.public_base_url)
        .map(|url| url.trim_end_matches('/').to_string());
    if let Some(url) = public_base_url.as_deref() {
        ensure_http_url("storage.public_base_url", url)?;
    }

    let folder = trimmed(storage.folder)
        .map(|folder| folder.trim_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_STORAGE_FOLDER.to_string());
    if folder.is_empty() {
        return Err(LoadError::invalid("storage.folder", "must not be empty"));
    }

    Ok(StorageSettings {
        region,
        bucket: trimmed(storage.bucket),
        domain,
        endpoint,
        access_key: trimmed(storage.access_key),
        secret_key: trimmed(storage.secret_key),
        folder,
        public_base_url,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    program: Option<PathBuf>,
    jar: Option<String>,
    timeout_seconds: Option<u64>,
    workspace_root: Option<PathBuf>,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    region: Option<String>,
    bucket: Option<String>,
    domain: Option<String>,
    endpoint: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    folder: Option<String>,
    public_base_url: Option<String>,
}

impl fmt::Debug for RawStorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawStorageSettings")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("domain", &self.domain)
            .field("endpoint", &self.endpoint)
            .field("access_key", &redacted(&self.access_key))
            .field("secret_key", &redacted(&self.secret_key))
            .field("folder", &self.folder)
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

fn redacted(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "<redacted>")
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn ensure_http_url(key: &'static str, value: &str) -> Result<(), LoadError> {
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(())
    } else {
        Err(LoadError::invalid(
            key,
            format!("`{value}` must start with http:// or https://"),
        ))
    }
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
