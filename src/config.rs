use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, str::FromStr, time::Duration};

/// Which metadata store backs the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Sqlite,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "sqlite" => Ok(StoreKind::Sqlite),
            other => bail!("unknown store `{}` (expected `memory` or `sqlite`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    pub database_url: String,
    pub blob_addr: String,
    pub blob_put_addr: String,
    pub delete_secret: String,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub max_object_size: usize,
    pub cors_allow_origins: Vec<String>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("store", &self.store)
            .field("database_url", &self.database_url)
            .field("blob_addr", &self.blob_addr)
            .field("blob_put_addr", &self.blob_put_addr)
            .field("delete_secret", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .field("max_object_size", &self.max_object_size)
            .field("cors_allow_origins", &self.cors_allow_origins)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "S3-compatible gateway over a framed blob backend")]
pub struct Args {
    /// Host to bind to (overrides SOS_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SOS_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Metadata store: `sqlite` or `memory` (overrides SOS_GATEWAY_STORE)
    #[arg(long)]
    pub store: Option<String>,

    /// Database URL (overrides SOS_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Blob object server for reads and deletes (overrides SOS_GATEWAY_BLOB_ADDR)
    #[arg(long)]
    pub blob_addr: Option<String>,

    /// Blob putter for writes; defaults to the object server (overrides SOS_GATEWAY_BLOB_PUT_ADDR)
    #[arg(long)]
    pub blob_put_addr: Option<String>,

    /// Shared secret sent with blob deletes (overrides SOS_GATEWAY_DELETE_SECRET)
    #[arg(long)]
    pub delete_secret: Option<String>,

    /// Connect timeout for the blob backend, in milliseconds
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Read/write timeout for the blob backend, in milliseconds
    #[arg(long)]
    pub io_timeout_ms: Option<u64>,

    /// Largest accepted object body, in bytes
    #[arg(long)]
    pub max_object_size: Option<usize>,

    /// Comma-separated CORS origins, `*` for any, empty to disable
    /// (overrides SOS_GATEWAY_CORS_ALLOW_ORIGINS)
    #[arg(long)]
    pub cors_allow_origins: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over the variables returned by `lookup` over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |flag: Option<String>, var: &str, default: &str| {
            flag.or_else(|| lookup(var))
                .unwrap_or_else(|| default.to_string())
        };

        let store = match args.store {
            Some(value) => value.parse()?,
            None => parse_var(&lookup, "SOS_GATEWAY_STORE")?.unwrap_or(StoreKind::Sqlite),
        };
        let port = match args.port {
            Some(port) => port,
            None => parse_var(&lookup, "SOS_GATEWAY_PORT")?.unwrap_or(8000),
        };
        let connect_timeout_ms = match args.connect_timeout_ms {
            Some(ms) => ms,
            None => parse_var(&lookup, "SOS_GATEWAY_CONNECT_TIMEOUT_MS")?.unwrap_or(3_000),
        };
        let io_timeout_ms = match args.io_timeout_ms {
            Some(ms) => ms,
            None => parse_var(&lookup, "SOS_GATEWAY_IO_TIMEOUT_MS")?.unwrap_or(30_000),
        };
        let max_object_size = match args.max_object_size {
            Some(size) => size,
            None => parse_var(&lookup, "SOS_GATEWAY_MAX_OBJECT_SIZE")?.unwrap_or(100 * 1024 * 1024),
        };

        let delete_secret = args
            .delete_secret
            .or_else(|| lookup("SOS_GATEWAY_DELETE_SECRET"))
            .filter(|s| !s.is_empty())
            .context("a delete secret is required (--delete-secret or SOS_GATEWAY_DELETE_SECRET)")?;

        let cors_allow_origins: Vec<String> = text(args.cors_allow_origins, "SOS_GATEWAY_CORS_ALLOW_ORIGINS", "*")
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        let blob_addr = text(args.blob_addr, "SOS_GATEWAY_BLOB_ADDR", "127.0.0.1:5004");
        let blob_put_addr = text(args.blob_put_addr, "SOS_GATEWAY_BLOB_PUT_ADDR", &blob_addr);

        Ok(Self {
            host: text(args.host, "SOS_GATEWAY_HOST", "0.0.0.0"),
            port,
            store,
            database_url: text(
                args.database_url,
                "SOS_GATEWAY_DATABASE_URL",
                "sqlite://./data/meta/gateway.db",
            ),
            blob_addr,
            blob_put_addr,
            delete_secret,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            io_timeout: Duration::from_millis(io_timeout_ms),
            max_object_size,
            cors_allow_origins,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("parsing {} value `{}`: {}", name, value, err)),
        None => Ok(None),
    }
}
