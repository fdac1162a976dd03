use anyhow::{Result, bail};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments (CLI wins).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Primary S3 endpoint requests are forwarded to.
    pub main_endpoint: String,
    pub main_access_key: String,
    pub main_secret_key: String,
    /// Secondary endpoint mutating operations are replayed against.
    pub mirror_endpoint: String,
    pub mirror_access_key: String,
    pub mirror_secret_key: String,
    /// Prepended to the bucket name when addressing the mirror.
    pub mirror_bucket_prefix: String,
    /// Inventory connection string; `None` disables the inventory.
    pub postgres_url: Option<String>,
    /// Forces the inventory off even when a connection string is present.
    pub disable_database: bool,
    /// Domain used to tell path-style from virtual-hosted inbound requests.
    pub proxy_domain: Option<String>,
    pub log_level: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Write-through S3 mirror proxy")]
pub struct Args {
    /// Host to bind to (overrides PROXY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PROXY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Primary S3 endpoint (overrides MAIN_S3_ENDPOINT)
    #[arg(long)]
    pub main_endpoint: Option<String>,

    /// Main access key (overrides MAIN_ACCESS_KEY)
    #[arg(long)]
    pub main_access_key: Option<String>,

    /// Main secret key (overrides MAIN_SECRET_KEY)
    #[arg(long)]
    pub main_secret_key: Option<String>,

    /// Mirror S3 endpoint (overrides MIRROR_S3_ENDPOINT)
    #[arg(long)]
    pub mirror_endpoint: Option<String>,

    /// Mirror access key (overrides MIRROR_ACCESS_KEY)
    #[arg(long)]
    pub mirror_access_key: Option<String>,

    /// Mirror secret key (overrides MIRROR_SECRET_KEY)
    #[arg(long)]
    pub mirror_secret_key: Option<String>,

    /// Bucket-name prefix on the mirror (overrides MIRROR_BUCKET_PREFIX)
    #[arg(long)]
    pub mirror_bucket_prefix: Option<String>,

    /// Inventory database URL (overrides POSTGRES_URL)
    #[arg(long)]
    pub postgres_url: Option<String>,

    /// Disable the inventory database (overrides DISABLE_DATABASE)
    #[arg(long)]
    pub disable_database: bool,

    /// Domain for virtual-hosted style detection (overrides PROXY_DOMAIN)
    #[arg(long)]
    pub proxy_domain: Option<String>,

    /// Log level: debug|info|warn|error|off (overrides LOG_LEVEL)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into an AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::merge(Args::parse())
    }

    fn merge(args: Args) -> Result<Self> {
        let env_port = match env::var("PROXY_PORT") {
            Ok(value) => match value.parse::<u16>() {
                Ok(port) => Some(port),
                Err(_) => bail!("invalid PROXY_PORT value `{}`", value),
            },
            Err(_) => None,
        };

        let cfg = Self {
            host: args
                .host
                .or_else(|| env_nonempty("PROXY_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.or(env_port).unwrap_or(8080),
            main_endpoint: args
                .main_endpoint
                .or_else(|| env_nonempty("MAIN_S3_ENDPOINT"))
                .unwrap_or_else(|| "https://s3.amazonaws.com".into()),
            main_access_key: args
                .main_access_key
                .or_else(|| env_nonempty("MAIN_ACCESS_KEY"))
                .unwrap_or_default(),
            main_secret_key: args
                .main_secret_key
                .or_else(|| env_nonempty("MAIN_SECRET_KEY"))
                .unwrap_or_default(),
            mirror_endpoint: args
                .mirror_endpoint
                .or_else(|| env_nonempty("MIRROR_S3_ENDPOINT"))
                .unwrap_or_default(),
            mirror_access_key: args
                .mirror_access_key
                .or_else(|| env_nonempty("MIRROR_ACCESS_KEY"))
                .unwrap_or_default(),
            mirror_secret_key: args
                .mirror_secret_key
                .or_else(|| env_nonempty("MIRROR_SECRET_KEY"))
                .unwrap_or_default(),
            mirror_bucket_prefix: args
                .mirror_bucket_prefix
                .or_else(|| env_nonempty("MIRROR_BUCKET_PREFIX"))
                .unwrap_or_default(),
            postgres_url: args.postgres_url.or_else(|| env_nonempty("POSTGRES_URL")),
            disable_database: args.disable_database
                || env_nonempty("DISABLE_DATABASE").as_deref() == Some("true"),
            proxy_domain: args.proxy_domain.or_else(|| env_nonempty("PROXY_DOMAIN")),
            log_level: args
                .log_level
                .or_else(|| env_nonempty("LOG_LEVEL"))
                .unwrap_or_else(|| "info".into()),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.main_access_key.is_empty() {
            missing.push("MAIN_ACCESS_KEY");
        }
        if self.main_secret_key.is_empty() {
            missing.push("MAIN_SECRET_KEY");
        }
        if self.mirror_endpoint.is_empty() {
            missing.push("MIRROR_S3_ENDPOINT");
        }
        if self.mirror_access_key.is_empty() {
            missing.push("MIRROR_ACCESS_KEY");
        }
        if self.mirror_secret_key.is_empty() {
            missing.push("MIRROR_SECRET_KEY");
        }
        if !missing.is_empty() {
            bail!(
                "required environment variables not set: {}",
                missing.join(", ")
            );
        }
        Ok(())
    }

    /// The inventory runs only when a connection string is configured and
    /// tracking has not been forced off.
    pub fn inventory_enabled(&self) -> bool {
        !self.disable_database && self.postgres_url.is_some()
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}
