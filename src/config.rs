use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;

/// Bearer Client - authenticated HTTP requests with automatic token refresh
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the API
    #[arg(short = 'u', long, env = "API_URL", default_value = "http://localhost:3000")]
    pub api_url: String,

    /// Path to the SQLite session database
    #[arg(short = 'd', long, env = "SESSION_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "90")]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Store a token pair, prompting for missing values
    Login {
        #[arg(long)]
        access_token: Option<String>,

        #[arg(long)]
        refresh_token: Option<String>,

        /// Id of the signed-in user
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Clear the stored session
    Logout,

    /// Show the stored session
    Status,

    /// Send an authenticated request and print the JSON response
    Request {
        /// HTTP method (GET, POST, PUT, DELETE, ...)
        method: String,

        /// Path relative to the API URL
        path: String,

        /// JSON request body
        #[arg(long)]
        data: Option<String>,

        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query")]
        query: Vec<String>,

        /// Multipart file field as name=path (repeatable)
        #[arg(short, long = "file")]
        file: Vec<String>,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_url: String,
    pub refresh_path: String,

    // Session persistence
    pub session_db_file: PathBuf,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Build configuration with priority: CLI > ENV > defaults.
    ///
    /// `.env` must already be loaded so clap can see its values.
    pub fn load(args: &CliArgs) -> Result<Self> {
        let config = Config {
            api_url: args.api_url.clone(),

            refresh_path: std::env::var("REFRESH_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "/auth/refresh".to_string()),

            session_db_file: args
                .db_file
                .as_deref()
                .map(expand_tilde)
                .or_else(default_db_path)
                .context("Could not determine a session database path (use -d or set SESSION_DB_FILE)")?,

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level.clone(),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api_url)
            .with_context(|| format!("API_URL is not a valid URL: {}", self.api_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("API_URL must use http or https: {}", self.api_url);
        }

        if !self.refresh_path.starts_with('/') {
            anyhow::bail!("REFRESH_PATH must start with '/': {}", self.refresh_path);
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        Ok(())
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// `<data dir>/bearer-client/session.sqlite3`
fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("bearer-client").join("session.sqlite3"))
}

/// Split a `key=value` argument
pub fn parse_pair(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .with_context(|| format!("Expected key=value, got: {}", s))?;
    if key.is_empty() {
        anyhow::bail!("Empty key in: {}", s);
    }
    Ok((key.to_string(), value.to_string()))
}
