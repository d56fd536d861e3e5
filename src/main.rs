use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Password;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

use bearer_client::auth::{SessionManager, SessionStore, SqliteStorage, Token, TokenStore, User};
use bearer_client::config::{self, CliArgs, Command, Config};
use bearer_client::transport::{FormPart, RequestDescriptor};
use bearer_client::AuthClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before parsing so clap sees its values
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::load(&args)?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        "Session database: {}",
        config.session_db_file.display()
    );

    let storage = Arc::new(SqliteStorage::open(&config.session_db_file)?);
    let store = Arc::new(SessionStore::load(storage));
    let session = Arc::new(SessionManager::new(store.clone()));

    match args.command {
        Command::Login {
            access_token,
            refresh_token,
            user_id,
        } => {
            let access_token = match access_token {
                Some(token) => token,
                None => prompt_secret("Access token")?,
            };
            let refresh_token = match refresh_token {
                Some(token) => token,
                None => prompt_secret("Refresh token")?,
            };
            let user = user_id.map(|id| User {
                id,
                name: String::new(),
                email: String::new(),
                is_active: true,
            });

            session.login(Token::new(access_token, refresh_token), user)?;
            println!("✅ Session stored in {}", config.session_db_file.display());
        }

        Command::Logout => {
            store.logout()?;
            println!("Session cleared");
        }

        Command::Status => {
            match store.get() {
                Some(token) => println!(
                    "Token: {}...",
                    token.access_token.chars().take(8).collect::<String>()
                ),
                None => println!("Token: none"),
            }
            match store.user_id() {
                Some(id) => println!("User: {}", id),
                None => println!("User: none"),
            }
        }

        Command::Request {
            method,
            path,
            data,
            query,
            file,
        } => {
            let client = AuthClient::from_config(&config, store.clone(), session.clone())?;
            let request = build_request(&method, &path, data, &query, &file).await?;

            let response = client
                .send(request)
                .await
                .with_context(|| format!("{} {} failed", method.to_uppercase(), path))?;
            let body: Value = response.json()?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

fn prompt_secret(label: &str) -> Result<String> {
    let value: String = Password::new()
        .with_prompt(label)
        .interact()
        .with_context(|| format!("Failed to read {}", label))?;
    if value.is_empty() {
        anyhow::bail!("{} cannot be empty", label);
    }
    Ok(value)
}

async fn build_request(
    method: &str,
    path: &str,
    data: Option<String>,
    query: &[String],
    files: &[String],
) -> Result<RequestDescriptor> {
    let method: Method = method
        .to_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let params = query
        .iter()
        .map(|pair| config::parse_pair(pair))
        .collect::<Result<Vec<_>>>()?;

    let mut request = RequestDescriptor::new(method, path).with_query(params);

    if !files.is_empty() {
        let mut parts = Vec::new();
        for entry in files {
            let (name, file_path) = config::parse_pair(entry)?;
            let bytes = tokio::fs::read(&file_path)
                .await
                .with_context(|| format!("Failed to read {}", file_path))?;
            let file_name = std::path::Path::new(&file_path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file_path.clone());
            parts.push(FormPart::file(name, file_name, bytes.into()));
        }
        if let Some(data) = data {
            parts.push(FormPart::text("data", data));
        }
        request = request.with_multipart(parts);
    } else if let Some(data) = data {
        let body: Value = serde_json::from_str(&data).context("--data must be valid JSON")?;
        request = request.with_json(body);
    }

    Ok(request)
}
