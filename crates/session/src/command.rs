// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `tokenward` subcommands. Credentials persist under the state directory
//! between invocations.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::ApiError;
use crate::event::SessionEvent;
use crate::gateway::ApiRequest;
use crate::inspect::{Clock, SystemClock};
use crate::session::{SessionController, SessionState};

/// Top-level CLI.
#[derive(Debug, clap::Parser)]
#[command(name = "tokenward", version, about = "Client-side credential session manager")]
pub struct Cli {
    #[command(flatten)]
    pub config: SessionConfig,

    /// Log format (json or text).
    #[arg(long, env = "TOKENWARD_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log filter directive, e.g. `info` or `tokenward=debug`.
    #[arg(long, env = "TOKENWARD_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Log in and store the issued credentials.
    Login(LoginArgs),
    /// Forget stored credentials.
    Logout,
    /// Show the session state and remaining credential lifetime.
    Status,
    /// Authenticated GET; prints the JSON body.
    Get(PathArgs),
    /// Print the authenticated streaming URL for a path.
    WsUrl(PathArgs),
    /// Keep the stored session fresh until interrupted.
    Watch,
}

#[derive(Debug, clap::Args)]
pub struct LoginArgs {
    #[arg(long, short)]
    pub username: String,
    #[arg(long, short, env = "TOKENWARD_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct PathArgs {
    /// Path relative to the API base URL.
    pub path: String,
}

/// Run the selected subcommand against the stored session.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let session = SessionController::from_config(&cli.config);
    let result = match cli.command {
        Command::Login(args) => cmd_login(&session, args).await,
        Command::Logout => {
            session.logout();
            println!("Logged out.");
            Ok(())
        }
        Command::Status => cmd_status(&session).await,
        Command::Get(args) => cmd_get(&session, &args.path).await,
        Command::WsUrl(args) => {
            println!("{}", session.ws_url(&args.path).await.map_err(login_hint)?);
            Ok(())
        }
        Command::Watch => cmd_watch(&session).await,
    };
    session.shutdown();
    result
}

async fn cmd_login(session: &Arc<SessionController>, args: LoginArgs) -> anyhow::Result<()> {
    let password = args.password.context("password required (--password or TOKENWARD_PASSWORD)")?;
    let user = session.login(&args.username, &password).await?;
    println!("Logged in as {} ({:?}).", user.username, user.role);
    Ok(())
}

async fn cmd_status(session: &Arc<SessionController>) -> anyhow::Result<()> {
    match session.init().await {
        SessionState::Authenticated(user) | SessionState::Refreshing(user) => {
            println!("authenticated: {} ({:?})", user.username, user.role);
            let claims = session.claims().map_err(login_hint)?;
            let now_ms = SystemClock.now_ms();
            let remaining = claims.expires_at_ms.saturating_sub(now_ms) / 1000;
            println!("access for {} expires in {remaining}s", claims.subject);
        }
        other => println!("{}", other.as_str()),
    }
    Ok(())
}

async fn cmd_get(session: &Arc<SessionController>, path: &str) -> anyhow::Result<()> {
    let body: serde_json::Value =
        session.request_json(&ApiRequest::get(path)).await.map_err(login_hint)?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn cmd_watch(session: &Arc<SessionController>) -> anyhow::Result<()> {
    let mut events = session.subscribe();
    let state = session.init().await;
    if !state.is_authenticated() {
        anyhow::bail!("no stored session; run `tokenward login` first");
    }
    info!(state = state.as_str(), "watching session");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => {
                    info!(event = %serde_json::to_string(&event)?, "session event");
                    if matches!(event, SessionEvent::SessionEnded { .. } | SessionEvent::LoggedOut) {
                        anyhow::bail!("session ended");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "event stream lagged"),
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn login_hint(err: ApiError) -> anyhow::Error {
    let needs_login = err.code.requires_login();
    let err = anyhow::Error::new(err);
    if needs_login {
        err.context("not signed in; run `tokenward login`")
    } else {
        err
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
