//! tether CLI.
//!
//! `tether peer` serves the reference peer on stdin/stdout. `tether request`
//! drives a [`HandleLifecycle`] over a peer process: start, one correlated
//! request, stop. Logs go to stderr; stdout carries frames or the reply.

mod args;

use std::{env, io::Write};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tether_config::TetherConfig;
use tether_core::HandleLifecycle;
use tether_native::{PeerConfig, ProcessSystem, peer};
use tether_types::{Command, DomainEvent, EventKind, ResultCode};

use crate::args::{Cli, Commands};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Peer { name } => {
            tracing::info!(peer = %name, "serving peer on stdio");
            peer::serve(tokio::io::stdin(), tokio::io::stdout(), &name).await
        }
        Commands::Request {
            name,
            target,
            payload,
        } => {
            let config = match cli.config {
                Some(path) => TetherConfig::load_from(&path),
                None => TetherConfig::load(),
            }?;
            let mut command = Command::new(name, target)?;
            if let Some(payload) = payload {
                command = command.with_payload(payload);
            }
            run_request(&config, command).await
        }
    }
}

/// The binary itself is the fallback peer; its logs share our stderr.
fn default_peer() -> Result<PeerConfig> {
    let exe = env::current_exe().context("failed to locate the tether executable")?;
    Ok(PeerConfig::new(
        exe.to_string_lossy().into_owned(),
        vec!["peer".to_string()],
    )
    .with_inherit_stderr(true))
}

async fn run_request(config: &TetherConfig, command: Command) -> Result<()> {
    let peer = match &config.peer {
        Some(peer) => peer.clone(),
        None => default_peer()?,
    };
    let lifecycle = HandleLifecycle::new(ProcessSystem::new(peer), config.lifecycle.to_options());

    let (incoming_tx, mut incoming) = mpsc::unbounded_channel();
    lifecycle.subscribe(EventKind::Command, move |event| {
        let _ = incoming_tx.send(event.clone());
    });
    lifecycle.subscribe(EventKind::Connection, |event| {
        if let DomainEvent::Connection { peer, connected } = event {
            tracing::info!(%peer, connected, "peer connection changed");
        }
    });
    lifecycle.subscribe(EventKind::Notification, |event| {
        if let DomainEvent::Notification { topic, .. } = event {
            tracing::debug!(topic, "peer notification");
        }
    });

    lifecycle.start().await?;

    let request = lifecycle.request(command);
    tokio::pin!(request);
    let outcome = loop {
        tokio::select! {
            biased;
            Some(event) = incoming.recv() => answer(&lifecycle, event).await,
            outcome = &mut request => break outcome,
        }
    };
    while let Ok(event) = incoming.try_recv() {
        answer(&lifecycle, event).await;
    }

    if let Err(e) = lifecycle.stop().await {
        tracing::warn!("stop failed: {e}");
    }

    let reply = outcome?;
    let mut stdout = std::io::stdout().lock();
    match reply {
        Some(payload) => writeln!(stdout, "{}", serde_json::to_string_pretty(&payload)?)?,
        None => writeln!(stdout, "null")?,
    }
    Ok(())
}

/// Peer-initiated commands are acknowledged with their own payload.
async fn answer(lifecycle: &HandleLifecycle<ProcessSystem>, event: DomainEvent) {
    let DomainEvent::CommandReceived {
        request_id,
        peer,
        command,
    } = event
    else {
        return;
    };
    tracing::info!(%request_id, %peer, command = command.name(), "answering peer command");
    if let Err(e) = lifecycle
        .respond(&request_id, ResultCode::Success, command.payload())
        .await
    {
        tracing::warn!(%request_id, "failed to answer peer command: {e}");
    }
}
