//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p engine_server -- [--config server.json] [--tick-hz 64] [--ticks N]
//!                                 [--mode server|listen_server|standalone] [--headless]
//!
//! Runs a fixed timestep loop that drains the event queue each tick. Console
//! commands are read from stdin on a separate thread; attacks and heals are
//! sent from there straight through the event queue.

use std::env;
use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use engine_server::{
    console::ConsoleCommand,
    network::LoopbackNetwork,
    server::{send_event_command, GameServer},
};
use engine_shared::{config::EngineConfig, net::NetworkMode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct Args {
    cfg: EngineConfig,
    ticks: Option<u32>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            EngineConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?
        }
        None => EngineConfig::default(),
    };
    let mut ticks = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(64);
                i += 2;
            }
            "--ticks" if i + 1 < args.len() => {
                ticks = Some(args[i + 1].parse().context("--ticks")?);
                i += 2;
            }
            "--mode" if i + 1 < args.len() => {
                cfg.network_mode = parse_mode(&args[i + 1]).context("--mode")?;
                i += 2;
            }
            "--headless" => {
                cfg.events.headless = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(Args { cfg, ticks })
}

fn parse_mode(raw: &str) -> anyhow::Result<NetworkMode> {
    Ok(match raw {
        "standalone" => NetworkMode::Standalone,
        "client" => NetworkMode::Client,
        "server" => NetworkMode::Server,
        "listen_server" => NetworkMode::ListenServer,
        other => anyhow::bail!(
            "unknown network mode '{other}', expected standalone, client, server or listen_server"
        ),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, ticks } = parse_args()?;
    info!(
        addr = %cfg.server_addr,
        tick_hz = cfg.tick_hz,
        mode = ?cfg.network_mode,
        headless = cfg.events.headless,
        "Starting server"
    );
    anyhow::ensure!(cfg.tick_hz > 0, "tick_hz must be positive");

    let network = Arc::new(LoopbackNetwork::new(cfg.network_mode));
    let mut server =
        GameServer::with_network(cfg.clone(), network.clone()).context("create server")?;
    server.events().set_dispatch_thread_to_current();

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<ConsoleCommand>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    let sender = server.sender();
    let world = server.world().clone();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let command = match ConsoleCommand::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(err) => {
                    println!("{err:#}");
                    continue;
                }
            };
            if command.is_event() {
                send_event_command(&sender, &world, &command);
            } else if console_tx.blocking_send(command).is_err() {
                break;
            }
        }
    });

    println!(
        "Server ready. Type 'spawn <health> [armor]', 'attack <entity> <amount> [fire]', \
         'heal <entity> <amount>', 'status' or 'quit'."
    );
    println!();

    // Main server loop.
    let tick_interval = std::time::Duration::from_secs_f32(1.0 / cfg.tick_hz as f32);
    let mut next_tick = tokio::time::Instant::now();

    while server.is_running() && ticks.map_or(true, |limit| server.tick() < u64::from(limit)) {
        let drained = server.step();
        if drained > 0 {
            debug!(tick = server.tick(), drained, "Delivered queued events");
        }
        for sent in network.drain_outbox() {
            info!(to = ?sent.to, entity = %sent.entity, event = sent.event, "Replicated event");
        }

        // Wait for next tick.
        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }

    let stats = server.events().stats();
    if stats.handler_failures > 0 {
        warn!(failures = stats.handler_failures, "Some event handlers failed");
    }
    info!(ticks = server.tick(), dispatched = stats.dispatched, "Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mode_accepts_known_modes_only() {
        assert_eq!(parse_mode("client").unwrap(), NetworkMode::Client);
        assert_eq!(parse_mode("listen_server").unwrap(), NetworkMode::ListenServer);

        let err = parse_mode(r#"serv"er"#).unwrap_err().to_string();
        assert!(err.contains(r#"serv"er"#), "{err}");
        assert!(parse_mode("Server").is_err());
    }
}
