//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p engine_client -- [--addr 127.0.0.1:40000] [--name Player]
//!
//! Binds a real UDP socket via `DatagramTransport` and drives
//! `GameClient::frame()` at a fixed tick rate. There's no real keyboard here
//! (no windowing glue in this crate) — console commands double as input:
//! `up`/`down`/`enter` fire the corresponding session event, `disconnect`
//! triggers the same path `Escape` would in a windowed client.
//!
//! Console commands:
//!   status       - Show session state
//!   disconnect   - Disconnect from server (same as Escape in-session)
//!   quit         - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use engine_client::{GameClient, InputEvent, NullRenderer};
use engine_shared::config::EngineConfig;
use engine_shared::net::{DatagramTransport, PortAllocator, Transport};
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = parse_args();
    info!(server = %cfg.server_addr, name = %cfg.player_name, "starting client");

    let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
    let ports = PortAllocator::shared().context("open port allocator")?;
    let local_port = ports.alloc().context("no free client ports")?;

    let transport: Rc<dyn Transport> = Rc::new(
        DatagramTransport::bind_client(server_addr.port(), local_port).context("bind client socket")?,
    );
    let mut client = GameClient::new(&cfg, transport, Box::new(NullRenderer));

    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Client ready. Type 'up'/'down'/'enter' to drive the session, 'status' for info, 'quit' to exit.");
    println!();

    let tick_interval = Duration::from_secs_f64(1.0 / cfg.tick_hz as f64);
    let mut ticker = tokio::time::interval(tick_interval);

    loop {
        while let Ok(line) = console_rx.try_recv() {
            match line.as_str() {
                "up" => client.handle_input(InputEvent::Up),
                "down" => client.handle_input(InputEvent::Down),
                "enter" => client.handle_input(InputEvent::Enter),
                _ => match client.exec_console(&line) {
                    Ok(output) => {
                        for line in output {
                            println!("{}", line);
                        }
                    }
                    Err(e) => println!("error: {e:#}"),
                },
            }
        }

        client.frame();
        client.draw();
        ticker.tick().await;
    }
}
