//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p engine_server -- [--addr 127.0.0.1:40000] [--tick-hz 64] [--max-clients 4]
//!
//! Binds a real UDP socket via `DatagramTransport`, then drives
//! `GameServer::frame()` at a fixed tick rate for as long as the process
//! runs.
//!
//! Console commands:
//!   status    - Show per-slot connection state and entity count
//!   kick <n>  - Disconnect slot n
//!   quit      - Shutdown server

use std::env;
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use engine_server::GameServer;
use engine_shared::config::EngineConfig;
use engine_shared::net::{DatagramTransport, Transport};
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
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(cfg.tick_hz);
                i += 2;
            }
            "--max-clients" if i + 1 < args.len() => {
                cfg.max_clients = args[i + 1].parse().unwrap_or(cfg.max_clients);
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
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, max_clients = cfg.max_clients, "starting server");

    let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
    let transport: Rc<dyn Transport> =
        Rc::new(DatagramTransport::bind_server(addr.port()).context("bind server socket")?);

    let mut server = GameServer::new(cfg.clone(), transport);

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

    println!("Server ready. Type 'status' for info, 'kick <slot>' to disconnect a slot, 'quit' to exit.");
    println!();

    let tick_interval = Duration::from_secs_f64(1.0 / cfg.tick_hz as f64);
    let mut ticker = tokio::time::interval(tick_interval);

    loop {
        while let Ok(line) = console_rx.try_recv() {
            match server.exec_console(&line) {
                Ok(output) => {
                    for line in output {
                        println!("{}", line);
                    }
                }
                Err(e) => println!("error: {e:#}"),
            }
        }

        server.frame();
        ticker.tick().await;
    }
}
