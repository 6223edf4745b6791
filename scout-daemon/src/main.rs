// Scout: LAN device discovery daemon (responder and requester).

mod binding;
mod config;
mod engine;
mod identity;
mod ifaces;
mod role;

use std::time::Duration;

use engine::{Engine, Mode};
use role::{Requester, Responder};

const VERSION: &str = env!("CARGO_PKG_VERSION");

enum RunMode {
    Host,
    Discover,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut mode = RunMode::Host;
    let mut port: Option<u16> = None;
    let mut timeout: Option<i64> = None;
    let mut ifaces: Vec<String> = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("scout-daemon {}", VERSION);
                return Ok(());
            }
            "host" => mode = RunMode::Host,
            "discover" => mode = RunMode::Discover,
            "--port" => port = Some(next_value(&mut args, "--port")?.parse()?),
            "--timeout" => timeout = Some(next_value(&mut args, "--timeout")?.parse()?),
            "--iface" => ifaces.push(next_value(&mut args, "--iface")?),
            other => return Err(format!("unknown argument: {}", other).into()),
        }
    }

    let mut cfg = config::load();
    if let Some(p) = port {
        cfg.port = p;
    }
    if !ifaces.is_empty() {
        cfg.allowed_interfaces = Some(ifaces);
    }
    // Non-positive timeout means run unbounded.
    let run_timeout = timeout
        .filter(|t| *t > 0)
        .map(|t| Duration::from_secs(t as u64));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match mode {
            RunMode::Host => {
                let identities = match cfg.identities.clone() {
                    Some(identities) => identities,
                    None => identity::load_or_create(&cfg.identity_path)?,
                };
                for record in &identities {
                    log::info!("identity: kind {} {:?}", record.kind, record.payload);
                }
                let engine = Engine::new(
                    Mode::Hosting,
                    cfg.port,
                    cfg.allowed_interfaces.clone(),
                    Box::new(Responder::new(identities)),
                );
                run_until_shutdown(engine, run_timeout).await;
            }
            RunMode::Discover => {
                let (report_tx, mut report_rx) = tokio::sync::mpsc::unbounded_channel();
                tokio::spawn(async move {
                    while let Some(peer) = report_rx.recv().await {
                        println!("{}", peer);
                    }
                });
                let engine = Engine::new(
                    Mode::Enumeration,
                    cfg.port,
                    cfg.allowed_interfaces.clone(),
                    Box::new(Requester::new(Some(report_tx))),
                );
                run_until_shutdown(engine, run_timeout).await;
            }
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{} requires a value", flag))
}

/// Run the engine until it stops on its own (timeout) or a shutdown signal
/// arrives. The engine closes all sockets before returning.
async fn run_until_shutdown(mut engine: Engine, timeout: Option<Duration>) {
    let stop = engine.stop_handle();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => stop.stop(),
            Err(e) => log::warn!("signal handler unavailable: {}", e),
        }
    });
    engine.run(timeout).await;
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
