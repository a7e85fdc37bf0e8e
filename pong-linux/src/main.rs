// Pong Linux: broadcast discovery and sender/receiver negotiation over UDP.

mod bridge;
mod config;
mod logging;
mod scheduler;
mod session;
mod transport;

use std::sync::Arc;

use anyhow::Context;
use pong_core::link::derive_link_key;
use pong_core::PeerId;
use tracing::{error, info, warn};

use crate::bridge::event_bridge;
use crate::logging::LogFormat;
use crate::session::Session;
use crate::transport::UdpTransport;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut log_format = LogFormat::Pretty;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("pong-linux {}", VERSION);
                return Ok(());
            }
            "--log-format" => {
                let v = args.next().context("--log-format needs a value")?;
                log_format = LogFormat::from_str_lossy(&v);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    logging::init_logging("info", log_format);
    let cfg = config::load()?;
    let port = cfg.channel_port()?;
    let local_id = PeerId::random();
    let link_key = derive_link_key(cfg.pmk.as_bytes(), cfg.lmk.as_bytes());

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (producer, consumer) = event_bridge(cfg.session.queue_capacity);
        let transport = Arc::new(
            UdpTransport::bind(port, cfg.broadcast_addr, local_id, link_key, producer.clone())
                .await
                .with_context(|| format!("binding UDP port {port}"))?,
        );
        info!(%local_id, port, channel = cfg.channel, "transport up");

        let drops = producer.clone();
        let rx_transport = transport.clone();
        tokio::spawn(async move {
            if let Err(e) = rx_transport.run_receiver(producer).await {
                error!(error = %e, "receiver stopped");
            }
        });

        let session = Session::new(&cfg.session, local_id, transport, consumer);
        tokio::select! {
            result = session.run() => match result {
                Ok(report) => info!(?report, "negotiation finished"),
                Err(e) => warn!(error = %e, "negotiation session ended with error"),
            },
            r = shutdown_signal() => r?,
        }
        if drops.dropped() > 0 {
            warn!(dropped = drops.dropped(), "events dropped on a full queue this session");
        }
        Ok::<(), anyhow::Error>(())
    })?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    info!("shutdown requested");
    Ok(())
}
