//! `oscar-ft`: send or receive files over an OSCAR rendezvous connection.
//!
//! There is no session layer here. The operator relays what would normally
//! travel in the rendezvous invitation (cookie, address, port) to the peer by
//! hand.

mod args;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use oscar_protocol::IcbmCookie;
use oscar_rendezvous::{
    ConnectionInfo, ConnectionType, DownloadDirMapper, EventPost, Initiator, OutgoingConnector,
    OutgoingFile, PassiveConnector, ProxyConnector, ProxyMode, RvConnection, RvEvent, Settings,
    TimeoutScheduler, TransferRole, spawn_pipeline,
};
use oscar_transfer::{ProgressSnapshot, ProgressTicker};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use args::{Args, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,oscar_rendezvous=debug")),
        )
        .init();

    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    let cookie = match &args.cookie {
        Some(hex) => IcbmCookie::from_hex(hex).context("invalid --cookie")?,
        None => {
            let cookie = IcbmCookie::generate();
            println!("cookie: {cookie}");
            cookie
        }
    };

    let strategy = args.command.strategy().clone();
    let (initiator, role) = match args.command {
        Command::Send { files, .. } => (
            Initiator::Me,
            TransferRole::Send(files.into_iter().map(OutgoingFile::new).collect()),
        ),
        Command::Receive { dir, .. } => (
            Initiator::Buddy,
            TransferRole::Receive(Arc::new(DownloadDirMapper::new(dir))),
        ),
    };

    let (events, event_rx) = EventPost::channel();
    let conn = Arc::new(RvConnection::new(
        args.screen_name,
        args.buddy,
        cookie,
        initiator,
        Arc::new(settings),
        events,
    ));
    let reporter = tokio::spawn(report_events(event_rx));
    let scheduler = TimeoutScheduler::new();

    let handle = if strategy.listen {
        let handle = spawn_pipeline(conn, Arc::new(PassiveConnector::new()), role, &scheduler);
        handle.start_timeout_timer();
        handle
    } else if let Some(addr) = strategy.connect {
        let connection_type = direct_connection_type(addr.ip());
        conn.set_connection_info(direct_info(addr));
        let connector = OutgoingConnector::new(connection_type)?;
        spawn_pipeline(conn, Arc::new(connector), role, &scheduler)
    } else if let Some(relay) = strategy.proxy_join {
        conn.set_connection_info(ConnectionInfo {
            proxy_ip: Some(relay.ip()),
            port: Some(relay.port()),
            proxied: true,
            ..ConnectionInfo::default()
        });
        spawn_pipeline(conn, Arc::new(ProxyConnector::new(ProxyMode::Accept)), role, &scheduler)
    } else {
        spawn_pipeline(conn, Arc::new(ProxyConnector::new(ProxyMode::Initiate)), role, &scheduler)
    };

    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling transfer");
            cancel.cancel();
        }
    });

    let result = handle.join().await;
    // Stray sender clones can outlive the pipeline task briefly.
    let _ = tokio::time::timeout(Duration::from_secs(1), reporter).await;

    let files = result.map_err(|reason| anyhow::anyhow!("transfer failed: {reason}"))?;
    for file in &files {
        println!(
            "{}  {} bytes ({} over the wire, started at {})",
            file.path.display(),
            file.size,
            file.bytes_transferred,
            file.start_offset
        );
    }
    Ok(())
}

/// Private and loopback addresses get the LAN timeout.
fn direct_connection_type(ip: IpAddr) -> ConnectionType {
    let local = match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    };
    if local {
        ConnectionType::Lan
    } else {
        ConnectionType::Internet
    }
}

fn direct_info(addr: SocketAddr) -> ConnectionInfo {
    let ip = Some(addr.ip());
    match direct_connection_type(addr.ip()) {
        ConnectionType::Lan => ConnectionInfo {
            internal_ip: ip,
            port: Some(addr.port()),
            ..ConnectionInfo::default()
        },
        _ => ConnectionInfo {
            external_ip: ip,
            port: Some(addr.port()),
            ..ConnectionInfo::default()
        },
    }
}

async fn report_events(mut rx: UnboundedReceiver<RvEvent>) {
    let ticker = ProgressTicker::new(Some(Duration::from_secs(1)));
    ticker.on_progress(Box::new(log_progress));
    ticker.start();

    while let Some(event) = rx.recv().await {
        match event {
            RvEvent::Resolving { host } => info!(%host, "resolving"),
            RvEvent::Connecting { host, port } => info!(%host, port, "connecting"),
            RvEvent::WaitingForConnection { port, addresses } => {
                println!("listening on port {port}");
                for ip in addresses {
                    println!("  peer may connect to {}", SocketAddr::new(ip, port));
                }
            }
            RvEvent::ProxyAcknowledged { ip, port } => {
                println!("proxy session open; peer joins with --proxy-join {ip}:{port}");
            }
            RvEvent::Connected { connection_type } => info!(?connection_type, "connected"),
            RvEvent::Checksumming { file, progress } => {
                ticker.track(format!("checksum {file}"), progress);
            }
            RvEvent::TransferringFile { file, progress } => {
                ticker.untrack(&format!("checksum {file}"));
                ticker.track(file.to_string(), progress);
            }
            RvEvent::FileComplete { file, bytes } => {
                ticker.untrack(&file.to_string());
                ticker.untrack(&format!("checksum {file}"));
                info!(%file, bytes, "file complete");
            }
            RvEvent::ResumeChecksumFailed { file } => {
                warn!(%file, "partial copy did not match, sending whole file");
            }
            RvEvent::CorruptTransfer {
                file,
                expected,
                actual,
            } => {
                error!(
                    %file,
                    expected = format_args!("{expected:#010x}"),
                    actual = format_args!("{actual:#010x}"),
                    "checksum mismatch"
                );
            }
            RvEvent::Succeeded { files } => info!(files = files.len(), "transfer complete"),
            RvEvent::Failed { stage, reason } => error!(?stage, %reason, "transfer failed"),
        }
    }

    ticker.stop();
}

fn log_progress(snapshot: ProgressSnapshot) {
    let percent = if snapshot.end == 0 {
        100.0
    } else {
        snapshot.position as f64 * 100.0 / snapshot.end as f64
    };
    info!(
        name = %snapshot.name,
        percent = format_args!("{percent:.1}"),
        kib_per_sec = format_args!("{:.1}", snapshot.bytes_per_second / 1024.0),
        eta_secs = snapshot.eta.map(|d| d.as_secs()),
        "progress"
    );
}
