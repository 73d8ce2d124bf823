// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `vaultd`: accepts client connections over TCP and/or a Unix-domain
//! socket, dispatches requests against the vault, and shuts down
//! gracefully on `SIGINT`/`SIGTERM`.

mod cli;
mod conn;

use anyhow::{bail, Context, Result};
use clap::Parser;
use echo_vault_config::{ConfigService, FsConfigStore, VaultConfig};
use echo_vault_dispatch::Dispatcher;
use echo_vault_lock::LockService;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UnixListener};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// A connection task, handed from an acceptor loop to `main` so it can be
/// drained (or force-dropped) as one `JoinSet` at shutdown.
type ConnectionTask = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'static>>;

/// Requests already accepted get this long to finish before shutdown
/// force-drops their connection tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    let file_config = match &args.config {
        Some(path) => ConfigService::new(FsConfigStore::new(path.clone()))
            .load::<VaultConfig>()
            .with_context(|| format!("loading config file {}", path.display()))?
            .unwrap_or_default(),
        None => VaultConfig::default(),
    };
    let resolved = args
        .as_overlay()
        .merge(file_config)
        .resolve()
        .context("resolving server configuration")?;

    let filter = if resolved.debug {
        EnvFilter::from_default_env().add_directive("debug".parse()?)
    } else {
        EnvFilter::from_default_env().add_directive("info".parse()?)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if resolved.port == 0 && resolved.socket.is_none() {
        bail!("at least one of --port or --socket must be enabled");
    }

    std::fs::create_dir_all(&resolved.base)
        .with_context(|| format!("creating base directory {}", resolved.base.display()))?;
    let probe = resolved.base.join(".vaultd-write-probe");
    std::fs::write(&probe, b"").with_context(|| {
        format!("base directory {} is not writable", resolved.base.display())
    })?;
    let _ = std::fs::remove_file(&probe);

    let locks = LockService::new(resolved.locking);
    let dispatcher = Arc::new(Dispatcher::new(resolved.base.clone(), locks.clone()));

    let worker_permits = resolved
        .resolved_processes()
        .saturating_mul(resolved.workers)
        .max(1);
    let workers = Arc::new(Semaphore::new(worker_permits));
    info!(
        host = %resolved.host,
        port = resolved.port,
        socket = ?resolved.socket,
        base = %resolved.base.display(),
        worker_permits,
        locking = ?resolved.locking,
        "starting vaultd"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let next_holder = Arc::new(AtomicU64::new(1));
    // Acceptor loops hand finished connection futures back here so `main`
    // can join every one of them in a single `JoinSet` at shutdown time,
    // rather than losing track of tasks spawned independently.
    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<ConnectionTask>();
    let mut acceptors = JoinSet::new();

    if resolved.port != 0 {
        let addr = format!("{}:{}", resolved.host, resolved.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding TCP listener on {addr}"))?;
        info!(%addr, "listening on TCP");
        acceptors.spawn(tcp_acceptor(
            listener,
            Arc::clone(&dispatcher),
            Arc::clone(&workers),
            Arc::clone(&next_holder),
            locks.clone(),
            shutdown_rx.clone(),
            conn_tx.clone(),
        ));
    }

    if let Some(socket_path) = &resolved.socket {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("removing stale socket {}", socket_path.display()))?;
        }
        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("binding Unix listener on {}", socket_path.display()))?;
        info!(path = %socket_path.display(), "listening on Unix socket");
        acceptors.spawn(unix_acceptor(
            listener,
            Arc::clone(&dispatcher),
            Arc::clone(&workers),
            Arc::clone(&next_holder),
            locks.clone(),
            shutdown_rx.clone(),
            conn_tx.clone(),
        ));
    }
    drop(conn_tx);

    let mut connections = JoinSet::new();
    let shutdown_signal = wait_for_shutdown_signal();
    tokio::pin!(shutdown_signal);
    loop {
        tokio::select! {
            biased;
            () = &mut shutdown_signal => break,
            task = conn_rx.recv() => {
                match task {
                    Some(fut) => { connections.spawn(fut); }
                    None => break,
                }
            }
        }
    }

    info!("shutdown signal received; draining in-flight connections");
    let _ = shutdown_tx.send(true);
    acceptors.shutdown().await;
    while let Ok(fut) = conn_rx.try_recv() {
        connections.spawn(fut);
    }

    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "grace period elapsed; dropping remaining connections"
        );
        connections.shutdown().await;
    }

    info!("vaultd stopped");
    Ok(())
}

async fn tcp_acceptor(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    workers: Arc<Semaphore>,
    next_holder: Arc<AtomicU64>,
    locks: LockService,
    mut shutdown_rx: watch::Receiver<bool>,
    conn_tx: mpsc::UnboundedSender<ConnectionTask>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let holder = next_holder.fetch_add(1, Ordering::Relaxed);
                        let dispatcher = Arc::clone(&dispatcher);
                        let workers = Arc::clone(&workers);
                        let locks = locks.clone();
                        let task: ConnectionTask = Box::pin(async move {
                            info!(%peer, holder, "tcp connection accepted");
                            conn::serve(stream, dispatcher, workers, holder, locks).await;
                        });
                        if conn_tx.send(task).is_err() {
                            break;
                        }
                    }
                    Err(err) => error!(%err, "tcp accept failed"),
                }
            }
        }
    }
}

async fn unix_acceptor(
    listener: UnixListener,
    dispatcher: Arc<Dispatcher>,
    workers: Arc<Semaphore>,
    next_holder: Arc<AtomicU64>,
    locks: LockService,
    mut shutdown_rx: watch::Receiver<bool>,
    conn_tx: mpsc::UnboundedSender<ConnectionTask>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let holder = next_holder.fetch_add(1, Ordering::Relaxed);
                        let dispatcher = Arc::clone(&dispatcher);
                        let workers = Arc::clone(&workers);
                        let locks = locks.clone();
                        let task: ConnectionTask = Box::pin(async move {
                            info!(holder, "unix connection accepted");
                            conn::serve(stream, dispatcher, workers, holder, locks).await;
                        });
                        if conn_tx.send(task).is_err() {
                            break;
                        }
                    }
                    Err(err) => error!(%err, "unix accept failed"),
                }
            }
        }
    }
}

/// Waits for a shutdown signal. Only `SIGINT`/`SIGTERM` trigger a
/// graceful drain; `SIGHUP` is left to the OS default (terminate) rather
/// than wired to a config reload — nothing in the reference server this
/// was modeled on reloads on `SIGHUP` either, and a config-reload
/// endpoint isn't part of this server's surface.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
