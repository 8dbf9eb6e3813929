//! Request router: accepts client connections on a Unix domain socket and
//! forwards each request to an idle worker, routing the reply back to the
//! originating connection.
//!
//! The source's frontend/backend message-socket split has no direct
//! equivalent crate in this stack; a job queue (`mpsc`) feeding a fixed
//! worker pool, paired with a one-shot reply channel per request, gives the
//! same property the split was for — requests fan out to whichever worker
//! is idle, replies fan back in to the right caller — without requiring a
//! message-queue broker.

use crate::config::Config;
use crate::connection_cache::{ConnectionCache, RealDriverFactory};
use crate::executor::SubprocessExecutor;
use crate::profile::ClusterProfile;
use crate::wire::{self, Reply, Request};
use crate::worker::Worker;
use clustdock_utils::framing::{read_frame, write_frame};
use eyre::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info, warn};

struct Job {
    request: Request,
    reply_tx: oneshot::Sender<Reply>,
}

/// Runs the dispatcher until the listener errors. Binds `config.bind_addr`
/// as a Unix domain socket, spawns `config.worker_count` workers, and loops
/// accepting client connections.
pub async fn run(config: Config) -> Result<()> {
    let Config {
        bind_addr,
        worker_count,
        managed_hosts,
        docker_port,
        profiles,
    } = config;
    let profiles: Arc<BTreeMap<String, ClusterProfile>> = Arc::new(profiles);
    let managed_hosts: Arc<BTreeSet<String>> = Arc::new(managed_hosts);

    let (job_tx, job_rx) = mpsc::channel::<Job>(worker_count.max(1) * 4);
    let job_rx = Arc::new(Mutex::new(job_rx));

    let driver_factory: Arc<RealDriverFactory> = Arc::new(RealDriverFactory::new(docker_port));

    for id in 0..worker_count.max(1) {
        let job_rx = job_rx.clone();
        let profiles = profiles.clone();
        let managed_hosts = managed_hosts.clone();
        let driver_factory = driver_factory.clone();
        tokio::spawn(async move {
            let cache = ConnectionCache::new(driver_factory);
            let executor = Arc::new(SubprocessExecutor::new(docker_port));
            let mut worker = Worker::new(cache, executor, profiles, managed_hosts);
            info!(worker = id, "worker started");
            loop {
                let job = job_rx.lock().await.recv().await;
                let Some(job) = job else { break };
                let reply = worker.handle(job.request).await;
                let _ = job.reply_tx.send(reply);
            }
        });
    }

    let _ = std::fs::remove_file(&bind_addr);
    let listener = UnixListener::bind(&bind_addr)
        .with_context(|| format!("binding control socket at {bind_addr}"))?;
    info!(%bind_addr, worker_count, "dispatcher listening");

    loop {
        let (stream, _) = listener.accept().await.context("accepting client connection")?;
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, job_tx).await {
                warn!(error = %e, "client connection ended with error");
            }
        });
    }
}

async fn handle_client(mut stream: UnixStream, job_tx: mpsc::Sender<Job>) -> Result<()> {
    loop {
        let Some(frame) = read_frame(&mut stream).await? else {
            return Ok(());
        };
        let line = String::from_utf8_lossy(&frame).into_owned();
        let reply = match wire::parse_request(line.trim()) {
            Ok(request) => dispatch(request, &job_tx).await,
            Err(e) => Reply::Error(e.to_string()),
        };
        let encoded = wire::encode_reply(&reply).context("encoding reply")?;
        write_frame(&mut stream, &encoded).await?;
    }
}

async fn dispatch(request: Request, job_tx: &mpsc::Sender<Job>) -> Reply {
    let (reply_tx, reply_rx) = oneshot::channel();
    let job = Job { request, reply_tx };
    if job_tx.send(job).await.is_err() {
        error!("worker pool unavailable");
        return Reply::Error("internal error: worker pool unavailable".to_string());
    }
    match reply_rx.await {
        Ok(reply) => reply,
        Err(_) => Reply::Error("internal error: worker dropped reply channel".to_string()),
    }
}
