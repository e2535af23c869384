//! The fleet supervisor: spawns one task per user, fans their samples into
//! a single encoder, and coordinates shutdown.
//!
//! The supervisor owns the output: users emit on a bounded channel and
//! never touch the result log, so there is exactly one writer and one wire
//! format. When the channel backs up, user tasks block on send; that
//! backpressure is intentional. Shutdown triggers on either every user
//! finishing or the operator interrupt; the stop broadcast is a watch
//! channel, so raising it twice is harmless.

use std::future::Future;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::Attacker;
use crate::codec::SampleEncoder;
use crate::error::Error;
use crate::user::User;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Result channel capacity; the backpressure bound.
    pub channel_capacity: usize,
    /// How long shutdown waits for in-flight work before giving up.
    pub drain_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            drain_grace: Duration::from_secs(5),
        }
    }
}

pub struct Runner {
    config: RunnerConfig,
    stop: watch::Sender<bool>,
    users: Vec<User>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            config,
            stop,
            users: Vec::new(),
        }
    }

    pub fn add_user(&mut self, name: impl Into<String>, script: String, attacker: Attacker) {
        self.users
            .push(User::new(name, script, attacker, self.stop.subscribe()));
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Drive every user to completion, encoding each arriving sample into
    /// `out`. Resolves when all users are done, or after `interrupt` fires
    /// and the bounded drain finishes. Returns the number of samples
    /// written.
    pub async fn run<W, F>(self, out: W, interrupt: F) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let Runner {
            config,
            stop,
            users,
        } = self;

        let (tx, mut rx) = mpsc::channel(config.channel_capacity);
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(users.len());
        info!(users = users.len(), "launching fleet");
        for user in users {
            let tx = tx.clone();
            let name = user.name().to_owned();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = user.run(tx).await {
                    error!(user = %name, %err, "user terminated");
                }
            }));
        }
        // once every user hangs up, recv() drains and then yields None
        drop(tx);

        let mut encoder = SampleEncoder::new(out);
        tokio::pin!(interrupt);
        let mut interrupted = false;
        loop {
            tokio::select! {
                _ = &mut interrupt => {
                    interrupted = true;
                    info!("interrupt received, stopping all users");
                    let _ = stop.send(true);
                    break;
                }
                received = rx.recv() => match received {
                    Some(sample) => {
                        if let Err(err) = encoder.encode(&sample).await {
                            Self::bail(&stop, &tasks);
                            return Err(err);
                        }
                    }
                    None => break,
                }
            }
        }

        let deadline = tokio::time::Instant::now() + config.drain_grace;
        if interrupted {
            // keep encoding whatever was already in flight, bounded
            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(sample)) => {
                        if let Err(err) = encoder.encode(&sample).await {
                            Self::bail(&stop, &tasks);
                            return Err(err);
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!("drain grace elapsed with results still pending");
                        break;
                    }
                }
            }
        }

        let _ = stop.send(true);
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!("user still busy after drain grace, aborting");
                task.abort();
            }
        }

        let written = encoder.written();
        encoder.close().await?;
        info!(samples = written, "fleet finished");
        Ok(written)
    }

    fn bail(stop: &watch::Sender<bool>, tasks: &[JoinHandle<()>]) {
        let _ = stop.send(true);
        for task in tasks {
            task.abort();
        }
    }
}
