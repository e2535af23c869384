//! The user runtime: one concurrent actor playing one script to
//! completion or until stopped.
//!
//! A user parses its whole script before the first request, then walks the
//! chunks in order. Requests are strictly sequential, at most one
//! outstanding hit, and every emitted sample lands on the shared result
//! sink in script order. Pauses and sink sends are cancellable through the
//! stop signal; an in-flight hit is bounded by the attacker's request
//! timeout instead.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::client::Attacker;
use crate::error::Error;
use crate::sample::Sample;
use crate::script::{scan_chunks, Chunk, PeekingScanner};
use crate::target::Target;

pub struct User {
    name: String,
    script: String,
    attacker: Attacker,
    stop: watch::Receiver<bool>,
}

impl User {
    pub fn new(
        name: impl Into<String>,
        script: String,
        attacker: Attacker,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name: name.into(),
            script,
            attacker,
            stop,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive the script to completion or until stop is observed.
    ///
    /// Parse errors terminate this user only. Transport failures are
    /// emitted as samples and execution continues. A closed result sink is
    /// fatal: nothing more can be recorded.
    pub async fn run(mut self, results: mpsc::Sender<Sample>) -> Result<(), Error> {
        let chunks = scan_chunks(&mut PeekingScanner::new(self.script.as_bytes()))?;
        let total = chunks.len();
        debug!(user = %self.name, chunks = total, "script parsed");

        for (index, chunk) in chunks.into_iter().enumerate() {
            if self.stop_requested() {
                debug!(user = %self.name, "stop observed, winding down");
                return Ok(());
            }
            match chunk {
                Chunk::Pause(millis) => {
                    debug!(user = %self.name, index, total, millis, "sleeping");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(u64::from(millis))) => {}
                        _ = stopped(&mut self.stop) => {
                            debug!(user = %self.name, "stop observed during pause");
                            return Ok(());
                        }
                    }
                }
                Chunk::Directive(line) => {
                    debug!(user = %self.name, %line, "skipping unrecognized directive");
                }
                Chunk::Request(text) => {
                    let target = Target::from_chunk(&text)?;
                    let timestamp = Utc::now();
                    let sample = self.attacker.hit(&target, timestamp).await;
                    info!(
                        user = %self.name,
                        index,
                        total,
                        method = %sample.method,
                        url = %sample.url,
                        latency_ms = sample.latency.as_millis() as u64,
                        "hit"
                    );
                    if results.send(sample).await.is_err() {
                        return Err(Error::Encode(std::io::Error::other(
                            "result sink closed",
                        )));
                    }
                }
            }
        }
        debug!(user = %self.name, "script finished");
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }
}

// Resolves when stop is raised, or when the stop channel closes, which is
// equivalent: the supervisor is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::client::AttackerConfig;
    use crate::testutil::{serve, OK_RESPONSE};

    fn user(script: &str, stop: watch::Receiver<bool>) -> User {
        User::new(
            "u1.txt",
            script.to_string(),
            Attacker::new(&AttackerConfig::default()).unwrap(),
            stop,
        )
    }

    #[tokio::test]
    async fn long_pause_is_cancelled_by_stop() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, _rx) = mpsc::channel(8);
        let handle = tokio::spawn(user("=> PAUSE 60000", stop_rx).run(tx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        stop_tx.send(true).unwrap();

        handle.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn parse_error_surfaces_before_any_request() {
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (tx, mut rx) = mpsc::channel(8);

        let err = user("GET /a\n\n=> PAUSE nope", stop_rx).run(tx).await;

        assert!(matches!(err, Err(Error::BadPause(_))));
        assert!(rx.try_recv().is_err(), "no request may run on a bad script");
    }

    #[tokio::test]
    async fn samples_preserve_script_order() {
        let addr = serve(OK_RESPONSE).await;
        let script = format!(
            "GET http://{addr}/first\n\n=> MARK ignored\n\nGET http://{addr}/second"
        );
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (tx, mut rx) = mpsc::channel(8);

        user(&script, stop_rx).run(tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.url.ends_with("/first"));
        assert!(second.url.ends_with("/second"));
        assert!(first.timestamp <= second.timestamp);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_sink_is_fatal() {
        let addr = serve(OK_RESPONSE).await;
        let script = format!("GET http://{addr}/a");
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let err = user(&script, stop_rx).run(tx).await;
        assert!(matches!(err, Err(Error::Encode(_))));
    }
}
