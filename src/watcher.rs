//! Log capture for running services
//!
//! A [`LogWatcher`] tails the logs of a service in a background task and
//! keeps every captured line in an in-memory buffer, so readiness checks
//! can match patterns against everything the application printed so far.
//!
//! The buffer outlives the subscription: stopping the watcher ends the
//! background task but keeps the captured lines readable, which is what
//! failure diagnosis after teardown needs.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{Stream, StreamExt};
use regex::Regex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::ClusterClient;

/// Delay between subscription attempts while the service has no pods yet
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Background log capture with an in-memory line buffer
pub struct LogWatcher {
    buffer: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LogWatcher {
    /// Capture lines from an already-established stream
    ///
    /// The stream ends the capture naturally; errors on individual lines
    /// are logged and skipped.
    pub fn watch_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<String>> + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task_buffer = Arc::clone(&buffer);
        let handle = tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);

            loop {
                tokio::select! {
                    line = stream.next() => match line {
                        Some(Ok(line)) => lock(&task_buffer).push(line),
                        Some(Err(e)) => {
                            warn!(error = %e, "Failed to read log line");
                        }
                        None => break,
                    },
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Self {
            buffer,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Follow the logs of every incarnation of a service
    ///
    /// Retries the subscription until a pod of the service exists, and
    /// resubscribes when the stream ends, e.g. after a restart.
    /// Resubscribing to the same pod replays its history, so already
    /// captured lines are skipped; a replacement pod logs from scratch and
    /// every one of its lines is kept.
    pub fn watch_service(client: ClusterClient, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task_buffer = Arc::clone(&buffer);
        let handle = tokio::spawn(async move {
            let mut watched_pod: Option<String> = None;

            loop {
                match client.first_pod(&owner).await {
                    Ok(Some(pod)) => match client.pod_log_stream(&pod).await {
                        Ok(mut stream) => {
                            let mut skip =
                                replay_skip(watched_pod.as_deref(), &pod, lock(&task_buffer).len());
                            watched_pod = Some(pod);

                            loop {
                                tokio::select! {
                                    line = stream.next() => match line {
                                        Some(Ok(line)) => {
                                            if skip > 0 {
                                                skip -= 1;
                                            } else {
                                                lock(&task_buffer).push(line);
                                            }
                                        }
                                        Some(Err(e)) => {
                                            debug!(owner = %owner, error = %e, "Failed to read log line");
                                        }
                                        None => break,
                                    },
                                    _ = &mut shutdown_rx => return,
                                }
                            }

                            debug!(owner = %owner, "Log stream ended, resubscribing");
                        }
                        Err(e) => {
                            debug!(owner = %owner, error = %e, "Log subscription not ready yet");
                        }
                    },
                    Ok(None) => {
                        debug!(owner = %owner, "No pods yet");
                    }
                    Err(e) => {
                        debug!(owner = %owner, error = %e, "Pod lookup failed");
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                    _ = &mut shutdown_rx => return,
                }
            }
        });

        Self {
            buffer,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Whether any captured line matches the pattern
    ///
    /// The pattern is a regex matched per line, unanchored. An invalid
    /// pattern never matches.
    pub fn logs_contains(&self, pattern: &str) -> bool {
        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                debug!(pattern = %pattern, error = %e, "Invalid log pattern");
                return false;
            }
        };

        lock(&self.buffer).iter().any(|line| regex.is_match(line))
    }

    /// Snapshot of every captured line
    pub fn logs(&self) -> Vec<String> {
        lock(&self.buffer).clone()
    }

    /// End the background capture, keeping the buffer
    ///
    /// Idempotent; captured lines remain readable afterwards.
    pub async fn stop_watching(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                debug!(error = %e, "Log watcher task ended abnormally");
            }
        }
    }
}

fn lock(buffer: &Mutex<Vec<String>>) -> MutexGuard<'_, Vec<String>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lines to discard after (re)subscribing to a pod's log stream
///
/// Only the pod already being watched replays captured history. A
/// different pod starts a fresh log whose first lines carry the startup
/// output readiness matching depends on, so nothing is discarded.
fn replay_skip(watched_pod: Option<&str>, pod: &str, captured: usize) -> usize {
    if watched_pod == Some(pod) {
        captured
    } else {
        0
    }
}
