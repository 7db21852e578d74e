//! NowPlayingPoller: fixed-interval fetch of live metadata.
//!
//! One fetch at a time on one timer, so results arrive in order and the last
//! one wins.  Failures and empty answers are skipped; the next tick simply
//! tries again.  There is no backoff.
//!
//! `spawn()` returns a [`PollerHandle`]; cancelling it (or dropping it) stops
//! the task deterministically, including a fetch that is in flight.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::nowplaying::{parse_now_playing, LiveMetadataSnapshot};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct NowPlayingPoller {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl NowPlayingPoller {
    pub fn new(url: impl Into<String>, interval: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sticky-player/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            interval,
        })
    }

    /// One request.  `Ok(None)` when the service has nothing to report.
    pub async fn fetch(&self) -> anyhow::Result<Option<LiveMetadataSnapshot>> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP {}", response.status());
        }
        let body = response.bytes().await?;
        parse_now_playing(&body, Utc::now())
    }

    /// Start polling.  Every successful snapshot is sent on `tx`; the task
    /// ends when cancelled or when the receiver goes away.
    pub fn spawn<T>(self, tx: mpsc::Sender<T>) -> PollerHandle
    where
        T: From<LiveMetadataSnapshot> + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();

        let task = tokio::spawn(async move {
            info!(
                "poller: polling {} every {:?}",
                self.url, self.interval
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let result = tokio::select! {
                    _ = child.cancelled() => break,
                    r = self.fetch() => r,
                };

                match result {
                    Ok(Some(snapshot)) => {
                        debug!(
                            "poller: {:?} '{}' by '{}'",
                            snapshot.mode, snapshot.title, snapshot.artist
                        );
                        if tx.send(snapshot.into()).await.is_err() {
                            debug!("poller: receiver gone, stopping");
                            break;
                        }
                    }
                    Ok(None) => debug!("poller: nothing playing, keeping last snapshot"),
                    Err(e) => warn!("poller: fetch failed, keeping last snapshot: {}", e),
                }
            }
            debug!("poller: task exiting");
        });

        PollerHandle {
            token,
            task: Some(task),
        }
    }
}

/// Owner of a running poll task.
pub struct PollerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel and wait for the task to wind down.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
