use crate::client::{ClientError, SwayClient};
use crate::events::EventPathHealth;
use crate::publisher::{Publisher, Segment};
use crate::shutdown::{self, next_backoff, ShutdownRx};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use wsbar_core::{escape_markup, ApplyOutcome, SharedStore, Workspace};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

pub struct PollReconciler {
    socket_path: PathBuf,
    interval: Duration,
    store: SharedStore,
    publisher: Publisher,
    health: EventPathHealth,
    client: Option<SwayClient>,
    last_title: Option<String>,
    backoff: Duration,
}

impl PollReconciler {
    pub fn new(
        socket_path: PathBuf,
        interval: Duration,
        store: SharedStore,
        publisher: Publisher,
        health: EventPathHealth,
    ) -> Self {
        Self {
            socket_path,
            interval,
            store,
            publisher,
            health,
            client: None,
            last_title: None,
            backoff: INITIAL_BACKOFF,
        }
    }

    async fn client(&mut self) -> Result<&mut SwayClient, ClientError> {
        if self.client.is_none() {
            let client = SwayClient::connect(&self.socket_path).await?;
            debug!(event = "poll_connected", socket = %self.socket_path.display());
            self.client = Some(client);
        }
        self.client.as_mut().ok_or(ClientError::Closed)
    }

    /// Fetches the full workspace list and replaces the store with it.
    pub async fn resync_workspaces(&mut self) -> Result<ApplyOutcome, ClientError> {
        let workspaces = self.client().await?.get_workspaces().await?;
        let (outcome, snapshot) = self
            .store
            .replace_all(workspaces.into_iter().map(Workspace::from));
        if outcome.changed {
            self.publisher.publish_workspaces(snapshot);
        }
        Ok(outcome)
    }

    /// Initial store population. Retries with backoff until it succeeds;
    /// returns `false` only if shutdown arrives first, even mid-request.
    pub async fn seed(&mut self, shutdown: &mut ShutdownRx) -> bool {
        loop {
            let result = tokio::select! {
                _ = shutdown::wait(shutdown) => return false,
                result = self.resync_workspaces() => result,
            };
            match result {
                Ok(_) => {
                    self.backoff = INITIAL_BACKOFF;
                    info!(event = "store_seeded", workspaces = self.store.snapshot().len());
                    return true;
                }
                Err(err) => {
                    if !self.fail(err, "seed_failed", shutdown).await {
                        return false;
                    }
                }
            }
        }
    }

    /// One poll: refresh the focused-window title, plus a full workspace
    /// resync while the event path is down or right after it comes up.
    pub async fn tick(&mut self) -> Result<(), ClientError> {
        let catch_up = self.health.take_resync();
        if catch_up || self.health.is_down() {
            if let Err(err) = self.resync_workspaces().await {
                if catch_up {
                    self.health.request_resync();
                }
                return Err(err);
            }
            if catch_up {
                debug!(event = "event_path_catch_up");
            }
        }
        let tree = self.client().await?.get_tree().await?;
        let Some(title) = tree.focused_node().and_then(|node| node.name.as_deref()) else {
            return Ok(());
        };
        let title = escape_markup(title);
        if self.last_title.as_deref() != Some(title.as_str()) {
            self.publisher.publish(Segment::FocusedWindow, title.clone());
            self.last_title = Some(title);
        }
        Ok(())
    }

    pub async fn run(mut self, mut shutdown: ShutdownRx) {
        loop {
            let result = tokio::select! {
                _ = shutdown::wait(&mut shutdown) => break,
                result = self.tick() => result,
            };
            match result {
                Ok(()) => {
                    self.backoff = INITIAL_BACKOFF;
                    if shutdown::sleep_or_shutdown(self.interval, &mut shutdown).await {
                        break;
                    }
                }
                Err(err) => {
                    if !self.fail(err, "poll_failed", &mut shutdown).await {
                        break;
                    }
                }
            }
        }
        debug!(event = "poll_reconciler_stop");
    }

    /// Drops the connection and waits out the current backoff. Returns
    /// `false` if shutdown fired during the wait.
    async fn fail(
        &mut self,
        err: ClientError,
        event: &'static str,
        shutdown: &mut ShutdownRx,
    ) -> bool {
        self.client = None;
        warn!(
            event = event,
            error = %err,
            retry_in_ms = self.backoff.as_millis() as u64
        );
        if shutdown::sleep_or_shutdown(self.backoff, shutdown).await {
            return false;
        }
        self.backoff = next_backoff(self.backoff);
        true
    }
}
