use crate::client::EventSubscription;
use crate::publisher::Publisher;
use crate::shutdown::{self, ShutdownRx};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wsbar_core::sway_ipc::{Frame, MessageKind, WorkspaceEventPayload};
use wsbar_core::{ApplyOutcome, ReconcileEvent, SharedStore};

const PENDING: u8 = 0;
const UP: u8 = 1;
const DOWN: u8 = 2;

/// Whether the event subscription is currently delivering workspace events.
/// Shared with the poll reconciler, which takes over resync when it is down
/// and runs one catch-up resync each time the subscription comes up.
#[derive(Debug, Clone, Default)]
pub struct EventPathHealth {
    state: Arc<AtomicU8>,
    resync: Arc<AtomicBool>,
}

impl EventPathHealth {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PENDING)),
            resync: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Events changed between the seed and the subscribe are never
    /// delivered, so coming up also requests a full resync.
    pub fn mark_up(&self) {
        self.state.store(UP, Ordering::SeqCst);
        self.request_resync();
    }

    pub fn mark_down(&self) {
        self.state.store(DOWN, Ordering::SeqCst);
    }

    pub fn is_up(&self) -> bool {
        self.state.load(Ordering::SeqCst) == UP
    }

    pub fn is_down(&self) -> bool {
        self.state.load(Ordering::SeqCst) == DOWN
    }

    pub fn request_resync(&self) {
        self.resync.store(true, Ordering::SeqCst);
    }

    /// Consumes a pending one-shot resync request.
    pub fn take_resync(&self) -> bool {
        self.resync.swap(false, Ordering::SeqCst)
    }
}

pub struct EventReconciler {
    socket_path: PathBuf,
    store: SharedStore,
    publisher: Publisher,
    health: EventPathHealth,
}

impl EventReconciler {
    pub fn new(
        socket_path: PathBuf,
        store: SharedStore,
        publisher: Publisher,
        health: EventPathHealth,
    ) -> Self {
        Self {
            socket_path,
            store,
            publisher,
            health,
        }
    }

    pub async fn run(self, mut shutdown: ShutdownRx) {
        let subscribe = tokio::select! {
            _ = shutdown::wait(&mut shutdown) => {
                debug!(event = "event_reconciler_stop", phase = "subscribe");
                return;
            }
            result = EventSubscription::subscribe(&self.socket_path, &["workspace"]) => result,
        };
        let mut subscription = match subscribe {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(event = "event_path_down", reason = "subscribe", error = %err);
                self.health.mark_down();
                return;
            }
        };
        self.health.mark_up();
        info!(event = "event_path_up", socket = %self.socket_path.display());

        loop {
            let next = tokio::select! {
                _ = shutdown::wait(&mut shutdown) => {
                    debug!(event = "event_reconciler_stop");
                    return;
                }
                next = subscription.next_frame() => next,
            };
            match next {
                Ok(Some(frame)) => {
                    self.handle_frame(&frame);
                }
                Ok(None) => {
                    warn!(event = "event_path_down", reason = "eof");
                    self.health.mark_down();
                    return;
                }
                Err(err) => {
                    warn!(event = "event_path_down", reason = "read", error = %err);
                    self.health.mark_down();
                    return;
                }
            }
        }
    }

    /// Decodes one event frame and applies it. Frames that are not workspace
    /// events, or workspace changes the bar does not track, yield `None`.
    pub fn handle_frame(&self, frame: &Frame) -> Option<ApplyOutcome> {
        if frame.kind != MessageKind::WORKSPACE_EVENT {
            debug!(event = "event_ignored", kind = %frame.kind);
            return None;
        }
        let payload = match frame.parse::<WorkspaceEventPayload>() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(event = "event_decode_error", error = %err);
                return None;
            }
        };
        let event = payload.into_reconcile_event()?;
        Some(self.apply(&event))
    }

    pub fn apply(&self, event: &ReconcileEvent) -> ApplyOutcome {
        let (outcome, snapshot) = self.store.apply(event);
        if outcome.drift {
            debug!(event = "store_drift", kind = event.kind());
        }
        if outcome.changed {
            self.publisher.publish_workspaces(snapshot);
        }
        outcome
    }
}
