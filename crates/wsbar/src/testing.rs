//! In-process stand-in for the compositor's IPC socket.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use wsbar_core::sway_ipc::{
    decode_header, encode_frame, MessageKind, WorkspaceInfo, DEFAULT_MAX_FRAME_BYTES, HEADER_LEN,
};

#[derive(Clone, Debug)]
enum Push {
    Frame(Vec<u8>),
    HangUp,
}

#[derive(Default)]
struct FakeState {
    workspaces: Vec<WorkspaceInfo>,
    focused_title: Option<String>,
    reject: Option<String>,
    drop_requests: bool,
    stall_requests: bool,
    requests: HashMap<u32, usize>,
    request_log: Vec<MessageKind>,
}

pub struct FakeCompositor {
    _dir: TempDir,
    path: PathBuf,
    state: Arc<Mutex<FakeState>>,
    events: broadcast::Sender<Push>,
    subscriptions: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeCompositor {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sway-ipc.sock");
        let listener = UnixListener::bind(&path).expect("bind fake compositor");
        let state = Arc::new(Mutex::new(FakeState::default()));
        let (events, _) = broadcast::channel(64);
        let subscriptions = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(accept_loop(
            listener,
            state.clone(),
            events.clone(),
            subscriptions.clone(),
        ));
        Self {
            _dir: dir,
            path,
            state,
            events,
            subscriptions,
            task,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_workspaces(&self, workspaces: &[(&str, bool)]) {
        let mut state = self.state.lock().expect("fake state");
        state.workspaces = workspaces
            .iter()
            .enumerate()
            .map(|(idx, (name, focused))| WorkspaceInfo {
                name: name.to_string(),
                focused: *focused,
                num: name.parse().ok(),
                visible: *focused,
                output: Some(format!("OUT-{}", idx % 2)),
            })
            .collect();
    }

    pub fn set_focused_title(&self, title: Option<&str>) {
        self.state.lock().expect("fake state").focused_title = title.map(str::to_string);
    }

    pub fn reject_subscriptions(&self, reason: &str) {
        self.state.lock().expect("fake state").reject = Some(reason.to_string());
    }

    /// Close request connections as soon as a request arrives.
    pub fn drop_requests(&self, drop: bool) {
        self.state.lock().expect("fake state").drop_requests = drop;
    }

    /// Accept requests but never answer them.
    pub fn stall_requests(&self, stall: bool) {
        self.state.lock().expect("fake state").stall_requests = stall;
    }

    /// Every request kind received, in arrival order across connections.
    pub fn request_log(&self) -> Vec<MessageKind> {
        self.state.lock().expect("fake state").request_log.clone()
    }

    pub fn request_count(&self, kind: MessageKind) -> usize {
        self.state
            .lock()
            .expect("fake state")
            .requests
            .get(&kind.0)
            .copied()
            .unwrap_or(0)
    }

    pub fn push_event(&self, payload: Value) {
        let bytes = serde_json::to_vec(&payload).expect("event json");
        let frame = encode_frame(MessageKind::WORKSPACE_EVENT, &bytes, DEFAULT_MAX_FRAME_BYTES)
            .expect("event frame");
        let _ = self.events.send(Push::Frame(frame));
    }

    pub fn push_raw(&self, bytes: Vec<u8>) {
        let _ = self.events.send(Push::Frame(bytes));
    }

    pub fn hang_up_subscribers(&self) {
        let _ = self.events.send(Push::HangUp);
    }

    /// Waits until at least `count` subscriptions have been accepted in total.
    pub async fn wait_for_subscriptions(&self, count: usize) {
        for _ in 0..150 {
            if self.subscriptions.load(Ordering::SeqCst) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("fake compositor never saw {count} subscriptions");
    }

    pub async fn wait_for_requests(&self, kind: MessageKind, count: usize) {
        for _ in 0..150 {
            if self.request_count(kind) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("fake compositor never saw {count} {kind} requests");
    }
}

impl Drop for FakeCompositor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn tree_json(state: &FakeState) -> Value {
    let workspace = state
        .workspaces
        .iter()
        .find(|ws| ws.focused)
        .map(|ws| ws.name.clone())
        .unwrap_or_else(|| "1".to_string());
    let windows = match &state.focused_title {
        Some(title) => vec![
            json!({"id": 10, "name": "background", "type": "con", "focused": false}),
            json!({"id": 11, "name": title, "type": "con", "focused": true}),
        ],
        None => Vec::new(),
    };
    json!({
        "id": 1,
        "name": "root",
        "type": "root",
        "nodes": [{
            "id": 2,
            "name": "OUT-0",
            "type": "output",
            "nodes": [{
                "id": 3,
                "name": workspace,
                "type": "workspace",
                "nodes": windows,
            }],
        }],
    })
}

async fn accept_loop(
    listener: UnixListener,
    state: Arc<Mutex<FakeState>>,
    events: broadcast::Sender<Push>,
    subscriptions: Arc<AtomicUsize>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(serve(
            stream,
            state.clone(),
            events.clone(),
            subscriptions.clone(),
        ));
    }
}

async fn serve(
    mut stream: UnixStream,
    state: Arc<Mutex<FakeState>>,
    events: broadcast::Sender<Push>,
    subscriptions: Arc<AtomicUsize>,
) {
    loop {
        let mut header = [0u8; HEADER_LEN];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let Ok((kind, len)) = decode_header(&header, DEFAULT_MAX_FRAME_BYTES) else {
            return;
        };
        let mut payload = vec![0u8; len];
        if stream.read_exact(&mut payload).await.is_err() {
            return;
        }

        let (reply, accepted, stall) = {
            let mut state = state.lock().expect("fake state");
            *state.requests.entry(kind.0).or_default() += 1;
            state.request_log.push(kind);
            if state.drop_requests && kind != MessageKind::SUBSCRIBE {
                return;
            }
            let (reply, accepted) = match kind {
                MessageKind::GET_WORKSPACES => (json!(state.workspaces), false),
                MessageKind::GET_TREE => (tree_json(&state), false),
                MessageKind::SUBSCRIBE => match &state.reject {
                    Some(reason) => (json!({"success": false, "error": reason}), false),
                    None => (json!({"success": true}), true),
                },
                _ => return,
            };
            (reply, accepted, state.stall_requests)
        };
        if stall {
            std::future::pending::<()>().await;
        }

        let receiver = accepted.then(|| events.subscribe());
        if accepted {
            subscriptions.fetch_add(1, Ordering::SeqCst);
        }
        let bytes = serde_json::to_vec(&reply).expect("reply json");
        let frame = encode_frame(kind, &bytes, DEFAULT_MAX_FRAME_BYTES).expect("reply frame");
        if stream.write_all(&frame).await.is_err() {
            return;
        }
        if let Some(receiver) = receiver {
            forward_events(stream, receiver).await;
            return;
        }
    }
}

async fn forward_events(mut stream: UnixStream, mut receiver: broadcast::Receiver<Push>) {
    loop {
        match receiver.recv().await {
            Ok(Push::Frame(bytes)) => {
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            Ok(Push::HangUp) | Err(broadcast::error::RecvError::Closed) => return,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
        }
    }
}
