use std::collections::VecDeque;
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, warn};
use wsbar_core::sway_ipc::{
    decode_header, encode_frame, Frame, FrameDecoder, FrameError, MessageKind, SubscribeReply,
    TreeNode, WorkspaceInfo, DEFAULT_MAX_FRAME_BYTES, HEADER_LEN,
};

const READ_BUFFER_BYTES: usize = 8192;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("ipc io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("ipc payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("subscription rejected: {0}")]
    SubscribeRejected(String),
    #[error("expected {expected} reply, got {got}")]
    UnexpectedReply {
        expected: MessageKind,
        got: MessageKind,
    },
    #[error("ipc connection closed")]
    Closed,
}

fn closed_on_eof(err: io::Error) -> ClientError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ClientError::Closed
    } else {
        ClientError::Io(err)
    }
}

async fn write_request(
    stream: &mut UnixStream,
    kind: MessageKind,
    payload: &[u8],
) -> Result<(), ClientError> {
    let frame = encode_frame(kind, payload, DEFAULT_MAX_FRAME_BYTES)?;
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads exactly one frame, header first, without buffering past its end.
async fn read_frame(stream: &mut UnixStream) -> Result<Frame, ClientError> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await.map_err(closed_on_eof)?;
    let (kind, len) = decode_header(&header, DEFAULT_MAX_FRAME_BYTES)?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(closed_on_eof)?;
    Ok(Frame::new(kind, payload))
}

async fn read_reply(stream: &mut UnixStream, expected: MessageKind) -> Result<Frame, ClientError> {
    loop {
        let frame = read_frame(stream).await?;
        if frame.kind == expected {
            return Ok(frame);
        }
        if frame.kind.is_event() {
            debug!(event = "ipc_stray_event", kind = %frame.kind);
            continue;
        }
        return Err(ClientError::UnexpectedReply {
            expected,
            got: frame.kind,
        });
    }
}

/// Request/response connection used for `GET_WORKSPACES` and `GET_TREE`.
pub struct SwayClient {
    stream: UnixStream,
}

impl SwayClient {
    pub async fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream })
    }

    pub async fn request(
        &mut self,
        kind: MessageKind,
        payload: &[u8],
    ) -> Result<Frame, ClientError> {
        write_request(&mut self.stream, kind, payload).await?;
        read_reply(&mut self.stream, kind).await
    }

    pub async fn get_workspaces(&mut self) -> Result<Vec<WorkspaceInfo>, ClientError> {
        let reply = self.request(MessageKind::GET_WORKSPACES, b"").await?;
        Ok(serde_json::from_slice(&reply.payload)?)
    }

    pub async fn get_tree(&mut self) -> Result<TreeNode, ClientError> {
        let reply = self.request(MessageKind::GET_TREE, b"").await?;
        Ok(serde_json::from_slice(&reply.payload)?)
    }
}

/// Dedicated connection that only carries event frames after a successful subscribe.
pub struct EventSubscription {
    stream: UnixStream,
    decoder: FrameDecoder,
    buf: Vec<u8>,
    ready: VecDeque<Frame>,
    desync: Option<FrameError>,
}

impl EventSubscription {
    pub async fn subscribe(path: &Path, events: &[&str]) -> Result<Self, ClientError> {
        let mut stream = UnixStream::connect(path).await?;
        let payload = serde_json::to_vec(events)?;
        write_request(&mut stream, MessageKind::SUBSCRIBE, &payload).await?;
        let reply = read_reply(&mut stream, MessageKind::SUBSCRIBE).await?;
        let reply: SubscribeReply = serde_json::from_slice(&reply.payload)?;
        if !reply.success {
            return Err(ClientError::SubscribeRejected(
                reply.error.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES),
            buf: vec![0u8; READ_BUFFER_BYTES],
            ready: VecDeque::new(),
            desync: None,
        })
    }

    /// Next event frame, or `Ok(None)` once the compositor closes the stream
    /// on a frame boundary. A framing error ends the subscription: frames
    /// decoded before it are still handed out, then the error is returned.
    /// Safe to cancel between calls.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, ClientError> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }
            if let Some(err) = self.desync.take() {
                return Err(ClientError::Frame(err));
            }
            let n = self.stream.read(&mut self.buf).await?;
            if n == 0 {
                if self.decoder.pending_len() > 0 {
                    return Err(ClientError::Closed);
                }
                return Ok(None);
            }
            let report = self.decoder.push_chunk(&self.buf[..n]);
            self.ready.extend(report.frames);
            if let Some(err) = report.errors.into_iter().next() {
                warn!(event = "ipc_frame_error", error = %err);
                self.desync = Some(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCompositor;
    use serde_json::json;
    use std::time::Duration;
    use wsbar_core::sway_ipc::WorkspaceEventPayload;
    use wsbar_core::ReconcileEvent;

    #[tokio::test]
    async fn get_workspaces_and_tree_round_trip() {
        let fake = FakeCompositor::start().await;
        fake.set_workspaces(&[("1", false), ("2", true)]);
        fake.set_focused_title(Some("editor <main>"));

        let mut client = SwayClient::connect(fake.path()).await.expect("connect");
        let workspaces = client.get_workspaces().await.expect("workspaces");
        let names = workspaces
            .iter()
            .map(|ws| (ws.name.as_str(), ws.focused))
            .collect::<Vec<_>>();
        assert_eq!(names, vec![("1", false), ("2", true)]);

        let tree = client.get_tree().await.expect("tree");
        let focused = tree.focused_node().and_then(|node| node.name.as_deref());
        assert_eq!(focused, Some("editor <main>"));
        assert_eq!(fake.request_count(MessageKind::GET_TREE), 1);
    }

    #[tokio::test]
    async fn subscription_yields_workspace_events() {
        let fake = FakeCompositor::start().await;
        let mut sub = EventSubscription::subscribe(fake.path(), &["workspace"])
            .await
            .expect("subscribe");
        fake.wait_for_subscriptions(1).await;

        fake.push_event(json!({
            "change": "focus",
            "current": {"name": "2", "type": "workspace", "focused": true},
            "old": {"name": "1", "type": "workspace"},
        }));
        let frame = tokio::time::timeout(Duration::from_secs(2), sub.next_frame())
            .await
            .expect("event in time")
            .expect("read")
            .expect("frame");
        assert_eq!(frame.kind, MessageKind::WORKSPACE_EVENT);
        let payload: WorkspaceEventPayload = frame.parse().expect("payload");
        assert_eq!(
            payload.into_reconcile_event(),
            Some(ReconcileEvent::FocusChanged {
                old: Some("1".to_string()),
                new: "2".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn event_split_across_writes_is_reassembled() {
        let fake = FakeCompositor::start().await;
        let mut sub = EventSubscription::subscribe(fake.path(), &["workspace"])
            .await
            .expect("subscribe");
        fake.wait_for_subscriptions(1).await;

        let payload = br#"{"change":"empty","current":{"name":"5"}}"#;
        let bytes = encode_frame(MessageKind::WORKSPACE_EVENT, payload, DEFAULT_MAX_FRAME_BYTES)
            .expect("frame");
        let (head, tail) = bytes.split_at(HEADER_LEN + 3);
        fake.push_raw(head.to_vec());
        tokio::time::sleep(Duration::from_millis(20)).await;
        fake.push_raw(tail.to_vec());

        let frame = tokio::time::timeout(Duration::from_secs(2), sub.next_frame())
            .await
            .expect("event in time")
            .expect("read")
            .expect("frame");
        assert_eq!(frame.payload, payload.to_vec());
    }

    #[tokio::test]
    async fn garbage_on_the_event_stream_is_a_frame_error() {
        let fake = FakeCompositor::start().await;
        let mut sub = EventSubscription::subscribe(fake.path(), &["workspace"])
            .await
            .expect("subscribe");
        fake.wait_for_subscriptions(1).await;
        fake.push_raw(b"not-an-ipc-frame-at-all".to_vec());

        let next = tokio::time::timeout(Duration::from_secs(2), sub.next_frame())
            .await
            .expect("error in time");
        assert!(
            matches!(next, Err(ClientError::Frame(FrameError::BadMagic))),
            "{next:?}"
        );
    }

    #[tokio::test]
    async fn clean_hangup_ends_subscription() {
        let fake = FakeCompositor::start().await;
        let mut sub = EventSubscription::subscribe(fake.path(), &["workspace"])
            .await
            .expect("subscribe");
        fake.wait_for_subscriptions(1).await;
        fake.hang_up_subscribers();

        let next = tokio::time::timeout(Duration::from_secs(2), sub.next_frame())
            .await
            .expect("eof in time")
            .expect("clean eof");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn rejected_subscription_is_reported() {
        let fake = FakeCompositor::start().await;
        fake.reject_subscriptions("not allowed");
        let err = EventSubscription::subscribe(fake.path(), &["workspace"])
            .await
            .err()
            .expect("rejected");
        match err {
            ClientError::SubscribeRejected(reason) => assert_eq!(reason, "not allowed"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn dropped_request_connection_is_closed_error() {
        let fake = FakeCompositor::start().await;
        fake.drop_requests(true);
        let mut client = SwayClient::connect(fake.path()).await.expect("connect");
        let err = client.get_tree().await.err().expect("closed");
        assert!(matches!(err, ClientError::Closed | ClientError::Io(_)), "{err}");
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = SwayClient::connect(&dir.path().join("absent.sock"))
            .await
            .err()
            .expect("no socket");
        assert!(matches!(err, ClientError::Io(_)));
    }
}
