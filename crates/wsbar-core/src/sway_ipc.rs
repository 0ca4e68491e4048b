use crate::workspace::ReconcileEvent;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const MAGIC: &[u8; 6] = b"i3-ipc";
pub const HEADER_LEN: usize = MAGIC.len() + 8;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

const EVENT_BIT: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKind(pub u32);

impl MessageKind {
    pub const GET_WORKSPACES: Self = Self(1);
    pub const SUBSCRIBE: Self = Self(2);
    pub const GET_TREE: Self = Self(4);
    pub const WORKSPACE_EVENT: Self = Self(EVENT_BIT);

    pub fn is_event(self) -> bool {
        self.0 & EVENT_BIT != 0
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::GET_WORKSPACES => f.write_str("get_workspaces"),
            Self::SUBSCRIBE => f.write_str("subscribe"),
            Self::GET_TREE => f.write_str("get_tree"),
            Self::WORKSPACE_EVENT => f.write_str("workspace_event"),
            other if other.is_event() => write!(f, "event({})", other.0 & !EVENT_BIT),
            other => write!(f, "message({})", other.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame does not start with the i3-ipc magic")]
    BadMagic,
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: MessageKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn json<T: Serialize>(kind: MessageKind, value: &T) -> Result<Self, FrameError> {
        let payload = serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
        Ok(Self::new(kind, payload))
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        serde_json::from_slice(&self.payload).map_err(|err| FrameError::Decode(err.to_string()))
    }

    pub fn encode(&self, max_frame_bytes: usize) -> Result<Vec<u8>, FrameError> {
        encode_frame(self.kind, &self.payload, max_frame_bytes)
    }
}

pub fn encode_frame(
    kind: MessageKind,
    payload: &[u8],
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    if payload.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: payload.len(),
            max: max_frame_bytes,
        });
    }
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::OversizedFrame {
        size: payload.len(),
        max: max_frame_bytes,
    })?;
    let mut encoded = Vec::with_capacity(HEADER_LEN + payload.len());
    encoded.extend_from_slice(MAGIC);
    encoded.extend_from_slice(&len.to_ne_bytes());
    encoded.extend_from_slice(&kind.0.to_ne_bytes());
    encoded.extend_from_slice(payload);
    Ok(encoded)
}

/// Parses a frame header and returns the message kind plus the declared payload length.
pub fn decode_header(
    header: &[u8],
    max_frame_bytes: usize,
) -> Result<(MessageKind, usize), FrameError> {
    if header.len() < HEADER_LEN {
        return Err(FrameError::Truncated {
            needed: HEADER_LEN,
            available: header.len(),
        });
    }
    if &header[..MAGIC.len()] != MAGIC {
        return Err(FrameError::BadMagic);
    }
    let len = read_u32(&header[MAGIC.len()..MAGIC.len() + 4]) as usize;
    let kind = MessageKind(read_u32(&header[MAGIC.len() + 4..HEADER_LEN]));
    if len > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: len,
            max: max_frame_bytes,
        });
    }
    Ok((kind, len))
}

pub fn decode_frame(bytes: &[u8], max_frame_bytes: usize) -> Result<Frame, FrameError> {
    let (kind, len) = decode_header(bytes, max_frame_bytes)?;
    let needed = HEADER_LEN + len;
    if bytes.len() < needed {
        return Err(FrameError::Truncated {
            needed,
            available: bytes.len(),
        });
    }
    Ok(Frame::new(kind, &bytes[HEADER_LEN..needed]))
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_ne_bytes(raw)
}

#[derive(Debug, Clone)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<FrameError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Incremental decoder for a stream of frames split across arbitrary reads.
pub struct FrameDecoder {
    max_frame_bytes: usize,
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<Frame> {
        let mut report = DecodeReport::default();
        self.pending.extend_from_slice(chunk);

        while self.pending.len() >= HEADER_LEN {
            let len = match decode_header(&self.pending, self.max_frame_bytes) {
                Ok((_, len)) => len,
                Err(err) => {
                    // The stream has no resync marker; drop what we hold.
                    report.errors.push(err);
                    self.pending.clear();
                    break;
                }
            };
            let needed = HEADER_LEN + len;
            if self.pending.len() < needed {
                break;
            }
            let raw = self.pending.drain(..needed).collect::<Vec<u8>>();
            match decode_frame(&raw, self.max_frame_bytes) {
                Ok(frame) => report.frames.push(frame),
                Err(err) => report.errors.push(err),
            }
        }

        report
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub name: String,
    #[serde(default)]
    pub focused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num: Option<i64>,
    #[serde(default)]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TreeNode {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub node_type: Option<String>,
    #[serde(default)]
    pub focused: bool,
    #[serde(default)]
    pub nodes: Vec<TreeNode>,
    #[serde(default)]
    pub floating_nodes: Vec<TreeNode>,
}

impl TreeNode {
    /// Depth-first search for the node the compositor marks as focused.
    pub fn focused_node(&self) -> Option<&TreeNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.focused {
                return Some(node);
            }
            // Reversed so tiled children are visited before floating ones.
            stack.extend(node.floating_nodes.iter().rev());
            stack.extend(node.nodes.iter().rev());
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceChange {
    Init,
    Empty,
    Focus,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceEventPayload {
    pub change: WorkspaceChange,
    #[serde(default)]
    pub current: Option<TreeNode>,
    #[serde(default)]
    pub old: Option<TreeNode>,
}

impl WorkspaceEventPayload {
    pub fn into_reconcile_event(self) -> Option<ReconcileEvent> {
        let current = self.current?;
        let name = current.name?;
        match self.change {
            WorkspaceChange::Init => Some(ReconcileEvent::WorkspaceCreated {
                name,
                focused: current.focused,
            }),
            WorkspaceChange::Empty => Some(ReconcileEvent::WorkspaceRemoved { name }),
            WorkspaceChange::Focus => Some(ReconcileEvent::FocusChanged {
                old: self.old.and_then(|node| node.name),
                new: name,
            }),
            WorkspaceChange::Other => None,
        }
    }
}
