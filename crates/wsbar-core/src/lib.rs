//! Compositor state-synchronisation core for the wsbar status strip.
//!
//! - [`sway_ipc`]: i3/sway IPC framing and the payloads the bar consumes.
//! - [`workspace`]: the ordered, focus-tagged workspace store and the
//!   reconciliation events applied to it.
//! - [`render`]: pure markup rendering of store snapshots.

pub mod render;
pub mod sway_ipc;
pub mod workspace;

pub use render::{escape_markup, strip_markup, workspace_markup};
pub use workspace::{
    compare_names, ApplyOutcome, ReconcileEvent, RenderSnapshot, SharedStore, SnapshotEntry,
    Workspace, WorkspaceStore,
};
