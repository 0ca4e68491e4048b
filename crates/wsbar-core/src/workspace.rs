use crate::sway_ipc::WorkspaceInfo;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub name: String,
    pub focused: bool,
}

impl Workspace {
    pub fn new(name: impl Into<String>, focused: bool) -> Self {
        Self {
            name: name.into(),
            focused,
        }
    }
}

impl From<WorkspaceInfo> for Workspace {
    fn from(info: WorkspaceInfo) -> Self {
        Self {
            name: info.name,
            focused: info.focused,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    WorkspaceCreated { name: String, focused: bool },
    WorkspaceRemoved { name: String },
    FocusChanged { old: Option<String>, new: String },
}

impl ReconcileEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileEvent::WorkspaceCreated { .. } => "created",
            ReconcileEvent::WorkspaceRemoved { .. } => "removed",
            ReconcileEvent::FocusChanged { .. } => "focus_changed",
        }
    }
}

/// Result of a store mutation. `drift` marks an operation that referenced a
/// workspace the store does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyOutcome {
    pub changed: bool,
    pub drift: bool,
}

/// Total order over workspace names.
///
/// Names that parse as an integer sort before every other name and compare by
/// value, falling back to the raw text so `"01"` and `"1"` stay distinct. All
/// other names compare lexicographically.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>().ok(), b.parse::<i64>().ok()) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub name: String,
    pub focused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderSnapshot {
    generation: u64,
    entries: Vec<SnapshotEntry>,
}

impl RenderSnapshot {
    pub fn new(generation: u64, entries: Vec<SnapshotEntry>) -> Self {
        Self {
            generation,
            entries,
        }
    }

    /// Store generation this snapshot was taken at. Later mutations always
    /// produce a strictly larger value.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn focused(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.focused)
            .map(|entry| entry.name.as_str())
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }
}

#[derive(Debug, Default)]
pub struct WorkspaceStore {
    workspaces: Vec<Workspace>,
    generation: u64,
}

impl WorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, name: &str) -> Option<&Workspace> {
        self.position(name).ok().map(|idx| &self.workspaces[idx])
    }

    pub fn focused(&self) -> Option<&str> {
        self.workspaces
            .iter()
            .find(|ws| ws.focused)
            .map(|ws| ws.name.as_str())
    }

    pub fn focused_count(&self) -> usize {
        self.workspaces.iter().filter(|ws| ws.focused).count()
    }

    fn position(&self, name: &str) -> Result<usize, usize> {
        self.workspaces
            .binary_search_by(|ws| compare_names(&ws.name, name))
    }

    fn commit(&mut self, outcome: ApplyOutcome) -> ApplyOutcome {
        if outcome.changed {
            self.generation += 1;
        }
        outcome
    }

    fn focus_only(&mut self, name: &str) -> bool {
        let mut changed = false;
        for ws in &mut self.workspaces {
            let target = ws.name == name;
            if ws.focused != target {
                ws.focused = target;
                changed = true;
            }
        }
        changed
    }

    pub fn upsert_created(&mut self, name: &str, focused: bool) -> ApplyOutcome {
        let mut changed = false;
        match self.position(name) {
            Ok(idx) => {
                if self.workspaces[idx].focused != focused {
                    self.workspaces[idx].focused = focused;
                    changed = true;
                }
            }
            Err(idx) => {
                self.workspaces.insert(idx, Workspace::new(name, focused));
                changed = true;
            }
        }
        if focused {
            changed |= self.focus_only(name);
        }
        self.commit(ApplyOutcome {
            changed,
            drift: false,
        })
    }

    pub fn remove(&mut self, name: &str) -> ApplyOutcome {
        match self.position(name) {
            Ok(idx) => {
                self.workspaces.remove(idx);
                self.commit(ApplyOutcome {
                    changed: true,
                    drift: false,
                })
            }
            Err(_) => ApplyOutcome {
                changed: false,
                drift: true,
            },
        }
    }

    /// Moves focus to `new`. When `new` is unknown only `old` loses focus, so
    /// the store briefly shows no focused workspace until the next resync.
    pub fn set_focus(&mut self, new: &str, old: Option<&str>) -> ApplyOutcome {
        if self.position(new).is_ok() {
            let changed = self.focus_only(new);
            return self.commit(ApplyOutcome {
                changed,
                drift: false,
            });
        }

        let mut changed = false;
        if let Some(idx) = old.and_then(|old| self.position(old).ok()) {
            if self.workspaces[idx].focused {
                self.workspaces[idx].focused = false;
                changed = true;
            }
        }
        self.commit(ApplyOutcome {
            changed,
            drift: true,
        })
    }

    /// Replaces the whole store with an authoritative listing. Duplicate names
    /// keep their first record and only the first focused record stays focused.
    pub fn replace_all<I>(&mut self, records: I) -> ApplyOutcome
    where
        I: IntoIterator<Item = Workspace>,
    {
        let mut seen = HashSet::new();
        let mut focus_taken = false;
        let mut next = Vec::new();
        for mut record in records {
            if !seen.insert(record.name.clone()) {
                continue;
            }
            if record.focused {
                if focus_taken {
                    record.focused = false;
                }
                focus_taken = true;
            }
            next.push(record);
        }
        next.sort_by(|a, b| compare_names(&a.name, &b.name));

        let changed = next != self.workspaces;
        self.workspaces = next;
        self.commit(ApplyOutcome {
            changed,
            drift: false,
        })
    }

    pub fn apply(&mut self, event: &ReconcileEvent) -> ApplyOutcome {
        match event {
            ReconcileEvent::WorkspaceCreated { name, focused } => {
                self.upsert_created(name, *focused)
            }
            ReconcileEvent::WorkspaceRemoved { name } => self.remove(name),
            ReconcileEvent::FocusChanged { old, new } => self.set_focus(new, old.as_deref()),
        }
    }

    pub fn sorted_snapshot(&self) -> RenderSnapshot {
        RenderSnapshot::new(
            self.generation,
            self.workspaces
                .iter()
                .map(|ws| SnapshotEntry {
                    name: ws.name.clone(),
                    focused: ws.focused,
                })
                .collect(),
        )
    }
}

/// Handle to the one store instance shared by both reconcilers. Every
/// mutation and its snapshot happen under a single lock acquisition.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<WorkspaceStore>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WorkspaceStore> {
        // Mutations complete before any call that could panic.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply(&self, event: &ReconcileEvent) -> (ApplyOutcome, RenderSnapshot) {
        let mut store = self.lock();
        let outcome = store.apply(event);
        (outcome, store.sorted_snapshot())
    }

    pub fn replace_all<I>(&self, records: I) -> (ApplyOutcome, RenderSnapshot)
    where
        I: IntoIterator<Item = Workspace>,
    {
        let mut store = self.lock();
        let outcome = store.replace_all(records);
        (outcome, store.sorted_snapshot())
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        self.lock().sorted_snapshot()
    }

    pub fn focused_count(&self) -> usize {
        self.lock().focused_count()
    }
}
