use crate::shutdown::{self, ShutdownRx};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Write};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wsbar_core::{strip_markup, workspace_markup, RenderSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    Workspaces,
    FocusedWindow,
    Clock,
    Cpu,
    Temperature,
    Memory,
    Battery,
}

impl Segment {
    pub fn name(self) -> &'static str {
        match self {
            Segment::Workspaces => "workspaces",
            Segment::FocusedWindow => "focused_window",
            Segment::Clock => "clock",
            Segment::Cpu => "cpu",
            Segment::Temperature => "temperature",
            Segment::Memory => "memory",
            Segment::Battery => "battery",
        }
    }

    /// Text shown until the first real value arrives.
    pub fn placeholder(self) -> &'static str {
        match self {
            Segment::Workspaces | Segment::FocusedWindow | Segment::Clock => "--",
            Segment::Cpu => "🖥️ --",
            Segment::Temperature => "🌡️ --",
            Segment::Memory => "💾 --",
            Segment::Battery => "🔋 --",
        }
    }

    pub fn is_markup(self) -> bool {
        matches!(self, Segment::Workspaces | Segment::FocusedWindow)
    }
}

/// Display order: workspaces, title, metrics, clock.
pub fn layout(metrics: bool, battery: bool) -> Vec<Segment> {
    let mut segments = vec![Segment::Workspaces, Segment::FocusedWindow];
    if metrics {
        segments.extend([Segment::Cpu, Segment::Temperature, Segment::Memory]);
        if battery {
            segments.push(Segment::Battery);
        }
    }
    segments.push(Segment::Clock);
    segments
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderJob {
    Workspaces(RenderSnapshot),
    Text { segment: Segment, text: String },
}

/// Cloneable, non-blocking handle producers use to hand work to the presenter.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<RenderJob>,
}

pub struct JobQueue {
    rx: mpsc::UnboundedReceiver<RenderJob>,
}

pub fn channel() -> (Publisher, JobQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Publisher { tx }, JobQueue { rx })
}

impl Publisher {
    pub fn publish(&self, segment: Segment, text: impl Into<String>) {
        self.send(RenderJob::Text {
            segment,
            text: text.into(),
        });
    }

    pub fn publish_workspaces(&self, snapshot: RenderSnapshot) {
        self.send(RenderJob::Workspaces(snapshot));
    }

    fn send(&self, job: RenderJob) {
        if self.tx.send(job).is_err() {
            debug!(event = "publish_dropped", reason = "presenter_gone");
        }
    }
}

impl JobQueue {
    pub async fn recv(&mut self) -> Option<RenderJob> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RenderJob> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBlock {
    pub segment: Segment,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusFrame {
    pub blocks: Vec<StatusBlock>,
}

impl StatusFrame {
    pub fn text(&self, segment: Segment) -> Option<&str> {
        self.blocks
            .iter()
            .find(|block| block.segment == segment)
            .map(|block| block.text.as_str())
    }
}

pub trait Surface {
    fn present(&mut self, frame: &StatusFrame) -> io::Result<()>;
}

pub struct Presenter<S> {
    layout: Vec<Segment>,
    values: HashMap<Segment, String>,
    last_generation: Option<u64>,
    surface: S,
}

impl<S: Surface> Presenter<S> {
    pub fn new(layout: Vec<Segment>, surface: S) -> Self {
        Self {
            layout,
            values: HashMap::new(),
            last_generation: None,
            surface,
        }
    }

    /// Applies one job to its segment slot. Returns `true` when the visible
    /// content changed.
    pub fn apply(&mut self, job: RenderJob) -> bool {
        let (segment, text) = match job {
            RenderJob::Workspaces(snapshot) => {
                let generation = snapshot.generation();
                if let Some(last) = self.last_generation {
                    if generation <= last {
                        debug!(event = "stale_snapshot_dropped", generation, last);
                        return false;
                    }
                }
                self.last_generation = Some(generation);
                (Segment::Workspaces, workspace_markup(&snapshot))
            }
            RenderJob::Text { segment, text } => (segment, text),
        };
        if self.values.get(&segment) == Some(&text) {
            return false;
        }
        self.values.insert(segment, text);
        true
    }

    pub fn frame(&self) -> StatusFrame {
        let blocks = self
            .layout
            .iter()
            .map(|segment| StatusBlock {
                segment: *segment,
                text: self
                    .values
                    .get(segment)
                    .cloned()
                    .unwrap_or_else(|| segment.placeholder().to_string()),
            })
            .collect();
        StatusFrame { blocks }
    }

    fn flush(&mut self) {
        let frame = self.frame();
        if let Err(err) = self.surface.present(&frame) {
            warn!(event = "surface_write_error", error = %err);
        }
    }

    /// Sole consumer of the job queue. Drains everything already queued
    /// before each flush, so a burst of jobs produces one frame.
    pub async fn run(mut self, mut queue: JobQueue, mut shutdown: ShutdownRx) -> S {
        self.flush();
        loop {
            let job = tokio::select! {
                _ = shutdown::wait(&mut shutdown) => break,
                job = queue.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let mut dirty = self.apply(job);
            while let Some(job) = queue.try_recv() {
                dirty |= self.apply(job);
            }
            if dirty {
                self.flush();
            }
        }
        self.surface
    }
}

pub struct TextSurface<W> {
    writer: W,
}

impl<W: Write> TextSurface<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

pub fn text_line(frame: &StatusFrame) -> String {
    frame
        .blocks
        .iter()
        .map(|block| {
            if block.segment.is_markup() {
                strip_markup(&block.text)
            } else {
                block.text.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

impl<W: Write> Surface for TextSurface<W> {
    fn present(&mut self, frame: &StatusFrame) -> io::Result<()> {
        writeln!(self.writer, "{}", text_line(frame))?;
        self.writer.flush()
    }
}

#[derive(Serialize)]
struct SwaybarBlock<'a> {
    name: &'static str,
    full_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    markup: Option<&'static str>,
}

/// swaybar/i3bar protocol writer: a version header, then an endless JSON
/// array whose elements are block arrays.
pub struct SwaybarSurface<W> {
    writer: W,
    frames_written: u64,
}

impl<W: Write> SwaybarSurface<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frames_written: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Surface for SwaybarSurface<W> {
    fn present(&mut self, frame: &StatusFrame) -> io::Result<()> {
        if self.frames_written == 0 {
            writeln!(self.writer, "{}", serde_json::json!({ "version": 1 }))?;
            writeln!(self.writer, "[")?;
        } else {
            write!(self.writer, ",")?;
        }
        let blocks = frame
            .blocks
            .iter()
            .map(|block| SwaybarBlock {
                name: block.segment.name(),
                full_text: &block.text,
                markup: block.segment.is_markup().then_some("pango"),
            })
            .collect::<Vec<_>>();
        serde_json::to_writer(&mut self.writer, &blocks)?;
        writeln!(self.writer)?;
        self.frames_written += 1;
        self.writer.flush()
    }
}
