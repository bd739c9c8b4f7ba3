use std::collections::BTreeMap;

use tilexr_common::ZoneCoord;
use tilexr_geometry::ZoneBuffer;

use crate::context::{
    ContextState, GpuBufferId, GraphicsContext, RenderError, RenderTarget, ViewPass,
};

/// A command as seen by [`HeadlessContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Upload {
        id: GpuBufferId,
        zone: ZoneCoord,
        version: u64,
        indices: u32,
    },
    Release(GpuBufferId),
    BeginView(RenderTarget),
    Draw(GpuBufferId),
    Flush { draws: u32 },
    Reset,
}

#[derive(Debug, Clone, Copy)]
struct Resident {
    zone: ZoneCoord,
    version: u64,
    indices: u32,
}

/// Graphics context that records commands instead of talking to a GPU.
///
/// Used by tests and the CLI simulation. It enforces the same protocol a
/// real backend would: draws need an active pass and a resident buffer.
#[derive(Debug, Default)]
pub struct HeadlessContext {
    next_id: u64,
    resident: BTreeMap<GpuBufferId, Resident>,
    state: ContextState,
    pending_draws: u32,
    log: Vec<Command>,
    total_draws: u64,
    total_uploads: u64,
    flushes: u64,
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[Command] {
        &self.log
    }

    /// Take the recorded command log, leaving it empty.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.log)
    }

    /// Draw calls submitted by flushes so far.
    pub fn total_draws(&self) -> u64 {
        self.total_draws
    }

    pub fn total_uploads(&self) -> u64 {
        self.total_uploads
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn resident_version(&self, zone: ZoneCoord) -> Option<u64> {
        self.resident
            .values()
            .find(|r| r.zone == zone)
            .map(|r| r.version)
    }

    /// Human-readable summary of the context.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "=== Headless context (resident={}, uploads={}, flushes={}, draws={}) ===\n",
            self.resident.len(),
            self.total_uploads,
            self.flushes,
            self.total_draws
        ));
        for (id, r) in &self.resident {
            out.push_str(&format!(
                "  [{:>4}] zone=({}, {}) v{} indices={}\n",
                id.0, r.zone.x, r.zone.y, r.version, r.indices
            ));
        }
        out
    }
}

impl GraphicsContext for HeadlessContext {
    fn upload(&mut self, buffer: &ZoneBuffer) -> Result<GpuBufferId, RenderError> {
        self.next_id += 1;
        let id = GpuBufferId(self.next_id);
        let resident = Resident {
            zone: buffer.zone(),
            version: buffer.version(),
            indices: buffer.index_count(),
        };
        self.resident.insert(id, resident);
        self.total_uploads += 1;
        self.log.push(Command::Upload {
            id,
            zone: resident.zone,
            version: resident.version,
            indices: resident.indices,
        });
        Ok(id)
    }

    fn release(&mut self, id: GpuBufferId) {
        if self.resident.remove(&id).is_some() {
            if self.state.bound_buffer == Some(id) {
                self.state.bound_buffer = None;
            }
            self.log.push(Command::Release(id));
        }
    }

    fn begin_view(&mut self, pass: &ViewPass) -> Result<(), RenderError> {
        self.state.target = Some(pass.target);
        self.state.viewport = Some(pass.viewport);
        self.state.bound_buffer = None;
        self.log.push(Command::BeginView(pass.target));
        Ok(())
    }

    fn draw(&mut self, id: GpuBufferId) -> Result<(), RenderError> {
        if self.state.target.is_none() {
            return Err(RenderError::NoActiveView);
        }
        if !self.resident.contains_key(&id) {
            return Err(RenderError::UnknownBuffer(id));
        }
        self.state.bound_buffer = Some(id);
        self.pending_draws += 1;
        self.log.push(Command::Draw(id));
        Ok(())
    }

    fn flush(&mut self) -> Result<u32, RenderError> {
        let draws = std::mem::take(&mut self.pending_draws);
        self.total_draws += u64::from(draws);
        self.flushes += 1;
        self.log.push(Command::Flush { draws });
        Ok(draws)
    }

    fn reset_state(&mut self) {
        self.state = ContextState::default();
        self.pending_draws = 0;
        self.log.push(Command::Reset);
    }

    fn state(&self) -> ContextState {
        self.state
    }

    fn resident_buffers(&self) -> usize {
        self.resident.len()
    }
}
