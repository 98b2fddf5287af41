use super::dataset::Field;
use log::{debug, info};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdaterState {
    Idle,
    Armed,
    Running,
}

impl UpdaterState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => UpdaterState::Armed,
            2 => UpdaterState::Running,
            _ => UpdaterState::Idle,
        }
    }
}

/// Applies each dynamic field's transform once per publish cycle.
///
/// Idle until the writer group is frozen, Armed after freeze, Running while
/// the scheduler is enabled. Ticks outside Running are no-ops.
#[derive(Debug)]
pub struct ValueUpdater {
    state: AtomicU8,
    dynamic: Vec<Arc<Field>>,
}

impl Default for ValueUpdater {
    fn default() -> Self {
        ValueUpdater {
            state: AtomicU8::new(UpdaterState::Idle as u8),
            dynamic: Vec::new(),
        }
    }
}

impl ValueUpdater {
    /// Idle -> Armed with the frozen set of dynamic fields.
    pub(crate) fn arm(&mut self, dynamic: Vec<Arc<Field>>) {
        info!("Value updater armed with {} dynamic field(s)", dynamic.len());
        self.dynamic = dynamic;
        self.state.store(UpdaterState::Armed as u8, Ordering::Release);
    }

    /// Armed -> Running. False in any other state.
    pub fn start(&self) -> bool {
        self.swap_state(UpdaterState::Armed, UpdaterState::Running)
    }

    /// Running -> Armed. False in any other state.
    pub fn stop(&self) -> bool {
        self.swap_state(UpdaterState::Running, UpdaterState::Armed)
    }

    fn swap_state(&self, from: UpdaterState, to: UpdaterState) -> bool {
        let ok = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if ok {
            debug!("Value updater {:?} -> {:?}", from, to);
        }
        ok
    }

    pub fn state(&self) -> UpdaterState {
        UpdaterState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// One publish-cycle update. Returns how many fields changed.
    pub fn tick(&self) -> usize {
        if self.state() != UpdaterState::Running {
            return 0;
        }
        self.dynamic.iter().filter(|f| f.advance()).count()
    }

    pub fn dynamic_fields(&self) -> &[Arc<Field>] {
        &self.dynamic
    }
}
