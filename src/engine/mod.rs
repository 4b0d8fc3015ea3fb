pub mod fuzzy;
pub mod naive;

pub use fuzzy::FuzzyEngine;
pub use naive::NaiveEngine;

use std::path::Path;

use crate::DEFAULT_STABILIZATION_HITS;
use crate::error::Result;
use crate::fuzzy::variable::VarId;
use crate::fuzzy::variable::Variables;

/// host callback reading the current sensor and actuator state into
/// the registry. returning false aborts the tick.
pub type ReadStateFn = Box<dyn FnMut(&mut Variables) -> bool>;

/// host callback fired when prediction moved outputs significantly.
/// receives the registry and the ids of the changed outputs.
pub type OutputChangedFn = Box<dyn FnMut(&Variables, &[VarId])>;

/// execution state shared by every backend: the callbacks, the
/// stabilization window, and the learning switches
pub(crate) struct EngineCore {
    pub read_cb: Option<ReadStateFn>,
    pub changed_cb: Option<OutputChangedFn>,
    pub stabilization_hits: u16,
    pub hits: u16,
    pub learn_disabled: bool,
    pub obs_max_bytes: usize,
    pub output_changed_called: bool,
}

impl Default for EngineCore {
    fn default() -> Self {
        Self {
            read_cb: None,
            changed_cb: None,
            stabilization_hits: DEFAULT_STABILIZATION_HITS,
            hits: 0,
            learn_disabled: false,
            obs_max_bytes: 0,
            output_changed_called: false,
        }
    }
}

impl std::fmt::Debug for EngineCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCore")
            .field("stabilization_hits", &self.stabilization_hits)
            .field("hits", &self.hits)
            .field("learn_disabled", &self.learn_disabled)
            .field("obs_max_bytes", &self.obs_max_bytes)
            .field("output_changed_called", &self.output_changed_called)
            .finish()
    }
}

/// the capability set every prediction backend exposes: lifecycle,
/// topology, execution, persistence and debug. dispatch is synchronous
/// and single threaded.
pub trait Engine {
    fn variables(&self) -> &Variables;
    fn variables_mut(&mut self) -> &mut Variables;

    fn new_input(&mut self, name: &str) -> Result<VarId>;
    fn new_output(&mut self, name: &str) -> Result<VarId>;
    /// removal is deferred to the start of the next tick so mid-tick
    /// invariants hold
    fn remove_variable(&mut self, id: VarId) -> Result<()>;
    fn variable_set_range(&mut self, id: VarId, min: f32, max: f32) -> Result<()>;
    fn variable_set_enabled(&mut self, id: VarId, enabled: bool) -> Result<()>;

    fn process(&mut self) -> Result<()>;
    fn predict(&mut self) -> bool;

    fn save(&self, path: &Path) -> Result<()>;
    fn load(&mut self, path: &Path) -> Result<()>;
    /// import a textual variable description, replacing the topology
    fn load_description(&mut self, path: &Path) -> Result<()>;

    fn set_read_state_callback(&mut self, cb: ReadStateFn);
    fn set_output_changed_callback(&mut self, cb: OutputChangedFn);
    fn set_stabilization_hits(&mut self, hits: u16);
    fn set_learn_disabled(&mut self, disabled: bool);
    fn set_max_memory_for_observations(&mut self, bytes: usize);
    fn print_debug(&self, full: bool);
}
