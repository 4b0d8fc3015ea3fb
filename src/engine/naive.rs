use std::path::Path;

use crate::engine::Engine;
use crate::engine::EngineCore;
use crate::engine::OutputChangedFn;
use crate::engine::ReadStateFn;
use crate::error::Error;
use crate::error::Result;
use crate::fuzzy::variable::Role;
use crate::fuzzy::variable::VarId;
use crate::fuzzy::variable::Variables;
use crate::persist;

/// the no-learning backend: shares the variable registry and the
/// engine surface, but a tick only drives the read callback. useful as
/// a drop-in when a controller wants the plumbing without a model.
#[derive(Debug, Default)]
pub struct NaiveEngine {
    core: EngineCore,
    vars: Variables,
}

impl NaiveEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for NaiveEngine {
    fn variables(&self) -> &Variables {
        &self.vars
    }

    fn variables_mut(&mut self) -> &mut Variables {
        &mut self.vars
    }

    fn new_input(&mut self, name: &str) -> Result<VarId> {
        self.vars.new_variable(name, Role::Input)
    }

    fn new_output(&mut self, name: &str) -> Result<VarId> {
        self.vars.new_variable(name, Role::Output)
    }

    fn remove_variable(&mut self, id: VarId) -> Result<()> {
        let (role, pos) = self
            .vars
            .position(id)
            .ok_or_else(|| Error::NotFound("variable".into()))?;
        self.vars.remove_at(role, pos);
        Ok(())
    }

    fn variable_set_range(&mut self, id: VarId, min: f32, max: f32) -> Result<()> {
        self.vars.set_range(id, min, max).map(|_| ())
    }

    fn variable_set_enabled(&mut self, id: VarId, enabled: bool) -> Result<()> {
        self.vars
            .get_mut(id)
            .map(|v| v.set_enabled(enabled))
            .ok_or_else(|| Error::NotFound("variable".into()))
    }

    fn process(&mut self) -> Result<()> {
        let Self { core, vars } = self;
        let cb = core
            .read_cb
            .as_mut()
            .ok_or_else(|| Error::IllegalState("no read state callback".into()))?;
        if !cb(vars) {
            return Err(Error::ReadDeclined);
        }
        Ok(())
    }

    fn predict(&mut self) -> bool {
        true
    }

    fn save(&self, _path: &Path) -> Result<()> {
        log::debug!("save is a no-op for the naive engine");
        Ok(())
    }

    fn load(&mut self, _path: &Path) -> Result<()> {
        log::debug!("load is a no-op for the naive engine");
        Ok(())
    }

    fn load_description(&mut self, path: &Path) -> Result<()> {
        let (vars, _) = persist::fll::load(path)?;
        self.vars = vars;
        Ok(())
    }

    fn set_read_state_callback(&mut self, cb: ReadStateFn) {
        self.core.read_cb = Some(cb);
    }

    fn set_output_changed_callback(&mut self, cb: OutputChangedFn) {
        self.core.changed_cb = Some(cb);
    }

    fn set_stabilization_hits(&mut self, hits: u16) {
        self.core.stabilization_hits = hits;
    }

    fn set_learn_disabled(&mut self, disabled: bool) {
        self.core.learn_disabled = disabled;
    }

    fn set_max_memory_for_observations(&mut self, bytes: usize) {
        self.core.obs_max_bytes = bytes;
    }

    fn print_debug(&self, _full: bool) {
        log::debug!("inputs ({})", self.vars.inputs().len());
        for var in self.vars.inputs() {
            let (min, max) = var.range();
            log::debug!("  {}: {} ({} - {})", var.name(), var.raw_value(), min, max);
        }
        log::debug!("outputs ({})", self.vars.outputs().len());
        for var in self.vars.outputs() {
            let (min, max) = var.range();
            log::debug!("  {}: {} ({} - {})", var.name(), var.raw_value(), min, max);
        }
    }
}
