use std::path::Path;

use crate::collections::matrix::Matrix;
use crate::engine::Engine;
use crate::engine::EngineCore;
use crate::engine::OutputChangedFn;
use crate::engine::ReadStateFn;
use crate::error::Error;
use crate::error::Result;
use crate::fuzzy::measure::Measure;
use crate::fuzzy::measure::membership_equals;
use crate::fuzzy::norm::SNorm;
use crate::fuzzy::norm::TNorm;
use crate::fuzzy::output::Activated;
use crate::fuzzy::output::Aggregate;
use crate::fuzzy::output::Defuzzifier;
use crate::fuzzy::rule::Rule;
use crate::fuzzy::term::Origin;
use crate::fuzzy::term::Shape;
use crate::fuzzy::term::TermId;
use crate::fuzzy::variable::Role;
use crate::fuzzy::variable::VarId;
use crate::fuzzy::variable::Variables;
use crate::learn::controller::Controller;
use crate::learn::terms::TermsManager;
use crate::persist;

/// the rule induction backend. per tick: drain deferred removals,
/// auto-populate bare variables, read state, wait for stabilization,
/// then either act (predict and notify) or learn (commit the stable
/// measure into the observation store).
#[derive(Debug, Default)]
pub struct FuzzyEngine {
    core: EngineCore,
    vars: Variables,
    controller: Controller,
    terms: TermsManager,
    conjunction: TNorm,
    auto_balance: bool,
    last_stable: Option<Measure>,
    pending_variables: Vec<VarId>,
    pending_terms: Vec<(VarId, TermId)>,
}

impl FuzzyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conjunction(&self) -> TNorm {
        self.conjunction
    }

    pub fn set_conjunction(&mut self, conjunction: TNorm) {
        self.conjunction = conjunction;
    }

    pub fn set_rule_weight_threshold(&mut self, threshold: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidArgument(format!(
                "weight threshold {threshold} must lie in [0, 1]"
            )));
        }
        self.controller.set_weight_threshold(threshold);
        Ok(())
    }

    pub fn set_terms_auto_balance(&mut self, auto_balance: bool) {
        if self.auto_balance && !auto_balance {
            self.terms.clear();
        }
        self.auto_balance = auto_balance;
    }

    pub fn set_simplification_disabled(&mut self, disabled: bool) {
        self.controller
            .set_simplification_disabled(&self.vars, disabled);
    }

    pub fn add_term_rectangle(
        &mut self,
        var: VarId,
        name: &str,
        start: f32,
        end: f32,
    ) -> Result<TermId> {
        self.vars
            .add_term(var, name, Shape::Rectangle { start, end }, Origin::User)
    }

    pub fn add_term_triangle(
        &mut self,
        var: VarId,
        name: &str,
        a: f32,
        b: f32,
        c: f32,
    ) -> Result<TermId> {
        self.vars
            .add_term(var, name, Shape::Triangle { a, b, c }, Origin::User)
    }

    pub fn add_term_ramp(&mut self, var: VarId, name: &str, start: f32, end: f32) -> Result<TermId> {
        self.vars
            .add_term(var, name, Shape::Ramp { start, end }, Origin::User)
    }

    pub fn add_term_cosine(
        &mut self,
        var: VarId,
        name: &str,
        center: f32,
        width: f32,
    ) -> Result<TermId> {
        self.vars
            .add_term(var, name, Shape::Cosine { center, width }, Origin::User)
    }

    pub fn add_term_gaussian(
        &mut self,
        var: VarId,
        name: &str,
        mean: f32,
        sd: f32,
    ) -> Result<TermId> {
        self.vars
            .add_term(var, name, Shape::Gaussian { mean, sd }, Origin::User)
    }

    /// queued and applied at the next tick start, like variables
    pub fn remove_term(&mut self, var: VarId, term: TermId) -> Result<()> {
        let variable = self
            .vars
            .get(var)
            .ok_or_else(|| Error::NotFound("variable".into()))?;
        if variable.term_position(term).is_none() {
            return Err(Error::NotFound("term".into()));
        }
        self.pending_terms.push((var, term));
        Ok(())
    }

    pub fn set_default_term_width(&mut self, var: VarId, width: f32) -> Result<()> {
        self.vars
            .get_mut(var)
            .map(|v| v.set_default_term_width(width))
            .ok_or_else(|| Error::NotFound("variable".into()))
    }

    pub fn set_is_id(&mut self, var: VarId, is_id: bool) -> Result<()> {
        self.vars
            .get_mut(var)
            .map(|v| v.set_is_id(is_id))
            .ok_or_else(|| Error::NotFound("variable".into()))
    }

    pub fn output_set_defuzzifier(&mut self, var: VarId, defuzzifier: Defuzzifier) -> Result<()> {
        match self.vars.get_mut(var) {
            Some(v) if v.role() == Role::Output => {
                v.set_defuzzifier(defuzzifier);
                Ok(())
            }
            Some(_) => Err(Error::InvalidArgument("not an output variable".into())),
            None => Err(Error::NotFound("variable".into())),
        }
    }

    pub fn output_set_accumulation(&mut self, var: VarId, accumulation: SNorm) -> Result<()> {
        match self.vars.get_mut(var) {
            Some(v) if v.role() == Role::Output => {
                v.set_accumulation(accumulation);
                Ok(())
            }
            Some(_) => Err(Error::InvalidArgument("not an output variable".into())),
            None => Err(Error::NotFound("variable".into())),
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.controller.rules()
    }

    pub fn observation_group_count(&self) -> usize {
        self.controller.group_count()
    }

    /// drop everything learned, keeping the topology
    pub fn erase_knowledge(&mut self) {
        self.controller.clear();
        self.terms.clear();
        self.last_stable = None;
        self.core.hits = 0;
        self.core.output_changed_called = false;
    }

    /// apply the deferred variable and term removals queued since the
    /// last tick, cascading through every learning structure, then
    /// rederive the rule base once
    fn apply_removals(&mut self) {
        let mut removed = false;
        if !self.pending_variables.is_empty() {
            let mut inputs = vec![false; self.vars.inputs().len()];
            let mut outputs = vec![false; self.vars.outputs().len()];
            for id in &self.pending_variables {
                match self.vars.position(*id) {
                    Some((Role::Input, pos)) => inputs[pos] = true,
                    Some((Role::Output, pos)) => outputs[pos] = true,
                    None => {}
                }
            }
            if inputs.contains(&true) || outputs.contains(&true) {
                self.terms.remove_variables(&inputs, &outputs);
                self.controller.remove_variables(&inputs, &outputs);
                for id in std::mem::take(&mut self.pending_variables) {
                    let Some((role, pos)) = self.vars.position(id) else {
                        continue;
                    };
                    self.vars.remove_at(role, pos);
                    if let Some(measure) = self.last_stable.as_mut() {
                        match role {
                            Role::Input => measure.remove_input(pos),
                            Role::Output => measure.remove_output(pos),
                        }
                    }
                    removed = true;
                }
            } else {
                self.pending_variables.clear();
            }
        }
        for (var, term) in std::mem::take(&mut self.pending_terms) {
            let Some((role, var_pos)) = self.vars.position(var) else {
                continue;
            };
            let Some(term_pos) = self.vars.at(role, var_pos).term_position(term) else {
                continue;
            };
            let is_input = role == Role::Input;
            self.controller.remove_term(var_pos, term_pos, is_input);
            self.vars.at_mut(role, var_pos).remove_term_at(term_pos);
            self.terms.remove_term(var_pos, term_pos, is_input);
            removed = true;
        }
        if removed {
            self.controller.post_rebalance(&self.vars);
        }
    }

    /// compare the fresh measure against the last stable one and drive
    /// the stabilization counter. returns (should_act, should_learn).
    fn stabilize(&mut self) -> (bool, bool) {
        if self.vars.term_count(Role::Input) == 0 || self.vars.term_count(Role::Output) == 0 {
            return (false, false);
        }
        let measure = self.vars.measure();
        let (significant, input_changed) = match self.last_stable.as_ref() {
            None => (true, true),
            Some(old) => {
                if old.inputs.differs(&measure.inputs, membership_equals, None) {
                    (true, true)
                } else if old.outputs.differs(&measure.outputs, membership_equals, None) {
                    (true, false)
                } else {
                    (false, false)
                }
            }
        };
        let mut fresh = Some(measure);
        if significant {
            self.last_stable = fresh.take();
            self.core.hits = 0;
            if input_changed {
                self.core.output_changed_called = false;
            }
        }
        if self.core.hits == self.core.stabilization_hits {
            log::debug!("input is stable, committing state");
            if let Some(measure) = fresh.take() {
                self.last_stable = Some(measure);
                self.core.hits = 0;
            }
            if self.core.output_changed_called || self.controller.is_rule_base_empty() {
                (false, true)
            } else {
                (true, false)
            }
        } else {
            self.core.hits += 1;
            (false, false)
        }
    }

    /// fire every rule against the current input values and defuzzify
    /// the aggregated output sets into predicted output values
    fn infer(&mut self) {
        let Self {
            vars,
            controller,
            conjunction,
            ..
        } = self;
        let mut aggregates: Vec<Aggregate> =
            vars.outputs().iter().map(|_| Aggregate::default()).collect();
        for rule in controller.rules() {
            let mut degree = 1.0f32;
            for (i, j) in &rule.antecedent {
                let mu = vars
                    .inputs()
                    .get(*i)
                    .and_then(|var| var.term(*j).map(|t| t.membership(var.value())))
                    .unwrap_or(0.0);
                degree = conjunction.apply(degree, mu);
            }
            let activation = degree * rule.weight;
            if activation > 0.0 {
                if let Some(aggregate) = aggregates.get_mut(rule.output) {
                    aggregate.push(Activated {
                        term: rule.term,
                        degree: activation,
                    });
                }
            }
        }
        for (i, aggregate) in aggregates.iter().enumerate() {
            if aggregate.is_empty() {
                continue;
            }
            let (min, max) = vars.at(Role::Output, i).range();
            let value = {
                let var = vars.at(Role::Output, i);
                var.defuzzifier()
                    .defuzzify(aggregate, var.terms(), var.accumulation(), min, max)
            };
            if value.is_nan() {
                continue;
            }
            vars.at_mut(Role::Output, i).set_value(value);
        }
    }

    /// current output membership rows, for significant-change detection
    fn output_membership(&self) -> Matrix<f32> {
        let mut outputs = Matrix::new();
        for (i, var) in self.vars.outputs().iter().enumerate() {
            for (j, term) in var.terms().iter().enumerate() {
                *outputs.insert(i, j) = term.membership(var.value());
            }
        }
        outputs
    }

    /// predict, compare against the stable output state, notify the
    /// host of significant changes, and restore the read values on
    /// outputs prediction did not move
    fn act(&mut self) {
        self.infer();
        if self.core.changed_cb.is_none() {
            return;
        }
        let membership = self.output_membership();
        let Some(last) = self.last_stable.as_ref() else {
            return;
        };
        let mut changed_rows = Vec::new();
        if last
            .outputs
            .differs(&membership, membership_equals, Some(&mut changed_rows))
        {
            let changed: Vec<VarId> = changed_rows
                .iter()
                .map(|i| self.vars.outputs()[*i].id())
                .collect();
            for i in 0..self.vars.outputs().len() {
                if !changed_rows.contains(&i) {
                    let previous = self.vars.at(Role::Output, i).previous();
                    self.vars.at_mut(Role::Output, i).set_value(previous);
                }
            }
            log::debug!("predicted change on {} outputs", changed.len());
            let Self { core, vars, .. } = self;
            if let Some(cb) = core.changed_cb.as_mut() {
                cb(vars, &changed);
                core.output_changed_called = true;
            }
        }
    }

    fn learn(&mut self) {
        let auto_balance = self.auto_balance;
        let Self {
            vars,
            controller,
            terms,
            last_stable,
            ..
        } = self;
        if let Some(measure) = last_stable.as_ref() {
            controller.hit(vars, measure);
            if auto_balance {
                terms.hit(vars, controller, measure);
            }
        }
    }
}

impl Engine for FuzzyEngine {
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
        if !self.vars.contains(id) {
            return Err(Error::NotFound("variable".into()));
        }
        self.pending_variables.push(id);
        Ok(())
    }

    fn variable_set_range(&mut self, id: VarId, min: f32, max: f32) -> Result<()> {
        let removals = self.vars.set_range(id, min, max)?;
        self.pending_terms
            .extend(removals.into_iter().map(|term| (id, term)));
        Ok(())
    }

    fn variable_set_enabled(&mut self, id: VarId, enabled: bool) -> Result<()> {
        let var = self
            .vars
            .get(id)
            .ok_or_else(|| Error::NotFound("variable".into()))?;
        if var.is_enabled() == enabled {
            return Ok(());
        }
        if let Some(var) = self.vars.get_mut(id) {
            var.set_enabled(enabled);
        }
        self.controller.variable_set_enabled(&self.vars, enabled);
        Ok(())
    }

    fn process(&mut self) -> Result<()> {
        self.controller
            .update_cache_size(&self.vars, self.core.obs_max_bytes);
        self.apply_removals();
        self.vars.populate();
        {
            let Self { core, vars, .. } = self;
            let cb = core
                .read_cb
                .as_mut()
                .ok_or_else(|| Error::IllegalState("no read state callback".into()))?;
            if !cb(vars) {
                return Err(Error::ReadDeclined);
            }
        }
        let (should_act, mut should_learn) = self.stabilize();
        if should_act {
            self.act();
            should_learn = true;
        }
        if should_learn && !self.core.learn_disabled {
            self.learn();
        }
        Ok(())
    }

    fn predict(&mut self) -> bool {
        if self.vars.term_count(Role::Input) == 0 || self.vars.term_count(Role::Output) == 0 {
            return false;
        }
        self.infer();
        true
    }

    fn save(&self, path: &Path) -> Result<()> {
        persist::snapshot::save(path, &self.vars, self.conjunction, &self.controller)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let (vars, conjunction, observations) = persist::snapshot::load(path)?;
        self.vars = vars;
        self.conjunction = conjunction;
        self.controller.clear();
        self.terms.clear();
        self.pending_variables.clear();
        self.pending_terms.clear();
        self.last_stable = None;
        self.core.hits = 0;
        self.core.output_changed_called = false;
        for obs in observations {
            self.controller.absorb(&self.vars, obs);
        }
        self.controller.rebuild(&self.vars);
        Ok(())
    }

    fn load_description(&mut self, path: &Path) -> Result<()> {
        let (vars, conjunction) = persist::fll::load(path)?;
        self.vars = vars;
        self.conjunction = conjunction;
        self.controller.clear();
        self.terms.clear();
        self.pending_variables.clear();
        self.pending_terms.clear();
        self.last_stable = None;
        self.core.hits = 0;
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

    fn print_debug(&self, full: bool) {
        if full {
            self.controller.debug();
            self.terms.debug();
            match self.last_stable.as_ref() {
                Some(measure) => log::debug!(
                    "last stable measure: {} input rows, {} output rows",
                    measure.inputs.rows(),
                    measure.outputs.rows()
                ),
                None => log::debug!("no stable measure yet"),
            }
        }
        let mut count = 0;
        for rule in self.controller.rules() {
            log::debug!("  {}", rule);
            count += 1;
        }
        log::debug!("total rules: {}", count);
    }
}
