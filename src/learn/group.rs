use std::collections::BTreeMap;

use crate::fuzzy::measure::Measure;
use crate::fuzzy::variable::Variables;
use crate::learn::observation::Observation;

/// arena key for an observation group. the controller's cache owns the
/// groups; rule groups refer to them only through these ids, so an
/// evicted group can be scrubbed from every list before its slot dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub(crate) u32);

pub type Arena = BTreeMap<GroupId, ObservationGroup>;

/// all observations sharing one enabled-input fingerprint. when every
/// input is enabled a group holds a single observation.
#[derive(Debug, Default, Clone)]
pub struct ObservationGroup {
    observations: Vec<Observation>,
}

impl ObservationGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first(&self) -> Option<&Observation> {
        self.observations.first()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// try to absorb a stable measure. a non-empty group declines when
    /// the measure's enabled-input fingerprint is not its own;
    /// otherwise the base observation takes the hit, or a fresh
    /// observation joins the group.
    pub fn hit(&mut self, vars: &Variables, measure: &Measure) -> bool {
        if !self.observations.is_empty() {
            if !self.observations[0].matches_measure(vars, measure) {
                return false;
            }
            if let Some(base) = self
                .observations
                .iter_mut()
                .find(|obs| obs.is_base(vars))
            {
                base.hit(vars, measure);
                return true;
            }
        }
        match Observation::new(vars, measure) {
            Some(mut obs) => {
                if obs.hit(vars, measure) {
                    self.observations.push(obs);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// splice in an already-built observation if it shares the group's
    /// fingerprint. used on snapshot load.
    pub fn append(&mut self, vars: &Variables, obs: Observation) -> Result<(), Observation> {
        if let Some(first) = self.observations.first() {
            if !first.enabled_input_equals(vars, &obs) {
                return Err(obs);
            }
        }
        self.observations.push(obs);
        Ok(())
    }

    /// splice in another group, then coalesce any now-input-equal pairs
    /// so the group stays minimal
    pub fn merge(&mut self, vars: &Variables, other: ObservationGroup) {
        self.observations.extend(other.observations);
        let mut i = 0;
        while i < self.observations.len() {
            let mut j = i + 1;
            while j < self.observations.len() {
                if self.observations[i].input_equals(vars, &self.observations[j]) {
                    let absorbed = self.observations.remove(j);
                    self.observations[i].merge_output(vars, &absorbed);
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }

    /// partition by enabled-input fingerprint, consuming this group.
    /// used when a previously-disabled input becomes enabled.
    pub fn split(self, vars: &Variables) -> Vec<ObservationGroup> {
        let mut parts: Vec<ObservationGroup> = Vec::new();
        for obs in self.observations {
            match parts.iter_mut().find(|part| {
                part.first()
                    .map(|first| first.enabled_input_equals(vars, &obs))
                    .unwrap_or(false)
            }) {
                Some(part) => part.observations.push(obs),
                None => parts.push(ObservationGroup {
                    observations: vec![obs],
                }),
            }
        }
        parts
    }

    pub fn enabled_input_equals(&self, vars: &Variables, other: &Self) -> bool {
        match (self.first(), other.first()) {
            (Some(a), Some(b)) => a.enabled_input_equals(vars, b),
            _ => false,
        }
    }

    pub fn accumulate_output_weights(&self, vars: &Variables, acc: &mut [u32]) {
        for obs in &self.observations {
            obs.accumulate_output_weights(vars, acc);
        }
    }

    pub fn remove_variables(&mut self, inputs: &[bool], outputs: &[bool]) {
        self.observations.retain_mut(|obs| {
            obs.remove_variables(inputs, outputs);
            !obs.is_empty()
        });
    }

    pub fn remove_term(&mut self, var: usize, term: usize, is_input: bool) {
        self.observations.retain_mut(|obs| {
            obs.remove_term(var, term, is_input);
            !obs.is_empty()
        });
    }

    pub fn merge_terms(&mut self, var: usize, t1: usize, t2: usize, is_input: bool) {
        self.observations.retain_mut(|obs| {
            obs.merge_terms(var, t1, t2, is_input);
            !obs.is_empty()
        });
    }

    pub fn split_terms(
        &mut self,
        vars: &Variables,
        var: usize,
        term: usize,
        t1: usize,
        t2: usize,
        is_input: bool,
    ) {
        self.observations.retain_mut(|obs| {
            obs.split_terms(vars, var, term, t1, t2, is_input);
            !obs.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzy::variable::Role;
    use crate::fuzzy::variable::VarId;

    fn fixture() -> (Variables, VarId, VarId, VarId) {
        let mut vars = Variables::new();
        let mut make = |vars: &mut Variables, name: &str, role| {
            let id = vars.new_variable(name, role).unwrap();
            vars.get_mut(id).unwrap().set_default_term_width(0.5);
            vars.set_range(id, 0.0, 1.0).unwrap();
            id
        };
        let a = make(&mut vars, "a", Role::Input);
        let b = make(&mut vars, "b", Role::Input);
        let y = make(&mut vars, "y", Role::Output);
        (vars, a, b, y)
    }

    fn measure(vars: &mut Variables, a: f32, b: f32, y: f32) -> Measure {
        let ids: Vec<VarId> = vars
            .inputs()
            .iter()
            .map(|v| v.id())
            .chain(vars.outputs().iter().map(|v| v.id()))
            .collect();
        for (id, value) in ids.into_iter().zip([a, b, y]) {
            vars.set_value(id, value);
        }
        vars.measure()
    }

    #[test]
    fn declines_a_foreign_fingerprint() {
        let (mut vars, ..) = fixture();
        let low = measure(&mut vars, 0.0, 0.0, 0.0);
        let high = measure(&mut vars, 1.0, 1.0, 1.0);
        let mut group = ObservationGroup::new();
        assert!(group.hit(&vars, &low));
        assert_eq!(group.len(), 1);
        assert!(!group.hit(&vars, &high));
        assert_eq!(group.len(), 1);
        assert!(group.hit(&vars, &low));
        assert_eq!(group.len(), 1, "base observation absorbs repeat hits");
    }

    #[test]
    fn merge_coalesces_input_equal_observations() {
        let (mut vars, _, b, _) = fixture();
        vars.get_mut(b).unwrap().set_enabled(false);
        let low = measure(&mut vars, 0.0, 0.0, 0.0);
        let mut one = ObservationGroup::new();
        let mut two = ObservationGroup::new();
        one.hit(&vars, &low);
        two.hit(&vars, &low);
        let weight = one.first().unwrap().output_weight(0, 0);
        one.merge(&vars, two);
        assert_eq!(one.len(), 1, "identical observations coalesce");
        assert!(one.first().unwrap().output_weight(0, 0) > weight);
    }

    #[test]
    fn split_partitions_by_fingerprint() {
        let (mut vars, _, b, _) = fixture();
        let mut one = ObservationGroup::new();
        let mut two = ObservationGroup::new();
        let low = measure(&mut vars, 0.0, 0.0, 0.0);
        one.hit(&vars, &low);
        let high = measure(&mut vars, 0.0, 1.0, 1.0);
        two.hit(&vars, &high);
        // disabling b collapses both fingerprints onto a alone
        vars.get_mut(b).unwrap().set_enabled(false);
        assert!(one.enabled_input_equals(&vars, &two));
        one.merge(&vars, two);
        assert_eq!(one.len(), 2, "observations still differ on the b row");
        // re-enabling b pulls them apart again
        vars.get_mut(b).unwrap().set_enabled(true);
        let parts = one.split(&vars);
        assert_eq!(parts.len(), 2);
    }
}
