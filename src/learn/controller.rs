use crate::DEFAULT_RULE_WEIGHT_THRESHOLD;
use crate::collections::cache::Cache;
use crate::fuzzy::measure::Measure;
use crate::fuzzy::rule::Rule;
use crate::fuzzy::variable::Variables;
use crate::learn::group::Arena;
use crate::learn::group::GroupId;
use crate::learn::group::ObservationGroup;
use crate::learn::observation::Observation;
use crate::learn::rules::RuleGroupList;

/// top level coordinator of the learning state: owns the observation
/// group arena, the MRU cache that bounds it, and one rule group list
/// per output variable. eviction scrubs every list before the arena
/// slot is reused, so rule groups never hold a dead id.
#[derive(Debug)]
pub struct Controller {
    arena: Arena,
    cache: Cache<GroupId>,
    lists: Vec<RuleGroupList>,
    next: u32,
    weight_threshold: f32,
    simplification_disabled: bool,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            cache: Cache::new(0),
            lists: Vec::new(),
            next: 0,
            weight_threshold: DEFAULT_RULE_WEIGHT_THRESHOLD,
            simplification_disabled: false,
        }
    }

    pub fn group_count(&self) -> usize {
        self.cache.len()
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.lists.iter().flat_map(|list| list.rules())
    }

    pub fn rule_count(&self) -> usize {
        self.rules().count()
    }

    pub fn is_rule_base_empty(&self) -> bool {
        self.rules().next().is_none()
    }

    pub fn lists(&self) -> &[RuleGroupList] {
        &self.lists
    }

    pub fn weight_threshold(&self) -> f32 {
        self.weight_threshold
    }

    pub fn set_weight_threshold(&mut self, threshold: f32) {
        self.weight_threshold = threshold;
    }

    pub fn set_simplification_disabled(&mut self, vars: &Variables, disabled: bool) {
        if self.simplification_disabled != disabled {
            self.simplification_disabled = disabled;
            self.rebuild(vars);
        }
    }

    /// commit one stable measure. an existing group absorbing the hit
    /// is rebalanced in every list and marked most recently used; an
    /// unclaimed measure opens a new group, entering every list and
    /// possibly evicting the oldest group.
    pub fn hit(&mut self, vars: &Variables, measure: &Measure) {
        self.sync_lists(vars);
        let ids: Vec<GroupId> = self.cache.iter().rev().copied().collect();
        for gid in ids {
            let Some(group) = self.arena.get_mut(&gid) else {
                continue;
            };
            if group.hit(vars, measure) {
                if !self.simplification_disabled {
                    let Self {
                        arena,
                        lists,
                        weight_threshold,
                        ..
                    } = self;
                    for (output, list) in lists.iter_mut().enumerate() {
                        list.rebalance(arena, vars, gid, output, *weight_threshold);
                    }
                }
                self.cache.hit(&gid);
                return;
            }
        }
        let mut group = ObservationGroup::new();
        if group.hit(vars, measure) {
            let gid = self.alloc();
            self.arena.insert(gid, group);
            {
                let Self {
                    arena,
                    lists,
                    weight_threshold,
                    simplification_disabled,
                    ..
                } = self;
                for (output, list) in lists.iter_mut().enumerate() {
                    list.insert(
                        arena,
                        vars,
                        gid,
                        output,
                        *weight_threshold,
                        *simplification_disabled,
                    );
                }
            }
            if let Some(evicted) = self.cache.put(gid) {
                self.drop_group(evicted);
            }
        }
    }

    /// rebuild every rule group list from the cached groups in age order
    pub fn rebuild(&mut self, vars: &Variables) {
        self.sync_lists(vars);
        let order: Vec<GroupId> = self.cache.iter().copied().collect();
        let Self {
            arena,
            lists,
            weight_threshold,
            simplification_disabled,
            ..
        } = self;
        for (output, list) in lists.iter_mut().enumerate() {
            list.rebuild(
                arena,
                vars,
                order.iter().copied(),
                output,
                *weight_threshold,
                *simplification_disabled,
            );
        }
    }

    /// merge now-indistinguishable groups, then rebuild the rule base.
    /// called after variables or terms went away.
    pub fn post_rebalance(&mut self, vars: &Variables) {
        self.merge_groups(vars);
        self.rebuild(vars);
    }

    /// an input flipped enabled or disabled: groups split apart or
    /// collapse together, and the whole rule base is rederived
    pub fn variable_set_enabled(&mut self, vars: &Variables, enabled: bool) {
        if enabled {
            let ids: Vec<GroupId> = self.cache.iter().copied().collect();
            let mut parts = Vec::new();
            for gid in ids {
                if let Some(group) = self.arena.remove(&gid) {
                    self.cache.remove(&gid);
                    for list in self.lists.iter_mut() {
                        list.remove(gid);
                    }
                    parts.extend(group.split(vars));
                }
            }
            for part in parts {
                let gid = self.alloc();
                self.arena.insert(gid, part);
                if let Some(evicted) = self.cache.put(gid) {
                    self.drop_group(evicted);
                }
            }
        } else {
            self.merge_groups(vars);
        }
        self.rebuild(vars);
    }

    pub fn remove_variables(&mut self, inputs: &[bool], outputs: &[bool]) {
        self.cascade(|group| group.remove_variables(inputs, outputs));
    }

    pub fn remove_term(&mut self, var: usize, term: usize, is_input: bool) {
        self.cascade(|group| group.remove_term(var, term, is_input));
    }

    pub fn merge_terms(&mut self, var: usize, t1: usize, t2: usize, is_input: bool) {
        self.cascade(|group| group.merge_terms(var, t1, t2, is_input));
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
        self.cascade(|group| group.split_terms(vars, var, term, t1, t2, is_input));
    }

    /// derive the cache capacity from the configured memory budget.
    /// zero keeps the cache unbounded.
    pub fn update_cache_size(&mut self, vars: &Variables, max_bytes: usize) {
        if max_bytes == 0 {
            return;
        }
        let estimate = Observation::estimate_size(vars).max(1);
        let capacity = (max_bytes / estimate).max(1);
        for evicted in self.cache.resize(capacity) {
            for list in self.lists.iter_mut() {
                list.remove(evicted);
            }
            self.arena.remove(&evicted);
        }
    }

    /// every stored observation, oldest group first
    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.cache
            .iter()
            .filter_map(|gid| self.arena.get(gid))
            .flat_map(|group| group.observations().iter())
    }

    pub fn observation_count(&self) -> usize {
        self.observations().count()
    }

    /// regroup a loaded observation without touching the rule lists;
    /// the loader rebuilds them once at the end
    pub fn absorb(&mut self, vars: &Variables, obs: Observation) {
        let ids: Vec<GroupId> = self.cache.iter().copied().collect();
        let mut obs = obs;
        for gid in ids {
            if let Some(group) = self.arena.get_mut(&gid) {
                match group.append(vars, obs) {
                    Ok(()) => return,
                    Err(back) => obs = back,
                }
            }
        }
        let mut group = ObservationGroup::new();
        let _ = group.append(vars, obs);
        let gid = self.alloc();
        self.arena.insert(gid, group);
        if let Some(evicted) = self.cache.put(gid) {
            self.drop_group(evicted);
        }
    }

    pub fn clear(&mut self) {
        for gid in self.cache.clear() {
            self.arena.remove(&gid);
        }
        self.arena.clear();
        self.lists.clear();
    }

    pub fn debug(&self) {
        log::debug!(
            "observation controller: {} groups, {} rule lists, {} rules",
            self.cache.len(),
            self.lists.len(),
            self.rule_count()
        );
        for (gid, group) in self.arena.iter() {
            log::debug!("  group {:?}: {} observations", gid, group.len());
        }
    }

    /// do all rule groups reference live arena slots. exposed for the
    /// eviction discipline tests.
    pub fn coherent(&self) -> bool {
        self.lists.iter().all(|list| {
            list.groups()
                .iter()
                .all(|g| g.members().iter().all(|m| self.arena.contains_key(m)))
        })
    }

    fn alloc(&mut self) -> GroupId {
        let gid = GroupId(self.next);
        self.next += 1;
        gid
    }

    /// one rule group list per output variable
    fn sync_lists(&mut self, vars: &Variables) {
        let outputs = vars.outputs().len();
        self.lists.truncate(outputs);
        self.lists.resize_with(outputs, RuleGroupList::new);
    }

    /// scrub an evicted group out of every rule list, then free it
    fn drop_group(&mut self, gid: GroupId) {
        for list in self.lists.iter_mut() {
            list.remove(gid);
        }
        self.arena.remove(&gid);
        log::debug!("evicted observation group {:?}", gid);
    }

    /// apply a mutation to every group, dropping the ones it empties
    fn cascade<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut ObservationGroup),
    {
        let ids: Vec<GroupId> = self.cache.iter().copied().collect();
        for gid in ids {
            if let Some(group) = self.arena.get_mut(&gid) {
                f(group);
                if group.is_empty() {
                    self.cache.remove(&gid);
                    self.drop_group(gid);
                }
            }
        }
    }

    fn merge_groups(&mut self, vars: &Variables) {
        let mut ids: Vec<GroupId> = self.cache.iter().copied().collect();
        let mut i = 0;
        while i < ids.len() {
            let mut j = i + 1;
            while j < ids.len() {
                let equal = match (self.arena.get(&ids[i]), self.arena.get(&ids[j])) {
                    (Some(a), Some(b)) => a.enabled_input_equals(vars, b),
                    _ => false,
                };
                if equal {
                    let absorbed = self.arena.remove(&ids[j]);
                    if let (Some(absorbed), Some(target)) =
                        (absorbed, self.arena.get_mut(&ids[i]))
                    {
                        target.merge(vars, absorbed);
                    }
                    self.cache.remove(&ids[j]);
                    for list in self.lists.iter_mut() {
                        list.remove(ids[j]);
                    }
                    ids.remove(j);
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzy::term::Origin;
    use crate::fuzzy::term::Shape;
    use crate::fuzzy::variable::Role;
    use crate::fuzzy::variable::VarId;

    /// crisp binary inputs a, b and output y
    fn fixture() -> (Variables, Vec<VarId>) {
        let mut vars = Variables::new();
        let mut ids = Vec::new();
        for (name, role) in [("a", Role::Input), ("b", Role::Input), ("y", Role::Output)] {
            let id = vars.new_variable(name, role).unwrap();
            vars.set_range(id, 0.0, 1.0).unwrap();
            for (term, lo) in [("lo", -0.5), ("hi", 0.5)] {
                let shape = Shape::Rectangle {
                    start: lo,
                    end: lo + 1.0,
                };
                vars.add_term(id, term, shape, Origin::User).unwrap();
            }
            ids.push(id);
        }
        (vars, ids)
    }

    fn feed(controller: &mut Controller, vars: &mut Variables, ids: &[VarId], row: [f32; 3], n: usize) {
        for (id, value) in ids.iter().zip(row) {
            vars.set_value(*id, value);
        }
        let measure = vars.measure();
        for _ in 0..n {
            controller.hit(vars, &measure);
        }
    }

    #[test]
    fn distinct_fingerprints_open_distinct_groups() {
        let (mut vars, ids) = fixture();
        let mut controller = Controller::new();
        feed(&mut controller, &mut vars, &ids, [0.0, 0.0, 0.0], 10);
        feed(&mut controller, &mut vars, &ids, [0.0, 1.0, 0.0], 10);
        feed(&mut controller, &mut vars, &ids, [0.0, 0.0, 0.0], 5);
        assert_eq!(controller.group_count(), 2);
        assert!(!controller.is_rule_base_empty());
        assert!(controller.coherent());
    }

    #[test]
    fn drifted_output_evidence_repartitions() {
        let (mut vars, ids) = fixture();
        let mut controller = Controller::new();
        feed(&mut controller, &mut vars, &ids, [0.0, 0.0, 0.0], 10);
        feed(&mut controller, &mut vars, &ids, [0.0, 1.0, 0.0], 10);
        let collapsed: Vec<String> =
            controller.rules().map(|r| r.text().to_string()).collect();
        assert_eq!(collapsed, vec!["if a is lo then y is lo".to_string()]);
        // the user overrides y for the b=hi situation until its
        // evidence flips, which must undo the collapse over b
        feed(&mut controller, &mut vars, &ids, [0.0, 1.0, 1.0], 60);
        let texts: Vec<String> = controller.rules().map(|r| r.text().to_string()).collect();
        assert!(
            texts.iter().any(|t| t.contains("b is hi then y is hi")),
            "override must surface: {texts:?}"
        );
        assert!(controller.coherent());
    }

    #[test]
    fn disable_merges_and_enable_splits() {
        let (mut vars, ids) = fixture();
        let mut controller = Controller::new();
        feed(&mut controller, &mut vars, &ids, [0.0, 0.0, 0.0], 10);
        feed(&mut controller, &mut vars, &ids, [0.0, 1.0, 0.0], 10);
        assert_eq!(controller.group_count(), 2);
        vars.get_mut(ids[1]).unwrap().set_enabled(false);
        controller.variable_set_enabled(&vars, false);
        assert_eq!(controller.group_count(), 1);
        vars.get_mut(ids[1]).unwrap().set_enabled(true);
        controller.variable_set_enabled(&vars, true);
        assert_eq!(controller.group_count(), 2);
        assert!(controller.coherent());
    }

    #[test]
    fn memory_cap_bounds_the_cache_and_evicts_oldest() {
        let (mut vars, ids) = fixture();
        let mut controller = Controller::new();
        let estimate = Observation::estimate_size(&vars);
        controller.update_cache_size(&vars, estimate * 2);
        for row in [
            [0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 1.0],
        ] {
            feed(&mut controller, &mut vars, &ids, row, 5);
        }
        assert_eq!(controller.group_count(), 2);
        assert!(controller.coherent(), "no rule group may hold a dead id");
        // the two most recently fed fingerprints survived
        feed(&mut controller, &mut vars, &ids, [1.0, 1.0, 1.0], 1);
        assert_eq!(controller.group_count(), 2);
    }

    /// property: disabling simplification and re-enabling it rederives
    /// exactly the rule set continuous simplification would have built
    #[test]
    fn toggling_simplification_rederives_the_same_rules() {
        let (mut vars, ids) = fixture();
        let mut controller = Controller::new();
        feed(&mut controller, &mut vars, &ids, [0.0, 0.0, 0.0], 10);
        feed(&mut controller, &mut vars, &ids, [0.0, 1.0, 0.0], 10);
        let on: Vec<String> = controller.rules().map(|r| r.text().to_string()).collect();
        controller.set_simplification_disabled(&vars, true);
        let off = controller.rule_count();
        assert!(off >= on.len(), "singleton partition emits specific rules");
        controller.set_simplification_disabled(&vars, false);
        let back: Vec<String> = controller.rules().map(|r| r.text().to_string()).collect();
        assert_eq!(back, on);
    }

    /// property: after an arbitrary run of hits, every stored
    /// observation's rows line up with the live variable and term
    /// counts, and every rule group points at a live arena slot
    #[test]
    fn dimensions_stay_coherent_under_random_churn() {
        use rand::Rng;
        use rand::SeedableRng;
        use rand::rngs::SmallRng;
        let (mut vars, ids) = fixture();
        let mut controller = Controller::new();
        let estimate = Observation::estimate_size(&vars);
        controller.update_cache_size(&vars, estimate * 3);
        let mut rng = SmallRng::seed_from_u64(0xfeed);
        for _ in 0..500 {
            let row = [rng.random(), rng.random(), rng.random()];
            feed(&mut controller, &mut vars, &ids, row, 1);
        }
        for obs in controller.observations() {
            assert_eq!(obs.input_rows(), vars.inputs().len());
            assert_eq!(obs.output_rows(), vars.outputs().len());
            for (i, var) in vars.inputs().iter().enumerate() {
                assert_eq!(obs.input_row_len(i), var.terms().len());
            }
            for (i, var) in vars.outputs().iter().enumerate() {
                assert_eq!(obs.output_row_len(i), var.terms().len());
            }
        }
        assert!(controller.coherent());
    }

    #[test]
    fn removing_a_variable_cascades() {
        let (mut vars, ids) = fixture();
        let mut controller = Controller::new();
        feed(&mut controller, &mut vars, &ids, [0.0, 0.0, 0.0], 10);
        feed(&mut controller, &mut vars, &ids, [1.0, 1.0, 1.0], 10);
        controller.remove_variables(&[false, true], &[false]);
        vars.remove_at(Role::Input, 1);
        controller.post_rebalance(&vars);
        assert!(controller.coherent());
        for rule in controller.rules() {
            assert!(!rule.text().contains(" b is "), "{}", rule.text());
        }
    }
}
