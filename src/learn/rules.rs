use crate::collections::bits::BitArray;
use crate::fuzzy::rule::Rule;
use crate::fuzzy::variable::Role;
use crate::fuzzy::variable::Variables;
use crate::learn::group::Arena;
use crate::learn::group::GroupId;
use crate::learn::observation::Observation;

/// a set of observation groups generalized over a shared subset of
/// relevant inputs, emitting rules for exactly one output variable.
/// members are arena ids; the controller owns the groups themselves.
#[derive(Debug)]
pub struct RuleGroup {
    members: Vec<GroupId>,
    relevant: BitArray,
    rules: Vec<Rule>,
}

impl RuleGroup {
    fn new(gid: GroupId, input_count: usize) -> Self {
        let mut relevant = BitArray::new();
        relevant.resize(input_count, true);
        Self {
            members: vec![gid],
            relevant,
            rules: Vec::new(),
        }
    }

    pub fn members(&self) -> &[GroupId] {
        &self.members
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_relevant(&self, input: usize) -> bool {
        self.relevant.get(input)
    }

    pub fn contains(&self, gid: GroupId) -> bool {
        self.members.contains(&gid)
    }

    fn representative<'a>(&self, arena: &'a Arena) -> Option<&'a Observation> {
        arena.get(self.members.first()?)?.first()
    }

    /// number of enabled and relevant inputs on which the candidate's
    /// representative agrees term for term with this group's
    fn affinity(&self, arena: &Arena, vars: &Variables, candidate: Option<&Observation>) -> usize {
        let (Some(mine), Some(theirs)) = (self.representative(arena), candidate) else {
            return 0;
        };
        let mut level = 0;
        for (i, var) in vars.inputs().iter().enumerate() {
            if !var.is_enabled() || !self.relevant.get(i) {
                continue;
            }
            let agree =
                (0..var.terms().len()).all(|j| mine.input_term(i, j) == theirs.input_term(i, j));
            if agree {
                level += 1;
            }
        }
        level
    }

    /// would the candidate's output distribution contradict this
    /// group's. the candidate may already be a member, in which case it
    /// is compared against the next representative.
    fn conflicts(&self, arena: &Arena, vars: &Variables, gid: GroupId, output: usize) -> bool {
        let mut anchor = match self.members.first() {
            Some(first) => *first,
            None => return false,
        };
        if anchor == gid {
            match self.members.get(1) {
                Some(second) => anchor = *second,
                None => return false,
            }
        }
        let mine = arena.get(&anchor).and_then(|g| g.first());
        let theirs = arena.get(&gid).and_then(|g| g.first());
        match (mine, theirs) {
            (Some(mine), Some(theirs)) => !mine.output_equals(vars, theirs, output),
            _ => false,
        }
    }

    /// admit the candidate, narrowing the relevant inputs to those on
    /// which every member still agrees
    fn absorb(&mut self, arena: &Arena, vars: &Variables, gid: GroupId) {
        let candidate = arena.get(&gid).and_then(|g| g.first());
        if let (Some(mine), Some(theirs)) = (self.representative(arena), candidate) {
            let mut narrowed = Vec::new();
            for (i, var) in vars.inputs().iter().enumerate() {
                if !var.is_enabled() || !self.relevant.get(i) {
                    continue;
                }
                let agree = (0..var.terms().len())
                    .all(|j| mine.input_term(i, j) == theirs.input_term(i, j));
                if !agree {
                    narrowed.push(i);
                }
            }
            for i in narrowed {
                self.relevant.set(i, false);
            }
        }
        self.members.push(gid);
    }

    /// rebuild the emitted rules: evidence summed over every member,
    /// normalized per output, one rule per term above the weight
    /// threshold, antecedent drawn from the representative over the
    /// relevant inputs only
    pub(crate) fn regenerate(
        &mut self,
        arena: &Arena,
        vars: &Variables,
        output: usize,
        threshold: f32,
    ) {
        self.rules.clear();
        let mut acc = vec![0u32; vars.term_count(Role::Output)];
        for gid in &self.members {
            if let Some(group) = arena.get(gid) {
                group.accumulate_output_weights(vars, &mut acc);
            }
        }
        let offset: usize = vars.outputs()[..output]
            .iter()
            .map(|v| v.terms().len())
            .sum();
        let terms = vars.outputs()[output].terms().len();
        let total: u32 = acc[offset..offset + terms].iter().sum();
        let Some(rep) = self.representative(arena) else {
            return;
        };
        let mut antecedent = Vec::new();
        for (i, var) in vars.inputs().iter().enumerate() {
            if !var.is_enabled() || !self.relevant.get(i) {
                continue;
            }
            for j in 0..var.terms().len() {
                if rep.input_term(i, j) {
                    antecedent.push((i, j));
                }
            }
        }
        if antecedent.is_empty() || total == 0 {
            return;
        }
        for k in 0..terms {
            let weight = acc[offset + k] as f32 / total as f32;
            if weight > threshold {
                self.rules
                    .push(Rule::new(vars, antecedent.clone(), output, k, weight));
            }
        }
    }
}

/// the per-output partition of observation groups into rule groups
#[derive(Debug, Default)]
pub struct RuleGroupList {
    groups: Vec<RuleGroup>,
}

impl RuleGroupList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[RuleGroup] {
        &self.groups
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.groups.iter().flat_map(|g| g.rules.iter())
    }

    pub fn insert(
        &mut self,
        arena: &Arena,
        vars: &Variables,
        gid: GroupId,
        output: usize,
        threshold: f32,
        simplification_disabled: bool,
    ) {
        if simplification_disabled {
            self.singleton(arena, vars, gid, output, threshold);
        } else {
            self.insert_with(arena, vars, gid, output, threshold, false);
        }
    }

    /// one observation group, one rule group, no generalization
    fn singleton(
        &mut self,
        arena: &Arena,
        vars: &Variables,
        gid: GroupId,
        output: usize,
        threshold: f32,
    ) {
        let mut group = RuleGroup::new(gid, vars.inputs().len());
        group.regenerate(arena, vars, output, threshold);
        self.groups.push(group);
    }

    /// the insertion algorithm. hard mode dissolves conflicting groups
    /// into singletons; soft mode re-inserts their members through this
    /// same algorithm, escalating to hard on nested conflicts.
    fn insert_with(
        &mut self,
        arena: &Arena,
        vars: &Variables,
        gid: GroupId,
        output: usize,
        threshold: f32,
        hard: bool,
    ) {
        let candidate = arena.get(&gid).and_then(|g| g.first());
        let mut max_level = 0;
        let mut inserts: Vec<usize> = Vec::new();
        let mut conflicts: Vec<usize> = Vec::new();
        for (i, group) in self.groups.iter().enumerate() {
            let level = group.affinity(arena, vars, candidate);
            if level == 0 || level < max_level {
                continue;
            }
            if level > max_level {
                max_level = level;
                inserts.clear();
                conflicts.clear();
            }
            if group.conflicts(arena, vars, gid, output) {
                conflicts.push(i);
            } else {
                inserts.push(i);
            }
        }

        let conflicted: Vec<RuleGroup> = conflicts
            .iter()
            .rev()
            .map(|i| self.groups.remove(*i))
            .collect();

        if inserts.is_empty() || !conflicted.is_empty() {
            self.singleton(arena, vars, gid, output, threshold);
        } else {
            let group = &mut self.groups[inserts[0]];
            group.absorb(arena, vars, gid);
            group.regenerate(arena, vars, output, threshold);
        }

        for group in conflicted {
            for member in group.members {
                if hard {
                    self.singleton(arena, vars, member, output, threshold);
                } else {
                    self.insert_with(arena, vars, member, output, threshold, true);
                }
            }
        }
    }

    /// after a hit mutated a grouped observation group, restore the
    /// partition invariants: a singleton or now-conflicting member is
    /// pulled out and re-inserted, a still-consistent one just has its
    /// rules refreshed
    pub fn rebalance(
        &mut self,
        arena: &Arena,
        vars: &Variables,
        gid: GroupId,
        output: usize,
        threshold: f32,
    ) {
        let Some(gi) = self.groups.iter().position(|g| g.contains(gid)) else {
            return;
        };
        if self.groups[gi].members.len() == 1 {
            self.groups.remove(gi);
        } else if self.groups[gi].conflicts(arena, vars, gid, output) {
            self.groups[gi].members.retain(|m| *m != gid);
            self.groups[gi].regenerate(arena, vars, output, threshold);
        } else {
            self.groups[gi].regenerate(arena, vars, output, threshold);
            return;
        }
        self.insert_with(arena, vars, gid, output, threshold, false);
    }

    /// scrub an evicted or emptied observation group out of the
    /// partition, dissolving its rule group if nothing remains
    pub fn remove(&mut self, gid: GroupId) -> bool {
        for gi in 0..self.groups.len() {
            if let Some(mi) = self.groups[gi].members.iter().position(|m| *m == gid) {
                self.groups[gi].members.remove(mi);
                if self.groups[gi].members.is_empty() {
                    self.groups.remove(gi);
                }
                return true;
            }
        }
        false
    }

    pub fn rebuild<I>(
        &mut self,
        arena: &Arena,
        vars: &Variables,
        order: I,
        output: usize,
        threshold: f32,
        simplification_disabled: bool,
    ) where
        I: IntoIterator<Item = GroupId>,
    {
        self.groups.clear();
        for gid in order {
            self.insert(arena, vars, gid, output, threshold, simplification_disabled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_RULE_WEIGHT_THRESHOLD;
    use crate::fuzzy::term::Origin;
    use crate::fuzzy::term::Shape;
    use crate::fuzzy::variable::VarId;
    use crate::learn::group::ObservationGroup;

    struct Fixture {
        vars: Variables,
        arena: Arena,
        ids: Vec<VarId>,
        next: u32,
    }

    impl Fixture {
        /// two crisp binary inputs and one binary output
        fn new() -> Self {
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
            Self {
                vars,
                arena: Arena::new(),
                ids,
                next: 0,
            }
        }

        /// a trained observation group for one crisp (a, b) -> y row
        fn observe(&mut self, a: f32, b: f32, y: f32) -> GroupId {
            for (id, value) in self.ids.clone().into_iter().zip([a, b, y]) {
                self.vars.set_value(id, value);
            }
            let measure = self.vars.measure();
            let mut group = ObservationGroup::new();
            for _ in 0..10 {
                assert!(group.hit(&self.vars, &measure));
            }
            let gid = GroupId(self.next);
            self.next += 1;
            self.arena.insert(gid, group);
            gid
        }
    }

    #[test]
    fn consistent_groups_collapse_over_the_irrelevant_input() {
        let mut fx = Fixture::new();
        let mut list = RuleGroupList::new();
        let threshold = DEFAULT_RULE_WEIGHT_THRESHOLD;
        let g1 = fx.observe(0.0, 0.0, 0.0);
        let g2 = fx.observe(0.0, 1.0, 0.0);
        list.insert(&fx.arena, &fx.vars, g1, 0, threshold, false);
        list.insert(&fx.arena, &fx.vars, g2, 0, threshold, false);
        assert_eq!(list.groups().len(), 1);
        let group = &list.groups()[0];
        assert!(group.is_relevant(0));
        assert!(!group.is_relevant(1), "b no longer separates the members");
        let texts: Vec<_> = list.rules().map(Rule::text).collect();
        assert_eq!(texts, vec!["if a is lo then y is lo"]);
    }

    #[test]
    fn conflicting_evidence_undoes_the_simplification() {
        let mut fx = Fixture::new();
        let mut list = RuleGroupList::new();
        let threshold = DEFAULT_RULE_WEIGHT_THRESHOLD;
        for (a, b, y) in [(0.0, 0.0, 0.0), (0.0, 1.0, 0.0), (1.0, 0.0, 0.0)] {
            let gid = fx.observe(a, b, y);
            list.insert(&fx.arena, &fx.vars, gid, 0, threshold, false);
        }
        assert_eq!(list.groups().len(), 2);
        let g4 = fx.observe(1.0, 1.0, 1.0);
        list.insert(&fx.arena, &fx.vars, g4, 0, threshold, false);
        let texts: Vec<_> = list.rules().map(Rule::text).collect();
        assert!(
            texts.contains(&"if a is lo then y is lo"),
            "a=0 still collapses over b: {texts:?}"
        );
        assert!(
            texts.contains(&"if a is hi and b is hi then y is hi"),
            "the conflict re-partitioned a=1: {texts:?}"
        );
        assert!(
            texts.contains(&"if a is hi and b is lo then y is lo"),
            "{texts:?}"
        );
    }

    #[test]
    fn disabled_simplification_keeps_singletons() {
        let mut fx = Fixture::new();
        let mut list = RuleGroupList::new();
        let threshold = DEFAULT_RULE_WEIGHT_THRESHOLD;
        for (a, b, y) in [(0.0, 0.0, 0.0), (0.0, 1.0, 0.0)] {
            let gid = fx.observe(a, b, y);
            list.insert(&fx.arena, &fx.vars, gid, 0, threshold, true);
        }
        assert_eq!(list.groups().len(), 2);
        let texts: Vec<_> = list.rules().map(Rule::text).collect();
        assert!(texts.contains(&"if a is lo and b is lo then y is lo"));
        assert!(texts.contains(&"if a is lo and b is hi then y is lo"));
    }

    #[test]
    fn removal_dissolves_empty_rule_groups() {
        let mut fx = Fixture::new();
        let mut list = RuleGroupList::new();
        let threshold = DEFAULT_RULE_WEIGHT_THRESHOLD;
        let g1 = fx.observe(0.0, 0.0, 0.0);
        let g2 = fx.observe(0.0, 1.0, 0.0);
        list.insert(&fx.arena, &fx.vars, g1, 0, threshold, false);
        list.insert(&fx.arena, &fx.vars, g2, 0, threshold, false);
        assert!(list.remove(g1));
        assert_eq!(list.groups().len(), 1);
        assert!(list.remove(g2));
        assert!(list.groups().is_empty());
        assert!(!list.remove(g2));
    }

    #[test]
    fn rebalance_refreshes_a_consistent_group_in_place() {
        let mut fx = Fixture::new();
        let mut list = RuleGroupList::new();
        let threshold = DEFAULT_RULE_WEIGHT_THRESHOLD;
        let g1 = fx.observe(0.0, 0.0, 0.0);
        let g2 = fx.observe(0.0, 1.0, 0.0);
        list.insert(&fx.arena, &fx.vars, g1, 0, threshold, false);
        list.insert(&fx.arena, &fx.vars, g2, 0, threshold, false);
        list.rebalance(&fx.arena, &fx.vars, g1, 0, threshold);
        assert_eq!(list.groups().len(), 1);
        assert_eq!(list.groups()[0].members().len(), 2);
    }
}
