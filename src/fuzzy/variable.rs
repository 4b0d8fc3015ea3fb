use crate::DEFAULT_TERM_COUNT;
use crate::OVERLAP_RATIO;
use crate::VARIABLE_NAME_MAX_LEN;
use crate::error::Error;
use crate::error::Result;
use crate::fuzzy::measure::Measure;
use crate::fuzzy::norm::SNorm;
use crate::fuzzy::output::Defuzzifier;
use crate::fuzzy::term::Origin;
use crate::fuzzy::term::Shape;
use crate::fuzzy::term::Term;
use crate::fuzzy::term::TermId;

/// stable handle for a variable. identity survives the positional
/// shifts caused by removals of earlier variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Input,
    Output,
}

/// named scalar with a closed range and an ordered list of fuzzy
/// terms. term order is insertion order and a term's position is its
/// identity within the learning structures.
#[derive(Debug, Clone)]
pub struct Variable {
    id: VarId,
    name: String,
    role: Role,
    min: f32,
    max: f32,
    enabled: bool,
    value: f32,
    previous: f32,
    terms: Vec<Term>,
    width: f32,
    is_id: bool,
    layout_seq: u16,
    defuzzifier: Defuzzifier,
    accumulation: SNorm,
}

impl Variable {
    fn new(id: VarId, name: String, role: Role) -> Self {
        Self {
            id,
            name,
            role,
            min: -f32::MAX,
            max: f32::MAX,
            enabled: true,
            value: f32::NAN,
            previous: f32::NAN,
            terms: Vec::new(),
            width: f32::NAN,
            is_id: false,
            layout_seq: 0,
            defuzzifier: Defuzzifier::default(),
            accumulation: SNorm::default(),
        }
    }

    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn range(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_id_like(&self) -> bool {
        self.is_id
    }

    /// current value clamped into the variable range. NaN stays NaN,
    /// marking a variable that was never read.
    pub fn value(&self) -> f32 {
        if self.value < self.min {
            self.min
        } else if self.value > self.max {
            self.max
        } else {
            self.value
        }
    }

    /// value as last written, unclamped
    pub fn raw_value(&self) -> f32 {
        self.value
    }

    /// value the variable held before the last write
    pub fn previous(&self) -> f32 {
        self.previous
    }

    pub fn set_value(&mut self, value: f32) {
        self.previous = self.value;
        self.value = value;
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn term(&self, pos: usize) -> Option<&Term> {
        self.terms.get(pos)
    }

    pub fn term_position(&self, id: TermId) -> Option<usize> {
        self.terms.iter().position(|t| t.id == id)
    }

    pub fn default_term_width(&self) -> f32 {
        self.width
    }

    pub fn defuzzifier(&self) -> Defuzzifier {
        self.defuzzifier
    }

    pub fn accumulation(&self) -> SNorm {
        self.accumulation
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        log::debug!(
            "variable {} {}",
            self.name,
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// used by the description importer, which must not trigger the
    /// rearrangement that a live range change performs
    pub(crate) fn set_range_raw(&mut self, min: f32, max: f32) {
        self.min = min;
        self.max = max;
    }

    pub(crate) fn set_default_term_width(&mut self, width: f32) {
        self.width = width;
    }

    pub(crate) fn set_is_id(&mut self, is_id: bool) {
        self.is_id = is_id;
    }

    pub(crate) fn set_defuzzifier(&mut self, defuzzifier: Defuzzifier) {
        self.defuzzifier = defuzzifier;
    }

    pub(crate) fn set_accumulation(&mut self, accumulation: SNorm) {
        self.accumulation = accumulation;
    }

    pub(crate) fn term_mut(&mut self, pos: usize) -> Option<&mut Term> {
        self.terms.get_mut(pos)
    }

    pub(crate) fn next_layout_seq(&mut self) -> u16 {
        let seq = self.layout_seq;
        self.layout_seq += 1;
        seq
    }

    pub(crate) fn remove_term_at(&mut self, pos: usize) -> Option<Term> {
        if pos < self.terms.len() {
            Some(self.terms.remove(pos))
        } else {
            None
        }
    }
}

/// the registry both engines share. callbacks receive it to read and
/// write variable values; topology mutation stays on the engines so a
/// callback cannot restructure the model mid tick.
#[derive(Debug, Default)]
pub struct Variables {
    inputs: Vec<Variable>,
    outputs: Vec<Variable>,
    next_var: u32,
    next_term: u32,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Variable] {
        &self.outputs
    }

    pub fn input(&self, name: &str) -> Option<VarId> {
        self.inputs.iter().find(|v| v.name == name).map(|v| v.id)
    }

    pub fn output(&self, name: &str) -> Option<VarId> {
        self.outputs.iter().find(|v| v.name == name).map(|v| v.id)
    }

    pub fn get(&self, id: VarId) -> Option<&Variable> {
        self.position(id)
            .map(|(role, pos)| &self.list(role)[pos])
    }

    pub fn contains(&self, id: VarId) -> bool {
        self.position(id).is_some()
    }

    pub fn value(&self, id: VarId) -> f32 {
        self.get(id).map(Variable::value).unwrap_or(f32::NAN)
    }

    pub fn set_value(&mut self, id: VarId, value: f32) -> bool {
        match self.get_mut(id) {
            Some(var) => {
                if !var.enabled {
                    log::warn!("setting a value on disabled variable {}", var.name);
                }
                var.set_value(value);
                true
            }
            None => false,
        }
    }

    pub fn position(&self, id: VarId) -> Option<(Role, usize)> {
        if let Some(pos) = self.inputs.iter().position(|v| v.id == id) {
            return Some((Role::Input, pos));
        }
        self.outputs
            .iter()
            .position(|v| v.id == id)
            .map(|pos| (Role::Output, pos))
    }

    pub fn list(&self, role: Role) -> &[Variable] {
        match role {
            Role::Input => &self.inputs,
            Role::Output => &self.outputs,
        }
    }

    pub fn len(&self, role: Role) -> usize {
        self.list(role).len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    pub fn term_count(&self, role: Role) -> usize {
        self.list(role).iter().map(|v| v.terms.len()).sum()
    }

    /// fuzzify every variable's clamped value into a fresh measure
    pub fn measure(&self) -> Measure {
        let mut measure = Measure::new();
        for (i, var) in self.inputs.iter().enumerate() {
            for (j, term) in var.terms.iter().enumerate() {
                *measure.inputs.insert(i, j) = term.membership(var.value());
            }
        }
        for (i, var) in self.outputs.iter().enumerate() {
            for (j, term) in var.terms.iter().enumerate() {
                *measure.outputs.insert(i, j) = term.membership(var.value());
            }
        }
        measure
    }

    pub(crate) fn get_mut(&mut self, id: VarId) -> Option<&mut Variable> {
        let (role, pos) = self.position(id)?;
        Some(&mut self.list_mut(role)[pos])
    }

    pub(crate) fn at(&self, role: Role, pos: usize) -> &Variable {
        &self.list(role)[pos]
    }

    pub(crate) fn at_mut(&mut self, role: Role, pos: usize) -> &mut Variable {
        &mut self.list_mut(role)[pos]
    }

    pub(crate) fn list_mut(&mut self, role: Role) -> &mut Vec<Variable> {
        match role {
            Role::Input => &mut self.inputs,
            Role::Output => &mut self.outputs,
        }
    }

    pub(crate) fn new_variable(&mut self, name: &str, role: Role) -> Result<VarId> {
        check_name(name)?;
        let taken = match role {
            Role::Input => self.input(name),
            Role::Output => self.output(name),
        };
        if taken.is_some() {
            return Err(Error::InvalidArgument(format!(
                "variable {name} already exists"
            )));
        }
        let id = VarId(self.next_var);
        self.next_var += 1;
        self.list_mut(role).push(Variable::new(id, name.into(), role));
        Ok(id)
    }

    pub(crate) fn remove_at(&mut self, role: Role, pos: usize) -> Variable {
        self.list_mut(role).remove(pos)
    }

    pub(crate) fn add_term(
        &mut self,
        id: VarId,
        name: &str,
        shape: Shape,
        origin: Origin,
    ) -> Result<TermId> {
        check_name(name)?;
        let tid = TermId(self.next_term);
        self.next_term += 1;
        let var = self
            .get_mut(id)
            .ok_or_else(|| Error::NotFound("variable".into()))?;
        var.terms.push(Term {
            id: tid,
            name: name.into(),
            origin,
            shape,
        });
        Ok(tid)
    }

    /// lay automatic terms over every variable that has none yet
    pub(crate) fn populate(&mut self) {
        for role in [Role::Input, Role::Output] {
            for pos in 0..self.len(role) {
                if self.at(role, pos).terms.is_empty() {
                    let (min, max) = self.at(role, pos).range();
                    self.lay_terms(role, pos, min, max, true, true);
                }
            }
        }
    }

    /// change a variable's range and rearrange its engine-created
    /// terms. returns the terms that fell out of range, which the
    /// caller must queue for deferred removal.
    pub(crate) fn set_range(&mut self, id: VarId, min: f32, max: f32) -> Result<Vec<TermId>> {
        let (role, pos) = self
            .position(id)
            .ok_or_else(|| Error::NotFound("variable".into()))?;
        let (mut min, mut max) = {
            let var = self.at(role, pos);
            (
                if min.is_nan() { var.min } else { min },
                if max.is_nan() { var.max } else { max },
            )
        };
        if max < min {
            log::warn!("max {max} is lower than min {min}, inverting");
            std::mem::swap(&mut min, &mut max);
        }
        {
            let var = self.at_mut(role, pos);
            var.min = min;
            var.max = max;
        }
        Ok(self.rearrange(role, pos, min, max))
    }

    /// the stretch-or-fill policy applied after a range change
    fn rearrange(&mut self, role: Role, pos: usize, min: f32, max: f32) -> Vec<TermId> {
        let width = self.at(role, pos).width;
        if width.is_nan() {
            return Vec::new();
        }
        let is_id = self.at(role, pos).is_id;
        let overlap = width * OVERLAP_RATIO;

        let mut removals = Vec::new();
        let mut first: Option<usize> = None;
        let mut last: Option<usize> = None;
        let (mut first_min, mut first_max) = (max, max);
        let (mut last_min, mut last_max) = (min, min);
        for (i, term) in self.at(role, pos).terms.iter().enumerate() {
            if term.origin == Origin::User {
                continue;
            }
            let Some((tmin, tmax)) = term.shape.range() else {
                continue;
            };
            if tmax < min || tmin > max {
                removals.push(term.id);
                continue;
            }
            if tmin <= first_min {
                first_min = tmin;
                first_max = tmax;
                first = Some(i);
            }
            if tmax >= last_max {
                last_max = tmax;
                last_min = tmin;
                last = Some(i);
            }
        }

        if let Some(i) = first {
            if min < first_min {
                if first_max - min <= width {
                    // small gap, stretch the boundary term down to min
                    if let Some(term) = self.at_mut(role, pos).term_mut(i) {
                        term.shape = anchor_low(&term.shape, min, first_max);
                    }
                } else {
                    // shrink the old boundary term to one width and
                    // fill the fresh head of the range with new terms
                    let hi = first_max - overlap;
                    let mut lo = hi - width;
                    if let Some(term) = self.at_mut(role, pos).term_mut(i) {
                        term.shape = Shape::Triangle {
                            a: lo - overlap,
                            b: lo + (hi - lo) / 2.0,
                            c: hi + overlap,
                        };
                    }
                    if is_id {
                        lo -= width / 2.0;
                    }
                    self.lay_terms(role, pos, min, lo, true, false);
                }
            }
        }

        if let Some(i) = last {
            if max > last_max {
                if max - last_min <= width {
                    if let Some(term) = self.at_mut(role, pos).term_mut(i) {
                        term.shape = anchor_high(&term.shape, last_min, max);
                    }
                } else {
                    let lo = last_min + overlap;
                    let hi = lo + width;
                    if let Some(term) = self.at_mut(role, pos).term_mut(i) {
                        term.shape = Shape::Triangle {
                            a: lo - overlap,
                            b: lo + (hi - lo) / 2.0,
                            c: hi + overlap,
                        };
                    }
                    self.lay_terms(role, pos, hi, max, false, true);
                }
            }
        }

        if first.is_none() && last.is_none() {
            self.lay_terms(role, pos, min, max, true, true);
        }
        removals
    }

    /// automatic term layout over [min, max]. boundary terms anchored
    /// at real range endpoints become ramps saturating at the endpoint;
    /// interior terms are triangles with a 10% overlap on both sides.
    pub(crate) fn lay_terms(
        &mut self,
        role: Role,
        pos: usize,
        min: f32,
        max: f32,
        real_min: bool,
        real_max: bool,
    ) {
        let id = self.at(role, pos).id;
        let name = self.at(role, pos).name.clone();
        let is_id = self.at(role, pos).is_id;
        let range = max - min;
        let width = {
            let var = self.at_mut(role, pos);
            if var.width.is_nan() {
                var.width = range / DEFAULT_TERM_COUNT as f32;
            }
            var.width
        };
        let seq = {
            let var = self.at_mut(role, pos);
            let seq = var.layout_seq;
            var.layout_seq += 1;
            seq
        };
        let origin = Origin::Engine { seq };

        let (count, first_width) = if width < f32::EPSILON {
            (1, width)
        } else if is_id {
            let count = ((range / width).floor() as usize).max(1) + 1;
            (count, (range - width * (count as f32 - 2.0)) / 2.0)
        } else {
            ((range / width).ceil() as usize, width)
        };
        let overlap = width * OVERLAP_RATIO;
        let mid = min + range / 2.0;

        if count <= 1 {
            let shape = match (real_min, real_max) {
                (true, true) => Shape::Triangle {
                    a: min,
                    b: mid,
                    c: max,
                },
                (true, false) => Shape::Triangle {
                    a: min,
                    b: min,
                    c: max + overlap,
                },
                (false, true) => Shape::Triangle {
                    a: min - overlap,
                    b: max,
                    c: max,
                },
                (false, false) => Shape::Triangle {
                    a: min - overlap,
                    b: mid,
                    c: max + overlap,
                },
            };
            let name = format!("{}_{}_{}", name, seq, 0);
            let _ = self.add_term(id, &name, shape, origin);
            return;
        }

        let mut last_stop = min;
        for i in 0..count {
            let shape = if real_min && i == 0 {
                last_stop = min + first_width;
                Shape::Ramp {
                    start: last_stop + overlap,
                    end: min,
                }
            } else if real_max && i == count - 1 {
                Shape::Ramp {
                    start: last_stop - overlap,
                    end: max,
                }
            } else {
                let cur = last_stop + width;
                let shape = Shape::Triangle {
                    a: last_stop - overlap,
                    b: last_stop + (cur - last_stop) / 2.0,
                    c: cur + overlap,
                };
                last_stop = cur;
                shape
            };
            let name = format!("{}_{}_{}", name, seq, i);
            let _ = self.add_term(id, &name, shape, origin);
        }
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > VARIABLE_NAME_MAX_LEN {
        return Err(Error::InvalidArgument(format!(
            "invalid name length {} for {:?}",
            name.len(),
            name
        )));
    }
    Ok(())
}

/// shoulder covering [min, hi] with full membership at min
fn anchor_low(shape: &Shape, min: f32, hi: f32) -> Shape {
    match shape {
        Shape::Ramp { .. } => Shape::Ramp {
            start: hi,
            end: min,
        },
        Shape::Rectangle { .. } => Shape::Rectangle {
            start: min,
            end: hi,
        },
        _ => Shape::Triangle {
            a: min,
            b: min,
            c: hi,
        },
    }
}

/// shoulder covering [lo, max] with full membership at max
fn anchor_high(shape: &Shape, lo: f32, max: f32) -> Shape {
    match shape {
        Shape::Ramp { .. } => Shape::Ramp {
            start: lo,
            end: max,
        },
        Shape::Rectangle { .. } => Shape::Rectangle {
            start: lo,
            end: max,
        },
        _ => Shape::Triangle {
            a: lo,
            b: max,
            c: max,
        },
    }
}
