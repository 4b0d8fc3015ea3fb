use crate::FLOAT_THRESHOLD;
use crate::MEMBERSHIP_THRESHOLD;
use crate::MERGE_CAP;
use crate::OVERLAP_RATIO;
use crate::REBALANCE_PERIOD;
use crate::SPLIT_CAP;
use crate::collections::matrix::Matrix;
use crate::fuzzy::measure::Measure;
use crate::fuzzy::term::Origin;
use crate::fuzzy::term::Shape;
use crate::fuzzy::variable::Role;
use crate::fuzzy::variable::Variables;
use crate::learn::controller::Controller;

/// per-term hit accounting. every stable tick bumps the counter of the
/// terms a reading lands in; every REBALANCE_PERIOD ticks a sweep
/// splits saturated terms, merges starved ones into their overlapping
/// siblings, and halves all counters so transient load decays.
#[derive(Debug, Default)]
pub struct TermsManager {
    input_hits: Matrix<u16>,
    output_hits: Matrix<u16>,
    total: u16,
}

impl TermsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.input_hits.clear();
        self.output_hits.clear();
        self.total = 0;
    }

    pub fn hit(&mut self, vars: &mut Variables, controller: &mut Controller, measure: &Measure) {
        self.total += 1;
        if self.total == REBALANCE_PERIOD {
            self.total = 0;
        }
        let rebuild = self.total == 0;
        let mut changed = false;
        changed |= self.sweep(vars, controller, measure, Role::Input, rebuild);
        changed |= self.sweep(vars, controller, measure, Role::Output, rebuild);
        if rebuild {
            halve(&mut self.input_hits);
            halve(&mut self.output_hits);
        }
        if changed {
            controller.post_rebalance(vars);
        }
    }

    pub fn remove_variables(&mut self, inputs: &[bool], outputs: &[bool]) {
        let mut removed = 0;
        for (i, remove) in inputs.iter().enumerate() {
            if *remove {
                self.input_hits.remove_row(i - removed);
                removed += 1;
            }
        }
        removed = 0;
        for (i, remove) in outputs.iter().enumerate() {
            if *remove {
                self.output_hits.remove_row(i - removed);
                removed += 1;
            }
        }
    }

    pub fn remove_term(&mut self, var: usize, term: usize, is_input: bool) {
        self.hits_mut(is_input).remove_col(var, term);
    }

    pub fn debug(&self) {
        log::debug!(
            "terms manager: {} input rows, {} output rows, total {}",
            self.input_hits.rows(),
            self.output_hits.rows(),
            self.total
        );
    }

    fn sweep(
        &mut self,
        vars: &mut Variables,
        controller: &mut Controller,
        measure: &Measure,
        role: Role,
        rebuild: bool,
    ) -> bool {
        let is_input = role == Role::Input;
        let mut changed = false;
        for i in 0..vars.len(role) {
            let mut j = 0;
            while j < vars.at(role, i).terms().len() {
                let mu = if is_input {
                    measure.inputs.get(i, j).copied().unwrap_or(0.0)
                } else {
                    measure.outputs.get(i, j).copied().unwrap_or(0.0)
                };
                let counter = self.hits_mut(is_input).insert(i, j);
                if mu >= MEMBERSHIP_THRESHOLD {
                    *counter = counter.saturating_add(1);
                }
                let count = *counter;
                if rebuild {
                    if count > SPLIT_CAP {
                        if self.split(vars, controller, role, i, j) {
                            changed = true;
                            continue;
                        }
                    } else if count < MERGE_CAP && self.merge(vars, controller, role, i, j) {
                        changed = true;
                        continue;
                    }
                }
                j += 1;
            }
        }
        changed
    }

    /// split a saturated term into two halves with a 10% overlap, each
    /// taking half of the hits, and cascade the split through every
    /// stored observation before retiring the original term
    fn split(
        &mut self,
        vars: &mut Variables,
        controller: &mut Controller,
        role: Role,
        var_pos: usize,
        term_pos: usize,
    ) -> bool {
        let is_input = role == Role::Input;
        let (id, parent, min, max, var_min, var_max) = {
            let var = vars.at(role, var_pos);
            let Some(term) = var.term(term_pos) else {
                return false;
            };
            let Some((min, max)) = term.shape().range() else {
                return false;
            };
            let (var_min, var_max) = var.range();
            (var.id(), term.name().to_string(), min, max, var_min, var_max)
        };
        let step = (max - min) / 2.0;
        let overlap = step * OVERLAP_RATIO;
        let half = self
            .hits(is_input)
            .get(var_pos, term_pos)
            .copied()
            .unwrap_or(0)
            / 2;
        let seq = vars.at_mut(role, var_pos).next_layout_seq();
        let origin = Origin::Engine { seq };
        let lo = boundary_shape(var_min, var_max, min, min + step + overlap);
        let hi = boundary_shape(var_min, var_max, max - step - overlap, max);
        if vars.add_term(id, &format!("{parent}_split_0"), lo, origin).is_err() {
            return false;
        }
        if vars.add_term(id, &format!("{parent}_split_1"), hi, origin).is_err() {
            return false;
        }
        let terms_len = vars.at(role, var_pos).terms().len();
        *self.hits_mut(is_input).insert(var_pos, terms_len - 1) = half;
        *self.hits_mut(is_input).insert(var_pos, terms_len - 2) = half;
        controller.split_terms(vars, var_pos, term_pos, terms_len - 1, terms_len - 2, is_input);
        vars.at_mut(role, var_pos).remove_term_at(term_pos);
        self.hits_mut(is_input).remove_col(var_pos, term_pos);
        log::debug!("split term {parent} of variable {var_pos}");
        true
    }

    /// fold a starved term into the overlapping sibling holding the
    /// fewest hits; the survivor's range widens to cover both
    fn merge(
        &mut self,
        vars: &mut Variables,
        controller: &mut Controller,
        role: Role,
        var_pos: usize,
        term_pos: usize,
    ) -> bool {
        let is_input = role == Role::Input;
        let found = {
            let var = vars.at(role, var_pos);
            let Some(term) = var.term(term_pos) else {
                return false;
            };
            let Some((min, max)) = term.shape().range() else {
                return false;
            };
            let mut found: Option<(usize, u16, f32, f32)> = None;
            for (i, sibling) in var.terms().iter().enumerate() {
                if i == term_pos {
                    continue;
                }
                let Some((smin, smax)) = sibling.shape().range() else {
                    continue;
                };
                let hits = self.hits(is_input).get(var_pos, i).copied().unwrap_or(0);
                if let Some((_, best, ..)) = found {
                    if hits >= best {
                        continue;
                    }
                }
                let overlapping = (smin >= min && smin <= max) || (min >= smin && min <= smax);
                if overlapping {
                    found = Some((i, hits, smin.min(min), smax.max(max)));
                }
            }
            found
        };
        let Some((survivor, _, lo, hi)) = found else {
            return false;
        };
        let starved = self
            .hits(is_input)
            .get(var_pos, term_pos)
            .copied()
            .unwrap_or(0);
        if let Some(term) = vars.at_mut(role, var_pos).term_mut(survivor) {
            term.shape.set_range(lo, hi);
        }
        controller.merge_terms(var_pos, survivor, term_pos, is_input);
        vars.at_mut(role, var_pos).remove_term_at(term_pos);
        let counter = self.hits_mut(is_input).insert(var_pos, survivor);
        *counter = counter.saturating_add(starved);
        self.hits_mut(is_input).remove_col(var_pos, term_pos);
        log::debug!("merged term {term_pos} of variable {var_pos} into {survivor}");
        true
    }

    fn hits(&self, is_input: bool) -> &Matrix<u16> {
        if is_input {
            &self.input_hits
        } else {
            &self.output_hits
        }
    }

    fn hits_mut(&mut self, is_input: bool) -> &mut Matrix<u16> {
        if is_input {
            &mut self.input_hits
        } else {
            &mut self.output_hits
        }
    }
}

/// halves anchored at a real range boundary stay saturated there
fn boundary_shape(var_min: f32, var_max: f32, lo: f32, hi: f32) -> Shape {
    if (var_min - lo).abs() < FLOAT_THRESHOLD {
        Shape::Ramp { start: hi, end: lo }
    } else if (var_max - hi).abs() < FLOAT_THRESHOLD {
        Shape::Ramp { start: lo, end: hi }
    } else {
        Shape::Triangle {
            a: lo,
            b: lo + (hi - lo) / 2.0,
            c: hi,
        }
    }
}

fn halve(hits: &mut Matrix<u16>) {
    for i in 0..hits.rows() {
        for j in 0..hits.cols(i) {
            *hits.insert(i, j) /= 2;
        }
    }
}
