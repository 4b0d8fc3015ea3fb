use std::io::Read;
use std::io::Write;

use byteorder::LE;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::MEMBERSHIP_THRESHOLD;
use crate::OUTPUT_DISTRIBUTION_THRESHOLD;
use crate::collections::bits::BitArray;
use crate::fuzzy::measure::Measure;
use crate::fuzzy::variable::Role;
use crate::fuzzy::variable::Variables;

/// quantized snapshot of one stable measure: a term membership bitmap
/// per input variable, a u8 evidence counter per output term. rows
/// track the live variable and term counts at all times.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    inputs: Vec<BitArray>,
    outputs: Vec<Vec<u8>>,
}

impl Observation {
    /// quantize a measure. returns None when no enabled input term is
    /// active, since an observation with an empty antecedent can never
    /// produce a rule.
    pub fn new(vars: &Variables, measure: &Measure) -> Option<Self> {
        if vars.term_count(Role::Input) == 0 || vars.term_count(Role::Output) == 0 {
            return None;
        }
        let mut this = Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
        };
        this.conform(vars);
        let mut any = false;
        for (i, var) in vars.inputs().iter().enumerate() {
            if !var.is_enabled() {
                continue;
            }
            for j in 0..var.terms().len() {
                let mu = measure.inputs.get(i, j).copied().unwrap_or(0.0);
                if mu > MEMBERSHIP_THRESHOLD {
                    this.inputs[i].set(j, true);
                    any = true;
                }
            }
        }
        if any { Some(this) } else { None }
    }

    /// grow rows to match the current variable and term counts
    pub fn conform(&mut self, vars: &Variables) {
        self.inputs
            .resize_with(vars.inputs().len(), BitArray::new);
        for (i, var) in vars.inputs().iter().enumerate() {
            if self.inputs[i].len() < var.terms().len() {
                self.inputs[i].resize(var.terms().len(), false);
            }
        }
        self.outputs.resize_with(vars.outputs().len(), Vec::new);
        for (i, var) in vars.outputs().iter().enumerate() {
            if self.outputs[i].len() < var.terms().len() {
                self.outputs[i].resize(var.terms().len(), 0);
            }
        }
    }

    pub fn input_rows(&self) -> usize {
        self.inputs.len()
    }

    pub fn input_row_len(&self, i: usize) -> usize {
        self.inputs.get(i).map(BitArray::len).unwrap_or(0)
    }

    pub fn output_rows(&self) -> usize {
        self.outputs.len()
    }

    pub fn output_row_len(&self, i: usize) -> usize {
        self.outputs.get(i).map(Vec::len).unwrap_or(0)
    }

    pub fn input_term(&self, i: usize, j: usize) -> bool {
        self.inputs.get(i).map(|row| row.get(j)).unwrap_or(false)
    }

    pub fn output_weight(&self, i: usize, j: usize) -> u8 {
        self.outputs
            .get(i)
            .and_then(|row| row.get(j))
            .copied()
            .unwrap_or(0)
    }

    /// fold one stable measure into the output evidence counters.
    /// active terms gain a count, inactive terms with standing evidence
    /// lose one. a counter reaching saturation halves every counter of
    /// that output so no single term can lock the distribution in.
    /// returns whether any counter moved.
    pub fn hit(&mut self, vars: &Variables, measure: &Measure) -> bool {
        self.conform(vars);
        let mut changed = false;
        for (i, var) in vars.outputs().iter().enumerate() {
            let mut saturated = false;
            for j in 0..var.terms().len() {
                let mu = measure.outputs.get(i, j).copied().unwrap_or(0.0);
                let weight = self.outputs[i][j];
                if mu >= MEMBERSHIP_THRESHOLD {
                    let weight = weight.saturating_add(1);
                    if weight == u8::MAX {
                        saturated = true;
                    }
                    self.outputs[i][j] = weight;
                    changed = true;
                } else if weight > 0 {
                    self.outputs[i][j] = weight - 1;
                    changed = true;
                }
            }
            if saturated {
                for w in self.outputs[i].iter_mut() {
                    *w /= 2;
                }
            }
        }
        changed
    }

    /// does the measure activate exactly the bitmap, over enabled inputs
    pub fn matches_measure(&self, vars: &Variables, measure: &Measure) -> bool {
        for (i, var) in vars.inputs().iter().enumerate() {
            if !var.is_enabled() {
                continue;
            }
            for j in 0..var.terms().len() {
                let mu = measure.inputs.get(i, j).copied().unwrap_or(0.0);
                if self.input_term(i, j) != (mu > MEMBERSHIP_THRESHOLD) {
                    return false;
                }
            }
        }
        true
    }

    pub fn input_equals(&self, vars: &Variables, other: &Self) -> bool {
        for (i, var) in vars.inputs().iter().enumerate() {
            for j in 0..var.terms().len() {
                if self.input_term(i, j) != other.input_term(i, j) {
                    return false;
                }
            }
        }
        true
    }

    pub fn enabled_input_equals(&self, vars: &Variables, other: &Self) -> bool {
        for (i, var) in vars.inputs().iter().enumerate() {
            if !var.is_enabled() {
                continue;
            }
            for j in 0..var.terms().len() {
                if self.input_term(i, j) != other.input_term(i, j) {
                    return false;
                }
            }
        }
        true
    }

    /// normalized evidence distributions for one output are equal when
    /// no term differs by more than the distribution threshold
    pub fn output_equals(&self, vars: &Variables, other: &Self, output: usize) -> bool {
        let terms = vars.outputs()[output].terms().len();
        let total1: u32 = (0..terms).map(|j| self.output_weight(output, j) as u32).sum();
        let total2: u32 = (0..terms)
            .map(|j| other.output_weight(output, j) as u32)
            .sum();
        if total1 == 0 && total2 == 0 {
            return true;
        }
        if total1 == 0 || total2 == 0 {
            return false;
        }
        (0..terms).all(|j| {
            let w1 = self.output_weight(output, j) as f32 / total1 as f32;
            let w2 = other.output_weight(output, j) as f32 / total2 as f32;
            (w1 - w2).abs() <= OUTPUT_DISTRIBUTION_THRESHOLD
        })
    }

    /// a base observation carries no evidence on disabled inputs, so it
    /// is the one a group prefers to update
    pub fn is_base(&self, vars: &Variables) -> bool {
        for (i, var) in vars.inputs().iter().enumerate() {
            if var.is_enabled() {
                continue;
            }
            for j in 0..var.terms().len() {
                if self.input_term(i, j) {
                    return false;
                }
            }
        }
        true
    }

    /// an observation that lost all of its rows must be discarded
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() || self.outputs.is_empty()
    }

    /// absorb another observation's output evidence, used when two
    /// input-equal observations coalesce
    pub fn merge_output(&mut self, vars: &Variables, other: &Self) {
        self.conform(vars);
        for (i, row) in self.outputs.iter_mut().enumerate() {
            for (j, w) in row.iter_mut().enumerate() {
                *w = w.saturating_add(other.output_weight(i, j));
            }
        }
    }

    pub fn remove_variables(&mut self, inputs: &[bool], outputs: &[bool]) {
        let mut removed = 0;
        for (i, remove) in inputs.iter().enumerate() {
            if *remove && i - removed < self.inputs.len() {
                self.inputs.remove(i - removed);
                removed += 1;
            }
        }
        removed = 0;
        for (i, remove) in outputs.iter().enumerate() {
            if *remove && i - removed < self.outputs.len() {
                self.outputs.remove(i - removed);
                removed += 1;
            }
        }
    }

    pub fn remove_term(&mut self, var: usize, term: usize, is_input: bool) {
        if is_input {
            if let Some(row) = self.inputs.get_mut(var) {
                row.remove(term);
            }
        } else if let Some(row) = self.outputs.get_mut(var) {
            if term < row.len() {
                row.remove(term);
            }
        }
    }

    /// fold term t2 into t1 (or for bits, sum for counters), then drop t2
    pub fn merge_terms(&mut self, var: usize, t1: usize, t2: usize, is_input: bool) {
        if is_input {
            if let Some(row) = self.inputs.get_mut(var) {
                let merged = row.get(t1) || row.get(t2);
                row.set(t1, merged);
                row.remove(t2);
            }
        } else if let Some(row) = self.outputs.get_mut(var) {
            if t1 < row.len() && t2 < row.len() {
                row[t1] = row[t1].saturating_add(row[t2]);
                row.remove(t2);
            }
        }
    }

    /// copy the evidence of a split term into both halves, then drop
    /// the original. the new terms are expected to already exist on the
    /// variable.
    pub fn split_terms(
        &mut self,
        vars: &Variables,
        var: usize,
        term: usize,
        t1: usize,
        t2: usize,
        is_input: bool,
    ) {
        self.conform(vars);
        if is_input {
            if let Some(row) = self.inputs.get_mut(var) {
                let bit = row.get(term);
                row.set(t1, bit);
                row.set(t2, bit);
                row.remove(term);
            }
        } else if let Some(row) = self.outputs.get_mut(var) {
            if term < row.len() {
                let weight = row[term];
                if t1 < row.len() {
                    row[t1] = weight;
                }
                if t2 < row.len() {
                    row[t2] = weight;
                }
                row.remove(term);
            }
        }
    }

    /// add this observation's output evidence into a flat accumulator
    /// indexed over all output terms in variable order
    pub fn accumulate_output_weights(&self, vars: &Variables, acc: &mut [u32]) {
        let mut index = 0;
        for (i, var) in vars.outputs().iter().enumerate() {
            for j in 0..var.terms().len() {
                acc[index] += self.output_weight(i, j) as u32;
                index += 1;
            }
        }
    }

    /// rough per-observation footprint used to derive the cache
    /// capacity from the configured memory budget
    pub fn estimate_size(vars: &Variables) -> usize {
        std::mem::size_of::<Self>()
            + (vars.inputs().len() + vars.outputs().len()) * std::mem::size_of::<Vec<u8>>()
            + vars.term_count(Role::Output)
            + vars.term_count(Role::Input) / 8
            + 1
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u16::<LE>(self.outputs.len() as u16)?;
        for row in &self.outputs {
            w.write_u16::<LE>(row.len() as u16)?;
            w.write_all(row)?;
        }
        w.write_u16::<LE>(self.inputs.len() as u16)?;
        for row in &self.inputs {
            w.write_u16::<LE>(row.len() as u16)?;
            w.write_all(row.bytes())?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let mut outputs = Vec::new();
        for _ in 0..r.read_u16::<LE>()? {
            let terms = r.read_u16::<LE>()? as usize;
            let mut row = vec![0u8; terms];
            r.read_exact(&mut row)?;
            outputs.push(row);
        }
        let mut inputs = Vec::new();
        for _ in 0..r.read_u16::<LE>()? {
            let bits = r.read_u16::<LE>()? as usize;
            let mut packed = vec![0u8; bits.div_ceil(8)];
            r.read_exact(&mut packed)?;
            inputs.push(BitArray::from_bytes(bits, packed));
        }
        Ok(Self { inputs, outputs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzy::term::Origin;
    use crate::fuzzy::term::Shape;
    use crate::fuzzy::variable::VarId;

    fn binary(vars: &mut Variables, name: &str, role: Role) -> VarId {
        let id = vars.new_variable(name, role).unwrap();
        vars.get_mut(id).unwrap().set_default_term_width(0.5);
        vars.set_range(id, 0.0, 1.0).unwrap();
        id
    }

    fn fixture() -> (Variables, VarId, VarId) {
        let mut vars = Variables::new();
        let a = binary(&mut vars, "a", Role::Input);
        let y = binary(&mut vars, "y", Role::Output);
        (vars, a, y)
    }

    fn measure_at(vars: &mut Variables, pairs: &[(VarId, f32)]) -> Measure {
        for (id, value) in pairs {
            vars.set_value(*id, *value);
        }
        vars.measure()
    }

    #[test]
    fn silent_measure_yields_nothing() {
        let (mut vars, a, y) = fixture();
        // a value outside every term support leaves the bitmap empty
        vars.set_value(a, f32::NAN);
        vars.set_value(y, 0.0);
        let measure = vars.measure();
        assert!(Observation::new(&vars, &measure).is_none());
    }

    #[test]
    fn quantizes_above_the_threshold() {
        let (mut vars, a, y) = fixture();
        let measure = measure_at(&mut vars, &[(a, 0.0), (y, 0.0)]);
        let obs = Observation::new(&vars, &measure).unwrap();
        assert!(obs.input_term(0, 0));
        assert!(!obs.input_term(0, 1));
    }

    #[test]
    fn hit_moves_evidence_both_ways() {
        let (mut vars, a, y) = fixture();
        let low = measure_at(&mut vars, &[(a, 0.0), (y, 0.0)]);
        let mut obs = Observation::new(&vars, &low).unwrap();
        assert!(obs.hit(&vars, &low));
        assert!(obs.hit(&vars, &low));
        assert_eq!(obs.output_weight(0, 0), 2);
        assert_eq!(obs.output_weight(0, 1), 0);
        let high = measure_at(&mut vars, &[(a, 0.0), (y, 1.0)]);
        assert!(obs.hit(&vars, &high));
        // the inactive low term gives back one count
        assert_eq!(obs.output_weight(0, 0), 1);
        assert_eq!(obs.output_weight(0, 1), 1);
    }

    #[test]
    fn saturation_halves_the_whole_output() {
        let (mut vars, a, y) = fixture();
        let low = measure_at(&mut vars, &[(a, 0.0), (y, 0.0)]);
        let mut obs = Observation::new(&vars, &low).unwrap();
        for _ in 0..255 {
            obs.hit(&vars, &low);
        }
        // the 255th hit saturates the counter and halves the output row
        assert_eq!(obs.output_weight(0, 0), 127);
        assert_eq!(obs.output_weight(0, 1), 0);
    }

    #[test]
    fn output_distribution_equality() {
        let (mut vars, a, y) = fixture();
        let low = measure_at(&mut vars, &[(a, 0.0), (y, 0.0)]);
        let high = measure_at(&mut vars, &[(a, 0.0), (y, 1.0)]);
        let mut one = Observation::new(&vars, &low).unwrap();
        let mut two = Observation::new(&vars, &low).unwrap();
        for _ in 0..10 {
            one.hit(&vars, &low);
            two.hit(&vars, &low);
        }
        assert!(one.output_equals(&vars, &two, 0));
        let mut other = Observation::new(&vars, &high).unwrap();
        for _ in 0..10 {
            other.hit(&vars, &high);
        }
        assert!(!one.output_equals(&vars, &other, 0));
    }

    #[test]
    fn split_then_merge_restores_the_bitmap() {
        let (mut vars, a, y) = fixture();
        let low = measure_at(&mut vars, &[(a, 0.0), (y, 0.0)]);
        let mut obs = Observation::new(&vars, &low).unwrap();
        obs.hit(&vars, &low);
        let before: Vec<bool> = (0..2).map(|j| obs.input_term(0, j)).collect();
        // split input term 0 into two appended halves, then merge them
        vars.add_term(
            a,
            "h1",
            Shape::Triangle {
                a: 0.0,
                b: 0.25,
                c: 0.5,
            },
            Origin::Engine { seq: 9 },
        )
        .unwrap();
        vars.add_term(
            a,
            "h2",
            Shape::Triangle {
                a: 0.5,
                b: 0.75,
                c: 1.0,
            },
            Origin::Engine { seq: 9 },
        )
        .unwrap();
        obs.split_terms(&vars, 0, 0, 3, 2, true);
        obs.merge_terms(0, 1, 2, true);
        let after: Vec<bool> = (0..2).map(|j| obs.input_term(0, j)).collect();
        // positions rotated, the split halves collapse back to one bit
        assert_eq!(before.iter().filter(|b| **b).count(), 1);
        assert_eq!(after.iter().filter(|b| **b).count(), 1);
    }

    #[test]
    fn removing_rows_keeps_dimensions_coherent() {
        let (mut vars, a, y) = fixture();
        let _ = binary(&mut vars, "b", Role::Input);
        let low = measure_at(&mut vars, &[(a, 0.0), (y, 0.0)]);
        let mut obs = Observation::new(&vars, &low).unwrap();
        obs.hit(&vars, &low);
        obs.remove_variables(&[false, true], &[false]);
        assert!(!obs.is_empty());
        obs.remove_variables(&[true], &[false]);
        assert!(obs.is_empty());
    }

    #[test]
    fn snapshot_roundtrip() {
        let (mut vars, a, y) = fixture();
        let low = measure_at(&mut vars, &[(a, 0.0), (y, 0.0)]);
        let mut obs = Observation::new(&vars, &low).unwrap();
        for _ in 0..7 {
            obs.hit(&vars, &low);
        }
        let mut buffer = Vec::new();
        obs.write_to(&mut buffer).unwrap();
        let copy = Observation::read_from(&mut buffer.as_slice()).unwrap();
        assert_eq!(obs, copy);
    }
}
