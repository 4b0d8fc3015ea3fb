use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;

use byteorder::LE;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::error::Error;
use crate::error::Result;
use crate::fuzzy::norm::TNorm;
use crate::fuzzy::variable::Variables;
use crate::learn::controller::Controller;
use crate::learn::observation::Observation;
use crate::persist::fll;

pub const VERSION: u8 = 0x01;

const DESCRIPTION_FILE: &str = "description.fll";
const OBSERVATIONS_FILE: &str = "observations.bin";

/// write the whole engine state into a directory: the topology as an
/// FLL dump next to the binary observation store
pub fn save(
    path: &Path,
    vars: &Variables,
    conjunction: TNorm,
    controller: &Controller,
) -> Result<()> {
    std::fs::create_dir_all(path)?;
    fll::save(&path.join(DESCRIPTION_FILE), vars, conjunction)?;
    let file = File::create(path.join(OBSERVATIONS_FILE))?;
    let mut w = BufWriter::new(file);
    w.write_u8(VERSION)?;
    w.write_u16::<LE>(controller.observation_count() as u16)?;
    for obs in controller.observations() {
        obs.write_to(&mut w)?;
    }
    w.flush()?;
    log::info!(
        "saved {} observations to {}",
        controller.observation_count(),
        path.display()
    );
    Ok(())
}

/// read back what save wrote. the caller regroups the observations and
/// rebuilds the rule base.
pub fn load(path: &Path) -> Result<(Variables, TNorm, Vec<Observation>)> {
    let (vars, conjunction) = fll::load(&path.join(DESCRIPTION_FILE))?;
    let file = File::open(path.join(OBSERVATIONS_FILE))?;
    let mut r = BufReader::new(file);
    let version = r.read_u8()?;
    if version != VERSION {
        return Err(Error::VersionMismatch(version));
    }
    let count = r.read_u16::<LE>()?;
    let mut observations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        observations.push(Observation::read_from(&mut r)?);
    }
    log::info!(
        "loaded {} observations from {}",
        observations.len(),
        path.display()
    );
    Ok((vars, conjunction, observations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::engine::FuzzyEngine;
    use crate::fuzzy::variable::Variables;

    fn trained() -> (FuzzyEngine, tempfile::TempDir) {
        let mut engine = FuzzyEngine::new();
        let p = engine.new_input("Presence").unwrap();
        let l = engine.new_output("Light").unwrap();
        engine.set_default_term_width(p, 0.5).unwrap();
        engine.set_default_term_width(l, 0.5).unwrap();
        engine.variable_set_range(p, 0.0, 1.0).unwrap();
        engine.variable_set_range(l, 0.0, 1.0).unwrap();
        engine.set_stabilization_hits(2);
        engine.set_read_state_callback(Box::new(|_| true));
        for cycle in 0..10 {
            let value = (cycle % 2) as f32;
            for _ in 0..10 {
                let vars: &mut Variables = engine.variables_mut();
                let p = vars.input("Presence").unwrap();
                let l = vars.output("Light").unwrap();
                vars.set_value(p, value);
                vars.set_value(l, value);
                engine.process().unwrap();
            }
        }
        (engine, tempfile::tempdir().unwrap())
    }

    /// save, load into a fresh engine, and compare the learned state
    #[test]
    fn save_load_fidelity() {
        let (engine, dir) = trained();
        let groups = engine.observation_group_count();
        let rules: Vec<String> = engine.rules().map(|r| r.text().to_string()).collect();
        assert!(groups > 0 && !rules.is_empty());
        engine.save(dir.path()).unwrap();

        let mut restored = FuzzyEngine::new();
        restored.load(dir.path()).unwrap();
        assert_eq!(restored.observation_group_count(), groups);
        let restored_rules: Vec<String> =
            restored.rules().map(|r| r.text().to_string()).collect();
        assert_eq!(restored_rules, rules);

        // identical inputs produce bit-identical predictions
        let mut original = engine;
        for value in [0.0f32, 1.0] {
            for engine in [&mut original, &mut restored] {
                let p = engine.variables().input("Presence").unwrap();
                engine.variables_mut().set_value(p, value);
            }
            assert!(original.predict());
            assert!(restored.predict());
            let l1 = original.variables().value(original.variables().output("Light").unwrap());
            let l2 = restored.variables().value(restored.variables().output("Light").unwrap());
            assert_eq!(l1.to_bits(), l2.to_bits());
        }
    }

    /// continuing to train after a reload behaves like never stopping
    #[test]
    fn reload_then_continue_training() {
        let (engine, dir) = trained();
        engine.save(dir.path()).unwrap();
        let mut restored = FuzzyEngine::new();
        restored.load(dir.path()).unwrap();
        restored.set_stabilization_hits(2);
        restored.set_read_state_callback(Box::new(|_| true));
        let before = restored.observation_group_count();
        for _ in 0..10 {
            let vars = restored.variables_mut();
            let p = vars.input("Presence").unwrap();
            let l = vars.output("Light").unwrap();
            vars.set_value(p, 0.0);
            vars.set_value(l, 0.0);
            restored.process().unwrap();
        }
        assert_eq!(
            restored.observation_group_count(),
            before,
            "known situations update existing groups"
        );
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let (engine, dir) = trained();
        engine.save(dir.path()).unwrap();
        let path = dir.path().join(OBSERVATIONS_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = 0x7f;
        std::fs::write(&path, bytes).unwrap();
        let mut restored = FuzzyEngine::new();
        assert!(matches!(
            restored.load(dir.path()),
            Err(Error::VersionMismatch(0x7f))
        ));
    }
}
