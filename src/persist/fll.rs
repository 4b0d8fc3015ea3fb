use std::io::BufRead;
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::fuzzy::norm::SNorm;
use crate::fuzzy::norm::TNorm;
use crate::fuzzy::output::Defuzzifier;
use crate::fuzzy::term::Origin;
use crate::fuzzy::term::Shape;
use crate::fuzzy::variable::Role;
use crate::fuzzy::variable::VarId;
use crate::fuzzy::variable::Variables;

/// textual dump of the variable topology in the key:value grammar of
/// the fuzzy logic literature. engine-internal attributes (term
/// origin, default width, id-ness) travel as comment lines so the file
/// stays readable by other FLL consumers.
pub fn export<W: Write>(w: &mut W, vars: &Variables, conjunction: TNorm) -> std::io::Result<()> {
    writeln!(w, "Engine: habitus")?;
    for var in vars.inputs() {
        writeln!(w, "InputVariable: {}", var.name())?;
        write_common(w, var)?;
    }
    for var in vars.outputs() {
        writeln!(w, "OutputVariable: {}", var.name())?;
        writeln!(w, "  default: nan")?;
        writeln!(w, "  defuzzifier: {}", var.defuzzifier())?;
        writeln!(w, "  accumulation: {}", var.accumulation())?;
        write_common(w, var)?;
    }
    writeln!(w, "RuleBlock:")?;
    writeln!(w, "  conjunction: {}", conjunction)?;
    Ok(())
}

fn write_common<W: Write>(w: &mut W, var: &crate::fuzzy::variable::Variable) -> std::io::Result<()> {
    let (min, max) = var.range();
    writeln!(w, "  enabled: {}", var.is_enabled())?;
    writeln!(w, "  range: {} {}", min, max)?;
    if !var.default_term_width().is_nan() {
        writeln!(w, "  # width: {}", var.default_term_width())?;
    }
    if var.is_id_like() {
        writeln!(w, "  # id: true")?;
    }
    for term in var.terms() {
        write!(w, "  term: {} ", term.name())?;
        match *term.shape() {
            Shape::Rectangle { start, end } => writeln!(w, "Rectangle {} {}", start, end)?,
            Shape::Triangle { a, b, c } => writeln!(w, "Triangle {} {} {}", a, b, c)?,
            Shape::Ramp { start, end } => writeln!(w, "Ramp {} {}", start, end)?,
            Shape::Cosine { center, width } => writeln!(w, "Cosine {} {}", center, width)?,
            Shape::Gaussian { mean, sd } => writeln!(w, "Gaussian {} {}", mean, sd)?,
        }
        if let Origin::Engine { seq } = term.origin() {
            writeln!(w, "  # origin: engine {}", seq)?;
        }
    }
    Ok(())
}

/// tolerant line parser for the dump above: unknown keys and malformed
/// values are skipped, not fatal
pub fn import<R: BufRead>(r: R) -> Result<(Variables, TNorm)> {
    let mut vars = Variables::new();
    let mut conjunction = TNorm::default();
    let mut current: Option<VarId> = None;
    for line in r.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("# origin: engine ") {
            let seq = rest.trim().parse().unwrap_or(0);
            if let Some(var) = current.and_then(|id| vars.get_mut(id)) {
                let last = var.terms().len().saturating_sub(1);
                if let Some(term) = var.term_mut(last) {
                    term.origin = Origin::Engine { seq };
                }
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("# width: ") {
            if let (Some(var), Ok(width)) =
                (current.and_then(|id| vars.get_mut(id)), rest.trim().parse())
            {
                var.set_default_term_width(width);
            }
            continue;
        }
        if line.strip_prefix("# id: true").is_some() {
            if let Some(var) = current.and_then(|id| vars.get_mut(id)) {
                var.set_is_id(true);
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix("InputVariable:") {
            current = Some(vars.new_variable(name.trim(), Role::Input)?);
            continue;
        }
        if let Some(name) = line.strip_prefix("OutputVariable:") {
            current = Some(vars.new_variable(name.trim(), Role::Output)?);
            continue;
        }
        if line.starts_with("RuleBlock") {
            current = None;
            continue;
        }
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let rest = rest.trim();
        match key.trim() {
            "enabled" => {
                if let Some(var) = current.and_then(|id| vars.get_mut(id)) {
                    var.set_enabled(rest == "true");
                }
            }
            "range" => {
                let mut parts = rest.split_whitespace();
                let min = parts.next().and_then(|s| s.parse().ok());
                let max = parts.next().and_then(|s| s.parse().ok());
                if let (Some(var), Some(min), Some(max)) =
                    (current.and_then(|id| vars.get_mut(id)), min, max)
                {
                    var.set_range_raw(min, max);
                }
            }
            "defuzzifier" => {
                if let (Some(var), Ok(d)) = (
                    current.and_then(|id| vars.get_mut(id)),
                    rest.parse::<Defuzzifier>(),
                ) {
                    var.set_defuzzifier(d);
                }
            }
            "accumulation" => {
                if let (Some(var), Ok(s)) = (
                    current.and_then(|id| vars.get_mut(id)),
                    rest.parse::<SNorm>(),
                ) {
                    var.set_accumulation(s);
                }
            }
            "conjunction" => {
                if let Ok(t) = rest.parse::<TNorm>() {
                    conjunction = t;
                }
            }
            "term" => {
                let (Some(id), Some(term)) = (current, parse_term(rest)) else {
                    continue;
                };
                let (name, shape) = term;
                let _ = vars.add_term(id, &name, shape, Origin::User);
            }
            _ => {}
        }
    }
    Ok((vars, conjunction))
}

fn parse_term(rest: &str) -> Option<(String, Shape)> {
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.to_string();
    let kind = parts.next()?;
    let params: Vec<f32> = parts.filter_map(|p| p.parse().ok()).collect();
    let shape = match (kind, params.as_slice()) {
        ("Rectangle", [start, end]) => Shape::Rectangle {
            start: *start,
            end: *end,
        },
        ("Triangle", [a, b, c]) => Shape::Triangle {
            a: *a,
            b: *b,
            c: *c,
        },
        ("Ramp", [start, end]) => Shape::Ramp {
            start: *start,
            end: *end,
        },
        ("Cosine", [center, width]) => Shape::Cosine {
            center: *center,
            width: *width,
        },
        ("Gaussian", [mean, sd]) => Shape::Gaussian {
            mean: *mean,
            sd: *sd,
        },
        _ => return None,
    };
    Some((name, shape))
}

pub fn save(path: &Path, vars: &Variables, conjunction: TNorm) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut w = std::io::BufWriter::new(file);
    export(&mut w, vars, conjunction)?;
    w.flush()?;
    Ok(())
}

pub fn load(path: &Path) -> Result<(Variables, TNorm)> {
    let file = std::fs::File::open(path)?;
    import(std::io::BufReader::new(file))
}
