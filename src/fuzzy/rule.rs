use crate::FLOAT_THRESHOLD;
use crate::fuzzy::variable::Role;
use crate::fuzzy::variable::Variables;

/// one induced rule: a conjunction of input term propositions implying
/// a single output term at a weight. positions are resolved against the
/// registry at creation, and every topology change regenerates the rule
/// base, so positions never dangle.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub antecedent: Vec<(usize, usize)>,
    pub output: usize,
    pub term: usize,
    pub weight: f32,
    text: String,
}

impl Rule {
    pub fn new(
        vars: &Variables,
        antecedent: Vec<(usize, usize)>,
        output: usize,
        term: usize,
        weight: f32,
    ) -> Self {
        let mut text = String::from("if ");
        for (n, (i, j)) in antecedent.iter().enumerate() {
            if n > 0 {
                text.push_str(" and ");
            }
            let var = vars.at(Role::Input, *i);
            let name = var.term(*j).map(|t| t.name()).unwrap_or("?");
            text.push_str(&format!("{} is {}", var.name(), name));
        }
        let var = vars.at(Role::Output, output);
        let name = var.term(term).map(|t| t.name()).unwrap_or("?");
        text.push_str(&format!(" then {} is {}", var.name(), name));
        if weight < 1.0 - FLOAT_THRESHOLD {
            text.push_str(&format!(" with {}", weight));
        }
        Self {
            antecedent,
            output,
            term,
            weight,
            text,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzy::term::Origin;
    use crate::fuzzy::term::Shape;

    #[test]
    fn renders_the_if_then_form() {
        let mut vars = Variables::new();
        let a = vars.new_variable("A", Role::Input).unwrap();
        let y = vars.new_variable("Y", Role::Output).unwrap();
        let zero = Shape::Rectangle {
            start: 0.0,
            end: 0.0,
        };
        vars.add_term(a, "lo", zero, Origin::User).unwrap();
        vars.add_term(a, "hi", zero, Origin::User).unwrap();
        vars.add_term(y, "off", zero, Origin::User).unwrap();
        let full = Rule::new(&vars, vec![(0, 1)], 0, 0, 1.0);
        assert_eq!(full.to_string(), "if A is hi then Y is off");
        let weak = Rule::new(&vars, vec![(0, 0)], 0, 0, 0.25);
        assert_eq!(weak.to_string(), "if A is lo then Y is off with 0.25");
    }
}
