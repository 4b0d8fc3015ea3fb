use std::str::FromStr;

/// fuzzy conjunction operators. Minimum is the default rule antecedent
/// combiner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TNorm {
    #[default]
    Minimum,
    AlgebraicProduct,
    BoundedDifference,
    DrasticProduct,
    EinsteinProduct,
    HamacherProduct,
    NilpotentMinimum,
}

impl TNorm {
    pub fn apply(&self, a: f32, b: f32) -> f32 {
        match self {
            Self::Minimum => a.min(b),
            Self::AlgebraicProduct => a * b,
            Self::BoundedDifference => (a + b - 1.0).max(0.0),
            Self::DrasticProduct => {
                if a.max(b) >= 1.0 {
                    a.min(b)
                } else {
                    0.0
                }
            }
            Self::EinsteinProduct => (a * b) / (2.0 - (a + b - a * b)),
            Self::HamacherProduct => {
                if a + b - a * b == 0.0 {
                    0.0
                } else {
                    (a * b) / (a + b - a * b)
                }
            }
            Self::NilpotentMinimum => {
                if a + b > 1.0 {
                    a.min(b)
                } else {
                    0.0
                }
            }
        }
    }
}

/// fuzzy disjunction operators. Maximum is the default output
/// accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SNorm {
    #[default]
    Maximum,
    AlgebraicSum,
    BoundedSum,
    DrasticSum,
    EinsteinSum,
    HamacherSum,
    NilpotentMaximum,
    NormalizedSum,
}

impl SNorm {
    pub fn apply(&self, a: f32, b: f32) -> f32 {
        match self {
            Self::Maximum => a.max(b),
            Self::AlgebraicSum => a + b - a * b,
            Self::BoundedSum => (a + b).min(1.0),
            Self::DrasticSum => {
                if a.min(b) <= 0.0 {
                    a.max(b)
                } else {
                    1.0
                }
            }
            Self::EinsteinSum => (a + b) / (1.0 + a * b),
            Self::HamacherSum => {
                if a * b >= 1.0 {
                    1.0
                } else {
                    (a + b - 2.0 * a * b) / (1.0 - a * b)
                }
            }
            Self::NilpotentMaximum => {
                if a + b < 1.0 {
                    a.max(b)
                } else {
                    1.0
                }
            }
            Self::NormalizedSum => (a + b) / 1.0f32.max(a + b),
        }
    }
}

impl std::fmt::Display for TNorm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::fmt::Display for SNorm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for TNorm {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Minimum" => Ok(Self::Minimum),
            "AlgebraicProduct" => Ok(Self::AlgebraicProduct),
            "BoundedDifference" => Ok(Self::BoundedDifference),
            "DrasticProduct" => Ok(Self::DrasticProduct),
            "EinsteinProduct" => Ok(Self::EinsteinProduct),
            "HamacherProduct" => Ok(Self::HamacherProduct),
            "NilpotentMinimum" => Ok(Self::NilpotentMinimum),
            _ => Err(()),
        }
    }
}

impl FromStr for SNorm {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Maximum" => Ok(Self::Maximum),
            "AlgebraicSum" => Ok(Self::AlgebraicSum),
            "BoundedSum" => Ok(Self::BoundedSum),
            "DrasticSum" => Ok(Self::DrasticSum),
            "EinsteinSum" => Ok(Self::EinsteinSum),
            "HamacherSum" => Ok(Self::HamacherSum),
            "NilpotentMaximum" => Ok(Self::NilpotentMaximum),
            "NormalizedSum" => Ok(Self::NormalizedSum),
            _ => Err(()),
        }
    }
}
