use std::str::FromStr;

use crate::DEFAULT_RESOLUTION;
use crate::fuzzy::norm::SNorm;
use crate::fuzzy::term::Term;

/// one output term fired by a rule, clipped at the rule's activation
/// degree (Minimum implication).
#[derive(Debug, Clone, Copy)]
pub struct Activated {
    pub term: usize,
    pub degree: f32,
}

/// the fuzzy output set accumulated over all fired rules for one
/// output variable during a single inference pass.
#[derive(Debug, Default, Clone)]
pub struct Aggregate {
    activated: Vec<Activated>,
}

impl Aggregate {
    pub fn push(&mut self, activated: Activated) {
        self.activated.push(activated);
    }

    pub fn is_empty(&self) -> bool {
        self.activated.is_empty()
    }

    pub fn activated(&self) -> &[Activated] {
        &self.activated
    }

    /// membership of the accumulated set at x, folding the clipped term
    /// memberships through the accumulation s-norm
    pub fn membership(&self, terms: &[Term], accumulation: SNorm, x: f32) -> f32 {
        self.activated
            .iter()
            .filter_map(|a| terms.get(a.term).map(|t| a.degree.min(t.membership(x))))
            .fold(0.0, |acc, mu| accumulation.apply(acc, mu))
    }
}

/// scalar reconstruction of an aggregated fuzzy output set. the sampled
/// variants integrate over the variable range at the configured
/// resolution; the weighted variants work directly on the activated
/// term representatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Defuzzifier {
    Centroid { resolution: usize },
    Bisector { resolution: usize },
    LargestOfMaximum { resolution: usize },
    MeanOfMaximum { resolution: usize },
    SmallestOfMaximum { resolution: usize },
    WeightedAverage,
    WeightedSum,
}

impl Default for Defuzzifier {
    fn default() -> Self {
        Self::Centroid {
            resolution: DEFAULT_RESOLUTION,
        }
    }
}

impl Defuzzifier {
    /// NaN when the set is empty or carries no area
    pub fn defuzzify(
        &self,
        aggregate: &Aggregate,
        terms: &[Term],
        accumulation: SNorm,
        min: f32,
        max: f32,
    ) -> f32 {
        if aggregate.is_empty() {
            return f32::NAN;
        }
        match *self {
            Self::Centroid { resolution } => {
                let (mut area, mut moment) = (0.0f64, 0.0f64);
                for (x, mu) in samples(aggregate, terms, accumulation, min, max, resolution) {
                    area += mu as f64;
                    moment += (x * mu) as f64;
                }
                if area == 0.0 {
                    f32::NAN
                } else {
                    (moment / area) as f32
                }
            }
            Self::Bisector { resolution } => {
                let points: Vec<_> =
                    samples(aggregate, terms, accumulation, min, max, resolution).collect();
                let total: f64 = points.iter().map(|(_, mu)| *mu as f64).sum();
                if total == 0.0 {
                    return f32::NAN;
                }
                let mut running = 0.0f64;
                for (x, mu) in &points {
                    running += *mu as f64;
                    if running >= total / 2.0 {
                        return *x;
                    }
                }
                points.last().map(|(x, _)| *x).unwrap_or(f32::NAN)
            }
            Self::LargestOfMaximum { resolution } => {
                maxima(aggregate, terms, accumulation, min, max, resolution)
                    .last()
                    .copied()
                    .unwrap_or(f32::NAN)
            }
            Self::SmallestOfMaximum { resolution } => {
                maxima(aggregate, terms, accumulation, min, max, resolution)
                    .first()
                    .copied()
                    .unwrap_or(f32::NAN)
            }
            Self::MeanOfMaximum { resolution } => {
                let xs = maxima(aggregate, terms, accumulation, min, max, resolution);
                if xs.is_empty() {
                    f32::NAN
                } else {
                    xs.iter().sum::<f32>() / xs.len() as f32
                }
            }
            Self::WeightedAverage => {
                let (mut num, mut den) = (0.0f32, 0.0f32);
                for a in aggregate.activated() {
                    if let Some(term) = terms.get(a.term) {
                        num += a.degree * term.shape().representative();
                        den += a.degree;
                    }
                }
                if den == 0.0 { f32::NAN } else { num / den }
            }
            Self::WeightedSum => aggregate
                .activated()
                .iter()
                .filter_map(|a| {
                    terms
                        .get(a.term)
                        .map(|t| a.degree * t.shape().representative())
                })
                .sum(),
        }
    }
}

/// midpoint sampling of the aggregate over [min, max]
fn samples<'a>(
    aggregate: &'a Aggregate,
    terms: &'a [Term],
    accumulation: SNorm,
    min: f32,
    max: f32,
    resolution: usize,
) -> impl Iterator<Item = (f32, f32)> + 'a {
    let resolution = resolution.max(1);
    let dx = (max - min) / resolution as f32;
    (0..resolution).map(move |i| {
        let x = min + (i as f32 + 0.5) * dx;
        (x, aggregate.membership(terms, accumulation, x))
    })
}

/// sample points achieving the maximum membership, left to right
fn maxima(
    aggregate: &Aggregate,
    terms: &[Term],
    accumulation: SNorm,
    min: f32,
    max: f32,
    resolution: usize,
) -> Vec<f32> {
    let points: Vec<_> = samples(aggregate, terms, accumulation, min, max, resolution).collect();
    let peak = points.iter().map(|(_, mu)| *mu).fold(0.0f32, f32::max);
    if peak == 0.0 {
        return Vec::new();
    }
    points
        .into_iter()
        .filter(|(_, mu)| (peak - mu).abs() <= f32::EPSILON)
        .map(|(x, _)| x)
        .collect()
}

impl std::fmt::Display for Defuzzifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Centroid { resolution } => write!(f, "Centroid {}", resolution),
            Self::Bisector { resolution } => write!(f, "Bisector {}", resolution),
            Self::LargestOfMaximum { resolution } => write!(f, "LargestOfMaximum {}", resolution),
            Self::MeanOfMaximum { resolution } => write!(f, "MeanOfMaximum {}", resolution),
            Self::SmallestOfMaximum { resolution } => write!(f, "SmallestOfMaximum {}", resolution),
            Self::WeightedAverage => write!(f, "WeightedAverage"),
            Self::WeightedSum => write!(f, "WeightedSum"),
        }
    }
}

impl FromStr for Defuzzifier {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let name = parts.next().ok_or(())?;
        let resolution = parts
            .next()
            .and_then(|r| r.parse().ok())
            .unwrap_or(DEFAULT_RESOLUTION);
        match name {
            "Centroid" => Ok(Self::Centroid { resolution }),
            "Bisector" => Ok(Self::Bisector { resolution }),
            "LargestOfMaximum" => Ok(Self::LargestOfMaximum { resolution }),
            "MeanOfMaximum" => Ok(Self::MeanOfMaximum { resolution }),
            "SmallestOfMaximum" => Ok(Self::SmallestOfMaximum { resolution }),
            "WeightedAverage" => Ok(Self::WeightedAverage),
            "WeightedSum" => Ok(Self::WeightedSum),
            _ => Err(()),
        }
    }
}
