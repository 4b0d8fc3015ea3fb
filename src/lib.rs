pub mod collections;
pub mod engine;
pub mod error;
pub mod fuzzy;
pub mod learn;
pub mod persist;

pub use engine::Engine;
pub use engine::FuzzyEngine;
pub use engine::NaiveEngine;
pub use error::Error;

/// dimensional analysis types
pub type Membership = f32;
pub type Weight = f32;

// membership quantization thresholds. these are load-bearing for the
// stabilization and grouping state machines.
pub const MEMBERSHIP_THRESHOLD: Membership = 0.05;
pub const OUTPUT_DISTRIBUTION_THRESHOLD: f32 = 0.1;
pub const DISCRETE_RANGE_THRESHOLD: f32 = 0.01;
pub const FLOAT_THRESHOLD: f32 = 0.01;

// automatic term layout parameters
pub const DEFAULT_TERM_COUNT: usize = 10;
pub const OVERLAP_RATIO: f32 = 0.1;

// term rebalance parameters
pub const REBALANCE_PERIOD: u16 = 500;
pub const SPLIT_CAP: u16 = 333;
pub const MERGE_CAP: u16 = 17;

// engine defaults
pub const DEFAULT_STABILIZATION_HITS: u16 = 5;
pub const DEFAULT_RULE_WEIGHT_THRESHOLD: f32 = 0.05;
pub const DEFAULT_RESOLUTION: usize = 200;
pub const VARIABLE_NAME_MAX_LEN: usize = 127;
