pub mod controller;
pub mod group;
pub mod observation;
pub mod rules;
pub mod terms;
