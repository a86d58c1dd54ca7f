pub mod calc;
pub mod core;
pub mod courses;
pub mod cutoffs;
pub mod quiz;
pub mod scores;
pub mod wam;
