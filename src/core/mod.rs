pub mod classifier;
pub mod dedup;
pub mod indicators;
pub mod options;
pub mod schedule;
pub mod scoring;
