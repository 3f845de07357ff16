pub mod agent;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod market;
pub mod models;
pub mod notify;
pub mod store;
#[cfg(test)]
pub mod test_helpers;
pub mod trading;
