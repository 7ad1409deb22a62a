pub mod app;
pub mod cancel;
pub mod cli;
pub mod collect;
pub mod config;
pub mod detector;
pub mod diff;
pub mod inputs;
pub mod lock;
pub mod models;
pub mod output;
pub mod store;
pub mod summary;
pub mod totals;

#[cfg(test)]
pub mod test_utils;
