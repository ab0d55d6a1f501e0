// tests/integration/main.rs

#[path = "../common/mod.rs"]
mod common;

mod run_experiment;
