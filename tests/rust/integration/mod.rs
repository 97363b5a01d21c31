//! Integration tests against a temporary SQLite database
//!
//! Every test builds its own database file, so they run in parallel except
//! where they touch process environment variables.

mod config_tests;
mod loading_tests;
mod model;
mod persistence_tests;
mod query_tests;
