// Public API - the runner and its error types
pub mod error;
pub mod runner;

// Internal modules - organized by subsystem
mod config;
mod db;
mod formats;
mod io;
mod telemetry;

#[cfg(test)]
mod integ_tests;
