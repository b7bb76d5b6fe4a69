//! Configuration constants for the importer
//!
//! This module centralizes all tunable parameters and constants used throughout
//! the application.

use std::time::Duration;

// ============================================================================
// Connection Configuration
// ============================================================================

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

/// Timeout for individual database statements
///
/// A full 1000-row batch against an indexed table finishes well within this;
/// the limit only exists so a stalled server cannot hang the import forever.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(180); // 3 minutes

// ============================================================================
// Destination Configuration
// ============================================================================

/// Schema holding the `rates` and `bonus_rates` tables
pub const DEFAULT_SCHEMA: &str = "gacha";

/// Maximum number of rows per INSERT statement
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Upper bound on bind parameters in a single Postgres statement
pub const MAX_BIND_PARAMETERS: usize = u16::MAX as usize;

// ============================================================================
// Source Configuration
// ============================================================================

/// Extension (without the dot) that marks a file as an import candidate
pub const SOURCE_EXTENSION: &str = "json";

/// Source rates are integers scaled by this factor
pub const RATE_SCALE: f64 = 1000.0;
