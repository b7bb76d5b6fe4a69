//! Source document format: parsing and row transformation

pub mod document;
pub mod reader;
pub mod transform;

pub use reader::read_rate_file;
pub use transform::{BonusRateRow, RateRow};
