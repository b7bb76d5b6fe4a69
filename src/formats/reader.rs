use std::path::Path;
use tracing::debug;

use super::document::RateDocument;
use super::transform::{TransformedFile, transform};
use crate::error::FileError;
use crate::io::LocalFileReader;

/// Rows read from a single source file
#[derive(Debug)]
pub struct FileData {
    pub rows: TransformedFile,
    pub bytes_read: u64,
}

/// Read, parse and transform one source file
///
/// Any failure here is scoped to this file: the caller reports it and moves
/// on to the next one.
pub async fn read_rate_file(path: &Path) -> Result<FileData, FileError> {
    let reader = LocalFileReader::new(path);
    let bytes = reader.read_all().await?;
    let document: RateDocument = serde_json::from_slice(&bytes)?;
    let rows = transform(&document)?;

    debug!(
        path = %reader.path().display(),
        bytes = bytes.len(),
        gacha_id = document.gacha_id,
        rates = rows.rates.len(),
        bonus_rates = rows.bonus_rates.len(),
        "parsed rate file"
    );

    Ok(FileData {
        rows,
        bytes_read: bytes.len() as u64,
    })
}
