//! Field mapping from a [`RateDocument`] to destination rows.

use std::collections::HashMap;

use super::document::RateDocument;
use crate::config::RATE_SCALE;
use crate::error::FileError;

/// Row destined for the `rates` table
#[derive(Debug, Clone, PartialEq)]
pub struct RateRow {
    pub gacha_id: i64,
    pub item_id: i64,
    pub probability: f64,
    pub probability_pity: Option<f64>,
    pub is_rate_up: bool,
    pub details_priority: Option<i32>,
}

/// Row destined for the `bonus_rates` table
#[derive(Debug, Clone, PartialEq)]
pub struct BonusRateRow {
    pub gacha_id: i64,
    pub pack_id: i64,
    pub probability: f64,
}

/// All rows produced by one source file, in source order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedFile {
    pub rates: Vec<RateRow>,
    pub bonus_rates: Vec<BonusRateRow>,
}

fn scale(raw: i64) -> f64 {
    raw as f64 / RATE_SCALE
}

/// Convert a parsed document into rows
pub fn transform(doc: &RateDocument) -> Result<TransformedFile, FileError> {
    // Duplicate item ids in `limitrate`: the last entry wins
    let pity_rates: HashMap<i64, i64> = doc
        .limitrate
        .iter()
        .map(|entry| (entry.itemid, entry.rate))
        .collect();

    let rates = doc
        .rate
        .iter()
        .map(|entry| {
            let details_priority = entry.details_priority().map_err(|value| {
                FileError::DetailPriority {
                    item_id: entry.itemid,
                    value,
                }
            })?;

            Ok(RateRow {
                gacha_id: doc.gacha_id,
                item_id: entry.itemid,
                probability: scale(entry.rate),
                probability_pity: pity_rates.get(&entry.itemid).copied().map(scale),
                is_rate_up: entry.is_pickup(),
                details_priority,
            })
        })
        .collect::<Result<Vec<_>, FileError>>()?;

    let bonus_rates = doc
        .bonusrate
        .iter()
        .map(|bonus| BonusRateRow {
            gacha_id: doc.gacha_id,
            pack_id: bonus.pack_id,
            probability: scale(bonus.rate),
        })
        .collect();

    Ok(TransformedFile { rates, bonus_rates })
}
