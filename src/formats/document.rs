//! Serde model of a gacha rate source document.
//!
//! ```json
//! {
//!   "gacha_id": 7,
//!   "rate": [{"itemid": 1, "rate": 500, "pickup": 1, "detailview": 1, "detailpriority": 3}],
//!   "limitrate": [{"itemid": 1, "rate": 600}],
//!   "bonusrate": [{"pack_id": 2, "rate": 10}]
//! }
//! ```
//!
//! Rates are integers scaled by 1000. Unknown keys are ignored.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// One source file
#[derive(Debug, Clone, Deserialize)]
pub struct RateDocument {
    pub gacha_id: i64,
    #[serde(default)]
    pub rate: Vec<RateEntry>,
    #[serde(default)]
    pub limitrate: Vec<LimitRateEntry>,
    #[serde(default)]
    pub bonusrate: Vec<BonusRateEntry>,
}

/// Entry of the `rate` list
#[derive(Debug, Clone, Deserialize)]
pub struct RateEntry {
    pub itemid: i64,
    pub rate: i64,
    #[serde(default)]
    pub pickup: Option<Value>,
    /// `None` when the key is missing; an explicit `null` is kept as `Value::Null`
    #[serde(default, deserialize_with = "present")]
    pub detailview: Option<Value>,
    /// Only interpreted for visible entries, see [`RateEntry::details_priority`]
    #[serde(default, deserialize_with = "present")]
    pub detailpriority: Option<Value>,
}

/// Entry of the `limitrate` (pity) list
#[derive(Debug, Clone, Deserialize)]
pub struct LimitRateEntry {
    pub itemid: i64,
    pub rate: i64,
}

/// Entry of the `bonusrate` list
#[derive(Debug, Clone, Deserialize)]
pub struct BonusRateEntry {
    pub pack_id: i64,
    pub rate: i64,
}

/// Keep explicit `null` apart from a missing key (which falls back to `None`)
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl RateEntry {
    /// Featured item: `pickup` present and truthy
    pub fn is_pickup(&self) -> bool {
        self.pickup.as_ref().is_some_and(is_truthy)
    }

    /// Details are shown unless `detailview` is missing or zero; `null` is not zero
    pub fn is_detail_visible(&self) -> bool {
        self.detailview.as_ref().is_some_and(|v| !equals_zero(v))
    }

    /// `details_priority` column value
    ///
    /// Hidden entries are always NULL and their `detailpriority` is never
    /// looked at. Visible entries default to 0 when the key is missing and keep
    /// an explicit `null`.
    pub fn details_priority(&self) -> Result<Option<i32>, Value> {
        if !self.is_detail_visible() {
            return Ok(None);
        }

        match &self.detailpriority {
            None => Ok(Some(0)),
            Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| value.clone()),
        }
    }
}

/// Loose truthiness: null, false, zero and empty containers are false
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Numeric zero or `false`; strings and containers never compare equal to 0
fn equals_zero(value: &Value) -> bool {
    match value {
        Value::Bool(b) => !*b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        _ => false,
    }
}
