use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::keywords::{finalize_keywords, is_ranked, KeywordRecord};

pub const POSITION_PLACEHOLDER: &str = "-";
const DATE_KEY_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Default, Deserialize)]
pub struct PrimaryPayload {
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawKeywordEntry {
    #[serde(rename = "Ph", default)]
    keyword: Option<Value>,
    #[serde(rename = "Dt", default)]
    positions: Option<Value>,
    #[serde(rename = "Pdt", default)]
    previous_positions: Option<Value>,
    #[serde(rename = "Nq", default)]
    search_volume: Option<Value>,
    #[serde(rename = "Lu", default)]
    landing_urls: Option<Value>,
    #[serde(rename = "Tr", default)]
    traffic: Option<Value>,
}

impl PrimaryPayload {
    pub fn parse(body: &str) -> serde_json::Result<Self> {
        if body.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(body)
    }

    /// Entries of the `data` map. The provider sends `[]` or omits the field
    /// when the mask matched nothing.
    pub fn entries(&self) -> Vec<&Value> {
        match &self.data {
            Some(Value::Object(map)) => map.values().collect(),
            Some(Value::Array(items)) => items.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatedValue {
    Scalar(Value),
    Dated(BTreeMap<String, Value>),
    DatedNested(BTreeMap<String, BTreeMap<String, Value>>),
}

impl DatedValue {
    pub fn from_json(value: Option<&Value>) -> Option<Self> {
        match value? {
            Value::Null => None,
            Value::Object(map) if map.is_empty() => None,
            Value::Object(map) if map.values().all(Value::is_object) => {
                let nested = map
                    .iter()
                    .map(|(date, inner)| {
                        let inner = inner
                            .as_object()
                            .map(|fields| {
                                fields
                                    .iter()
                                    .map(|(k, v)| (k.clone(), v.clone()))
                                    .collect()
                            })
                            .unwrap_or_default();
                        (date.clone(), inner)
                    })
                    .collect();
                Some(DatedValue::DatedNested(nested))
            }
            Value::Object(map) => Some(DatedValue::Dated(
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )),
            other => Some(DatedValue::Scalar(other.clone())),
        }
    }

    pub fn representative(&self, preferred_key: Option<&str>) -> Option<&Value> {
        match self {
            DatedValue::Scalar(value) => Some(value).filter(|v| !v.is_null()),
            DatedValue::Dated(map) => {
                pick(map, preferred_key, |v| !v.is_null()).and_then(first_of_nested)
            }
            DatedValue::DatedNested(map) => pick(map, preferred_key, |inner| {
                inner.values().any(|v| !v.is_null())
            })
            .and_then(|inner| inner.values().find(|v| !v.is_null())),
        }
    }
}

fn pick<'a, T>(
    map: &'a BTreeMap<String, T>,
    preferred_key: Option<&str>,
    available: impl Fn(&T) -> bool,
) -> Option<&'a T> {
    preferred_key
        .and_then(|key| map.get(key))
        .filter(|value| available(value))
        .or_else(|| map.values().find(|value| available(value)))
}

fn first_of_nested(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(inner) => inner.values().find(|v| !v.is_null()),
        other => Some(other),
    }
}

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn normalize_payload(payload: &PrimaryPayload, today: NaiveDate) -> Vec<KeywordRecord> {
    let today_key = date_key(today);
    let mut records = Vec::new();
    for raw in payload.entries() {
        let entry = match RawKeywordEntry::deserialize(raw) {
            Ok(entry) => entry,
            Err(err) => {
                debug!(%err, "skipping malformed keyword entry");
                continue;
            }
        };
        if let Some(record) = normalize_entry(&entry, &today_key) {
            records.push(record);
        }
    }
    finalize_keywords(records)
}

pub fn normalize_entry(entry: &RawKeywordEntry, today_key: &str) -> Option<KeywordRecord> {
    let keyword = entry
        .keyword
        .as_ref()
        .and_then(scalar_text)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())?;

    let position = DatedValue::from_json(entry.positions.as_ref())
        .as_ref()
        .and_then(|positions| positions.representative(None))
        .and_then(parse_position)?;

    let previous_position = DatedValue::from_json(entry.previous_positions.as_ref())
        .as_ref()
        .and_then(|previous| previous.representative(None))
        .and_then(parse_position);

    let search_volume = entry
        .search_volume
        .as_ref()
        .map(parse_volume)
        .unwrap_or(0);

    let url = DatedValue::from_json(entry.landing_urls.as_ref())
        .as_ref()
        .and_then(|urls| urls.representative(Some(today_key)))
        .and_then(scalar_text)
        .unwrap_or_default();

    let traffic_percent = DatedValue::from_json(entry.traffic.as_ref())
        .as_ref()
        .and_then(|traffic| traffic.representative(Some(today_key)))
        .and_then(parse_float)
        .map(|share| share * 100.0)
        .unwrap_or(0.0);

    Some(KeywordRecord {
        keyword,
        position,
        previous_position,
        search_volume,
        url,
        traffic_percent,
    })
}

pub fn parse_position(value: &Value) -> Option<u32> {
    let position = match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().and_then(whole_number)),
        Value::String(text) => {
            let text = text.trim();
            if text == POSITION_PLACEHOLDER {
                return None;
            }
            text.parse::<u64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(whole_number))
        }
        _ => None,
    }?;
    u32::try_from(position).ok().filter(|p| is_ranked(*p))
}

fn whole_number(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then(|| value.round() as u64)
}

pub fn parse_volume(value: &Value) -> u64 {
    match value {
        Value::Number(number) => number.as_u64().unwrap_or(0),
        Value::String(text) => text.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

fn parse_float(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
