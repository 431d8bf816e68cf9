//! Records produced by ingestion and admission control.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A billed job, as uploaded to the backend or written as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRecord {
    pub job_id: String,
    pub username: String,
    pub allocation_id: String,
    pub qos: String,
    #[serde(with = "timestamp_millis")]
    pub start_ts: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp_millis_opt"
    )]
    pub end_ts: Option<DateTime<Utc>>,
    pub resource_hours: f64,
}

impl ChargeRecord {
    /// Identity used to collapse duplicate imports.
    pub fn dedup_key(&self) -> (String, DateTime<Utc>) {
        (self.job_id.clone(), self.start_ts)
    }
}

/// Serialize timestamps as `2024-01-01T00:00:00.000Z`.
mod timestamp_millis {
    use chrono::{DateTime, Utc};
    use coact_parsers::{format_timestamp_millis, parse_timestamp};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp_millis(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_timestamp(&s).ok_or_else(|| D::Error::custom(format!("invalid timestamp {s:?}")))
    }
}

mod timestamp_millis_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => super::timestamp_millis::serialize(dt, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| {
                coact_parsers::parse_timestamp(&s).ok_or_else(|| {
                    serde::de::Error::custom(format!("invalid timestamp {s:?}"))
                })
            })
            .transpose()
    }
}

/// Recent utilization of one facility on one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub facility: String,
    pub cluster: String,
    /// Percent used, one reading per lookback window, in window order
    pub percents: Vec<f64>,
}

impl UsageSample {
    /// Whether any window is strictly above the threshold.
    pub fn is_over(&self, threshold: f64) -> bool {
        self.percents.iter().any(|p| *p > threshold)
    }
}

/// Whether a facility may currently start new jobs on a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldState {
    /// Node cap is zero
    Held,
    Open,
}

impl HoldState {
    pub fn from_held(held: bool) -> Self {
        if held { HoldState::Held } else { HoldState::Open }
    }
}

impl fmt::Display for HoldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoldState::Held => write!(f, "held"),
            HoldState::Open => write!(f, "open"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> ChargeRecord {
        ChargeRecord {
            job_id: "12345".to_string(),
            username: "alice".to_string(),
            allocation_id: "65a0c3".to_string(),
            qos: "normal".to_string(),
            start_ts: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end_ts: Some(Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap()),
            resource_hours: 128.0,
        }
    }

    #[test]
    fn test_charge_record_json_shape() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "jobId": "12345",
                "username": "alice",
                "allocationId": "65a0c3",
                "qos": "normal",
                "startTs": "2024-01-01T00:00:00.000Z",
                "endTs": "2024-01-01T02:00:00.000Z",
                "resourceHours": 128.0
            })
        );
    }

    #[test]
    fn test_missing_end_is_omitted() {
        let mut r = record();
        r.end_ts = None;
        let value = serde_json::to_value(&r).unwrap();
        assert!(value.get("endTs").is_none());

        let back: ChargeRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_usage_over_threshold() {
        let sample = UsageSample {
            facility: "lcls".to_string(),
            cluster: "roma".to_string(),
            percents: vec![50.0, 100.0, 120.5],
        };
        assert!(sample.is_over(100.0));
        assert!(!sample.is_over(120.5));
    }

    #[test]
    fn test_hold_state_from_held() {
        assert_eq!(HoldState::from_held(true), HoldState::Held);
        assert_eq!(HoldState::from_held(false), HoldState::Open);
        assert_eq!(HoldState::Held.to_string(), "held");
    }
}
