use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::shared::error::{AppError, FieldError};
use crate::core::shared::state::AppState;
use crate::core::store::{CreationBucket, DateRange, Granularity};

/// Offsets outside this window do not exist on any civil clock.
const MIN_TZ_OFFSET: i32 = -12 * 60;
const MAX_TZ_OFFSET: i32 = 14 * 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRow {
    pub province: String,
    pub district: String,
    pub peoples_count: i64,
    pub peoples_with_d_id_count: i64,
    pub peoples_general_count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRow {
    pub schedule_id: Uuid,
    pub name: String,
    pub people: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub people: i64,
    pub replies: i64,
    pub conversations: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardReport {
    pub totals: Totals,
    pub addresses: Vec<AddressRow>,
    pub created: Vec<CreationBucket>,
    pub completion: Vec<CompletionRow>,
}

#[derive(Debug, Default, Deserialize)]
struct RawParams {
    granularity: Option<String>,
    tz_offset: Option<String>,
    from: Option<String>,
    to: Option<String>,
}

/// Validated dashboard query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportParams {
    pub granularity: Granularity,
    pub tz_offset_minutes: i32,
    pub range: DateRange,
}

fn parse_instant(
    name: &str,
    raw: Option<String>,
    errors: &mut Vec<FieldError>,
) -> Option<DateTime<Utc>> {
    let raw = raw.filter(|s| !s.trim().is_empty())?;
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(instant) => Some(instant.with_timezone(&Utc)),
        Err(_) => {
            errors.push(
                FieldError::query(name, "Must be an RFC 3339 timestamp")
                    .with_value(serde_json::Value::String(raw)),
            );
            None
        }
    }
}

impl ReportParams {
    fn parse(raw: RawParams, default_offset: i32) -> Result<Self, AppError> {
        let mut errors = Vec::new();

        let granularity = match raw.granularity.as_deref().map(str::trim) {
            None | Some("") | Some("day") => Granularity::Day,
            Some("month") => Granularity::Month,
            Some("year") => Granularity::Year,
            Some(other) => {
                errors.push(
                    FieldError::query("granularity", "Must be one of: day, month, year")
                        .with_value(serde_json::Value::String(other.to_string())),
                );
                Granularity::Day
            }
        };

        let tz_offset_minutes = match raw.tz_offset.as_deref().map(str::trim) {
            None | Some("") => default_offset,
            Some(value) => match value.parse::<i32>() {
                Ok(minutes) if (MIN_TZ_OFFSET..=MAX_TZ_OFFSET).contains(&minutes) => minutes,
                _ => {
                    errors.push(
                        FieldError::query(
                            "tz_offset",
                            format!("Must be minutes between {MIN_TZ_OFFSET} and {MAX_TZ_OFFSET}"),
                        )
                        .with_value(serde_json::Value::String(value.to_string())),
                    );
                    default_offset
                }
            },
        };

        let from = parse_instant("from", raw.from, &mut errors);
        let to = parse_instant("to", raw.to, &mut errors);
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                errors.push(FieldError::query("to", "Must not be before from"));
            }
        }

        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }
        Ok(Self {
            granularity,
            tz_offset_minutes,
            range: DateRange { from, to },
        })
    }
}

#[async_trait]
impl FromRequestParts<std::sync::Arc<AppState>> for ReportParams {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &std::sync::Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Query(raw) = Query::<RawParams>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::invalid(FieldError::query("query", e.body_text())))?;
        Self::parse(raw, state.config.reporting.tz_offset_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(granularity: Option<&str>, tz: Option<&str>, from: Option<&str>, to: Option<&str>) -> RawParams {
        RawParams {
            granularity: granularity.map(str::to_string),
            tz_offset: tz.map(str::to_string),
            from: from.map(str::to_string),
            to: to.map(str::to_string),
        }
    }

    #[test]
    fn test_defaults_apply() {
        let params = ReportParams::parse(RawParams::default(), 420).unwrap();
        assert_eq!(params.granularity, Granularity::Day);
        assert_eq!(params.tz_offset_minutes, 420);
        assert!(params.range.is_unbounded());
    }

    #[test]
    fn test_parses_every_parameter() {
        let params = ReportParams::parse(
            raw(
                Some("month"),
                Some("-300"),
                Some("2024-01-01T00:00:00Z"),
                Some("2024-02-01T07:00:00+07:00"),
            ),
            0,
        )
        .unwrap();
        assert_eq!(params.granularity, Granularity::Month);
        assert_eq!(params.tz_offset_minutes, -300);
        assert_eq!(
            params.range.from,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            params.range.to,
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_reports_every_bad_parameter() {
        let Err(AppError::Validation(errors)) = ReportParams::parse(
            raw(Some("week"), Some("900"), Some("yesterday"), None),
            0,
        ) else {
            panic!("expected validation errors");
        };
        let params: Vec<_> = errors.iter().map(|e| e.param.as_str()).collect();
        assert_eq!(params, vec!["granularity", "tz_offset", "from"]);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let result = ReportParams::parse(
            raw(None, None, Some("2024-02-01T00:00:00Z"), Some("2024-01-01T00:00:00Z")),
            0,
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_address_row_field_names() {
        let row = AddressRow {
            province: "Hue".into(),
            district: "other".into(),
            peoples_count: 4,
            peoples_with_d_id_count: 1,
            peoples_general_count: 3,
            percentage: 40.0,
        };
        let value = serde_json::to_value(row).unwrap();
        assert_eq!(value["peoplesCount"], 4);
        assert_eq!(value["peoplesWithDIdCount"], 1);
        assert_eq!(value["peoplesGeneralCount"], 3);
    }
}
