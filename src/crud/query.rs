use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::core::shared::error::{AppError, FieldError};
use crate::core::shared::state::AppState;
use crate::core::store::documents::{parse_filter, parse_select, parse_sort};
use crate::core::store::{Collection, DocumentQuery};

/// Query string of a list request, still untyped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    #[serde(rename = "where")]
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<String>,
    pub skip: Option<String>,
    pub select: Option<String>,
    pub count: Option<String>,
}

fn non_negative(
    name: &str,
    raw: Option<&str>,
    errors: &mut Vec<FieldError>,
) -> Option<i64> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match raw.parse::<i64>() {
        Ok(n) if n >= 0 => Some(n),
        _ => {
            errors.push(
                FieldError::query(name, "Must be a non-negative integer")
                    .with_value(Value::String(raw.to_string())),
            );
            None
        }
    }
}

impl ListParams {
    /// Validates against the collection's fields. `limit` defaults to and is
    /// capped at `max_limit`.
    pub fn resolve(
        &self,
        collection: Collection,
        max_limit: i64,
    ) -> Result<(DocumentQuery, Vec<&'static str>), AppError> {
        let mut errors = Vec::new();

        let filter = match self.filter.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(raw) => parse_filter(collection, raw).unwrap_or_else(|e| {
                errors.push(e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        let sort = match self.sort.as_deref() {
            Some(raw) => parse_sort(collection, raw).unwrap_or_else(|e| {
                errors.push(e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        let select = match self.select.as_deref() {
            Some(raw) => parse_select(collection, raw).unwrap_or_else(|e| {
                errors.push(e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        let limit = non_negative("limit", self.limit.as_deref(), &mut errors)
            .map_or(max_limit, |n| n.min(max_limit));
        let skip = non_negative("skip", self.skip.as_deref(), &mut errors).unwrap_or(0);
        let with_count = matches!(
            self.count.as_deref().map(str::trim),
            Some("1" | "true" | "yes")
        );

        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }
        Ok((
            DocumentQuery {
                filter,
                sort,
                limit,
                skip,
                with_count,
            },
            select,
        ))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ListParams {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<ListParams>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::invalid(FieldError::query("query", e.body_text())))?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::Operator;

    fn params(pairs: &[(&str, &str)]) -> ListParams {
        let mut params = ListParams::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "where" => params.filter = value,
                "sort" => params.sort = value,
                "limit" => params.limit = value,
                "skip" => params.skip = value,
                "select" => params.select = value,
                "count" => params.count = value,
                _ => unreachable!(),
            }
        }
        params
    }

    #[test]
    fn test_defaults() {
        let (query, select) = ListParams::default()
            .resolve(Collection::People, 1000)
            .unwrap();
        assert_eq!(query.limit, 1000);
        assert_eq!(query.skip, 0);
        assert!(!query.with_count);
        assert!(query.filter.is_empty());
        assert!(select.is_empty());
    }

    #[test]
    fn test_limit_is_capped() {
        let (query, _) = params(&[("limit", "5000"), ("skip", "20")])
            .resolve(Collection::Replies, 1000)
            .unwrap();
        assert_eq!(query.limit, 1000);
        assert_eq!(query.skip, 20);
    }

    #[test]
    fn test_full_query() {
        let (query, select) = params(&[
            ("where", r#"{"province":{"$in":["Hue","Hanoi"]}}"#),
            ("sort", "-created_at"),
            ("select", "first_name province"),
            ("count", "1"),
            ("limit", "10"),
        ])
        .resolve(Collection::People, 1000)
        .unwrap();
        assert_eq!(query.filter[0].op, Operator::In);
        assert!(query.sort[0].descending);
        assert_eq!(select, vec!["first_name", "province"]);
        assert!(query.with_count);
        assert_eq!(query.limit, 10);
    }

    #[test]
    fn test_every_problem_is_reported() {
        let Err(AppError::Validation(errors)) = params(&[
            ("where", r#"{"password":"x"}"#),
            ("sort", "nonexistent"),
            ("limit", "-1"),
        ])
        .resolve(Collection::People, 1000) else {
            panic!("expected validation errors");
        };
        let params: Vec<_> = errors.iter().map(|e| e.param.as_str()).collect();
        assert_eq!(params, vec!["where", "sort", "limit"]);
    }
}
