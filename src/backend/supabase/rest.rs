//! PostgREST data access

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::debug;

use super::{status_error, SupabaseClient};
use crate::backend::{BackendError, DataStore, Query, Table};

/// Renders an equality filter value the way PostgREST expects it after `eq.`
fn filter_literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Query string for a select, without the leading `?`
pub(crate) fn query_string(query: &Query) -> String {
    let mut params = vec!["select=*".to_string()];
    for (column, value) in &query.filters {
        params.push(format!(
            "{}=eq.{}",
            urlencoding::encode(column),
            urlencoding::encode(&filter_literal(value))
        ));
    }
    if let Some(column) = &query.order_desc {
        params.push(format!("order={}.desc", urlencoding::encode(column)));
    }
    if let Some(limit) = query.limit {
        params.push(format!("limit={}", limit));
    }
    params.join("&")
}

/// Total from `Content-Range: 0-24/3573` or `*/0`
pub(crate) fn parse_content_range(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("content-range")
        .and_then(|v| v.to_str().ok())
        .and_then(|range| range.rsplit('/').next())
        .and_then(|total| total.trim().parse::<u64>().ok())
}

impl SupabaseClient {
    fn table_url(&self, table: Table) -> String {
        self.endpoint(&format!("/rest/v1/{}", table.as_str()))
    }

    /// First row of a `return=representation` response, which arrives as an array
    async fn single_row(
        response: reqwest::Response,
        table: Table,
        id: Option<&str>,
    ) -> Result<Value, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, true));
        }
        let rows: Vec<Value> = response.json().await?;
        rows.into_iter().next().ok_or_else(|| match id {
            Some(id) => BackendError::NotFound(format!("{} row {}", table, id)),
            None => BackendError::RemoteWrite(format!("insert into {} returned no row", table)),
        })
    }
}

#[async_trait]
impl DataStore for SupabaseClient {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        let url = format!("{}?{}", self.table_url(query.table), query_string(query));
        debug!(table = %query.table, url = %url, "PostgREST select");

        let response = self.authorized(self.shared.http.get(&url)).await.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, false));
        }
        Ok(response.json().await?)
    }

    async fn count(&self, query: &Query) -> Result<u64, BackendError> {
        let unbounded = Query {
            limit: None,
            order_desc: None,
            ..query.clone()
        };
        let url = format!("{}?{}", self.table_url(query.table), query_string(&unbounded));

        let response = self
            .authorized(self.shared.http.head(&url))
            .await
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "", false));
        }
        parse_content_range(response.headers()).ok_or_else(|| {
            BackendError::Decode(format!("missing Content-Range on {} count", query.table))
        })
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError> {
        let response = self
            .authorized(self.shared.http.post(self.table_url(table)))
            .await
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        Self::single_row(response, table, None).await
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, BackendError> {
        let url = format!("{}?id=eq.{}", self.table_url(table), urlencoding::encode(id));
        let response = self
            .authorized(self.shared.http.patch(&url))
            .await
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        Self::single_row(response, table, Some(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_query_string_encodes_filters() {
        let query = Query::table(Table::Threats)
            .eq("is_active", true)
            .eq("location_name", "Dar es Salaam")
            .order_desc("created_at")
            .limit(50);
        assert_eq!(
            query_string(&query),
            "select=*&is_active=eq.true&location_name=eq.Dar%20es%20Salaam&order=created_at.desc&limit=50"
        );
    }

    #[test]
    fn test_query_string_minimal() {
        assert_eq!(query_string(&Query::table(Table::Profiles)), "select=*");
    }

    #[test]
    fn test_parse_content_range() {
        let mut headers = HeaderMap::new();
        headers.insert("content-range", HeaderValue::from_static("0-24/3573"));
        assert_eq!(parse_content_range(&headers), Some(3573));

        headers.insert("content-range", HeaderValue::from_static("*/0"));
        assert_eq!(parse_content_range(&headers), Some(0));

        headers.insert("content-range", HeaderValue::from_static("0-24/*"));
        assert_eq!(parse_content_range(&headers), None);
    }
}
