//! # Sync Module
//!
//! Live list views. A [`ListSynchronizer`] keeps one bounded query in step
//! with its table: subscribe to the table's change topic, fetch, and refetch
//! the whole window on every notification.

pub mod synchronizer;


use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::backend::{BackendError, DataStore, Query};

pub use synchronizer::ListSynchronizer;

/// A row with a stable primary key
pub trait Record: DeserializeOwned + Serialize + Clone + PartialEq + Send + Sync + 'static {
    fn record_id(&self) -> &str;
}

/// What a list view shows: one table, one bounded query, one row type.
pub trait ListSource: Send + Sync + 'static {
    type Row: Record;

    fn query(&self) -> Query;
}

pub(crate) fn decode_rows<R: Record>(rows: Vec<Value>) -> Result<Vec<R>, BackendError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(BackendError::from))
        .collect()
}

/// One bounded fetch without a subscription, for plain GET views.
pub async fn fetch_once<S: ListSource>(
    store: &dyn DataStore,
    source: &S,
    timeout: Duration,
) -> Result<Vec<S::Row>, BackendError> {
    let query = source.query();
    let rows = tokio::time::timeout(timeout, store.select(&query))
        .await
        .map_err(|_| BackendError::Network(format!("{} fetch timed out", query.table)))??;
    decode_rows(rows)
}
