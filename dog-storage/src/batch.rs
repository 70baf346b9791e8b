//! Concurrent property lookups with per-item failure isolation.

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::envelope::REPORT_API_ID;
use crate::{
    BatchConfig, BatchEntry, BatchResult, FailureDescriptor, Reply, StorageError, StorageProvider,
    StorageResult,
};

const PROPERTIES_FAILED: &str = "Failed to get blob properties";

/// Ordered logical name → storage key pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRequest {
    entries: Vec<(String, String)>,
}

impl BatchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lookup. A repeated logical name replaces the earlier key in place.
    pub fn insert<N: Into<String>, K: Into<String>>(&mut self, logical_name: N, key: K) {
        let logical_name = logical_name.into();
        let key = key.into();
        match self.entries.iter_mut().find(|(name, _)| *name == logical_name) {
            Some(entry) => entry.1 = key,
            None => self.entries.push((logical_name, key)),
        }
    }

    pub fn with<N: Into<String>, K: Into<String>>(mut self, logical_name: N, key: K) -> Self {
        self.insert(logical_name, key);
        self
    }

    /// Parse a JSON object such as `{"r1": "a/b.json"}`, keeping key order
    pub fn from_json(text: &str) -> StorageResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| StorageError::invalid(format!("fileNames is not valid JSON: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| StorageError::invalid("fileNames must be a JSON object"))?;

        let mut request = Self::new();
        for (logical_name, key) in object {
            let key = key.as_str().ok_or_else(|| {
                StorageError::invalid(format!("fileNames entry '{}' must be a string", logical_name))
            })?;
            request.insert(logical_name.as_str(), key);
        }
        Ok(request)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(name, key)| (name.as_str(), key.as_str()))
    }
}

/// Fans property lookups out across a provider
#[derive(Debug, Clone)]
pub struct BatchPropertyFetcher {
    max_entries: usize,
    max_concurrency: usize,
}

impl BatchPropertyFetcher {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Look up every entry. Individual failures become [`FailureDescriptor`]s;
    /// only an oversized batch fails as a whole.
    pub async fn fetch(
        &self,
        provider: &dyn StorageProvider,
        container: &str,
        request: &BatchRequest,
    ) -> StorageResult<BatchResult> {
        if request.len() > self.max_entries {
            return Err(StorageError::invalid(format!(
                "batch of {} entries exceeds the limit of {}",
                request.len(),
                self.max_entries
            )));
        }
        if request.is_empty() {
            return Ok(BatchResult::new());
        }

        info!(provider = provider.name(), container = %container, entries = request.len(), "Fetching blob properties");

        // `buffered` yields in input order whatever order lookups finish in
        let entries: Vec<(String, BatchEntry)> = stream::iter(request.iter())
            .map(|(logical_name, key)| async move {
                let entry = match provider.get_properties(container, key, logical_name).await {
                    Ok(metadata) => {
                        debug!(logical_name = %logical_name, key = %key, size = metadata.size_bytes, "Blob properties fetched");
                        BatchEntry::Found(metadata)
                    }
                    Err(err) => {
                        warn!(logical_name = %logical_name, key = %key, error = %err, "Blob properties lookup failed");
                        BatchEntry::Failed(FailureDescriptor {
                            message: Self::failure_message(&err).to_string(),
                            status_code: err.status_u16(),
                            logical_name: logical_name.to_string(),
                            file_name: key.to_string(),
                        })
                    }
                };
                (logical_name.to_string(), entry)
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut result = BatchResult::new();
        for (logical_name, entry) in entries {
            result.push(logical_name, entry);
        }

        if result.failures() > 0 {
            info!(entries = result.len(), failures = result.failures(), "Batch completed with failures");
        }
        Ok(result)
    }

    /// Run a batch and wrap it in a reply. Partial failure still answers OK.
    pub async fn respond(
        &self,
        provider: &dyn StorageProvider,
        container: &str,
        request: &BatchRequest,
    ) -> Reply {
        match self.fetch(provider, container, request).await {
            Ok(result) => match serde_json::to_value(&result) {
                Ok(value) => Reply::ok(REPORT_API_ID, value),
                Err(err) => Reply::from_error(REPORT_API_ID, &err.into(), PROPERTIES_FAILED),
            },
            Err(err) => {
                warn!(error = %err, "Batch rejected");
                let message = err.to_string();
                Reply::from_error(REPORT_API_ID, &err, message)
            }
        }
    }

    fn failure_message(err: &StorageError) -> &'static str {
        match err {
            StorageError::NotFound { .. } => "Blob not found",
            StorageError::Forbidden { .. } => "Unable to authorize to blob storage",
            _ => PROPERTIES_FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_in_document_order() {
        let request = BatchRequest::from_json(r#"{"zeta":"z.json","alpha":"a/b.pdf","mid":"m.csv"}"#).unwrap();
        let names: Vec<&str> = request.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(request.iter().nth(1).unwrap().1, "a/b.pdf");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            BatchRequest::from_json("not json").unwrap_err(),
            StorageError::Invalid { .. }
        ));
        assert!(matches!(
            BatchRequest::from_json(r#"["a.json"]"#).unwrap_err(),
            StorageError::Invalid { .. }
        ));
        assert!(matches!(
            BatchRequest::from_json(r#"{"a": 1}"#).unwrap_err(),
            StorageError::Invalid { .. }
        ));
    }

    #[test]
    fn repeated_names_keep_their_first_position() {
        let request = BatchRequest::new().with("a", "1").with("b", "2").with("a", "3");
        let pairs: Vec<(&str, &str)> = request.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn failure_messages_hide_backend_detail() {
        let err = StorageError::backend_msg("connection refused by 10.0.0.1");
        assert_eq!(BatchPropertyFetcher::failure_message(&err), PROPERTIES_FAILED);
        assert_eq!(
            BatchPropertyFetcher::failure_message(&StorageError::not_found("k")),
            "Blob not found"
        );
    }
}
