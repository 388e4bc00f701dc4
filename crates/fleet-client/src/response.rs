//! Typed view over one node's search response.

use fleet_types::CountMode;

use crate::wire::{FileMatch, SearchPayload, SearchResultBody};

/// One node's decoded search response.
///
/// A response is a failure exactly when the payload carries a non-blank
/// error field. Counts follow the [`CountMode`] chosen at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeResponse {
    payload: SearchPayload,
    count_mode: CountMode,
}

impl NodeResponse {
    pub fn new(payload: SearchPayload, count_mode: CountMode) -> Self {
        Self {
            payload,
            count_mode,
        }
    }

    /// Decode a response body.
    pub fn from_json(body: &str, count_mode: CountMode) -> Result<Self, serde_json::Error> {
        let payload = serde_json::from_str(body)?;
        Ok(Self::new(payload, count_mode))
    }

    /// A successful response with no results.
    pub fn empty() -> Self {
        Self::new(
            SearchPayload {
                result: Some(SearchResultBody::default()),
                error: None,
                legacy_error: None,
            },
            CountMode::default(),
        )
    }

    /// A failed response carrying `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(
            SearchPayload {
                result: None,
                error: Some(message.into()),
                legacy_error: None,
            },
            CountMode::default(),
        )
    }

    pub fn is_success(&self) -> bool {
        !self.is_failure()
    }

    pub fn is_failure(&self) -> bool {
        self.error_message().is_some()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.payload.error_message()
    }

    pub fn count_mode(&self) -> CountMode {
        self.count_mode
    }

    pub fn payload(&self) -> &SearchPayload {
        &self.payload
    }

    /// Number of matching files.
    pub fn file_count(&self) -> u64 {
        match self.count_mode {
            CountMode::Reported => self.body().map_or(0, |body| body.file_count),
            CountMode::Computed => self.file_slice().len() as u64,
        }
    }

    /// Number of matching lines.
    pub fn match_count(&self) -> u64 {
        match self.count_mode {
            CountMode::Reported => self.body().map_or(0, |body| body.match_count),
            CountMode::Computed => self
                .file_slice()
                .iter()
                .map(|file| file.line_matches().len() as u64)
                .sum(),
        }
    }

    /// Matching files in node order. Can be called any number of times.
    pub fn files(&self) -> std::slice::Iter<'_, FileMatch> {
        self.file_slice().iter()
    }

    pub fn into_files(self) -> Vec<FileMatch> {
        self.payload
            .result
            .and_then(|body| body.files)
            .unwrap_or_default()
    }

    pub(crate) fn file_slice(&self) -> &[FileMatch] {
        self.body().map(SearchResultBody::files).unwrap_or(&[])
    }

    fn body(&self) -> Option<&SearchResultBody> {
        self.payload.result.as_ref()
    }
}

impl Default for NodeResponse {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn five_reported_three_present(mode: CountMode) -> NodeResponse {
        NodeResponse::from_json(
            r#"{"Result": {"FileCount": 5, "MatchCount": 40, "Files": [
                {"Score": 3.0, "LineMatches": [{}, {}]},
                {"Score": 2.0, "LineMatches": [{}]},
                {"Score": 1.0, "LineMatches": null}
            ]}}"#,
            mode,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_response() {
        let response = NodeResponse::empty();
        assert_eq!(response.file_count(), 0);
        assert_eq!(response.match_count(), 0);
        assert!(response.is_success());
        assert!(!response.is_failure());
        assert_eq!(response.files().count(), 0);
    }

    #[test]
    fn test_reported_counts_trust_the_node() {
        let response = five_reported_three_present(CountMode::Reported);
        assert_eq!(response.file_count(), 5);
        assert_eq!(response.match_count(), 40);
    }

    #[test]
    fn test_computed_counts_use_payload_items() {
        let response = five_reported_three_present(CountMode::Computed);
        assert_eq!(response.file_count(), 3);
        assert_eq!(response.match_count(), 3);
    }

    #[test]
    fn test_files_is_restartable() {
        let response = five_reported_three_present(CountMode::Reported);
        let first: Vec<f64> = response.files().map(|f| f.score).collect();
        let second: Vec<f64> = response.files().map(|f| f.score).collect();
        assert_eq!(first, vec![3.0, 2.0, 1.0]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_error_field_marks_failure() {
        let upper = NodeResponse::from_json(r#"{"Error": "bad query"}"#, CountMode::Reported)
            .unwrap();
        let lower = NodeResponse::from_json(r#"{"error": "bad query"}"#, CountMode::Reported)
            .unwrap();
        for response in [upper, lower] {
            assert!(response.is_failure());
            assert!(!response.is_success());
            assert_eq!(response.error_message(), Some("bad query"));
            assert_eq!(response.file_count(), 0);
        }
    }

    #[test]
    fn test_both_error_casings_decode_as_failure() {
        let response = NodeResponse::from_json(
            r#"{"Error": "bad query", "error": "bad query"}"#,
            CountMode::Reported,
        )
        .unwrap();
        assert!(response.is_failure());
        assert_eq!(response.error_message(), Some("bad query"));
    }

    #[test]
    fn test_blank_error_is_not_failure() {
        let response = NodeResponse::from_json(
            r#"{"Error": "", "Result": {"FileCount": 1}}"#,
            CountMode::Reported,
        )
        .unwrap();
        assert!(response.is_success());
        assert_eq!(response.file_count(), 1);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(NodeResponse::from_json("<html>", CountMode::Reported).is_err());
    }
}
