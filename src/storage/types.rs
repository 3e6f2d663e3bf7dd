use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{confidence_percent, scanned_ago, PredictionResult};

/// A classification persisted for later review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// ULID, sortable by creation time
    pub id: String,
    /// Owner of the scan, as reported by the identity endpoint
    pub user_id: String,
    /// Name of the uploaded file
    pub file_name: String,
    /// Predicted class
    pub label: String,
    /// Confidence fraction in `[0, 1]`
    pub confidence: f64,
    /// When the scan was recorded
    pub created_at: DateTime<Utc>,
}

impl ScanRecord {
    /// Builds a record for `result`, stamped now with a fresh id.
    pub fn new(user_id: &str, file_name: &str, result: &PredictionResult) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            user_id: user_id.to_string(),
            file_name: file_name.to_string(),
            label: result.label().to_string(),
            confidence: result.confidence(),
            created_at: Utc::now(),
        }
    }

    /// Whole-percent confidence for display
    pub fn confidence_percent(&self) -> u8 {
        confidence_percent(self.confidence)
    }

    /// Relative age, e.g. `"Scanned 3 hours ago"`
    pub fn age_label(&self, now: DateTime<Utc>) -> String {
        scanned_ago(self.created_at, now)
    }
}
