//! Classification results and the rolling history

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LeafscanError;

/// Label carried by the sentinel result for a failed classification
pub const ERROR_LABEL: &str = "Error";

/// One classification outcome.
///
/// `confidence` is always a fraction in `[0, 1]`; use
/// [`confidence_percent`](Self::confidence_percent) for display.
///
/// # Examples
///
/// ```
/// use leafscan::pipeline::PredictionResult;
///
/// let result = PredictionResult::new("Late Blight", 0.8765).unwrap();
/// assert_eq!(result.confidence_percent(), 88);
/// assert!(!result.is_sentinel());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    label: String,
    confidence: f64,
}

impl PredictionResult {
    /// Builds a result, rejecting confidences outside `[0, 1]`.
    pub fn new(label: impl Into<String>, confidence: f64) -> Result<Self, LeafscanError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(LeafscanError::Inference(format!(
                "confidence {} is outside [0, 1]",
                confidence
            )));
        }
        Ok(Self {
            label: label.into(),
            confidence,
        })
    }

    /// The display-safe stand-in for a failed classification.
    pub fn sentinel() -> Self {
        Self {
            label: ERROR_LABEL.to_string(),
            confidence: 0.0,
        }
    }

    /// Predicted class name
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Confidence as a fraction in `[0, 1]`
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Confidence as a whole percentage, rounded to nearest.
    pub fn confidence_percent(&self) -> u8 {
        confidence_percent(self.confidence)
    }

    /// Whether this is the failure sentinel
    pub fn is_sentinel(&self) -> bool {
        self.label == ERROR_LABEL && self.confidence == 0.0
    }
}

/// Short explanation for the classes the model knows about.
pub fn describe_label(label: &str) -> Option<&'static str> {
    match label {
        "Early Blight" => Some(
            "Early blight is a fungal disease that primarily affects potato and tomato plants, \
             characterized by small, dark lesions on lower leaves.",
        ),
        "Late Blight" => Some(
            "Late blight is a serious fungal disease that can destroy entire potato crops, \
             characterized by water-soaked lesions that turn brown and papery.",
        ),
        "Healthy" => Some(
            "The potato leaf appears healthy with no signs of disease. \
             Continue good agricultural practices to maintain plant health.",
        ),
        ERROR_LABEL => Some(
            "Unable to process the image. Please try again with a clear image of a potato leaf.",
        ),
        _ => None,
    }
}

/// A successful classification and when it was captured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The classification
    pub result: PredictionResult,
    /// Capture time
    pub captured_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Relative age, e.g. `"Scanned 2 hours ago"`.
    pub fn age_label(&self, now: DateTime<Utc>) -> String {
        scanned_ago(self.captured_at, now)
    }
}

/// Whole-percent form of a confidence fraction, clamped to `0..=100`.
pub fn confidence_percent(confidence: f64) -> u8 {
    (confidence.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Relative age of a scan taken at `captured_at`, as seen at `now`.
pub fn scanned_ago(captured_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(captured_at);
    let days = elapsed.num_days();
    let hours = elapsed.num_hours();

    if days > 0 {
        format!("Scanned {} day{} ago", days, if days > 1 { "s" } else { "" })
    } else if hours > 0 {
        format!("Scanned {} hour{} ago", hours, if hours > 1 { "s" } else { "" })
    } else {
        "Scanned just now".to_string()
    }
}

/// Most-recent-first history with a fixed capacity.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl History {
    /// Creates an empty history. A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepends `entry`, evicting the oldest entry when full.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Entries, newest first
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fixed capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
