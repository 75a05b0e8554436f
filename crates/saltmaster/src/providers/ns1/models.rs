//! NS1 API request and response models.

use serde::{Deserialize, Serialize};

/// Record body sent on create and update.
#[derive(Debug, Serialize)]
pub struct RecordBody {
    pub zone: String,
    pub domain: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub answers: Vec<AnswerBody>,
}

/// One answer of a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerBody {
    /// Answer fields; a single address for `A` records.
    pub answer: Vec<String>,
}

/// Record returned by the API.
#[derive(Debug, Deserialize)]
pub struct RecordResource {
    pub id: String,
    pub zone: String,
    pub domain: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub answers: Vec<AnswerBody>,
}

impl RecordResource {
    /// Answers flattened to plain strings.
    #[must_use]
    pub fn answer_values(&self) -> Vec<String> {
        self.answers
            .iter()
            .map(|a| a.answer.join(" "))
            .collect()
    }
}
