//! The common output shape of both extraction pipelines: a titled document
//! made of ordered pages of text.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single page of extracted text. `page_number` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocPage {
    pub page_number: u32,
    pub text: String,
}

/// A structured document produced by recognition or extraction.
///
/// Page order is significant and preserved exactly as produced. Page numbers
/// need not be contiguous but must be non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDoc {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub pages: Vec<DocPage>,
}

impl ExtractedDoc {
    pub fn new(id: Uuid, title: Option<String>, pages: Vec<DocPage>) -> Self {
        Self { id, title, pages }
    }

    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    /// True when page numbers are non-decreasing in document order.
    pub fn pages_ordered(&self) -> bool {
        self.pages
            .windows(2)
            .all(|w| w[0].page_number <= w[1].page_number)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
