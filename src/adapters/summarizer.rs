//! Deterministic local summarizer.
//!
//! Stands in for a hosted model client: it condenses the alert and the
//! enrichment categories present into one paragraph. It reports no
//! confidence of its own unless configured with one.

use async_trait::async_trait;
use serde_json::Value;

use super::Summarizer;
use crate::core::scorer::context_categories;
use crate::domain::{Alert, Summary};

#[derive(Debug, Clone, Default)]
pub struct TemplateSummarizer {
    confidence: Option<f64>,
}

impl TemplateSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a fixed model confidence with every summary
    pub fn with_confidence(confidence: f64) -> Self {
        Self {
            confidence: Some(confidence),
        }
    }
}

#[async_trait]
impl Summarizer for TemplateSummarizer {
    fn name(&self) -> &str {
        "template"
    }

    async fn summarize(&self, alert: &Value, context: Option<&Value>) -> anyhow::Result<Summary> {
        let alert = Alert::from_value(alert);
        let mut text = alert.headline();

        let present = context_categories(context);

        if present.is_empty() {
            text.push_str(". No enrichment context available.");
        } else {
            text.push_str(&format!(". Enrichment available: {}.", present.join(", ")));
        }

        if let Some(count) = alert.repetition_count {
            text.push_str(&format!(" Seen {} times.", count));
        }

        let mut summary = Summary::new(text).with_model(self.name());
        if let Some(confidence) = self.confidence {
            summary = summary.with_confidence(confidence);
        }
        Ok(summary)
    }
}
