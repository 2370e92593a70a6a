//! Domain classification: a pure, deterministic mapping from a record's
//! sender and content to a partition tag. Rules come from config; first
//! match wins, so the same input always yields the same domain.

use serde::{Deserialize, Serialize};

use crate::record::Domain;

/// One classification rule. A rule matches when the sender contains
/// `sender_contains` (if set) and the content contains every entry of
/// `content_keywords` (case-insensitive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_contains: Option<String>,
    #[serde(default)]
    pub content_keywords: Vec<String>,
    pub domain: Domain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub rules: Vec<ClassifyRule>,
    pub fallback: Domain,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                ClassifyRule {
                    sender_contains: None,
                    content_keywords: vec!["invoice".to_string()],
                    domain: Domain::Business,
                },
                ClassifyRule {
                    sender_contains: None,
                    content_keywords: vec!["payment".to_string()],
                    domain: Domain::Business,
                },
            ],
            fallback: Domain::Personal,
        }
    }
}

pub struct DomainClassifier {
    config: ClassifierConfig,
}

impl DomainClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, sender: &str, content: &str) -> Domain {
        let sender_lower = sender.to_lowercase();
        let content_lower = content.to_lowercase();

        for rule in &self.config.rules {
            if let Some(needle) = &rule.sender_contains {
                if !sender_lower.contains(&needle.to_lowercase()) {
                    continue;
                }
            }
            if rule
                .content_keywords
                .iter()
                .all(|kw| content_lower.contains(&kw.to_lowercase()))
            {
                return rule.domain;
            }
        }
        self.config.fallback
    }
}
