//! Routing a query to a collection.
//!
//! Order: an explicit collection on the query, keyword rules, the chat model
//! (when enabled), then the configured default.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use citerag_core::config::RoutingSettings;
use citerag_core::error::{Error, Result};
use citerag_core::text::terms;
use citerag_core::types::validate_collection;

use crate::llm::{parse_json_reply, ChatModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMethod {
    Explicit,
    Rules,
    Model,
    Default,
}

impl fmt::Display for DecisionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Explicit => "explicit",
            Self::Rules => "rules",
            Self::Model => "model",
            Self::Default => "default",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDecision {
    pub collection: String,
    pub method: DecisionMethod,
}

/// Picks the collection whose keywords occur most often in the query.
/// Ties and zero matches yield no decision.
#[derive(Debug, Clone, Default)]
pub struct KeywordSelector {
    rules: BTreeMap<String, Vec<String>>,
}

impl KeywordSelector {
    pub fn new(rules: BTreeMap<String, Vec<String>>) -> Self {
        let rules = rules
            .into_iter()
            .map(|(collection, words)| (collection, words.into_iter().map(|w| w.to_lowercase()).collect()))
            .collect();
        Self { rules }
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> { self.rules.keys().map(String::as_str) }

    pub fn select(&self, query: &str, hints: &[String]) -> Option<String> {
        let query_terms = terms(query);
        let mut best: Option<(&str, usize)> = None;
        let mut tied = false;
        for (collection, words) in &self.rules {
            if !hints.is_empty() && !hints.contains(collection) {
                continue;
            }
            let count = words
                .iter()
                .filter(|w| if w.contains(' ') { query.to_lowercase().contains(w.as_str()) } else { query_terms.contains(w) })
                .count();
            if count == 0 {
                continue;
            }
            match best {
                Some((_, n)) if count < n => {}
                Some((_, n)) if count == n => tied = true,
                _ => {
                    best = Some((collection.as_str(), count));
                    tied = false;
                }
            }
        }
        if tied { None } else { best.map(|(c, _)| c.to_string()) }
    }
}

#[derive(Deserialize)]
struct ModelChoice {
    collection: String,
}

/// Asks the chat model to choose among known collections.
pub struct LlmSelector {
    chat: Arc<dyn ChatModel>,
    collections: Vec<String>,
}

impl LlmSelector {
    pub fn new(chat: Arc<dyn ChatModel>, collections: Vec<String>) -> Self { Self { chat, collections } }

    pub async fn select(&self, query: &str, hints: &[String]) -> Result<Option<String>> {
        let candidates: Vec<&String> = self.collections.iter().filter(|c| hints.is_empty() || hints.contains(c)).collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        let listing = candidates.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ");
        let system = format!(
            "Route the user's question to one knowledge collection. Collections: {listing}. \
Reply with JSON only: {{\"collection\": \"<name>\"}}."
        );
        let reply = self.chat.complete(&system, query).await?;
        let choice: ModelChoice = parse_json_reply(&reply)?;
        Ok(candidates.into_iter().find(|c| **c == choice.collection).cloned())
    }
}

pub struct RoutingSelector {
    rules: KeywordSelector,
    model: Option<LlmSelector>,
    default_collection: Option<String>,
}

impl RoutingSelector {
    pub fn new(rules: KeywordSelector, model: Option<LlmSelector>, default_collection: Option<String>) -> Self {
        Self { rules, model, default_collection }
    }

    /// Rules and default from settings; the model stage is attached when
    /// `use_model` is set and a chat model is available.
    pub fn from_settings(settings: &RoutingSettings, chat: Option<Arc<dyn ChatModel>>) -> Self {
        let rules = KeywordSelector::new(settings.rules.clone());
        let mut known: Vec<String> = rules.collections().map(str::to_string).collect();
        if let Some(d) = &settings.default_collection {
            if !known.contains(d) {
                known.push(d.clone());
            }
        }
        let model = chat.filter(|_| settings.use_model).map(|chat| LlmSelector::new(chat, known));
        Self::new(rules, model, settings.default_collection.clone())
    }

    pub async fn select_collection(&self, query: &str, explicit: Option<&str>, hints: &[String]) -> Result<CollectionDecision> {
        let decision = self.decide(query, explicit, hints).await?;
        validate_collection(&decision.collection)?;
        info!(collection = %decision.collection, method = %decision.method, "collection selected");
        Ok(decision)
    }

    async fn decide(&self, query: &str, explicit: Option<&str>, hints: &[String]) -> Result<CollectionDecision> {
        if let Some(collection) = explicit {
            return Ok(CollectionDecision { collection: collection.to_string(), method: DecisionMethod::Explicit });
        }
        if let Some(collection) = self.rules.select(query, hints) {
            return Ok(CollectionDecision { collection, method: DecisionMethod::Rules });
        }
        if let Some(model) = &self.model {
            match model.select(query, hints).await {
                Ok(Some(collection)) => return Ok(CollectionDecision { collection, method: DecisionMethod::Model }),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "model routing failed; using default collection"),
            }
        }
        self.default_collection
            .clone()
            .map(|collection| CollectionDecision { collection, method: DecisionMethod::Default })
            .ok_or_else(|| Error::InvalidInput("no collection given and none could be selected".into()))
    }
}
