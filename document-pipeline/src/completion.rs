use std::sync::Arc;

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use common::error::AppError;

const GRAPH_EXTRACTION_SYSTEM_MESSAGE: &str = "You extract a knowledge graph from a passage of \
a document. Return the distinct named entities with a short type label (person, place, \
organization, concept, ...) and a one-sentence description, plus the relationships between \
them stated or strongly implied by the passage. Use entity names exactly as they appear.";

const SUMMARY_SYSTEM_MESSAGE: &str = "You write a one-paragraph summary of a document. Be \
factual and compact; do not editorialize.";

const ENRICHMENT_SYSTEM_MESSAGE: &str = "You refine the description of a knowledge-graph \
entity using its neighborhood. Produce a single improved description sentence that folds in \
what the related entities reveal.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityCandidate {
    pub name: String,
    pub entity_type: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationshipCandidate {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

/// What the completion backend proposes for one chunk of text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphCandidates {
    pub entities: Vec<EntityCandidate>,
    pub relationships: Vec<RelationshipCandidate>,
}

/// One completion capability, two interchangeable backends: an OpenAI-backed
/// one with structured outputs, and a deterministic extractive one that works
/// offline.
#[derive(Clone)]
pub struct CompletionProvider {
    inner: CompletionInner,
}

#[derive(Clone)]
enum CompletionInner {
    OpenAI {
        client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        model: String,
    },
    Extractive,
}

impl CompletionProvider {
    pub fn new_openai(
        client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        model: String,
    ) -> Self {
        Self {
            inner: CompletionInner::OpenAI { client, model },
        }
    }

    pub fn new_extractive() -> Self {
        Self {
            inner: CompletionInner::Extractive,
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            CompletionInner::OpenAI { .. } => "openai",
            CompletionInner::Extractive => "extractive",
        }
    }

    /// Entity/relationship candidates for one chunk of text.
    pub async fn extract_graph(&self, text: &str) -> Result<GraphCandidates, AppError> {
        match &self.inner {
            CompletionInner::OpenAI { client, model } => {
                let user_message = format!("Passage:\n{text}");
                chat_json(
                    client,
                    model,
                    GRAPH_EXTRACTION_SYSTEM_MESSAGE,
                    user_message,
                    "graph_candidates",
                    graph_candidates_schema(),
                )
                .await
            }
            CompletionInner::Extractive => Ok(extractive_graph(text)),
        }
    }

    pub async fn summarize(&self, title: &str, text: &str) -> Result<String, AppError> {
        match &self.inner {
            CompletionInner::OpenAI { client, model } => {
                let user_message = format!("Title: {title}\n\nDocument:\n{text}");
                let response: SummaryResponse = chat_json(
                    client,
                    model,
                    SUMMARY_SYSTEM_MESSAGE,
                    user_message,
                    "document_summary",
                    summary_schema(),
                )
                .await?;
                Ok(response.summary)
            }
            CompletionInner::Extractive => Ok(extractive_summary(title, text)),
        }
    }

    /// An improved entity description given its graph neighborhood.
    pub async fn enrich_description(
        &self,
        name: &str,
        entity_type: &str,
        description: &str,
        neighbors: &[String],
    ) -> Result<String, AppError> {
        match &self.inner {
            CompletionInner::OpenAI { client, model } => {
                let user_message = format!(
                    "Entity: {name} ({entity_type})\nCurrent description: {description}\n\
                     Related entities: {}",
                    neighbors.join(", ")
                );
                let response: SummaryResponse = chat_json(
                    client,
                    model,
                    ENRICHMENT_SYSTEM_MESSAGE,
                    user_message,
                    "entity_description",
                    summary_schema(),
                )
                .await?;
                Ok(response.summary)
            }
            CompletionInner::Extractive => {
                Ok(extractive_enrichment(name, description, neighbors))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
}

async fn chat_json<T: DeserializeOwned>(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    model: &str,
    system_message: &str,
    user_message: String,
    schema_name: &str,
    schema: Value,
) -> Result<T, AppError> {
    let response_format = ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: None,
            name: schema_name.into(),
            schema: Some(schema),
            strict: Some(true),
        },
    };

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(system_message).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .response_format(response_format)
        .build()?;

    let response = client.chat().create(request).await?;

    let content = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_ref())
        .ok_or(AppError::LLMParsing(
            "No content found in LLM response".into(),
        ))?;

    serde_json::from_str::<T>(content).map_err(|e| {
        AppError::LLMParsing(format!("Failed to parse LLM response into {schema_name}: {e}"))
    })
}

fn graph_candidates_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "entity_type": { "type": "string" },
                        "description": { "type": "string" }
                    },
                    "required": ["name", "entity_type", "description"],
                    "additionalProperties": false
                }
            },
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "subject": { "type": "string" },
                        "predicate": { "type": "string" },
                        "object": { "type": "string" }
                    },
                    "required": ["subject", "predicate", "object"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["entities", "relationships"],
        "additionalProperties": false
    })
}

fn summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" }
        },
        "required": ["summary"],
        "additionalProperties": false
    })
}

// The extractive backend: capitalized-run entity detection plus co-occurrence
// relationships. Deterministic, so tests and offline deployments can run the
// full pipeline without a model.

const STOPWORDS: &[&str] = &[
    "The", "A", "An", "This", "That", "These", "Those", "It", "He", "She", "They", "We", "You",
    "I", "In", "On", "At", "By", "For", "With", "From", "But", "And", "Or", "If", "When",
];

fn extractive_graph(text: &str) -> GraphCandidates {
    let mut entities: Vec<EntityCandidate> = Vec::new();
    let mut order: Vec<String> = Vec::new();

    for name in capitalized_runs(text) {
        if order.iter().any(|existing| existing == &name) {
            continue;
        }
        let description = sentence_containing(text, &name)
            .unwrap_or_default()
            .to_string();
        order.push(name.clone());
        entities.push(EntityCandidate {
            name,
            entity_type: "concept".to_string(),
            description,
        });
    }

    let relationships = order
        .windows(2)
        .map(|pair| RelationshipCandidate {
            subject: pair[0].clone(),
            predicate: "related_to".to_string(),
            object: pair[1].clone(),
        })
        .collect();

    GraphCandidates {
        entities,
        relationships,
    }
}

/// Runs of consecutive capitalized words, skipping sentence-initial stopwords.
fn capitalized_runs(text: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for raw in text.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        let capitalized = word
            .chars()
            .next()
            .map(|c| c.is_uppercase())
            .unwrap_or(false)
            && word.len() >= 2;

        if capitalized && !STOPWORDS.contains(&word) {
            current.push(word);
        } else {
            if !current.is_empty() && current.iter().map(|w| w.len()).sum::<usize>() >= 3 {
                runs.push(current.join(" "));
            }
            current.clear();
        }
    }
    if !current.is_empty() {
        runs.push(current.join(" "));
    }

    runs
}

fn sentence_containing<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    text.split_terminator(['.', '!', '?'])
        .map(str::trim)
        .find(|sentence| sentence.contains(name))
}

fn extractive_summary(title: &str, text: &str) -> String {
    let mut sentences = text.split_terminator(['.', '!', '?']).map(str::trim);
    let first = sentences.next().unwrap_or_default();
    let second = sentences.next().unwrap_or_default();
    if second.is_empty() {
        format!("{title}: {first}.")
    } else {
        format!("{title}: {first}. {second}.")
    }
}

fn extractive_enrichment(name: &str, description: &str, neighbors: &[String]) -> String {
    if neighbors.is_empty() {
        return description.to_string();
    }
    let base = if description.is_empty() {
        name.to_string()
    } else {
        description.to_string()
    };
    format!("{base} (connected to {})", neighbors.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extractive_backend_finds_entities_and_relationships() {
        let provider = CompletionProvider::new_extractive();
        let text = "Ada Lovelace corresponded with Charles Babbage about the \
                    Analytical Engine. She published the first algorithm.";
        let graph = provider.extract_graph(text).await.expect("extract");

        let names: Vec<&str> = graph.entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"Ada Lovelace"));
        assert!(names.contains(&"Charles Babbage"));
        assert!(names.contains(&"Analytical Engine"));

        assert!(!graph.relationships.is_empty());
        assert!(graph
            .relationships
            .iter()
            .all(|r| r.predicate == "related_to"));

        // Deterministic across runs.
        let again = provider.extract_graph(text).await.expect("extract");
        assert_eq!(graph, again);
    }

    #[tokio::test]
    async fn extractive_backend_skips_stopword_runs() {
        let provider = CompletionProvider::new_extractive();
        let graph = provider
            .extract_graph("The engine ran. It was fast.")
            .await
            .expect("extract");
        assert!(graph.entities.is_empty());
    }

    #[tokio::test]
    async fn extractive_summary_leads_with_title() {
        let provider = CompletionProvider::new_extractive();
        let summary = provider
            .summarize("Report", "Revenue grew. Costs shrank. Everything else held.")
            .await
            .expect("summary");
        assert_eq!(summary, "Report: Revenue grew. Costs shrank.");
    }

    #[tokio::test]
    async fn enrichment_folds_in_neighbors() {
        let provider = CompletionProvider::new_extractive();
        let enriched = provider
            .enrich_description(
                "Ada Lovelace",
                "person",
                "Mathematician",
                &["Charles Babbage".to_string()],
            )
            .await
            .expect("enrich");
        assert_eq!(enriched, "Mathematician (connected to Charles Babbage)");
    }
}
