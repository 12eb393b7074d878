//! Answer subsystem — retrieval-augmented answers about manufacturing events
//!
//! A question moves through
//! `Ranked -> Contextualized -> AnsweredLocal -> (Searching -> AnsweredFinal)`:
//! - events are gathered (named ids plus neighbours, or the recent set)
//! - a bounded context is assembled and a first answer generated
//! - external knowledge is fetched and a merged answer generated
//!
//! Local-only requests never touch the generation backend, the embedding
//! backend or the knowledge sources.

use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use shopfloor_core::config::RetrievalConfig;
use shopfloor_core::knowledge::KnowledgeBundle;
use shopfloor_core::{
    is_fallback, local, ContextAssembler, ContextMode, EmbeddingBackend, Event, ExternalKnowledge,
    GenerationCache, ShopfloorError, VectorIndexClient,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Ranked,
    Contextualized,
    AnsweredLocal,
    Searching,
    AnsweredFinal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
    pub stage: PipelineStage,
}

impl Answer {
    fn local(answer: String) -> Self {
        Self {
            answer,
            sources: Vec::new(),
            stage: PipelineStage::AnsweredLocal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityExplanation {
    pub id_a: i64,
    pub id_b: i64,
    pub similarity: f64,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSummary {
    pub count: usize,
    pub summary: String,
    pub report: String,
}

/// Events gathered for one question.
struct Gathered {
    events: Vec<Event>,
    named: Vec<i64>,
    /// Closest neighbour of the first named event, with its score.
    closest: Option<(i64, f64)>,
    mode: ContextMode,
}

/// Event ids named in a question ("event 12", "id 12", "#12"), in order of
/// first mention, without duplicates, at most `max`.
pub fn extract_event_ids(question: &str, max: usize) -> Vec<i64> {
    let Ok(re) = Regex::new(r"(?i)(?:\b(?:event|id)\s*#?\s*|#)(\d+)\b") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    re.captures_iter(question)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<i64>().ok())
        .filter(|id| *id > 0 && seen.insert(*id))
        .take(max)
        .collect()
}

// ============================================================================
// Prompts
// ============================================================================

pub fn question_prompt(context: &str, question: &str) -> String {
    format!(
        "Based on the following manufacturing events data, answer the question: {question}\n\n\
         Manufacturing Events:\n{context}\n\n\
         Please provide a clear and concise answer that:\n\
         1. Directly addresses the question\n\
         2. Uses specific data points from the events\n\
         3. Includes relevant statistics\n\
         4. Provides practical insights\n\
         5. Cites specific events where applicable\n"
    )
}

pub fn merged_prompt(question: &str, local_answer: &str, bundle: &KnowledgeBundle) -> String {
    let mut knowledge = String::new();
    for snippet in bundle.snippets() {
        let _ = writeln!(knowledge, "{}: {}", snippet.title, snippet.summary);
        if !snippet.url.is_empty() {
            let _ = writeln!(knowledge, "Source: {}", snippet.url);
        }
    }

    format!(
        "Based on the manufacturing data and external knowledge, provide a comprehensive answer to: {question}\n\n\
         Manufacturing Data Analysis:\n{local_answer}\n\n\
         External Knowledge:\n{knowledge}\n\
         Please provide a well-structured answer that:\n\
         1. Starts with a direct answer to the question\n\
         2. Integrates relevant information from external sources\n\
         3. Supports the answer with specific data points\n\
         4. Includes key statistics\n\
         5. Provides practical insights\n\
         6. Cites sources where applicable\n"
    )
}

fn explanation_prompt(score: f64, a: &Event, b: &Event) -> String {
    format!(
        "Two manufacturing events have a cosine similarity of {score:.4}.\n\
         Event 1: {}\n\
         Event 2: {}\n\
         Explain in plain English what this similarity might indicate.\n",
        shopfloor_core::context::event_line(a),
        shopfloor_core::context::event_line(b)
    )
}

fn summary_prompt(context: &str) -> String {
    format!("Summarize the following manufacturing events in plain English:\n{context}")
}

// ============================================================================
// AnswerPipeline
// ============================================================================

pub struct AnswerPipeline {
    index: VectorIndexClient,
    assembler: ContextAssembler,
    cache: Arc<GenerationCache>,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    knowledge: Option<ExternalKnowledge>,
    retrieval: RetrievalConfig,
}

impl AnswerPipeline {
    pub fn new(
        index: VectorIndexClient,
        assembler: ContextAssembler,
        cache: Arc<GenerationCache>,
        embedder: Option<Arc<dyn EmbeddingBackend>>,
        knowledge: Option<ExternalKnowledge>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            assembler,
            cache,
            embedder,
            knowledge,
            retrieval,
        }
    }

    pub fn index(&self) -> &VectorIndexClient {
        &self.index
    }

    pub fn cache(&self) -> &Arc<GenerationCache> {
        &self.cache
    }

    pub fn retrieval(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    /// Answer a free-text question about the stored events.
    ///
    /// Fails only on retrieval errors (`EmptyQuestion`, `NotFound`,
    /// `NoDataAvailable`, storage). Generation and lookup failures degrade
    /// to the fallback message or to the local answer.
    pub async fn answer_question(&self, question: &str, local_only: bool) -> Result<Answer, ShopfloorError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ShopfloorError::EmptyQuestion);
        }

        let gathered = self.gather(question).await?;
        tracing::debug!(
            stage = ?PipelineStage::Ranked,
            events = gathered.events.len(),
            named = gathered.named.len(),
            local_only,
            "Gathered events"
        );

        if local_only {
            return self.answer_locally(&gathered).await;
        }

        let mut context = self.assembler.assemble(&gathered.events, gathered.mode);
        if gathered.mode == ContextMode::Aggregate {
            if let Some(relevant) = self.relevant_section(question).await {
                context.push_str(&relevant);
            }
        }
        tracing::debug!(stage = ?PipelineStage::Contextualized, context_chars = context.len(), "Context assembled");

        let local_answer = self.cache.generate(&question_prompt(&context, question)).await;

        let Some(knowledge) = &self.knowledge else {
            return Ok(Answer::local(local_answer));
        };
        if is_fallback(&local_answer) {
            return Ok(Answer::local(local_answer));
        }

        tracing::debug!(stage = ?PipelineStage::Searching, "Fetching external knowledge");
        let bundle = knowledge.fetch(question).await;
        if bundle.is_empty() {
            return Ok(Answer::local(local_answer));
        }

        let merged = self
            .cache
            .generate(&merged_prompt(question, &local_answer, &bundle))
            .await;
        if is_fallback(&merged) {
            tracing::warn!("Merged answer unavailable, returning local answer");
            return Ok(Answer::local(local_answer));
        }

        tracing::info!(sources = bundle.sources().len(), "Answer augmented with external knowledge");
        Ok(Answer {
            answer: merged,
            sources: bundle.sources(),
            stage: PipelineStage::AnsweredFinal,
        })
    }

    /// Pairwise score between two events plus an explanation.
    pub async fn explain_similarity(
        &self,
        id_a: i64,
        id_b: i64,
        local_only: bool,
    ) -> Result<SimilarityExplanation, ShopfloorError> {
        let similarity = self.index.pairwise_similarity(id_a, id_b).await?;

        let explanation = if local_only {
            local::explain_similarity(similarity)
        } else {
            let a = self.index.require_event(id_a).await?;
            let b = self.index.require_event(id_b).await?;
            self.cache.generate(&explanation_prompt(similarity, &a, &b)).await
        };

        Ok(SimilarityExplanation {
            id_a,
            id_b,
            similarity,
            explanation,
        })
    }

    /// Summary of the most recent `limit` events (default `recent_limit`).
    pub async fn summarize_recent(&self, limit: Option<usize>, local_only: bool) -> Result<RecentSummary, ShopfloorError> {
        let limit = limit
            .unwrap_or(self.retrieval.recent_limit)
            .clamp(1, self.retrieval.recent_limit.max(1));
        let events = self.index.store().recent_events(None, limit).await?;
        if events.is_empty() {
            return Err(ShopfloorError::NoDataAvailable);
        }

        let report = local::event_report(&events);
        let summary = if local_only {
            local::summarize_events(&events)
        } else {
            let context = self.assembler.assemble(&events, ContextMode::Aggregate);
            self.cache.generate(&summary_prompt(&context)).await
        };

        Ok(RecentSummary {
            count: events.len(),
            summary,
            report,
        })
    }

    async fn gather(&self, question: &str) -> Result<Gathered, ShopfloorError> {
        let named = extract_event_ids(question, self.retrieval.max_named_events);

        if named.is_empty() {
            let events = self
                .index
                .store()
                .recent_events(None, self.retrieval.recent_limit)
                .await?;
            if events.is_empty() {
                return Err(ShopfloorError::NoDataAvailable);
            }
            return Ok(Gathered {
                events,
                named,
                closest: None,
                mode: ContextMode::Aggregate,
            });
        }

        let mut events = Vec::with_capacity(named.len() + self.retrieval.neighbour_limit);
        for id in &named {
            events.push(self.index.require_event(*id).await?);
        }

        let mut closest = None;
        if events[0].embedding.is_some() && self.retrieval.neighbour_limit > 0 {
            let neighbours = self
                .index
                .nearest_to(named[0], None, self.retrieval.neighbour_limit)
                .await?;
            closest = neighbours.first().map(|r| (r.event.id, r.score));
            for r in neighbours {
                if !events.iter().any(|e| e.id == r.event.id) {
                    events.push(r.event);
                }
            }
        }

        Ok(Gathered {
            events,
            named,
            closest,
            mode: ContextMode::Focused,
        })
    }

    async fn answer_locally(&self, gathered: &Gathered) -> Result<Answer, ShopfloorError> {
        let answer = match gathered.named.as_slice() {
            [] => local::overview(&gathered.events),
            [only] => {
                let mut text = local::event_report(&gathered.events[..1]);
                if let Some((neighbour, score)) = gathered.closest {
                    text.push_str(&local::explain_neighbour(*only, neighbour, score));
                }
                text
            }
            [a, b, ..] => {
                let score = self.index.pairwise_similarity(*a, *b).await?;
                format!("Event {} and event {}: {}", a, b, local::explain_similarity(score))
            }
        };
        Ok(Answer::local(answer))
    }

    /// Focused rendering of the stored events closest to the question, or
    /// `None` when no embedding is available.
    async fn relevant_section(&self, question: &str) -> Option<String> {
        let embedder = self.embedder.as_ref()?;
        if self.retrieval.relevant_limit == 0 {
            return None;
        }

        let vector = match embedder.embed_query(question).await {
            Ok(Some(v)) => v,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(backend = embedder.name(), error = %e, "Question embedding failed, continuing without relevant events");
                return None;
            }
        };

        match self
            .index
            .nearest_to_vector(&vector, None, self.retrieval.relevant_limit)
            .await
        {
            Ok(results) if !results.is_empty() => {
                let events: Vec<Event> = results.into_iter().map(|r| r.event).collect();
                Some(format!(
                    "\nMost relevant events:\n{}",
                    self.assembler.assemble(&events, ContextMode::Focused)
                ))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Relevant event lookup failed, continuing without it");
                None
            }
        }
    }
}
