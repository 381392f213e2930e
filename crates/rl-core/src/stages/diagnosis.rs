//! Diagnosis: knowledge-grounded root cause determination.
//!
//! Retrieval is non-essential. When it keeps failing the stage degrades to a
//! diagnosis without knowledge and says so in `knowledge_note`. The reasoning
//! call is essential.

use super::{call_reasoning, require, StageHandler, StageOutcome, StageReport};
use crate::error::StageError;
use crate::investigation::{
    AnalysisResult, DiagnosisResult, InvestigationState, KbSource, Stage, StageOutput,
};
use crate::knowledge::retrieval::{KnowledgeRetriever, RetrievalQuery, RetrievedChunk};
use crate::knowledge::{AiContext, DocType};
use crate::prompts::{DIAGNOSIS_TEMPLATE, DIAGNOSIS_TEMPLATE_ID, NO_KNOWLEDGE_CONTEXT, SYSTEM_PROMPT};
use crate::schema::{parse_diagnosis, CitationWire};
use async_trait::async_trait;
use rl_connectors::{ReasoningClient, ReasoningRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_timeout_ms: u64,
    #[serde(default = "default_doc_types")]
    pub doc_types: Vec<DocType>,
}

fn default_top_k() -> usize {
    3
}

fn default_threshold() -> f32 {
    0.7
}

fn default_retrieval_timeout_ms() -> u64 {
    20_000
}

fn default_doc_types() -> Vec<DocType> {
    vec![DocType::Runbook, DocType::Technical, DocType::PreviousIncident]
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: default_threshold(),
            retrieval_timeout_ms: default_retrieval_timeout_ms(),
            doc_types: default_doc_types(),
        }
    }
}

/// Statement attached to a diagnosis made without organizational knowledge.
pub fn no_knowledge_note(service: &str) -> String {
    format!("No relevant knowledge found for {}", service)
}

pub struct DiagnosisStage {
    reasoning: Arc<dyn ReasoningClient>,
    retriever: Arc<dyn KnowledgeRetriever>,
    reasoning_timeout: Duration,
    config: DiagnosisConfig,
}

impl DiagnosisStage {
    pub fn new(
        reasoning: Arc<dyn ReasoningClient>,
        retriever: Arc<dyn KnowledgeRetriever>,
        reasoning_timeout: Duration,
    ) -> Self {
        Self {
            reasoning,
            retriever,
            reasoning_timeout,
            config: DiagnosisConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DiagnosisConfig) -> Self {
        self.config = config;
        self
    }

    async fn retrieve(
        &self,
        state: &InvestigationState,
        analysis: &AnalysisResult,
    ) -> Result<Vec<RetrievedChunk>, StageError> {
        let incident = &state.incident;
        let query = RetrievalQuery::new(
            format!("{}\n{}", incident.description, analysis.summary()),
            &incident.service,
            AiContext::Triage,
        )
        .with_doc_types(self.config.doc_types.clone())
        .with_top_k(self.config.top_k)
        .with_threshold(self.config.threshold);

        let timeout = Duration::from_millis(self.config.retrieval_timeout_ms);
        match tokio::time::timeout(timeout, self.retriever.retrieve(&query)).await {
            Ok(Ok(chunks)) => Ok(chunks),
            Ok(Err(e)) => Err(StageError::new(e.kind(), format!("knowledge retrieval failed: {}", e))
                .non_essential()),
            Err(_) => Err(StageError::timeout(format!(
                "knowledge retrieval timed out after {}ms",
                self.config.retrieval_timeout_ms
            ))
            .non_essential()),
        }
    }

    /// Runs the reasoning call over the given knowledge and filters the reply.
    async fn diagnose(
        &self,
        state: &InvestigationState,
        analysis: &AnalysisResult,
        chunks: &[RetrievedChunk],
    ) -> Result<DiagnosisResult, StageError> {
        let incident = &state.incident;
        let request = ReasoningRequest::new(DIAGNOSIS_TEMPLATE_ID, SYSTEM_PROMPT, DIAGNOSIS_TEMPLATE)
            .with_variable("service", &incident.service)
            .with_variable("description", &incident.description)
            .with_variable("analysis", analysis.summary())
            .with_variable("knowledge", render_knowledge(chunks));

        let reply = call_reasoning(self.reasoning.as_ref(), request, self.reasoning_timeout).await?;
        let draft = parse_diagnosis(&reply)?;

        let kb_sources = resolve_citations(&draft.kb_sources, chunks);
        let mut seen = HashSet::new();
        let evidence_refs: Vec<usize> = draft
            .evidence_refs
            .into_iter()
            .filter(|i| *i < analysis.patterns.len() && seen.insert(*i))
            .collect();

        Ok(DiagnosisResult {
            root_cause: draft.root_cause,
            confidence: draft.confidence,
            kb_sources,
            evidence_refs,
            conflicts: draft.conflicts,
            knowledge_note: chunks
                .is_empty()
                .then(|| no_knowledge_note(&incident.service)),
        })
    }
}

#[async_trait]
impl StageHandler for DiagnosisStage {
    fn stage(&self) -> Stage {
        Stage::Diagnosis
    }

    #[instrument(skip(self, state), fields(incident_id = %state.incident_id()))]
    async fn handle(&self, state: &InvestigationState) -> StageOutcome {
        let analysis = require(&state.analysis, "analysis")?;
        let chunks = self.retrieve(state, analysis).await?;
        info!(retrieved = chunks.len(), "Knowledge retrieved");

        let result = self.diagnose(state, analysis, &chunks).await?;
        info!(
            confidence = result.confidence,
            sources = result.kb_sources.len(),
            "Diagnosis complete"
        );
        Ok(StageReport::new(StageOutput::Diagnosis(result)))
    }

    async fn degrade(&self, state: &InvestigationState, error: &StageError) -> StageOutcome {
        if error.essential {
            return Err(error.clone());
        }
        warn!(error = %error, "Diagnosing without organizational knowledge");
        let analysis = require(&state.analysis, "analysis")?;
        let result = self.diagnose(state, analysis, &[]).await?;
        Ok(StageReport::new(StageOutput::Diagnosis(result)))
    }
}

fn render_knowledge(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return NO_KNOWLEDGE_CONTEXT.to_string();
    }
    let mut out = String::new();
    for chunk in chunks {
        let _ = writeln!(
            out,
            "[document_id: {}] section: {} (similarity {:.2}, {})\n{}\n",
            chunk.document_id,
            chunk.section_title.as_deref().unwrap_or("-"),
            chunk.similarity,
            chunk.doc_type.as_str(),
            chunk.content.trim()
        );
    }
    out
}

/// Keeps only citations of retrieved documents, one per (document, section).
fn resolve_citations(citations: &[CitationWire], chunks: &[RetrievedChunk]) -> Vec<KbSource> {
    let mut sources: Vec<KbSource> = Vec::new();
    for citation in citations {
        let Ok(document_id) = Uuid::parse_str(citation.document_id.trim()) else {
            warn!(document_id = %citation.document_id, "Dropping malformed citation");
            continue;
        };
        let cited_section = citation.section_title.as_deref().map(str::trim);

        // the cited section when it was retrieved, else the best chunk of the document
        let best = chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .filter(|c| cited_section.is_none() || c.section_title.as_deref() == cited_section)
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
            .or_else(|| {
                chunks
                    .iter()
                    .filter(|c| c.document_id == document_id)
                    .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
            });

        let Some(chunk) = best else {
            warn!(%document_id, "Dropping citation of a document that was not retrieved");
            continue;
        };
        let source = KbSource {
            document_id,
            section_title: chunk.section_title.clone(),
            similarity: chunk.similarity,
        };
        if !sources
            .iter()
            .any(|s| s.document_id == source.document_id && s.section_title == source.section_title)
        {
            sources.push(source);
        }
    }
    sources
}
