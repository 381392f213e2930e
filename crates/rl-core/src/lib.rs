//! # rl-core
//!
//! Incident investigation orchestrator and knowledge retrieval engine for
//! Rootline.
//!
//! An incident enters as an [`IncidentEvent`] and is driven through triage,
//! log analysis, knowledge-grounded diagnosis and remediation by the
//! [`Orchestrator`]. The [`knowledge`] module holds the document store,
//! ingestion pipeline and similarity retrieval that diagnosis draws on.

pub mod error;
pub mod incident;
pub mod investigation;
pub mod knowledge;
pub mod orchestrator;
pub mod prompts;
pub mod repository;
pub mod retry;
pub mod risk;
pub mod schema;
pub mod stages;

pub use error::{OrchestratorError, OrchestratorResult, StageError};
pub use incident::{AlarmNotification, IncidentEvent, IncidentSource, IntakeError};
pub use investigation::{
    AnalysisResult, DiagnosisResult, FailureInfo, InvestigationPhase, InvestigationState,
    KbSource, LogPattern, QueryError, QueryExecution, RemediationAction, RemediationResult,
    Severity, Stage, StageErrorRecord, StageOutput, TriageAction, TriageResult,
};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorConfig, StageSet};
pub use repository::{
    FileInvestigationRepository, InMemoryInvestigationRepository, InvestigationFilter,
    InvestigationRepository, RepositoryError,
};
pub use retry::RetryConfig;
pub use risk::{RiskAssessment, RiskLevel};
pub use stages::{StageHandler, StageReport};

// Knowledge exports
pub use knowledge::{
    AiContext, DocType, DocumentStatus, EmbeddingSpace, KnowledgeDocument, KnowledgeError,
    KnowledgeIngestionService, KnowledgeRetriever, KnowledgeStore, RetrievalEngine,
    RetrievalQuery, RetrievedChunk,
};
