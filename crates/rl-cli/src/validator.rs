//! Configuration validation for Rootline.
//!
//! Checks run before any connector is built so that an investigation never
//! starts against a half-configured environment.

use crate::config::{AppConfig, ENV_ISSUE_TOKEN, ENV_LLM_API_KEY};
use colored::Colorize;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Critical errors that prevent an investigation from running.
    pub errors: Vec<String>,
    /// Warnings that should be addressed but don't block a run.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Prints the validation result to the console.
    pub fn print(&self) {
        if !self.warnings.is_empty() {
            println!();
            println!("{}", "Configuration Warnings:".yellow().bold());
            for warning in &self.warnings {
                println!("  {} {}", "⚠".yellow(), warning);
            }
        }

        if !self.errors.is_empty() {
            println!();
            println!("{}", "Configuration Errors:".red().bold());
            for error in &self.errors {
                println!("  {} {}", "✗".red(), error);
            }
        }

        if self.errors.is_empty() && self.warnings.is_empty() {
            println!("  {} Configuration OK", "✓".green());
        }
    }
}

/// Validates application configuration before a run.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_llm(config, &mut result);
        Self::validate_embedding(config, &mut result);
        Self::validate_logs(config, &mut result);
        Self::validate_issue_tracker(config, &mut result);
        Self::validate_orchestrator(config, &mut result);
        Self::validate_knowledge(config, &mut result);

        result
    }

    fn validate_url(field: &str, url: &str, result: &mut ValidationResult) {
        if url.trim().is_empty() {
            result.add_error(format!("{field} is required"));
        } else if !url.starts_with("http://") && !url.starts_with("https://") {
            result.add_error(format!(
                "{field} '{url}' must start with http:// or https://"
            ));
        }
    }

    fn validate_llm(config: &AppConfig, result: &mut ValidationResult) {
        let llm = &config.llm;
        Self::validate_url("llm.base_url", &llm.base_url, result);

        if llm.model.trim().is_empty() {
            result.add_error("llm.model is required");
        }
        if llm.api_key.is_empty() {
            result.add_warning(format!(
                "LLM API key not configured. Set llm.api_key or the {ENV_LLM_API_KEY} env var."
            ));
        }
        if !(0.0..=2.0).contains(&llm.temperature) {
            result.add_warning(format!(
                "LLM temperature {} is outside the usual range (0.0 - 2.0). \
                 Low values keep structured output stable.",
                llm.temperature
            ));
        }
    }

    fn validate_embedding(config: &AppConfig, result: &mut ValidationResult) {
        let embedding = &config.embedding;
        Self::validate_url("embedding.base_url", &embedding.base_url, result);

        if embedding.model.trim().is_empty() {
            result.add_error("embedding.model is required");
        }
        if embedding.dimension == 0 {
            result.add_error("embedding.dimension must be greater than 0");
        }
    }

    fn validate_logs(config: &AppConfig, result: &mut ValidationResult) {
        Self::validate_url("logs.base_url", &config.logs.base_url, result);
    }

    fn validate_issue_tracker(config: &AppConfig, result: &mut ValidationResult) {
        let Some(tracker) = &config.issue_tracker else {
            result.add_warning(
                "No issue_tracker configured. code_fix remediations will not be handed off.",
            );
            return;
        };

        Self::validate_url("issue_tracker.base_url", &tracker.base_url, result);
        if tracker.owner.trim().is_empty() || tracker.repo.trim().is_empty() {
            result.add_error("issue_tracker.owner and issue_tracker.repo are required");
        }
        if tracker.token.is_empty() {
            result.add_error(format!(
                "issue_tracker.token is required. Set it in config or the {ENV_ISSUE_TOKEN} env var."
            ));
        }
    }

    fn validate_orchestrator(config: &AppConfig, result: &mut ValidationResult) {
        let orchestrator = &config.orchestrator;

        if orchestrator.budget_ms == 0 {
            result.add_error("orchestrator.budget_ms must be greater than 0");
        } else if orchestrator.reasoning_timeout_ms > orchestrator.budget_ms {
            result.add_warning(format!(
                "orchestrator.reasoning_timeout_ms ({}) exceeds the investigation budget ({} ms)",
                orchestrator.reasoning_timeout_ms, orchestrator.budget_ms
            ));
        }
        if orchestrator.initial_backoff_ms > orchestrator.max_backoff_ms {
            result.add_warning(
                "orchestrator.initial_backoff_ms exceeds max_backoff_ms; every retry waits max_backoff_ms",
            );
        }

        let analysis = &orchestrator.analysis;
        if analysis.concurrency == 0 {
            result.add_error("orchestrator.analysis.concurrency must be greater than 0");
        }
        if analysis.max_queries == 0 {
            result.add_error("orchestrator.analysis.max_queries must be greater than 0");
        }

        let diagnosis = &orchestrator.diagnosis;
        if !(0.0..=1.0).contains(&diagnosis.threshold) {
            result.add_error(format!(
                "orchestrator.diagnosis.threshold {} must be within [0, 1]",
                diagnosis.threshold
            ));
        }
        if diagnosis.top_k == 0 {
            result.add_error("orchestrator.diagnosis.top_k must be greater than 0");
        }
        if diagnosis.doc_types.is_empty() {
            result.add_error("orchestrator.diagnosis.doc_types must not be empty");
        }
    }

    fn validate_knowledge(config: &AppConfig, result: &mut ValidationResult) {
        let knowledge = &config.knowledge;

        if let Err(e) = knowledge.ingestion.chunking.validate() {
            result.add_error(format!("knowledge.ingestion.chunking: {e}"));
        }
        if knowledge.ingestion.max_embedding_chars == 0 {
            result.add_error("knowledge.ingestion.max_embedding_chars must be greater than 0");
        }

        match &knowledge.manifest {
            Some(path) if !path.exists() => {
                result.add_error(format!(
                    "Knowledge manifest not found: {}",
                    path.display()
                ));
            }
            Some(_) => {}
            None => {
                result.add_warning(
                    "No knowledge.manifest configured. Diagnosis will run without knowledge.",
                );
            }
        }
    }
}
