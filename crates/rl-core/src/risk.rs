//! Approval gating for remediation proposals.
//!
//! The table below is owned by code. Model output can pick an action type
//! but never decides whether a human has to approve it.

use crate::investigation::RemediationAction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk and approval requirement of one action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub requires_approval: bool,
}

/// Looks up an action type in the fixed risk table.
pub fn assess(action: RemediationAction) -> RiskAssessment {
    let (level, requires_approval) = match action {
        RemediationAction::ScaleResources => (RiskLevel::Low, false),
        RemediationAction::RestartService => (RiskLevel::Medium, true),
        RemediationAction::ManualIntervention => (RiskLevel::Medium, true),
        RemediationAction::Rollback => (RiskLevel::High, true),
        RemediationAction::CodeFix => (RiskLevel::High, true),
    };
    RiskAssessment {
        level,
        requires_approval,
    }
}
