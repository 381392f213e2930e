//! Incident input files.
//!
//! `--incident` accepts three JSON shapes: a full `IncidentEvent`, a CloudWatch
//! alarm notification (recognised by `AlarmName`), or a chat question
//! (`{"service": ..., "question": ...}`).

use anyhow::{bail, Context, Result};
use rl_core::{AlarmNotification, IncidentEvent};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct ChatQuestion {
    service: String,
    question: String,
    #[serde(default)]
    log_groups: Vec<String>,
}

/// Loads an incident from a JSON file.
pub fn load_incident(path: &Path) -> Result<IncidentEvent> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read incident file: {}", path.display()))?;
    parse_incident(&contents)
        .with_context(|| format!("Failed to parse incident file: {}", path.display()))
}

pub fn parse_incident(contents: &str) -> Result<IncidentEvent> {
    let value: serde_json::Value = serde_json::from_str(contents)?;
    let Some(object) = value.as_object() else {
        bail!("incident must be a JSON object");
    };

    if object.contains_key("AlarmName") {
        let alarm: AlarmNotification = serde_json::from_value(value)?;
        return Ok(IncidentEvent::from_alarm(&alarm)?);
    }

    if object.contains_key("question") {
        let chat: ChatQuestion = serde_json::from_value(value)?;
        return Ok(IncidentEvent::from_chat(chat.service, chat.question)
            .with_log_groups(chat.log_groups));
    }

    Ok(serde_json::from_value(value)?)
}

/// Appends log groups given on the command line, skipping duplicates.
pub fn add_log_groups(mut incident: IncidentEvent, extra: &[String]) -> IncidentEvent {
    for group in extra {
        if !incident.candidate_log_groups.contains(group) {
            incident.candidate_log_groups.push(group.clone());
        }
    }
    incident
}
