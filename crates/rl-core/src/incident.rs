//! Incident intake.
//!
//! An [`IncidentEvent`] is the normalized input of an investigation. It is
//! built from a CloudWatch alarm, a webhook payload or a free-text chat
//! question, and gets its `incident_id` at intake.

use chrono::{DateTime, Duration, Utc};
use rl_connectors::TimeRange;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// How far back from the alarm transition the log search starts.
pub const DEFAULT_ALARM_LOOKBACK_MINUTES: i64 = 30;

/// How far back a chat question searches when no range is given.
pub const DEFAULT_CHAT_LOOKBACK_MINUTES: i64 = 60;

/// Errors raised while normalizing incoming events.
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Where the incident came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSource {
    Chat,
    CloudwatchAlarm,
    Webhook,
}

impl IncidentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentSource::Chat => "chat",
            IncidentSource::CloudwatchAlarm => "cloudwatch_alarm",
            IncidentSource::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for IncidentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized input of one investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEvent {
    /// Stable across re-analysis of the same incident.
    pub incident_id: Uuid,
    pub service: String,
    pub source: IncidentSource,
    pub description: String,
    /// Log groups the Analysis stage may query.
    #[serde(default)]
    pub candidate_log_groups: Vec<String>,
    pub time_range: TimeRange,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl IncidentEvent {
    /// Creates an event with a fresh incident id.
    pub fn new(
        service: impl Into<String>,
        source: IncidentSource,
        description: impl Into<String>,
        time_range: TimeRange,
    ) -> Self {
        Self {
            incident_id: Uuid::new_v4(),
            service: service.into(),
            source,
            description: description.into(),
            candidate_log_groups: Vec::new(),
            time_range,
            received_at: Utc::now(),
        }
    }

    /// Builds an event from a free-text question about a service.
    pub fn from_chat(service: impl Into<String>, question: impl Into<String>) -> Self {
        Self::new(
            service,
            IncidentSource::Chat,
            question,
            TimeRange::last_minutes(DEFAULT_CHAT_LOOKBACK_MINUTES),
        )
    }

    /// Builds an event from a CloudWatch alarm state-change payload.
    pub fn from_alarm(alarm: &AlarmNotification) -> Result<Self, IntakeError> {
        if alarm.alarm_name.trim().is_empty() {
            return Err(IntakeError::MissingField("AlarmName"));
        }

        let service = alarm
            .service_dimension()
            .map(str::to_string)
            .unwrap_or_else(|| alarm.alarm_name.to_lowercase());

        let changed_at = match &alarm.state_change_time {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| IntakeError::InvalidField {
                    field: "StateChangeTime",
                    reason: e.to_string(),
                })?,
            None => Utc::now(),
        };

        let mut description = alarm.alarm_name.clone();
        if let Some(reason) = alarm.new_state_reason.as_deref().filter(|r| !r.is_empty()) {
            description = format!("{}: {}", description, reason);
        }
        if let Some(extra) = alarm.alarm_description.as_deref().filter(|d| !d.is_empty()) {
            description = format!("{} ({})", description, extra);
        }

        let time_range = TimeRange::new(
            changed_at - Duration::minutes(DEFAULT_ALARM_LOOKBACK_MINUTES),
            changed_at + Duration::minutes(5),
        );

        Ok(Self::new(
            service,
            IncidentSource::CloudwatchAlarm,
            description,
            time_range,
        ))
    }

    /// Sets the candidate log groups.
    pub fn with_log_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidate_log_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Reuses an existing incident id, for re-analysis.
    pub fn with_incident_id(mut self, incident_id: Uuid) -> Self {
        self.incident_id = incident_id;
        self
    }

    /// Validates fields that every stage relies on.
    pub fn validate(&self) -> Result<(), IntakeError> {
        if self.service.trim().is_empty() {
            return Err(IntakeError::MissingField("service"));
        }
        if self.description.trim().is_empty() {
            return Err(IntakeError::MissingField("description"));
        }
        if self.time_range.start > self.time_range.end {
            return Err(IntakeError::InvalidField {
                field: "time_range",
                reason: "start is after end".to_string(),
            });
        }
        Ok(())
    }
}

/// Subset of the CloudWatch alarm notification we consume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AlarmNotification {
    pub alarm_name: String,
    #[serde(default)]
    pub alarm_description: Option<String>,
    #[serde(default)]
    pub new_state_reason: Option<String>,
    #[serde(default)]
    pub state_change_time: Option<String>,
    #[serde(default)]
    pub trigger: Option<AlarmTrigger>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AlarmTrigger {
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<AlarmDimension>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmDimension {
    pub name: String,
    pub value: String,
}

impl AlarmNotification {
    /// Value of the first service-identifying dimension, if present.
    pub fn service_dimension(&self) -> Option<&str> {
        const SERVICE_KEYS: [&str; 3] = ["servicename", "service", "functionname"];
        let trigger = self.trigger.as_ref()?;
        SERVICE_KEYS.iter().find_map(|key| {
            trigger
                .dimensions
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(key))
                .map(|d| d.value.as_str())
        })
    }
}
