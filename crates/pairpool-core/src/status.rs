//! Soft validation events.
//!
//! Anomalies such as partial upscaling intervals are recorded as events and
//! attached to pool metadata instead of aborting pool creation.

use std::fmt;
use tracing::{debug, warn};

/// Severity of a validation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Stage of pool creation that raised an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EvaluationStage {
    Retrieval,
    Rescaling,
    Pairing,
    CrossPairing,
    Generation,
    Assembly,
}

impl fmt::Display for EvaluationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvaluationStage::Retrieval => "retrieval",
            EvaluationStage::Rescaling => "rescaling",
            EvaluationStage::Pairing => "pairing",
            EvaluationStage::CrossPairing => "cross-pairing",
            EvaluationStage::Generation => "generation",
            EvaluationStage::Assembly => "assembly",
        };
        f.write_str(name)
    }
}

/// A soft anomaly encountered while building a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationEvent {
    pub level: StatusLevel,
    pub stage: EvaluationStage,
    pub message: String,
}

impl ValidationEvent {
    pub fn new(level: StatusLevel, stage: EvaluationStage, message: impl Into<String>) -> Self {
        Self {
            level,
            stage,
            message: message.into(),
        }
    }

    pub fn debug(stage: EvaluationStage, message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Debug, stage, message)
    }

    pub fn info(stage: EvaluationStage, message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Info, stage, message)
    }

    pub fn warn(stage: EvaluationStage, message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Warn, stage, message)
    }
}

impl fmt::Display for ValidationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} during {}: {}", self.level, self.stage, self.message)
    }
}

/// Log a batch of events raised for one subject.
///
/// Emits one WARN summary when any warnings are present and the full detail
/// at DEBUG.
pub fn log_validation_events(subject: &str, events: &[ValidationEvent]) {
    if events.is_empty() {
        return;
    }

    let warnings: Vec<&ValidationEvent> = events
        .iter()
        .filter(|e| e.level >= StatusLevel::Warn)
        .collect();
    if !warnings.is_empty() {
        warn!(
            subject,
            n_warnings = warnings.len(),
            first = %warnings[0],
            "validation warnings encountered"
        );
    }

    for event in events {
        debug!(subject, stage = %event.stage, level = ?event.level, "{}", event.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(StatusLevel::Debug < StatusLevel::Warn);
        assert!(StatusLevel::Warn < StatusLevel::Error);
    }

    #[test]
    fn test_display() {
        let event = ValidationEvent::warn(EvaluationStage::Rescaling, "skipped 2 of 4 intervals");
        assert_eq!(
            format!("{}", event),
            "Warn during rescaling: skipped 2 of 4 intervals"
        );
    }

    #[test]
    fn test_logging_does_not_panic_without_subscriber() {
        let events = vec![
            ValidationEvent::debug(EvaluationStage::Rescaling, "one value"),
            ValidationEvent::warn(EvaluationStage::Rescaling, "skipped"),
        ];
        log_validation_events("A", &events);
        log_validation_events("A", &[]);
    }
}
