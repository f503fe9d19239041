use crate::core::types::ScanPhase;

/// Failure of a scan run. Every variant is fatal to the current run; the
/// caller decides whether to `restart`.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Rejected options (duplicate listener tags, unknown scan mode, ...)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Chain query collaborator failed
    #[error(transparent)]
    Chain(anyhow::Error),

    /// Data sink collaborator failed
    #[error(transparent)]
    Sink(anyhow::Error),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ScanError {
    pub fn config(message: impl Into<String>) -> Self {
        ScanError::Configuration(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        ScanError::InvariantViolation(message.into())
    }

    pub fn invalid_transition(from: ScanPhase, to: ScanPhase) -> Self {
        ScanError::InvariantViolation(format!("invalid phase transition {from} -> {to}"))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Configuration(_) => "configuration",
            ScanError::Chain(_) => "chain",
            ScanError::Sink(_) => "sink",
            ScanError::InvariantViolation(_) => "invariant",
        }
    }
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_errors_keep_their_message() {
        let err = ScanError::Chain(anyhow::anyhow!("node unreachable"));
        assert_eq!(err.to_string(), "node unreachable");
        assert_eq!(err.kind(), "chain");
    }

    #[test]
    fn invalid_transition_names_both_phases() {
        let err = ScanError::invalid_transition(ScanPhase::Init, ScanPhase::Loop);
        assert_eq!(
            err.to_string(),
            "invariant violation: invalid phase transition init -> loop"
        );
    }
}
