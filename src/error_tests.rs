//! Tests for error types

#[cfg(test)]
mod tests {
    use crate::error::EngineError;

    #[test]
    fn test_error_messages() {
        let err = EngineError::MemberTraining {
            kind: "random_forest".to_string(),
            reason: "n_estimators must be positive".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Training failed for random_forest: n_estimators must be positive"
        );

        let err = EngineError::InsufficientData { required: 10, actual: 3 };
        assert_eq!(err.to_string(), "Insufficient data: need at least 10 samples, got 3");
    }

    #[test]
    fn test_unavailable_classification() {
        assert!(EngineError::FeatureUnavailable("no price".into()).is_unavailable());
        assert!(!EngineError::NoMembersTrained.is_unavailable());
        assert!(!EngineError::Persistence("disk full".into()).is_unavailable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "metadata.json");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
        assert!(err.to_string().contains("metadata.json"));
    }
}
