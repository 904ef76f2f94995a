use thiserror::Error;

pub type Result<T> = std::result::Result<T, CollageError>;

/// Every failure a collage run can surface.
///
/// Per-photo (`Decode`) and per-scenario (`Generation`) failures are contained by the engine and
/// turned into degraded results; only `MissingCredential`, `BatchSize` and `Run` end a run.
#[derive(Debug, Error)]
pub enum CollageError {
    #[error("no API credential available (set GEMINI_API_KEY or GOOGLE_API_KEY)")]
    MissingCredential,
    #[error("could not decode {name}: {message}")]
    Decode { name: String, message: String },
    #[error("scenario {scenario_index} failed: {message}")]
    Generation {
        scenario_index: usize,
        message: String,
    },
    #[error("expected between {min} and {max} photos, got {count}")]
    BatchSize { count: usize, min: usize, max: usize },
    #[error("collage run failed: {0}")]
    Run(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CollageError {
    pub fn kind(&self) -> &'static str {
        match self {
            CollageError::MissingCredential => "missing_credential",
            CollageError::Decode { .. } => "decode",
            CollageError::Generation { .. } => "generation",
            CollageError::BatchSize { .. } => "batch_size",
            CollageError::Run(_) => "run",
            CollageError::Io(_) => "io",
            CollageError::Json(_) => "json",
        }
    }

    /// True for errors that end the whole run rather than degrading one unit of work.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CollageError::Decode { .. } | CollageError::Generation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::CollageError;

    #[test]
    fn local_failures_are_not_fatal() {
        let decode = CollageError::Decode {
            name: "a.jpg".to_string(),
            message: "bad header".to_string(),
        };
        let generation = CollageError::Generation {
            scenario_index: 3,
            message: "quota".to_string(),
        };
        assert!(!decode.is_fatal());
        assert!(!generation.is_fatal());
        assert!(CollageError::MissingCredential.is_fatal());
        assert!(CollageError::Run("boom".to_string()).is_fatal());
    }

    #[test]
    fn messages_name_the_failing_unit() {
        let err = CollageError::Generation {
            scenario_index: 7,
            message: "no image returned".to_string(),
        };
        assert_eq!(err.to_string(), "scenario 7 failed: no image returned");
        assert_eq!(err.kind(), "generation");

        let err = CollageError::BatchSize {
            count: 2,
            min: 3,
            max: 10,
        };
        assert_eq!(err.to_string(), "expected between 3 and 10 photos, got 2");
    }
}
