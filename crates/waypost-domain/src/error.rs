use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Batch too large: {submitted} points, limit {limit}")]
    BatchTooLarge { submitted: usize, limit: usize },

    #[error("Reading not found: {0}")]
    ReadingNotFound(String),

    #[error("Queue storage error: {0}")]
    QueueStorage(String),

    #[error("Queue corruption detected: {0}")]
    QueueCorruption(String),

    #[error("Policy fetch error: {0}")]
    PolicyFetch(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;

/// Runs garde validation on a request struct and flattens the report into a
/// single `ValidationError`, one `field: message` clause per offense.
pub fn validate_input<T>(input: &T) -> DomainResult<()>
where
    T: garde::Validate,
    T::Context: Default,
{
    match input.validate() {
        Ok(()) => Ok(()),
        Err(report) => {
            let clauses: Vec<String> = report
                .iter()
                .map(|(path, error)| {
                    let path = path.to_string();
                    if path.is_empty() {
                        error.message().to_string()
                    } else {
                        format!("{path}: {}", error.message())
                    }
                })
                .collect();
            Err(DomainError::ValidationError(clauses.join("; ")))
        }
    }
}
