/// Graft Error Types
#[derive(Debug, thiserror::Error)]
pub enum GraftError {
    /// Referenced branch is not in the branch graph
    #[error("Branch {0} is not known to graft")]
    NoBranch(String),

    /// Operation needs a checked-out branch
    #[error("Not on a branch (HEAD is detached)")]
    Detached,

    /// Operation would violate a graph invariant
    #[error("Preconditions failed: {0}")]
    PreconditionsFailed(String),

    /// A rebase stopped on a conflict and was left for the user to resolve
    #[error("Hit a rebase conflict on {0}")]
    RebaseConflict(String),

    /// The user declined to continue
    #[error("Aborted")]
    Killed,

    /// libgit2 errors
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// Failures of the git executable
    #[error("git {command} failed: {stderr}")]
    GitCommand { command: String, stderr: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Code-review service errors
    #[error("Review service error: {0}")]
    Review(String),
}

impl GraftError {
    pub fn no_branch<S: Into<String>>(branch: S) -> Self {
        GraftError::NoBranch(branch.into())
    }

    pub fn preconditions<S: Into<String>>(msg: S) -> Self {
        GraftError::PreconditionsFailed(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        GraftError::Config(msg.into())
    }

    pub fn not_initialized() -> Self {
        GraftError::config("Repository is not initialized for graft. Run 'gf init' first.")
    }

    pub fn git_command<C: Into<String>, S: Into<String>>(command: C, stderr: S) -> Self {
        GraftError::GitCommand {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    pub fn review_api(status: u16, message: String) -> Self {
        GraftError::Review(format!("API error: {status} - {message}"))
    }

    pub fn review<S: Into<String>>(msg: S) -> Self {
        GraftError::Review(msg.into())
    }

    /// Whether this error is an expected stop rather than a failure
    pub fn is_expected_stop(&self) -> bool {
        matches!(self, GraftError::Killed | GraftError::RebaseConflict(_))
    }
}

impl From<config::ConfigError> for GraftError {
    fn from(e: config::ConfigError) -> Self {
        GraftError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GraftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_name_the_branch() {
        let err = GraftError::no_branch("feature/login");
        assert!(err.to_string().contains("feature/login"));

        let err = GraftError::RebaseConflict("feature/login".to_string());
        assert!(err.to_string().contains("feature/login"));
    }

    #[test]
    fn test_expected_stops() {
        assert!(GraftError::Killed.is_expected_stop());
        assert!(GraftError::RebaseConflict("a".to_string()).is_expected_stop());
        assert!(!GraftError::Detached.is_expected_stop());
        assert!(!GraftError::preconditions("cycle").is_expected_stop());
    }
}
