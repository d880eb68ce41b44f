use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Object not found in store: {0}")]
    ObjectNotFound(String),

    #[error("Ref not found: {0}")]
    RefNotFound(String),

    #[error(
        "Acknowledge of '{bookmark}' rejected: expected {}, found {}",
        display_target(expected),
        display_target(found)
    )]
    AcknowledgeRejected {
        bookmark: String,
        expected: Option<String>,
        found: Option<String>,
    },

    #[error("Content not found at either diff endpoint: {0}")]
    ContentNotFound(String),

    #[error("Calendar parse error at line {line}: {message}")]
    CalendarParse { line: usize, message: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Configuration write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}

impl Error {
    /// True for failures of the underlying store or filesystem, as opposed to
    /// protocol-level outcomes such as a rejected acknowledge.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_)
                | Error::Io(_)
                | Error::Serialization(_)
                | Error::ObjectNotFound(_)
        )
    }
}

fn display_target(target: &Option<String>) -> &str {
    target.as_deref().unwrap_or("<absent>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_message_names_both_sides() {
        let err = Error::AcknowledgeRejected {
            bookmark: "acknowledged".to_string(),
            expected: None,
            found: Some("abc123".to_string()),
        };

        let message = err.to_string();
        assert!(message.contains("<absent>"));
        assert!(message.contains("abc123"));
        assert!(!err.is_store_unavailable());
    }

    #[test]
    fn test_io_is_store_unavailable() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        assert!(err.is_store_unavailable());
    }
}
