//! Error types for the voice session core

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while establishing or running a voice session
///
/// Tool failures are deliberately absent: a failing tool reports a
/// structured failure record back to the remote service and never
/// surfaces as a local `Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Credential issuer unreachable or malformed response
    #[error("Credential error: {0}")]
    Credential(String),

    /// Connection, offer or answer failure during session setup
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Malformed inbound JSON or malformed tool arguments
    #[error("Protocol parse error: {0}")]
    ProtocolParse(String),

    /// Control data channel error
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Local or remote media track error
    #[error("Media track error: {0}")]
    MediaTrack(String),

    /// A session is already active; stop it before starting another
    #[error("A session is already active")]
    AlreadyActive,

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error aborts `start()` entirely
    pub fn is_fatal_to_start(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_)
                | Error::Credential(_)
                | Error::Negotiation(_)
                | Error::AlreadyActive
                | Error::WebRtc(_)
        )
    }

    /// Check if this error is recovered locally without ending the session
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::ProtocolParse(_))
    }

    /// Check if this error relates to the credential exchange
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Error::Credential(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Credential("issuer returned 500".to_string());
        assert_eq!(err.to_string(), "Credential error: issuer returned 500");
    }

    #[test]
    fn test_error_is_fatal_to_start() {
        assert!(Error::Credential("test".to_string()).is_fatal_to_start());
        assert!(Error::Negotiation("test".to_string()).is_fatal_to_start());
        assert!(Error::AlreadyActive.is_fatal_to_start());
        assert!(!Error::ProtocolParse("test".to_string()).is_fatal_to_start());
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::ProtocolParse("bad json".to_string()).is_recoverable());
        assert!(!Error::Negotiation("test".to_string()).is_recoverable());
    }

    #[test]
    fn test_error_is_credential_error() {
        assert!(Error::Credential("test".to_string()).is_credential_error());
        assert!(!Error::DataChannel("test".to_string()).is_credential_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }
}
