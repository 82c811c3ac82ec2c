use taskq_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Server error: {message}")]
    Server { message: String, transient: bool },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BrokerError {
    /// Connectivity problems and timeouts may succeed when retried
    pub fn is_transient(&self) -> bool {
        match self {
            BrokerError::Connection(_) | BrokerError::IoError(_) => true,
            BrokerError::Protocol(ProtocolError::IoError(_)) => true,
            BrokerError::Server { transient, .. } => *transient,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BrokerError::Connection("refused".to_string()).is_transient());
        assert!(BrokerError::Server {
            message: "busy".to_string(),
            transient: true
        }
        .is_transient());
        assert!(!BrokerError::UnexpectedResponse("ack".to_string()).is_transient());
        assert!(!BrokerError::Protocol(ProtocolError::EmptyFrame).is_transient());
    }
}
