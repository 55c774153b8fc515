//! Command implementations

pub mod receive;
pub mod relay_cmd;
pub mod send;
pub mod session;

use thiserror::Error;

/// Command errors, classified for the exit-code contract
#[derive(Error, Debug)]
pub enum CliError {
    /// Bad input: exit code 1
    #[error("{0}")]
    User(String),

    /// Connection problems: exit code 2
    #[error("{0}")]
    Transport(String),

    /// Authentication failure: exit code 3
    #[error("authentication failed")]
    Auth,
}

impl CliError {
    /// Map to the process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::User(_) => crate::exit_codes::USER_ERROR,
            CliError::Transport(_) => crate::exit_codes::TRANSPORT_FAILURE,
            CliError::Auth => crate::exit_codes::AUTH_FAILURE,
        }
    }
}

impl From<tallow_net::NetworkError> for CliError {
    fn from(e: tallow_net::NetworkError) -> Self {
        CliError::Transport(e.to_string())
    }
}

impl From<tallow_protocol::ProtocolError> for CliError {
    fn from(e: tallow_protocol::ProtocolError) -> Self {
        use tallow_crypto::CryptoError;
        use tallow_protocol::ProtocolError;
        match &e {
            ProtocolError::Crypto(CryptoError::PakeFailure)
            | ProtocolError::Crypto(CryptoError::SessionAborted)
            | ProtocolError::Crypto(CryptoError::Verification(_)) => CliError::Auth,
            ProtocolError::Validation(msg) => CliError::User(msg.clone()),
            _ => CliError::Transport(e.to_string()),
        }
    }
}

impl From<tallow_store::StoreError> for CliError {
    fn from(e: tallow_store::StoreError) -> Self {
        CliError::Transport(format!("storage: {}", e))
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Transport(format!("i/o: {}", e))
    }
}
