//! Error types for the EPP synchronization core
//!
//! Every failure a conversation can end with is an [`Error`]. Registry
//! replies with a non-success result code are mapped onto
//! [`Error::Command`] through [`Error::from_result`]; everything that never
//! reached the registry (connectivity, bad payloads, local validation)
//! carries code `-1`.

use std::fmt;

use thiserror::Error;

/// Result type alias for EPP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Code reported by errors that did not come from a registry reply
pub const NON_EPP_CODE: i32 = -1;

/// EPP result codes (RFC 5730, section 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    SuccessActionPending,
    SuccessNoMessages,
    SuccessAckToDequeue,
    SuccessEndingSession,
    UnknownCommand,
    CommandSyntaxError,
    CommandUseError,
    RequiredParameterMissing,
    ParameterValueRangeError,
    ParameterValueSyntaxError,
    UnimplementedProtocolVersion,
    UnimplementedCommand,
    UnimplementedOption,
    UnimplementedExtension,
    BillingFailure,
    ObjectNotEligibleForRenewal,
    ObjectNotEligibleForTransfer,
    AuthenticationError,
    AuthorizationError,
    InvalidAuthorizationInformation,
    ObjectPendingTransfer,
    ObjectNotPendingTransfer,
    ObjectExists,
    ObjectDoesNotExist,
    ObjectStatusProhibitsOperation,
    ObjectAssociationProhibitsOperation,
    ParameterValuePolicyError,
    UnimplementedObjectService,
    DataManagementPolicyViolation,
    CommandFailed,
    CommandFailedServerClosingConnection,
    AuthenticationErrorServerClosingConnection,
    SessionLimitExceededServerClosingConnection,
    /// A code outside of RFC 5730
    Other(u16),
}

impl ResultCode {
    /// Map a numeric code onto the enumeration
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => Self::Success,
            1001 => Self::SuccessActionPending,
            1300 => Self::SuccessNoMessages,
            1301 => Self::SuccessAckToDequeue,
            1500 => Self::SuccessEndingSession,
            2000 => Self::UnknownCommand,
            2001 => Self::CommandSyntaxError,
            2002 => Self::CommandUseError,
            2003 => Self::RequiredParameterMissing,
            2004 => Self::ParameterValueRangeError,
            2005 => Self::ParameterValueSyntaxError,
            2100 => Self::UnimplementedProtocolVersion,
            2101 => Self::UnimplementedCommand,
            2102 => Self::UnimplementedOption,
            2103 => Self::UnimplementedExtension,
            2104 => Self::BillingFailure,
            2105 => Self::ObjectNotEligibleForRenewal,
            2106 => Self::ObjectNotEligibleForTransfer,
            2200 => Self::AuthenticationError,
            2201 => Self::AuthorizationError,
            2202 => Self::InvalidAuthorizationInformation,
            2300 => Self::ObjectPendingTransfer,
            2301 => Self::ObjectNotPendingTransfer,
            2302 => Self::ObjectExists,
            2303 => Self::ObjectDoesNotExist,
            2304 => Self::ObjectStatusProhibitsOperation,
            2305 => Self::ObjectAssociationProhibitsOperation,
            2306 => Self::ParameterValuePolicyError,
            2307 => Self::UnimplementedObjectService,
            2308 => Self::DataManagementPolicyViolation,
            2400 => Self::CommandFailed,
            2500 => Self::CommandFailedServerClosingConnection,
            2501 => Self::AuthenticationErrorServerClosingConnection,
            2502 => Self::SessionLimitExceededServerClosingConnection,
            other => Self::Other(other),
        }
    }

    /// Numeric value of the code
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Success => 1000,
            Self::SuccessActionPending => 1001,
            Self::SuccessNoMessages => 1300,
            Self::SuccessAckToDequeue => 1301,
            Self::SuccessEndingSession => 1500,
            Self::UnknownCommand => 2000,
            Self::CommandSyntaxError => 2001,
            Self::CommandUseError => 2002,
            Self::RequiredParameterMissing => 2003,
            Self::ParameterValueRangeError => 2004,
            Self::ParameterValueSyntaxError => 2005,
            Self::UnimplementedProtocolVersion => 2100,
            Self::UnimplementedCommand => 2101,
            Self::UnimplementedOption => 2102,
            Self::UnimplementedExtension => 2103,
            Self::BillingFailure => 2104,
            Self::ObjectNotEligibleForRenewal => 2105,
            Self::ObjectNotEligibleForTransfer => 2106,
            Self::AuthenticationError => 2200,
            Self::AuthorizationError => 2201,
            Self::InvalidAuthorizationInformation => 2202,
            Self::ObjectPendingTransfer => 2300,
            Self::ObjectNotPendingTransfer => 2301,
            Self::ObjectExists => 2302,
            Self::ObjectDoesNotExist => 2303,
            Self::ObjectStatusProhibitsOperation => 2304,
            Self::ObjectAssociationProhibitsOperation => 2305,
            Self::ParameterValuePolicyError => 2306,
            Self::UnimplementedObjectService => 2307,
            Self::DataManagementPolicyViolation => 2308,
            Self::CommandFailed => 2400,
            Self::CommandFailedServerClosingConnection => 2500,
            Self::AuthenticationErrorServerClosingConnection => 2501,
            Self::SessionLimitExceededServerClosingConnection => 2502,
            Self::Other(code) => *code,
        }
    }

    /// Codes the client treats as a successful reply
    ///
    /// `1001` is deliberately absent: only commands that expect a pending
    /// action (transfer requests) accept it, and they check it themselves.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::SuccessNoMessages | Self::SuccessAckToDequeue
        )
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Broad classes of failure, used by callers that only need to know who to blame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The RPC channel could not deliver or receive
    Connectivity,
    /// A reply arrived but could not be interpreted
    BadResponse,
    /// The registry rejected the command
    Registry,
    /// Registry identity does not match local identity
    Authorization,
    /// Caller input that cannot possibly succeed
    Validation,
    /// Local faults: persistence, configuration, runtime misuse
    Internal,
}

/// Core error type for the EPP synchronization core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Transport failure after the fault signal and the single retry
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// The command could not be serialized
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Empty or unparseable reply
    #[error("Bad response: {0}")]
    BadResponse(String),

    /// Registry replied with a non-success result code
    #[error("EPP command failed ({code}): {message}")]
    Command {
        /// Result code from the reply
        code: ResultCode,
        /// Result message from the reply
        message: String,
    },

    /// Registry reports a different registrant than the one known locally
    #[error("Registrant authorization failed: {0}")]
    RegistrantAuthFailed(String),

    /// Registrant reported by the registry is not known locally
    #[error("Registrant unknown: {0}")]
    RegistrantUnknown(String),

    /// Domain is sponsored by another registrar
    #[error("Registrar authorization failed: {0}")]
    RegistrarAuthFailed(String),

    /// Caller input that cannot be turned into a valid command
    #[error("Invalid command: {0}")]
    CommandInvalid(String),

    /// Registry does not serve the zone of the domain
    #[error("Non-supported zone: {0}")]
    NonSupportedZone(String),

    /// Domain is not registered
    #[error("Domain does not exist: {0}")]
    DomainNotExist(String),

    /// Domain carries statuses that forbid the requested operation
    #[error("Invalid domain status: {0}")]
    InvalidStatus(String),

    /// Transfer request failed while reading the domain
    #[error("Domain transfer info failed: {0}")]
    TransferInfo(Box<Error>),

    /// Transfer request was rejected
    #[error("Domain transfer request failed: {0}")]
    TransferRequest(Box<Error>),

    /// Persistence collaborator errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Automaton runtime misuse (event after destroy, corrupted index)
    #[error("Automaton error: {0}")]
    Automaton(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build the typed error for a registry reply (`exception_from_response`)
    pub fn from_result(code: u16, message: impl Into<String>) -> Self {
        Self::Command {
            code: ResultCode::from_u16(code),
            message: message.into(),
        }
    }

    /// Create a connectivity error
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Create a bad response error
    pub fn bad_response(msg: impl Into<String>) -> Self {
        Self::BadResponse(msg.into())
    }

    /// Create an invalid command error
    pub fn command_invalid(msg: impl Into<String>) -> Self {
        Self::CommandInvalid(msg.into())
    }

    /// Create a registrant authorization error
    pub fn registrant_auth_failed(msg: impl Into<String>) -> Self {
        Self::RegistrantAuthFailed(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an automaton runtime error
    pub fn automaton(msg: impl Into<String>) -> Self {
        Self::Automaton(msg.into())
    }

    /// EPP result code carried by the error, `-1` when none
    pub fn code(&self) -> i32 {
        match self {
            Self::Command { code, .. } => i32::from(code.as_u16()),
            Self::TransferInfo(inner) | Self::TransferRequest(inner) => inner.code(),
            _ => NON_EPP_CODE,
        }
    }

    /// True if the error carries the given registry result code
    pub fn has_code(&self, code: ResultCode) -> bool {
        self.code() == i32::from(code.as_u16())
    }

    /// Failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connectivity(_) => ErrorKind::Connectivity,
            Self::BadRequest(_) | Self::BadResponse(_) => ErrorKind::BadResponse,
            Self::Command { .. } => ErrorKind::Registry,
            Self::RegistrantAuthFailed(_)
            | Self::RegistrantUnknown(_)
            | Self::RegistrarAuthFailed(_) => ErrorKind::Authorization,
            Self::CommandInvalid(_)
            | Self::NonSupportedZone(_)
            | Self::DomainNotExist(_)
            | Self::InvalidStatus(_) => ErrorKind::Validation,
            Self::TransferInfo(inner) | Self::TransferRequest(inner) => inner.kind(),
            Self::Persistence(_) | Self::Config(_) | Self::Automaton(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Only connectivity failures are worth running a conversation again
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::BadResponse(err.to_string())
    }
}

/// Helper for converting anyhow::Error coming from persistence backends
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
