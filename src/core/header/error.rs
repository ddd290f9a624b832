use thiserror::Error;

/// Errors raised while gathering one header section.
///
/// A failing section is logged and left out of the header; the other
/// sections are still emitted.
#[derive(Error, Debug)]
pub enum HeaderError {
    /// Failed to read a file from disk.
    #[error("Failed to read file {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A value was found but could not be parsed.
    #[error("Failed to parse {field} from {location}: {reason}")]
    ParseError {
        field: String,
        location: String,
        reason: String,
    },

    /// A required field was not present in the source.
    #[error("Missing required field: {field} in {location}")]
    MissingField { field: String, location: String },

    /// A low-level system call failed.
    #[error("System call failed: {syscall} - {reason}")]
    SystemCall { syscall: String, reason: String },

    /// An external command could not be run.
    #[error("Command '{command}' failed: {source}")]
    CommandExecution {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An external command ran but exited with a failure status.
    #[error("Command '{command}' exited with {status}")]
    CommandStatus { command: String, status: String },
}

pub type HeaderResult<T> = std::result::Result<T, HeaderError>;
