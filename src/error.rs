use std::result::Result as StdResult;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Msg(String),

    #[error("{0}")]
    BadValue(String),

    #[error("{0}")]
    TypeMismatch(String),

    #[error("{0}")]
    InvalidNamespace(String),

    #[error("{0}")]
    NamespaceNotFound(String),

    #[error("{0}")]
    NamespaceExists(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    AuthenticationFailed(String),

    #[error("{0}")]
    CursorNotFound(String),

    #[error("{0}")]
    CursorInUse(String),

    #[error("{0}")]
    CommandNotFound(String),

    /// Storage asked the reader to discard its snapshot and try again.
    #[error("WriteConflict")]
    WriteConflict,
}

impl Error {
    /// Numeric server error code reported in `{ok: 0, code}` replies.
    pub fn code(&self) -> i32 {
        match self {
            Error::Io(_) | Error::Msg(_) => 1,
            Error::BadValue(_) => 2,
            Error::TypeMismatch(_) => 14,
            Error::InvalidNamespace(_) => 73,
            Error::NamespaceNotFound(_) => 26,
            Error::NamespaceExists(_) => 48,
            Error::Unauthorized(_) => 13,
            Error::AuthenticationFailed(_) => 18,
            Error::CursorNotFound(_) => 43,
            Error::CursorInUse(_) => 292,
            Error::CommandNotFound(_) => 59,
            Error::WriteConflict => 112,
        }
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::Msg(_) => "InternalError",
            Error::BadValue(_) => "BadValue",
            Error::TypeMismatch(_) => "TypeMismatch",
            Error::InvalidNamespace(_) => "InvalidNamespace",
            Error::NamespaceNotFound(_) => "NamespaceNotFound",
            Error::NamespaceExists(_) => "NamespaceExists",
            Error::Unauthorized(_) => "Unauthorized",
            Error::AuthenticationFailed(_) => "AuthenticationFailed",
            Error::CursorNotFound(_) => "CursorNotFound",
            Error::CursorInUse(_) => "CursorInUse",
            Error::CommandNotFound(_) => "CommandNotFound",
            Error::WriteConflict => "WriteConflict",
        }
    }
}

pub type Result<T> = StdResult<T, Error>;
