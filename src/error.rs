use thiserror::Error;

/// Errors surfaced as RESP error replies to the client. The `Display` text is
/// exactly what goes on the wire after the `-ERR ` (or bare, for a few cases
/// matching the reference server) prefix.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("value is not an integer or out of range")]
    NotAnInteger,
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("EXEC without MULTI")]
    ExecWithoutMulti,
    #[error("DISCARD without MULTI")]
    DiscardWithoutMulti,
    #[error("MULTI calls can not be nested")]
    NestedMulti,
    #[error("syntax error")]
    Syntax,
    #[error("{0}")]
    Other(String),
}

impl CommandError {
    /// `WRONGTYPE` carries its own error-code prefix (mirroring real Redis);
    /// every other command error is reported under the generic `ERR` code.
    pub fn into_resp(self) -> crate::resp::Value {
        match &self {
            CommandError::WrongType => crate::resp::Value::error(self.to_string()),
            _ => crate::resp::Value::error(format!("ERR {}", self)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unexpected reply from primary during handshake: {0}")]
    UnexpectedReply(String),
}
