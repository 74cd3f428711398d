/// Errors that can occur while encoding or decoding snapshot streams.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// An I/O error occurred on the underlying stream. A truncated record
    /// surfaces as `Io` with [`std::io::ErrorKind::UnexpectedEof`].
    #[error("snapshot stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The decoded fields violate a record invariant.
    #[error("malformed snapshot record: {0}")]
    Malformed(&'static str),
}

pub type Result<T> = std::result::Result<T, StreamError>;
