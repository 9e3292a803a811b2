use std::fmt;
use std::io;

#[derive(Debug)]
pub enum EngineError {
    /// `begin` was called on an engine that already left `Uninitialized`.
    AlreadyStarted,
    /// The producer has shut down; the engine cannot be restarted.
    Stopped,
    Sink(SinkError),
    Spawn(io::Error),
    Config(serde_json::Error),
    Io(io::Error),
}

#[derive(Debug)]
pub enum SinkError {
    /// The output device or stream could not be opened.
    Unavailable(String),
    Io(io::Error),
    #[cfg(feature = "wav")]
    Wav(hound::Error),
    /// The consumer side has gone away; no further writes are accepted.
    Closed,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::AlreadyStarted => write!(f, "Audio engine already started"),
            EngineError::Stopped => write!(f, "Audio engine has stopped"),
            EngineError::Sink(e) => write!(f, "Audio sink error: {e}"),
            EngineError::Spawn(e) => write!(f, "Failed to spawn audio producer: {e}"),
            EngineError::Config(e) => write!(f, "Invalid engine config: {e}"),
            EngineError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Sink(e) => Some(e),
            EngineError::Spawn(e) | EngineError::Io(e) => Some(e),
            EngineError::Config(e) => Some(e),
            EngineError::AlreadyStarted | EngineError::Stopped => None,
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Unavailable(reason) => write!(f, "Output unavailable: {reason}"),
            SinkError::Io(e) => write!(f, "Sink I/O error: {e}"),
            #[cfg(feature = "wav")]
            SinkError::Wav(e) => write!(f, "WAV write error: {e}"),
            SinkError::Closed => write!(f, "Sink closed"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Io(e) => Some(e),
            #[cfg(feature = "wav")]
            SinkError::Wav(e) => Some(e),
            SinkError::Unavailable(_) | SinkError::Closed => None,
        }
    }
}

impl From<SinkError> for EngineError {
    fn from(e: SinkError) -> Self {
        EngineError::Sink(e)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Config(e)
    }
}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        EngineError::Io(e)
    }
}

impl From<io::Error> for SinkError {
    fn from(e: io::Error) -> Self {
        SinkError::Io(e)
    }
}

#[cfg(feature = "wav")]
impl From<hound::Error> for SinkError {
    fn from(e: hound::Error) -> Self {
        SinkError::Wav(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn sink_error_converts_and_keeps_source() {
        let err: EngineError = SinkError::Unavailable("no device".into()).into();
        assert!(matches!(err, EngineError::Sink(SinkError::Unavailable(_))));
        assert_eq!(err.to_string(), "Audio sink error: Output unavailable: no device");
        assert!(err.source().is_some());
    }

    #[test]
    fn config_error_from_bad_json() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = EngineError::from(parse);
        assert!(err.to_string().starts_with("Invalid engine config"));
    }
}
