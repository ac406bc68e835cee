use std::fmt;

/// Transport failure surfaced by a realtime sink or stream.
#[derive(Debug)]
pub struct RealtimeError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl RealtimeError {
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Box::new(err))
    }

    pub fn closed() -> Self {
        Self::new(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "connection closed",
        ))
    }
}

impl fmt::Display for RealtimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RealtimeError {}
