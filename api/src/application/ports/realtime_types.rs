use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Sink, Stream};
use tokio::sync::Mutex;

use super::realtime_port::RealtimeError;

/// Outbound half of a client connection; frames are UTF-8 text.
pub type DynRealtimeSink =
    Arc<Mutex<Pin<Box<dyn Sink<String, Error = RealtimeError> + Send + 'static>>>>;
pub type DynRealtimeStream =
    Pin<Box<dyn Stream<Item = Result<String, RealtimeError>> + Send + 'static>>;
