//! Frame Handler Port (Driver Port)
//!
//! How the streamer connection hands each inbound text frame to the
//! application. Errors are per frame: the connection logs them and moves on.

/// Error raised while handling one frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The frame could not be decoded.
    #[error("frame decode failed: {0}")]
    Decode(String),

    /// The frame could not be handed to the publish queue.
    #[error("frame could not be queued: {0}")]
    Enqueue(String),
}

/// Consumer of inbound streamer frames.
pub trait FrameHandler: Send {
    /// Handle one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame could not be handled. The receive loop
    /// logs it and continues with the next frame.
    fn handle_frame(&mut self, frame: &str) -> Result<(), FrameError>;
}

impl<F> FrameHandler for F
where
    F: FnMut(&str) -> Result<(), FrameError> + Send,
{
    fn handle_frame(&mut self, frame: &str) -> Result<(), FrameError> {
        self(frame)
    }
}
