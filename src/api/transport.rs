//! Purpose: Define the seam between the subscription state machine and a wire transport.
//! Exports: `Transport`, `FrameStream`, `OpenFuture`, `FRAME_BUFFER`.
//! Role: A transport opens one `Listen` call and hands back an ordered frame stream.
//! Invariants: Frames arrive in the order the service sent them.
//! Invariants: Dropping a `FrameStream` releases the call (reader task aborted, channel closed).
use crate::core::error::Error;
use crate::core::event::ListenRequest;
use crate::core::frame::Frame;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Frames buffered between a transport reader and the consumer.
pub const FRAME_BUFFER: usize = 16;

pub type OpenFuture<'a> = Pin<Box<dyn Future<Output = Result<FrameStream, Error>> + Send + 'a>>;

/// Opens server-streaming `Listen` calls.
///
/// `open` resolves once the stream is established and must not wait for the
/// first event. Failing to establish the stream is reported as an error of
/// kind `Connection`.
pub trait Transport: Send + Sync {
    fn open<'a>(&'a self, request: &'a ListenRequest) -> OpenFuture<'a>;
}

/// Receiving half of one open `Listen` call.
#[derive(Debug)]
pub struct FrameStream {
    frames: mpsc::Receiver<Frame>,
    reader: Option<JoinHandle<()>>,
}

impl FrameStream {
    pub fn new(frames: mpsc::Receiver<Frame>) -> Self {
        Self {
            frames,
            reader: None,
        }
    }

    /// Ties a background reader task to the stream so it is aborted on drop.
    pub fn with_reader(frames: mpsc::Receiver<Frame>, reader: JoinHandle<()>) -> Self {
        Self {
            frames,
            reader: Some(reader),
        }
    }

    /// Next frame, or `None` once the transport finished without a terminal frame.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Frame that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.frames.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Builds an in-memory frame stream; the sender plays the service.
pub fn channel() -> (mpsc::Sender<Frame>, FrameStream) {
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    (tx, FrameStream::new(rx))
}
