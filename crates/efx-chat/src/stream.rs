//! Consumer side of a streaming chat completion.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;

/// Cancels a running stream. Cloneable so it can be handed to a signal
/// handler while the stream is consumed elsewhere.
#[derive(Debug, Clone, Default)]
pub struct StreamCancel {
    token: CancellationToken,
}

impl StreamCancel {
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop the stream. No content is delivered after this returns.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// One step of a stream as seen by its consumer.
#[derive(Debug)]
pub enum StreamEvent {
    /// Next piece of assistant content.
    Delta(String),
    /// The stream failed; no more events follow.
    Failed(ChatError),
    /// The stream ended normally; no more events follow.
    Finished,
}

/// Handle to an in-flight streaming completion.
///
/// Holds the content channel, the error channel (at most one value) and the
/// cancel switch. Both channels are closed by the producer when it exits.
#[derive(Debug)]
pub struct ChatStream {
    content: mpsc::Receiver<String>,
    errors: mpsc::Receiver<ChatError>,
    cancel: StreamCancel,
    done: bool,
}

impl ChatStream {
    pub(crate) fn new(
        content: mpsc::Receiver<String>,
        errors: mpsc::Receiver<ChatError>,
        cancel: StreamCancel,
    ) -> Self {
        Self {
            content,
            errors,
            cancel,
            done: false,
        }
    }

    /// Wait for the next event.
    ///
    /// Yields deltas in arrival order, then exactly one `Finished` or
    /// `Failed`, then `None`. After [`ChatStream::cancel`] it yields `None`.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if self.done {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.close();
            return None;
        }

        let token = self.cancel.token();
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.close();
                return None;
            }
            next = self.content.recv() => next,
        };

        match next {
            Some(delta) => Some(StreamEvent::Delta(delta)),
            None => {
                self.done = true;
                match self.errors.recv().await {
                    Some(err) => Some(StreamEvent::Failed(err)),
                    None => Some(StreamEvent::Finished),
                }
            }
        }
    }

    /// Read the whole stream into the final assistant message.
    pub async fn collect_text(mut self) -> Result<String, ChatError> {
        let mut text = String::new();
        while let Some(event) = self.recv().await {
            match event {
                StreamEvent::Delta(delta) => text.push_str(&delta),
                StreamEvent::Failed(err) => return Err(err),
                StreamEvent::Finished => break,
            }
        }
        Ok(text)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A cancel switch usable independently of this handle.
    pub fn canceller(&self) -> StreamCancel {
        self.cancel.clone()
    }

    fn close(&mut self) {
        self.done = true;
        self.content.close();
        self.errors.close();
    }
}
