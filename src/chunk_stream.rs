//! Chunk Stream Module
//!
//! Consumer side of a chunk request. The producing task hands messages over a
//! bounded channel of capacity one: at most one message sits unread in the
//! buffer, and a send blocks only while an earlier message is still unread.
//! Dropping the stream or calling [`ChunkStream::cancel`] closes the channel;
//! the producer notices on its next send (or while it is waiting for the
//! network) and exits.

use crate::chunk_types::ChunkResponse;
use crate::{ChunkCacheError, Result};
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Message carried by a chunk stream
pub type ChunkMessage = Result<ChunkResponse>;

/// Stream of 0-2 messages produced by one chunk request, ended by channel closure
pub struct ChunkStream {
    receiver: mpsc::Receiver<ChunkMessage>,
}

impl ChunkStream {
    pub(crate) fn new(receiver: mpsc::Receiver<ChunkMessage>) -> Self {
        Self { receiver }
    }

    /// Receive the next message; `None` is the end-of-stream signal
    pub async fn next_message(&mut self) -> Option<ChunkMessage> {
        self.receiver.recv().await
    }

    /// Abandon the request. Messages already handed over can still be read.
    pub fn cancel(&mut self) {
        self.receiver.close();
    }

    /// Read every message until end-of-stream
    pub async fn collect_responses(mut self) -> Vec<ChunkMessage> {
        let mut messages = Vec::with_capacity(2);
        while let Some(message) = self.receiver.recv().await {
            messages.push(message);
        }
        messages
    }

    /// Drain the stream and resolve it to one answer.
    ///
    /// An error at any position wins. Otherwise the last message is the
    /// authoritative one (a network confirmation supersedes a disk hit).
    /// A stream that ends without any message yields [`ChunkCacheError::Cancelled`].
    pub async fn into_authoritative(mut self) -> Result<Bytes> {
        let mut last = None;
        let mut first_error = None;

        while let Some(message) = self.receiver.recv().await {
            match message {
                Ok(response) => last = Some(response.bytes),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match (first_error, last) {
            (Some(e), _) => Err(e),
            (None, Some(bytes)) => Ok(bytes),
            (None, None) => Err(ChunkCacheError::Cancelled),
        }
    }
}

impl Stream for ChunkStream {
    type Item = ChunkMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
