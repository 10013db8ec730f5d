//! Seams for the long-lived push-stream channel.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::ClientError;
use crate::sse::SseFrame;

/// An open push-stream channel. Dropping it closes the connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame, ClientError>> + Send>>;

/// Opens push-stream channels.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Open the channel at `url`. Resolves once the server accepted it.
    async fn open(&self, url: &str) -> Result<FrameStream, ClientError>;
}

/// Yields the address of the push-stream endpoint.
pub trait StreamEndpoint: Send + Sync {
    fn stream_url(&self) -> String;
}

/// A stream endpoint with a fixed address.
#[derive(Debug, Clone)]
pub struct FixedEndpoint(pub String);

impl StreamEndpoint for FixedEndpoint {
    fn stream_url(&self) -> String {
        self.0.clone()
    }
}
