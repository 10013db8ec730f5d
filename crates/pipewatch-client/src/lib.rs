//! Transport for the pipeline backend.
//!
//! Provides the REST client for task management and the push-stream channel
//! used for live task updates.

pub mod api;
pub mod channel;
pub mod error;
pub mod http;
pub mod sse;

pub use api::PipelineApi;
pub use channel::{ChannelConnector, FixedEndpoint, FrameStream, StreamEndpoint};
pub use error::ClientError;
pub use http::HttpClient;
pub use sse::{decode_frames, SseDecoder, SseFrame};
