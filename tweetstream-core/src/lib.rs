//! Streaming API protocol core.
//! Host-driven: no I/O; host feeds response bytes and receives classified messages and typed errors.

pub mod auth;
pub mod backoff;
pub mod chunked;
pub mod classifier;
pub mod error;
pub mod headers;
pub mod message;
pub mod rate_limit;
pub mod request;
pub mod response;
pub mod state;
pub mod tokenizer;

pub use auth::{AuthError, Authorizer, BearerToken, StaticHeader};
pub use backoff::{BackoffStrategy, ExponentialBackoff, ReconnectPolicy};
pub use classifier::{classify, classify_value};
pub use error::{map_status, ApiError, ErrorKind};
pub use headers::Headers;
pub use message::{Event, EventCategory, EventKind, Payload, PayloadError, StreamMessage, TargetObject};
pub use rate_limit::RateLimit;
pub use request::{BoundingBox, Endpoint, Method, StreamRequest};
pub use response::{
    AdapterError, AdapterOptions, FrameError, FrameErrorPolicy, Output, ResponseAdapter,
    ResponseHead, UnrecognizedPolicy,
};
pub use state::{ConnectionState, InvalidTransition, Lifecycle};
pub use tokenizer::{Frame, OversizedFrame, Tokenizer, DEFAULT_DELIMITER};
