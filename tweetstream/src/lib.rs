//! Streaming and REST client: TLS transport, reconnecting read loop, REST error pipeline.
//! Protocol logic (framing, classification, error mapping) lives in `tweetstream-core`.

pub mod config;
pub mod connection;
pub mod rest;
pub mod transport;

pub use connection::{
    handler_fn, ConnectionOptions, FnHandler, HandlerError, MessageHandler, StopHandle,
    StreamError, StreamNotice, StreamingConnection, NOTICE_CAPACITY,
};
pub use rest::{ApiResponse, RestClient, RestError};
pub use transport::{Connector, PlainConnector, TlsConnector, TransportError};
pub use tweetstream_core as core;
