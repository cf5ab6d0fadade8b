//! Streaming connection: connect, send the request, run the read loop, reconnect with backoff.
//!
//! One connection drives one sequential loop. Frames are classified and handed to the
//! handler strictly in arrival order; the handler is never called concurrently.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::Instrument;
use tweetstream_core::{
    AdapterError, AdapterOptions, ApiError, AuthError, Authorizer, ConnectionState,
    ExponentialBackoff, FrameError, Lifecycle, Output, ReconnectPolicy, ResponseAdapter,
    StreamMessage, StreamRequest,
};
use uuid::Uuid;

use crate::transport::{Connector, TlsConnector, TransportError};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Notices queued for a subscriber that is not reading; newer ones are dropped.
pub const NOTICE_CAPACITY: usize = 256;

pub const DEFAULT_USER_AGENT: &str = concat!("tweetstream/", env!("CARGO_PKG_VERSION"));

/// Keep-alives arrive every 30s; three missed ones mean the stream has stalled.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(90);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Longest wait for the next byte before the attempt counts as failed.
    pub read_timeout: Duration,
    pub backoff: ExponentialBackoff,
    /// Consecutive failed attempts before giving up; `None` retries forever.
    pub max_reconnects: Option<u32>,
    pub adapter: AdapterOptions,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            backoff: ExponentialBackoff::default(),
            max_reconnects: None,
            adapter: AdapterOptions::default(),
        }
    }
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Consumer of classified messages.
pub trait MessageHandler: Send {
    fn handle(&mut self, message: StreamMessage) -> Result<(), HandlerError>;
}

/// Adapter so a closure can be a handler; see [`handler_fn`].
pub struct FnHandler<F>(F);

impl<F> MessageHandler for FnHandler<F>
where
    F: FnMut(StreamMessage) -> Result<(), HandlerError> + Send,
{
    fn handle(&mut self, message: StreamMessage) -> Result<(), HandlerError> {
        (self.0)(message)
    }
}

pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: FnMut(StreamMessage) -> Result<(), HandlerError> + Send,
{
    FnHandler(f)
}

/// Non-fatal events, delivered on the channel from [`StreamingConnection::subscribe_notices`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamNotice {
    /// A frame was not valid JSON and was skipped (only with `FrameErrorPolicy::Report`).
    FrameDecode(FrameError),
    /// The handler returned an error or panicked; the loop carried on.
    HandlerFailed(String),
    Reconnecting {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
}

/// Why `stream` returned with an error. Transport failures only surface once retries run out.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),
    #[error("authorization failed: {0}")]
    Auth(#[from] AuthError),
    #[error("gave up after {attempts} reconnect attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: TransportError,
    },
}

/// Cloneable handle that stops a running stream. Idempotent.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }
}

/// How one connection attempt ended.
enum Attempt {
    Stopped,
    /// Recoverable; reconnect.
    Ended(TransportError),
    Fatal(StreamError),
}

impl From<AdapterError> for Attempt {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Api(e) => Self::Fatal(StreamError::Api(e)),
            AdapterError::UnexpectedStatus(status) => {
                Self::Fatal(StreamError::UnexpectedStatus(status))
            }
            AdapterError::IncompleteHead => Self::Ended(TransportError::IncompleteHead),
            AdapterError::Chunked(e) => Self::Ended(TransportError::Chunked(e)),
            other => Self::Ended(TransportError::Protocol(other.to_string())),
        }
    }
}

/// A long-lived streaming connection. Owns its transport and framing state.
pub struct StreamingConnection<C> {
    connector: C,
    authorizer: Arc<dyn Authorizer>,
    options: ConnectionOptions,
    stop: Arc<watch::Sender<bool>>,
    state: watch::Sender<ConnectionState>,
    notices: Option<mpsc::Sender<StreamNotice>>,
}

impl StreamingConnection<TlsConnector> {
    /// Connection over TLS with the bundled root certificates.
    pub fn tls(authorizer: Arc<dyn Authorizer>, options: ConnectionOptions) -> Self {
        Self::new(TlsConnector::new(), authorizer, options)
    }
}

impl<C: Connector> StreamingConnection<C> {
    pub fn new(connector: C, authorizer: Arc<dyn Authorizer>, options: ConnectionOptions) -> Self {
        let (stop, _) = watch::channel(false);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            authorizer,
            options,
            stop: Arc::new(stop),
            state,
            notices: None,
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    /// Stop the stream. A stopped connection stays stopped.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Watch lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Channel of non-fatal notices, holding up to [`NOTICE_CAPACITY`] undrained entries.
    /// Replaces any earlier subscription.
    pub fn subscribe_notices(&mut self) -> mpsc::Receiver<StreamNotice> {
        let (tx, rx) = mpsc::channel(NOTICE_CAPACITY);
        self.notices = Some(tx);
        rx
    }

    /// Open `request` and feed every classified message to `handler` until stopped
    /// or a non-recoverable error. Returns `Ok(())` after `stop()`.
    pub async fn stream<H: MessageHandler>(
        &self,
        request: &StreamRequest,
        mut handler: H,
    ) -> Result<(), StreamError> {
        let span = tracing::info_span!(
            "stream",
            id = %Uuid::new_v4(),
            host = %request.host,
            path = %request.path
        );
        self.run(request, &mut handler).instrument(span).await
    }

    async fn run<H: MessageHandler>(
        &self,
        request: &StreamRequest,
        handler: &mut H,
    ) -> Result<(), StreamError> {
        let mut stop = self.stop.subscribe();
        let mut lifecycle = Lifecycle::new();
        let mut policy =
            ReconnectPolicy::new(self.options.backoff.clone(), self.options.max_reconnects);

        let result = loop {
            if *stop.borrow() {
                break Ok(());
            }
            self.transition(&mut lifecycle, ConnectionState::Connecting);
            let err = match self
                .attempt(request, handler, &mut lifecycle, &mut policy, &mut stop)
                .await
            {
                Attempt::Stopped => break Ok(()),
                Attempt::Fatal(e) => break Err(e),
                Attempt::Ended(e) => e,
            };
            let Some(delay) = policy.next_delay() else {
                break Err(StreamError::RetriesExhausted {
                    attempts: policy.attempts(),
                    last: err,
                });
            };
            self.transition(&mut lifecycle, ConnectionState::Reconnecting);
            tracing::warn!(
                error = %err,
                attempt = policy.attempts(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );
            self.notify(StreamNotice::Reconnecting {
                attempt: policy.attempts(),
                delay,
                reason: err.to_string(),
            });
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut stop) => break Ok(()),
            }
        };

        self.transition(&mut lifecycle, ConnectionState::Disconnected);
        match &result {
            Ok(()) => tracing::info!("stream stopped"),
            Err(e) => tracing::error!(error = %e, "stream terminated"),
        }
        result
    }

    async fn attempt<H: MessageHandler>(
        &self,
        request: &StreamRequest,
        handler: &mut H,
        lifecycle: &mut Lifecycle,
        policy: &mut ReconnectPolicy,
        stop: &mut watch::Receiver<bool>,
    ) -> Attempt {
        let authorization =
            match self
                .authorizer
                .authorize(request.method, &request.url(), &request.params)
            {
                Ok(value) => value,
                Err(e) => return Attempt::Fatal(e.into()),
            };

        let connect = tokio::time::timeout(
            self.options.connect_timeout,
            self.connector.connect(&request.host, request.port),
        );
        let mut io = tokio::select! {
            res = connect => match res {
                Ok(Ok(io)) => io,
                Ok(Err(e)) => return Attempt::Ended(e),
                Err(_) => return Attempt::Ended(TransportError::Timeout),
            },
            _ = stopped(stop) => return Attempt::Stopped,
        };
        let bytes = request.encode(&authorization, &self.options.user_agent);
        if let Err(e) = write_request(&mut io, &bytes).await {
            return Attempt::Ended(e.into());
        }
        tracing::debug!(port = request.port, "request sent");

        let mut adapter = ResponseAdapter::new(self.options.adapter.clone());
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let read = tokio::select! {
                biased;
                _ = stopped(stop) => return Attempt::Stopped,
                res = tokio::time::timeout(self.options.read_timeout, io.read(&mut buf)) => res,
            };
            let n = match read {
                Err(_) => return read_failed(&mut adapter, TransportError::Timeout),
                Ok(Err(e)) => return read_failed(&mut adapter, e.into()),
                Ok(Ok(n)) => n,
            };
            if n == 0 {
                return match adapter.finish() {
                    Ok(()) => Attempt::Ended(TransportError::Closed),
                    Err(e) => e.into(),
                };
            }
            policy.reset();

            let outputs = match adapter.feed(&buf[..n]) {
                Ok(outputs) => outputs,
                Err(e) => return e.into(),
            };
            if adapter.is_streaming() && lifecycle.state() == ConnectionState::Connecting {
                self.transition(lifecycle, ConnectionState::Streaming);
            }
            for output in outputs {
                if *stop.borrow() {
                    return Attempt::Stopped;
                }
                match output {
                    Output::Message(message) => self.dispatch(handler, message),
                    Output::FrameError(e) => self.notify(StreamNotice::FrameDecode(e)),
                }
            }
            if adapter.is_finished() {
                return Attempt::Ended(TransportError::Closed);
            }
        }
    }

    /// Invoke the handler; errors and panics are reported, never propagated.
    fn dispatch<H: MessageHandler>(&self, handler: &mut H, message: StreamMessage) {
        let kind = message.kind();
        let error = match catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(&*panic),
        };
        tracing::error!(kind, %error, "message handler failed");
        self.notify(StreamNotice::HandlerFailed(error));
    }

    fn notify(&self, notice: StreamNotice) {
        if let Some(tx) = &self.notices {
            if let Err(mpsc::error::TrySendError::Full(notice)) = tx.try_send(notice) {
                tracing::debug!(?notice, "notice queue full, dropping");
            }
        }
    }

    fn transition(&self, lifecycle: &mut Lifecycle, next: ConnectionState) {
        match lifecycle.transition(next) {
            Ok(prev) => {
                tracing::debug!(from = ?prev, to = ?next, "connection state");
                self.state.send_replace(next);
            }
            Err(e) => tracing::debug!(error = %e, "state change ignored"),
        }
    }
}

/// A read failed or stalled. After a non-2xx head the error collected so far is
/// still the answer; otherwise the attempt ends and may be retried.
fn read_failed(adapter: &mut ResponseAdapter, err: TransportError) -> Attempt {
    if adapter.head().is_some_and(|h| !h.is_success()) {
        if let Err(e) = adapter.finish() {
            return e.into();
        }
    }
    Attempt::Ended(err)
}

async fn write_request<S: AsyncRead + AsyncWrite + Unpin>(
    io: &mut S,
    bytes: &[u8],
) -> std::io::Result<()> {
    io.write_all(bytes).await?;
    io.flush().await
}

/// Resolves once a stop has been requested.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let closed = stop.wait_for(|stopped| *stopped).await.map(|_| ()).is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tweetstream_core::chunked::ChunkedError;

    #[test]
    fn adapter_errors_split_fatal_and_recoverable() {
        let api = tweetstream_core::map_status(401, &Default::default(), b"").unwrap();
        assert!(matches!(
            Attempt::from(AdapterError::Api(api)),
            Attempt::Fatal(StreamError::Api(_))
        ));
        assert!(matches!(
            Attempt::from(AdapterError::UnexpectedStatus(301)),
            Attempt::Fatal(StreamError::UnexpectedStatus(301))
        ));
        assert!(matches!(
            Attempt::from(AdapterError::Chunked(ChunkedError::MissingCrlf)),
            Attempt::Ended(TransportError::Chunked(_))
        ));
        assert!(matches!(
            Attempt::from(AdapterError::HeadTooLarge),
            Attempt::Ended(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn panic_payloads() {
        let p: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*p), "static");
        let p: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*p), "owned");
        let p: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(&*p), "handler panicked");
    }

    #[test]
    fn stop_handle_is_idempotent() {
        let conn = StreamingConnection::new(
            crate::transport::PlainConnector,
            Arc::new(tweetstream_core::BearerToken::new("t")),
            ConnectionOptions::default(),
        );
        let handle = conn.stop_handle();
        assert!(!handle.is_stopped());
        handle.stop();
        handle.stop();
        conn.stop();
        assert!(handle.is_stopped());
        assert_eq!(*conn.state().borrow(), ConnectionState::Disconnected);
    }

    #[test]
    fn stalled_error_body_is_still_fatal() {
        let mut adapter = ResponseAdapter::new(AdapterOptions::default());
        let outputs = adapter
            .feed(b"HTTP/1.1 401 Unauthorized\r\n\r\n{\"errors\":[{\"message\":\"Could not authenticate you\",\"code\":32}]}")
            .unwrap();
        assert!(outputs.is_empty());
        match read_failed(&mut adapter, TransportError::Timeout) {
            Attempt::Fatal(StreamError::Api(e)) => {
                assert_eq!(e.kind, tweetstream_core::ErrorKind::Unauthorized);
                assert_eq!(e.code, Some(32));
            }
            _ => panic!("expected a fatal api error"),
        }
    }

    #[test]
    fn stalled_success_is_retried() {
        let mut adapter = ResponseAdapter::new(AdapterOptions::default());
        adapter.feed(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        assert!(matches!(
            read_failed(&mut adapter, TransportError::Timeout),
            Attempt::Ended(TransportError::Timeout)
        ));
    }

    #[test]
    fn undrained_notices_are_capped() {
        let mut conn = StreamingConnection::new(
            crate::transport::PlainConnector,
            Arc::new(tweetstream_core::BearerToken::new("t")),
            ConnectionOptions::default(),
        );
        let mut notices = conn.subscribe_notices();
        for i in 0..NOTICE_CAPACITY + 10 {
            conn.notify(StreamNotice::HandlerFailed(i.to_string()));
        }
        let mut received = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            received.push(notice);
        }
        assert_eq!(received.len(), NOTICE_CAPACITY);
        assert_eq!(received[0], StreamNotice::HandlerFailed("0".to_string()));

        conn.notify(StreamNotice::HandlerFailed("after drain".to_string()));
        assert_eq!(
            notices.try_recv().unwrap(),
            StreamNotice::HandlerFailed("after drain".to_string())
        );
    }
}
