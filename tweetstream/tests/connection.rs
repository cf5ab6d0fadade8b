//! Drive the streaming connection against an in-process HTTP server over plain TCP.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tweetstream::core::{
    BearerToken, ConnectionState, ErrorKind, ExponentialBackoff, FrameErrorPolicy, StreamMessage,
    StreamRequest,
};
use tweetstream::{
    handler_fn, ConnectionOptions, PlainConnector, StreamError, StreamNotice, StreamingConnection,
    TransportError,
};

const WAIT: Duration = Duration::from_secs(5);

fn options() -> ConnectionOptions {
    ConnectionOptions {
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(5),
        backoff: ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(50))
            .with_jitter(false),
        ..ConnectionOptions::default()
    }
}

fn connection(opts: ConnectionOptions) -> StreamingConnection<PlainConnector> {
    StreamingConnection::new(PlainConnector, Arc::new(BearerToken::new("secret")), opts)
}

async fn listener() -> (TcpListener, u16) {
    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = l.local_addr().unwrap().port();
    (l, port)
}

/// Read one request: head plus `Content-Length` bytes of body.
async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                return String::from_utf8_lossy(&buf).to_string();
            }
        }
        let n = stream.read(&mut tmp).await.unwrap();
        if n == 0 {
            return String::from_utf8_lossy(&buf).to_string();
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}

fn chunk(payload: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n");
    out
}

const CHUNKED_OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n";

fn content_id(message: &StreamMessage) -> u64 {
    match message {
        StreamMessage::ContentItem(p) => p.get().unwrap().id,
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn rate_limited_response_is_a_typed_error() {
    let (listener, port) = listener().await;
    tokio::spawn(async move {
        let (mut s, _) = listener.accept().await.unwrap();
        read_request(&mut s).await;
        let body = r#"{"errors":[{"message":"Rate limit exceeded","code":88}]}"#;
        let resp = format!(
            "HTTP/1.1 420 Enhance Your Calm\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        s.write_all(resp.as_bytes()).await.unwrap();
    });

    let conn = connection(options());
    let request = StreamRequest::sample().with_host("127.0.0.1", port);
    let err = timeout(WAIT, conn.stream(&request, handler_fn(|_| Ok(()))))
        .await
        .unwrap()
        .unwrap_err();
    match err {
        StreamError::Api(e) => {
            assert_eq!(e.kind, ErrorKind::TooManyRequests);
            assert_eq!(e.status, 420);
            assert_eq!(e.message, "Rate limit exceeded");
            assert_eq!(e.code, Some(88));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(*conn.state().borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn malformed_frame_is_skipped_and_order_kept() {
    let (listener, port) = listener().await;
    let (done_tx, done_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let (mut s, _) = listener.accept().await.unwrap();
        read_request(&mut s).await;
        s.write_all(CHUNKED_OK).await.unwrap();
        s.write_all(&chunk(b"{\"id\":1,\"text\":\"a\"}\r\n{\"id\":")).await.unwrap();
        s.write_all(&chunk(b"oops\r\n{\"id\":2,\"text\":\"b\"}\r\n")).await.unwrap();
        let _ = done_rx.await;
    });

    let mut opts = options();
    opts.adapter.frame_errors = FrameErrorPolicy::Report;
    let mut conn = connection(opts);
    let mut notices = conn.subscribe_notices();
    let mut state = conn.state();
    let stop = conn.stop_handle();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let request = StreamRequest::sample().with_host("127.0.0.1", port);
    let task = tokio::spawn(async move {
        conn.stream(
            &request,
            handler_fn(move |m| {
                tx.send(m)?;
                Ok(())
            }),
        )
        .await
    });

    let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(content_id(&first), 1);
    assert_eq!(content_id(&second), 2);
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Streaming))
        .await
        .unwrap()
        .unwrap();

    match timeout(WAIT, notices.recv()).await.unwrap().unwrap() {
        StreamNotice::FrameDecode(e) => assert_eq!(e.len, "{\"id\":oops".len()),
        other => panic!("unexpected {:?}", other),
    }

    stop.stop();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert!(rx.try_recv().is_err());
    let _ = done_tx.send(());
}

#[tokio::test]
async fn reconnects_after_end_of_stream() {
    let (listener, port) = listener().await;
    let (done_tx, done_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        // First connection: one frame then close.
        let (mut s, _) = listener.accept().await.unwrap();
        read_request(&mut s).await;
        s.write_all(b"HTTP/1.1 200 OK\r\n\r\n{\"id\":1}\r\n").await.unwrap();
        drop(s);
        // Second connection: one frame, stay open.
        let (mut s, _) = listener.accept().await.unwrap();
        read_request(&mut s).await;
        s.write_all(b"HTTP/1.1 200 OK\r\n\r\n{\"id\":2}\r\n").await.unwrap();
        let _ = done_rx.await;
    });

    let mut conn = connection(options());
    let mut notices = conn.subscribe_notices();
    let stop = conn.stop_handle();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let request = StreamRequest::sample().with_host("127.0.0.1", port);
    let task = tokio::spawn(async move {
        conn.stream(
            &request,
            handler_fn(move |m| {
                tx.send(m)?;
                Ok(())
            }),
        )
        .await
    });

    assert_eq!(content_id(&timeout(WAIT, rx.recv()).await.unwrap().unwrap()), 1);
    assert_eq!(content_id(&timeout(WAIT, rx.recv()).await.unwrap().unwrap()), 2);
    match timeout(WAIT, notices.recv()).await.unwrap().unwrap() {
        StreamNotice::Reconnecting { attempt, delay, .. } => {
            assert_eq!(attempt, 1);
            assert_eq!(delay, Duration::from_millis(10));
        }
        other => panic!("unexpected {:?}", other),
    }

    stop.stop();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    let _ = done_tx.send(());
}

#[tokio::test]
async fn stalled_stream_reconnects_after_read_timeout() {
    let (listener, port) = listener().await;
    let (done_tx, done_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        // Head only, then silence.
        let (mut stalled, _) = listener.accept().await.unwrap();
        read_request(&mut stalled).await;
        stalled.write_all(CHUNKED_OK).await.unwrap();
        let (mut s, _) = listener.accept().await.unwrap();
        read_request(&mut s).await;
        s.write_all(CHUNKED_OK).await.unwrap();
        s.write_all(&chunk(b"{\"id\":7}\r\n")).await.unwrap();
        let _ = done_rx.await;
        drop(stalled);
    });

    let mut opts = options();
    opts.read_timeout = Duration::from_millis(200);
    let mut conn = connection(opts);
    let mut notices = conn.subscribe_notices();
    let stop = conn.stop_handle();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let request = StreamRequest::sample().with_host("127.0.0.1", port);
    let task = tokio::spawn(async move {
        conn.stream(
            &request,
            handler_fn(move |m| {
                tx.send(m)?;
                Ok(())
            }),
        )
        .await
    });

    match timeout(WAIT, notices.recv()).await.unwrap().unwrap() {
        StreamNotice::Reconnecting { reason, .. } => {
            assert_eq!(reason, TransportError::Timeout.to_string())
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(content_id(&timeout(WAIT, rx.recv()).await.unwrap().unwrap()), 7);

    stop.stop();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    let _ = done_tx.send(());
}

#[tokio::test]
async fn handler_failures_do_not_stop_the_stream() {
    let (listener, port) = listener().await;
    let (done_tx, done_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let (mut s, _) = listener.accept().await.unwrap();
        read_request(&mut s).await;
        s.write_all(CHUNKED_OK).await.unwrap();
        s.write_all(&chunk(b"{\"id\":1}\r\n{\"id\":2}\r\n{\"id\":3}\r\n")).await.unwrap();
        let _ = done_rx.await;
    });

    let mut conn = connection(options());
    let mut notices = conn.subscribe_notices();
    let stop = conn.stop_handle();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let request = StreamRequest::sample().with_host("127.0.0.1", port);
    let task = tokio::spawn(async move {
        conn.stream(
            &request,
            handler_fn(move |m| {
                let id = content_id(&m);
                tx.send(id)?;
                match id {
                    1 => Err("consumer rejected 1".into()),
                    2 => panic!("consumer crashed on 2"),
                    _ => Ok(()),
                }
            }),
        )
        .await
    });

    for expected in 1..=3u64 {
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().unwrap(), expected);
    }
    assert_eq!(
        timeout(WAIT, notices.recv()).await.unwrap().unwrap(),
        StreamNotice::HandlerFailed("consumer rejected 1".to_string())
    );
    assert_eq!(
        timeout(WAIT, notices.recv()).await.unwrap().unwrap(),
        StreamNotice::HandlerFailed("consumer crashed on 2".to_string())
    );

    stop.stop();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    let _ = done_tx.send(());
}

#[tokio::test]
async fn filter_request_goes_out_as_form_post() {
    let (listener, port) = listener().await;
    let (req_tx, req_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut s, _) = listener.accept().await.unwrap();
        let request = read_request(&mut s).await;
        let _ = req_tx.send(request);
        let body = r#"{"errors":[{"message":"Could not authenticate you","code":32}]}"#;
        let resp = format!(
            "HTTP/1.1 401 Unauthorized\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        s.write_all(resp.as_bytes()).await.unwrap();
    });

    let conn = connection(options());
    let request = StreamRequest::filter()
        .track(&["rust lang"])
        .with_host("127.0.0.1", port);
    let err = timeout(WAIT, conn.stream(&request, handler_fn(|_| Ok(()))))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, StreamError::Api(ref e) if e.kind == ErrorKind::Unauthorized && e.code == Some(32)));

    let sent = req_rx.await.unwrap();
    assert!(sent.starts_with("POST /1.1/statuses/filter.json HTTP/1.1\r\n"));
    assert!(sent.contains("Authorization: Bearer secret\r\n"));
    assert!(sent.contains("Content-Type: application/x-www-form-urlencoded\r\n"));
    assert!(sent.ends_with("\r\n\r\ntrack=rust+lang"));
}

#[tokio::test]
async fn unterminated_error_body_is_not_retried() {
    let (listener, port) = listener().await;
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (mut s, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            read_request(&mut s).await;
            s.write_all(b"HTTP/1.1 401 Unauthorized\r\n\r\n{\"errors\":[{\"message\":\"Could not authenticate you\",\"code\":32}]}")
                .await
                .unwrap();
            held.push(s);
        }
    });

    let mut opts = options();
    opts.read_timeout = Duration::from_millis(200);
    let conn = connection(opts);
    let request = StreamRequest::sample().with_host("127.0.0.1", port);
    let err = timeout(WAIT, conn.stream(&request, handler_fn(|_| Ok(()))))
        .await
        .unwrap()
        .unwrap_err();
    match err {
        StreamError::Api(e) => {
            assert_eq!(e.kind, ErrorKind::Unauthorized);
            assert_eq!(e.message, "Could not authenticate you");
            assert_eq!(e.code, Some(32));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_before_stream_returns_immediately() {
    let (listener, port) = listener().await;
    drop(listener);
    let conn = connection(options());
    conn.stop();
    conn.stop();
    let request = StreamRequest::sample().with_host("127.0.0.1", port);
    timeout(WAIT, conn.stream(&request, handler_fn(|_| panic!("no messages expected"))))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn gives_up_after_max_reconnects() {
    let (listener, port) = listener().await;
    drop(listener);
    let mut opts = options();
    opts.max_reconnects = Some(2);
    let mut conn = connection(opts);
    let mut notices = conn.subscribe_notices();
    let request = StreamRequest::sample().with_host("127.0.0.1", port);
    let err = timeout(WAIT, conn.stream(&request, handler_fn(|_| Ok(()))))
        .await
        .unwrap()
        .unwrap_err();
    match err {
        StreamError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(last, TransportError::Connect(_)));
        }
        other => panic!("unexpected {:?}", other),
    }
    let mut reconnects = 0;
    while let Ok(notice) = notices.try_recv() {
        assert!(matches!(notice, StreamNotice::Reconnecting { .. }));
        reconnects += 1;
    }
    assert_eq!(reconnects, 2);
}
