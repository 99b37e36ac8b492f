//! Uniform before/after observation of every call.
//!
//! tonic's own interceptors only see request metadata, so streaming messages
//! are observed here instead: the service adapter opens a [`Call`] for each
//! RPC, routes the inbound stream through [`Call::inbound`] and the response
//! channel through [`Call::outbound`], and hands the handler's result to
//! [`Call::finish`]. None of these touch message contents or change the
//! outcome; they only report to a [`CallObserver`].

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tonic::Status;

/// Hooks invoked over the lifetime of a call.
pub trait CallObserver: Send + Sync + fmt::Debug {
    /// The call is about to be handled.
    fn before(&self, method: &str);

    /// The handler completed successfully.
    fn after_success(&self, _method: &str) {}

    /// The handler failed with `status`.
    fn after_failure(&self, method: &str, status: &Status);

    /// A message of type `message_type` was handed to the caller's stream.
    fn on_message_sent(&self, _method: &str, _message_type: &str) {}

    /// A message of type `message_type` was received from the caller.
    fn on_message_received(&self, _method: &str, _message_type: &str) {}
}

/// Observer that reports every hook through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl CallObserver for LoggingObserver {
    fn before(&self, method: &str) {
        tracing::info!(method = %method, "request");
    }

    fn after_failure(&self, method: &str, status: &Status) {
        tracing::error!(
            method = %method,
            code = ?status.code(),
            error = %status.message(),
            "request failed"
        );
    }

    fn on_message_sent(&self, method: &str, message_type: &str) {
        tracing::info!(
            method = %method,
            message_type = %message_type,
            timestamp_ms = unix_millis(),
            "send message"
        );
    }

    fn on_message_received(&self, method: &str, message_type: &str) {
        tracing::info!(
            method = %method,
            message_type = %message_type,
            timestamp_ms = unix_millis(),
            "receive message"
        );
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Short type tag for a message, e.g. `ListAlbumsResponse`.
fn message_type<T>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Opens observed calls.
#[derive(Debug, Clone)]
pub struct CallInterceptor {
    observer: Arc<dyn CallObserver>,
}

impl CallInterceptor {
    /// Create an interceptor reporting to `observer`.
    pub fn new(observer: Arc<dyn CallObserver>) -> Self {
        Self { observer }
    }

    /// Start observing a call to `method`.
    pub fn begin(&self, method: &'static str) -> Call {
        self.observer.before(method);
        Call {
            method,
            observer: Arc::clone(&self.observer),
        }
    }

    /// Observe a unary handler from start to finish.
    pub async fn unary<T, F>(&self, method: &'static str, handler: F) -> Result<T, Status>
    where
        F: Future<Output = Result<T, Status>>,
    {
        let call = self.begin(method);
        call.finish(handler.await)
    }
}

impl Default for CallInterceptor {
    fn default() -> Self {
        Self::new(Arc::new(LoggingObserver))
    }
}

/// One in-flight call.
///
/// Not `Clone`: [`finish`](Self::finish) consumes it, so a call reports its
/// outcome at most once.
#[derive(Debug)]
pub struct Call {
    method: &'static str,
    observer: Arc<dyn CallObserver>,
}

impl Call {
    /// Full method path of the call.
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Wrap the caller's message stream so each received message is reported.
    pub fn inbound<S>(&self, stream: S) -> Inbound<S> {
        Inbound {
            inner: stream,
            method: self.method,
            observer: Arc::clone(&self.observer),
        }
    }

    /// Wrap the response channel so each sent message is reported.
    pub fn outbound<T>(&self, tx: mpsc::Sender<Result<T, Status>>) -> Outbound<T> {
        Outbound {
            tx,
            method: self.method,
            observer: Arc::clone(&self.observer),
        }
    }

    /// Report a message sent outside an [`Outbound`], such as the single
    /// response of a client-streaming call.
    pub fn message_sent<T>(&self) {
        self.observer
            .on_message_sent(self.method, message_type::<T>());
    }

    /// Report the handler's outcome and hand it back unchanged.
    pub fn finish<T>(self, result: Result<T, Status>) -> Result<T, Status> {
        match &result {
            Ok(_) => self.observer.after_success(self.method),
            Err(status) => self.observer.after_failure(self.method, status),
        }
        result
    }
}

/// Caller-to-server message stream that reports every received message.
#[derive(Debug)]
pub struct Inbound<S> {
    inner: S,
    method: &'static str,
    observer: Arc<dyn CallObserver>,
}

impl<S, T> Stream for Inbound<S>
where
    S: Stream<Item = Result<T, Status>> + Unpin,
{
    type Item = Result<T, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(Pin::new(&mut self.inner).poll_next(cx));
        if let Some(Ok(_)) = &item {
            self.observer
                .on_message_received(self.method, message_type::<T>());
        }
        Poll::Ready(item)
    }
}

/// Server-to-caller sender that reports every sent message.
#[derive(Debug)]
pub struct Outbound<T> {
    tx: mpsc::Sender<Result<T, Status>>,
    method: &'static str,
    observer: Arc<dyn CallObserver>,
}

impl<T> Outbound<T> {
    /// Send one message to the caller.
    ///
    /// Fails with `Cancelled` once the caller has gone away; only messages
    /// actually handed to the response stream are reported.
    pub async fn send(&self, message: T) -> Result<(), Status> {
        self.tx
            .send(Ok(message))
            .await
            .map_err(|_| Status::cancelled("response stream closed by caller"))?;
        self.observer
            .on_message_sent(self.method, message_type::<T>());
        Ok(())
    }

    /// Resolves once the caller has stopped reading responses.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
