//! Purpose: Public entry point for opening change-stream subscriptions.
//! Exports: `ClientConfig`, `SubscriptionClient`, `Subscribe`, `DEFAULT_ADDRESS`, `DEFAULT_CONNECT_TIMEOUT`.
//! Role: Binds a service address to a transport and turns filters into `Subscription`s.
//! Invariants: `subscribe` waits only for stream establishment, bounded by `connect_timeout`.
//! Invariants: Establishment failures surface as `Connection` errors, never as stream events.
//! Invariants: The client never retries; retry policies wrap it through `Subscribe`.
#![allow(clippy::result_large_err)]

use super::remote::HttpTransport;
use super::subscription::Subscription;
use super::transport::Transport;
use crate::core::error::{Error, ErrorKind};
use crate::core::event::FilterSpec;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub type ApiResult<T> = Result<T, Error>;

/// Default service address, the port `pqsd` listens on.
pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:7000";

/// Default bound on establishing a stream.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Service address: `http://host:port`, `host:port`, or `:port`.
    pub address: String,

    /// Bound on connecting and receiving response headers.
    pub connect_timeout: Duration,

    /// Bearer token sent with every `Listen` call.
    pub token: Option<String>,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            token: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

/// Anything that can open a subscription.
///
/// Retry, backoff and resubscription policies are layered as wrappers around
/// a `Subscribe` implementation rather than inside the client.
pub trait Subscribe {
    fn subscribe(&self, filter: FilterSpec) -> impl Future<Output = ApiResult<Subscription>> + Send;
}

#[derive(Clone)]
pub struct SubscriptionClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: Url,
    connect_timeout: Duration,
    transport: Arc<dyn Transport>,
}

impl SubscriptionClient {
    pub fn new(address: impl Into<String>) -> ApiResult<Self> {
        Self::with_config(ClientConfig::new(address))
    }

    pub fn with_config(config: ClientConfig) -> ApiResult<Self> {
        let base_url = normalize_address(&config.address)?;
        let transport = HttpTransport::new(&base_url, config.connect_timeout, config.token)?;
        Ok(Self::from_parts(base_url, config.connect_timeout, Arc::new(transport)))
    }

    /// Uses a caller-provided transport instead of HTTP.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> ApiResult<Self> {
        let base_url = normalize_address(&config.address)?;
        Ok(Self::from_parts(base_url, config.connect_timeout, transport))
    }

    fn from_parts(base_url: Url, connect_timeout: Duration, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                base_url,
                connect_timeout,
                transport,
            }),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn connect_timeout(&self) -> Duration {
        self.inner.connect_timeout
    }

    /// Opens a subscription and returns once the stream is established.
    pub async fn subscribe(&self, filter: FilterSpec) -> ApiResult<Subscription> {
        let request = filter.to_request();
        tracing::debug!(
            address = %self.inner.base_url,
            tables = %request.table_regexp,
            "opening subscription"
        );
        let opened = tokio::time::timeout(
            self.inner.connect_timeout,
            self.inner.transport.open(&request),
        )
        .await;
        let stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(connection_error(err)),
            Err(_) => {
                return Err(Error::new(ErrorKind::Connection)
                    .with_message(format!(
                        "timed out after {}ms establishing stream to {}",
                        self.inner.connect_timeout.as_millis(),
                        self.inner.base_url
                    ))
                    .with_hint("Raise the connect timeout or check the service address."));
            }
        };
        Ok(Subscription::new(filter, stream))
    }

    /// Subscribes to every table.
    pub async fn subscribe_all(&self) -> ApiResult<Subscription> {
        self.subscribe(FilterSpec::all_tables()).await
    }
}

impl Subscribe for SubscriptionClient {
    fn subscribe(&self, filter: FilterSpec) -> impl Future<Output = ApiResult<Subscription>> + Send {
        SubscriptionClient::subscribe(self, filter)
    }
}

impl std::fmt::Debug for SubscriptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("connect_timeout", &self.inner.connect_timeout)
            .finish()
    }
}

fn connection_error(err: Error) -> Error {
    match err.kind() {
        ErrorKind::Connection | ErrorKind::Usage => err,
        _ => Error::new(ErrorKind::Connection)
            .with_message("failed to establish listen stream")
            .with_source(err),
    }
}

/// Normalizes a service address to `http://host:port/`.
pub(crate) fn normalize_address(raw: &str) -> ApiResult<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("service address is empty"));
    }
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else if let Some(port) = raw.strip_prefix(':') {
        format!("http://127.0.0.1:{port}")
    } else {
        format!("http://{raw}")
    };
    let mut url = Url::parse(&candidate).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid service address: {raw}"))
            .with_source(err)
    })?;
    if url.scheme() != "http" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("unsupported address scheme: {}", url.scheme()))
            .with_hint("Use an http:// address or plain host:port."));
    }
    if url.host_str().is_none() {
        return Err(Error::new(ErrorKind::Usage).with_message("service address has no host"));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
