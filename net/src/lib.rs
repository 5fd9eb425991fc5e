//! Network layer for the Tavern client.
//!
//! # Architecture
//!
//! Two independent layers wrap every backend call:
//!
//! - [`transport`] - a single HTTP exchange with a default timeout and
//!   automatic re-issue on timeout (skipped for long-poll paths)
//! - [`retry`] - the attempt loop: per-attempt deadline, validity predicate,
//!   fixed inter-attempt delay, bounded or unbounded attempt count
//!
//! Both layers are active at once. The transport bounds how long one
//! exchange may hang; the executor bounds how many attempts a logical
//! operation gets and how long each may take in total.
//!
//! [`api`] describes the backend as the [`GameApi`] trait. Every call returns
//! the raw JSON payload; callers decide whether the payload is usable through
//! the executor's validity predicate.
//!
//! # Error Handling
//!
//! Every transport failure (network, non-2xx status, timeout, undecodable
//! body) is a [`TransportError`]. The executor folds transport failures,
//! deadline overruns and rejected payloads into [`AttemptFailure`]. A
//! [`RetryError`] is produced only when a bounded policy runs out of attempts
//! or the caller asks the loop to stop.

pub mod api;
pub mod retry;
pub mod transport;

use std::time::Duration;

pub use api::{ApiFut, GameApi, HttpGameApi};
pub use retry::{
    AttemptFailure, AttemptLimit, RetryError, RetryPolicy, Validated, run_with_retry,
    run_with_retry_while,
};
pub use transport::{
    DEFAULT_REQUEST_TIMEOUT, REQUEST_ID_HEADER, Transport, TransportError, TransportRequest,
    TransportSettings,
};

pub use tavern_types;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Client builder shared by every transport.
///
/// No overall timeout is set here: the transport decides per request.
pub fn http_client_builder() -> reqwest::ClientBuilder {
    use reqwest::header::{HeaderMap, HeaderValue};

    let mut default_headers = HeaderMap::new();
    default_headers.insert("X-Client-Lang", HeaderValue::from_static("rust"));
    default_headers.insert("X-Client-OS", HeaderValue::from_static(std::env::consts::OS));
    default_headers.insert(
        "X-Client-Version",
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers)
}
