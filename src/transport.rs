use crate::classify::classify;
use crate::error::{BackendError, ProxyError};
use crate::headers::{populate_via_header, remove_hop_headers};
use crate::logging::{BackendLogger, BackendRequest, LogDetails};
use crate::response::{new_error_response, ProxyBody};
use http::header::CONTENT_LENGTH;
use http::{Request, Response};
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use log::debug;
use serde_json::Value;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Idle keep-alive connections kept per backend host.
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 20;
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Bounds establishing each new TCP connection.
    pub connect_timeout: Duration,
    /// Bounds the wait for the response head once the request is dispatched.
    pub header_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
}

impl TransportOptions {
    pub fn new(connect_timeout: Duration, header_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            header_timeout,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
        }
    }
}

/// Pooled HTTP client for one backend. A failed round trip never surfaces as
/// an error: it is classified, logged and answered with an empty response.
pub struct BackendTransport {
    client: Client<HttpsConnector<HttpConnector>, ProxyBody>,
    header_timeout: Duration,
    logger: Arc<dyn BackendLogger>,
}

impl BackendTransport {
    pub fn new(
        options: &TransportOptions,
        logger: Arc<dyn BackendLogger>,
    ) -> Result<Self, ProxyError> {
        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(options.connect_timeout));
        http.set_nodelay(true);
        http.enforce_http(false);

        let tls = native_tls::TlsConnector::new()
            .map_err(|e| ProxyError::Config(format!("Failed to initialise TLS: {}", e)))?;

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .pool_idle_timeout(options.pool_idle_timeout)
            .build(HttpsConnector::from((http, tls.into())));

        Ok(Self {
            client,
            header_timeout: options.header_timeout,
            logger,
        })
    }

    pub async fn round_trip(&self, req: Request<ProxyBody>) -> Response<ProxyBody> {
        let backend_req = BackendRequest::from_request(&req);
        match self.dispatch(req).await {
            Ok(response) => response,
            Err(err) => self.fail(&err, &backend_req),
        }
    }

    async fn dispatch(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, BackendError> {
        check_content_length(&req)?;

        let response = timeout(self.header_timeout, self.client.request(req))
            .await
            .map_err(|_| BackendError::HeaderTimeout(self.header_timeout))??;

        let (mut parts, body) = response.into_parts();
        remove_hop_headers(&mut parts.headers);
        populate_via_header(&mut parts.headers, parts.version);

        Ok(Response::from_parts(parts, body.map_err(Into::into).boxed_unsync()))
    }

    /// Chooses the status for `err`, logs it against `req` and builds the
    /// response sent in place of the backend's.
    pub(crate) fn fail(&self, err: &BackendError, req: &BackendRequest) -> Response<ProxyBody> {
        let kind = classify(err);
        let status = kind.status();
        let error = error_text(err);
        debug!("Backend request {} {} failed ({:?}): {}", req.method, req.uri, kind, error);

        let mut details = LogDetails::new();
        details.insert("error".into(), Value::from(error));
        details.insert("status".into(), Value::from(status.as_u16()));
        self.logger.log_from_backend_request(details, req);

        new_error_response(status)
    }
}

// The client writes the body after the head has been sent, so a body shorter
// than its declared length would only surface as a stalled exchange.
fn check_content_length(req: &Request<ProxyBody>) -> Result<(), BackendError> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());

    match (declared, req.body().size_hint().exact()) {
        (Some(declared), Some(actual)) if declared != actual => {
            Err(BackendError::ContentLengthMismatch { declared, actual })
        }
        _ => Ok(()),
    }
}

// The client's own message is generic ("client error (Connect)"), so the
// causes are appended to it.
fn error_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.ends_with(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}
