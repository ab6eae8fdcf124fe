use crate::director::{BackendDirector, Director};
use crate::error::{BackendError, ProxyError};
use crate::logging::{BackendLogger, BackendRequest};
use crate::response::{BoxError, ProxyBody};
use crate::transport::{BackendTransport, TransportOptions};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::service::Service;
use log::{debug, info};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Forwards every request it receives to one backend.
///
/// Cloning is cheap; clones share the same connection pool.
#[derive(Clone)]
pub struct BackendHandler {
    inner: Arc<Inner>,
}

struct Inner {
    backend_url: Url,
    director: BackendDirector,
    transport: BackendTransport,
}

impl BackendHandler {
    pub fn new(
        backend_url: &Url,
        connect_timeout: Duration,
        header_timeout: Duration,
        logger: Arc<dyn BackendLogger>,
    ) -> Result<Self, ProxyError> {
        Self::with_options(
            backend_url,
            &TransportOptions::new(connect_timeout, header_timeout),
            logger,
        )
    }

    pub fn with_options(
        backend_url: &Url,
        options: &TransportOptions,
        logger: Arc<dyn BackendLogger>,
    ) -> Result<Self, ProxyError> {
        match backend_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ProxyError::Config(format!(
                    "Unsupported backend scheme '{}' in {}",
                    other, backend_url
                )));
            }
        }

        let director = BackendDirector::new(backend_url)?;
        info!(
            "Backend handler for {} (connect timeout {:?}, header timeout {:?}, {} idle)",
            backend_url,
            options.connect_timeout,
            options.header_timeout,
            options.pool_max_idle_per_host
        );

        Ok(Self {
            inner: Arc::new(Inner {
                backend_url: backend_url.clone(),
                director,
                transport: BackendTransport::new(options, logger)?,
            }),
        })
    }

    pub fn backend_url(&self) -> &Url {
        &self.inner.backend_url
    }

    /// Rewrites `req` for the backend and forwards it. Always produces a
    /// response: backend failures become empty 4xx/5xx responses.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let mut req: Request<ProxyBody> = req.map(|body| body.map_err(Into::into).boxed_unsync());

        if let Err(err) = self.inner.director.direct(&mut req) {
            debug!("Could not rewrite {} for {}: {}", req.uri(), self.inner.backend_url, err);
            let backend_req = BackendRequest::from_request(&req);
            return self
                .inner
                .transport
                .fail(&BackendError::Rewrite(err.to_string()), &backend_req);
        }

        self.inner.transport.round_trip(req).await
    }
}

impl<B> Service<Request<B>> for BackendHandler
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<ProxyBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.handle(req).await) })
    }
}
