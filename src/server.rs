use crate::director::ClientAddr;
use crate::error::ProxyError;
use crate::handler::BackendHandler;
use hyper::body::Incoming;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Binds `addr` and serves every connection with `handler`.
pub async fn run(addr: SocketAddr, handler: BackendHandler) -> Result<(), ProxyError> {
    info!("Binding HTTP listener to: {}", addr);
    let listener = TcpListener::bind(addr).await?;
    info!("Relaying http://{} -> {}", addr, handler.backend_url());
    serve(listener, handler).await
}

pub async fn serve(listener: TcpListener, handler: BackendHandler) -> Result<(), ProxyError> {
    loop {
        let (stream, remote_addr) = listener.accept().await?;
        debug!("Accepted connection from {}", remote_addr);

        let handler = handler.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |mut req: Request<Incoming>| {
                req.extensions_mut().insert(ClientAddr(remote_addr));
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handler.handle(req).await) }
            });

            if let Err(err) = ServerBuilder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await
            {
                error!("Error serving HTTP connection from {}: {}", remote_addr, err);
            }
        });
    }
}
