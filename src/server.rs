//! HTTP/1 front end

use crate::app::AppContext;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Largest request body accepted, in bytes
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Routing server
pub struct RouterServer {
    app: Arc<AppContext>,
    addr: SocketAddr,
}

impl RouterServer {
    pub fn new(app: Arc<AppContext>, addr: SocketAddr) -> Self {
        Self { app, addr }
    }

    /// Bind the configured address and serve until the process exits
    pub async fn start(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        serve(self.app, listener).await
    }
}

/// Serve `app` on an already bound listener
pub async fn serve(app: Arc<AppContext>, listener: TcpListener) -> std::io::Result<()> {
    info!("Service router listening on http://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "Accepted connection");
        let io = TokioIo::new(stream);
        let app = Arc::clone(&app);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let app = Arc::clone(&app);
                async move { Ok::<_, Infallible>(handle_request(req, &app).await) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving connection: {:?}", err);
            }
        });
    }
}

async fn handle_request(req: Request<Incoming>, app: &AppContext) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(path = %parts.uri.path(), "Rejected request body: {}", e);
            let mut response =
                Response::new(Full::new(Bytes::from_static(b"413 Payload Too Large")));
            *response.status_mut() = StatusCode::PAYLOAD_TOO_LARGE;
            return response;
        }
    };

    app.handle(Request::from_parts(parts, body)).await
}
