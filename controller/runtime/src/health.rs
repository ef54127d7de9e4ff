use crate::grpc::Readiness;
use bytes::Bytes;
use futures::future;
use http_body_util::Full;
use hyper::{body::Incoming, header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use tokio::net::TcpListener;

type Body = Full<Bytes>;

/// Serves `/live` and `/ready` until shutdown.
pub async fn serve(listener: TcpListener, readiness: Readiness, drain: drain::Watch) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Health server listening");
    }
    tokio::pin! {
        let shutdown = drain.signaled();
    }
    loop {
        let (io, client) = tokio::select! {
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(error) => {
                    tracing::warn!(%error, "Failed to accept connection");
                    continue;
                }
            },
            _ = &mut shutdown => return,
        };

        let readiness = readiness.clone();
        let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
            future::ok::<_, Infallible>(respond(
                readiness.is_ready(),
                req.method(),
                req.uri().path(),
            ))
        });
        tokio::spawn(async move {
            if let Err(error) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(io), svc)
                .await
            {
                tracing::debug!(%error, %client, "Health connection failed");
            }
        });
    }
}

fn respond(ready: bool, method: &Method, path: &str) -> Response<Body> {
    let ok = match path {
        "/live" => true,
        "/ready" => ready,
        _ => return status(StatusCode::NOT_FOUND, ""),
    };
    if !matches!(*method, Method::GET | Method::HEAD) {
        return status(StatusCode::METHOD_NOT_ALLOWED, "");
    }
    let name = path.trim_start_matches('/');
    if ok {
        status(StatusCode::OK, name)
    } else {
        status(StatusCode::SERVICE_UNAVAILABLE, &format!("not {name}"))
    }
}

fn status(code: StatusCode, text: &str) -> Response<Body> {
    let mut rsp = if text.is_empty() {
        Response::new(Body::default())
    } else {
        let mut rsp = Response::new(Body::from(format!("{text}\n")));
        rsp.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain"),
        );
        rsp
    };
    *rsp.status_mut() = code;
    rsp
}
