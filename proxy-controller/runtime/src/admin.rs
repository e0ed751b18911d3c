use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Method, Request, Response,
    StatusCode,
};
use hyper_util::rt::TokioIo;
use ipnet::IpNet;
use prometheus_client::{encoding::text::encode, registry::Registry};
use std::{convert::Infallible, sync::Arc};
use tokio::{net::TcpListener, sync::watch};
use tracing::{debug, info, instrument, warn};

/// Serves the controller's probes, metrics and controller subnets.
#[derive(Clone, Debug)]
pub struct Admin {
    ready: watch::Receiver<bool>,
    controller_subnets: watch::Receiver<Vec<IpNet>>,
    registry: Arc<Registry>,
}

// === impl Admin ===

impl Admin {
    pub fn new(
        ready: watch::Receiver<bool>,
        controller_subnets: watch::Receiver<Vec<IpNet>>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            ready,
            controller_subnets,
            registry,
        }
    }

    /// Accepts connections until shutdown is signaled. Connections that are
    /// still open at that point are abandoned.
    #[instrument(skip_all, fields(addr = ?listener.local_addr().ok()))]
    pub async fn serve(self, listener: TcpListener, shutdown: drain::Watch) {
        info!("HTTP admin server listening");

        let signaled = shutdown.signaled();
        tokio::pin!(signaled);
        loop {
            let (io, client) = tokio::select! {
                res = listener.accept() => match res {
                    Ok(conn) => conn,
                    Err(error) => {
                        warn!(%error, "Failed to accept connection");
                        continue;
                    }
                },
                _release = &mut signaled => {
                    info!("HTTP admin server shutting down");
                    return;
                }
            };

            let admin = self.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req: Request<Incoming>| {
                    let rsp = admin.handle(&req);
                    async move { Ok::<_, Infallible>(rsp) }
                });
                if let Err(error) = http1::Builder::new()
                    .serve_connection(TokioIo::new(io), svc)
                    .await
                {
                    debug!(%client, %error, "Admin connection failed");
                }
            });
        }
    }

    fn handle<B>(&self, req: &Request<B>) -> Response<Full<Bytes>> {
        if !matches!(*req.method(), Method::GET | Method::HEAD) {
            return respond(StatusCode::METHOD_NOT_ALLOWED, "text/plain", Bytes::new());
        }

        match req.uri().path() {
            "/live" => respond(StatusCode::OK, "text/plain", "live\n"),
            "/ready" => {
                if *self.ready.borrow() {
                    respond(StatusCode::OK, "text/plain", "ready\n")
                } else {
                    respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "not ready\n")
                }
            }
            "/metrics" => {
                let mut text = String::new();
                match encode(&mut text, &self.registry) {
                    Ok(()) => respond(
                        StatusCode::OK,
                        "application/openmetrics-text; version=1.0.0; charset=utf-8",
                        text,
                    ),
                    Err(error) => {
                        warn!(%error, "Failed to encode metrics");
                        respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", Bytes::new())
                    }
                }
            }
            "/controller-subnets" => {
                let subnets = self
                    .controller_subnets
                    .borrow()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>();
                match serde_json::to_vec(&subnets) {
                    Ok(body) => respond(StatusCode::OK, "application/json", body),
                    Err(error) => {
                        warn!(%error, "Failed to encode controller subnets");
                        respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", Bytes::new())
                    }
                }
            }
            _ => respond(StatusCode::NOT_FOUND, "text/plain", Bytes::new()),
        }
    }
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut rsp = Response::new(Full::new(body.into()));
    *rsp.status_mut() = status;
    rsp.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(content_type),
    );
    rsp
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn admin() -> (watch::Sender<bool>, watch::Sender<Vec<IpNet>>, Admin) {
        let (ready_tx, ready) = watch::channel(false);
        let (subnets_tx, subnets) = watch::channel(Vec::new());
        let mut registry = Registry::with_prefix("caddy_proxy_controller");
        let metrics = crate::Metrics::register(&mut registry);
        metrics.cycles.inc();
        (
            ready_tx,
            subnets_tx,
            Admin::new(ready, subnets, Arc::new(registry)),
        )
    }

    fn get(path: &str) -> Request<()> {
        Request::get(path).body(()).unwrap()
    }

    async fn body(rsp: Response<Full<Bytes>>) -> String {
        let bytes = rsp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn readiness() {
        let (ready, _subnets, admin) = admin();
        let rsp = admin.handle(&get("/ready"));
        assert_eq!(rsp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(rsp).await, "not ready\n");

        ready.send_replace(true);
        let rsp = admin.handle(&get("/ready"));
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(body(rsp).await, "ready\n");

        assert_eq!(admin.handle(&get("/live")).status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn controller_subnets() {
        let (_ready, subnets, admin) = admin();
        let rsp = admin.handle(&get("/controller-subnets"));
        assert_eq!(body(rsp).await, "[]");

        subnets.send_replace(vec![
            "10.200.0.0/16".parse().unwrap(),
            "fd00:200::/64".parse().unwrap(),
        ]);
        let rsp = admin.handle(&get("/controller-subnets"));
        assert_eq!(
            rsp.headers()[header::CONTENT_TYPE],
            header::HeaderValue::from_static("application/json")
        );
        assert_eq!(body(rsp).await, r#"["10.200.0.0/16","fd00:200::/64"]"#);
    }

    #[tokio::test]
    async fn metrics() {
        let (_ready, _subnets, admin) = admin();
        let rsp = admin.handle(&get("/metrics"));
        assert_eq!(rsp.status(), StatusCode::OK);
        assert!(body(rsp)
            .await
            .contains("caddy_proxy_controller_generation_cycles_total 1"));
    }

    #[test]
    fn rejects_unknown_requests() {
        let (_ready, _subnets, admin) = admin();
        assert_eq!(
            admin.handle(&get("/nope")).status(),
            StatusCode::NOT_FOUND
        );
        let post = Request::post("/ready").body(()).unwrap();
        assert_eq!(
            admin.handle(&post).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
