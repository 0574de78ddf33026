use crate::http::{make_error_response, text_response};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Serves `/health` (always ok) and `/ready` (ok while `is_ready` returns true).
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool + Send + Sync + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let is_ready = (self.is_ready)();

        Box::pin(async move {
            if req.method() != Method::GET {
                return Ok(make_error_response(StatusCode::METHOD_NOT_ALLOWED));
            }

            let res = match req.uri().path() {
                "/health" => text_response("ok\n"),
                "/ready" => match is_ready {
                    true => text_response("ok\n"),
                    false => make_error_response(StatusCode::SERVICE_UNAVAILABLE),
                },
                _ => make_error_response(StatusCode::NOT_FOUND),
            };
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::serve;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::net::TcpListener;

    async fn spawn_admin(ready: Arc<AtomicBool>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let service = AdminService::<_, std::io::Error>::new(move || ready.load(Ordering::Relaxed));

        tokio::spawn(serve(listener, service));
        port
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let ready = Arc::new(AtomicBool::new(false));
        let port = spawn_admin(ready.clone()).await;
        let base = format!("http://127.0.0.1:{port}");

        let health = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(health.status(), 200);
        assert_eq!(health.text().await.unwrap(), "ok\n");

        let not_ready = reqwest::get(format!("{base}/ready")).await.unwrap();
        assert_eq!(not_ready.status(), 503);

        ready.store(true, Ordering::Relaxed);
        let is_ready = reqwest::get(format!("{base}/ready")).await.unwrap();
        assert_eq!(is_ready.status(), 200);

        let missing = reqwest::get(format!("{base}/metrics")).await.unwrap();
        assert_eq!(missing.status(), 404);
    }
}
