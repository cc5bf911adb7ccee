use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{info, warn, Instrument, Span};

/// Request paths excluded from access logging
#[derive(Clone, Debug, Default)]
pub struct GrpcLoggingConfig {
    pub ignored_paths: Vec<String>,
}

impl GrpcLoggingConfig {
    pub fn new(ignored_paths: Vec<String>) -> Self {
        Self { ignored_paths }
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.ignored_paths.iter().any(|prefix| path.starts_with(prefix))
    }
}

/// Tower layer writing one access log line per RPC
#[derive(Clone, Default)]
pub struct GrpcLoggingLayer {
    config: GrpcLoggingConfig,
}

impl GrpcLoggingLayer {
    pub fn new(config: GrpcLoggingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for GrpcLoggingLayer {
    type Service = GrpcLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcLoggingService {
            inner,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct GrpcLoggingService<S> {
    inner: S,
    config: GrpcLoggingConfig,
}

/// Splits `/package.Service/Method` into service and method.
fn rpc_name(path: &str) -> (&str, &str) {
    let trimmed = path.trim_start_matches('/');
    trimmed.split_once('/').unwrap_or((trimmed, ""))
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for GrpcLoggingService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Error: std::fmt::Display,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let path = req.uri().path().to_string();
        let ignored = self.config.is_ignored(&path);
        let started = Instant::now();
        let response = self.inner.call(req);

        Box::pin(
            async move {
                let result = response.await;
                if ignored {
                    return result;
                }

                let (service, method) = rpc_name(&path);
                let elapsed_ms = started.elapsed().as_millis();
                match &result {
                    Ok(response) => {
                        // Unary errors arrive as trailers-only responses with grpc-status in headers.
                        let grpc_status = response
                            .headers()
                            .get("grpc-status")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("0");
                        info!(
                            rpc.service = %service,
                            rpc.method = %method,
                            grpc_status = %grpc_status,
                            elapsed_ms = %elapsed_ms,
                            "rpc finished"
                        );
                    }
                    Err(e) => {
                        warn!(
                            rpc.service = %service,
                            rpc.method = %method,
                            elapsed_ms = %elapsed_ms,
                            error = %e,
                            "rpc transport failure"
                        );
                    }
                }
                result
            }
            .instrument(Span::current()),
        )
    }
}
