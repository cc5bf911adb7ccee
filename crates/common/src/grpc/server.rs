use std::net::SocketAddr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tracing::{debug, error, info};

use super::{GrpcLoggingConfig, GrpcLoggingLayer};

/// PEM file locations for the listening endpoint. A CA enables mutual TLS.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrpcTlsConfig {
    pub ca_cert_path: Option<String>,
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone)]
pub struct GrpcServerConfig {
    pub host: String,
    pub port: u16,
    pub logging_config: GrpcLoggingConfig,
    pub tls: Option<GrpcTlsConfig>,
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            logging_config: GrpcLoggingConfig::default(),
            tls: None,
        }
    }
}

async fn load_tls(config: &GrpcTlsConfig) -> anyhow::Result<ServerTlsConfig> {
    let cert = tokio::fs::read(&config.cert_path)
        .await
        .with_context(|| format!("reading tls certificate {}", config.cert_path))?;
    let key = tokio::fs::read(&config.key_path)
        .await
        .with_context(|| format!("reading tls key {}", config.key_path))?;

    let mut tls = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));
    if let Some(ca_path) = &config.ca_cert_path {
        let ca = tokio::fs::read(ca_path)
            .await
            .with_context(|| format!("reading ca certificate {}", ca_path))?;
        tls = tls.client_ca_root(Certificate::from_pem(ca));
    }
    Ok(tls)
}

/// Serves `routes` until the token is cancelled.
pub async fn run_grpc_server(
    config: GrpcServerConfig,
    routes: Routes,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid grpc bind address {}:{}", config.host, config.port))?;

    let mut builder = Server::builder();
    if let Some(tls) = &config.tls {
        builder = builder.tls_config(load_tls(tls).await?)?;
    }

    info!(
        address = %addr,
        tls = config.tls.is_some(),
        mutual_tls = config.tls.as_ref().is_some_and(|t| t.ca_cert_path.is_some()),
        "starting gRPC server"
    );

    let serve = builder
        .layer(GrpcLoggingLayer::new(config.logging_config.clone()))
        .add_routes(routes)
        .serve_with_shutdown(addr, async move {
            cancellation_token.cancelled().await;
            debug!("gRPC server shutdown signal received");
        });

    serve.await.map_err(|e| {
        error!(error = %e, "gRPC server error");
        e.into()
    })
}
