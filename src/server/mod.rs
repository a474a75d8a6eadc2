pub mod api;

use crate::cli::Args;
use crate::engine::ChatEngine;
use crate::error::ConfigurationError;
use api::AppState;
use axum_server::tls_rustls::RustlsConfig;
use log::{ info, warn };
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct Server {
    addr: String,
    engine: Arc<ChatEngine>,
    args: Args,
}

impl Server {
    pub fn new(addr: String, engine: Arc<ChatEngine>, args: Args) -> Self {
        Self { addr, engine, args }
    }

    fn tls_paths(&self) -> Result<Option<(String, String)>, ConfigurationError> {
        if !self.args.enable_tls {
            return Ok(None);
        }
        let cert = self.args.tls_cert_path.clone().ok_or_else(|| ConfigurationError::missing("TLS_CERT_PATH"))?;
        let key = self.args.tls_key_path.clone().ok_or_else(|| ConfigurationError::missing("TLS_KEY_PATH"))?;
        Ok(Some((cert, key)))
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let state = AppState::new(
            self.engine.clone(),
            self.args.server_api_key.clone(),
            self.args.rate_limit_per_second,
            self.args.rate_limit_burst
        );
        if state.api_key.is_none() {
            warn!("HTTP API configured WITHOUT API Key authentication");
        }
        let app = api::router(state);

        match self.tls_paths()? {
            Some((cert_path, key_path)) => {
                let addr: SocketAddr = self.addr
                    .parse()
                    .map_err(|e| ConfigurationError::invalid("SERVER_ADDR", e))?;
                let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path).await?;
                info!("HTTPS API listening on https://{}", addr);
                axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
            }
            None => {
                let listener = tokio::net::TcpListener::bind(&self.addr).await?;
                info!("HTTP API listening on http://{}", listener.local_addr()?);
                axum::serve(listener, app.into_make_service()).await?;
            }
        }
        Ok(())
    }
}
