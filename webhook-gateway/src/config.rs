//! Gateway configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Webhook gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Payment gateway provider name (idempotency key prefix)
    pub provider: String,

    /// Header carrying the `t=...,v1=...` signature
    pub signature_header: String,

    /// Shared signing secret
    pub signing_secret: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8086,
            provider: "stripe".to_string(),
            signature_header: "Stripe-Signature".to_string(),
            signing_secret: String::new(),
        }
    }
}

impl GatewayConfig {
    /// Load from environment variables; the signing secret is required
    pub fn from_env() -> Result<Self> {
        let mut config = GatewayConfig::default();

        if let Ok(host) = std::env::var("GATEWAY_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("GATEWAY_PORT") {
            config.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Bad GATEWAY_PORT: {port}")))?;
        }
        if let Ok(provider) = std::env::var("GATEWAY_PROVIDER") {
            config.provider = provider;
        }
        if let Ok(header) = std::env::var("GATEWAY_SIGNATURE_HEADER") {
            config.signature_header = header;
        }

        config.signing_secret = std::env::var("GATEWAY_SIGNING_SECRET")
            .map_err(|_| Error::Config("GATEWAY_SIGNING_SECRET is required".to_string()))?;

        Ok(config)
    }

    /// Bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
