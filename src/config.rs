use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMethod {
    None,
    V1,
    V3,
}

impl SignatureMethod {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "v1" => Some(Self::V1),
            "v3" => Some(Self::V3),
            _ => None,
        }
    }
}

/// Everything the webhook endpoint needs to check request signatures.
#[derive(Debug, Clone)]
pub struct SignatureConfig {
    pub method: SignatureMethod,
    pub client_secret: String,
    /// Public URL the provider signs requests against (v3 only).
    pub public_webhook_url: String,
}

pub struct Config {
    pub listen_addr: SocketAddr,
    pub debounce: Duration,
    pub dlq_capacity: usize,
    pub signature_method: SignatureMethod,
    pub hubspot_client_secret: String,
    pub public_webhook_url: String,
    pub contribution_api_url: String,
    pub contribution_api_token: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let listen_addr: SocketAddr = std::env::var("WC_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .expect("Invalid WC_LISTEN_ADDR");
        let debounce_secs: u64 = std::env::var("WC_DEBOUNCE_SECS")
            .unwrap_or_else(|_| "120".into())
            .parse()
            .unwrap_or(120);
        let dlq_capacity: usize = std::env::var("WC_DLQ_CAPACITY")
            .unwrap_or_else(|_| "100".into())
            .parse()
            .unwrap_or(100);
        let hubspot_client_secret =
            std::env::var("WC_HUBSPOT_CLIENT_SECRET").unwrap_or_default();
        // Unsigned requests are only acceptable when no secret is configured.
        let signature_method = match std::env::var("WC_SIGNATURE_METHOD") {
            Ok(raw) => SignatureMethod::parse(&raw).expect("Invalid WC_SIGNATURE_METHOD"),
            Err(_) if hubspot_client_secret.is_empty() => SignatureMethod::None,
            Err(_) => SignatureMethod::V3,
        };
        let public_webhook_url = std::env::var("WC_PUBLIC_WEBHOOK_URL")
            .unwrap_or_else(|_| format!("http://{listen_addr}/webhooks/hubspot"));
        let contribution_api_url = std::env::var("WC_CONTRIBUTION_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:3000/api".into());
        let contribution_api_token =
            std::env::var("WC_CONTRIBUTION_API_TOKEN").unwrap_or_default();

        Self {
            listen_addr,
            debounce: Duration::from_secs(debounce_secs),
            dlq_capacity,
            signature_method,
            hubspot_client_secret,
            public_webhook_url,
            contribution_api_url,
            contribution_api_token,
        }
    }

    pub fn signature(&self) -> SignatureConfig {
        SignatureConfig {
            method: self.signature_method,
            client_secret: self.hubspot_client_secret.clone(),
            public_webhook_url: self.public_webhook_url.clone(),
        }
    }
}
