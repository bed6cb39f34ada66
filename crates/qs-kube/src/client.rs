//! API client configuration and the scale subresource

use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{KubeError, Result, TargetSpec};

/// Connection parameters for the orchestrator API.
///
/// Authentication is one of: basic (user and password both set), bearer
/// (token read from `token_file` at client construction), or anonymous.
#[derive(Debug, Clone, Default)]
pub struct ApiConfig {
    pub url: String,
    pub user: Option<String>,
    pub passwd: Option<String>,
    pub token_file: Option<String>,
    pub ca_file: Option<String>,
    pub insecure: bool,
}

#[derive(Debug, Clone)]
enum Auth {
    Basic { user: String, passwd: String },
    Bearer(String),
    Anonymous,
}

/// Kubernetes `Scale` object, reduced to what the autoscaler touches.
/// Metadata is carried opaquely so updates echo back what the server
/// sent (including `resourceVersion`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scale {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub spec: ScaleSpec,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScaleSpec {
    #[serde(default)]
    pub replicas: i32,
}

/// HTTP client bound to one API server.
#[derive(Debug, Clone)]
pub struct KubeClient {
    base_url: String,
    http: reqwest::Client,
    auth: Auth,
}

impl KubeClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(KubeError::MissingUrl);
        }

        let mut builder = reqwest::Client::builder();
        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca_file) = &config.ca_file {
            match load_ca(ca_file) {
                Ok(cert) => builder = builder.add_root_certificate(cert),
                Err(e) => warn!(
                    path = %ca_file,
                    error = %e,
                    "failed to load root CA file, continuing with system roots"
                ),
            }
        }

        let auth = if let Some(path) = &config.token_file {
            let token = std::fs::read_to_string(path).map_err(|source| KubeError::TokenFile {
                path: path.clone(),
                source,
            })?;
            Auth::Bearer(token.trim().to_string())
        } else if let (Some(user), Some(passwd)) = (&config.user, &config.passwd) {
            Auth::Basic {
                user: user.clone(),
                passwd: passwd.clone(),
            }
        } else {
            Auth::Anonymous
        };

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            http: builder.build()?,
            auth,
        })
    }

    /// Read the current scale of the target.
    pub async fn get_scale(&self, target: &TargetSpec) -> Result<Scale> {
        let url = format!("{}{}", self.base_url, target.scale_path());
        let scale = self
            .authorize(self.http.get(&url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(scale)
    }

    /// Replace the scale of the target.
    pub async fn put_scale(&self, target: &TargetSpec, scale: &Scale) -> Result<Scale> {
        let url = format!("{}{}", self.base_url, target.scale_path());
        let scale = self
            .authorize(self.http.put(&url))
            .json(scale)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(scale)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::Basic { user, passwd } => request.basic_auth(user, Some(passwd)),
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Anonymous => request,
        }
    }
}

fn load_ca(path: &str) -> Result<reqwest::Certificate> {
    let pem = std::fs::read(path)?;
    Ok(reqwest::Certificate::from_pem(&pem)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_url() {
        let err = KubeClient::new(&ApiConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "API URL must be defined");
    }

    #[test]
    fn anonymous_client_builds() {
        let config = ApiConfig {
            url: "http://127.0.0.1:8080".into(),
            ..Default::default()
        };
        KubeClient::new(&config).unwrap();
    }

    #[test]
    fn insecure_client_builds() {
        let config = ApiConfig {
            url: "https://127.0.0.1:443".into(),
            insecure: true,
            ..Default::default()
        };
        KubeClient::new(&config).unwrap();
    }

    #[test]
    fn missing_token_file_is_fatal() {
        let config = ApiConfig {
            url: "http://127.0.0.1:8080".into(),
            token_file: Some("/tmp/file-that-does-not-exist".into()),
            ..Default::default()
        };
        let err = KubeClient::new(&config).unwrap_err();
        assert!(matches!(err, KubeError::TokenFile { .. }));
    }

    #[test]
    fn unreadable_ca_file_is_tolerated() {
        let config = ApiConfig {
            url: "https://127.0.0.1:443".into(),
            ca_file: Some("/tmp/ca-that-does-not-exist.pem".into()),
            ..Default::default()
        };
        KubeClient::new(&config).unwrap();
    }
}
