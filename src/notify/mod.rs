use std::sync::Arc;

use async_trait::async_trait;
use log::{ info, warn };
use reqwest::header::{ HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE };
use reqwest::Client as HttpClient;
use serde::Serialize;

use crate::cli::Args;
use crate::error::CoreError;

/// Outbound email collaborator. Sends are best-effort everywhere they are
/// used: a failed notification never fails the request that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), CoreError>;
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Posts to an HTTP email relay (Resend-style JSON endpoint) with a bearer
/// key.
pub struct HttpNotifier {
    http: HttpClient,
    url: String,
    from: String,
    to: String,
}

impl HttpNotifier {
    pub fn new(url: &str, api_key: Option<&str>, from: &str, to: &str) -> Result<Self, CoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|e|
                CoreError::Validation(format!("invalid notify api key: {}", e))
            )?;
            headers.insert(AUTHORIZATION, value);
        }
        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| CoreError::Validation(format!("notify client: {}", e)))?;
        Ok(Self {
            http,
            url: url.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), CoreError> {
        let payload = RelayRequest {
            from: &self.from,
            to: &self.to,
            subject,
            text: body,
        };
        let response = self.http
            .post(&self.url)
            .json(&payload)
            .send().await
            .map_err(|e| CoreError::Storage(format!("email relay unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(
                CoreError::Storage(format!("email relay returned {}", response.status()))
            );
        }
        Ok(())
    }
}

/// Stands in when no relay is configured; logs and succeeds.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, subject: &str, _body: &str) -> Result<(), CoreError> {
        info!("Email relay disabled; dropping notification '{}'", subject);
        Ok(())
    }
}

pub fn create_notifier(args: &Args) -> Result<Arc<dyn Notifier>, CoreError> {
    match &args.notify_url {
        Some(url) if !url.is_empty() => {
            info!("Email notifications will be relayed via {}", url);
            let notifier = HttpNotifier::new(
                url,
                args.notify_api_key.as_deref(),
                &args.notify_from,
                &args.notify_to
            )?;
            Ok(Arc::new(notifier))
        }
        _ => {
            warn!("No notify URL configured; email notifications disabled");
            Ok(Arc::new(NoopNotifier))
        }
    }
}
