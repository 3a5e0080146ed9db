//! HTTP clients for Redfish-style JSON APIs, the Cisco XML API and plain JSON devices.
//! Management controllers ship self-signed certificates, so verification is off.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::types::Credentials;
use crate::error::{Result, TransportError};

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const XML_TIMEOUT: Duration = Duration::from_secs(20);

fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(timeout)
        .build()?)
}

async fn send(request: RequestBuilder, url: &str) -> Result<Response> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        debug!("{} returned {}", url, status);
        return Err(TransportError::HttpStatus { url: url.to_string(), status: status.as_u16() }.into());
    }
    Ok(response)
}

/// Parse a JSON body; an empty body is `Value::Null`.
async fn json_body(response: Response) -> Result<Value> {
    let text = response.text().await?;
    trace!("response: {}", text);
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

#[derive(Debug, Clone)]
pub struct JsonClient {
    client: Client,
    base_url: String,
    auth: Option<(String, String)>,
}

impl JsonClient {
    /// HTTPS client with basic auth against `https://<hostname>/<base_path>`.
    pub fn https(creds: &Credentials, base_path: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(HTTP_TIMEOUT)?,
            base_url: format!("https://{}/{}", creds.hostname, base_path),
            auth: Some((creds.username.clone(), creds.password_or_empty().to_string())),
        })
    }

    /// Unauthenticated plain-HTTP client against `http://<hostname>/`.
    pub fn plain(hostname: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(HTTP_TIMEOUT)?,
            base_url: format!("http://{}/", hostname),
            auth: None,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = send(self.authorize(self.client.get(&url)), &url).await?;
        json_body(response).await
    }

    pub async fn patch(&self, path: &str, payload: &Value) -> Result<Value> {
        let url = self.url(path);
        debug!("PATCH {} {}", url, payload);
        let response = send(self.authorize(self.client.patch(&url).json(payload)), &url).await?;
        json_body(response).await
    }

    pub async fn post(&self, path: &str, payload: &Value) -> Result<Value> {
        let url = self.url(path);
        debug!("POST {} {}", url, payload);
        let response = send(self.authorize(self.client.post(&url).json(payload)), &url).await?;
        json_body(response).await
    }
}

/// Posts raw XML documents to a single endpoint and returns the response text.
#[derive(Debug, Clone)]
pub struct XmlClient {
    client: Client,
    url: String,
}

impl XmlClient {
    pub fn new(url: String) -> Result<Self> {
        Ok(Self { client: build_client(XML_TIMEOUT)?, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `body` is not logged: login documents carry the password.
    pub async fn post(&self, body: String) -> Result<String> {
        debug!("POST {} ({} bytes)", self.url, body.len());
        let request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(body);
        let response = send(request, &self.url).await?;
        let text = response.text().await?;
        trace!("response: {}", text);
        Ok(text)
    }
}
