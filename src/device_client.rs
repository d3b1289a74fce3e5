use crate::error::{EngineError, Result};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Raw reply from a device endpoint
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    /// Whether the device answered 200 OK
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Whether the device answered with any 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Plain-HTTP client for device local APIs
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
}

impl DeviceClient {
    /// Create a client that talks to devices directly, bypassing any proxy
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self { http })
    }

    /// Issue a GET to `http://ip:port{path}` bounded by `timeout`
    pub async fn get(
        &self,
        ip: Ipv4Addr,
        port: u16,
        path: &str,
        timeout: Duration,
    ) -> Result<HttpReply> {
        let url = format!("http://{}:{}{}", ip, port, path);
        tracing::debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_request_error)?;

        Ok(HttpReply { status, body })
    }
}

fn map_request_error(err: reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::Timeout
    } else {
        EngineError::Http(err)
    }
}
