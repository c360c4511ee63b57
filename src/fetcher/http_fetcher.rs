use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{
    HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED,
};
use reqwest::StatusCode;
use tracing::debug;

use crate::app::FetchError;
use crate::fetcher::{
    http_date, parse_http_date, FetchRequest, ResponseBody, Transport, TransportResponse,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_USER_AGENT: &str = concat!("freshet/", env!("CARGO_PKG_VERSION"));

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_options(DEFAULT_TIMEOUT, DEFAULT_USER_AGENT)
    }

    pub fn with_options(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: &FetchRequest) -> Result<TransportResponse, FetchError> {
        let mut headers = request.headers.clone();

        if let Some(since) = request.if_modified_since() {
            if let Ok(value) = HeaderValue::from_str(&http_date(since)) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }

        let response = self
            .client
            .get(request.url().clone())
            .headers(headers)
            .send()?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!(url = %request.url(), "Server reported not modified");
            return Ok(TransportResponse::NotModified);
        }

        if !status.is_success() {
            return Err(FetchError::Status {
                url: request.url().to_string(),
                status: status.as_u16(),
            });
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };

        let content_type = header(CONTENT_TYPE);
        // Only set when the client did not already decode the body itself.
        let content_encoding = header(CONTENT_ENCODING);
        let last_modified = header(LAST_MODIFIED).and_then(|s| parse_http_date(&s));

        Ok(TransportResponse::Body(ResponseBody {
            reader: Box::new(response),
            content_type,
            content_encoding,
            last_modified,
        }))
    }
}
