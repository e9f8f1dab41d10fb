use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use common::{HttpClient, SubmitError};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::encoding::FormBody;

/// A fully prepared POST: headers already carry Content-Type and Content-Length.
#[derive(Debug)]
pub struct OutgoingRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: FormBody,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to send request: {0}")]
    Send(String),

    // No response head arrived in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to read response: {message}")]
    Receive {
        status: Option<StatusCode>,
        message: String,
    },
}

/// Performs one HTTP POST and buffers the whole response.
///
/// Dropping the returned future must abort the request; that is how an
/// in-flight submission gets cancelled.
pub trait Transport: Send + Sync + 'static {
    fn post(
        &self,
        request: OutgoingRequest,
    ) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}

#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, SubmitError> {
        Ok(Self::with_client(HttpClient::new()?))
    }

    pub fn with_client(client: HttpClient) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    async fn post(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError> {
        let timeout = request.timeout;
        let body = reqwest::Body::wrap_stream(request.body.into_stream());

        let response = self
            .client
            .inner()
            .post(request.url)
            .headers(request.headers)
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(timeout)
                } else {
                    TransportError::Send(e.to_string())
                }
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        // The head has arrived, so even a timeout here keeps its status
        let body = response.bytes().await.map_err(|e| TransportError::Receive {
            status: Some(status),
            message: if e.is_timeout() {
                format!("Timed out after {timeout:?} reading body")
            } else {
                e.to_string()
            },
        })?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
