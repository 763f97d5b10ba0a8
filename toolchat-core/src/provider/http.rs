//! Request plumbing shared by the providers

use super::{ProviderConfig, ProviderError};
use crate::error::Error;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

pub(super) fn client(config: &ProviderConfig) -> crate::error::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| {
            Error::config_invalid("cannot build the HTTP client")
                .with_context("provider", config.provider_type.as_str())
                .set_source(e)
        })
}

/// POST `body` as JSON with the configured extra headers
pub(super) fn post(
    client: &Client,
    config: &ProviderConfig,
    path: &str,
    body: &impl serde::Serialize,
) -> RequestBuilder {
    config
        .headers
        .iter()
        .fold(client.post(config.endpoint(path)).json(body), |req, (k, v)| {
            req.header(k, v)
        })
}

/// Send the request; any non-success status becomes a [`ProviderError`].
pub(super) async fn send(req: RequestBuilder, model: &str) -> Result<Response, ProviderError> {
    let response = req
        .send()
        .await
        .map_err(|e| ProviderError::Network(e.to_string()))?;
    if response.status().is_success() {
        return Ok(response);
    }

    let code = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(code, body = %body, "provider rejected request");
    Err(classify_status(code, retry_after, body, model))
}

pub(super) fn classify_status(
    code: u16,
    retry_after: Option<u64>,
    body: String,
    model: &str,
) -> ProviderError {
    match code {
        429 => ProviderError::RateLimited { retry_after },
        401 | 403 => ProviderError::Unauthorized,
        404 => ProviderError::ModelNotFound(model.to_string()),
        _ => ProviderError::Status { code, body },
    }
}

/// Pull every complete `data:` payload out of `buffer`, leaving a trailing
/// partial event in place. Events are separated by a blank line.
pub(super) fn drain_sse_data(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(end) = buffer.find("\n\n") {
        let event: String = buffer.drain(..end + 2).collect();
        payloads.extend(
            event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|data| data.trim_start().to_string()),
        );
    }
    payloads
}

/// The `data:` payloads of an SSE response, in order.
/// A transport failure ends the stream with `Err`.
pub(super) fn sse_data(
    response: Response,
) -> impl futures_core::Stream<Item = Result<String, String>> + Send {
    async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    buffer.push_str(&String::from_utf8_lossy(&chunk));
                    if buffer.contains("\r\n") {
                        buffer = buffer.replace("\r\n", "\n");
                    }
                    for data in drain_sse_data(&mut buffer) {
                        yield Ok(data);
                    }
                }
                Err(e) => {
                    yield Err(e.to_string());
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_keeps_partial_event() {
        let mut buffer = String::from("data: {\"a\":1}\n\nevent: ping\ndata: {}\n\ndata: {\"b\"");
        let payloads = drain_sse_data(&mut buffer);
        assert_eq!(payloads, vec!["{\"a\":1}".to_string(), "{}".to_string()]);
        assert_eq!(buffer, "data: {\"b\"");
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(429, Some(7), String::new(), "m"),
            ProviderError::RateLimited { retry_after: Some(7) }
        ));
        assert!(matches!(classify_status(403, None, String::new(), "m"), ProviderError::Unauthorized));
        assert!(matches!(
            classify_status(404, None, String::new(), "gpt-9"),
            ProviderError::ModelNotFound(m) if m == "gpt-9"
        ));
        assert!(matches!(
            classify_status(500, None, "boom".into(), "m"),
            ProviderError::Status { code: 500, .. }
        ));
    }
}
