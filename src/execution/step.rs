//! Individual Step Dispatch
//!
//! Performs the outbound HTTP call described by a [`StepRequest`] and
//! captures the response. Any status code is a completed call; only
//! transport failures and timeouts are errors.

use std::time::Duration;

use log::debug;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};

use crate::error::{Error, Result};
use crate::workflow::{Headers, StepRequest, StepResult};

/// Executes a single step request.
///
/// # Arguments
///
/// * `client` - Shared HTTP client
/// * `request` - Method, URL, headers and body to send
/// * `timeout` - Limit for the whole call, including reading the body
///
/// # Returns
///
/// * `Ok(StepResult)` - The target answered, whatever the status
/// * `Err` - Invalid method, transport failure or timeout
pub async fn dispatch(client: &Client, request: &StepRequest, timeout: Duration) -> Result<StepResult> {
    let method = Method::from_bytes(request.method.as_bytes())
        .map_err(|_| Error::Transport(format!("unsupported method '{}'", request.method)))?;

    let mut builder = client
        .request(method, &request.url)
        .timeout(timeout)
        .body(request.body.clone());
    for (name, values) in &request.headers {
        for value in values {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }

    debug!("Calling {} {}", request.method, request.url);
    let response = builder
        .send()
        .await
        .map_err(|e| classify(e, timeout))?;

    let status = response.status().as_u16();
    debug!("Response {} from {}", status, request.url);

    let headers = collect_headers(response.headers());
    let body = response.text().await.map_err(|e| classify(e, timeout))?;

    Ok(StepResult {
        status: Some(status),
        headers,
        body,
    })
}

/// Converts response headers into the multi-valued model representation.
pub(crate) fn collect_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        headers
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    headers
}

fn classify(err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_collect_headers_keeps_repeated_values() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", HeaderValue::from_static("a=1"));
        map.append("set-cookie", HeaderValue::from_static("b=2"));
        map.insert("content-type", HeaderValue::from_static("text/plain"));

        let headers = collect_headers(&map);
        assert_eq!(headers["set-cookie"], vec!["a=1", "b=2"]);
        assert_eq!(headers["content-type"], vec!["text/plain"]);
    }

    #[tokio::test]
    async fn test_dispatch_get() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-served-by", "mock")
                    .set_body_string(r#"{"x":"y"}"#),
            )
            .mount(&server)
            .await;

        let request = StepRequest::new("GET", format!("{}/data", server.uri()));
        let result = dispatch(&Client::new(), &request, TIMEOUT).await.unwrap();

        assert_eq!(result.status, Some(200));
        assert_eq!(result.body, r#"{"x":"y"}"#);
        assert_eq!(result.headers["x-served-by"], vec!["mock"]);
    }

    #[tokio::test]
    async fn test_dispatch_post_sends_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .and(header("x-api-key", "secret"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .expect(1)
            .mount(&server)
            .await;

        let request = StepRequest::new("POST", format!("{}/ingest", server.uri()))
            .with_header("x-api-key", "secret")
            .with_body("payload");
        let result = dispatch(&Client::new(), &request, TIMEOUT).await.unwrap();

        assert_eq!(result.status, Some(201));
        assert_eq!(result.body, "created");
    }

    #[tokio::test]
    async fn test_error_status_is_still_a_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let request = StepRequest::new("GET", server.uri());
        let result = dispatch(&Client::new(), &request, TIMEOUT).await.unwrap();

        assert_eq!(result.status, Some(500));
        assert_eq!(result.body, "boom");
    }

    #[tokio::test]
    async fn test_dispatch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let request = StepRequest::new("GET", server.uri());
        let limit = Duration::from_millis(200);
        let err = dispatch(&Client::new(), &request, limit).await.unwrap_err();

        assert!(matches!(err, Error::Timeout(d) if d == limit), "{:?}", err);
    }

    #[tokio::test]
    async fn test_dispatch_connection_refused() {
        let request = StepRequest::new("GET", "http://127.0.0.1:1/unreachable");
        let err = dispatch(&Client::new(), &request, TIMEOUT).await.unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_dispatch_invalid_method() {
        let request = StepRequest::new("NOT A METHOD", "http://127.0.0.1:1/");
        let err = dispatch(&Client::new(), &request, TIMEOUT).await.unwrap_err();

        assert!(err.to_string().contains("unsupported method"));
    }
}
