//! Reqwest-backed function invoker.
//!
//! Forwards a function invocation to `<gateway-base>/<function-id>` and folds
//! the HTTP response into an `HttpResp` datum. Every transport failure maps to
//! a `function_invoke_failed` result; the engine never sees a reqwest error.

use async_trait::async_trait;
use datum_core::{
    Completion, CompletionError, Datum, ErrorKind, FunctionInvoker, Headers, HttpMethod,
    StageResult,
};
use reqwest::Client;
use tracing::instrument;

/// Function invoker dispatching over a shared `reqwest::Client`.
pub struct ReqwestFunctionInvoker {
    client: Client,
    base_url: String,
}

impl ReqwestFunctionInvoker {
    /// Construct an invoker from an existing client and gateway base URL.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Build an invoker with a default client configuration.
    pub fn with_default_client(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self::new(client, base_url))
    }

    fn function_url(&self, function_id: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            function_id.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl FunctionInvoker for ReqwestFunctionInvoker {
    #[instrument(name = "invoker_reqwest.invoke", skip(self, headers, body), fields(function_id))]
    async fn invoke_function(
        &self,
        function_id: &str,
        method: HttpMethod,
        headers: Headers,
        body: Vec<u8>,
    ) -> Completion {
        let url = self.function_url(function_id);
        let method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
            Ok(method) => method,
            Err(err) => return Err(invoke_failed(format!("invalid method: {err}"))),
        };

        let mut builder = self.client.request(method, &url);
        for (name, value) in headers.iter() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return Err(invoke_failed(format!("request to {url} failed: {err}"))),
        };

        let status_code = response.status().as_u16();
        let mut collected = Headers::new();
        for (name, value) in response.headers().iter() {
            if let Ok(value) = value.to_str() {
                collected.insert(name.as_str(), value);
            }
        }
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return Err(invoke_failed(format!("reading response body: {err}"))),
        };

        Ok(StageResult::success(Datum::HttpResp {
            status_code,
            headers: collected,
            body: bytes.to_vec(),
        }))
    }
}

fn invoke_failed(message: String) -> CompletionError {
    CompletionError::failure(ErrorKind::FunctionInvokeFailed, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn invocation_folds_response_into_http_resp_datum() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/app/route")
                .header("x-test", "skein")
                .body("payload");
            then.status(201)
                .header("content-type", "text/plain")
                .body("created");
        });

        let invoker = ReqwestFunctionInvoker::with_default_client(server.base_url())
            .expect("client builds");
        let headers = Headers::new().with("x-test", "skein");
        let result = invoker
            .invoke_function("app/route", HttpMethod::Post, headers, b"payload".to_vec())
            .await
            .expect("invocation succeeds");

        mock.assert();
        match result {
            StageResult::Success(Datum::HttpResp {
                status_code,
                headers,
                body,
            }) => {
                assert_eq!(status_code, 201);
                assert_eq!(headers.get("content-type"), Some("text/plain"));
                assert_eq!(body, b"created");
            }
            other => panic!("expected HttpResp datum, got {other}"),
        }
    }

    #[tokio::test]
    async fn non_success_statuses_are_still_responses() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/app/missing");
            then.status(404);
        });

        let invoker = ReqwestFunctionInvoker::with_default_client(server.base_url())
            .expect("client builds");
        let result = invoker
            .invoke_function("app/missing", HttpMethod::Get, Headers::new(), Vec::new())
            .await
            .expect("transport succeeded");

        match result {
            StageResult::Success(Datum::HttpResp { status_code, .. }) => {
                assert_eq!(status_code, 404);
            }
            other => panic!("expected HttpResp datum, got {other}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_maps_to_function_invoke_failed() {
        // Nothing listens on this port.
        let invoker = ReqwestFunctionInvoker::with_default_client("http://127.0.0.1:9")
            .expect("client builds");
        let result = invoker
            .invoke_function("app/route", HttpMethod::Post, Headers::new(), Vec::new())
            .await;

        match result {
            Err(CompletionError::Faulted(StageResult::Failure(Datum::Error(error)))) => {
                assert_eq!(error.kind, ErrorKind::FunctionInvokeFailed);
            }
            other => panic!("expected function_invoke_failed, got {other:?}"),
        }
    }
}
