use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{AppResult, DistributedError};

const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// JSON client for driver and agent endpoints.
///
/// Transport failures are retried up to the configured attempt budget; a
/// peer that answers with a non-success status is not retried.
#[derive(Clone)]
pub(crate) struct ClusterClient {
    client: Client,
    retry_attempts: usize,
}

impl ClusterClient {
    pub(crate) fn new(request_timeout: Duration, retry_attempts: usize) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            client,
            retry_attempts: retry_attempts.max(1),
        })
    }

    pub(crate) async fn get_json<R>(&self, addr: &str, path: &'static str) -> Result<R, DistributedError>
    where
        R: DeserializeOwned,
    {
        self.send(addr, path, self.retry_attempts, |client, url| client.get(url))
            .await
    }

    pub(crate) async fn post_json<B, R>(
        &self,
        addr: &str,
        path: &'static str,
        body: &B,
    ) -> Result<R, DistributedError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send(addr, path, self.retry_attempts, |client, url| {
            client.post(url).json(body)
        })
        .await
    }

    /// Single attempt, for broadcasts where an unreachable peer is expected.
    pub(crate) async fn post_once<B, R>(
        &self,
        addr: &str,
        path: &'static str,
        body: &B,
    ) -> Result<R, DistributedError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send(addr, path, 1, |client, url| client.post(url).json(body))
            .await
    }

    /// Post a raw document (JSON or TOML execution plan).
    pub(crate) async fn post_text<R>(
        &self,
        addr: &str,
        path: &'static str,
        body: &str,
    ) -> Result<R, DistributedError>
    where
        R: DeserializeOwned,
    {
        self.send(addr, path, self.retry_attempts, |client, url| {
            client.post(url).body(body.to_owned())
        })
        .await
    }

    async fn send<R, F>(
        &self,
        addr: &str,
        path: &'static str,
        attempts: usize,
        build: F,
    ) -> Result<R, DistributedError>
    where
        R: DeserializeOwned,
        F: Fn(&Client, String) -> RequestBuilder,
    {
        let url = format!("http://{}{}", addr, path);
        let mut attempt: usize = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match build(&self.client, url.clone()).send().await {
                Ok(response) => return decode(addr, path, attempt, response).await,
                Err(err) if attempt >= attempts => {
                    return Err(DistributedError::Unreachable {
                        addr: addr.to_owned(),
                        path,
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(err) => {
                    debug!("{}{} attempt {} failed: {}", addr, path, attempt, err);
                    let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
                    tokio::time::sleep(RETRY_BACKOFF.saturating_mul(factor)).await;
                }
            }
        }
    }
}

async fn decode<R>(
    addr: &str,
    path: &'static str,
    attempt: usize,
    response: Response,
) -> Result<R, DistributedError>
where
    R: DeserializeOwned,
{
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|err| DistributedError::Unreachable {
            addr: addr.to_owned(),
            path,
            attempts: attempt,
            source: err,
        })?;
    if !status.is_success() {
        return Err(DistributedError::Rejected {
            addr: addr.to_owned(),
            path,
            status: status.as_u16(),
            message: error_message(&body),
        });
    }
    serde_json::from_slice(&body).map_err(|err| DistributedError::Deserialize {
        context: path,
        source: err,
    })
}

fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("error").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}
