use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::error::{AppError, AppResult, MetricsError};
use crate::metrics::ResultSink;
use crate::phase::{HttpMethod, RequestTemplate, TestDefinition};

use super::{ContentPool, HttpTestRunner, TestRunner};

#[test]
fn content_pool_never_exceeds_capacity() -> AppResult<()> {
    let pool = ContentPool::new(4);
    pool.extend((0..100).map(|idx| format!("item-{}", idx)));
    if pool.len() != 4 {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected pool size",
            value: pool.len().to_string(),
        }));
    }
    if pool.sample(10).len() != 4 {
        return Err(AppError::metrics("Sample larger than pool should return the whole pool"));
    }
    Ok(())
}

#[test]
fn content_pool_replace_and_drain() -> AppResult<()> {
    let pool = ContentPool::new(2);
    pool.replace(vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]);
    if pool.len() != 2 {
        return Err(AppError::metrics("Replace should truncate to capacity"));
    }
    let drained = pool.drain();
    if drained != vec!["a".to_owned(), "b".to_owned()] {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected drained items",
            value: format!("{:?}", drained),
        }));
    }
    if !pool.is_empty() || pool.choose().is_some() {
        return Err(AppError::metrics("Pool should be empty after drain"));
    }
    Ok(())
}

async fn serve_once(status_line: &'static str, location: Option<&'static str>) -> AppResult<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buffer = [0u8; 2048];
            let _read = socket.read(&mut buffer).await;
            let location_header = location
                .map(|value| format!("Location: {}\r\n", value))
                .unwrap_or_default();
            let response = format!(
                "HTTP/1.1 {}\r\n{}Content-Length: 0\r\nConnection: close\r\n\r\n",
                status_line, location_header
            );
            let _write = socket.write_all(response.as_bytes()).await;
        }
    });
    Ok(format!("http://{}/items", addr))
}

fn http_test(url: String, expected_status: u16) -> TestDefinition {
    TestDefinition {
        name: "create".to_owned(),
        count: 1,
        measurable: true,
        records_content: true,
        request: Some(RequestTemplate {
            method: HttpMethod::Post,
            url,
            headers: vec![("content-type".to_owned(), "application/json".to_owned())],
            body: Some("{}".to_owned()),
            expected_status,
        }),
    }
}

#[tokio::test]
async fn http_runner_records_created_content() -> AppResult<()> {
    let url = serve_once("201 Created", Some("/items/42")).await?;
    let runner = HttpTestRunner::new(Duration::from_secs(2), Arc::new(ContentPool::new(8)))?;
    let sink = ResultSink::new(8);
    runner.run_test(&http_test(url, 201), &sink).await;

    let summaries = sink.summaries()?;
    let Some(summary) = summaries.first() else {
        return Err(AppError::metrics("Missing summary"));
    };
    if summary.executions != 1 || summary.errors != 0 {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected summary",
            value: format!("{:?}", summary),
        }));
    }
    if sink.take_content() != vec!["/items/42".to_owned()] {
        return Err(AppError::metrics("Location header should be recorded as content"));
    }
    Ok(())
}

#[tokio::test]
async fn http_runner_counts_unexpected_status_as_error() -> AppResult<()> {
    let url = serve_once("500 Internal Server Error", None).await?;
    let runner = HttpTestRunner::new(Duration::from_secs(2), Arc::new(ContentPool::new(8)))?;
    let sink = ResultSink::new(8);
    runner.run_test(&http_test(url, 201), &sink).await;

    let summaries = sink.summaries()?;
    if summaries.first().map(|summary| summary.errors) != Some(1) {
        return Err(AppError::metrics("Expected one error"));
    }
    if !sink.take_content().is_empty() {
        return Err(AppError::metrics("Failed executions must not record content"));
    }
    Ok(())
}

#[tokio::test]
async fn test_without_request_fails_fast() -> AppResult<()> {
    let runner = HttpTestRunner::new(Duration::from_secs(1), Arc::new(ContentPool::new(1)))?;
    let sink = ResultSink::new(1);
    let test = TestDefinition {
        request: None,
        ..http_test(String::new(), 200)
    };
    runner.run_test(&test, &sink).await;
    if sink.summaries()?.first().map(|summary| summary.errors) != Some(1) {
        return Err(AppError::metrics("Expected the missing request to count as an error"));
    }
    Ok(())
}
