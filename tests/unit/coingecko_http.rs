//! Unit tests for CoinGeckoHttpClient and CoinGeckoSource against a local HTTP stub

use ohlc_backfill::downloader::TimeWindow;
use ohlc_backfill::fetcher::coingecko::CoinGeckoSource;
use ohlc_backfill::fetcher::coingecko_config::CoinGeckoConfig;
use ohlc_backfill::fetcher::coingecko_http::CoinGeckoHttpClient;
use ohlc_backfill::fetcher::{DataSource, EntitySource, FetchError};
use ohlc_backfill::Granularity;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves canned responses in order, recording each request line
struct StubServer {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    async fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => read += n,
                    }
                }
                let request = String::from_utf8_lossy(&buf[..read]).to_string();
                seen.lock()
                    .unwrap()
                    .push(request.lines().next().unwrap_or_default().to_string());

                let response = format!(
                    "HTTP/1.1 {status} STUB\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self {
            base_url: format!("http://{addr}/api/v3"),
            requests,
        }
    }

    fn config(&self, max_retries: u32) -> CoinGeckoConfig {
        CoinGeckoConfig::default()
            .with_base_url(self.base_url.as_str())
            .with_max_retries(max_retries)
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn test_unreachable_host_is_transport_error() {
    let client = CoinGeckoHttpClient::from_config(
        CoinGeckoConfig::default()
            .with_base_url("http://127.0.0.1:1/api/v3")
            .with_max_retries(0),
    )
    .unwrap();

    let result: Result<serde_json::Value, _> = client.get("ping", "/ping", &[]).await;
    let err = result.unwrap_err();
    assert!(matches!(err, FetchError::NetworkError(_)), "got {err:?}");
    assert!(!err.is_decode());
}

#[tokio::test]
async fn test_undecodable_body_is_decode_error() {
    let server = StubServer::start(vec![(200, "<html>maintenance</html>")]).await;
    let client = CoinGeckoHttpClient::from_config(server.config(0)).unwrap();

    let result: Result<serde_json::Value, _> = client.get("ping", "/ping", &[]).await;
    assert!(result.unwrap_err().is_decode());
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = StubServer::start(vec![
        (404, r#"{"error":"coin not found"}"#),
        (200, "[]"),
    ])
    .await;
    let client = CoinGeckoHttpClient::from_config(server.config(2)).unwrap();

    let result: Result<serde_json::Value, _> = client.get("ping", "/ping", &[]).await;
    match result {
        Err(FetchError::HttpError(msg)) => assert!(msg.contains("404")),
        other => panic!("expected HttpError, got {other:?}"),
    }
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = StubServer::start(vec![(503, "{}"), (200, r#"{"ok":true}"#)]).await;
    let client = CoinGeckoHttpClient::from_config(server.config(1)).unwrap();

    let value: serde_json::Value = client.get("ping", "/ping", &[]).await.unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn test_fetch_window_requests_range_in_seconds() {
    let server = StubServer::start(vec![(
        200,
        "[[1518220800000, 8000.5, 8100, 7900, 8050.25], [1518307200000, 8050, 8200, 8000, 8150]]",
    )])
    .await;
    let source = CoinGeckoSource::new(server.config(0)).unwrap();
    let window = TimeWindow::new(1_518_147_224_000, 1_533_699_224_000).unwrap();

    let candles = source
        .fetch_window("bitcoin", Granularity::Daily, window)
        .await
        .unwrap();

    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].close.to_string(), "8050.25");

    let request = &server.requests()[0];
    assert!(request.starts_with("GET /api/v3/coins/bitcoin/ohlc/range?"), "{request}");
    assert!(request.contains("from=1518147224"));
    assert!(request.contains("to=1533699224"));
    assert!(request.contains("interval=daily"));
}

#[tokio::test]
async fn test_list_entities_stops_on_short_page() {
    let server = StubServer::start(vec![(
        200,
        r#"[{"id":"bitcoin","symbol":"btc","name":"Bitcoin","market_cap_rank":1,"current_price":1},
            {"id":"ethereum","symbol":"eth","name":"Ethereum","market_cap_rank":2}]"#,
    )])
    .await;
    let source = CoinGeckoSource::new(server.config(0)).unwrap();

    let listings = source.list_entities().await.unwrap();

    assert_eq!(listings.len(), 2);
    assert_eq!(listings[1].id, "ethereum");
    assert_eq!(listings[0].market_cap_rank, Some(1));
    assert_eq!(server.requests().len(), 1);
    assert!(server.requests()[0].contains("page=1"));
}
