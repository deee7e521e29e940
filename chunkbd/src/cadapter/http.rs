//! HTTP 适配器：对接 `read_chunk`/`write_chunk` 形式的 chunk 存储接口。
//!
//! - 读：`GET {base}/read_chunk?x=&z=&offset=&length=`，响应体为 base64 文本；
//! - 写：`PUT {base}/write_chunk?x=&z=&offset=`，请求体为 base64 文本。
//!
//! chunk 索引作为 `x` 发送，`z` 固定为配置的行号。重试交给调用方/传输层，这里不做。

use crate::cadapter::client::{ChunkBackend, ChunkRequest};
use crate::config::StoreConfig;
use crate::error::{ConfigError, StoreError, StoreResult};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use reqwest::{Client, Response, Url};

pub struct HttpBackend {
    client: Client,
    read_url: Url,
    write_url: Url,
    row: i64,
}

impl HttpBackend {
    pub fn new(cfg: &StoreConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("cannot build http client: {e}")))?;
        let join = |endpoint: &str| {
            cfg.base_url.join(endpoint).map_err(|e| ConfigError::Url {
                url: cfg.base_url.to_string(),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            client,
            read_url: join("read_chunk")?,
            write_url: join("write_chunk")?,
            row: cfg.row,
        })
    }

    fn query(&self, req: &ChunkRequest) -> Vec<(&'static str, String)> {
        let mut q = vec![
            ("x", req.chunk_index.to_string()),
            ("z", self.row.to_string()),
        ];
        if let Some(offset) = req.offset {
            q.push(("offset", offset.to_string()));
        }
        if let Some(length) = req.length {
            q.push(("length", length.to_string()));
        }
        q
    }

    /// 非 2xx 状态转为 `StoreError::Status`，否则返回响应体文本。
    async fn body_text(resp: Response, endpoint: &Url) -> StoreResult<String> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                endpoint: endpoint.path().to_string(),
                body,
            });
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl ChunkBackend for HttpBackend {
    async fn read_chunk(&self, req: &ChunkRequest) -> StoreResult<Vec<u8>> {
        let resp = self
            .client
            .get(self.read_url.clone())
            .query(&self.query(req))
            .send()
            .await?;
        let body = Self::body_text(resp, &self.read_url).await?;
        Ok(B64.decode(body.trim())?)
    }

    async fn write_chunk(&self, req: &ChunkRequest, data: &[u8]) -> StoreResult<()> {
        let resp = self
            .client
            .put(self.write_url.clone())
            .query(&self.query(req))
            .body(B64.encode(data))
            .send()
            .await?;
        Self::body_text(resp, &self.write_url).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::client::ChunkClient;
    use axum::Router;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::{get, put};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const CHUNK: usize = 3064;

    type Chunks = Arc<Mutex<HashMap<(i64, i64), Vec<u8>>>>;

    fn param(q: &HashMap<String, String>, key: &str) -> Result<Option<usize>, StatusCode> {
        q.get(key)
            .map(|v| v.parse::<usize>().map_err(|_| StatusCode::BAD_REQUEST))
            .transpose()
    }

    fn pos(q: &HashMap<String, String>) -> Result<(i64, i64), StatusCode> {
        let x = q.get("x").ok_or(StatusCode::BAD_REQUEST)?;
        let z = q.get("z").ok_or(StatusCode::BAD_REQUEST)?;
        Ok((
            x.parse().map_err(|_| StatusCode::BAD_REQUEST)?,
            z.parse().map_err(|_| StatusCode::BAD_REQUEST)?,
        ))
    }

    async fn read_chunk(
        State(chunks): State<Chunks>,
        Query(q): Query<HashMap<String, String>>,
    ) -> Result<String, StatusCode> {
        let key = pos(&q)?;
        let offset = param(&q, "offset")?.unwrap_or(0);
        let length = param(&q, "length")?.unwrap_or(CHUNK - offset);
        if offset + length > CHUNK {
            return Err(StatusCode::BAD_REQUEST);
        }
        let chunks = chunks.lock().unwrap();
        let data = chunks.get(&key).cloned().unwrap_or_else(|| vec![0; CHUNK]);
        Ok(B64.encode(&data[offset..offset + length]))
    }

    async fn write_chunk(
        State(chunks): State<Chunks>,
        Query(q): Query<HashMap<String, String>>,
        body: String,
    ) -> Result<&'static str, StatusCode> {
        let key = pos(&q)?;
        let offset = param(&q, "offset")?.unwrap_or(0);
        let data = B64.decode(body.trim()).map_err(|_| StatusCode::BAD_REQUEST)?;
        let mut chunks = chunks.lock().unwrap();
        let chunk = chunks.entry(key).or_insert_with(|| vec![0; CHUNK]);
        chunk[offset..offset + data.len()].copy_from_slice(&data);
        Ok("Complete")
    }

    async fn spawn_store() -> (String, Chunks) {
        let chunks: Chunks = Arc::default();
        let app = Router::new()
            .route("/read_chunk", get(read_chunk))
            .route("/write_chunk", put(write_chunk))
            .route(
                "/broken/read_chunk",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .route("/garbage/read_chunk", get(|| async { "%%% not base64 %%%" }))
            .route(
                "/slow/read_chunk",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "AAAA"
                }),
            )
            .with_state(chunks.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), chunks)
    }

    fn backend(base: &str, row: i64, timeout: Duration) -> HttpBackend {
        HttpBackend::new(&StoreConfig::new(base, row, timeout).unwrap()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_write_then_read() {
        let (base, chunks) = spawn_store().await;
        let client = ChunkClient::new(backend(&base, 0, Duration::from_secs(5)));

        client.write_range(3, 100, b"hello chunk").await.unwrap();
        let out = client.read_range(3, 100, 11).await.unwrap();
        assert_eq!(out, b"hello chunk");

        // 索引作为 x，行号作为 z
        let stored = chunks.lock().unwrap();
        assert_eq!(&stored[&(3, 0)][100..111], b"hello chunk");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_device_range_across_chunks_over_http() {
        use crate::chuck::store::HttpChunkStore;
        use crate::config::DeviceConfig;
        use crate::device::BlockDevice;

        let (base, chunks) = spawn_store().await;
        let store: HttpChunkStore = ChunkClient::new(backend(&base, 0, Duration::from_secs(5)));
        let dev = BlockDevice::new(DeviceConfig::new(10_000, CHUNK as u64).unwrap(), store);
        let h = dev.open(false);

        let data: Vec<u8> = (0..7000).map(|i| (i % 251) as u8).collect();
        dev.write(h, 3000, &data).await.unwrap();
        assert_eq!(dev.read(h, 3000, 7000).await.unwrap(), data);
        assert_eq!(dev.read(h, 0, 3000).await.unwrap(), vec![0u8; 3000]);

        // 3000..3064 | 3064..6128 | 6128..9192 | 9192..10000
        let stored = chunks.lock().unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(&stored[&(0, 0)][3000..], &data[..64]);
        assert_eq!(stored[&(1, 0)], data[64..64 + CHUNK].to_vec());
        assert_eq!(stored[&(2, 0)], data[64 + CHUNK..64 + 2 * CHUNK].to_vec());
        assert_eq!(&stored[&(3, 0)][..808], &data[64 + 2 * CHUNK..]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_row_is_sent_as_z() {
        let (base, chunks) = spawn_store().await;
        let client = ChunkClient::new(backend(&base, -4, Duration::from_secs(5)));
        client.write_range(0, 0, &[0xff, 0x00, 0x7f]).await.unwrap();
        assert!(chunks.lock().unwrap().contains_key(&(0, -4)));
        assert_eq!(client.read_range(0, 0, 3).await.unwrap(), vec![0xff, 0x00, 0x7f]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_whole_chunk_request() {
        let (base, _chunks) = spawn_store().await;
        let b = backend(&base, 0, Duration::from_secs(5));
        let data = b.read_chunk(&ChunkRequest::chunk(9)).await.unwrap();
        assert_eq!(data.len(), CHUNK);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_bad_status() {
        let (base, _chunks) = spawn_store().await;
        let client = ChunkClient::new(backend(&format!("{base}/broken"), 0, Duration::from_secs(5)));
        let err = client.read_range(0, 0, 4).await.unwrap_err();
        match &err {
            StoreError::Status { status, body, .. } => {
                assert_eq!(*status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transport());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_malformed_body() {
        let (base, _chunks) = spawn_store().await;
        let client = ChunkClient::new(backend(&format!("{base}/garbage"), 0, Duration::from_secs(5)));
        let err = client.read_range(0, 0, 4).await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
        assert!(err.is_malformed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_timeout_is_transport_error() {
        let (base, _chunks) = spawn_store().await;
        let client = ChunkClient::new(backend(
            &format!("{base}/slow"),
            0,
            Duration::from_millis(200),
        ));
        let err = client.read_range(0, 0, 3).await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = ChunkClient::new(backend(&format!("http://{addr}"), 0, Duration::from_secs(2)));
        let err = client.write_range(0, 0, b"x").await.unwrap_err();
        assert!(err.is_transport());
    }
}
