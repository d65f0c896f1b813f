//! Length-prefixed JSON framing
//!
//! Every message is a big-endian `u32` byte count followed by that many bytes
//! of UTF-8 JSON. A connection carries one request and one response.

use crate::error::{DaemonError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame body
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
    /// Seconds spent handling the request
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub cache_hit: bool,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            execution_time: 0.0,
            cache_hit: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(message.into()),
            execution_time: 0.0,
            cache_hit: false,
        }
    }

    pub fn with_cache_hit(mut self, hit: bool) -> Self {
        self.cache_hit = hit;
        self
    }
}

/// Read one frame body
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    read_frame_or_eof(reader).await?.ok_or_else(|| {
        DaemonError::Protocol("connection closed before frame header".to_string())
    })
}

/// Read one frame body, or `None` if the peer closed before sending a byte
pub async fn read_frame_or_eof<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[1..]).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            DaemonError::Protocol("connection closed inside frame header".to_string())
        }
        _ => DaemonError::from(e),
    })?;
    let len = u32::from_be_bytes(header) as usize;

    if len > MAX_FRAME_BYTES {
        return Err(DaemonError::Protocol(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            len, MAX_FRAME_BYTES
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => DaemonError::Protocol(format!(
            "connection closed inside a {} byte frame",
            len
        )),
        _ => DaemonError::from(e),
    })?;
    Ok(Some(body))
}

/// Write one frame body and flush
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_BYTES {
        return Err(DaemonError::Protocol(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            body.len(),
            MAX_FRAME_BYTES
        )));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let body = read_frame(reader).await?;
    decode_message(&body)
}

/// Like [`read_message`], but a peer that closes without sending anything
/// yields `None`
pub async fn read_message_or_eof<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    match read_frame_or_eof(reader).await? {
        Some(body) => decode_message(&body).map(Some),
        None => Ok(None),
    }
}

fn decode_message<T>(body: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_slice(body)
        .map_err(|e| DaemonError::Protocol(format!("invalid JSON message: {}", e)))
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    write_frame(writer, &body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = Request::new("cache_file", json!({"file_path": "/tmp/a.rs"}));

        write_message(&mut client, &request).await.unwrap();
        let received: Request = read_message(&mut server).await.unwrap();
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn test_header_is_big_endian_length() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, b"{}").await.unwrap();

        let mut raw = [0u8; 6];
        server.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw, [0, 0, 0, 2, b'{', b'}']);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_u32(MAX_FRAME_BYTES as u32 + 1)
            .await
            .unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_truncated_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(10).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(format!("{}", err).contains("10 byte frame"));
    }

    #[tokio::test]
    async fn test_close_before_header_is_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let message = read_message_or_eof::<_, Request>(&mut server).await.unwrap();
        assert!(message.is_none());
    }

    #[tokio::test]
    async fn test_partial_header_is_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0]).await.unwrap();
        drop(client);

        let err = read_frame_or_eof(&mut server).await.unwrap_err();
        assert!(format!("{}", err).contains("inside frame header"));
    }

    #[tokio::test]
    async fn test_read_frame_requires_header() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(format!("{}", err).contains("before frame header"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, b"not json").await.unwrap();

        let err = read_message::<_, Request>(&mut server).await.unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(_)));
    }

    #[test]
    fn test_response_defaults_on_decode() {
        let response: Response = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert!(!response.success);
        assert!(response.error.is_none());
        assert_eq!(response.data, Value::Null);
    }

    #[test]
    fn test_failure_response_shape() {
        let value = serde_json::to_value(Response::failure("Unknown tool: x")).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error"], json!("Unknown tool: x"));
        assert_eq!(value["cache_hit"], json!(false));
    }
}
