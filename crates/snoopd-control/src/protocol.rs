use serde::{Deserialize, Serialize};
use serde_json::Value;
use snoopd_common::{Result, SnoopdError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum single message size; guards against a runaway client filling
/// memory with a bogus length prefix.
const MAX_MESSAGE_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A response frame carries either `{"ok": <result>}` or `{"error": "msg"}`
/// (spec §4.6) — never both keys, and `ok`'s value is the result itself,
/// not a success boolean alongside it.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ControlResponse {
    Ok { ok: Value },
    Err { error: String },
}

impl ControlResponse {
    pub fn ok(result: Value) -> Self {
        ControlResponse::Ok { ok: result }
    }

    pub fn err(message: impl Into<String>) -> Self {
        ControlResponse::Err { error: message.into() }
    }
}

/// Reads one `u32` big-endian length prefix followed by that many bytes of
/// JSON. Returns `Ok(None)` on a clean EOF between messages.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<ControlRequest>> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut len_buf).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(SnoopdError::ControlProtocol(format!("failed to read length prefix: {e}")));
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_BYTES {
        return Err(SnoopdError::ControlProtocol(format!("message too large: {len} bytes")));
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| SnoopdError::ControlProtocol(format!("failed to read message body: {e}")))?;

    let request: ControlRequest = serde_json::from_slice(&body)?;
    Ok(Some(request))
}

pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, response: &ControlResponse) -> Result<()> {
    let body = serde_json::to_vec(response)?;
    let len = u32::try_from(body.len())
        .map_err(|_| SnoopdError::ControlProtocol("response body too large to frame".to_string()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_request() {
        let mut buf = Vec::new();
        let body = serde_json::to_vec(&serde_json::json!({"method": "ping", "params": {}})).unwrap();
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body);

        let mut cursor = std::io::Cursor::new(buf);
        let request = read_message(&mut cursor).await.unwrap().unwrap();
        assert_eq!(request.method, "ping");
    }

    #[tokio::test]
    async fn reports_clean_eof_as_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let request = read_message(&mut cursor).await.unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn rejects_oversized_length_prefix() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_MESSAGE_BYTES + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_message(&mut cursor).await.is_err());
    }
}
