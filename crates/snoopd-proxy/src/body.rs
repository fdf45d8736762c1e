use http_body_util::BodyExt;
use hyper::body::Bytes;
use snoopd_common::{Result, SnoopdError};

/// Reads a body up to `cap` bytes. Once the cap is hit, remaining frames are
/// still polled and discarded so the peer is never held open waiting on a
/// reader that stopped looking (spec §4.5 "the upstream stream is drained").
pub async fn read_capped<B>(mut body: B, cap: usize) -> Result<(Vec<u8>, bool)>
where
    B: hyper::body::Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    let mut buf = Vec::new();
    let mut truncated = false;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| SnoopdError::ProxyProtocol(e.to_string()))?;
        let Some(data) = frame.data_ref() else { continue };
        if truncated {
            continue;
        }
        if buf.len() + data.len() > cap {
            let remaining = cap.saturating_sub(buf.len());
            buf.extend_from_slice(&data[..remaining]);
            truncated = true;
        } else {
            buf.extend_from_slice(data);
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    #[tokio::test]
    async fn reads_body_under_cap_without_truncation() {
        let body = Full::new(Bytes::from_static(b"hello"));
        let (bytes, truncated) = read_capped(body, 100).await.unwrap();
        assert_eq!(bytes, b"hello");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn truncates_body_over_cap() {
        let body = Full::new(Bytes::from_static(b"hello world"));
        let (bytes, truncated) = read_capped(body, 5).await.unwrap();
        assert_eq!(bytes, b"hello");
        assert!(truncated);
    }
}
