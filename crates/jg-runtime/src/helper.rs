//! Fingerprint helper protocol
//!
//! The out-of-process helper that performs the TLS probes speaks
//! length-prefixed JSON over its stdio: a 4-byte little-endian length
//! followed by that many bytes of UTF-8 JSON.

use jg_core::Fingerprint;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Largest frame either side will accept.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperRequest {
    pub target: String,
}

impl HelperRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

/// Scan result or error reported by the helper. Scan fields may be null
/// when the helper could not parse its probe output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HelperResponse {
    Error {
        error: String,
    },
    Scan {
        #[serde(rename = "Domain", default)]
        domain: Option<String>,
        #[serde(rename = "Resolved IP", default)]
        resolved_ip: Option<String>,
        #[serde(rename = "JARM", default)]
        jarm: Option<String>,
    },
}

impl HelperResponse {
    /// Validated fingerprint of a successful scan.
    pub fn into_fingerprint(self) -> Result<Fingerprint> {
        match self {
            HelperResponse::Scan {
                jarm: Some(jarm), ..
            } => Ok(Fingerprint::parse(&jarm)?),
            HelperResponse::Scan { jarm: None, .. } => {
                Err(Error::transient("helper returned no fingerprint"))
            }
            HelperResponse::Error { error } => Err(Error::transient(format!("helper: {error}"))),
        }
    }
}

/// Serialize `message` and write it as one frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)
        .map_err(|e| Error::transient(format!("encoding helper frame: {e}")))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::transient(format!(
            "helper frame of {} bytes exceeds {MAX_FRAME_LEN}",
            body.len()
        )));
    }

    writer
        .write_all(&(body.len() as u32).to_le_bytes())
        .await
        .map_err(|e| Error::io("writing helper frame", e))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| Error::io("writing helper frame", e))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::io("flushing helper frame", e))
}

/// Read one frame. `Ok(None)` only when the stream ends before the first
/// header byte; a partial header is an error.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader
            .read(&mut header[filled..])
            .await
            .map_err(|e| Error::io("reading helper frame", e))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::transient(format!(
                "helper frame header truncated after {filled} bytes"
            )));
        }
        filled += n;
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::transient(format!(
            "helper frame of {len} bytes exceeds {MAX_FRAME_LEN}"
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::io("reading helper frame body", e))?;

    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| Error::transient(format!("decoding helper frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const JARM: &str = "2ad2ad16d2ad2ad22c42d42d00042d58c7162162b6a603b3e3b16b2e4c9bab";

    #[tokio::test]
    async fn test_request_frame_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &HelperRequest::new("example.com")).await.unwrap();

        let body = br#"{"target":"example.com"}"#;
        assert_eq!(&buf[..4], &(body.len() as u32).to_le_bytes());
        assert_eq!(&buf[4..], body);
    }

    #[tokio::test]
    async fn test_reads_scan_response() {
        let json = format!(r#"{{"Domain": "example.com", "Resolved IP": "93.184.216.34", "JARM": "{JARM}"}}"#);
        let mut frame = (json.len() as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(json.as_bytes());

        let mut reader = &frame[..];
        let response: HelperResponse = read_frame(&mut reader).await.unwrap().unwrap();
        match &response {
            HelperResponse::Scan { domain, resolved_ip, .. } => {
                assert_eq!(domain.as_deref(), Some("example.com"));
                assert_eq!(resolved_ip.as_deref(), Some("93.184.216.34"));
            }
            other => panic!("expected scan, got {other:?}"),
        }
        assert_eq!(response.into_fingerprint().unwrap().as_str(), JARM);

        // Stream is now exhausted.
        let next: Option<HelperResponse> = read_frame(&mut reader).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_error_response() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &serde_json::json!({"error": "No target specified"}))
            .await
            .unwrap();

        let response: HelperResponse = read_frame(&mut &buf[..]).await.unwrap().unwrap();
        assert_eq!(
            response,
            HelperResponse::Error {
                error: "No target specified".into()
            }
        );
        assert_eq!(response.into_fingerprint().unwrap_err().kind(), ErrorKind::TransientIo);
    }

    #[tokio::test]
    async fn test_null_fields() {
        let json = br#"{"Domain": null, "Resolved IP": null, "JARM": null}"#;
        let mut frame = (json.len() as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(json);
        let response: HelperResponse = read_frame(&mut &frame[..]).await.unwrap().unwrap();
        assert!(response.into_fingerprint().is_err());
    }

    #[tokio::test]
    async fn test_truncated_header_is_an_error() {
        for len in 1..4 {
            let partial = [7u8, 0, 0][..len].to_vec();
            let result: Result<Option<HelperResponse>> = read_frame(&mut &partial[..]).await;
            assert_eq!(result.unwrap_err().kind(), ErrorKind::TransientIo, "{len} header bytes");
        }

        let empty: &[u8] = &[];
        let result: Option<HelperResponse> = read_frame(&mut &empty[..]).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_rejects_oversized_frame() {
        let frame = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes();
        let result: Result<Option<HelperResponse>> = read_frame(&mut &frame[..]).await;
        assert!(result.is_err());
    }
}
