//! `Content-Length` framing for the peer pipe.
//!
//! Every frame is `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
//! [`FrameReader`] and [`FrameWriter`] are typed: callers pick the frame
//! enum they expect on each direction of the pipe.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read and decode the next frame.
    ///
    /// `Ok(None)` means the pipe closed cleanly between frames. A pipe that
    /// closes mid-frame, an oversized frame or a body that does not decode
    /// as `T` is an error.
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        let Some(length) = self.read_header().await? else {
            return Ok(None);
        };

        if length > MAX_FRAME_BYTES {
            bail!("frame of {length} bytes exceeds limit of {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;

        let frame = serde_json::from_slice(&body).context("decoding frame body")?;
        Ok(Some(frame))
    }

    async fn read_header(&mut self) -> Result<Option<usize>> {
        let mut length = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading frame header")?;

            if read == 0 {
                if started {
                    bail!("pipe closed inside frame header");
                }
                return Ok(None);
            }
            started = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let parsed: usize = value
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid Content-Length {:?}", value.trim()))?;
                length = Some(parsed);
            }
        }

        length
            .map(Some)
            .context("frame header without Content-Length")
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame<T: Serialize>(&mut self, frame: &T) -> Result<()> {
        let body = serde_json::to_vec(frame).context("encoding frame body")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(&body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn consecutive_frames_are_read_in_order() {
        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&json!({ "type": "hello" })).await.unwrap();
        writer.write_frame(&json!({ "type": "goodbye" })).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        let first: Value = reader.read_frame().await.unwrap().unwrap();
        let second: Value = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(first["type"], "hello");
        assert_eq!(second["type"], "goodbye");
        assert!(reader.read_frame::<Value>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_pipe_is_clean_close() {
        let mut reader = FrameReader::new(&b""[..]);
        assert!(reader.read_frame::<Value>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_inside_header_is_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 10\r\n"[..]);
        assert!(reader.read_frame::<Value>().await.is_err());
    }

    #[tokio::test]
    async fn close_inside_body_is_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 100\r\n\r\n{}"[..]);
        assert!(reader.read_frame::<Value>().await.is_err());
    }

    #[tokio::test]
    async fn header_without_length_is_error() {
        let mut reader = FrameReader::new(&b"Content-Type: application/json\r\n\r\n{}"[..]);
        assert!(reader.read_frame::<Value>().await.is_err());
    }

    #[tokio::test]
    async fn non_numeric_length_is_error() {
        let mut reader = FrameReader::new(&b"Content-Length: lots\r\n\r\n"[..]);
        assert!(reader.read_frame::<Value>().await.is_err());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_reading_body() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(header.as_bytes());
        assert!(reader.read_frame::<Value>().await.is_err());
    }

    #[tokio::test]
    async fn header_name_is_case_insensitive_and_extra_headers_ignored() {
        let body = r#"{"id":"r1"}"#;
        let frame = format!(
            "Content-Type: application/json\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        let mut reader = FrameReader::new(frame.as_bytes());
        let value: Value = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(value["id"], "r1");
    }

    #[tokio::test]
    async fn length_counts_bytes_not_chars() {
        let mut buf = Vec::new();
        FrameWriter::new(&mut buf)
            .write_frame(&json!({ "k": "é" }))
            .await
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("Content-Length: 10\r\n\r\n"));
    }

    #[tokio::test]
    async fn body_that_does_not_match_type_is_error() {
        #[derive(Debug, serde::Deserialize)]
        struct Strict {
            #[allow(dead_code)]
            id: u64,
        }
        let body = r#"{"id":"not-a-number"}"#;
        let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());
        let mut reader = FrameReader::new(frame.as_bytes());
        assert!(reader.read_frame::<Strict>().await.is_err());
    }
}
