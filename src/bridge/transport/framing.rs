//! Frame codec for byte-stream transports.
//!
//! Format:
//!
//! ```text
//! Content-Length: N\r\n
//! Attachment-Lengths: a,b,c\r\n      (optional)
//! \r\n
//! <N bytes of JSON><a bytes><b bytes><c bytes>
//! ```
//!
//! Attachments are raw bytes appended after the JSON body. The body refers to
//! them by index, so binary payloads never pass through JSON encoding.

use std::io;

use serde_json::Value;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
};

use crate::bridge::protocol::TransferBuffer;

const CONTENT_LENGTH: &str = "content-length";
const ATTACHMENT_LENGTHS: &str = "attachment-lengths";

/// Upper bound on what a header can make us allocate up front. Larger
/// payloads grow the buffer as bytes actually arrive.
const MAX_PREALLOCATION: usize = 64 * 1024;

/// One decoded frame.
#[derive(Debug, PartialEq)]
pub struct Frame {
    pub body: Value,
    pub attachments: Vec<Vec<u8>>,
}

/// One frame whose body has not been parsed yet.
///
/// Reading it consumes exactly the bytes the headers declared, so the
/// stream stays in sync even when the body turns out not to be JSON.
#[derive(Debug, PartialEq)]
pub struct RawFrame {
    pub body: Vec<u8>,
    pub attachments: Vec<Vec<u8>>,
}

impl RawFrame {
    /// Parse the body as JSON.
    pub fn parse(self) -> io::Result<Frame> {
        let body = serde_json::from_slice(&self.body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Frame {
            body,
            attachments: self.attachments,
        })
    }
}

/// Write one frame and flush.
pub async fn write_frame<W>(
    writer: &mut W,
    body: &Value,
    attachments: &[TransferBuffer],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(body).map_err(io::Error::other)?;

    let mut header = format!("Content-Length: {}\r\n", json.len());
    if !attachments.is_empty() {
        let lengths: Vec<String> = attachments.iter().map(|a| a.len().to_string()).collect();
        header.push_str(&format!("Attachment-Lengths: {}\r\n", lengths.join(",")));
    }
    header.push_str("\r\n");

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&json).await?;
    for attachment in attachments {
        writer.write_all(attachment.as_slice()).await?;
    }
    writer.flush().await
}

/// Read one frame and parse its body.
///
/// Returns `Ok(None)` on a clean EOF before any header byte. EOF inside a
/// frame is an `UnexpectedEof` error; a body that is not JSON is
/// `InvalidData`.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    match read_raw_frame(reader).await? {
        Some(raw) => raw.parse().map(Some),
        None => Ok(None),
    }
}

/// Read one frame without interpreting its body.
pub async fn read_raw_frame<R>(reader: &mut R) -> io::Result<Option<RawFrame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut attachment_lengths: Vec<usize> = Vec::new();
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            if saw_header {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF inside frame header",
                ));
            }
            return Ok(None);
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if saw_header {
                break;
            }
            // Tolerate stray blank lines between frames
            continue;
        }
        saw_header = true;

        let (name, value) = line.split_once(':').ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed header line: {:?}", line),
            )
        })?;
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            CONTENT_LENGTH => content_length = Some(parse_length(value)?),
            ATTACHMENT_LENGTHS => {
                attachment_lengths = value
                    .split(',')
                    .map(|v| parse_length(v.trim()))
                    .collect::<io::Result<_>>()?;
            }
            // Unknown headers are ignored
            _ => {}
        }
    }

    let content_length = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header")
    })?;

    let body = read_exact_len(reader, content_length).await?;

    let mut attachments = Vec::with_capacity(attachment_lengths.len());
    for length in attachment_lengths {
        attachments.push(read_exact_len(reader, length).await?);
    }

    Ok(Some(RawFrame { body, attachments }))
}

/// Read exactly `length` bytes, growing the buffer with the data received
/// rather than trusting the declared length.
async fn read_exact_len<R>(reader: &mut R, length: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Vec::with_capacity(length.min(MAX_PREALLOCATION));
    (&mut *reader)
        .take(length as u64)
        .read_to_end(&mut bytes)
        .await?;
    if bytes.len() < length {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("frame truncated: expected {} bytes, got {}", length, bytes.len()),
        ));
    }
    Ok(bytes)
}

fn parse_length(value: &str) -> io::Result<usize> {
    value.parse::<usize>().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid length {:?}: {}", value, e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn write_frame_formats_content_length_header() {
        let message = json!({"id": "s-1", "kind": "clearCache"});

        let mut buffer = Vec::new();
        write_frame(&mut buffer, &message, &[]).await.unwrap();

        let output = String::from_utf8(buffer).unwrap();
        let (header, body) = output.split_once("\r\n\r\n").unwrap();
        let length: usize = header.strip_prefix("Content-Length: ").unwrap().parse().unwrap();
        assert_eq!(body.len(), length, "Body length should match Content-Length header");
        assert_eq!(serde_json::from_str::<Value>(body).unwrap(), message);
    }

    #[tokio::test]
    async fn attachments_follow_the_body() {
        let body = json!({"kind": "analyzeFiles"});
        let attachments = vec![
            TransferBuffer::from(vec![1, 2, 3]),
            TransferBuffer::from(vec![]),
            TransferBuffer::from(vec![9]),
        ];

        let mut buffer = Vec::new();
        write_frame(&mut buffer, &body, &attachments).await.unwrap();
        assert!(
            String::from_utf8_lossy(&buffer).contains("Attachment-Lengths: 3,0,1\r\n")
        );

        let mut reader = BufReader::new(buffer.as_slice());
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.body, body);
        assert_eq!(frame.attachments, vec![vec![1, 2, 3], vec![], vec![9]]);
    }

    #[tokio::test]
    async fn reads_consecutive_frames_then_eof() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &json!(1), &[]).await.unwrap();
        write_frame(&mut buffer, &json!(2), &[]).await.unwrap();

        let mut reader = BufReader::new(buffer.as_slice());
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap().body, json!(1));
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap().body, json!(2));
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn header_names_are_case_insensitive() {
        let raw = b"content-length: 2\r\n\r\n{}";
        let mut reader = BufReader::new(&raw[..]);
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.body, json!({}));
    }

    #[tokio::test]
    async fn missing_content_length_is_invalid_data() {
        let raw = b"X-Other: 1\r\n\r\n{}";
        let mut reader = BufReader::new(&raw[..]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("Content-Length"));
    }

    #[tokio::test]
    async fn truncated_body_is_unexpected_eof() {
        let raw = b"Content-Length: 10\r\n\r\n{}";
        let mut reader = BufReader::new(&raw[..]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn huge_declared_length_fails_without_allocating_it() {
        let raw = b"Content-Length: 18446744073709551615\r\n\r\n{}";
        let mut reader = BufReader::new(&raw[..]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn non_json_body_is_consumed_and_the_next_frame_reads() {
        let mut buffer = b"Content-Length: 5\r\n\r\nhello".to_vec();
        write_frame(&mut buffer, &json!({"kind": "ready"}), &[]).await.unwrap();
        let mut reader = BufReader::new(buffer.as_slice());

        let raw = read_raw_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(raw.body, b"hello");
        assert_eq!(raw.parse().unwrap_err().kind(), io::ErrorKind::InvalidData);

        let next = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(next.body, json!({"kind": "ready"}));
    }

    #[tokio::test]
    async fn truncated_attachment_is_unexpected_eof() {
        let raw = b"Content-Length: 2\r\nAttachment-Lengths: 4\r\n\r\n{}ab";
        let mut reader = BufReader::new(&raw[..]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
