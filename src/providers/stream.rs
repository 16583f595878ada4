//! Line-level parser for provider SSE responses.
//!
//! All three backends stream generations as SSE frames whose `data:` field
//! carries a JSON document (OpenAI terminates with a literal `[DONE]`).
//! This module buffers the byte stream and yields each `data:` payload;
//! the per-provider clients map payloads to text deltas.

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;

use super::ProviderError;

/// Payloads of `data:` lines from an SSE byte stream.
///
/// Partial lines are buffered across chunk boundaries as raw bytes and only
/// decoded once a full line has arrived, so a multibyte character split
/// across two network chunks is not an error. Non-`data:` lines (event
/// names, comments, blanks) are skipped.
pub fn data_lines(
    byte_stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
) -> Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>> {
    let mut buffer: Vec<u8> = Vec::new();

    let lines = byte_stream.flat_map(move |chunk_result| {
        let chunk = match chunk_result {
            Ok(bytes) => bytes,
            Err(e) => {
                return futures::stream::iter(vec![Err(ProviderError::Stream(e.to_string()))]);
            }
        };

        buffer.extend_from_slice(&chunk);

        let mut out = Vec::new();
        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = buffer.drain(..=newline).collect();

            let line = match std::str::from_utf8(&line_bytes[..newline]) {
                Ok(t) => t.trim_end_matches('\r'),
                Err(e) => {
                    out.push(Err(ProviderError::Stream(format!(
                        "invalid UTF-8 in stream: {}",
                        e
                    ))));
                    continue;
                }
            };

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    out.push(Ok(data.to_string()));
                }
            }
        }

        futures::stream::iter(out)
    });

    Box::pin(lines)
}

/// OpenAI's end-of-stream sentinel.
pub const DONE_SENTINEL: &str = "[DONE]";

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<&str>) -> Vec<Result<String, ProviderError>> {
        let byte_stream = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from(c.to_string())))
                .collect::<Vec<Result<Bytes, reqwest::Error>>>(),
        );
        data_lines(Box::pin(byte_stream)).collect().await
    }

    #[tokio::test]
    async fn test_simple_data_lines() {
        let got = collect(vec!["data: {\"a\":1}\n\ndata: {\"b\":2}\n\n"]).await;
        let values: Vec<String> = got.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn test_line_split_across_chunks() {
        let got = collect(vec!["data: {\"chu", "nk\":true}\n"]).await;
        let values: Vec<String> = got.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec!["{\"chunk\":true}"]);
    }

    #[tokio::test]
    async fn test_event_and_comment_lines_skipped() {
        let got = collect(vec![
            "event: content_block_delta\ndata: {\"x\":1}\n\n: keep-alive\n\n",
        ])
        .await;
        let values: Vec<String> = got.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec!["{\"x\":1}"]);
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let full = "data: {\"t\":\"é\"}\n".as_bytes();
        // Split between the two bytes of the 'é'.
        let split = full.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::copy_from_slice(&full[..split])),
            Ok(Bytes::copy_from_slice(&full[split..])),
        ];
        let byte_stream = futures::stream::iter(chunks);

        let got: Vec<_> = data_lines(Box::pin(byte_stream)).collect().await;
        let values: Vec<String> = got.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec!["{\"t\":\"é\"}"]);
    }

    #[tokio::test]
    async fn test_crlf_lines() {
        let got = collect(vec!["data: [DONE]\r\n"]).await;
        let values: Vec<String> = got.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![DONE_SENTINEL]);
    }
}
