//! Worker output parsing
//!
//! The training script reports progress by printing `Progress: <n>` on
//! stdout. Output arrives in arbitrary chunks, so `WorkerLineCodec` first
//! frames it into lines (tqdm-style `\r` updates count as line breaks) and
//! `parse_progress` then looks for the marker in each line.

use bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder};
use tracing::warn;

/// Marker preceding the percentage in worker output
pub const PROGRESS_MARKER: &str = "Progress:";

/// Longest line kept; longer lines are dropped whole
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Extract a progress percentage from a chunk of worker output
///
/// Returns None when the chunk holds no well-formed marker, which is the
/// common case rather than an error. When several markers are present the
/// last well-formed one wins. Values above 100 are clamped.
pub fn parse_progress(chunk: &str) -> Option<u8> {
    chunk
        .match_indices(PROGRESS_MARKER)
        .filter_map(|(idx, marker)| parse_value(&chunk[idx + marker.len()..]))
        .last()
}

/// Parse the integer directly following a marker
///
/// Leading whitespace is skipped; anything after the digits (`%`, `.5`,
/// text) is ignored. No digits means no value.
fn parse_value(rest: &str) -> Option<u8> {
    let rest = rest.trim_start();
    let digit_count = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digit_count == 0 {
        return None;
    }

    // Overflowing digit runs are still "more than 100"
    let value = rest[..digit_count].parse::<u64>().unwrap_or(u64::MAX);
    Some(value.min(100) as u8)
}

/// Frames worker output into lines
///
/// Both `\n` and `\r` terminate a line; empty lines are skipped and bytes
/// that are not UTF-8 are replaced. A line longer than `MAX_LINE_BYTES` is
/// logged and discarded up to its terminator, then framing resumes.
#[derive(Debug)]
pub struct WorkerLineCodec {
    inner: AnyDelimiterCodec,
}

impl WorkerLineCodec {
    pub fn new() -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\r\n".to_vec(),
                Vec::new(),
                MAX_LINE_BYTES,
            ),
        }
    }

    fn next_line(
        &mut self,
        buf: &mut BytesMut,
        at_eof: bool,
    ) -> Result<Option<String>, std::io::Error> {
        loop {
            let frame = if at_eof {
                self.inner.decode_eof(buf)
            } else {
                self.inner.decode(buf)
            };

            match frame {
                Ok(Some(chunk)) if chunk.is_empty() => continue,
                Ok(Some(chunk)) => return Ok(Some(String::from_utf8_lossy(&chunk).into_owned())),
                Ok(None) => return Ok(None),
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    warn!(max_bytes = MAX_LINE_BYTES, "Dropping overlong worker output line");
                }
                Err(AnyDelimiterCodecError::Io(e)) => return Err(e),
            }
        }
    }
}

impl Default for WorkerLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WorkerLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        self.next_line(buf, false)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        self.next_line(buf, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    #[test]
    fn test_plain_marker() {
        assert_eq!(parse_progress("Progress: 42"), Some(42));
        assert_eq!(parse_progress("Progress:7"), Some(7));
    }

    #[test]
    fn test_no_marker_is_none() {
        assert_eq!(parse_progress("no markers here"), None);
        assert_eq!(parse_progress(""), None);
        assert_eq!(parse_progress("progress: 10"), None);
    }

    #[test]
    fn test_marker_mid_chunk_with_trailing_whitespace() {
        assert_eq!(parse_progress("epoch 3 | Progress:   55   \n"), Some(55));
        assert_eq!(parse_progress("[train] Progress: 12% (loss 0.31)"), Some(12));
    }

    #[test]
    fn test_malformed_value_is_none() {
        assert_eq!(parse_progress("Progress: abc"), None);
        assert_eq!(parse_progress("Progress: -5"), None);
        assert_eq!(parse_progress("Progress:"), None);
    }

    #[test]
    fn test_fraction_truncated() {
        assert_eq!(parse_progress("Progress: 33.9"), Some(33));
    }

    #[test]
    fn test_last_marker_wins() {
        assert_eq!(parse_progress("Progress: 10\nProgress: 20\n"), Some(20));
        assert_eq!(parse_progress("Progress: 10 Progress: oops"), Some(10));
    }

    #[test]
    fn test_out_of_range_clamped() {
        assert_eq!(parse_progress("Progress: 150"), Some(100));
        assert_eq!(
            parse_progress("Progress: 99999999999999999999999999"),
            Some(100)
        );
    }

    #[test]
    fn test_codec_rejoins_split_marker() {
        let mut codec = WorkerLineCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"Prog");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"ress: 4");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"2\nnext");

        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "Progress: 42");
        assert_eq!(parse_progress(&line), Some(42));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("next".to_string()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    async fn collect_lines(input: &[u8]) -> Vec<String> {
        FramedRead::new(input, WorkerLineCodec::new())
            .map(|line| line.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_codec_carriage_returns() {
        let lines = collect_lines(b"Progress: 1\rProgress: 2\r\nProgress: 3\n").await;
        assert_eq!(lines, vec!["Progress: 1", "Progress: 2", "Progress: 3"]);
    }

    #[tokio::test]
    async fn test_codec_lossy_utf8() {
        let lines = collect_lines(b"\xffProgress: 9\n").await;
        assert_eq!(lines.len(), 1);
        assert_eq!(parse_progress(&lines[0]), Some(9));
    }

    #[tokio::test]
    async fn test_marker_after_64k_of_output_on_one_line() {
        let mut output = vec![b'x'; 64 * 1024];
        output.extend_from_slice(b"Progress: 42\n");

        let lines = collect_lines(&output).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(parse_progress(&lines[0]), Some(42));
    }

    #[tokio::test]
    async fn test_overlong_line_dropped_and_framing_resumes() {
        let mut output = vec![b'x'; MAX_LINE_BYTES + 10];
        output.extend_from_slice(b"Progress: 99\nProgress: 7\n");

        let lines = collect_lines(&output).await;
        assert_eq!(lines, vec!["Progress: 7"]);
    }
}
