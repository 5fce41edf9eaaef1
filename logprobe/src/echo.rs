//! Decoding of the bytes the logger echoes back.
//!
//! The logger firmware timestamps every chunk it receives and writes it back
//! as `"[hh:mm:ss.mmm] " + chunk + "\n"`, splitting input into chunks of at
//! most [`LOGGER_CHUNK_LEN`] bytes.

use std::fmt::Write as _;

/// Largest chunk the logger echoes under a single timestamp.
pub const LOGGER_CHUNK_LEN: usize = 256;

/// Text recovered from one drain of the serial channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedEcho {
    /// Decoded text. Invalid sequences are replaced with `�`.
    pub text: String,
    /// Whether the bytes were not valid UTF-8.
    pub lossy: bool,
}

/// Decode echoed bytes without ever failing.
///
/// Valid UTF-8 is returned as-is. Anything else is decoded lossily and
/// flagged; the caller still searches the garbled text for the payload.
pub fn decode_echo(bytes: &[u8]) -> DecodedEcho {
    match std::str::from_utf8(bytes) {
        Ok(text) => DecodedEcho {
            text: text.to_owned(),
            lossy: false,
        },
        Err(_) => DecodedEcho {
            text: String::from_utf8_lossy(bytes).into_owned(),
            lossy: true,
        },
    }
}

/// A single timestamped line emitted by the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerFrame<'a> {
    /// Device uptime in milliseconds when the chunk was received.
    pub uptime_ms: u64,
    /// Chunk contents without the timestamp and newline.
    pub body: &'a str,
}

/// Format a chunk the way the logger echoes it.
pub fn format_logger_frame(uptime_ms: u64, body: &[u8]) -> Vec<u8> {
    let hours = uptime_ms / 3_600_000;
    let minutes = (uptime_ms / 60_000) % 60;
    let seconds = (uptime_ms / 1000) % 60;
    let millis = uptime_ms % 1000;

    let mut header = String::with_capacity(16);
    let _ = write!(header, "[{hours:02}:{minutes:02}:{seconds:02}.{millis:03}] ");

    let mut out = Vec::with_capacity(header.len() + body.len() + 1);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body);
    out.push(b'\n');
    out
}

/// Split echoed text into logger frames.
///
/// Lines without a well-formed timestamp header are skipped.
pub fn split_logger_frames(text: &str) -> Vec<LoggerFrame<'_>> {
    text.split('\n')
        .filter_map(parse_frame_line)
        .collect()
}

fn parse_frame_line(line: &str) -> Option<LoggerFrame<'_>> {
    let rest = line.strip_prefix('[')?;
    let (stamp, body) = rest.split_once("] ")?;
    let (hms, millis) = stamp.split_once('.')?;
    let mut parts = hms.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 || millis.len() != 3 {
        return None;
    }
    let millis: u64 = millis.parse().ok()?;

    // Hours come straight from the wire; an absurd value is noise, not a frame.
    let uptime_ms = hours
        .checked_mul(3_600_000)?
        .checked_add(minutes * 60_000 + seconds * 1000 + millis)?;

    Some(LoggerFrame { uptime_ms, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_utf8() {
        let decoded = decode_echo(b"abc123");
        assert_eq!(decoded.text, "abc123");
        assert!(!decoded.lossy);
    }

    #[test]
    fn test_decode_empty() {
        let decoded = decode_echo(b"");
        assert!(decoded.text.is_empty());
        assert!(!decoded.lossy);
    }

    #[test]
    fn test_decode_invalid_bytes_is_lossy_not_fatal() {
        let decoded = decode_echo(&[0xFF, b'A', 0xFE, b'B']);
        assert_eq!(decoded.text, "\u{FFFD}A\u{FFFD}B");
        assert!(decoded.lossy);
    }

    #[test]
    fn test_format_logger_frame() {
        let frame = format_logger_frame(3_723_045, b"payload");
        assert_eq!(frame, b"[01:02:03.045] payload\n");
    }

    #[test]
    fn test_split_logger_frames() {
        let text = "[00:00:01.000] first\n[00:00:01.100] second\n";
        let frames = split_logger_frames(text);
        assert_eq!(
            frames,
            vec![
                LoggerFrame {
                    uptime_ms: 1000,
                    body: "first"
                },
                LoggerFrame {
                    uptime_ms: 1100,
                    body: "second"
                },
            ]
        );
    }

    #[test]
    fn test_split_logger_frames_skips_noise() {
        let text = "boot noise\n[xx:00:01.000] bad\n[00:00:02.500] ok";
        let frames = split_logger_frames(text);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].uptime_ms, 2500);
        assert_eq!(frames[0].body, "ok");
    }

    #[test]
    fn test_split_logger_frames_skips_overflowing_hours() {
        let text = "[18446744073709551615:00:00.000] x\n[5124095576030431:00:00.000] y\n[00:00:00.007] z";
        let frames = split_logger_frames(text);
        assert_eq!(
            frames,
            vec![LoggerFrame {
                uptime_ms: 7,
                body: "z"
            }]
        );
    }

    #[test]
    fn test_split_logger_frames_largest_hour_that_fits() {
        let hours = u64::MAX / 3_600_000;
        let text = format!("[{hours}:00:00.000] edge");
        let frames = split_logger_frames(&text);
        assert_eq!(frames[0].uptime_ms, hours * 3_600_000);
    }

    #[test]
    fn test_frame_roundtrip_through_text() {
        let bytes = format_logger_frame(59_999, b"Zz9");
        let decoded = decode_echo(&bytes);
        let frames = split_logger_frames(&decoded.text);
        assert_eq!(frames[0].uptime_ms, 59_999);
        assert_eq!(frames[0].body, "Zz9");
    }
}
