//! Motion-JPEG multipart framing.
//!
//! The continuous stream is served as `multipart/x-mixed-replace`. Each part
//! carries one complete JPEG plus its frame sequence number:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! X-Sequence: <seq>\r\n
//! \r\n
//! <n bytes of JPEG>\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Multipart boundary token.
pub const BOUNDARY: &str = "frame";

const SEQUENCE_HEADER: &str = "x-sequence";
const LENGTH_HEADER: &str = "content-length";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// `Content-Type` header value for the stream response.
pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
}

/// Encodes one JPEG as a complete multipart chunk.
pub fn encode_part(sequence: u64, jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Sequence: {sequence}\r\n\r\n",
        jpeg.len()
    );
    let mut buf = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    buf.put_slice(header.as_bytes());
    buf.put_slice(jpeg);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// A part decoded from the front of a stream buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MjpegPart {
    pub sequence: u64,
    pub jpeg: Bytes,
    /// Number of bytes of the input consumed by this part
    pub consumed: usize,
}

/// Decodes the first complete part in `buf`.
///
/// Returns `None` if the buffer does not yet hold a complete part or the
/// headers are malformed. Used by clients and tests reading the stream.
pub fn decode_part(buf: &[u8]) -> Option<MjpegPart> {
    let header_end = find(buf, HEADER_END)?;
    let header = std::str::from_utf8(buf.get(..header_end)?).ok()?;

    let mut lines = header.split("\r\n");
    if lines.next()? != format!("--{BOUNDARY}") {
        return None;
    }

    let mut sequence = None;
    let mut length = None;
    for line in lines {
        let (name, value) = line.split_once(':')?;
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        if name == SEQUENCE_HEADER {
            sequence = value.parse::<u64>().ok();
        } else if name == LENGTH_HEADER {
            length = value.parse::<usize>().ok();
        }
    }

    let body_start = header_end + HEADER_END.len();
    let length = length?;
    let body_end = body_start.checked_add(length)?;
    let jpeg = buf.get(body_start..body_end)?;
    if buf.get(body_end..body_end + 2)? != b"\r\n" {
        return None;
    }

    Some(MjpegPart {
        sequence: sequence?,
        jpeg: Bytes::copy_from_slice(jpeg),
        consumed: body_end + 2,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
