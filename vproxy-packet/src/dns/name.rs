//! Domain name compression codec

use bytes::{BufMut, BytesMut};
use tracing::trace;
use vproxy_core::{ByteArray, Error, Result};

/// Maximum number of compression pointers followed while decoding one name.
pub const MAX_POINTER_HOPS: usize = 64;

/// Maximum allowed label length per RFC 1035 Section 2.3.4.
pub const MAX_LABEL_LENGTH: usize = 63;

/// Maximum encoded name length per RFC 1035 Section 2.3.4.
pub const MAX_NAME_LENGTH: usize = 255;

const POINTER_TAG: u8 = 0xC0;

/// Decode a domain name starting at `*cursor` inside `field`
///
/// Compression pointers are absolute offsets into `message`. `cursor` is
/// advanced past the bytes of `field` the name occupies: up to and including
/// the terminator, or up to and including the first pointer. Bytes read
/// after a jump do not move it.
///
/// The name is returned dot-separated without a trailing dot; the root name
/// is the empty string.
pub fn parse_domain_name(
    field: &ByteArray,
    message: &ByteArray,
    cursor: &mut usize,
) -> Result<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut buf = field;
    let mut pos = *cursor;
    let mut jumped = false;
    let mut hops = 0;
    let mut encoded_len = 1;

    loop {
        let len = buf
            .uint8(pos)
            .map_err(|_| Error::invalid_dns(format!("name truncated at offset {}", pos)))?;

        match len & POINTER_TAG {
            0x00 if len == 0 => {
                pos += 1;
                break;
            }
            0x00 => {
                let len = len as usize;
                let label = buf.sub(pos + 1, len).map_err(|_| {
                    Error::invalid_dns(format!("label truncated at offset {}", pos))
                })?;
                let label = std::str::from_utf8(&label).map_err(|_| {
                    Error::invalid_dns(format!("invalid utf-8 in label at offset {}", pos))
                })?;
                encoded_len += 1 + len;
                if encoded_len > MAX_NAME_LENGTH {
                    return Err(Error::invalid_dns(format!(
                        "name longer than {} bytes",
                        MAX_NAME_LENGTH
                    )));
                }
                labels.push(label.to_owned());
                pos += 1 + len;
            }
            POINTER_TAG => {
                let low = buf.uint8(pos + 1).map_err(|_| {
                    Error::invalid_dns(format!("compression pointer truncated at offset {}", pos))
                })?;
                let target = (((len & !POINTER_TAG) as usize) << 8) | low as usize;
                if !jumped {
                    *cursor = pos + 2;
                    jumped = true;
                }
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(Error::invalid_dns(format!(
                        "more than {} compression pointers in one name",
                        MAX_POINTER_HOPS
                    )));
                }
                trace!(from = pos, target, "following dns compression pointer");
                buf = message;
                pos = target;
            }
            _ => {
                return Err(Error::invalid_dns(format!(
                    "unsupported label type 0x{:02x} at offset {}",
                    len, pos
                )));
            }
        }
    }

    if !jumped {
        *cursor = pos;
    }
    Ok(labels.join("."))
}

/// Encode a domain name in the uncompressed form
///
/// One trailing dot is accepted; `""` and `"."` both encode the root.
pub fn format_domain_name(name: &str) -> Result<ByteArray> {
    let name = name.strip_suffix('.').unwrap_or(name);
    let mut buf = BytesMut::with_capacity(name.len() + 2);
    if !name.is_empty() {
        for label in name.split('.') {
            if label.is_empty() {
                return Err(Error::encode(format!(
                    "empty label in domain name: {}",
                    name
                )));
            }
            if label.len() > MAX_LABEL_LENGTH {
                return Err(Error::encode(format!(
                    "label longer than {} bytes: {}",
                    MAX_LABEL_LENGTH, label
                )));
            }
            buf.put_u8(label.len() as u8);
            buf.put_slice(label.as_bytes());
        }
    }
    buf.put_u8(0);
    if buf.len() > MAX_NAME_LENGTH {
        return Err(Error::encode(format!(
            "domain name longer than {} bytes: {}",
            MAX_NAME_LENGTH, name
        )));
    }
    Ok(buf.into())
}
