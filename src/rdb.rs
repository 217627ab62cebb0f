//! RDB snapshot loader, used once at startup to seed the keyspace (§4.9).
//! Grounded in the teacher's byte-oriented opcode walker; adapted to
//! produce `Entry` values and to treat an unreadable or absent file as an
//! empty keyspace rather than a fatal error (§7).

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::value::Entry;

const MAGIC: &[u8] = b"REDIS";
const OPCODE_META: u8 = 0xFA;
const OPCODE_START_DB: u8 = 0xFE;
const OPCODE_RESIZE_DB: u8 = 0xFB;
const OPCODE_EXPIRE_MS: u8 = 0xFC;
const OPCODE_EXPIRE_SEC: u8 = 0xFD;
const OPCODE_STRING: u8 = 0x00;
const OPCODE_EOF: u8 = 0xFF;

/// Loads `<dir>/<dbfilename>`. A missing file yields an empty map (fresh
/// server); a present-but-malformed file is logged and also yields an empty
/// map, per §7's "non-fatal" rule for RDB read failures.
pub async fn load(dir: &str, dbfilename: &str) -> HashMap<Bytes, Entry> {
    let path = Path::new(dir).join(dbfilename);
    let file = match File::open(&path).await {
        Ok(f) => f,
        Err(_) => return HashMap::new(),
    };

    match parse(file).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse RDB snapshot, starting empty");
            HashMap::new()
        }
    }
}

async fn parse<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<HashMap<Bytes, Entry>> {
    let mut magic = [0u8; 5];
    reader.read_exact(&mut magic).await?;
    if magic != MAGIC {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad RDB magic"));
    }
    let mut version = [0u8; 4];
    reader.read_exact(&mut version).await?;

    let mut entries = HashMap::new();
    loop {
        let mut marker = [0u8; 1];
        if reader.read_exact(&mut marker).await.is_err() {
            break;
        }
        match marker[0] {
            OPCODE_META => skip_metadata(&mut reader).await?,
            OPCODE_START_DB => {
                reader.read_u8().await?;
            }
            OPCODE_RESIZE_DB => {
                read_length(&mut reader).await?;
                read_length(&mut reader).await?;
            }
            OPCODE_EXPIRE_SEC => {
                let secs = reader.read_u32_le().await?;
                let deadline = unix_to_instant(secs as u64 * 1000);
                let value_type = reader.read_u8().await?;
                if value_type != OPCODE_STRING {
                    warn!(value_type, "skipping non-string RDB entry");
                    continue;
                }
                let (key, value) = read_string_pair(&mut reader).await?;
                entries.insert(key, Entry::new_string_absolute(value, deadline));
            }
            OPCODE_EXPIRE_MS => {
                let ms = reader.read_u64_le().await?;
                let deadline = unix_to_instant(ms);
                let value_type = reader.read_u8().await?;
                if value_type != OPCODE_STRING {
                    warn!(value_type, "skipping non-string RDB entry");
                    continue;
                }
                let (key, value) = read_string_pair(&mut reader).await?;
                entries.insert(key, Entry::new_string_absolute(value, deadline));
            }
            OPCODE_STRING => {
                let (key, value) = read_string_pair(&mut reader).await?;
                entries.insert(key, Entry::new_string_absolute(value, None));
            }
            OPCODE_EOF => break,
            other => {
                warn!(opcode = format!("{other:#04x}").as_str(), "unrecognized RDB opcode, stopping scan");
                break;
            }
        }
    }
    Ok(entries)
}

async fn skip_metadata<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    let _key = read_length_prefixed_bytes(reader).await?;
    let _value = read_length_prefixed_bytes(reader).await?;
    Ok(())
}

async fn read_string_pair<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<(Bytes, Bytes)> {
    let key = read_length_prefixed_bytes(reader).await?;
    let value = read_length_prefixed_bytes(reader).await?;
    Ok((Bytes::from(key), Bytes::from(value)))
}

async fn read_length_prefixed_bytes<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let len = read_length(reader).await?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Decodes the RDB length-encoding scheme: the top two bits of the first
/// byte select a 6-bit, 14-bit, or 32-bit length (special-encoded integers
/// are not needed for the string-only entries this loader produces).
async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<usize> {
    let first = reader.read_u8().await?;
    match first >> 6 {
        0b00 => Ok((first & 0x3F) as usize),
        0b01 => {
            let second = reader.read_u8().await?;
            Ok((((first & 0x3F) as usize) << 8) | second as usize)
        }
        0b10 => Ok(reader.read_u32().await? as usize),
        _ => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "unsupported length encoding")),
    }
}

fn unix_to_instant(millis: u64) -> Option<Instant> {
    let target = UNIX_EPOCH + Duration::from_millis(millis);
    let now_wall = SystemTime::now();
    match target.duration_since(now_wall) {
        Ok(remaining) => Some(Instant::now() + remaining),
        // Already expired: still schedule a deadline in the past relative to
        // "now" by using a zero-length remainder, so is_expired() trips on
        // first access instead of treating this as "never expires".
        Err(_) => Some(Instant::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_key_without_expiry() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"REDIS0011");
        bytes.push(OPCODE_STRING);
        bytes.push(3);
        bytes.extend_from_slice(b"foo");
        bytes.push(3);
        bytes.extend_from_slice(b"bar");
        bytes.push(OPCODE_EOF);

        let entries = parse(std::io::Cursor::new(bytes)).await.unwrap();
        let entry = entries.get(&Bytes::from_static(b"foo")).unwrap();
        assert!(!entry.is_expired());
        match &entry.payload {
            crate::value::Payload::Str(v) => assert_eq!(v.as_ref(), b"bar"),
            _ => panic!("expected string payload"),
        }
    }

    #[tokio::test]
    async fn missing_file_yields_empty_keyspace() {
        let entries = load("/nonexistent/dir/for/tests", "missing.rdb").await;
        assert!(entries.is_empty());
    }
}
