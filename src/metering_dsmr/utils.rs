use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use crc16::{State, ARC};

use super::structs::ParseError;
use super::DsmrError;

/// CRC-16/ARC over `data`, the checksum the P1 port uses. The telegram
/// checksum covers everything from '/' through '!' inclusive.
pub fn crc16_arc(data: &[u8]) -> u16 {
    let mut state = State::<ARC>::new();
    state.update(data);
    return state.get();
}

/// Decodes a 13 character DSMR timestamp (YYMMDDhhmmssX) to unix time.
/// The DST letter selects the offset: W is +01:00, S is +02:00.
pub fn decode_timestamp(ts: &str) -> Option<u64> {
    if ts.len() != 13 || !ts.is_char_boundary(12) {
        return None;
    }

    let offset = match &ts[12..] {
        "W" => FixedOffset::east_opt(3600)?,
        "S" => FixedOffset::east_opt(7200)?,
        _ => return None,
    };

    let naive = NaiveDateTime::parse_from_str(&format!("20{}", &ts[..12]), "%Y%m%d%H%M%S").ok()?;
    let local = offset.from_local_datetime(&naive).single()?;
    return Some(local.timestamp() as u64);
}

/// Decodes the configured decryption key. An empty string disables
/// decryption, anything else must be exactly 32 hex characters.
pub fn decode_decryption_key(key: &str) -> Result<Option<[u8; 16]>, DsmrError> {
    if key.is_empty() {
        return Ok(None);
    }

    let bytes = hex::decode(key).map_err(|_| DsmrError::KeyNotHex)?;
    let bytes: [u8; 16] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| DsmrError::KeyWrongLength(b.len()))?;
    return Ok(Some(bytes));
}

/// Renders a parse error with the offending line and a caret under the
/// byte the parser stopped at, for the log:
///
/// ```text
/// 1-0:1.8.1(0001185x391*kWh)
///                  ^
/// Invalid number
/// ```
pub fn render_parse_error(telegram: &[u8], err: &ParseError) -> String {
    let offset = err.offset.min(telegram.len());

    let line_start = telegram[..offset]
        .iter()
        .rposition(|&c| c == b'\r' || c == b'\n')
        .map_or(0, |p| p + 1);
    let line_end = telegram[offset..]
        .iter()
        .position(|&c| c == b'\r' || c == b'\n')
        .map_or(telegram.len(), |p| offset + p);

    let line = String::from_utf8_lossy(&telegram[line_start..line_end]);
    return format!("{line}\n{}^\n{}", " ".repeat(offset - line_start), err.kind);
}
