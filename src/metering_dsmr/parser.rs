use crate::obis_utils::{ObisId, ObisIdError};

use super::meter_definitions::{DsmrRegistry, TelegramData};
use super::structs::{
    FieldKind, FieldValue, Parsed, ParseError, ParseErrorKind, ParseResult, FixedValue,
    TimestampedFixedValue,
};
use super::utils;

fn is_line_end(c: u8) -> bool {
    return c == b'\r' || c == b'\n';
}

fn accumulate_digit(value: u32, data: &[u8], pos: usize) -> Result<u32, ParseError> {
    let c = data[pos];
    if !c.is_ascii_digit() {
        return Err(ParseError::new(ParseErrorKind::InvalidNumber, pos));
    }
    return value
        .checked_mul(10)
        .and_then(|v| v.checked_add((c - b'0') as u32))
        .ok_or(ParseError::new(ParseErrorKind::InvalidNumber, pos));
}

/// Parses a parenthesized string at `pos` whose length must fall in
/// `min..=max`. `end` bounds the scan, usually at the end of the line.
pub fn parse_string(data: &[u8], pos: usize, end: usize, min: usize, max: usize) -> ParseResult<String> {
    if pos >= end || data[pos] != b'(' {
        return Err(ParseError::new(ParseErrorKind::MissingOpeningParen, pos));
    }

    let start = pos + 1;
    let mut close = start;
    while close < end && data[close] != b')' {
        close += 1;
    }
    if close == end {
        return Err(ParseError::new(ParseErrorKind::MissingClosingParen, close));
    }

    let len = close - start;
    if len < min || len > max {
        return Err(ParseError::new(ParseErrorKind::InvalidStringLength, start));
    }

    return Ok(Parsed {
        value: String::from_utf8_lossy(&data[start..close]).into_owned(),
        next: close + 1,
    });
}

/// Parses a parenthesized number with up to `max_decimals` decimals
/// into an integer scaled by 10^max_decimals, so three decimals yield
/// thousandths. A non-empty `unit` must follow the value behind '*'
/// and is compared case insensitively.
pub fn parse_number(data: &[u8], pos: usize, end: usize, max_decimals: u32, unit: &str) -> ParseResult<u32> {
    if pos >= end || data[pos] != b'(' {
        return Err(ParseError::new(ParseErrorKind::MissingOpeningParen, pos));
    }

    let mut cur = pos + 1;
    let mut value: u32 = 0;
    let mut decimals = max_decimals;

    while cur < end && !matches!(data[cur], b'*' | b'.' | b')') {
        value = accumulate_digit(value, data, cur)?;
        cur += 1;
    }

    if decimals > 0 && cur < end && data[cur] == b'.' {
        cur += 1;
        while cur < end && decimals > 0 && !matches!(data[cur], b'*' | b')') {
            value = accumulate_digit(value, data, cur)?;
            decimals -= 1;
            cur += 1;
        }
    }

    /* Values with fewer decimals than allowed still scale the same */
    while decimals > 0 {
        value = value
            .checked_mul(10)
            .ok_or(ParseError::new(ParseErrorKind::InvalidNumber, cur))?;
        decimals -= 1;
    }

    if !unit.is_empty() {
        if cur >= end || data[cur] != b'*' {
            return Err(ParseError::new(ParseErrorKind::MissingUnitSeparator, cur));
        }
        cur += 1;
        let unit_start = cur;
        let mut expected = unit.as_bytes();
        while cur < end && data[cur] != b')' {
            let Some((&want, rest)) = expected.split_first() else {
                break;
            };
            if data[cur].to_ascii_lowercase() != want.to_ascii_lowercase() {
                return Err(ParseError::new(ParseErrorKind::InvalidUnit, unit_start));
            }
            expected = rest;
            cur += 1;
        }
        if !expected.is_empty() {
            return Err(ParseError::new(ParseErrorKind::InvalidUnit, unit_start));
        }
    }

    if cur >= end || data[cur] != b')' {
        return Err(ParseError::new(ParseErrorKind::MissingClosingParen, cur));
    }

    return Ok(Parsed {
        value,
        next: cur + 1,
    });
}

/// Parses a fixed-point value in thousandths. Meters usually send the
/// scaled unit (e.g. kWh); a plain integer in the thousandth unit
/// (e.g. Wh) is accepted as fallback. When both forms fail, the error
/// of the preferred form is reported.
pub fn parse_fixed(data: &[u8], pos: usize, end: usize, unit: &str, int_unit: &str) -> ParseResult<FixedValue> {
    let preferred = match parse_number(data, pos, end, 3, unit) {
        Ok(p) => {
            return Ok(Parsed {
                value: FixedValue(p.value),
                next: p.next,
            })
        }
        Err(e) => e,
    };

    return match parse_number(data, pos, end, 0, int_unit) {
        Ok(p) => Ok(Parsed {
            value: FixedValue(p.value),
            next: p.next,
        }),
        Err(_) => Err(preferred),
    };
}

/// Parses an M-Bus style reading: a 13 character timestamp group
/// followed by a fixed-point value group.
pub fn parse_timestamped_fixed(
    data: &[u8],
    pos: usize,
    end: usize,
    unit: &str,
    int_unit: &str,
) -> ParseResult<TimestampedFixedValue> {
    let ts = parse_string(data, pos, end, 13, 13)?;
    let fixed = parse_fixed(data, ts.next, end, unit, int_unit)?;
    return Ok(Parsed {
        value: TimestampedFixedValue {
            timestamp: ts.value,
            value: fixed.value,
        },
        next: fixed.next,
    });
}

/// Parses lines of repeated parenthesized groups of which only the
/// last one carries the value, as in the 13 month demand log.
pub fn parse_last_fixed(data: &[u8], pos: usize, end: usize, unit: &str, int_unit: &str) -> ParseResult<FixedValue> {
    let mut last_start = pos;
    let mut next = pos;
    while next < end && data[next] == b'(' {
        last_start = next;
        match parse_string(data, next, end, 1, 20) {
            Ok(p) => next = p.next,
            Err(_) => break,
        }
    }
    return parse_fixed(data, last_start, end, unit, int_unit);
}

/// The rest of the line, verbatim.
pub fn parse_raw(data: &[u8], pos: usize, end: usize) -> ParseResult<String> {
    return Ok(Parsed {
        value: String::from_utf8_lossy(&data[pos..end]).into_owned(),
        next: end,
    });
}

/// Parses one field value according to its kind.
pub fn parse_field(kind: &FieldKind, data: &[u8], pos: usize, end: usize) -> ParseResult<FieldValue> {
    return match *kind {
        FieldKind::Raw => {
            let p = parse_raw(data, pos, end)?;
            Ok(Parsed {
                value: FieldValue::Text(p.value),
                next: p.next,
            })
        }
        FieldKind::Str { min, max } => {
            let p = parse_string(data, pos, end, min, max)?;
            Ok(Parsed {
                value: FieldValue::Text(p.value),
                next: p.next,
            })
        }
        FieldKind::Timestamp => {
            let p = parse_string(data, pos, end, 13, 13)?;
            Ok(Parsed {
                value: FieldValue::Text(p.value),
                next: p.next,
            })
        }
        FieldKind::Fixed { unit, int_unit } => {
            let p = parse_fixed(data, pos, end, unit, int_unit)?;
            Ok(Parsed {
                value: FieldValue::Fixed(p.value),
                next: p.next,
            })
        }
        FieldKind::TimestampedFixed { unit, int_unit } => {
            let p = parse_timestamped_fixed(data, pos, end, unit, int_unit)?;
            Ok(Parsed {
                value: FieldValue::TimestampedFixed(p.value),
                next: p.next,
            })
        }
        FieldKind::LastFixed { unit, int_unit } => {
            let p = parse_last_fixed(data, pos, end, unit, int_unit)?;
            Ok(Parsed {
                value: FieldValue::Fixed(p.value),
                next: p.next,
            })
        }
        FieldKind::Int { unit } => {
            let p = parse_number(data, pos, end, 0, unit)?;
            Ok(Parsed {
                value: FieldValue::Int(p.value),
                next: p.next,
            })
        }
    };
}

/// Parses a complete telegram from '/' through the checksum.
///
/// The checksum is CRC-16/ARC over '/'..'!' inclusive, sent as four
/// hex digits behind '!'. With `crc_check` off the checksum is not
/// looked at. Lines with an OBIS id no definition matches are skipped
/// unless `fail_on_unknown` is set.
pub fn parse_telegram(
    registry: &DsmrRegistry,
    telegram: &[u8],
    crc_check: bool,
    fail_on_unknown: bool,
) -> Result<TelegramData, ParseError> {
    if telegram.is_empty() || telegram[0] != b'/' {
        return Err(ParseError::new(ParseErrorKind::MissingStart, 0));
    }

    let terminator = telegram
        .iter()
        .position(|&c| c == b'!')
        .ok_or(ParseError::new(ParseErrorKind::MissingTerminator, telegram.len()))?;

    if crc_check {
        verify_checksum(telegram, terminator)?;
    }

    return parse_data(registry, telegram, terminator, fail_on_unknown);
}

fn verify_checksum(telegram: &[u8], terminator: usize) -> Result<(), ParseError> {
    let crc_start = terminator + 1;
    if telegram.len() < crc_start + 4 {
        return Err(ParseError::new(ParseErrorKind::IncompleteChecksum, crc_start));
    }

    let mut expected: u16 = 0;
    for i in crc_start..crc_start + 4 {
        let digit = (telegram[i] as char)
            .to_digit(16)
            .ok_or(ParseError::new(ParseErrorKind::InvalidChecksum, i))?;
        expected = expected << 4 | digit as u16;
    }

    if utils::crc16_arc(&telegram[..=terminator]) != expected {
        return Err(ParseError::new(ParseErrorKind::ChecksumMismatch, crc_start));
    }
    return Ok(());
}

fn parse_data(
    registry: &DsmrRegistry,
    telegram: &[u8],
    terminator: usize,
    fail_on_unknown: bool,
) -> Result<TelegramData, ParseError> {
    let mut data = TelegramData::new(registry);
    let end = terminator;

    /* The identification line runs from behind '/' to the first line end */
    let id_start = 1;
    let id_end = telegram[id_start..end]
        .iter()
        .position(|&c| is_line_end(c))
        .map_or(end, |p| id_start + p);
    let id_line = &telegram[id_start..id_end];

    if id_line.len() >= 4 {
        if !id_line[..4].iter().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ParseError::new(ParseErrorKind::InvalidIdentification, id_start));
        }
    } else if !id_line.iter().all(|c| c.is_ascii_whitespace()) {
        return Err(ParseError::new(ParseErrorKind::InvalidIdentification, id_start));
    }

    if !id_line.is_empty() {
        if let Some(idx) = registry.find(&ObisId::IDENTIFICATION) {
            data.set_field(registry, idx, telegram, id_start, id_end)?;
        }
    }

    let mut pos = id_end;
    while pos < end && is_line_end(telegram[pos]) {
        pos += 1;
    }

    while pos < end {
        let line_start = pos;
        let content_end = match telegram[pos..end].iter().position(|&c| is_line_end(c)) {
            Some(p) => pos + p,
            None => {
                // Data ran into '!' without a terminating line end.
                if telegram[line_start..end].iter().all(|c| c.is_ascii_whitespace()) {
                    break;
                }
                return Err(ParseError::new(ParseErrorKind::UnexpectedTrailingData, line_start));
            }
        };

        let (id, value_start) =
            ObisId::parse(&telegram[..content_end], line_start).map_err(|e| match e {
                ObisIdError::Empty { offset } => {
                    ParseError::new(ParseErrorKind::ObisIdEmpty, offset)
                }
                ObisIdError::NumberOver255 { offset } => {
                    ParseError::new(ParseErrorKind::ObisIdNumberOver255, offset)
                }
            })?;

        match registry.find(&id) {
            None => {
                if fail_on_unknown {
                    return Err(ParseError::new(ParseErrorKind::UnknownField, line_start));
                }
                /* Not one of ours, skip the line */
            }
            Some(idx) => {
                let parsed = data.set_field(registry, idx, telegram, value_start, content_end)?;
                if parsed.next != content_end {
                    return Err(ParseError::new(ParseErrorKind::TrailingCharacters, parsed.next));
                }
            }
        }

        pos = content_end;
        while pos < end && is_line_end(telegram[pos]) {
            pos += 1;
        }
    }

    return Ok(data);
}

#[cfg(test)]
mod tests {
    use super::super::meter_definitions::MbusChannels;
    use super::*;

    fn registry() -> DsmrRegistry {
        return DsmrRegistry::new(&MbusChannels::default());
    }

    /// Appends the real checksum, `body` must end with '!'.
    fn with_crc(body: &str) -> Vec<u8> {
        let crc = utils::crc16_arc(body.as_bytes());
        return format!("{body}{crc:04X}\r\n").into_bytes();
    }

    const TELEGRAM_BODY: &str = "/ISk5\\2MT382-1000\r\n\
        \r\n\
        1-3:0.2.8(50)\r\n\
        0-0:1.0.0(101209113020W)\r\n\
        0-0:96.1.1(4B384547303034303436333935353037)\r\n\
        1-0:1.8.1(123456.789*kWh)\r\n\
        1-0:1.8.2(123456.789*kWh)\r\n\
        0-0:96.14.0(0002)\r\n\
        1-0:1.7.0(01.193*kW)\r\n\
        0-0:96.7.21(00004)\r\n\
        1-0:32.32.0(00002)\r\n\
        0-0:96.13.0()\r\n\
        1-0:32.7.0(220.1*V)\r\n\
        1-0:31.7.0(001*A)\r\n\
        1-0:21.7.0(01.111*kW)\r\n\
        0-1:24.1.0(003)\r\n\
        0-1:96.1.0(3232323241424344313233343536373839)\r\n\
        0-1:24.2.1(101209112500W)(12785.123*m3)\r\n\
        !";

    #[test]
    fn test_parse_string_window() {
        let p = parse_string(b"(50)", 0, 4, 2, 2).unwrap();
        assert_eq!(p.value, "50");
        assert_eq!(p.next, 4);

        let err = parse_string(b"(505)", 0, 5, 2, 2).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidStringLength);
        assert_eq!(err.offset, 1);

        let err = parse_string(b"50)", 0, 3, 2, 2).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingOpeningParen);

        let err = parse_string(b"(50", 0, 3, 2, 2).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingClosingParen);
    }

    #[test]
    fn test_parse_number_scales_to_thousandths() {
        let data = b"(00123.456*kWh)";
        let p = parse_number(data, 0, data.len(), 3, "kWh").unwrap();
        assert_eq!(p.value, 123456);
        assert_eq!(p.next, 15);

        let data = b"(123.4*kWh)";
        let p = parse_number(data, 0, data.len(), 3, "kWh").unwrap();
        assert_eq!(p.value, 123400);

        let data = b"(123*kWh)";
        let p = parse_number(data, 0, data.len(), 3, "kWh").unwrap();
        assert_eq!(p.value, 123000);
    }

    #[test]
    fn test_parse_number_unit_is_case_insensitive() {
        let data = b"(1.0*KWH)";
        let p = parse_number(data, 0, data.len(), 3, "kWh").unwrap();
        assert_eq!(p.value, 1000);
    }

    #[test]
    fn test_parse_number_rejections() {
        let data = b"(123)";
        let err = parse_number(data, 0, data.len(), 3, "kWh").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingUnitSeparator);
        assert_eq!(err.offset, 4);

        let data = b"(1*Wh)";
        let err = parse_number(data, 0, data.len(), 3, "kWh").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidUnit);
        assert_eq!(err.offset, 3);

        // Unit on the wire is longer than the expected one.
        let data = b"(1*kWhX)";
        let err = parse_number(data, 0, data.len(), 3, "kWh").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingClosingParen);

        let data = b"(1x2*kWh)";
        let err = parse_number(data, 0, data.len(), 3, "kWh").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidNumber);
        assert_eq!(err.offset, 2);

        let data = b"(9999999999999*kWh)";
        let err = parse_number(data, 0, data.len(), 3, "kWh").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidNumber);
    }

    #[test]
    fn test_parse_fixed_integer_fallback() {
        // 12345 Wh is 12.345 kWh, already in thousandths.
        let data = b"(12345*Wh)";
        let p = parse_fixed(data, 0, data.len(), "kWh", "Wh").unwrap();
        assert_eq!(p.value, FixedValue(12345));
        assert_eq!(p.value.value(), 12.345);
    }

    #[test]
    fn test_parse_fixed_reports_preferred_error() {
        // Neither kWh nor Wh match; the error offsets differ between
        // the two attempts and the preferred one must win.
        let data = b"(1.5)";
        let err = parse_fixed(data, 0, data.len(), "kWh", "Wh").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingUnitSeparator);
        assert_eq!(err.offset, 4);
    }

    #[test]
    fn test_parse_timestamped_fixed() {
        let data = b"(101209112500W)(12785.123*m3)";
        let p = parse_timestamped_fixed(data, 0, data.len(), "m3", "dm3").unwrap();
        assert_eq!(p.value.timestamp, "101209112500W");
        assert_eq!(p.value.value, FixedValue(12785123));
        assert_eq!(p.next, 29);
    }

    #[test]
    fn test_parse_last_fixed_takes_last_group() {
        let data = b"(210101000000W)(00002.123*kW)(210201000000W)(00003.234*kW)";
        let p = parse_last_fixed(data, 0, data.len(), "kW", "W").unwrap();
        assert_eq!(p.value, FixedValue(3234));
        assert_eq!(p.next, data.len());
    }

    #[test]
    fn test_parse_full_telegram() {
        let registry = registry();
        let telegram = with_crc(TELEGRAM_BODY);
        let data = parse_telegram(&registry, &telegram, true, false).unwrap();

        assert_eq!(
            data.get(&registry, "identification"),
            Some(&FieldValue::Text("ISk5\\2MT382-1000".to_string()))
        );
        assert_eq!(
            data.get(&registry, "p1_version"),
            Some(&FieldValue::Text("50".to_string()))
        );
        assert_eq!(
            data.get(&registry, "timestamp"),
            Some(&FieldValue::Text("101209113020W".to_string()))
        );
        assert_eq!(
            data.get(&registry, "energy_delivered_tariff1"),
            Some(&FieldValue::Fixed(FixedValue(123456789)))
        );
        assert_eq!(
            data.get(&registry, "electricity_tariff"),
            Some(&FieldValue::Text("0002".to_string()))
        );
        assert_eq!(
            data.get(&registry, "power_delivered"),
            Some(&FieldValue::Fixed(FixedValue(1193)))
        );
        assert_eq!(data.get(&registry, "electricity_failures"), Some(&FieldValue::Int(4)));
        assert_eq!(data.get(&registry, "electricity_sags_l1"), Some(&FieldValue::Int(2)));
        assert_eq!(
            data.get(&registry, "message_long"),
            Some(&FieldValue::Text(String::new()))
        );
        assert_eq!(
            data.get(&registry, "voltage_l1"),
            Some(&FieldValue::Fixed(FixedValue(220100)))
        );
        assert_eq!(
            data.get(&registry, "current_l1"),
            Some(&FieldValue::Fixed(FixedValue(1000)))
        );
        assert_eq!(data.get(&registry, "gas_device_type"), Some(&FieldValue::Int(3)));
        assert_eq!(
            data.get(&registry, "gas_delivered"),
            Some(&FieldValue::TimestampedFixed(TimestampedFixedValue {
                timestamp: "101209112500W".to_string(),
                value: FixedValue(12785123),
            }))
        );

        // Nothing close to every known field was in this telegram.
        assert!(!data.all_present());
        assert_eq!(data.get(&registry, "voltage_l2"), None);
    }

    #[test]
    fn test_parse_telegram_checksum_mismatch() {
        let registry = registry();
        let mut telegram = with_crc(TELEGRAM_BODY);

        // Flip one checksum digit.
        let len = telegram.len();
        telegram[len - 3] = if telegram[len - 3] == b'0' { b'1' } else { b'0' };
        let err = parse_telegram(&registry, &telegram, true, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ChecksumMismatch);

        // Or one body byte.
        let mut telegram = with_crc(TELEGRAM_BODY);
        telegram[40] ^= 0x01;
        let err = parse_telegram(&registry, &telegram, true, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ChecksumMismatch);

        // Without the check the flipped checksum is not looked at.
        let mut telegram = with_crc(TELEGRAM_BODY);
        let len = telegram.len();
        telegram[len - 3] = if telegram[len - 3] == b'0' { b'1' } else { b'0' };
        assert!(parse_telegram(&registry, &telegram, false, false).is_ok());
    }

    #[test]
    fn test_parse_telegram_incomplete_checksum() {
        let registry = registry();
        let err = parse_telegram(&registry, b"/ABC5\r\n\r\n!AB", true, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::IncompleteChecksum);

        let err = parse_telegram(&registry, b"/ABC5\r\n\r\n!WXYZ\r\n", true, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidChecksum);
    }

    #[test]
    fn test_parse_telegram_envelope_errors() {
        let registry = registry();
        let err = parse_telegram(&registry, b"ISk5\\2MT382-1000\r\n!", false, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingStart);

        let err = parse_telegram(&registry, b"/ISk5\\2MT382-1000\r\n", false, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingTerminator);

        let err = parse_telegram(&registry, b"", false, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingStart);
    }

    #[test]
    fn test_identification_leniency() {
        let registry = registry();

        // Four or more characters: first four must be alphanumeric.
        let data = parse_telegram(&registry, b"/ISk5\\2MT382-1000\r\n\r\n!", false, false).unwrap();
        assert_eq!(
            data.get(&registry, "identification"),
            Some(&FieldValue::Text("ISk5\\2MT382-1000".to_string()))
        );

        let err = parse_telegram(&registry, b"/IS 5xxx\r\n\r\n!", false, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidIdentification);

        // Short lines only pass when blank.
        let err = parse_telegram(&registry, b"/AB\r\n\r\n!", false, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidIdentification);

        let data = parse_telegram(&registry, b"/\r\n1-3:0.2.8(50)\r\n!", false, false).unwrap();
        assert_eq!(data.get(&registry, "identification"), None);
        assert_eq!(data.get(&registry, "p1_version"), Some(&FieldValue::Text("50".to_string())));
    }

    #[test]
    fn test_duplicate_field_is_rejected() {
        let registry = registry();
        let telegram = b"/ABC5\r\n\r\n1-0:1.8.1(000001.000*kWh)\r\n1-0:1.8.1(000002.000*kWh)\r\n!";
        let err = parse_telegram(&registry, telegram, false, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::DuplicateField);
    }

    #[test]
    fn test_unknown_field_handling() {
        let registry = registry();
        let telegram = b"/ABC5\r\n\r\n9-8:7.6.5(1)\r\n1-3:0.2.8(50)\r\n!";

        let data = parse_telegram(&registry, telegram, false, false).unwrap();
        assert_eq!(data.get(&registry, "p1_version"), Some(&FieldValue::Text("50".to_string())));

        let err = parse_telegram(&registry, telegram, false, true).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownField);
    }

    #[test]
    fn test_trailing_characters_on_data_line() {
        let registry = registry();
        let telegram = b"/ABC5\r\n\r\n1-0:1.8.1(000001.000*kWh)x\r\n!";
        let err = parse_telegram(&registry, telegram, false, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TrailingCharacters);
    }

    #[test]
    fn test_unterminated_last_line() {
        let registry = registry();
        let telegram = b"/ABC5\r\n\r\n1-0:1.8.1(000001.000*kWh)!";
        let err = parse_telegram(&registry, telegram, false, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedTrailingData);
    }

    #[test]
    fn test_value_parse_error_carries_line_offset() {
        let registry = registry();
        let telegram = b"/ABC5\r\n\r\n1-0:1.8.1(0001x5.391*kWh)\r\n!";
        let err = parse_telegram(&registry, telegram, false, false).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidNumber);
        // The offending 'x'.
        assert_eq!(telegram[err.offset], b'x');
    }
}
