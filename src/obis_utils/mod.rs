use std::fmt;

use thiserror::Error;

/// Value for the trailing groups a telegram id leaves unspecified.
pub const UNSPECIFIED_GROUP: u8 = 255;

/// A six-group OBIS identifier as used on the P1 port.
///
/// Textual ids carry up to six groups (A-B:C.D.E.F); groups the meter
/// leaves out are stored as 255. Matching is exact byte equality, so a
/// five-group id only matches a definition whose sixth byte is 255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObisId(pub [u8; 6]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ObisIdError {
    #[error("OBIS id is empty")]
    Empty { offset: usize },
    #[error("OBIS id has number over 255")]
    NumberOver255 { offset: usize },
}

impl ObisId {
    /// Id of the identification line, which carries no OBIS code.
    pub const IDENTIFICATION: ObisId = ObisId([
        UNSPECIFIED_GROUP,
        UNSPECIFIED_GROUP,
        UNSPECIFIED_GROUP,
        UNSPECIFIED_GROUP,
        UNSPECIFIED_GROUP,
        UNSPECIFIED_GROUP,
    ]);

    /// Parses the textual form starting at `pos` in `data`.
    ///
    /// Group separators are `-` after the first group, `:` after the
    /// second and `.` between the remaining ones. Parsing stops at the
    /// first byte that fits neither a digit nor the separator expected
    /// at that position; the returned offset points past the last byte
    /// consumed. Groups beyond the last one present are set to 255.
    pub fn parse(data: &[u8], pos: usize) -> Result<(ObisId, usize), ObisIdError> {
        let mut id = [0u8; 6];
        let mut part: usize = 0;
        let mut next = pos;

        while next < data.len() {
            let c = data[next];
            if c.is_ascii_digit() {
                let digit = c - b'0';
                if id[part] > 25 || (id[part] == 25 && digit > 5) {
                    return Err(ObisIdError::NumberOver255 { offset: next });
                }
                id[part] = id[part] * 10 + digit;
            } else if part == 0 && c == b'-' {
                part += 1;
            } else if part == 1 && c == b':' {
                part += 1;
            } else if part > 1 && part < 5 && c == b'.' {
                part += 1;
            } else {
                break;
            }
            next += 1;
        }

        if next == pos {
            return Err(ObisIdError::Empty { offset: pos });
        }

        for group in id.iter_mut().skip(part + 1) {
            *group = UNSPECIFIED_GROUP;
        }

        return Ok((ObisId(id), next));
    }
}

impl fmt::Display for ObisId {
    /// Writes the canonical textual form, leaving out unspecified
    /// trailing groups: `1-0:1.8.0` for `[1, 0, 1, 8, 0, 255]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.0.iter().enumerate() {
            if *group == UNSPECIFIED_GROUP {
                break;
            }
            match i {
                0 => write!(f, "{group}")?,
                1 => write!(f, "-{group}")?,
                2 => write!(f, ":{group}")?,
                _ => write!(f, ".{group}")?,
            }
        }
        Ok(())
    }
}
