use aes_gcm::aead::consts::U12;
use aes_gcm::aead::Aead;
use aes_gcm::{AesGcm, Key, KeyInit, Nonce};

use super::structs::FramingError;

/// First byte of every encrypted DLMS push frame.
pub const SYNC_BYTE: u8 = 0xDB;
/// Second header byte, the length of the system title.
pub const FRAME_TYPE: u8 = 0x08;
/// Header bytes preceding the ciphertext.
pub const HEADER_LEN: usize = 18;
/// Authentication tag trailing the ciphertext.
pub const GCM_TAG_LEN: usize = 12;
/// Header bytes needed before the total frame length is known.
pub const MIN_HEADER_LEN: usize = 13;

/* The DLMS frames carry a 12 byte GCM tag instead of the usual 16 */
type Aes128Gcm12 = AesGcm<aes::Aes128, U12, U12>;

/// Total frame length derived from a header of at least 13 bytes:
/// header plus ciphertext plus trailing tag.
pub fn frame_total_len(header: &[u8]) -> Result<usize, FramingError> {
    if header.len() < MIN_HEADER_LEN || header[0] != SYNC_BYTE || header[1] != FRAME_TYPE {
        return Err(FramingError::InvalidFrameHeader);
    }
    let len_info = u16::from_be_bytes([header[11], header[12]]) as usize;
    return Ok(HEADER_LEN + len_info + GCM_TAG_LEN);
}

/// A complete encrypted frame, split into its header fields.
///
/// Layout: `DB 08`, eight bytes of system title, one length prefix
/// byte, the big endian ciphertext length at 11, a security byte, a
/// four byte frame counter at 14, the ciphertext from 18 on and the
/// GCM tag at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFrame<'a> {
    pub system_title: &'a [u8],
    pub frame_counter: &'a [u8],
    pub ciphertext: &'a [u8],
    pub tag: &'a [u8],
}

impl<'a> EncryptedFrame<'a> {
    /// Splits a received frame, validating the marker bytes and that
    /// the length field matches what was actually received.
    pub fn parse(frame: &'a [u8]) -> Result<Self, FramingError> {
        if frame.len() < MIN_HEADER_LEN || frame[0] != SYNC_BYTE || frame[1] != FRAME_TYPE {
            return Err(FramingError::InvalidFrameHeader);
        }
        let len_info = u16::from_be_bytes([frame[11], frame[12]]) as usize;
        if len_info == 0 {
            return Err(FramingError::EmptyCiphertext);
        }
        if frame.len() != HEADER_LEN + len_info + GCM_TAG_LEN {
            return Err(FramingError::FrameLengthMismatch);
        }
        return Ok(EncryptedFrame {
            system_title: &frame[2..10],
            frame_counter: &frame[14..18],
            ciphertext: &frame[HEADER_LEN..HEADER_LEN + len_info],
            tag: &frame[HEADER_LEN + len_info..],
        });
    }

    /// GCM nonce: the system title followed by the frame counter.
    pub fn nonce(&self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(self.system_title);
        nonce[8..].copy_from_slice(self.frame_counter);
        return nonce;
    }
}

/// Decrypts and verifies a frame, returning the plaintext telegram.
/// Any authentication failure is reported as `DecryptionFailed`, no
/// partial plaintext ever leaves this function.
pub fn decrypt(key: &[u8; 16], frame: &EncryptedFrame) -> Result<Vec<u8>, FramingError> {
    let cipher = Aes128Gcm12::new(Key::<Aes128Gcm12>::from_slice(key));
    let nonce = frame.nonce();

    /* The AEAD API wants ciphertext and tag in one buffer */
    let mut sealed = Vec::with_capacity(frame.ciphertext.len() + frame.tag.len());
    sealed.extend_from_slice(frame.ciphertext);
    sealed.extend_from_slice(frame.tag);

    match cipher.decrypt(Nonce::from_slice(&nonce), sealed.as_slice()) {
        Ok(plain) => return Ok(plain),
        Err(_) => return Err(FramingError::DecryptionFailed),
    }
}

/* Builds complete frames for the tests in this file and in reader.rs */
#[cfg(test)]
pub(crate) fn encrypt_frame(
    key: &[u8; 16],
    system_title: &[u8; 8],
    frame_counter: &[u8; 4],
    plaintext: &[u8],
) -> Vec<u8> {
    let cipher = Aes128Gcm12::new(Key::<Aes128Gcm12>::from_slice(key));
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(system_title);
    nonce[8..].copy_from_slice(frame_counter);
    let sealed = cipher.encrypt(Nonce::from_slice(&nonce), plaintext).unwrap();

    let len_info = (sealed.len() - GCM_TAG_LEN) as u16;
    let mut frame = Vec::with_capacity(HEADER_LEN + sealed.len());
    frame.push(SYNC_BYTE);
    frame.push(FRAME_TYPE);
    frame.extend_from_slice(system_title);
    frame.push(0x82);
    frame.extend_from_slice(&len_info.to_be_bytes());
    frame.push(0x30);
    frame.extend_from_slice(frame_counter);
    frame.extend_from_slice(&sealed);
    return frame;
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
        0xEE, 0xFF,
    ];
    const SYSTEM_TITLE: [u8; 8] = *b"SAG10102";
    const FRAME_COUNTER: [u8; 4] = [0x10, 0x00, 0x00, 0x01];
    const PLAINTEXT: &[u8] = b"/TST5 telegram\r\n!0000\r\n";

    #[test]
    fn test_parse_splits_header_fields() {
        let frame = encrypt_frame(&KEY, &SYSTEM_TITLE, &FRAME_COUNTER, PLAINTEXT);
        assert_eq!(frame.len(), HEADER_LEN + PLAINTEXT.len() + GCM_TAG_LEN);

        let parsed = EncryptedFrame::parse(&frame).unwrap();
        assert_eq!(parsed.system_title, &SYSTEM_TITLE);
        assert_eq!(parsed.frame_counter, &FRAME_COUNTER);
        assert_eq!(parsed.ciphertext.len(), PLAINTEXT.len());
        assert_eq!(parsed.tag.len(), GCM_TAG_LEN);
    }

    #[test]
    fn test_nonce_is_title_plus_counter() {
        let frame = encrypt_frame(&KEY, &SYSTEM_TITLE, &FRAME_COUNTER, PLAINTEXT);
        let nonce = EncryptedFrame::parse(&frame).unwrap().nonce();
        assert_eq!(&nonce[..8], &SYSTEM_TITLE);
        assert_eq!(&nonce[8..], &FRAME_COUNTER);
    }

    #[test]
    fn test_frame_total_len() {
        let frame = encrypt_frame(&KEY, &SYSTEM_TITLE, &FRAME_COUNTER, PLAINTEXT);
        assert_eq!(frame_total_len(&frame[..MIN_HEADER_LEN]), Ok(frame.len()));
        assert_eq!(frame_total_len(&frame[..5]), Err(FramingError::InvalidFrameHeader));
    }

    #[test]
    fn test_parse_rejects_wrong_marker() {
        let mut frame = encrypt_frame(&KEY, &SYSTEM_TITLE, &FRAME_COUNTER, PLAINTEXT);
        frame[1] = 0x07;
        assert_eq!(EncryptedFrame::parse(&frame), Err(FramingError::InvalidFrameHeader));

        frame[1] = FRAME_TYPE;
        frame[0] = 0xDA;
        assert_eq!(EncryptedFrame::parse(&frame), Err(FramingError::InvalidFrameHeader));
    }

    #[test]
    fn test_parse_rejects_length_mismatch() {
        let frame = encrypt_frame(&KEY, &SYSTEM_TITLE, &FRAME_COUNTER, PLAINTEXT);

        let mut truncated = frame.clone();
        truncated.pop();
        assert_eq!(
            EncryptedFrame::parse(&truncated),
            Err(FramingError::FrameLengthMismatch)
        );

        let mut padded = frame.clone();
        padded.push(0x00);
        assert_eq!(
            EncryptedFrame::parse(&padded),
            Err(FramingError::FrameLengthMismatch)
        );
    }

    #[test]
    fn test_parse_rejects_empty_ciphertext() {
        let mut frame = vec![SYNC_BYTE, FRAME_TYPE];
        frame.extend_from_slice(&SYSTEM_TITLE);
        frame.push(0x82);
        frame.extend_from_slice(&[0x00, 0x00]);
        assert_eq!(EncryptedFrame::parse(&frame), Err(FramingError::EmptyCiphertext));
    }

    #[test]
    fn test_decrypt_round_trip() {
        let frame = encrypt_frame(&KEY, &SYSTEM_TITLE, &FRAME_COUNTER, PLAINTEXT);
        let parsed = EncryptedFrame::parse(&frame).unwrap();
        assert_eq!(decrypt(&KEY, &parsed), Ok(PLAINTEXT.to_vec()));
    }

    #[test]
    fn test_tampering_is_detected() {
        let frame = encrypt_frame(&KEY, &SYSTEM_TITLE, &FRAME_COUNTER, PLAINTEXT);

        let mut flipped_data = frame.clone();
        flipped_data[HEADER_LEN] ^= 0x01;
        let parsed = EncryptedFrame::parse(&flipped_data).unwrap();
        assert_eq!(decrypt(&KEY, &parsed), Err(FramingError::DecryptionFailed));

        let mut flipped_tag = frame.clone();
        let last = flipped_tag.len() - 1;
        flipped_tag[last] ^= 0x01;
        let parsed = EncryptedFrame::parse(&flipped_tag).unwrap();
        assert_eq!(decrypt(&KEY, &parsed), Err(FramingError::DecryptionFailed));
    }

    #[test]
    fn test_wrong_key_is_detected() {
        let frame = encrypt_frame(&KEY, &SYSTEM_TITLE, &FRAME_COUNTER, PLAINTEXT);
        let parsed = EncryptedFrame::parse(&frame).unwrap();

        let mut other_key = KEY;
        other_key[0] ^= 0xFF;
        assert_eq!(decrypt(&other_key, &parsed), Err(FramingError::DecryptionFailed));
    }
}
