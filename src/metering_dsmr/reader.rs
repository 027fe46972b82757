use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::crypto;
use super::crypto::EncryptedFrame;
use super::structs::FramingError;

/// Byte source a reader pulls telegrams from. Besides the byte stream
/// there is an optional request line some meters want asserted before
/// they start sending.
pub trait Transport {
    fn read_byte(&mut self) -> Option<u8>;
    fn available(&self) -> usize;
    /// Asserts or releases the data request line, a no-op unless the
    /// transport has one.
    fn set_request(&mut self, _active: bool) {}
}

/// Transport fed from queued payload chunks, used for meters whose
/// P1 port is forwarded over MQTT.
#[derive(Default)]
pub struct QueueTransport {
    queue: VecDeque<u8>,
}

impl QueueTransport {
    pub fn new() -> Self {
        return QueueTransport {
            queue: VecDeque::new(),
        };
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.queue.extend(data);
    }
}

impl Transport for QueueTransport {
    fn read_byte(&mut self) -> Option<u8> {
        return self.queue.pop_front();
    }

    fn available(&self) -> usize {
        return self.queue.len();
    }
}

/// Limits and timing for one reader.
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    /// Hard cap for one telegram or encrypted frame.
    pub max_telegram_len: usize,
    /// Resets an attempt when the stream stalls this long. Zero
    /// disables the timeout.
    pub receive_timeout: Duration,
    /// Minimum pause between two reception attempts. Zero keeps
    /// reception continuous.
    pub request_interval: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        return ReaderSettings {
            max_telegram_len: 1500,
            receive_timeout: Duration::from_millis(200),
            request_interval: Duration::ZERO,
        };
    }
}

/// Assembles complete telegrams from a byte stream, one reception
/// attempt at a time. With a key configured the stream is expected to
/// carry encrypted DLMS frames and `poll` returns their decrypted
/// plaintext, otherwise plain `/...!XXXX` telegrams are returned as
/// received.
pub struct DsmrReader<T: Transport> {
    transport: T,
    settings: ReaderSettings,
    key: Option<[u8; 16]>,
    buffer: Vec<u8>,
    header_found: bool,
    footer_found: bool,
    frame_total: usize,
    requesting: bool,
    last_request: Option<Instant>,
    last_read: Instant,
}

impl<T: Transport> DsmrReader<T> {
    pub fn new(transport: T, settings: ReaderSettings, key: Option<[u8; 16]>) -> Self {
        return DsmrReader {
            transport,
            settings,
            key,
            buffer: Vec::new(),
            header_found: false,
            footer_found: false,
            frame_total: 0,
            requesting: false,
            last_request: None,
            last_read: Instant::now(),
        };
    }

    pub fn transport_mut(&mut self) -> &mut T {
        return &mut self.transport;
    }

    /// Drains the transport and returns a complete telegram once one
    /// is assembled. `Ok(None)` means reception is still in progress
    /// or currently paused between attempts.
    pub fn poll(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        let now = Instant::now();

        if !self.requesting {
            if let Some(last) = self.last_request {
                if now.duration_since(last) < self.settings.request_interval {
                    /* Between attempts, whatever trickles in is dropped */
                    while self.transport.read_byte().is_some() {}
                    return Ok(None);
                }
            }
            self.start_attempt(now);
        }

        match self.key {
            Some(key) => return self.receive_encrypted(key, now),
            None => return self.receive_plain(now),
        }
    }

    fn start_attempt(&mut self, now: Instant) {
        self.requesting = true;
        self.last_request = Some(now);
        self.last_read = now;
        self.transport.set_request(true);
    }

    fn finish_attempt(&mut self) {
        self.buffer.clear();
        self.header_found = false;
        self.footer_found = false;
        self.frame_total = 0;
        self.requesting = false;
        self.transport.set_request(false);
    }

    fn receive_plain(&mut self, now: Instant) -> Result<Option<Vec<u8>>, FramingError> {
        while let Some(byte) = self.transport.read_byte() {
            self.last_read = now;

            if !self.header_found {
                /* Everything before the start marker is line noise */
                if byte != b'/' {
                    continue;
                }
                self.header_found = true;
                self.buffer.clear();
            }

            if self.footer_found {
                if byte == b'\r' || byte == b'\n' {
                    let telegram = std::mem::take(&mut self.buffer);
                    self.finish_attempt();
                    return Ok(Some(telegram));
                }
            } else if byte == b'(' {
                /* Some meters break the line right before a value group */
                while matches!(self.buffer.last(), Some(b'\r') | Some(b'\n')) {
                    self.buffer.pop();
                }
            }

            if self.buffer.len() >= self.settings.max_telegram_len {
                let max = self.settings.max_telegram_len;
                self.finish_attempt();
                return Err(FramingError::BufferOverflow(max));
            }
            self.buffer.push(byte);

            if byte == b'!' {
                self.footer_found = true;
            }
        }

        return self.check_timeout(now);
    }

    fn receive_encrypted(
        &mut self,
        key: [u8; 16],
        now: Instant,
    ) -> Result<Option<Vec<u8>>, FramingError> {
        while let Some(byte) = self.transport.read_byte() {
            self.last_read = now;

            if !self.header_found {
                if byte != crypto::SYNC_BYTE {
                    continue;
                }
                self.header_found = true;
                self.buffer.clear();
            }
            self.buffer.push(byte);

            /* The total length is known once the header is complete */
            if self.buffer.len() == crypto::MIN_HEADER_LEN {
                let total = match crypto::frame_total_len(&self.buffer) {
                    Ok(total) => total,
                    Err(err) => {
                        self.finish_attempt();
                        return Err(err);
                    }
                };
                if total > self.settings.max_telegram_len {
                    self.finish_attempt();
                    return Err(FramingError::FrameTooLarge(total));
                }
                self.frame_total = total;
            }

            if self.frame_total != 0 && self.buffer.len() == self.frame_total {
                let frame = std::mem::take(&mut self.buffer);
                self.finish_attempt();
                let parsed = EncryptedFrame::parse(&frame)?;
                let plaintext = crypto::decrypt(&key, &parsed)?;
                return Ok(Some(plaintext));
            }
        }

        return self.check_timeout(now);
    }

    fn check_timeout(&mut self, now: Instant) -> Result<Option<Vec<u8>>, FramingError> {
        if self.settings.receive_timeout.is_zero() {
            return Ok(None);
        }

        /* Waiting for the header counts from the request, a stalled
        telegram counts from the last byte read */
        let stalled_since = if self.header_found {
            self.last_read
        } else {
            self.last_request.unwrap_or(now)
        };
        if now.duration_since(stalled_since) > self.settings.receive_timeout {
            self.finish_attempt();
            return Err(FramingError::Timeout);
        }
        return Ok(None);
    }
}
