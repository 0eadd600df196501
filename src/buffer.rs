//! Low-level buffer operations for DNS packet handling
//!
//! Everything on the wire goes through a `PacketBuffer`: a positioned byte
//! cursor with big-endian integer accessors, domain name encoding with
//! RFC 1035 compression pointers, and length-prefixed character strings.
//! `BytePacketBuffer` is the fixed-size datagram buffer used on the receive
//! path; `VectorPacketBuffer` is the growable write buffer that also keeps
//! the name offset table used for compression.

use std::collections::BTreeMap;

use derive_more::{Display, Error};

/// Upper bound on compression pointer jumps while decoding a single name.
/// A conforming message needs far fewer; a crafted pointer cycle needs more.
const MAX_JUMPS: usize = 10;

/// Labels are limited to 63 octets by the wire format (two high bits of the
/// length byte are the pointer flag).
const MAX_LABEL_LEN: usize = 63;

/// A full encoded name, length bytes and terminator included, is limited to
/// 255 octets.
const MAX_NAME_LEN: usize = 255;

/// Compression pointers carry a 14 bit offset, so only names starting within
/// the first 0x3FFF octets can be referenced.
const MAX_POINTER_OFFSET: usize = 0x3FFF;

#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[display(fmt = "unexpected end of stream")]
    UnexpectedEndOfStream,
    #[display(fmt = "compression pointer loop")]
    CompressionLoop,
    #[display(fmt = "label exceeds 63 octets")]
    LabelTooLong,
    #[display(fmt = "name exceeds 255 octets")]
    NameTooLong,
    #[display(fmt = "character string exceeds 255 bytes")]
    StringTooLong,
    #[display(fmt = "non-ascii byte in ascii string")]
    InvalidCharacter,
    #[display(fmt = "buffer access out of bounds")]
    InvalidBufferAccess,
}

type Result<T> = std::result::Result<T, BufferError>;

/// Common interface for the byte buffers DNS packets are read from and
/// written to. Integer accessors are big-endian; name and character string
/// handling is layered on top of the primitive byte operations.
pub trait PacketBuffer {
    fn read(&mut self) -> Result<u8>;
    fn get(&mut self, pos: usize) -> Result<u8>;
    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]>;
    fn write(&mut self, val: u8) -> Result<()>;
    fn set(&mut self, pos: usize, val: u8) -> Result<()>;
    fn pos(&self) -> usize;
    fn seek(&mut self, pos: usize) -> Result<()>;
    fn step(&mut self, steps: usize) -> Result<()>;

    /// Look up the offset of a previously written name suffix. Buffers that
    /// don't support compression return `None` for everything.
    fn find_label(&self, label: &str) -> Option<usize>;

    /// Record the offset of a name suffix for later compression.
    fn save_label(&mut self, label: &str, pos: usize);

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.write(val)
    }

    fn write_u16(&mut self, val: u16) -> Result<()> {
        self.write((val >> 8) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn write_u32(&mut self, val: u32) -> Result<()> {
        self.write(((val >> 24) & 0xFF) as u8)?;
        self.write(((val >> 16) & 0xFF) as u8)?;
        self.write(((val >> 8) & 0xFF) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn set_u16(&mut self, pos: usize, val: u16) -> Result<()> {
        self.set(pos, (val >> 8) as u8)?;
        self.set(pos + 1, (val & 0xFF) as u8)?;

        Ok(())
    }

    fn read_u16(&mut self) -> Result<u16> {
        let res = ((self.read()? as u16) << 8) | (self.read()? as u16);

        Ok(res)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let res = ((self.read()? as u32) << 24)
            | ((self.read()? as u32) << 16)
            | ((self.read()? as u32) << 8)
            | (self.read()? as u32);

        Ok(res)
    }

    /// Read a domain name, following compression pointers where present.
    ///
    /// The cursor ends up just past the name as it appears at the current
    /// position; jumps taken while chasing pointers never move it further.
    fn read_qname(&mut self, outstr: &mut String) -> Result<()> {
        let mut pos = self.pos();
        let mut jumped = false;
        let mut jumps = 0;

        // Octets the name would occupy in uncompressed form, terminator
        // included. Bounded by MAX_NAME_LEN regardless of pointer tricks.
        let mut encoded_len = 1;

        let mut delim = "";
        loop {
            let len_byte = self.get(pos)?;

            if (len_byte & 0xC0) == 0xC0 {
                jumps += 1;
                if jumps > MAX_JUMPS {
                    return Err(BufferError::CompressionLoop);
                }

                // The cursor belongs just past the two pointer bytes; only
                // the first pointer in a chain determines it.
                if !jumped {
                    self.seek(pos + 2)?;
                    jumped = true;
                }

                let second = self.get(pos + 1)? as usize;
                pos = (((len_byte as usize) ^ 0xC0) << 8) | second;
                continue;
            }

            pos += 1;

            if len_byte == 0 {
                break;
            }

            let len = len_byte as usize;
            if len > MAX_LABEL_LEN {
                return Err(BufferError::LabelTooLong);
            }

            encoded_len += len + 1;
            if encoded_len > MAX_NAME_LEN {
                return Err(BufferError::NameTooLong);
            }

            outstr.push_str(delim);
            let label = self.get_range(pos, len)?;
            outstr.push_str(&String::from_utf8_lossy(label));
            delim = ".";

            pos += len;
        }

        if !jumped {
            self.seek(pos)?;
        }

        Ok(())
    }

    /// Write a domain name, compressing against previously written suffixes
    /// when the buffer keeps an offset table.
    ///
    /// Empty labels are skipped, which tolerates a trailing dot; the root
    /// name serializes to a single zero byte.
    fn write_qname(&mut self, qname: &str) -> Result<()> {
        let labels: Vec<&str> = qname.split('.').filter(|label| !label.is_empty()).collect();

        let mut encoded_len = 1;
        for (i, label) in labels.iter().enumerate() {
            let suffix = labels[i..].join(".");
            if let Some(prev) = self.find_label(&suffix) {
                if prev <= MAX_POINTER_OFFSET {
                    let pointer = (prev as u16) | 0xC000;
                    self.write_u16(pointer)?;
                    return Ok(());
                }
            }

            if label.len() > MAX_LABEL_LEN {
                return Err(BufferError::LabelTooLong);
            }

            encoded_len += label.len() + 1;
            if encoded_len > MAX_NAME_LEN {
                return Err(BufferError::NameTooLong);
            }

            let pos = self.pos();
            self.save_label(&suffix, pos);

            self.write_u8(label.len() as u8)?;
            for &b in label.as_bytes() {
                self.write_u8(b)?;
            }
        }

        self.write_u8(0)?;

        Ok(())
    }

    /// Read a length-prefixed character string, as used in TXT records.
    fn read_character_string(&mut self) -> Result<String> {
        let len = self.read()? as usize;
        let start = self.pos();

        let data = self.get_range(start, len)?;
        let result = String::from_utf8_lossy(data).into_owned();

        self.step(len)?;

        Ok(result)
    }

    /// Write a length-prefixed character string; the payload is limited to
    /// 255 bytes of UTF-8.
    fn write_character_string(&mut self, s: &str) -> Result<()> {
        let bytes = s.as_bytes();
        if bytes.len() > 255 {
            return Err(BufferError::StringTooLong);
        }

        self.write_u8(bytes.len() as u8)?;
        for &b in bytes {
            self.write_u8(b)?;
        }

        Ok(())
    }

    /// Write a length-prefixed character string, restricted to 7-bit ascii.
    fn write_ascii_string(&mut self, s: &str) -> Result<()> {
        if s.bytes().any(|b| b > 127) {
            return Err(BufferError::InvalidCharacter);
        }

        self.write_character_string(s)
    }
}

/// Fixed-size buffer sized for a single UDP datagram. `len` tracks how many
/// octets actually arrived, so reads past the end of a short datagram fail
/// instead of seeing stale zero padding.
pub struct BytePacketBuffer {
    pub buf: [u8; 512],
    pub pos: usize,
    pub len: usize,
}

impl BytePacketBuffer {
    pub fn new() -> BytePacketBuffer {
        BytePacketBuffer {
            buf: [0; 512],
            pos: 0,
            len: 512,
        }
    }
}

impl Default for BytePacketBuffer {
    fn default() -> Self {
        BytePacketBuffer::new()
    }
}

impl PacketBuffer for BytePacketBuffer {
    fn read(&mut self) -> Result<u8> {
        if self.pos >= self.len {
            return Err(BufferError::UnexpectedEndOfStream);
        }

        let res = self.buf[self.pos];
        self.pos += 1;

        Ok(res)
    }

    fn get(&mut self, pos: usize) -> Result<u8> {
        if pos >= self.len {
            return Err(BufferError::UnexpectedEndOfStream);
        }

        Ok(self.buf[pos])
    }

    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]> {
        if start + len > self.len {
            return Err(BufferError::UnexpectedEndOfStream);
        }

        Ok(&self.buf[start..start + len])
    }

    fn write(&mut self, val: u8) -> Result<()> {
        if self.pos >= self.buf.len() {
            return Err(BufferError::InvalidBufferAccess);
        }

        self.buf[self.pos] = val;
        self.pos += 1;

        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        if pos >= self.buf.len() {
            return Err(BufferError::InvalidBufferAccess);
        }

        self.buf[pos] = val;

        Ok(())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.len {
            return Err(BufferError::UnexpectedEndOfStream);
        }

        self.pos = pos;

        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        self.seek(self.pos + steps)
    }

    fn find_label(&self, _label: &str) -> Option<usize> {
        None
    }

    fn save_label(&mut self, _label: &str, _pos: usize) {}
}

/// Growable write buffer with a name offset table, so every name written
/// through the lifetime of one buffer can be compressed against the names
/// that came before it.
#[derive(Default)]
pub struct VectorPacketBuffer {
    pub buffer: Vec<u8>,
    pub pos: usize,
    label_lookup: BTreeMap<String, usize>,
}

impl VectorPacketBuffer {
    pub fn new() -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: Vec::new(),
            pos: 0,
            label_lookup: BTreeMap::new(),
        }
    }
}

impl PacketBuffer for VectorPacketBuffer {
    fn read(&mut self) -> Result<u8> {
        if self.pos >= self.buffer.len() {
            return Err(BufferError::UnexpectedEndOfStream);
        }

        let res = self.buffer[self.pos];
        self.pos += 1;

        Ok(res)
    }

    fn get(&mut self, pos: usize) -> Result<u8> {
        if pos >= self.buffer.len() {
            return Err(BufferError::UnexpectedEndOfStream);
        }

        Ok(self.buffer[pos])
    }

    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]> {
        if start + len > self.buffer.len() {
            return Err(BufferError::UnexpectedEndOfStream);
        }

        Ok(&self.buffer[start..start + len])
    }

    fn write(&mut self, val: u8) -> Result<()> {
        self.buffer.push(val);
        self.pos += 1;

        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        if pos >= self.buffer.len() {
            return Err(BufferError::InvalidBufferAccess);
        }

        self.buffer[pos] = val;

        Ok(())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buffer.len() {
            return Err(BufferError::UnexpectedEndOfStream);
        }

        self.pos = pos;

        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        self.seek(self.pos + steps)
    }

    fn find_label(&self, label: &str) -> Option<usize> {
        self.label_lookup.get(label).cloned()
    }

    fn save_label(&mut self, label: &str, pos: usize) {
        // Keep the earliest occurrence; later duplicates point back at it.
        self.label_lookup.entry(label.to_string()).or_insert(pos);
    }
}
