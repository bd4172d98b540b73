use crate::error::{PeerError, PeerResult};

/// A cursor over a borrowed byte slice with the fixed-width readers the
/// wire format needs. Every read is checked against the remaining length;
/// running out of bytes yields [`PeerError::Truncated`] rather than panicking.
pub struct ByteBufferParser<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> ByteBufferParser<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        ByteBufferParser { buffer, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }

    pub fn skip_bytes(&mut self, count: usize) -> PeerResult<()> {
        self.eof_check(count)?;
        self.pos += count;
        Ok(())
    }

    pub fn read(&mut self, size: usize) -> PeerResult<&'a [u8]> {
        self.eof_check(size)?;
        let range = self.pos..self.pos + size;
        self.pos += size;
        Ok(&self.buffer[range])
    }

    pub fn read_u8(&mut self) -> PeerResult<u8> {
        Ok(self.read(1)?[0])
    }

    pub fn read_u16_be(&mut self) -> PeerResult<u16> {
        Ok(u16::from_be_bytes(self.read(2)?.try_into().unwrap()))
    }

    pub fn read_u32_le(&mut self) -> PeerResult<u32> {
        Ok(u32::from_le_bytes(self.read(4)?.try_into().unwrap()))
    }

    pub fn read_i32_le(&mut self) -> PeerResult<i32> {
        Ok(i32::from_le_bytes(self.read(4)?.try_into().unwrap()))
    }

    pub fn read_u64_le(&mut self) -> PeerResult<u64> {
        Ok(u64::from_le_bytes(self.read(8)?.try_into().unwrap()))
    }

    pub fn read_i64_le(&mut self) -> PeerResult<i64> {
        Ok(i64::from_le_bytes(self.read(8)?.try_into().unwrap()))
    }

    /// varint(len) || bytes, decoded as a UTF-8 string.
    pub fn read_var_str(&mut self) -> PeerResult<String> {
        let (len, consumed) = crate::wire_protocol::varint::decode(&self.buffer[self.pos..])?;
        self.pos += consumed;
        let bytes = self.read(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| PeerError::Malformed(format!("varstr is not utf8: {}", e)))
    }

    fn eof_check(&self, want_bytes: usize) -> PeerResult<()> {
        if self.remaining() < want_bytes {
            Err(PeerError::Truncated)
        } else {
            Ok(())
        }
    }
}

/// Append-only byte composer used by every message builder.
#[derive(Default)]
pub struct ByteBufferComposer {
    buffer: Vec<u8>,
}

impl ByteBufferComposer {
    pub fn new() -> Self {
        ByteBufferComposer { buffer: vec![] }
    }

    pub fn result(self) -> Vec<u8> {
        self.buffer
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn append_var_str(&mut self, s: &str) {
        self.append(&crate::wire_protocol::varint::encode(s.len() as u64));
        self.append(s.as_bytes());
    }
}

/// A growable byte buffer that accumulates network reads at its tail and
/// sheds complete frames from its head. This is the "Parser buffer" of the
/// spec: after an incomplete parse its contents are unchanged; after a
/// complete parse exactly one frame's bytes are removed from the front.
#[derive(Default)]
pub struct IOBuffer {
    buffer: Vec<u8>,
}

impl IOBuffer {
    pub fn new() -> Self {
        IOBuffer { buffer: Vec::new() }
    }

    pub fn content(&self) -> &[u8] {
        &self.buffer
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Removes `size` bytes from the front of the buffer.
    pub fn consume(&mut self, size: usize) {
        assert!(size <= self.buffer.len());
        self.buffer.drain(..size);
    }
}
