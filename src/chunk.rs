//! Stateless big-endian accessors and CRC32 over PNG chunk records.
//!
//! A chunk is a length-prefixed, typed, CRC-suffixed record. The reader
//! walks records in place without copying; the writer assembles standalone
//! streams when the compositor reconstructs a single-frame image.

/// The fixed 8-byte PNG signature.
pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

pub type ChunkType = [u8; 4];

pub const IHDR: ChunkType = *b"IHDR";
pub const ACTL: ChunkType = *b"acTL";
pub const FCTL: ChunkType = *b"fcTL";
pub const IDAT: ChunkType = *b"IDAT";
pub const FDAT: ChunkType = *b"fdAT";
pub const IEND: ChunkType = *b"IEND";

const fn make_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xedb8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = make_crc_table();

/// CRC32 (reflected polynomial 0xEDB88320) over a list of byte slices,
/// initial value all-ones, final value complemented.
pub fn crc32(parts: &[&[u8]]) -> u32 {
    let mut c = 0xffff_ffffu32;
    for part in parts {
        for &b in *part {
            c = CRC_TABLE[((c ^ b as u32) & 0xff) as usize] ^ (c >> 8);
        }
    }
    !c
}

/// One record lifted out of the buffer by [`ChunkReader::next_chunk`].
#[derive(Clone, Copy)]
pub struct RawChunk<'a> {
    pub ty: ChunkType,
    /// Payload bytes, between the type and the CRC.
    pub data: &'a [u8],
    /// The whole record including length, type and CRC, preserved verbatim.
    pub raw: &'a [u8],
    pub crc: u32,
}

impl RawChunk<'_> {
    /// Recomputes the CRC over type + data and compares to the stored value.
    pub fn crc_ok(&self) -> bool {
        crc32(&[&self.ty, self.data]) == self.crc
    }
}

/// Cursor over a byte buffer with big-endian reads.
pub struct ChunkReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.read_bytes(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_bytes(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads the next length-prefixed, typed, CRC-suffixed record.
    ///
    /// Returns `None` at end of buffer or when the declared length runs
    /// past it (a truncated trailing record).
    pub fn next_chunk(&mut self) -> Option<RawChunk<'a>> {
        let start = self.pos;
        let len = self.read_u32()? as usize;
        let ty_bytes = self.read_bytes(4)?;
        let ty = [ty_bytes[0], ty_bytes[1], ty_bytes[2], ty_bytes[3]];
        let data = self.read_bytes(len)?;
        let crc = self.read_u32()?;
        Some(RawChunk {
            ty,
            data,
            raw: &self.buf[start..self.pos],
            crc,
        })
    }
}

/// Assembles chunk streams with computed CRCs.
pub struct ChunkWriter {
    out: Vec<u8>,
}

impl ChunkWriter {
    pub fn new() -> Self {
        Self { out: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            out: Vec::with_capacity(cap),
        }
    }

    pub fn signature(&mut self) {
        self.out.extend_from_slice(&SIGNATURE);
    }

    pub fn chunk(&mut self, ty: ChunkType, data: &[u8]) {
        self.out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.out.extend_from_slice(&ty);
        self.out.extend_from_slice(data);
        self.out.extend_from_slice(&crc32(&[&ty, data]).to_be_bytes());
    }

    /// Copies an already-encoded record verbatim.
    pub fn raw(&mut self, record: &[u8]) {
        self.out.extend_from_slice(record);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}

impl Default for ChunkWriter {
    fn default() -> Self {
        Self::new()
    }
}
