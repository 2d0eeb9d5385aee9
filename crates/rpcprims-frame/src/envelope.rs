use bytes::{Buf, BufMut, BytesMut};
use rpcprims_transport::Crc16;

use crate::error::{FrameError, Result};

/// Envelope header: three size copies (2 each) + CRC (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest payload a 16-bit size field can describe.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Framed envelope header.
///
/// Wire format, all fields little-endian:
/// ```text
/// ┌──────────┬──────────┬──────────┬──────────┬──────────────────┐
/// │ Size     │ Size     │ Size     │ CRC-16   │ Payload          │
/// │ (2B)     │ (2B)     │ (2B)     │ (2B)     │ (Size bytes)     │
/// └──────────┴──────────┴──────────┴──────────┴──────────────────┘
/// ```
/// The CRC covers the payload only. The header is protected by the
/// redundant size copies instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sizes: [u16; 3],
    pub crc: u16,
}

impl FrameHeader {
    pub fn new(size: u16, crc: u16) -> Self {
        Self {
            sizes: [size; 3],
            crc,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        let mut dst = &mut raw[..];
        for size in self.sizes {
            dst.put_u16_le(size);
        }
        dst.put_u16_le(self.crc);
        raw
    }

    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Self {
        let mut src = &raw[..];
        let sizes = [src.get_u16_le(), src.get_u16_le(), src.get_u16_le()];
        Self {
            sizes,
            crc: src.get_u16_le(),
        }
    }

    /// The size at least two copies agree on.
    pub fn message_size(&self) -> Option<u16> {
        let [a, b, c] = self.sizes;
        if a == b || a == c {
            Some(a)
        } else if b == c {
            Some(b)
        } else {
            None
        }
    }
}

/// Append a complete envelope around `payload` to `dst`.
pub fn encode_frame(payload: &[u8], crc: &Crc16, dst: &mut BytesMut) -> Result<()> {
    let size = u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: MAX_MESSAGE_SIZE,
    })?;
    let header = FrameHeader::new(size, crc.compute(payload));
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&header.encode());
    dst.put_slice(payload);
    Ok(())
}

/// What an envelope on the wire says about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub header: FrameHeader,
    /// Majority size.
    pub size: u16,
    /// CRC computed over the declared payload.
    pub computed_crc: u16,
    /// Bytes after the declared payload.
    pub trailing: usize,
}

impl FrameReport {
    pub fn crc_ok(&self) -> bool {
        self.computed_crc == self.header.crc
    }

    /// Whether every size copy agrees.
    pub fn unanimous(&self) -> bool {
        self.header.sizes.iter().all(|&size| size == self.size)
    }
}

/// Parse and check one envelope at the start of `wire`.
pub fn inspect_frame(wire: &[u8], crc: &Crc16) -> Result<FrameReport> {
    let Some(raw) = wire.first_chunk::<HEADER_SIZE>() else {
        return Err(FrameError::Truncated {
            len: wire.len(),
            need: HEADER_SIZE,
        });
    };
    let header = FrameHeader::decode(raw);
    let size = header
        .message_size()
        .ok_or(FrameError::SizeDisagreement {
            sizes: header.sizes,
        })?;
    if size == 0 {
        return Err(FrameError::EmptyFrame);
    }
    let end = HEADER_SIZE + usize::from(size);
    let Some(payload) = wire.get(HEADER_SIZE..end) else {
        return Err(FrameError::Truncated {
            len: wire.len(),
            need: end,
        });
    };
    Ok(FrameReport {
        header,
        size,
        computed_crc: crc.compute(payload),
        trailing: wire.len() - end,
    })
}
