use std::ops::Range;

use bytes::{Buf, BufMut};
use tracing::debug;

use crate::buffer::MessageBuffer;
use crate::error::{Result, RpcError};
use crate::header::{
    Hash, MessageHeader, MessageType, CODEC_VERSION, FAST_ONEWAY_BIT, FAST_SERVICE_MASK,
};

/// Null flag byte for a present value.
pub const NOT_NULL: u8 = 0;

/// Null flag byte for an absent value.
pub const IS_NULL: u8 = 1;

const PTR_WIDTH: usize = std::mem::size_of::<usize>();

/// A fixed-width value with a little-endian wire form.
pub trait WireValue: Sized + Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    fn encode<B: BufMut>(self, dst: &mut B);

    fn decode<B: Buf>(src: &mut B) -> Self;
}

macro_rules! wire_value {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl WireValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode<B: BufMut>(self, dst: &mut B) {
                    dst.$put(self);
                }

                fn decode<B: Buf>(src: &mut B) -> Self {
                    src.$get()
                }
            }
        )*
    };
}

wire_value! {
    u8 => put_u8, get_u8;
    i8 => put_i8, get_i8;
    u16 => put_u16_le, get_u16_le;
    i16 => put_i16_le, get_i16_le;
    u32 => put_u32_le, get_u32_le;
    i32 => put_i32_le, get_i32_le;
    u64 => put_u64_le, get_u64_le;
    i64 => put_i64_le, get_i64_le;
    f32 => put_f32_le, get_f32_le;
    f64 => put_f64_le, get_f64_le;
}

impl WireValue for bool {
    const SIZE: usize = 1;

    fn encode<B: BufMut>(self, dst: &mut B) {
        dst.put_u8(u8::from(self));
    }

    fn decode<B: Buf>(src: &mut B) -> Self {
        src.get_u8() != 0
    }
}

/// Serializes values into, and deserializes them out of, one bound buffer.
///
/// The codec never panics on bad input. The first failure is recorded as a
/// sticky status and every later read or write becomes a no-op; reads report
/// that first error. A codec serves one encode or one decode pass per message.
pub struct Codec {
    buffer: Option<MessageBuffer>,
    pos: usize,
    status: Option<RpcError>,
    fast: bool,
    oneway: bool,
    skip_crc: bool,
    slot: Option<usize>,
}

impl Codec {
    /// Create a standalone codec with no buffer bound.
    pub fn new() -> Self {
        Self {
            buffer: None,
            pos: 0,
            status: None,
            fast: false,
            oneway: false,
            skip_crc: false,
            slot: None,
        }
    }

    /// Create a codec bound to `buffer`.
    pub fn with_buffer(buffer: MessageBuffer) -> Self {
        let mut codec = Self::new();
        codec.buffer = Some(buffer);
        codec
    }

    pub(crate) fn pooled(slot: usize) -> Self {
        Self {
            slot: Some(slot),
            ..Self::new()
        }
    }

    pub(crate) fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// Bind `buffer`, rewinding the cursor and clearing the status.
    ///
    /// Returns the previously bound buffer, which the caller must dispose.
    pub fn set_buffer(&mut self, buffer: MessageBuffer) -> Option<MessageBuffer> {
        let previous = self.buffer.replace(buffer);
        self.reset();
        previous
    }

    /// Unbind and return the buffer.
    pub fn take_buffer(&mut self) -> Option<MessageBuffer> {
        self.pos = 0;
        self.buffer.take()
    }

    pub fn buffer(&self) -> Option<&MessageBuffer> {
        self.buffer.as_ref()
    }

    pub fn buffer_mut(&mut self) -> Option<&mut MessageBuffer> {
        self.buffer.as_mut()
    }

    /// Rewind the cursor to the start of the bound buffer and clear the status.
    ///
    /// The used length is kept, so received data can be decoded again.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.status = None;
    }

    /// Rewind for a fresh write pass, discarding the buffer contents.
    pub fn clear(&mut self) {
        self.reset();
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.clear();
        }
    }

    /// Cursor offset into the bound buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read before the used length.
    pub fn remaining(&self) -> usize {
        self.buffer
            .as_ref()
            .map_or(0, |buffer| buffer.used().saturating_sub(self.pos))
    }

    /// The sticky status: `Ok` until the first failure.
    pub fn status(&self) -> Result<()> {
        match self.status {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    pub fn is_status_ok(&self) -> bool {
        self.status.is_none()
    }

    /// Record `err` unless an earlier failure is already recorded.
    pub fn update_status(&mut self, err: RpcError) {
        if self.status.is_none() {
            debug!(?err, pos = self.pos, "codec status set");
            self.status = Some(err);
        }
    }

    /// Whether the compact fast header is used.
    pub fn is_fast(&self) -> bool {
        self.fast
    }

    pub fn set_fast(&mut self, fast: bool) {
        self.fast = fast;
    }

    /// Whether the message in flight expects no reply.
    pub fn is_oneway(&self) -> bool {
        self.oneway
    }

    pub fn set_oneway(&mut self, oneway: bool) {
        self.oneway = oneway;
    }

    /// Whether receivers should skip CRC verification for this codec's messages.
    pub fn skip_crc(&self) -> bool {
        self.skip_crc
    }

    pub fn set_skip_crc(&mut self, skip_crc: bool) {
        self.skip_crc = skip_crc;
    }

    // ---- message header -------------------------------------------------

    /// Write the message header for the configured mode.
    pub fn start_write_message(&mut self, header: &MessageHeader) {
        if self.fast {
            let mut byte = (header.service & u32::from(FAST_SERVICE_MASK)) as u8;
            let oneway = self.oneway
                || matches!(
                    header.msg_type,
                    MessageType::Oneway | MessageType::FastOneway
                );
            if oneway {
                byte |= FAST_ONEWAY_BIT;
            }
            self.write(byte);
        } else {
            self.write(CODEC_VERSION);
            self.write((header.service & 0xFF) as u8);
            self.write(header.request.value());
            self.write(header.msg_type as u8);
            self.write(header.sequence);
        }
    }

    /// Read the message header for the configured mode.
    ///
    /// Fast headers carry neither request hash nor sequence; both read as zero.
    pub fn start_read_message(&mut self) -> Result<MessageHeader> {
        if self.fast {
            let byte = self.read::<u8>()?;
            let msg_type = if byte & FAST_ONEWAY_BIT != 0 {
                MessageType::FastOneway
            } else {
                MessageType::Fast
            };
            let service = u32::from(byte & FAST_SERVICE_MASK);
            return Ok(MessageHeader::new(msg_type, service, Hash::ZERO, 0));
        }

        let version = self.read::<u8>()?;
        if version != CODEC_VERSION {
            return Err(self.fail(RpcError::InvalidMessageVersion));
        }
        let service = u32::from(self.read::<u8>()?);
        let request = Hash(self.read::<u32>()?);
        let raw_type = self.read::<u8>()?;
        let msg_type = match MessageType::try_from(raw_type) {
            Ok(msg_type) => msg_type,
            Err(err) => return Err(self.fail(err)),
        };
        let sequence = self.read::<u32>()?;
        Ok(MessageHeader::new(msg_type, service, request, sequence))
    }

    // ---- primitives -----------------------------------------------------

    /// Append a fixed-width value.
    pub fn write<T: WireValue>(&mut self, value: T) {
        if let Some(mut dst) = self.write_slot(T::SIZE) {
            value.encode(&mut dst);
        }
    }

    /// Read a fixed-width value.
    pub fn read<T: WireValue>(&mut self) -> Result<T> {
        let mut src = self.read_slot(T::SIZE)?;
        Ok(T::decode(&mut src))
    }

    /// Write a pointer-sized value prefixed by the local pointer width.
    pub fn write_ptr(&mut self, value: usize) {
        self.write(PTR_WIDTH as u8);
        if let Some(dst) = self.write_slot(PTR_WIDTH) {
            dst.copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Read a width-prefixed pointer value.
    ///
    /// A width wider than the local pointer is [`RpcError::BadAddressScale`].
    pub fn read_ptr(&mut self) -> Result<usize> {
        let width = usize::from(self.read::<u8>()?);
        if width > PTR_WIDTH {
            return Err(self.fail(RpcError::BadAddressScale));
        }
        let src = self.read_slot(width)?;
        let mut bytes = [0u8; PTR_WIDTH];
        bytes[..width].copy_from_slice(src);
        Ok(usize::from_le_bytes(bytes))
    }

    // ---- strings and blobs ----------------------------------------------

    /// Write a u32 length followed by the raw bytes.
    pub fn write_binary(&mut self, data: &[u8]) {
        let Ok(len) = u32::try_from(data.len()) else {
            self.fail(RpcError::BufferOverrun);
            return;
        };
        self.write(len);
        if let Some(dst) = self.write_slot(data.len()) {
            dst.copy_from_slice(data);
        }
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_binary(value.as_bytes());
    }

    /// Read a length-prefixed blob as a view into the bound buffer.
    pub fn read_binary(&mut self) -> Result<&[u8]> {
        let len = self.read::<u32>()? as usize;
        self.read_slot(len)
    }

    /// Read a length-prefixed UTF-8 string as a view into the bound buffer.
    pub fn read_string(&mut self) -> Result<&str> {
        let len = self.read::<u32>()? as usize;
        let range = self.read_range(len)?;
        // Split borrows: the text views `buffer` while a failure records `status`.
        let Self { buffer, status, .. } = self;
        let bytes = match buffer {
            Some(buffer) => &buffer.as_slice()[range],
            None => return Err(RpcError::MemoryError),
        };
        std::str::from_utf8(bytes).map_err(|_| *status.get_or_insert(RpcError::Fail))
    }

    // ---- lists, unions, null flags ----------------------------------------

    pub fn start_write_list(&mut self, length: u32) {
        self.write(length);
    }

    pub fn start_read_list(&mut self) -> Result<u32> {
        self.read::<u32>()
    }

    pub fn start_write_union(&mut self, discriminator: i32) {
        self.write(discriminator);
    }

    pub fn start_read_union(&mut self) -> Result<i32> {
        self.read::<i32>()
    }

    pub fn write_null_flag(&mut self, is_null: bool) {
        self.write(if is_null { IS_NULL } else { NOT_NULL });
    }

    /// Read a null flag. Only [`IS_NULL`] reads as null; any other byte is
    /// treated as a present value.
    pub fn read_null_flag(&mut self) -> Result<bool> {
        Ok(self.read::<u8>()? == IS_NULL)
    }

    // ---- callbacks --------------------------------------------------------

    /// Write the index of `callback` within `table`.
    ///
    /// A one-entry table is a single callback and writes nothing.
    pub fn write_callback<F: PartialEq>(&mut self, table: &[F], callback: &F) {
        if let [only] = table {
            self.write_single_callback(only, callback);
            return;
        }
        let index = table
            .iter()
            .position(|candidate| candidate == callback)
            .and_then(|index| u8::try_from(index).ok());
        match index {
            Some(index) => self.write(index),
            None => {
                self.fail(RpcError::UnknownCallback);
            }
        }
    }

    /// Read a callback index and resolve it against `table`.
    pub fn read_callback<'t, F>(&mut self, table: &'t [F]) -> Result<&'t F> {
        if let [only] = table {
            self.status()?;
            return Ok(self.read_single_callback(only));
        }
        let index = usize::from(self.read::<u8>()?);
        match table.get(index) {
            Some(callback) => Ok(callback),
            None => Err(self.fail(RpcError::UnknownCallback)),
        }
    }

    /// Check a callback against the only legal candidate; nothing is written.
    pub fn write_single_callback<F: PartialEq>(&mut self, only: &F, callback: &F) {
        if only != callback {
            self.fail(RpcError::UnknownCallback);
        }
    }

    /// Resolve the only legal callback; nothing is read.
    pub fn read_single_callback<'t, F>(&self, only: &'t F) -> &'t F {
        only
    }

    // ---- cursor internals -------------------------------------------------

    fn fail(&mut self, err: RpcError) -> RpcError {
        self.update_status(err);
        self.status.unwrap_or(err)
    }

    fn write_slot(&mut self, len: usize) -> Option<&mut [u8]> {
        if self.status.is_some() {
            return None;
        }
        let start = self.pos;
        let check = match self.buffer.as_ref() {
            None => Err(RpcError::MemoryError),
            Some(buffer) if len > buffer.capacity().saturating_sub(start) => {
                Err(RpcError::BufferOverrun)
            }
            Some(_) => Ok(()),
        };
        if let Err(err) = check {
            self.fail(err);
            return None;
        }
        let end = start + len;
        self.pos = end;
        let buffer = self.buffer.as_mut()?;
        buffer.extend_used(end);
        Some(&mut buffer.storage_mut()[start..end])
    }

    fn read_range(&mut self, len: usize) -> Result<Range<usize>> {
        self.status()?;
        let start = self.pos;
        let check = match self.buffer.as_ref() {
            None => Err(RpcError::MemoryError),
            Some(buffer) if len > buffer.used().saturating_sub(start) => {
                Err(RpcError::BufferOverrun)
            }
            Some(_) => Ok(()),
        };
        if let Err(err) = check {
            return Err(self.fail(err));
        }
        self.pos = start + len;
        Ok(start..start + len)
    }

    fn read_slot(&mut self, len: usize) -> Result<&[u8]> {
        let range = self.read_range(len)?;
        let buffer = self.buffer.as_ref().ok_or(RpcError::MemoryError)?;
        Ok(&buffer.as_slice()[range])
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("buffer", &self.buffer)
            .field("pos", &self.pos)
            .field("status", &self.status)
            .field("fast", &self.fast)
            .field("oneway", &self.oneway)
            .field("skip_crc", &self.skip_crc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{BASIC_HEADER_SIZE, FAST_HEADER_SIZE};

    fn codec(capacity: usize) -> Codec {
        Codec::with_buffer(MessageBuffer::new(capacity))
    }

    fn rewind(codec: &mut Codec) {
        codec.reset();
    }

    #[test]
    fn primitives_are_little_endian() {
        let mut c = codec(16);
        c.write(0x0102_0304u32);
        c.write(-2i16);
        c.write(true);
        assert_eq!(
            c.buffer().unwrap().as_slice(),
            &[0x04, 0x03, 0x02, 0x01, 0xFE, 0xFF, 0x01]
        );
    }

    #[test]
    fn mixed_values_roundtrip() {
        let mut c = codec(64);
        c.write(u64::MAX);
        c.write(i8::MIN);
        c.write(f32::INFINITY);
        c.write(-0.5f64);
        c.write(false);
        rewind(&mut c);
        assert_eq!(c.read::<u64>(), Ok(u64::MAX));
        assert_eq!(c.read::<i8>(), Ok(i8::MIN));
        assert_eq!(c.read::<f32>(), Ok(f32::INFINITY));
        assert_eq!(c.read::<f64>(), Ok(-0.5));
        assert_eq!(c.read::<bool>(), Ok(false));
        assert_eq!(c.remaining(), 0);
    }

    #[test]
    fn float_specials_keep_their_bits() {
        let singles = [f32::NAN, f32::NEG_INFINITY, f32::MIN, f32::MAX, -0.0];
        let doubles = [
            f64::from_bits(0x7FF8_0000_0000_0001),
            f64::NAN,
            f64::NEG_INFINITY,
            f64::MIN,
            f64::MAX,
        ];
        let mut c = codec(64);
        for v in singles {
            c.write(v);
        }
        for v in doubles {
            c.write(v);
        }
        rewind(&mut c);
        for v in singles {
            assert_eq!(c.read::<f32>().map(f32::to_bits), Ok(v.to_bits()));
        }
        for v in doubles {
            assert_eq!(c.read::<f64>().map(f64::to_bits), Ok(v.to_bits()));
        }
    }

    #[test]
    fn bool_reads_any_nonzero_as_true() {
        let mut buffer = MessageBuffer::new(1);
        buffer.fill_from(&[0x7F]).unwrap();
        let mut c = Codec::with_buffer(buffer);
        assert_eq!(c.read::<bool>(), Ok(true));
    }

    #[test]
    fn write_past_capacity_is_buffer_overrun() {
        let mut c = codec(3);
        c.write(7u32);
        assert_eq!(c.status(), Err(RpcError::BufferOverrun));
        assert_eq!(c.buffer().unwrap().used(), 0);
    }

    #[test]
    fn read_past_used_is_buffer_overrun() {
        let mut c = codec(16);
        c.write(1u16);
        rewind(&mut c);
        assert_eq!(c.read::<u32>(), Err(RpcError::BufferOverrun));
    }

    #[test]
    fn unbound_codec_reports_memory_error() {
        let mut c = Codec::new();
        c.write(1u8);
        assert_eq!(c.status(), Err(RpcError::MemoryError));
    }

    #[test]
    fn sticky_status_keeps_first_error() {
        let mut c = codec(2);
        c.write(5u32);
        c.write(1u8);
        assert_eq!(c.buffer().unwrap().used(), 0, "writes after failure are no-ops");
        assert_eq!(c.read::<u8>(), Err(RpcError::BufferOverrun));
        c.update_status(RpcError::Fail);
        assert_eq!(c.status(), Err(RpcError::BufferOverrun));
    }

    #[test]
    fn basic_header_roundtrip() {
        let mut c = codec(32);
        let header = MessageHeader::new(MessageType::Invocation, 0x1_07, Hash(0xDEAD_BEEF), 42);
        c.start_write_message(&header);
        assert_eq!(c.buffer().unwrap().used(), BASIC_HEADER_SIZE);
        assert_eq!(c.buffer().unwrap().as_slice()[..2], [CODEC_VERSION, 0x07]);

        rewind(&mut c);
        let decoded = c.start_read_message().unwrap();
        assert_eq!(decoded.msg_type, MessageType::Invocation);
        assert_eq!(decoded.service, 0x07, "only the low 8 bits of the service travel");
        assert_eq!(decoded.request, Hash(0xDEAD_BEEF));
        assert_eq!(decoded.sequence, 42);
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut buffer = MessageBuffer::new(16);
        buffer
            .fill_from(&[2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        let mut c = Codec::with_buffer(buffer);
        assert_eq!(c.start_read_message(), Err(RpcError::InvalidMessageVersion));
        assert_eq!(c.status(), Err(RpcError::InvalidMessageVersion));
    }

    #[test]
    fn fast_header_steals_bit_seven() {
        let mut c = codec(8);
        c.set_fast(true);
        c.set_oneway(true);
        c.start_write_message(&MessageHeader::new(MessageType::Invocation, 0x05, Hash(9), 3));
        assert_eq!(c.buffer().unwrap().as_slice(), &[0x85]);
        assert_eq!(c.buffer().unwrap().used(), FAST_HEADER_SIZE);

        rewind(&mut c);
        let header = c.start_read_message().unwrap();
        assert_eq!(header.msg_type, MessageType::FastOneway);
        assert_eq!(header.service, 5);
        assert_eq!(header.request, Hash::ZERO);
    }

    #[test]
    fn fast_header_without_oneway() {
        let mut c = codec(8);
        c.set_fast(true);
        c.start_write_message(&MessageHeader::new(MessageType::Invocation, 0xFF, Hash(1), 1));
        assert_eq!(c.buffer().unwrap().as_slice(), &[0x7F]);
        rewind(&mut c);
        let header = c.start_read_message().unwrap();
        assert_eq!(header.msg_type, MessageType::Fast);
        assert_eq!(header.service, 0x7F);
    }

    #[test]
    fn pointer_carries_its_width() {
        let mut c = codec(16);
        c.write_ptr(0xCAFE);
        assert_eq!(c.buffer().unwrap().as_slice()[0] as usize, PTR_WIDTH);
        rewind(&mut c);
        assert_eq!(c.read_ptr(), Ok(0xCAFE));
    }

    #[test]
    fn narrower_peer_pointer_is_zero_extended() {
        let mut buffer = MessageBuffer::new(8);
        buffer.fill_from(&[2, 0x34, 0x12]).unwrap();
        let mut c = Codec::with_buffer(buffer);
        assert_eq!(c.read_ptr(), Ok(0x1234));
    }

    #[test]
    fn wider_peer_pointer_is_bad_address_scale() {
        let mut bytes = vec![(PTR_WIDTH + 1) as u8];
        bytes.extend(std::iter::repeat(0u8).take(PTR_WIDTH + 1));
        let mut buffer = MessageBuffer::new(bytes.len());
        buffer.fill_from(&bytes).unwrap();
        let mut c = Codec::with_buffer(buffer);
        assert_eq!(c.read_ptr(), Err(RpcError::BadAddressScale));
    }

    #[test]
    fn binary_is_a_view_into_the_buffer() {
        let mut c = codec(32);
        c.write_binary(b"hello");
        c.write(9u8);
        rewind(&mut c);
        assert_eq!(c.read_binary().unwrap(), b"hello");
        assert_eq!(c.read::<u8>(), Ok(9));
    }

    #[test]
    fn oversized_binary_length_is_overrun() {
        let mut c = codec(16);
        c.write(100u32);
        c.write(1u8);
        rewind(&mut c);
        assert_eq!(c.read_binary(), Err(RpcError::BufferOverrun));
    }

    #[test]
    fn strings_must_be_utf8() {
        let mut c = codec(32);
        c.write_string("grüße");
        c.write_binary(&[0xFF, 0xFE]);
        rewind(&mut c);
        assert_eq!(c.read_string(), Ok("grüße"));
        assert_eq!(c.read_string(), Err(RpcError::Fail));
        assert_eq!(c.status(), Err(RpcError::Fail), "failure is sticky");
        assert_eq!(c.position(), c.buffer().unwrap().used());
    }

    #[test]
    fn list_and_union_prefixes() {
        let mut c = codec(16);
        c.start_write_list(3);
        c.start_write_union(-1);
        rewind(&mut c);
        assert_eq!(c.start_read_list(), Ok(3));
        assert_eq!(c.start_read_union(), Ok(-1));
    }

    #[test]
    fn null_flag_policy() {
        let mut buffer = MessageBuffer::new(3);
        buffer.fill_from(&[NOT_NULL, IS_NULL, 0x42]).unwrap();
        let mut c = Codec::with_buffer(buffer);
        assert_eq!(c.read_null_flag(), Ok(false));
        assert_eq!(c.read_null_flag(), Ok(true));
        assert_eq!(c.read_null_flag(), Ok(false), "unknown bytes read as present");
    }

    fn cb_a() -> u8 {
        1
    }
    fn cb_b() -> u8 {
        2
    }
    fn cb_c() -> u8 {
        3
    }

    type Callback = fn() -> u8;

    #[test]
    fn callbacks_encode_as_table_index() {
        let table: [Callback; 2] = [cb_a, cb_b];
        let mut c = codec(8);
        c.write_callback(&table, &(cb_b as Callback));
        assert_eq!(c.buffer().unwrap().as_slice(), &[1]);
        rewind(&mut c);
        let resolved = c.read_callback(&table).unwrap();
        assert_eq!(resolved(), 2);
    }

    #[test]
    fn unknown_callback_is_recorded() {
        let table: [Callback; 2] = [cb_a, cb_b];
        let mut c = codec(8);
        c.write_callback(&table, &(cb_c as Callback));
        assert_eq!(c.status(), Err(RpcError::UnknownCallback));

        let mut buffer = MessageBuffer::new(1);
        buffer.fill_from(&[5]).unwrap();
        let mut c = Codec::with_buffer(buffer);
        assert_eq!(
            c.read_callback(&table).map(|_| ()),
            Err(RpcError::UnknownCallback)
        );
    }

    #[test]
    fn one_entry_table_is_a_single_callback() {
        let table: [Callback; 1] = [cb_a];
        let mut c = codec(8);
        c.write_callback(&table, &(cb_a as Callback));
        assert!(c.is_status_ok());
        assert_eq!(c.buffer().unwrap().used(), 0);
        assert_eq!(c.read_callback(&table).map(|cb| cb()), Ok(1));

        c.write_callback(&table, &(cb_b as Callback));
        assert_eq!(c.status(), Err(RpcError::UnknownCallback));
        assert_eq!(
            c.read_callback(&table).map(|_| ()),
            Err(RpcError::UnknownCallback)
        );
    }

    #[test]
    fn single_callback_touches_no_bytes() {
        let mut c = codec(8);
        c.write_single_callback(&(cb_a as Callback), &(cb_a as Callback));
        assert!(c.is_status_ok());
        assert_eq!(c.buffer().unwrap().used(), 0);
        c.write_single_callback(&(cb_a as Callback), &(cb_b as Callback));
        assert_eq!(c.status(), Err(RpcError::UnknownCallback));
    }

    #[test]
    fn clear_discards_contents_for_reply() {
        let mut c = codec(16);
        c.write(0xAABB_CCDDu32);
        c.clear();
        c.write(1u8);
        assert_eq!(c.buffer().unwrap().as_slice(), &[1]);
    }

    #[test]
    fn set_buffer_returns_previous() {
        let mut c = codec(4);
        c.write(1u8);
        let previous = c.set_buffer(MessageBuffer::new(8)).unwrap();
        assert_eq!(previous.used(), 1);
        assert_eq!(c.position(), 0);
        assert_eq!(c.buffer().unwrap().capacity(), 8);
    }
}
