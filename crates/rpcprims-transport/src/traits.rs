use rpcprims_codec::{Channel, Codec, CodecFactory, MessageBuffer, Progress, Result};

use crate::crc16::Crc16;

/// Moves whole messages between peers.
///
/// I/O methods take `&self` so one transport can be shared by a client and a
/// server; implementations keep their partial-progress state behind interior
/// locks. A `Pending` outcome means "call again with the same arguments".
pub trait Transport: Send + Sync {
    /// Send the used bytes of `message` on `channel`.
    fn send(&self, channel: Channel, message: &MessageBuffer) -> Result<Progress>;

    /// Receive one message from `channel` into `message`.
    ///
    /// On `Done`, the buffer's used length is the message size. With
    /// `skip_crc` the transport may skip integrity checks.
    fn receive(
        &self,
        channel: Channel,
        message: &mut MessageBuffer,
        skip_crc: bool,
    ) -> Result<Progress>;

    /// Install the CRC used for framing, before first use.
    fn set_crc16(&mut self, crc: Crc16);

    /// Push out anything buffered below the transport.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// The channel with an inbound message in progress or waiting, if any.
    fn has_message(&self) -> Option<Channel>;

    /// Adjust a freshly leased codec to this transport's wire mode.
    fn on_codec_created(&self, _codec: &mut Codec) {}
}

/// Lease a codec and let `transport` configure it.
pub fn create_codec(codecs: &dyn CodecFactory, transport: &dyn Transport) -> Result<Codec> {
    let mut codec = codecs.create()?;
    transport.on_codec_created(&mut codec);
    Ok(codec)
}
