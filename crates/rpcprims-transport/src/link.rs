use std::io;

use rpcprims_codec::{Channel, Result, RpcError};
use tracing::{trace, warn};

/// Raw byte primitive underneath a transport.
///
/// Both directions may transfer fewer bytes than asked. `Ok(0)` and
/// [`io::ErrorKind::WouldBlock`] mean "no progress right now";
/// [`io::ErrorKind::Interrupted`] is retried; any other error is a hard
/// failure of the link.
pub trait Link: Send + Sync {
    /// Write a prefix of `bytes` and return its length.
    fn send(&self, channel: Channel, bytes: &[u8]) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes and return how many arrived.
    fn receive(&self, channel: Channel, buf: &mut [u8]) -> io::Result<usize>;

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    /// The channel with inbound bytes waiting, if any.
    fn ready_channel(&self) -> Option<Channel>;
}

/// Push as much of `bytes` as the link accepts now.
///
/// Returns the number of bytes written; `0` means the link made no progress.
pub fn send_some<L: Link + ?Sized>(link: &L, channel: Channel, bytes: &[u8]) -> Result<usize> {
    let mut written = 0;
    while written < bytes.len() {
        match link.send(channel, &bytes[written..]) {
            Ok(0) => break,
            Ok(n) => {
                let n = n.min(bytes.len() - written);
                trace!(n, written, "link accepted bytes");
                written += n;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!(error = %e, %channel, "link send failed");
                return Err(RpcError::SendFailed);
            }
        }
    }
    Ok(written)
}

/// Pull as many bytes into `buf` as the link has now.
///
/// Returns the number of bytes read; `0` means the link made no progress.
pub fn receive_some<L: Link + ?Sized>(
    link: &L,
    channel: Channel,
    buf: &mut [u8],
) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match link.receive(channel, &mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => {
                let n = n.min(buf.len() - filled);
                trace!(n, filled, "link delivered bytes");
                filled += n;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!(error = %e, %channel, "link receive failed");
                return Err(RpcError::ReceiveFailed);
            }
        }
    }
    Ok(filled)
}
