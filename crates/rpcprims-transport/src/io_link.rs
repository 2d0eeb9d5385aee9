use std::io::{self, Read, Write};
use std::sync::{Mutex, PoisonError};

use rpcprims_codec::Channel;

use crate::link::Link;

/// [`Link`] over any stream whose shared reference implements `Read + Write`.
///
/// The stream should be non-blocking so an idle link reports `WouldBlock`
/// instead of parking the caller. A closed stream is a hard failure. Channels
/// are ignored; the stream is a single route.
#[derive(Debug)]
pub struct IoLink<T> {
    stream: T,
    /// Byte consumed by [`Link::ready_channel`] and not yet delivered.
    peeked: Mutex<Option<u8>>,
}

impl<T> IoLink<T>
where
    for<'a> &'a T: Read + Write,
{
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            peeked: Mutex::new(None),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    /// Unwrap the stream. A byte consumed by a readiness probe is lost.
    pub fn into_inner(self) -> T {
        self.stream
    }
}

#[cfg(unix)]
impl IoLink<std::os::unix::net::UnixStream> {
    /// Connect to a listening Unix domain socket and switch it to non-blocking.
    pub fn connect(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let stream = std::os::unix::net::UnixStream::connect(path)?;
        stream.set_nonblocking(true)?;
        tracing::debug!(?path, "connected to unix domain socket");
        Ok(Self::new(stream))
    }

    /// Create a connected pair of non-blocking Unix domain socket links.
    pub fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = std::os::unix::net::UnixStream::pair()?;
        a.set_nonblocking(true)?;
        b.set_nonblocking(true)?;
        Ok((Self::new(a), Self::new(b)))
    }
}

impl<T> Link for IoLink<T>
where
    T: Send + Sync,
    for<'a> &'a T: Read + Write,
{
    fn send(&self, _channel: Channel, bytes: &[u8]) -> io::Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }
        match (&self.stream).write(bytes)? {
            0 => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "stream accepted no bytes",
            )),
            n => Ok(n),
        }
    }

    fn receive(&self, _channel: Channel, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut peeked = self.peeked.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(byte) = peeked.take() {
            buf[0] = byte;
            return Ok(1);
        }
        match (&self.stream).read(buf)? {
            0 => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the stream",
            )),
            n => Ok(n),
        }
    }

    fn flush(&self) -> io::Result<()> {
        (&self.stream).flush()
    }

    fn ready_channel(&self) -> Option<Channel> {
        let mut peeked = self.peeked.lock().unwrap_or_else(PoisonError::into_inner);
        if peeked.is_some() {
            return Some(Channel::ZERO);
        }
        let mut byte = [0u8; 1];
        match (&self.stream).read(&mut byte) {
            Ok(1) => {
                *peeked = Some(byte[0]);
                Some(Channel::ZERO)
            }
            _ => None,
        }
    }
}
