use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use rpcprims_codec::{
    Channel, Codec, CodecFactory, Hash, MessageBufferFactory, MessageHeader, MessageType,
    Progress, Result, RpcError,
};
use rpcprims_transport::{create_codec, Transport};
use tracing::{debug, trace, warn};

use crate::server::{is_dispatching, MessageLogger, NestedDispatch};

/// Callback for unrecoverable client errors, with the failing request's hash.
pub type ErrorHandler = Box<dyn Fn(RpcError, Hash) + Send + Sync>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Fail blocking calls issued from inside a service handler instead of
    /// waiting on a reply the blocked server can never deliver. Default: true.
    pub nested_call_detection: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nested_call_detection: true,
        }
    }
}

/// Progress of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Sending,
    Sent,
    /// Waiting for the reply. Oneway requests never enter this state.
    Pending,
    Done,
}

/// One outstanding call: its codec, buffer, sequence number and state.
///
/// The codec and buffer go back to their pools when the context is dropped.
pub struct RequestContext {
    channel: Channel,
    sequence: u32,
    codec: Codec,
    oneway: bool,
    state: RequestState,
    request: Hash,
    logged: bool,
    codecs: Arc<dyn CodecFactory>,
    buffers: Arc<dyn MessageBufferFactory>,
}

impl RequestContext {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn is_oneway(&self) -> bool {
        self.oneway
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Method hash recorded by [`write_header`](Self::write_header).
    pub fn request_hash(&self) -> Hash {
        self.request
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut Codec {
        &mut self.codec
    }

    /// Write the request header for `method` on `service`.
    pub fn write_header(&mut self, service: u32, method: Hash) {
        self.request = method;
        let msg_type = if self.oneway {
            MessageType::Oneway
        } else {
            MessageType::Invocation
        };
        self.codec.start_write_message(&MessageHeader::new(
            msg_type,
            service,
            method,
            self.sequence,
        ));
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        let mut codec = std::mem::take(&mut self.codec);
        if let Some(buffer) = codec.take_buffer() {
            self.buffers.dispose(buffer);
        }
        self.codecs.dispose(codec);
        trace!(sequence = self.sequence, "request released");
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("channel", &self.channel)
            .field("sequence", &self.sequence)
            .field("oneway", &self.oneway)
            .field("state", &self.state)
            .field("request", &self.request)
            .field("codec", &self.codec)
            .finish()
    }
}

/// Creates requests and drives them through a transport.
///
/// [`perform_request`](Self::perform_request) is resumable: it advances the
/// request as far as the transport allows and returns `Pending` until the
/// request is done.
pub struct ClientManager {
    transport: Arc<dyn Transport>,
    codecs: Arc<dyn CodecFactory>,
    buffers: Arc<dyn MessageBufferFactory>,
    sequence: AtomicU32,
    config: ClientConfig,
    error_handler: Option<ErrorHandler>,
    logger: Option<Arc<dyn MessageLogger>>,
    nested: Option<(NestedDispatch, ThreadId)>,
}

impl ClientManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        codecs: Arc<dyn CodecFactory>,
        buffers: Arc<dyn MessageBufferFactory>,
    ) -> Self {
        Self {
            transport,
            codecs,
            buffers,
            sequence: AtomicU32::new(0),
            config: ClientConfig::default(),
            error_handler: None,
            logger: None,
            nested: None,
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_error_handler(
        mut self,
        handler: impl Fn(RpcError, Hash) + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(Box::new(handler));
        self
    }

    pub fn with_message_logger(mut self, logger: Arc<dyn MessageLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Serve calls made on the current thread through `dispatch`.
    ///
    /// Register this from the thread that runs the server, so client calls
    /// made by its handlers wait for their reply while serving incoming
    /// requests instead of deadlocking.
    pub fn set_server(&mut self, dispatch: NestedDispatch) {
        self.set_server_thread(dispatch, thread::current().id());
    }

    pub fn set_server_thread(&mut self, dispatch: NestedDispatch, thread: ThreadId) {
        self.nested = Some((dispatch, thread));
    }

    /// Lease a codec and buffer for a new request.
    pub fn create_request(&self, channel: Channel, oneway: bool) -> Result<RequestContext> {
        let mut codec = create_codec(self.codecs.as_ref(), self.transport.as_ref())?;
        let buffer = match self.buffers.create() {
            Ok(buffer) => buffer,
            Err(err) => {
                debug!(%err, "no buffer for request");
                self.codecs.dispose(codec);
                return Err(err);
            }
        };
        if let Some(stale) = codec.set_buffer(buffer) {
            self.buffers.dispose(stale);
        }
        codec.set_oneway(oneway);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        trace!(sequence, oneway, "request created");
        Ok(RequestContext {
            channel,
            sequence,
            codec,
            oneway,
            state: RequestState::Sending,
            request: Hash::ZERO,
            logged: false,
            codecs: Arc::clone(&self.codecs),
            buffers: Arc::clone(&self.buffers),
        })
    }

    /// Advance `request` as far as the transport allows.
    ///
    /// Returns `Done` once a oneway request is sent or a reply is received
    /// and verified; the codec is then positioned after the reply header.
    pub fn perform_request(&self, request: &mut RequestContext) -> Result<Progress> {
        if let Err(err) = request.codec.status() {
            return Err(self.report(request, err));
        }
        let result = match self.nested_dispatch() {
            Some(dispatch) => self
                .perform_nested_request(request, dispatch)
                .map(|()| Progress::Done),
            None => self.perform_client_request(request),
        };
        result.map_err(|err| self.report(request, err))
    }

    /// Rewind the request codec and decode the reply header.
    ///
    /// Basic-mode replies must be of type `Reply` and carry the request's
    /// sequence number. Fast headers carry neither, so any reply is accepted.
    pub fn verify_reply(&self, request: &mut RequestContext) -> Result<MessageHeader> {
        let codec = &mut request.codec;
        codec.reset();
        let header = codec.start_read_message()?;
        if !codec.is_fast()
            && (header.msg_type != MessageType::Reply || header.sequence != request.sequence)
        {
            warn!(
                expected = request.sequence,
                received = header.sequence,
                msg_type = ?header.msg_type,
                "reply does not answer the request"
            );
            codec.update_status(RpcError::ExpectedReply);
            return Err(RpcError::ExpectedReply);
        }
        Ok(header)
    }

    /// Return the request's codec and buffer to their pools.
    pub fn release_request(&self, request: RequestContext) {
        drop(request);
    }

    /// Invoke the error handler, if one is installed.
    pub fn call_error_handler(&self, err: RpcError, request: Hash) {
        if let Some(handler) = &self.error_handler {
            handler(err, request);
        }
    }

    fn nested_dispatch(&self) -> Option<&NestedDispatch> {
        let (dispatch, server_thread) = self.nested.as_ref()?;
        (thread::current().id() == *server_thread).then_some(dispatch)
    }

    fn report(&self, request: &mut RequestContext, err: RpcError) -> RpcError {
        request.codec.update_status(err);
        warn!(%err, sequence = request.sequence, request = %request.request, "request failed");
        self.call_error_handler(err, request.request);
        err
    }

    fn log(&self, request: &RequestContext) -> Result<()> {
        match (&self.logger, request.codec.buffer()) {
            (Some(logger), Some(message)) => logger.log(message),
            _ => Ok(()),
        }
    }

    fn perform_client_request(&self, request: &mut RequestContext) -> Result<Progress> {
        if self.config.nested_call_detection && !request.oneway && is_dispatching() {
            return Err(RpcError::NestedCallFailure);
        }

        if request.state == RequestState::Sending {
            if !request.logged {
                self.log(request)?;
                request.logged = true;
            }
            let message = request.codec.buffer().ok_or(RpcError::MemoryError)?;
            if self.transport.send(request.channel, message)?.is_pending() {
                return Ok(Progress::Pending);
            }
            trace!(sequence = request.sequence, "request sent");
            request.state = RequestState::Sent;
        }

        if request.state == RequestState::Sent {
            if request.oneway {
                request.state = RequestState::Done;
                return Ok(Progress::Done);
            }
            request.state = RequestState::Pending;
        }

        if request.state == RequestState::Pending {
            let skip_crc = request.codec.skip_crc();
            let message = request.codec.buffer_mut().ok_or(RpcError::MemoryError)?;
            if self
                .transport
                .receive(request.channel, message, skip_crc)?
                .is_pending()
            {
                return Ok(Progress::Pending);
            }
            request.state = RequestState::Done;
            self.log(request)?;
            self.verify_reply(request)?;
            debug!(sequence = request.sequence, "reply received");
        }

        Ok(Progress::Done)
    }

    fn perform_nested_request(
        &self,
        request: &mut RequestContext,
        dispatch: &NestedDispatch,
    ) -> Result<()> {
        // Fast headers carry no reply type, so replies cannot be told apart
        // from incoming requests.
        if request.codec.is_fast() && !request.oneway {
            warn!("in-line dispatch needs basic headers");
            return Err(RpcError::Fail);
        }
        if request.state == RequestState::Sending {
            self.log(request)?;
            let message = request.codec.buffer().ok_or(RpcError::MemoryError)?;
            dispatch.send_blocking(request.channel, message)?;
            request.state = RequestState::Sent;
        }
        if request.oneway {
            request.state = RequestState::Done;
            return Ok(());
        }
        request.state = RequestState::Pending;
        dispatch.run_until_reply(request)?;
        request.state = RequestState::Done;
        self.log(request)?;
        self.verify_reply(request)?;
        debug!(sequence = request.sequence, "nested reply received");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rpcprims_codec::{BufferPool, CodecPool, MessageBuffer};
    use rpcprims_transport::Crc16;

    use super::*;

    /// Transport that records sends and replays scripted receives.
    #[derive(Default)]
    struct Scripted {
        sends: Mutex<Vec<Result<Progress>>>,
        receives: Mutex<Vec<Result<Vec<u8>>>>,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl Transport for Scripted {
        fn send(&self, _channel: Channel, message: &MessageBuffer) -> Result<Progress> {
            let outcome = self.sends.lock().unwrap().pop().unwrap_or(Ok(Progress::Done));
            if outcome == Ok(Progress::Done) {
                self.sent.lock().unwrap().push(message.as_slice().to_vec());
            }
            outcome
        }

        fn receive(
            &self,
            _channel: Channel,
            message: &mut MessageBuffer,
            _skip_crc: bool,
        ) -> Result<Progress> {
            match self.receives.lock().unwrap().pop() {
                Some(Ok(bytes)) if bytes.is_empty() => Ok(Progress::Pending),
                Some(Ok(bytes)) => {
                    message.fill_from(&bytes)?;
                    Ok(Progress::Done)
                }
                Some(Err(err)) => Err(err),
                None => Ok(Progress::Pending),
            }
        }

        fn set_crc16(&mut self, _crc: Crc16) {}

        fn has_message(&self) -> Option<Channel> {
            None
        }
    }

    fn reply(sequence: u32, value: u32) -> Vec<u8> {
        let mut codec = Codec::with_buffer(MessageBuffer::new(32));
        codec.start_write_message(&MessageHeader::new(MessageType::Reply, 1, Hash(7), sequence));
        codec.write(value);
        codec.buffer().unwrap().as_slice().to_vec()
    }

    struct Fixture {
        client: ClientManager,
        transport: Arc<Scripted>,
        codecs: Arc<CodecPool>,
        buffers: Arc<BufferPool>,
    }

    fn fixture(transport: Scripted) -> Fixture {
        let transport = Arc::new(transport);
        let codecs = Arc::new(CodecPool::new(2));
        let buffers = Arc::new(BufferPool::new(2, 32));
        let client = ClientManager::new(transport.clone(), codecs.clone(), buffers.clone());
        Fixture {
            client,
            transport,
            codecs,
            buffers,
        }
    }

    #[test]
    fn sequence_numbers_increase_per_manager() {
        let f = fixture(Scripted::default());
        let a = f.client.create_request(Channel::ZERO, false).unwrap();
        let b = f.client.create_request(Channel::ZERO, false).unwrap();
        assert_eq!((a.sequence(), b.sequence()), (1, 2));
        assert_eq!(a.state(), RequestState::Sending);
    }

    #[test]
    fn oneway_never_waits_for_a_reply() {
        let f = fixture(Scripted {
            sends: Mutex::new(vec![Ok(Progress::Done), Ok(Progress::Pending)]),
            ..Scripted::default()
        });
        let mut request = f.client.create_request(Channel::ZERO, true).unwrap();
        request.write_header(1, Hash(7));
        request.codec_mut().write(5u32);

        assert_eq!(f.client.perform_request(&mut request), Ok(Progress::Pending));
        assert_eq!(request.state(), RequestState::Sending);
        assert_eq!(f.client.perform_request(&mut request), Ok(Progress::Done));
        assert_eq!(request.state(), RequestState::Done);

        let sent = f.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][6], MessageType::Oneway as u8, "type byte follows the hash");
    }

    #[test]
    fn blocking_request_walks_every_state() {
        let f = fixture(Scripted {
            receives: Mutex::new(vec![Ok(reply(1, 99)), Ok(Vec::new())]),
            ..Scripted::default()
        });
        let mut request = f.client.create_request(Channel::ZERO, false).unwrap();
        request.write_header(1, Hash(7));

        assert_eq!(f.client.perform_request(&mut request), Ok(Progress::Pending));
        assert_eq!(request.state(), RequestState::Pending);
        assert_eq!(f.client.perform_request(&mut request), Ok(Progress::Done));
        assert_eq!(request.state(), RequestState::Done);
        assert_eq!(request.codec_mut().read::<u32>(), Ok(99));
        assert_eq!(f.transport.sent.lock().unwrap().len(), 1, "sent exactly once");
    }

    #[test]
    fn mismatched_sequence_is_expected_reply() {
        let f = fixture(Scripted {
            receives: Mutex::new(vec![Ok(reply(42, 0))]),
            ..Scripted::default()
        });
        let mut request = f.client.create_request(Channel::ZERO, false).unwrap();
        request.write_header(1, Hash(7));
        assert_eq!(
            f.client.perform_request(&mut request),
            Err(RpcError::ExpectedReply)
        );
    }

    #[test]
    fn codec_errors_stop_the_request_and_reach_the_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let f = fixture(Scripted::default());
        let client = f
            .client
            .with_error_handler(move |err, hash| sink.lock().unwrap().push((err, hash)));

        let mut request = client.create_request(Channel::ZERO, false).unwrap();
        request.write_header(1, Hash(0xBEEF));
        request.codec_mut().write_binary(&[0u8; 64]);

        assert_eq!(
            client.perform_request(&mut request),
            Err(RpcError::BufferOverrun)
        );
        assert!(f.transport.sent.lock().unwrap().is_empty());
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(RpcError::BufferOverrun, Hash(0xBEEF))]
        );
    }

    #[test]
    fn transport_failure_is_sticky() {
        let f = fixture(Scripted {
            sends: Mutex::new(vec![Err(RpcError::SendFailed)]),
            ..Scripted::default()
        });
        let mut request = f.client.create_request(Channel::ZERO, false).unwrap();
        request.write_header(1, Hash(7));
        assert_eq!(f.client.perform_request(&mut request), Err(RpcError::SendFailed));
        assert_eq!(f.client.perform_request(&mut request), Err(RpcError::SendFailed));
        assert_eq!(request.codec().status(), Err(RpcError::SendFailed));
    }

    #[test]
    fn release_returns_both_slots() {
        let f = fixture(Scripted::default());
        let request = f.client.create_request(Channel::ZERO, false).unwrap();
        assert_eq!((f.codecs.available(), f.buffers.available()), (1, 1));
        f.client.release_request(request);
        assert_eq!((f.codecs.available(), f.buffers.available()), (2, 2));
    }

    #[test]
    fn buffer_exhaustion_returns_the_codec() {
        let transport = Arc::new(Scripted::default());
        let codecs = Arc::new(CodecPool::new(2));
        let buffers = Arc::new(BufferPool::new(0, 32));
        let client = ClientManager::new(transport, codecs.clone(), buffers);
        assert_eq!(
            client.create_request(Channel::ZERO, false).unwrap_err(),
            RpcError::MemoryError
        );
        assert_eq!(codecs.available(), 2);
    }

    #[test]
    fn blocking_call_inside_a_handler_is_refused() {
        let f = fixture(Scripted::default());
        let mut request = f.client.create_request(Channel::ZERO, false).unwrap();
        request.write_header(1, Hash(7));
        let _guard = crate::server::DispatchGuard::enter();
        assert_eq!(
            f.client.perform_request(&mut request),
            Err(RpcError::NestedCallFailure)
        );
        assert!(f.transport.sent.lock().unwrap().is_empty());

        let mut oneway = f.client.create_request(Channel::ZERO, true).unwrap();
        oneway.write_header(1, Hash(7));
        assert_eq!(f.client.perform_request(&mut oneway), Ok(Progress::Done));
    }
}
