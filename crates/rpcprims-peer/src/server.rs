use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use rpcprims_codec::{
    Channel, Codec, CodecFactory, MessageBuffer, MessageBufferFactory, MessageHeader, MessageType,
    Progress, Result, RpcError,
};
use rpcprims_transport::{create_codec, Transport};
use tracing::{debug, info, trace, warn};

use crate::client::RequestContext;

thread_local! {
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside a service handler.
pub(crate) fn is_dispatching() -> bool {
    DISPATCHING.with(Cell::get)
}

/// Marks the current thread as dispatching until dropped.
pub(crate) struct DispatchGuard {
    previous: bool,
}

impl DispatchGuard {
    pub(crate) fn enter() -> Self {
        Self {
            previous: DISPATCHING.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|flag| flag.set(self.previous));
    }
}

/// A set of methods reachable under one service id.
pub trait Service: Send + Sync {
    fn service_id(&self) -> u32;

    /// Run the method named by `header.request`.
    ///
    /// Arguments are read from `codec`, positioned just after the header. For
    /// requests expecting a reply, the handler writes the reply into the same
    /// codec, starting with [`begin_reply`].
    fn handle_invocation(&self, header: &MessageHeader, codec: &mut Codec) -> Result<()>;
}

/// Rewind `codec` and write the reply header answering `request`.
pub fn begin_reply(codec: &mut Codec, request: &MessageHeader) {
    codec.clear();
    codec.start_write_message(&request.reply());
}

/// Observer of every message crossing the server or client.
pub trait MessageLogger: Send + Sync {
    /// A failure aborts the message being logged.
    fn log(&self, message: &MessageBuffer) -> Result<()>;
}

/// Zero-argument callback run around each message cycle.
pub type ActionHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
struct Hooks {
    pre_action: Option<ActionHook>,
    post_action: Option<ActionHook>,
    logger: Option<Arc<dyn MessageLogger>>,
}

impl Hooks {
    fn pre(&self) {
        if let Some(hook) = &self.pre_action {
            hook();
        }
    }

    fn post(&self) {
        if let Some(hook) = &self.post_action {
            hook();
        }
    }

    fn log(&self, message: &MessageBuffer) -> Result<()> {
        match &self.logger {
            Some(logger) => logger.log(message),
            None => Ok(()),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Pause between idle polls in [`SimpleServer::run`]. Zero yields the
    /// thread instead. Default: 1 ms.
    pub idle_backoff: Duration,
    /// Skip CRC verification on received messages. Default: false.
    pub skip_crc: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_backoff: Duration::from_millis(1),
            skip_crc: false,
        }
    }
}

fn idle(backoff: Duration) {
    if backoff.is_zero() {
        std::thread::yield_now();
    } else {
        std::thread::sleep(backoff);
    }
}

/// Phase of the server's message cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Idle, ready for the next message.
    SendDone,
    Receive,
    ReceiveDone,
    Process,
    ProcessDone,
    Send,
}

struct ServerShared {
    transport: Arc<dyn Transport>,
    codecs: Arc<dyn CodecFactory>,
    buffers: Arc<dyn MessageBufferFactory>,
    services: RwLock<Vec<Arc<dyn Service>>>,
    running: AtomicBool,
}

impl ServerShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn find_service(&self, id: u32) -> Option<Arc<dyn Service>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|service| service.service_id() == id)
            .cloned()
    }

    fn dispose_codec(&self, mut codec: Codec) {
        if let Some(buffer) = codec.take_buffer() {
            self.buffers.dispose(buffer);
        }
        self.codecs.dispose(codec);
    }

    /// Lease a codec bound to `buffer`; on failure the buffer is returned.
    fn open(&self, buffer: MessageBuffer) -> Result<Codec> {
        match create_codec(self.codecs.as_ref(), self.transport.as_ref()) {
            Ok(mut codec) => {
                if let Some(stale) = codec.set_buffer(buffer) {
                    self.buffers.dispose(stale);
                }
                Ok(codec)
            }
            Err(err) => {
                self.buffers.dispose(buffer);
                Err(err)
            }
        }
    }

    fn dispatch(&self, header: &MessageHeader, codec: &mut Codec) -> Result<()> {
        if !header.msg_type.is_request() {
            warn!(msg_type = ?header.msg_type, "server received a non-request message");
            return Err(RpcError::Fail);
        }
        let Some(service) = self.find_service(header.service) else {
            warn!(service = header.service, "no service registered");
            return Err(RpcError::UnknownService(header.service));
        };
        trace!(
            service = header.service,
            method = %header.request,
            sequence = header.sequence,
            "dispatching"
        );
        let result = {
            let _guard = DispatchGuard::enter();
            service.handle_invocation(header, codec)
        };
        result?;
        codec.status()
    }

    /// Drive `op` until it completes, pausing between `Pending` results.
    fn block_on(
        &self,
        backoff: Duration,
        mut op: impl FnMut() -> Result<Progress>,
    ) -> Result<()> {
        loop {
            if op()?.is_done() {
                return Ok(());
            }
            if !self.is_running() {
                return Err(RpcError::ServerIsDown);
            }
            idle(backoff);
        }
    }
}

/// Stops a server from another thread or handler.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<ServerShared>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }
}

/// Polled server: receive, dispatch to a [`Service`], reply.
///
/// One message is driven to completion before the next is considered.
/// `Pending` results keep the message in flight across [`poll`](Self::poll)
/// calls; a hard error abandons it and returns the server to idle.
pub struct SimpleServer {
    shared: Arc<ServerShared>,
    hooks: Hooks,
    config: ServerConfig,
    state: ServerState,
    channel: Channel,
    /// Receive buffer before a codec is bound to it.
    buffer: Option<MessageBuffer>,
    codec: Option<Codec>,
    header: Option<MessageHeader>,
    /// Receive buffer kept between messages when the factory allows reuse.
    spare: Option<MessageBuffer>,
    handled: u64,
}

impl SimpleServer {
    pub fn new(
        transport: Arc<dyn Transport>,
        codecs: Arc<dyn CodecFactory>,
        buffers: Arc<dyn MessageBufferFactory>,
    ) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                transport,
                codecs,
                buffers,
                services: RwLock::new(Vec::new()),
                running: AtomicBool::new(true),
            }),
            hooks: Hooks::default(),
            config: ServerConfig::default(),
            state: ServerState::SendDone,
            channel: Channel::ZERO,
            buffer: None,
            codec: None,
            header: None,
            spare: None,
            handled: 0,
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `hook` after each message is received.
    pub fn with_pre_action(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.pre_action = Some(Arc::new(hook));
        self
    }

    /// Run `hook` after each message is answered.
    pub fn with_post_action(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.post_action = Some(Arc::new(hook));
        self
    }

    pub fn with_message_logger(mut self, logger: Arc<dyn MessageLogger>) -> Self {
        self.hooks.logger = Some(logger);
        self
    }

    /// Register `service`, replacing any service with the same id.
    pub fn add_service(&self, service: Arc<dyn Service>) {
        let mut services = self
            .shared
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let id = service.service_id();
        if let Some(existing) = services.iter_mut().find(|s| s.service_id() == id) {
            debug!(service = id, "replacing service");
            *existing = service;
        } else {
            services.push(service);
        }
    }

    pub fn remove_service(&self, id: u32) -> Option<Arc<dyn Service>> {
        let mut services = self
            .shared
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let index = services.iter().position(|s| s.service_id() == id)?;
        Some(services.remove(index))
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Channel of the message in flight, or of the last one handled.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Number of messages driven to completion.
    pub fn messages_handled(&self) -> u64 {
        self.handled
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn stop(&self) {
        info!("server stopping");
        self.shared.running.store(false, Ordering::Release);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.shared.transport.flush()
    }

    /// Handle for serving requests in-line while a client call on the server
    /// thread waits for its reply.
    pub fn nested_dispatch(&self) -> NestedDispatch {
        NestedDispatch {
            shared: Arc::clone(&self.shared),
            hooks: self.hooks.clone(),
            config: self.config.clone(),
        }
    }

    /// Take one non-blocking step.
    ///
    /// Idle with nothing ready returns `Done` and stays idle. Otherwise the
    /// current message is advanced as far as the transport allows.
    pub fn poll(&mut self) -> Result<Progress> {
        if !self.is_running() {
            self.abandon();
            return Err(RpcError::ServerIsDown);
        }
        if self.state == ServerState::SendDone {
            match self.shared.transport.has_message() {
                Some(channel) => self.channel = channel,
                None => return Ok(Progress::Done),
            }
        }
        let result = self.step();
        if let Err(err) = result {
            warn!(%err, state = ?self.state, channel = %self.channel, "abandoning message");
            self.abandon();
        }
        result
    }

    /// Poll until stopped or a hard error occurs.
    pub fn run(&mut self) -> Result<()> {
        info!("server running");
        while self.is_running() {
            let handled = self.handled;
            let progress = match self.poll() {
                Err(RpcError::ServerIsDown) if !self.is_running() => break,
                result => result?,
            };
            if progress.is_pending() || self.handled == handled {
                idle(self.config.idle_backoff);
            }
        }
        self.abandon();
        Ok(())
    }

    fn step(&mut self) -> Result<Progress> {
        if matches!(self.state, ServerState::SendDone | ServerState::Receive) {
            if self.receive()?.is_pending() {
                return Ok(Progress::Pending);
            }
            self.state = ServerState::ReceiveDone;
        }
        self.process_and_reply()
    }

    fn receive(&mut self) -> Result<Progress> {
        if self.state == ServerState::SendDone {
            let buffer = match self.spare.take() {
                Some(buffer) => buffer,
                None => self.shared.buffers.create()?,
            };
            self.buffer = Some(buffer);
            self.state = ServerState::Receive;
            debug!(channel = %self.channel, "receiving");
        }

        let buffer = self.buffer.as_mut().ok_or(RpcError::MemoryError)?;
        let progress = self
            .shared
            .transport
            .receive(self.channel, buffer, self.config.skip_crc)?;
        if progress.is_pending() {
            return Ok(Progress::Pending);
        }
        self.hooks.pre();
        self.hooks.log(buffer)?;

        let buffer = self.buffer.take().ok_or(RpcError::MemoryError)?;
        let codec = self.codec.insert(self.shared.open(buffer)?);
        let header = codec.start_read_message()?;
        trace!(?header, "message received");
        self.header = Some(header);
        Ok(Progress::Done)
    }

    fn process_and_reply(&mut self) -> Result<Progress> {
        let header = self.header.ok_or(RpcError::Fail)?;
        let codec = self.codec.as_mut().ok_or(RpcError::MemoryError)?;

        if self.state == ServerState::ReceiveDone {
            self.state = ServerState::Process;
            self.shared.dispatch(&header, codec)?;
            self.state = ServerState::ProcessDone;
        }

        if self.state == ServerState::ProcessDone {
            if header.msg_type.expects_reply() {
                self.hooks.log(codec.buffer().ok_or(RpcError::MemoryError)?)?;
            }
            self.state = ServerState::Send;
        }

        if header.msg_type.expects_reply() {
            let reply = codec.buffer().ok_or(RpcError::MemoryError)?;
            if self.shared.transport.send(self.channel, reply)?.is_pending() {
                return Ok(Progress::Pending);
            }
        }

        self.hooks.post();
        debug!(
            service = header.service,
            method = %header.request,
            sequence = header.sequence,
            "message handled"
        );
        self.release();
        self.state = ServerState::SendDone;
        self.handled += 1;
        Ok(Progress::Done)
    }

    /// Drop the in-flight message, if any, and go back to idle.
    fn abandon(&mut self) {
        if self.state != ServerState::SendDone {
            debug!(state = ?self.state, channel = %self.channel, "in-flight message dropped");
        }
        self.release();
        self.state = ServerState::SendDone;
    }

    /// Return the in-flight codec and buffer to their pools.
    fn release(&mut self) {
        self.header = None;
        let mut buffer = self.buffer.take();
        if let Some(mut codec) = self.codec.take() {
            if let Some(bound) = codec.take_buffer() {
                if let Some(extra) = buffer.replace(bound) {
                    self.shared.buffers.dispose(extra);
                }
            }
            self.shared.codecs.dispose(codec);
        }
        if let Some(buffer) = buffer {
            if self.shared.buffers.create_server_buffer() {
                self.shared.buffers.dispose(buffer);
            } else {
                self.spare = Some(buffer);
            }
        }
    }
}

impl Drop for SimpleServer {
    fn drop(&mut self) {
        self.release();
        if let Some(spare) = self.spare.take() {
            self.shared.buffers.dispose(spare);
        }
    }
}

/// In-line server loop used while a client call waits on the server thread.
///
/// Incoming requests are served to completion; a reply with the awaited
/// sequence number ends the wait; any other reply is discarded.
#[derive(Clone)]
pub struct NestedDispatch {
    shared: Arc<ServerShared>,
    hooks: Hooks,
    config: ServerConfig,
}

impl NestedDispatch {
    /// Send `message` on `channel`, waiting out `Pending` results.
    pub(crate) fn send_blocking(&self, channel: Channel, message: &MessageBuffer) -> Result<()> {
        self.shared.block_on(self.config.idle_backoff, || {
            self.shared.transport.send(channel, message)
        })
    }

    /// Serve incoming requests until the reply to `request` arrives, then swap
    /// it into the request's buffer.
    pub fn run_until_reply(&self, request: &mut RequestContext) -> Result<()> {
        let channel = request.channel();
        while self.shared.is_running() {
            let mut buffer = self.shared.buffers.create()?;
            let received = self.shared.block_on(self.config.idle_backoff, || {
                self.shared
                    .transport
                    .receive(channel, &mut buffer, self.config.skip_crc)
            });
            if let Err(err) = received.and_then(|()| {
                self.hooks.pre();
                self.hooks.log(&buffer)
            }) {
                self.shared.buffers.dispose(buffer);
                return Err(err);
            }

            let mut codec = self.shared.open(buffer)?;
            let header = match codec.start_read_message() {
                Ok(header) => header,
                Err(err) => {
                    self.shared.dispose_codec(codec);
                    return Err(err);
                }
            };

            if header.msg_type == MessageType::Reply {
                let matched = header.sequence == request.sequence();
                if matched {
                    if let (Some(received), Some(outgoing)) =
                        (codec.buffer_mut(), request.codec_mut().buffer_mut())
                    {
                        outgoing.swap(received);
                    }
                    trace!(sequence = header.sequence, "nested reply matched");
                } else {
                    warn!(
                        expected = request.sequence(),
                        received = header.sequence,
                        "discarding unmatched reply"
                    );
                }
                self.shared.dispose_codec(codec);
                if matched {
                    return Ok(());
                }
                continue;
            }

            let served = self.serve(channel, &header, &mut codec);
            self.shared.dispose_codec(codec);
            served?;
        }
        Err(RpcError::ServerIsDown)
    }

    fn serve(&self, channel: Channel, header: &MessageHeader, codec: &mut Codec) -> Result<()> {
        self.shared.dispatch(header, codec)?;
        if header.msg_type.expects_reply() {
            let reply = codec.buffer().ok_or(RpcError::MemoryError)?;
            self.hooks.log(reply)?;
            self.send_blocking(channel, reply)?;
        }
        self.hooks.post();
        debug!(sequence = header.sequence, "nested request served");
        Ok(())
    }
}
