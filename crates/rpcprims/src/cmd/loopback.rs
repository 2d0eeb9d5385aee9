use std::sync::Arc;
use std::time::Instant;

use rpcprims_codec::{
    BufferPool, Channel, Codec, CodecPool, Hash, MessageHeader, PoolConfig, Progress, Result,
};
use rpcprims_frame::{FastTransport, FramedTransport};
use rpcprims_peer::{begin_reply, ClientManager, RequestContext, Service, SimpleServer};
use rpcprims_transport::{LoopbackConfig, LoopbackLink, LoopbackStats, Transport};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::{LoopbackArgs, Mode};
use crate::exit::{rpc_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS, USAGE};
use crate::output::{print_report, OutputFormat, Report};

const ECHO_SERVICE: u32 = 1;
/// Echo a binary blob. Fast headers carry no method hash, so anything else
/// echoes a single u32.
const ECHO_BYTES: Hash = Hash(0xEC40_0001);

/// Polls allowed per call before the run is declared stuck.
const MAX_ROUNDS: u64 = 1_000_000;

struct Echo;

impl Service for Echo {
    fn service_id(&self) -> u32 {
        ECHO_SERVICE
    }

    fn handle_invocation(&self, header: &MessageHeader, codec: &mut Codec) -> Result<()> {
        if header.request == ECHO_BYTES {
            let data = codec.read_binary()?.to_vec();
            if header.msg_type.expects_reply() {
                begin_reply(codec, header);
                codec.write_binary(&data);
            }
        } else {
            let word = codec.read::<u32>()?;
            if header.msg_type.expects_reply() {
                begin_reply(codec, header);
                codec.write(word);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct LoopbackReport {
    mode: &'static str,
    calls: u32,
    oneway: bool,
    payload_size: usize,
    bytes_sent: u64,
    bytes_received: u64,
    pending_retries: u64,
    link_stalls: u64,
    elapsed_ms: f64,
}

impl Report for LoopbackReport {
    fn title(&self) -> &'static str {
        "Loopback run"
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("mode", self.mode.to_string()),
            ("calls", self.calls.to_string()),
            ("oneway", self.oneway.to_string()),
            ("payload size", self.payload_size.to_string()),
            ("bytes sent", self.bytes_sent.to_string()),
            ("bytes received", self.bytes_received.to_string()),
            ("pending retries", self.pending_retries.to_string()),
            ("link stalls", self.link_stalls.to_string()),
            ("elapsed", format!("{:.2}ms", self.elapsed_ms)),
        ]
    }
}

pub fn run(args: LoopbackArgs, format: OutputFormat) -> CliResult<i32> {
    let report = exercise(&args)?;
    print_report(&report, format);
    Ok(SUCCESS)
}

struct Rig {
    client: ClientManager,
    server: SimpleServer,
    client_link: Arc<dyn Fn() -> LoopbackStats>,
    server_link: Arc<dyn Fn() -> LoopbackStats>,
}

fn rig(args: &LoopbackArgs) -> Rig {
    let (a, b) = LoopbackLink::pair_with(LoopbackConfig {
        chunk_limit: args.chunk_limit,
        stall_every: args.stall_every,
    });
    let (client_transport, client_link, server_transport, server_link) = match args.mode {
        Mode::Framed => {
            let a = Arc::new(FramedTransport::new(a));
            let b = Arc::new(FramedTransport::new(b));
            let (sa, sb) = (a.clone(), b.clone());
            (
                a as Arc<dyn Transport>,
                Arc::new(move || sa.link().stats()) as Arc<dyn Fn() -> LoopbackStats>,
                b as Arc<dyn Transport>,
                Arc::new(move || sb.link().stats()) as Arc<dyn Fn() -> LoopbackStats>,
            )
        }
        Mode::Fast => {
            let a = Arc::new(FastTransport::new(a));
            let b = Arc::new(FastTransport::new(b));
            let (sa, sb) = (a.clone(), b.clone());
            (
                a as Arc<dyn Transport>,
                Arc::new(move || sa.link().stats()) as Arc<dyn Fn() -> LoopbackStats>,
                b as Arc<dyn Transport>,
                Arc::new(move || sb.link().stats()) as Arc<dyn Fn() -> LoopbackStats>,
            )
        }
    };

    let pools = PoolConfig {
        buffer_size: args.buffer_size,
        ..PoolConfig::default()
    };
    let client = ClientManager::new(
        client_transport,
        Arc::new(CodecPool::with_config(&pools)),
        Arc::new(BufferPool::with_config(&pools)),
    );
    let server = SimpleServer::new(
        server_transport,
        Arc::new(CodecPool::with_config(&pools)),
        Arc::new(BufferPool::with_config(&pools)),
    );
    server.add_service(Arc::new(Echo));
    Rig {
        client,
        server,
        client_link,
        server_link,
    }
}

fn payload(call: u32, size: usize) -> Vec<u8> {
    (0..size).map(|i| (call as usize + i) as u8).collect()
}

fn build_request(rig: &Rig, args: &LoopbackArgs, call: u32) -> CliResult<RequestContext> {
    let mut request = rig
        .client
        .create_request(Channel::ZERO, args.oneway)
        .map_err(|err| rpc_error("create request", err))?;
    match args.mode {
        Mode::Framed => {
            request.write_header(ECHO_SERVICE, ECHO_BYTES);
            request
                .codec_mut()
                .write_binary(&payload(call, args.payload_size));
        }
        Mode::Fast => {
            request.write_header(ECHO_SERVICE, Hash::ZERO);
            request.codec_mut().write(call);
        }
    }
    Ok(request)
}

fn check_echo(args: &LoopbackArgs, call: u32, request: &mut RequestContext) -> CliResult<()> {
    let codec = request.codec_mut();
    let matches = match args.mode {
        Mode::Framed => codec
            .read_binary()
            .map(|data| data == payload(call, args.payload_size).as_slice()),
        Mode::Fast => codec.read::<u32>().map(|word| word == call),
    }
    .map_err(|err| rpc_error("read reply", err))?;
    if !matches {
        return Err(CliError::new(
            DATA_INVALID,
            format!("call {call}: echo does not match the request"),
        ));
    }
    Ok(())
}

/// Drive every call to completion, alternating client and server steps.
fn exercise(args: &LoopbackArgs) -> CliResult<LoopbackReport> {
    if args.calls == 0 {
        return Err(CliError::new(USAGE, "--calls must be greater than zero"));
    }
    let mut rig = rig(args);
    let started = Instant::now();
    let mut pending_retries = 0u64;

    for call in 1..=args.calls {
        let mut request = build_request(&rig, args, call)?;
        let handled = rig.server.messages_handled();
        let mut rounds = 0u64;
        loop {
            let progress = rig
                .client
                .perform_request(&mut request)
                .map_err(|err| rpc_error("echo call", err))?;
            let server_done = rig.server.messages_handled() > handled;
            if progress.is_done() && (!args.oneway || server_done) {
                break;
            }
            if progress == Progress::Pending {
                pending_retries += 1;
            }
            rig.server
                .poll()
                .map_err(|err| rpc_error("server poll", err))?;
            rounds += 1;
            if rounds > MAX_ROUNDS {
                return Err(CliError::new(
                    FAILURE,
                    format!("call {call} made no progress after {MAX_ROUNDS} polls"),
                ));
            }
        }
        if !args.oneway {
            check_echo(args, call, &mut request)?;
        }
        rig.client.release_request(request);
        debug!(call, rounds, "echo call complete");
    }

    let elapsed = started.elapsed();
    let (client, server) = ((rig.client_link)(), (rig.server_link)());
    info!(calls = args.calls, ?elapsed, "loopback run complete");
    Ok(LoopbackReport {
        mode: match args.mode {
            Mode::Framed => "framed",
            Mode::Fast => "fast",
        },
        calls: args.calls,
        oneway: args.oneway,
        payload_size: match args.mode {
            Mode::Framed => args.payload_size,
            Mode::Fast => std::mem::size_of::<u32>(),
        },
        bytes_sent: client.bytes_sent + server.bytes_sent,
        bytes_received: client.bytes_received + server.bytes_received,
        pending_retries,
        link_stalls: client.stalls + server.stalls,
        elapsed_ms: (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
    })
}
