use clap::{Args, Subcommand, ValueEnum};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod loopback;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run echo calls between an in-process client and server.
    Loopback(LoopbackArgs),
    /// Inspect a hex-encoded framed envelope.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Loopback(args) => loopback::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Size-prefixed envelope with CRC-16.
    Framed,
    /// Fixed 7-byte frames, no CRC.
    Fast,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Number of echo calls.
    #[arg(long, short = 'n', default_value = "100")]
    pub calls: u32,
    /// Wire mode.
    #[arg(long, value_enum, default_value = "framed")]
    pub mode: Mode,
    /// Bytes echoed per call (framed mode only).
    #[arg(long, default_value = "32")]
    pub payload_size: usize,
    /// Most bytes the link moves per call.
    #[arg(long)]
    pub chunk_limit: Option<usize>,
    /// Make every n-th link call stall.
    #[arg(long, value_name = "N")]
    pub stall_every: Option<u64>,
    /// Send calls as oneway (no reply).
    #[arg(long)]
    pub oneway: bool,
    /// Size of each pooled message buffer.
    #[arg(long, default_value = "256")]
    pub buffer_size: usize,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Envelope bytes as hex; spaces, colons and a 0x prefix are ignored.
    pub hex: String,
    /// CRC-16 start value (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_u16, default_value = "0xEF4A")]
    pub crc_start: u16,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_u16(input: &str) -> Result<u16, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|err| format!("invalid 16-bit value {input:?}: {err}"))
}
