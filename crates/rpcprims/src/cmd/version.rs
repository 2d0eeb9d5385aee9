use rpcprims_codec::{CODEC_VERSION, DEFAULT_BUFFER_SIZE};
use rpcprims_frame::{FAST_FRAME_SIZE, MAX_MESSAGE_SIZE};
use rpcprims_transport::Crc16;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("rpcprims {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: rpcprims");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("codec_version: {CODEC_VERSION}");
    println!("crc16_start: {:#06x}", Crc16::default().start());
    println!("max_message_size: {MAX_MESSAGE_SIZE}");
    println!("fast_frame_size: {FAST_FRAME_SIZE}");
    println!("default_buffer_size: {DEFAULT_BUFFER_SIZE}");
    println!(
        "target: {}",
        option_env!("RPCPRIMS_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("features: peer={}, cli=true", cfg!(feature = "peer"));

    Ok(SUCCESS)
}
