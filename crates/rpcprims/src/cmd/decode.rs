use rpcprims_codec::{Codec, MessageBuffer};
use rpcprims_frame::{inspect_frame, FrameReport, HEADER_SIZE};
use rpcprims_transport::Crc16;
use serde::Serialize;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{hex_bytes, print_report, OutputFormat, Report};

/// Basic header found at the start of the payload, when it parses.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PayloadHeader {
    service: u32,
    request: String,
    msg_type: String,
    sequence: u32,
}

#[derive(Debug, Serialize)]
pub struct DecodeReport {
    sizes: [u16; 3],
    size: u16,
    unanimous: bool,
    crc: u16,
    computed_crc: u16,
    crc_ok: bool,
    trailing: usize,
    payload: String,
    header: Option<PayloadHeader>,
}

impl Report for DecodeReport {
    fn title(&self) -> &'static str {
        "Framed envelope"
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let sizes = self
            .sizes
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(" / ");
        let mut fields = vec![
            ("size copies", sizes),
            ("size", format!("{} (unanimous: {})", self.size, self.unanimous)),
            ("crc", format!("{:#06x}", self.crc)),
            (
                "computed crc",
                format!(
                    "{:#06x} ({})",
                    self.computed_crc,
                    if self.crc_ok { "ok" } else { "MISMATCH" }
                ),
            ),
            ("trailing bytes", self.trailing.to_string()),
            ("payload", self.payload.clone()),
        ];
        match &self.header {
            Some(h) => fields.push((
                "header",
                format!(
                    "{} service={} request={} sequence={}",
                    h.msg_type, h.service, h.request, h.sequence
                ),
            )),
            None => fields.push(("header", "unparsed".to_string())),
        }
        fields
    }
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let report = decode(&args)?;
    let code = if report.crc_ok { SUCCESS } else { DATA_INVALID };
    print_report(&report, format);
    Ok(code)
}

fn decode(args: &DecodeArgs) -> CliResult<DecodeReport> {
    let wire = parse_hex(&args.hex)?;
    let crc = Crc16::with_start(args.crc_start);
    let report = inspect_frame(&wire, &crc).map_err(|err| frame_error("decode", err))?;
    let payload = &wire[HEADER_SIZE..HEADER_SIZE + usize::from(report.size)];
    Ok(describe(&report, payload))
}

fn describe(report: &FrameReport, payload: &[u8]) -> DecodeReport {
    DecodeReport {
        sizes: report.header.sizes,
        size: report.size,
        unanimous: report.unanimous(),
        crc: report.header.crc,
        computed_crc: report.computed_crc,
        crc_ok: report.crc_ok(),
        trailing: report.trailing,
        payload: hex_bytes(payload),
        header: payload_header(payload),
    }
}

fn payload_header(payload: &[u8]) -> Option<PayloadHeader> {
    let mut buffer = MessageBuffer::new(payload.len());
    buffer.fill_from(payload).ok()?;
    let mut codec = Codec::with_buffer(buffer);
    let header = codec.start_read_message().ok()?;
    Some(PayloadHeader {
        service: header.service,
        request: header.request.to_string(),
        msg_type: format!("{:?}", header.msg_type),
        sequence: header.sequence,
    })
}

fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let input = input.trim();
    let input = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.is_empty() {
        return Err(CliError::new(USAGE, "no envelope bytes given"));
    }
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "hex input has an odd number of digits"));
    }
    digits
        .chunks_exact(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|text| u8::from_str_radix(text, 16).ok())
                .ok_or_else(|| {
                    CliError::new(
                        USAGE,
                        format!("invalid hex byte {:?}", String::from_utf8_lossy(pair)),
                    )
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rpcprims_codec::{Hash, MessageHeader, MessageType};
    use rpcprims_frame::encode_frame;

    use super::*;

    fn wire_hex(payload: &[u8]) -> String {
        let mut wire = BytesMut::new();
        encode_frame(payload, &Crc16::default(), &mut wire).unwrap();
        hex_bytes(&wire)
    }

    fn args(hex: String) -> DecodeArgs {
        DecodeArgs {
            hex,
            crc_start: 0xEF4A,
        }
    }

    #[test]
    fn parse_hex_ignores_separators() {
        assert_eq!(parse_hex("0x0a:FF 00").unwrap(), vec![0x0a, 0xff, 0x00]);
        assert_eq!(parse_hex("abc").unwrap_err().code, USAGE);
        assert_eq!(parse_hex("zz").unwrap_err().code, USAGE);
        assert_eq!(parse_hex("  ").unwrap_err().code, USAGE);
    }

    #[test]
    fn well_formed_envelope_reports_header() {
        let mut codec = Codec::with_buffer(MessageBuffer::new(32));
        codec.start_write_message(&MessageHeader::new(
            MessageType::Invocation,
            2,
            Hash(0x1234),
            9,
        ));
        codec.write(7u16);
        let payload = codec.buffer().unwrap().as_slice().to_vec();

        let report = decode(&args(wire_hex(&payload))).unwrap();
        assert!(report.crc_ok);
        assert!(report.unanimous);
        assert_eq!(usize::from(report.size), payload.len());
        assert_eq!(
            report.header,
            Some(PayloadHeader {
                service: 2,
                request: Hash(0x1234).to_string(),
                msg_type: "Invocation".to_string(),
                sequence: 9,
            })
        );
    }

    #[test]
    fn wrong_crc_start_is_flagged() {
        let report = decode(&DecodeArgs {
            crc_start: 0xFFFF,
            ..args(wire_hex(b"payload"))
        })
        .unwrap();
        assert!(!report.crc_ok);
        assert_eq!(report.header, None);
    }

    #[test]
    fn truncated_envelope_is_data_invalid() {
        let hex = wire_hex(b"payload");
        let err = decode(&args(hex[..hex.len() - 3].to_string())).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
    }
}
