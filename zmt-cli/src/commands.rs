//! Command execution.

use crate::Commands;
use colored::Colorize;
use zmt_client::{AfDataRequest, Client, EndpointRegistration, ResetKind, ScanParams};
use zmt_protocol::{Frame, Status, Subsystem};

/// Raw bytes given on the command line as hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        // Handled by main.rs
        Commands::Repl | Commands::Events => unreachable!(),

        Commands::Ping => {
            let bits = client.ping().await?;
            Ok(format!(
                "{} capabilities 0x{:04X} ({})",
                "PONG".green(),
                bits,
                capability_names(bits).join(", ")
            ))
        }

        Commands::Version => {
            let v = client.version().await?;
            Ok(format!(
                "transport {} product {} version {}.{}.{}",
                v.transport_rev, v.product, v.major, v.minor, v.maint
            ))
        }

        Commands::GetExtAddr => Ok(format_ieee(&client.get_ext_addr().await?)
            .cyan()
            .to_string()),

        Commands::SetExtAddr { addr } => Ok(format_status(client.set_ext_addr(addr).await?)),

        Commands::Random => Ok(format!("0x{:04X}", client.random().await?)),

        Commands::TxPower { dbm } => {
            let applied = client.set_tx_power(dbm).await?;
            if applied == dbm {
                Ok(format!("{} dBm", applied))
            } else {
                Ok(format!(
                    "{} dBm ({} {} dBm)",
                    applied,
                    "requested".yellow(),
                    dbm
                ))
            }
        }

        Commands::Reset { soft } => {
            let kind = if soft { ResetKind::Soft } else { ResetKind::Hard };
            let ind = client.reset(kind).await?;
            let v = ind.version;
            Ok(format!(
                "{} reason {} (product {} version {}.{}.{})",
                "RESET_IND".green(),
                ind.reason,
                v.product,
                v.major,
                v.minor,
                v.maint
            ))
        }

        Commands::DeviceInfo => {
            let info = client.device_info().await?;
            let mut output = format!(
                "{}\n  IEEE:     {}\n  Short:    0x{:04X}\n  Type:     {}\n  State:    {}\n  Children: {}",
                format_status(info.status),
                format_ieee(&info.ieee_addr).cyan(),
                info.short_addr,
                device_type_names(info.device_type),
                info.device_state,
                info.associated.len()
            );
            for addr in &info.associated {
                output.push_str(&format!("\n    0x{:04X}", addr));
            }
            Ok(output)
        }

        Commands::NvInfo => {
            let nv = client.nv_info().await?;
            Ok(format!(
                "{}\n  IEEE:     {}\n  Channels: 0x{:08X}\n  PAN ID:   0x{:04X}\n  Security: {}\n  Key:      {}",
                format_status(nv.status),
                format_ieee(&nv.ieee_addr).cyan(),
                nv.channel_mask,
                nv.pan_id,
                nv.security_level,
                hex::encode(nv.precfg_key).dimmed()
            ))
        }

        Commands::SetPanId { pan_id } => Ok(format_status(client.set_pan_id(pan_id).await?)),

        Commands::SetChannels { mask } => Ok(format_status(client.set_channels(mask).await?)),

        Commands::TimeAlive => Ok(format!("{} s", client.time_alive().await?)),

        Commands::Loopback { data } => Ok(hex::encode(client.loopback(&data.0).await?)),

        Commands::Subscribe { subsystem, disable } => {
            let target = parse_subsystem_arg(&subsystem)?;
            Ok(format_status(client.callback_subscribe(target, !disable).await?))
        }

        Commands::Scan {
            channels,
            scan_type,
            duration,
            max_results,
        } => {
            let params = ScanParams {
                channels,
                scan_type,
                duration,
                max_results,
                ..Default::default()
            };
            Ok(format_status(client.mac_scan(&params).await?))
        }

        Commands::AfRegister {
            endpoint,
            profile,
            device_id,
            input,
            output,
        } => {
            let reg = EndpointRegistration {
                endpoint,
                profile_id: profile,
                device_id,
                device_version: 0,
                latency: 0,
                input_clusters: input,
                output_clusters: output,
            };
            Ok(format_status(client.af_register(&reg).await?))
        }

        Commands::AfSend {
            dst_addr,
            dst_endpoint,
            src_endpoint,
            cluster,
            data,
            trans_id,
            radius,
        } => {
            let req = AfDataRequest {
                dst_addr,
                dst_endpoint,
                src_endpoint,
                cluster_id: cluster,
                trans_id,
                options: 0,
                radius,
                data: data.0,
            };
            Ok(format_status(client.af_data_request(&req).await?))
        }

        Commands::NwkAddr {
            ieee,
            extended,
            start_index,
        } => Ok(format_status(
            client.zdo_nwk_addr_req(ieee, extended, start_index).await?,
        )),

        Commands::Raw { frame } => {
            let frame = Frame::decode(&frame.0)?;
            match client.raw(frame).await? {
                Some(rsp) => Ok(format_frame(&rsp)),
                None => Ok("Sent".dimmed().to_string()),
            }
        }
    }
}

/// Parses a subsystem name, or `all` for every subsystem.
pub fn parse_subsystem_arg(arg: &str) -> Result<Option<Subsystem>, String> {
    if arg.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    Subsystem::ALL
        .iter()
        .copied()
        .find(|s| s.name().eq_ignore_ascii_case(arg))
        .map(Some)
        .ok_or_else(|| format!("unknown subsystem '{}'", arg))
}

/// Names the subsystems whose capability bit is set.
pub fn capability_names(bits: u16) -> Vec<&'static str> {
    Subsystem::ALL
        .iter()
        .filter(|s| s.capability() != 0 && bits & s.capability() != 0)
        .map(|s| s.name())
        .collect()
}

fn device_type_names(bits: u8) -> String {
    let names: Vec<&str> = [(0x01, "coordinator"), (0x02, "router"), (0x04, "end device")]
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

fn format_status(status: Status) -> String {
    if status.is_success() {
        "OK".green().to_string()
    } else {
        format!("{} 0x{:02X}", "Status".red(), status.code())
    }
}

/// Formats a wire-order IEEE address most significant byte first.
pub fn format_ieee(addr: &[u8; 8]) -> String {
    addr.iter()
        .rev()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn format_frame(frame: &Frame) -> String {
    format!("{} [{}]", frame, hex::encode(&frame.payload))
}

/// Known callback names by subsystem and command id.
fn callback_name(subsystem: u8, command_id: u8) -> Option<&'static str> {
    let subsystem = Subsystem::from_id(subsystem)?;
    let name = match (subsystem, command_id) {
        (Subsystem::Sys, 0x80) => "RESET_IND",
        (Subsystem::Mac, 0x84) => "DATA_CNF",
        (Subsystem::Mac, 0x8B) => "BEACON_NOTIFY_IND",
        (Subsystem::Mac, 0x8C) => "SCAN_CNF",
        (Subsystem::Af, 0x80) => "DATA_CONFIRM",
        (Subsystem::Af, 0x81) => "INCOMING_MSG",
        (Subsystem::Zdo, 0x80) => "NWK_ADDR_RSP",
        (Subsystem::Zdo, 0x81) => "IEEE_ADDR_RSP",
        (Subsystem::Zdo, 0x82) => "NODE_DESC_RSP",
        (Subsystem::Zdo, 0x85) => "ACTIVE_EP_RSP",
        (Subsystem::Zdo, 0xC0) => "STATE_CHANGE_IND",
        (Subsystem::Zdo, 0xC1) => "END_DEVICE_ANNCE_IND",
        (Subsystem::Zdo, 0xCB) => "PERMIT_JOIN_IND",
        _ => return None,
    };
    Some(name)
}

/// Formats an AREQ callback for display.
pub fn format_callback(frame: &Frame) -> String {
    match callback_name(frame.subsystem, frame.command_id) {
        Some(name) => format!(
            "{} {} [{}]",
            frame
                .known_subsystem()
                .map(|s| s.name())
                .unwrap_or("?")
                .cyan(),
            name.green(),
            hex::encode(&frame.payload)
        ),
        None => format_frame(frame),
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

fn parse_number(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    let digits = strip_hex_prefix(trimmed);
    if digits.len() != trimmed.len() {
        u64::from_str_radix(digits, 16)
    } else {
        trimmed.parse()
    }
    .map_err(|e| format!("invalid number '{}': {}", s, e))
}

pub fn parse_u8(s: &str) -> Result<u8, String> {
    u8::try_from(parse_number(s)?).map_err(|_| format!("'{}' does not fit in a byte", s))
}

pub fn parse_u16(s: &str) -> Result<u16, String> {
    u16::try_from(parse_number(s)?).map_err(|_| format!("'{}' does not fit in 16 bits", s))
}

pub fn parse_u32(s: &str) -> Result<u32, String> {
    u32::try_from(parse_number(s)?).map_err(|_| format!("'{}' does not fit in 32 bits", s))
}

/// Parses hex with optional `0x` prefix and `:`, `-` or space separators.
pub fn parse_hex_bytes(s: &str) -> Result<HexBytes, String> {
    let cleaned: String = strip_hex_prefix(s.trim())
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .collect();
    hex::decode(&cleaned)
        .map(HexBytes)
        .map_err(|e| format!("invalid hex '{}': {}", s, e))
}

/// Parses an IEEE address written most significant byte first into wire order.
pub fn parse_ieee(s: &str) -> Result<[u8; 8], String> {
    let HexBytes(bytes) = parse_hex_bytes(s)?;
    let mut addr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| format!("IEEE address '{}' must be 8 bytes", s))?;
    addr.reverse();
    Ok(addr)
}
