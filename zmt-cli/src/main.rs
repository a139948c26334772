//! zmt-cli - Command-line interface for zmt
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zmt_client::{Client, ConnectionConfig};
use zmt_protocol::DEFAULT_PORT;

use commands::{parse_hex_bytes, parse_ieee, parse_u16, parse_u32, parse_u8, HexBytes};

#[derive(Parser)]
#[command(name = "zmt-cli")]
#[command(about = "Command-line interface for the zmt MT bridge")]
#[command(version)]
struct Cli {
    /// Bridge host
    #[arg(long, default_value = "127.0.0.1", env = "ZMT_HOST")]
    host: String,

    /// Bridge port
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "ZMT_PORT")]
    port: u16,

    /// SRSP wait in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl,

    /// SYS PING: list the subsystems the bridge serves
    Ping,

    /// SYS VERSION
    Version,

    /// SYS GET_EXTADDR
    GetExtAddr,

    /// SYS SET_EXTADDR
    SetExtAddr {
        /// IEEE address, most significant byte first (00:12:4b:00:01:02:03:04)
        #[arg(value_parser = parse_ieee)]
        addr: [u8; 8],
    },

    /// SYS RANDOM
    Random,

    /// SYS SET_TX_POWER
    TxPower {
        /// Requested power in dBm
        #[arg(allow_negative_numbers = true)]
        dbm: i8,
    },

    /// SYS RESET_REQ, then wait for RESET_IND
    Reset {
        /// Soft reset instead of hard
        #[arg(long)]
        soft: bool,
    },

    /// UTIL GET_DEVICE_INFO
    DeviceInfo,

    /// UTIL GET_NV_INFO
    NvInfo,

    /// UTIL SET_PANID
    SetPanId {
        #[arg(value_parser = parse_u16)]
        pan_id: u16,
    },

    /// UTIL SET_CHANNELS
    SetChannels {
        /// Channel bit mask (0x00000800 is channel 11)
        #[arg(value_parser = parse_u32)]
        mask: u32,
    },

    /// UTIL TIME_ALIVE
    TimeAlive,

    /// UTIL TEST_LOOPBACK
    Loopback {
        /// Payload as hex
        #[arg(value_parser = parse_hex_bytes)]
        data: HexBytes,
    },

    /// UTIL CALLBACK_SUB_CMD
    Subscribe {
        /// Subsystem name (SYS, MAC, AF, ZDO, UTIL...) or "all"
        subsystem: String,

        /// Stop forwarding instead of starting
        #[arg(long)]
        disable: bool,
    },

    /// MAC SCAN_REQ
    Scan {
        /// Channel bit mask
        #[arg(long, value_parser = parse_u32, default_value = "0x07FFF800")]
        channels: u32,

        /// 0 energy detect, 1 active, 2 passive, 3 orphan
        #[arg(long, default_value_t = 0)]
        scan_type: u8,

        /// Scan duration exponent
        #[arg(long, default_value_t = 3)]
        duration: u8,

        /// Maximum results to report
        #[arg(long, default_value_t = 16)]
        max_results: u8,
    },

    /// AF REGISTER
    AfRegister {
        #[arg(value_parser = parse_u8)]
        endpoint: u8,

        #[arg(long, value_parser = parse_u16, default_value = "0x0104")]
        profile: u16,

        #[arg(long, value_parser = parse_u16, default_value = "0x0005")]
        device_id: u16,

        /// Input clusters
        #[arg(long = "in", value_parser = parse_u16, value_delimiter = ',')]
        input: Vec<u16>,

        /// Output clusters
        #[arg(long = "out", value_parser = parse_u16, value_delimiter = ',')]
        output: Vec<u16>,
    },

    /// AF DATA_REQUEST
    AfSend {
        #[arg(value_parser = parse_u16)]
        dst_addr: u16,

        #[arg(value_parser = parse_u8)]
        dst_endpoint: u8,

        #[arg(value_parser = parse_u8)]
        src_endpoint: u8,

        #[arg(value_parser = parse_u16)]
        cluster: u16,

        /// Payload as hex
        #[arg(value_parser = parse_hex_bytes)]
        data: HexBytes,

        #[arg(long, default_value_t = 0)]
        trans_id: u8,

        #[arg(long, default_value_t = 30)]
        radius: u8,
    },

    /// ZDO NWK_ADDR_REQ
    NwkAddr {
        /// IEEE address, most significant byte first
        #[arg(value_parser = parse_ieee)]
        ieee: [u8; 8],

        /// Ask for the associated device list as well
        #[arg(long)]
        extended: bool,

        #[arg(long, default_value_t = 0)]
        start_index: u8,
    },

    /// Send a raw frame given as hex (length byte, cmd0, cmd1, payload)
    Raw {
        #[arg(value_parser = parse_hex_bytes)]
        frame: HexBytes,
    },

    /// Print AREQ callbacks until interrupted
    Events,
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("cannot resolve {}", host).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let addr = resolve(&cli.host, cli.port)?;
    let config =
        ConnectionConfig::new(addr).with_request_timeout(Duration::from_millis(cli.timeout_ms));
    let client = Client::new(config);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, addr).await?;
        }
        Some(Commands::Events) => {
            client.connect().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            // Subscribe before the read loop starts so nothing is missed
            let mut callbacks = client.subscribe_callbacks();
            let conn = client.connection();
            tokio::spawn(async move {
                let _ = conn.read_loop().await;
            });

            eprintln!("{} callbacks from {}", "Watching".green(), addr);
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            loop {
                tokio::select! {
                    frame = callbacks.recv() => {
                        match frame {
                            Ok(frame) => println!("{}", commands::format_callback(&frame)),
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                eprintln!("{}: lagged {} callbacks", "Warning".yellow(), n);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                                eprintln!("{}", "Connection closed".red());
                                break;
                            }
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n{}", "Stopping...".dimmed());
                        break;
                    }
                }
            }

            client.close().await?;
        }
        Some(cmd) => {
            client.connect().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            let conn = client.connection();
            tokio::spawn(async move {
                let _ = conn.read_loop().await;
            });

            match commands::execute(&client, cmd).await {
                Ok(output) => println!("{}", output),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }

            client.close().await?;
        }
    }

    Ok(())
}
