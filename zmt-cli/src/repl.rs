//! Interactive REPL.

use crate::commands::{self, format_callback};
use crate::Commands;
use clap::Parser;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use zmt_client::Client;
use zmt_protocol::Frame;

const HELP_TEXT: &str = r#"
Available commands:
  help                              Show this help
  ping                              Served subsystems
  version                           Firmware version
  get-ext-addr | set-ext-addr <ieee>
  random                            SYS RANDOM
  tx-power <dbm>                    Set transmit power
  reset [--soft]                    Reset and wait for RESET_IND

  device-info | nv-info
  set-pan-id <id> | set-channels <mask>
  time-alive
  loopback <hex>
  subscribe <subsystem|all> [--disable]

  scan [--channels <mask>] [--scan-type <n>]
  af-register <ep> [--in <ids>] [--out <ids>]
  af-send <dst> <dst_ep> <src_ep> <cluster> <hex>
  nwk-addr <ieee> [--extended]
  raw <hex frame>

  Callbacks received since the last command are printed after each command.
  <command> --help shows its options.

  quit, exit                        Exit the REPL
"#;

/// One REPL line, parsed with the same definitions as the command line.
#[derive(Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct ReplLine {
    #[command(subcommand)]
    command: Commands,
}

pub async fn run(client: Client, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "zmt CLI".bold().cyan());
    println!("Connecting to {}...", addr);

    client.connect().await?;
    println!("{}", "Connected!".green());

    let mut callbacks = client.subscribe_callbacks();
    let conn = client.connection();
    tokio::spawn(async move {
        let _ = conn.read_loop().await;
    });

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = home::home_dir()
        .map(|h| h.join(".zmt_history"))
        .unwrap_or_else(|| ".zmt_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "zmt>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&client, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }

                for frame in drain_callbacks(&mut callbacks) {
                    println!("{} {}", "<-".dimmed(), format_callback(&frame));
                }

                if !client.is_connected() {
                    println!("{}", "Connection lost".red());
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    let _ = client.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

fn drain_callbacks(rx: &mut broadcast::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(frame) => frames.push(frame),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                println!("{}: lagged {} callbacks", "Warning".yellow(), n);
            }
            Err(_) => return frames,
        }
    }
}

async fn execute_repl_command(
    client: &Client,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    match parts[0].to_lowercase().as_str() {
        "help" | "?" => return Ok(Some(HELP_TEXT.to_string())),
        "quit" | "exit" | "q" => return Ok(None),
        _ => {}
    }

    let parsed = match ReplLine::try_parse_from(parts.iter().copied()) {
        Ok(parsed) => parsed,
        // Usage and --help output
        Err(e) => return Ok(Some(e.to_string())),
    };

    match parsed.command {
        Commands::Repl => Ok(Some("Already in the REPL".yellow().to_string())),
        Commands::Events => Ok(Some(
            "Callbacks are printed after each command here; use `zmt-cli events` to tail them"
                .dimmed()
                .to_string(),
        )),
        cmd => commands::execute(client, cmd).await.map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repl_line_parsing() {
        let parsed = ReplLine::try_parse_from(["set-pan-id", "0x1A62"]).unwrap();
        assert!(matches!(parsed.command, Commands::SetPanId { pan_id: 0x1A62 }));

        let parsed = ReplLine::try_parse_from(["subscribe", "af", "--disable"]).unwrap();
        assert!(matches!(
            parsed.command,
            Commands::Subscribe { disable: true, .. }
        ));

        assert!(ReplLine::try_parse_from(["set-pan-id"]).is_err());
        assert!(ReplLine::try_parse_from(["bogus"]).is_err());
    }
}
