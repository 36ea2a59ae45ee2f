// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// Flight data logger dialog driver
mod buffer;
mod protocol;
mod serial;
mod session;
mod uploader;

use clap::{Parser, Subcommand};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::fs::File;
use std::path::PathBuf;
use serial::RealSerialPort;
use session::Session;

#[derive(Parser)]
#[command(name = "loglink")]
#[command(about = "Answers flight data logger prompts and uploads data over RS-232", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Flow control (none, software, or hardware)
    #[arg(long, default_value = "none")]
    flow_control: String,

    /// Copy every byte received from the logger into FILE
    #[arg(long, value_name = "FILE")]
    dump: Option<PathBuf>,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the logger's prompts and upload a file line by line
    Upload {
        /// File to upload
        file: PathBuf,

        /// Menu entry to answer the program menu with
        #[arg(long, default_value_t = protocol::PROGRAM_CHOICE as char, value_name = "CHAR")]
        menu_choice: char,

        /// Seconds to wait for the logger to present a prompt
        #[arg(long, default_value = "30", value_name = "SECS")]
        prompt_wait: u32,
    },
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn parse_flow_control(flow: &str) -> Result<FlowControl, String> {
    match flow.to_lowercase().as_str() {
        "none" => Ok(FlowControl::None),
        "software" | "xonxoff" => Ok(FlowControl::Software),
        "hardware" | "rtscts" => Ok(FlowControl::Hardware),
        _ => Err(format!("Invalid flow control: {}. Must be 'none', 'software', or 'hardware'", flow)),
    }
}

fn parse_menu_choice(choice: char) -> Result<u8, String> {
    if choice.is_ascii_graphic() {
        Ok(choice as u8)
    } else {
        Err(format!("Invalid menu choice: {:?}. Must be a printable ASCII character", choice))
    }
}

fn exit_on_error<T>(result: Result<T, String>) -> T {
    result.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    })
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.debug { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .parse_default_env()
        .init();

    let data_bits = exit_on_error(parse_data_bits(cli.data_bits));
    let parity = exit_on_error(parse_parity(&cli.parity));
    let stop_bits = exit_on_error(parse_stop_bits(cli.stop_bits));
    let flow_control = exit_on_error(parse_flow_control(&cli.flow_control));

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits, flow_control);

    let serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits, flow_control) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    let mut session = match Session::open(Box::new(serial_port)) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Failed to start session: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(path) = &cli.dump {
        match File::create(path) {
            Ok(file) => session.attach_dump(Box::new(file)),
            Err(e) => {
                eprintln!("Failed to create dump file {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    }

    match cli.command {
        Commands::Upload { file, menu_choice, prompt_wait } => {
            let menu_choice = exit_on_error(parse_menu_choice(menu_choice));
            println!("\nUploading file: {}", file.display());
            if let Err(e) = upload_file(session, file, menu_choice, prompt_wait) {
                eprintln!("Upload failed: {}", e);
                std::process::exit(1);
            }
            println!("\nFile uploaded successfully!");
        }
    }
}

fn upload_file(session: Session, file: PathBuf, menu_choice: u8, prompt_wait: u32) -> Result<(), uploader::UploadError> {
    use uploader::UploadFsm;

    let lines = uploader::load_lines(&file)?;
    log::debug!("Loaded {} lines from {}", lines.len(), file.display());

    // One prompt poll per second of patience
    let max_prompt_polls = (prompt_wait as u64 / protocol::PROMPT_POLL.as_secs().max(1)) as u32;
    uploader::run(UploadFsm::new(session, lines, menu_choice, max_prompt_polls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_settings() {
        assert_eq!(parse_data_bits(7), Ok(DataBits::Seven));
        assert!(parse_data_bits(9).is_err());
        assert_eq!(parse_parity("EVEN"), Ok(Parity::Even));
        assert!(parse_parity("mark").is_err());
        assert_eq!(parse_stop_bits(2), Ok(StopBits::Two));
        assert!(parse_stop_bits(3).is_err());
        assert_eq!(parse_flow_control("rtscts"), Ok(FlowControl::Hardware));
        assert!(parse_flow_control("dtr").is_err());
    }

    #[test]
    fn test_parse_menu_choice() {
        assert_eq!(parse_menu_choice('P'), Ok(b'P'));
        assert!(parse_menu_choice(' ').is_err());
        assert!(parse_menu_choice('é').is_err());
    }

    #[test]
    fn test_upload_missing_file() {
        use serial::MockSerialPort;

        let session = Session::open(Box::new(MockSerialPort::new(Vec::new(), Vec::new()))).unwrap();
        let missing = std::env::temp_dir().join("loglink_missing_upload.txt");

        match upload_file(session, missing, b'P', 5) {
            Err(uploader::UploadError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            Err(e) => panic!("Expected NotFound, got {}", e),
            Ok(()) => panic!("Upload of a missing file succeeded"),
        }
    }

    #[test]
    fn test_cli_parses_upload() {
        let cli = Cli::try_parse_from(["loglink", "--port", "/dev/ttyUSB0", "upload", "flight.txt"]).unwrap();
        assert_eq!(cli.baud, 9600);
        match cli.command {
            Commands::Upload { file, menu_choice, prompt_wait } => {
                assert_eq!(file, PathBuf::from("flight.txt"));
                assert_eq!(menu_choice, 'P');
                assert_eq!(prompt_wait, 30);
            }
        }
    }
}
