// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line definition.

use std::net::IpAddr;

use clap::{Args, Parser, Subcommand};

use bonwerk_core::error::Result;
use bonwerk_core::{PrinterConfig, PrinterProfile, TransportKind};
use bonwerk_print::ScanSelector;

#[derive(Parser)]
#[command(name = "bonwerk")]
#[command(about = "Find receipt printers and send print jobs to them.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover printers: network, zeroconf, bluetooth, usb, serial or all
    Scan {
        #[arg(default_value = "all")]
        selector: ScanSelector,
        /// Stop scanning after this many seconds
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Print lines of text
    Print {
        #[command(flatten)]
        printer: PrinterArgs,
        /// Lines to print, in order
        #[arg(required = true)]
        lines: Vec<String>,
        /// Cut the paper after the last line
        #[arg(long)]
        cut: bool,
        /// Open the cash drawer after the last line
        #[arg(long)]
        drawer: bool,
        #[arg(long, default_value = "")]
        tag: String,
    },
    /// Print a sample receipt
    TestPrint {
        #[command(flatten)]
        printer: PrinterArgs,
    },
    /// Open and close a connection to a printer
    TestConnection {
        #[command(flatten)]
        printer: PrinterArgs,
    },
    /// Ask a network printer for its model
    Model {
        ip: IpAddr,
        #[arg(default_value_t = bonwerk_core::DEFAULT_PRINTER_PORT)]
        port: u16,
    },
    /// Run jobs left unfinished by an earlier run
    Resume,
    /// List stored jobs
    Jobs,
    /// Remove finished jobs
    Prune,
}

/// Printer selection shared by the printing commands.
#[derive(Args)]
pub struct PrinterArgs {
    /// network, bluetooth, usb or serial
    #[arg(long, short = 't')]
    pub transport: TransportKind,
    /// IP address, MAC address, USB device name or serial port path
    #[arg(long, short = 'a')]
    pub address: String,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub baud_rate: Option<u32>,
    #[arg(long)]
    pub dpi: Option<u32>,
    /// Printable width in millimetres
    #[arg(long)]
    pub width: Option<f32>,
    #[arg(long)]
    pub max_chars: Option<u32>,
}

impl PrinterArgs {
    pub fn profile(&self) -> Result<PrinterProfile> {
        PrinterProfile::from_config(&PrinterConfig {
            connection: Some(self.transport),
            address: Some(self.address.clone()),
            port: self.port,
            baud_rate: self.baud_rate,
            dpi: self.dpi,
            width: self.width,
            max_chars: self.max_chars,
        })
    }
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
