// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use ctnat::api::RateLimitCfg;
use ctnat::engine::rate::RateLimit;
use ctnat::print::print_conns;
use ctnat::print::print_rules;
use ctnat::provider::LogRef;
use ctnat::provider::PrintlnLog;
use ctnat::provider::null_log;
use ctnatadm::CtnatAdm;
use ctnatadm::read_pcap;

/// Drive the connection tracking and NAT engine offline.
#[derive(Debug, Parser)]
#[command(version)]
enum Command {
    /// Validate a configuration file and list the rules it defines.
    CheckConfig { path: PathBuf },

    /// Replay a packet capture through the engine a configuration
    /// describes, then dump the connection table.
    Replay {
        #[arg(short)]
        config: PathBuf,

        pcap: PathBuf,

        /// Take an interface down once the capture has been replayed.
        #[arg(long = "if-down", value_name = "NAME")]
        if_down: Vec<String>,

        /// Dump the connection table as JSON.
        #[arg(long)]
        json: bool,

        /// Print engine log messages.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check a rate of the form `RATE[,burst=N]`, e.g. `10/sec,burst=5`.
    CheckRate { rate: RateLimitCfg },
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();
    match cmd {
        Command::CheckConfig { path } => {
            let hdl = CtnatAdm::open(&path, null_log())?;
            print_rules(hdl.rules())?;
        }

        Command::Replay { config, pcap, if_down, json, verbose } => {
            let log: LogRef =
                if verbose { Arc::new(PrintlnLog) } else { null_log() };
            let hdl = CtnatAdm::open(&config, log)?;

            let bytes = std::fs::read(&pcap)?;
            let mut pkts = read_pcap(&bytes)?;
            let stats = hdl.replay(&mut pkts);

            for name in &if_down {
                let n = hdl.interface_down(name)?;
                eprintln!("{name} down: evicted {n} connections");
            }

            let dump = hdl.dump();
            if json {
                println!("{}", serde_json::to_string_pretty(&dump)?);
            } else {
                print!("{stats}");
                println!();
                print_conns(&dump)?;
            }
        }

        Command::CheckRate { rate } => {
            RateLimit::new(rate)?;
            println!("{rate}");
        }
    }

    Ok(())
}
