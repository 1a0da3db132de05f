// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Mcbpserver is a key-value server speaking the memcached binary protocol
//! (MCBP), including the DCP replication sub-protocol, sub-document
//! operations and external authentication. Storage is provided by the
//! in-memory engine; the frontend is the interesting part.

use backtrace::Backtrace;
use clap::{Arg, Command};
use config::McbpserverConfig;
use logger::configure_logging;
use server::ProcessBuilder;

fn main() {
    // custom panic hook to terminate the whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{}", s);
        eprintln!("{:?}", Backtrace::new());
        std::process::exit(101);
    }));

    let matches = Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about(
            "A key-value server speaking the memcached binary protocol, \
            with DCP replication, sub-document operations and pluggable \
            external authentication.\n\n\
            The binary takes a single optional argument which is the path \
            to a TOML config file. With no config file, it listens on \
            0.0.0.0:12000 and serves the default bucket.",
        )
        .arg(
            Arg::new("CONFIG")
                .help("Server configuration file")
                .index(1),
        )
        .get_matches();

    let config = if let Some(file) = matches.get_one::<String>("CONFIG") {
        match McbpserverConfig::load(file) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error loading config file: {}", file);
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        Default::default()
    };

    let log_drain = configure_logging(&config);

    let process = match ProcessBuilder::new(&config, log_drain) {
        Ok(builder) => builder.spawn(),
        Err(e) => {
            eprintln!("failed to launch: {}", e);
            std::process::exit(1);
        }
    };

    process.wait();
}
