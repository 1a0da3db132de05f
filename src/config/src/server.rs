// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use std::net::{AddrParseError, SocketAddr};

use serde::{Deserialize, Serialize};

// constants to define default values
const SERVER_HOST: &str = "0.0.0.0";
const SERVER_PORT: &str = "12000";
const SERVER_TIMEOUT: usize = 100;
const SERVER_NEVENT: usize = 1024;

// helper functions for default values
fn host() -> String {
    SERVER_HOST.to_string()
}

fn port() -> String {
    SERVER_PORT.to_string()
}

fn timeout() -> usize {
    SERVER_TIMEOUT
}

fn nevent() -> usize {
    SERVER_NEVENT
}

// definitions
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Server {
    #[serde(default = "host")]
    host: String,
    #[serde(default = "port")]
    port: String,
    #[serde(default = "timeout")]
    timeout: usize,
    #[serde(default = "nevent")]
    nevent: usize,
}

// implementation
impl Server {
    pub fn host(&self) -> String {
        self.host.clone()
    }

    pub fn port(&self) -> String {
        self.port.clone()
    }

    pub fn set_host(&mut self, host: String) {
        self.host = host;
    }

    pub fn set_port(&mut self, port: String) {
        self.port = port;
    }

    /// Return the result of parsing the host and port
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host(), self.port()).parse()
    }

    /// poll timeout in milliseconds
    pub fn timeout(&self) -> usize {
        self.timeout
    }

    pub fn nevent(&self) -> usize {
        self.nevent
    }
}

// trait implementations
impl Default for Server {
    fn default() -> Self {
        Self {
            host: host(),
            port: port(),
            timeout: timeout(),
            nevent: nevent(),
        }
    }
}

pub trait ServerConfig {
    fn server(&self) -> &Server;
}
