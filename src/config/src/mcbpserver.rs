// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;

use serde::{Deserialize, Serialize};

use std::io::Read;

// struct definitions
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct McbpserverConfig {
    // application modules
    #[serde(default)]
    server: Server,
    #[serde(default)]
    worker: Worker,
    #[serde(default)]
    tls: Tls,
    #[serde(default)]
    debug: Debug,
    #[serde(default)]
    mcbp: Mcbp,
    #[serde(default)]
    bucket: Bucket,
    #[serde(default)]
    extauth: ExternalAuth,
}

impl ServerConfig for McbpserverConfig {
    fn server(&self) -> &Server {
        &self.server
    }
}

impl WorkerConfig for McbpserverConfig {
    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn worker_mut(&mut self) -> &mut Worker {
        &mut self.worker
    }
}

impl TlsConfig for McbpserverConfig {
    fn tls(&self) -> &Tls {
        &self.tls
    }
}

impl DebugConfig for McbpserverConfig {
    fn debug(&self) -> &Debug {
        &self.debug
    }
}

impl McbpConfig for McbpserverConfig {
    fn mcbp(&self) -> &Mcbp {
        &self.mcbp
    }
}

impl BucketConfig for McbpserverConfig {
    fn bucket(&self) -> &Bucket {
        &self.bucket
    }
}

impl ExternalAuthConfig for McbpserverConfig {
    fn extauth(&self) -> &ExternalAuth {
        &self.extauth
    }
}

// implementation
impl McbpserverConfig {
    pub fn load(file: &str) -> Result<Self, std::io::Error> {
        let mut file = std::fs::File::open(file)?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        match toml::from_str(&content) {
            Ok(t) => Ok(t),
            Err(e) => {
                error!("{}", e);
                Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "Error parsing config",
                ))
            }
        }
    }

    pub fn server_mut(&mut self) -> &mut Server {
        &mut self.server
    }

    pub fn bucket_mut(&mut self) -> &mut Bucket {
        &mut self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = McbpserverConfig::default();
        assert_eq!(config.worker().threads(), 4);
        assert!(config.bucket().default_bucket_enabled());
        assert!(config.mcbp().idle_timeout().is_none());
    }

    #[test]
    fn parse_partial_toml() {
        let config: McbpserverConfig = toml::from_str(
            r#"
            [server]
            port = "12345"

            [worker]
            threads = 2

            [mcbp]
            max_packet_size = 1048576
            idle_timeout = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.server().port(), "12345");
        assert_eq!(config.worker().threads(), 2);
        assert_eq!(config.mcbp().max_packet_size(), 1024 * 1024);
        assert_eq!(config.mcbp().idle_timeout(), Some(60));
        // untouched sections fall back to defaults
        assert_eq!(config.mcbp().stuck_limit_ready(), 29);
    }
}
