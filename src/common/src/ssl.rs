// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

#[cfg(feature = "boringssl")]
use net::TlsTcpAcceptor;
#[cfg(feature = "boringssl")]
use std::io::{Error, ErrorKind};

pub trait TlsConfig {
    fn certificate_chain(&self) -> Option<String>;

    fn private_key(&self) -> Option<String>;

    fn certificate(&self) -> Option<String>;

    fn ca_file(&self) -> Option<String>;
}

/// Create a TLS acceptor from the given `TlsConfig`. Returns an error for an
/// under-specified configuration. The `None` variant indicates that TLS
/// should not be used.
#[cfg(feature = "boringssl")]
pub fn tls_acceptor(config: &dyn TlsConfig) -> Result<Option<TlsTcpAcceptor>, std::io::Error> {
    let mut builder = TlsTcpAcceptor::mozilla_intermediate_v5()?;

    // xor catches an under-specified tls configuration
    if config.private_key().is_some()
        ^ (config.certificate_chain().is_some() || config.certificate().is_some())
    {
        return Err(Error::new(ErrorKind::Other, "incomplete tls configuration"));
    }

    // the private key is required, so `Ok(None)` if it is not specified
    if let Some(f) = config.private_key() {
        builder = builder.private_key_file(f);
    } else {
        return Ok(None);
    }

    if let Some(f) = config.ca_file() {
        builder = builder.ca_file(f);
    }

    if let Some(f) = config.certificate() {
        builder = builder.certificate_file(f);
    }

    if let Some(f) = config.certificate_chain() {
        builder = builder.certificate_chain_file(f);
    }

    Ok(Some(builder.build()?))
}

/// Without the `boringssl` feature there is never an acceptor; plaintext TCP
/// is used regardless of the tls config section.
#[cfg(not(feature = "boringssl"))]
pub fn tls_acceptor(
    config: &dyn TlsConfig,
) -> Result<Option<net::TlsTcpAcceptor>, std::io::Error> {
    if config.private_key().is_some() {
        log::warn!("tls configured but this build does not include boringssl");
    }
    Ok(None)
}
