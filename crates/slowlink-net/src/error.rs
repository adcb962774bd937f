use std::{io, net::SocketAddr};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("{host}:{port} did not resolve to any address")]
    NoAddress { host: String, port: u16 },
}
