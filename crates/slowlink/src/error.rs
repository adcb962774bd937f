use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FabricError {
    #[error(transparent)]
    Net(#[from] slowlink_net::NetError),
    #[error("log io: {0}")]
    Io(#[from] io::Error),
    #[error("serializing tabular row: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad bind address {0:?}")]
    BindAddr(String),
}
