use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenError {
    #[error("parse error in {file} line {line}: {msg}")]
    Parse {
        file: String,
        line: usize,
        msg: String,
    },

    #[error("bad address {addr}: {msg}")]
    AddressFormat { addr: String, msg: String },

    #[error("topology error: {0}")]
    TopologyConsistency(String),

    #[error("serialization failed for node {node}: {msg}")]
    Serialization { node: String, msg: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GenError>;
