use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("network error: {0}")]
    Network(#[from] tangle_network::NetworkError),

    #[error("milestone confirmation failed: {0}")]
    WhiteFlag(#[from] tangle_ledger::WhiteFlagError),

    #[error("store error: {0}")]
    Store(#[from] tangle_store::StoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node already started")]
    AlreadyStarted,
}
