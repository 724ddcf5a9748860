#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("configuration has no billing backends")]
    NoBackends,
    #[error("billing engine has stopped")]
    EngineStopped,
    #[error("consume ledger: {0}")]
    Ledger(#[from] sled::Error),
}
