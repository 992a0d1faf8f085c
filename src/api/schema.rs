use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query string accepted when submitting blocks and transactions
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PropagateQuery {
    /// Forward the item to every known peer once accepted
    #[serde(default)]
    pub propagate: bool,
}

/// Body returned with every rejection
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Why the request was refused
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl ToString) -> Self {
        ErrorResponse {
            error: error.to_string(),
        }
    }
}

/// Confirmed balance of one account
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    /// The account address
    pub address: String,

    /// The confirmed balance
    pub balance: f64,
}

/// State of the mining loop
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MinerStatus {
    pub running: bool,
}
