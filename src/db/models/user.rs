use serde::{Deserialize, Serialize};

/// Account holder. Balance is fixed-point USD with 6 decimals, stored as
/// integer micro-dollars so ledger arithmetic is exact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    /// Absent for social-login users.
    pub password_hash: Option<String>,
    pub email_verified_at: Option<String>,
    pub is_admin: bool,
    pub balance_usd_micros: i64,
    /// Sessions issued before this instant are invalid (bumped on demotion).
    pub token_invalidated_before: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserInput {
    pub email: String,
    pub password_hash: Option<String>,
    pub is_admin: Option<bool>,
}
