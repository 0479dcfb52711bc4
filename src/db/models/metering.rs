use serde::{Deserialize, Serialize};

/// One row per metered provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmUsageRecord {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub model: String,
    pub task_type: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub raw_cost_usd_micros: i64,
    pub billed_cost_usd_micros: i64,
    pub margin_multiplier: f64,
    pub created_at: String,
}

/// Ledger entry. The sum over a user's transactions equals that user's
/// balance, to the last micro-dollar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: String,
    pub user_id: String,
    /// Signed micro-USD; debits are negative.
    pub amount_usd_micros: i64,
    /// purchase | usage_debit | admin_grant | refund
    pub transaction_type: String,
    pub reference_id: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
}

pub const TXN_PURCHASE: &str = "purchase";
pub const TXN_USAGE_DEBIT: &str = "usage_debit";
pub const TXN_ADMIN_GRANT: &str = "admin_grant";
pub const TXN_REFUND: &str = "refund";

/// Micro-USD per whole dollar. 6 decimal places of fixed-point precision.
pub const USD_MICROS: i64 = 1_000_000;

/// Render micro-USD as a decimal dollar string, e.g. -3250 → "-0.003250".
pub fn format_usd_micros(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    format!("{sign}{}.{:06}", abs / USD_MICROS as u64, abs % USD_MICROS as u64)
}

/// Token cost in micro-USD for a per-1k-token rate, rounded half-up.
pub fn token_cost_micros(tokens: i64, cost_per_1k_micros: i64) -> i64 {
    let numer = tokens as i128 * cost_per_1k_micros as i128;
    ((numer + 500) / 1000) as i64
}

/// Apply a margin multiplier to a raw micro-USD cost, rounded half-up.
pub fn apply_margin(raw_micros: i64, margin: f64) -> i64 {
    (raw_micros as f64 * margin).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_usd_micros() {
        assert_eq!(format_usd_micros(10_000_000), "10.000000");
        assert_eq!(format_usd_micros(-3_250), "-0.003250");
        assert_eq!(format_usd_micros(0), "0.000000");
    }

    #[test]
    fn test_token_cost_micros() {
        // 1000 tokens at $0.001/1k = $0.001 = 1000 micros
        assert_eq!(token_cost_micros(1000, 1_000), 1_000);
        // 500 tokens at $0.003/1k = $0.0015 = 1500 micros
        assert_eq!(token_cost_micros(500, 3_000), 1_500);
        assert_eq!(token_cost_micros(0, 3_000), 0);
    }

    #[test]
    fn test_apply_margin() {
        // 2500 micros × 1.30 = 3250 micros
        assert_eq!(apply_margin(2_500, 1.30), 3_250);
        assert_eq!(apply_margin(0, 2.0), 0);
    }
}
