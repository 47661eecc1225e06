// src/types.rs
use ethers::types::{Address, Bytes, U256};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};

use crate::contracts;
use crate::error::BundlerError;

/// A signed ERC-4337 user operation as accepted over JSON-RPC.
///
/// All eleven fields are required and unknown fields are rejected. Numeric
/// fields accept either a `0x` hex string or a JSON integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserOperation {
    pub sender: Address,
    #[serde(deserialize_with = "hex_or_number")]
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    #[serde(deserialize_with = "hex_or_number")]
    pub call_gas_limit: U256,
    #[serde(deserialize_with = "hex_or_number")]
    pub verification_gas_limit: U256,
    #[serde(deserialize_with = "hex_or_number")]
    pub pre_verification_gas: U256,
    #[serde(deserialize_with = "hex_or_number")]
    pub max_fee_per_gas: U256,
    #[serde(deserialize_with = "hex_or_number")]
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Parses a JSON value, mapping any shape or type mismatch to
    /// [`BundlerError::InvalidUserOperation`].
    pub fn from_json(value: serde_json::Value) -> Result<Self, BundlerError> {
        if !value.is_object() {
            return Err(BundlerError::InvalidUserOperation(
                "user operation must be an object".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| BundlerError::InvalidUserOperation(e.to_string()))
    }
}

impl From<UserOperation> for contracts::UserOperation {
    fn from(op: UserOperation) -> Self {
        Self {
            sender: op.sender,
            nonce: op.nonce,
            init_code: op.init_code,
            call_data: op.call_data,
            call_gas_limit: op.call_gas_limit,
            verification_gas_limit: op.verification_gas_limit,
            pre_verification_gas: op.pre_verification_gas,
            max_fee_per_gas: op.max_fee_per_gas,
            max_priority_fee_per_gas: op.max_priority_fee_per_gas,
            paymaster_and_data: op.paymaster_and_data,
            signature: op.signature,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrNumber {
    Hex(String),
    Number(serde_json::Number),
}

fn hex_or_number<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let not_hex = |s: &str| D::Error::custom(format!("{s} is not a hex string"));
    match HexOrNumber::deserialize(deserializer) {
        // Decimal digits as written, so integers wider than u64 survive.
        Ok(HexOrNumber::Number(n)) => U256::from_dec_str(&n.to_string())
            .map_err(|_| D::Error::custom(format!("{n} is not an unsigned 256-bit integer"))),
        Ok(HexOrNumber::Hex(s)) => match s.strip_prefix("0x") {
            Some(digits) if !digits.is_empty() => {
                U256::from_str_radix(digits, 16).map_err(|_| not_hex(&s))
            }
            _ => Err(not_hex(&s)),
        },
        Err(_) => Err(D::Error::custom(
            "expected a hex string or an unsigned integer",
        )),
    }
}

/// Snapshot of the bundler's capacity, served by `bundler_health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub total_accounts: usize,
    pub available_accounts: usize,
    pub pending_transactions: usize,
}
