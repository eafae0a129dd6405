//! Chain value types shared by accounts, the orchestrator and the reconciler.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use alloy_primitives::{U256, keccak256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The Starknet field prime, `2^251 + 17 * 2^192 + 1`.
pub static FIELD_PRIME: LazyLock<U256> =
    LazyLock::new(|| (U256::from(1u8) << 251) + (U256::from(17u8) << 192) + U256::from(1u8));

/// Entry point selectors are keccak digests truncated to 250 bits.
static SELECTOR_MASK: LazyLock<U256> = LazyLock::new(|| (U256::from(1u8) << 250) - U256::from(1u8));

static LOW_128_MASK: LazyLock<U256> = LazyLock::new(|| U256::from(u128::MAX));

/// A field element: addresses, hashes and calldata words.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Felt(U256);

impl Felt {
    pub const ZERO: Felt = Felt(U256::ZERO);

    /// Wrap a value, rejecting anything at or above the field prime.
    pub fn from_u256(value: U256) -> Result<Self, String> {
        if value >= *FIELD_PRIME {
            return Err(format!("0x{value:x} is not a field element"));
        }
        Ok(Self(value))
    }

    pub fn to_u256(self) -> U256 {
        self.0
    }

    /// Encode an ASCII string of at most 31 bytes as a felt (Cairo short string).
    pub fn from_short_string(s: &str) -> Result<Self, String> {
        if !s.is_ascii() {
            return Err(format!("short string {s:?} is not ASCII"));
        }
        if s.len() > 31 {
            return Err(format!("short string {s:?} is longer than 31 bytes"));
        }
        Ok(Self(U256::from_be_slice(s.as_bytes())))
    }

    /// Decode a Cairo short string. Leading zero bytes are dropped.
    pub fn to_short_string(self) -> Result<String, String> {
        let bytes = self.0.to_be_bytes::<32>();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        let text = &bytes[start..];
        if !text.is_ascii() {
            return Err(format!("{self} is not an ASCII short string"));
        }
        String::from_utf8(text.to_vec()).map_err(|e| e.to_string())
    }
}

impl From<u64> for Felt {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<u128> for Felt {
    fn from(value: u128) -> Self {
        Self(U256::from(value))
    }
}

impl fmt::Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Debug for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Felt({self})")
    }
}

impl FromStr for Felt {
    type Err = String;

    /// Parse `0x`-prefixed hex or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => (hex, 16),
            None => (s, 10),
        };
        if digits.is_empty() {
            return Err(format!("invalid felt {s:?}: no digits"));
        }
        let value =
            U256::from_str_radix(digits, radix).map_err(|e| format!("invalid felt {s:?}: {e}"))?;
        Self::from_u256(value)
    }
}

impl Serialize for Felt {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Felt {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        match Raw::deserialize(d)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(Felt::from(n)),
        }
    }
}

/// Entry point selector for a function name.
pub fn selector(name: &str) -> Felt {
    let digest = U256::from_be_bytes(keccak256(name.as_bytes()).0);
    Felt(digest & *SELECTOR_MASK)
}

/// Split a u256 into its `[low, high]` 128-bit calldata words.
pub fn split_u256(value: U256) -> [Felt; 2] {
    [Felt(value & *LOW_128_MASK), Felt(value >> 128)]
}

/// Inverse of [`split_u256`]. Fails if either word exceeds 128 bits.
pub fn join_u256(low: Felt, high: Felt) -> Result<U256, String> {
    if low.0 > *LOW_128_MASK || high.0 > *LOW_128_MASK {
        return Err(format!("u256 words out of range: low={low}, high={high}"));
    }
    Ok((high.0 << 128) | low.0)
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// A single contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub contract_address: Felt,
    pub entrypoint: String,
    pub calldata: Vec<Felt>,
}

impl Call {
    pub fn new(contract_address: Felt, entrypoint: impl Into<String>, calldata: Vec<Felt>) -> Self {
        Self {
            contract_address,
            entrypoint: entrypoint.into(),
            calldata,
        }
    }

    /// ERC-20 `transfer(recipient, amount)`.
    pub fn erc20_transfer(token: Felt, recipient: Felt, amount: U256) -> Self {
        let [low, high] = split_u256(amount);
        Self::new(token, "transfer", vec![recipient, low, high])
    }
}

/// Transaction options forwarded to the signer untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee: Option<Felt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Felt>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOptions {
    #[serde(default)]
    pub skip_deploy: bool,
}

/// A contract class to declare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclarePayload {
    /// Sierra contract class JSON.
    pub contract: serde_json::Value,
    /// Compiled CASM JSON.
    pub casm: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_hash: Option<Felt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_class_hash: Option<Felt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResult {
    pub transaction_hash: Felt,
}

/// Outcome of a declare. No transaction hash means the class was already
/// declared and nothing was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclareResult {
    #[serde(with = "empty_as_none")]
    pub transaction_hash: Option<Felt>,
    pub class_hash: Felt,
}

impl DeclareResult {
    pub fn already_declared(class_hash: Felt) -> Self {
        Self {
            transaction_hash: None,
            class_hash,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    pub contract_address: Felt,
    pub transaction_hash: Felt,
}

pub type Signature = Vec<Felt>;

/// An event emitted by an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub from_address: Felt,
    #[serde(default)]
    pub keys: Vec<Felt>,
    #[serde(default)]
    pub data: Vec<Felt>,
}

/// Receipt of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: Felt,
    #[serde(default)]
    pub events: Vec<Event>,
}

/// `""` on the wire means "no transaction".
mod empty_as_none {
    use super::Felt;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Felt>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(felt) => s.serialize_str(&felt.to_string()),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Felt>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn felt_parses_hex_and_decimal() {
        assert_eq!("0x1f".parse::<Felt>().unwrap(), Felt::from(31u64));
        assert_eq!("31".parse::<Felt>().unwrap(), Felt::from(31u64));
        assert_eq!(" 0X1F ".parse::<Felt>().unwrap(), Felt::from(31u64));
    }

    #[test]
    fn felt_rejects_garbage() {
        assert!("".parse::<Felt>().is_err());
        assert!("0x".parse::<Felt>().is_err());
        assert!("0xzz".parse::<Felt>().is_err());
        assert!("-1".parse::<Felt>().is_err());
    }

    #[test]
    fn felt_rejects_values_outside_the_field() {
        assert!(Felt::from_u256(*FIELD_PRIME).is_err());
        assert!(Felt::from_u256(*FIELD_PRIME - U256::from(1u8)).is_ok());
    }

    #[test]
    fn felt_displays_as_hex() {
        assert_eq!(Felt::from(255u64).to_string(), "0xff");
        assert_eq!(Felt::ZERO.to_string(), "0x0");
    }

    #[test]
    fn felt_serde_accepts_numbers_and_strings() {
        let from_num: Felt = serde_json::from_str("7").unwrap();
        let from_str: Felt = serde_json::from_str("\"0x7\"").unwrap();
        assert_eq!(from_num, from_str);
        assert_eq!(serde_json::to_string(&from_num).unwrap(), "\"0x7\"");
    }

    #[test]
    fn short_string_encoding() {
        assert_eq!(Felt::from_short_string("A").unwrap(), Felt::from(0x41u64));
        assert_eq!(Felt::from_short_string("").unwrap(), Felt::ZERO);
        assert!(Felt::from_short_string(&"x".repeat(32)).is_err());
        assert!(Felt::from_short_string("é").is_err());
        assert_eq!(Felt::from_short_string("ETH").unwrap().to_short_string().unwrap(), "ETH");
        assert_eq!(Felt::ZERO.to_short_string().unwrap(), "");
        assert!(Felt::from(0xffu64).to_short_string().is_err());
    }

    #[test]
    fn well_known_selectors() {
        assert_eq!(
            selector("transfer").to_string(),
            "0x83afd3f4caedc6eebf44246fe54e38c95e3179a5ec9ea81740eca5b482d12e"
        );
        assert_eq!(
            selector("balanceOf").to_string(),
            "0x2e4263afad30923c891518314c3c95dbe830a16874e8abc5777a9a20b54c76e"
        );
    }

    #[test]
    fn u256_split_and_join() {
        let value = (U256::from(3u8) << 128) + U256::from(5u8);
        let [low, high] = split_u256(value);
        assert_eq!(low, Felt::from(5u64));
        assert_eq!(high, Felt::from(3u64));
        assert_eq!(join_u256(low, high).unwrap(), value);

        let [low, high] = split_u256(U256::MAX);
        assert_eq!(join_u256(low, high).unwrap(), U256::MAX);
    }

    #[test]
    fn erc20_transfer_calldata() {
        let call = Call::erc20_transfer(Felt::from(1u64), Felt::from(2u64), U256::from(20u8));
        assert_eq!(call.entrypoint, "transfer");
        assert_eq!(
            call.calldata,
            vec![Felt::from(2u64), Felt::from(20u64), Felt::ZERO]
        );
    }

    #[test]
    fn declare_result_empty_hash_means_already_declared() {
        let parsed: DeclareResult =
            serde_json::from_str(r#"{"transactionHash":"","classHash":"0x5"}"#).unwrap();
        assert_eq!(parsed, DeclareResult::already_declared(Felt::from(5u64)));

        let json = serde_json::to_value(parsed).unwrap();
        assert_eq!(json["transactionHash"], "");

        let submitted: DeclareResult =
            serde_json::from_str(r#"{"transactionHash":"0x9","classHash":"0x5"}"#).unwrap();
        assert_eq!(submitted.transaction_hash, Some(Felt::from(9u64)));
    }

    #[test]
    fn call_uses_camel_case_on_the_wire() {
        let call = Call::new(Felt::from(1u64), "increase", vec![]);
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["contractAddress"], "0x1");
        assert_eq!(json["entrypoint"], "increase");
    }
}
