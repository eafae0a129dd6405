//! Constructor calldata compiler.
//!
//! Turns JSON constructor arguments into felts by walking the contract's
//! Sierra ABI: structs are flattened member by member, enums become a variant
//! index followed by the variant data, arrays are length-prefixed and `u256`
//! is split into its low and high words.

use std::collections::{HashMap, HashSet};

use alloy_primitives::U256;
use serde::Deserialize;
use serde_json::Value;

use crate::error::WalletError;
use crate::types::{FIELD_PRIME, Felt, split_u256};

const MAX_TYPE_DEPTH: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct AbiParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AbiEntry {
    Constructor {
        #[serde(default)]
        inputs: Vec<AbiParam>,
    },
    Struct {
        name: String,
        #[serde(default)]
        members: Vec<AbiParam>,
    },
    Enum {
        name: String,
        #[serde(default)]
        variants: Vec<AbiParam>,
    },
    Function {
        name: String,
    },
    Interface {
        #[serde(default)]
        items: Vec<AbiEntry>,
    },
    #[serde(other)]
    Other,
}

/// The parts of a contract ABI needed to encode constructor arguments.
#[derive(Debug, Clone, Default)]
pub struct ContractAbi {
    constructor: Option<Vec<AbiParam>>,
    structs: HashMap<String, Vec<AbiParam>>,
    enums: HashMap<String, Vec<AbiParam>>,
    functions: HashSet<String>,
}

impl ContractAbi {
    /// Parse an ABI given either as a JSON array or as a string holding one
    /// (Sierra classes ship their ABI as a string).
    pub fn from_value(abi: &Value) -> Result<Self, WalletError> {
        let entries: Vec<AbiEntry> = match abi {
            Value::String(raw) => serde_json::from_str(raw),
            other => serde_json::from_value(other.clone()),
        }
        .map_err(|e| WalletError::InterfaceMismatch(format!("unreadable ABI: {e}")))?;

        let mut parsed = Self::default();
        parsed.collect(entries);
        Ok(parsed)
    }

    fn collect(&mut self, entries: Vec<AbiEntry>) {
        for entry in entries {
            match entry {
                AbiEntry::Constructor { inputs } => self.constructor = Some(inputs),
                AbiEntry::Struct { name, members } => {
                    self.structs.insert(name, members);
                }
                AbiEntry::Enum { name, variants } => {
                    self.enums.insert(name, variants);
                }
                AbiEntry::Function { name } => {
                    self.functions.insert(name);
                }
                AbiEntry::Interface { items } => self.collect(items),
                AbiEntry::Other => {}
            }
        }
    }

    /// Whether an entry point called `name` is exposed, either at the top
    /// level or inside an interface.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn constructor_inputs(&self) -> Option<&[AbiParam]> {
        self.constructor.as_deref()
    }

    /// Encode `args` (an object keyed by input name, or a positional array)
    /// against the constructor entry.
    pub fn compile_constructor(&self, args: &Value) -> Result<Vec<Felt>, WalletError> {
        let no_args = match args {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        let Some(inputs) = self.constructor.as_deref() else {
            if no_args {
                return Ok(Vec::new());
            }
            return Err(WalletError::InterfaceMismatch(
                "contract has no constructor but arguments were supplied".into(),
            ));
        };

        let values: Vec<&Value> = match args {
            Value::Null => Vec::new(),
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => {
                if let Some(extra) = map.keys().find(|k| !inputs.iter().any(|p| &p.name == *k)) {
                    return Err(WalletError::InterfaceMismatch(format!(
                        "unexpected constructor argument `{extra}`"
                    )));
                }
                inputs
                    .iter()
                    .map(|p| {
                        map.get(&p.name).ok_or_else(|| {
                            WalletError::InterfaceMismatch(format!(
                                "missing constructor argument `{}`",
                                p.name
                            ))
                        })
                    })
                    .collect::<Result<_, _>>()?
            }
            other => {
                return Err(WalletError::InterfaceMismatch(format!(
                    "constructor arguments must be an object or array, got {other}"
                )));
            }
        };

        if values.len() != inputs.len() {
            return Err(WalletError::InterfaceMismatch(format!(
                "constructor expects {} arguments, got {}",
                inputs.len(),
                values.len()
            )));
        }

        let mut out = Vec::new();
        for (param, value) in inputs.iter().zip(values) {
            self.encode(&param.ty, value, &mut out, 0)
                .map_err(|e| WalletError::InterfaceMismatch(format!("`{}`: {e}", param.name)))?;
        }
        Ok(out)
    }

    fn encode(&self, ty: &str, value: &Value, out: &mut Vec<Felt>, depth: usize) -> Result<(), String> {
        if depth > MAX_TYPE_DEPTH {
            return Err(format!("type nesting too deep at {ty}"));
        }
        let ty = ty.trim();

        if let Some(inner) = ty.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            let members = split_top_level(inner);
            let items = value
                .as_array()
                .ok_or_else(|| format!("expected array for tuple {ty}"))?;
            if items.len() != members.len() {
                return Err(format!(
                    "tuple {ty} has {} members, got {}",
                    members.len(),
                    items.len()
                ));
            }
            for (member, item) in members.iter().zip(items) {
                self.encode(member, item, out, depth + 1)?;
            }
            return Ok(());
        }

        let (base, generic) = match ty.split_once("::<") {
            Some((base, rest)) => (
                base,
                Some(rest.strip_suffix('>').ok_or_else(|| format!("malformed type {ty}"))?),
            ),
            None => (ty, None),
        };
        let short = base.rsplit("::").next().unwrap_or(base);

        match (short, generic) {
            ("felt252" | "felt", None) => out.push(parse_felt(value, true)?),
            (
                "ContractAddress" | "ClassHash" | "EthAddress" | "StorageAddress" | "bytes31",
                None,
            ) => out.push(parse_felt(value, false)?),
            ("bool", None) => out.push(parse_bool(value)?),
            ("u8" | "u16" | "u32" | "u64" | "u128" | "usize", None) => {
                let bits = if short == "usize" { 64 } else { int_bits(short) };
                let v = parse_uint(value)?;
                if v > max_unsigned(bits) {
                    return Err(format!("{v} does not fit in {short}"));
                }
                out.push(Felt::from_u256(v)?);
            }
            ("i8" | "i16" | "i32" | "i64" | "i128", None) => {
                out.push(parse_signed(value, int_bits(short))?);
            }
            ("u256", None) => {
                let v = match value {
                    Value::Object(map) => {
                        let low = parse_uint(map.get("low").ok_or("u256 object needs `low`")?)?;
                        let high = parse_uint(map.get("high").ok_or("u256 object needs `high`")?)?;
                        if low > max_unsigned(128) || high > max_unsigned(128) {
                            return Err("u256 words must fit in 128 bits".into());
                        }
                        (high << 128) | low
                    }
                    other => parse_uint(other)?,
                };
                out.extend(split_u256(v));
            }
            ("ByteArray", None) => {
                let text = value
                    .as_str()
                    .ok_or_else(|| format!("expected string for ByteArray, got {value}"))?;
                encode_byte_array(text, out)?;
            }
            ("Array" | "Span", Some(element)) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| format!("expected array for {ty}, got {value}"))?;
                out.push(Felt::from(items.len() as u64));
                for item in items {
                    self.encode(element, item, out, depth + 1)?;
                }
            }
            _ => {
                if let Some(members) = self.structs.get(ty) {
                    self.encode_struct(ty, members, value, out, depth)?;
                } else if let Some(variants) = self.enums.get(ty) {
                    self.encode_enum(ty, variants, value, out, depth)?;
                } else {
                    return Err(format!("unknown type {ty}"));
                }
            }
        }
        Ok(())
    }

    fn encode_struct(
        &self,
        ty: &str,
        members: &[AbiParam],
        value: &Value,
        out: &mut Vec<Felt>,
        depth: usize,
    ) -> Result<(), String> {
        match value {
            Value::Object(map) => {
                for member in members {
                    let field = map
                        .get(&member.name)
                        .ok_or_else(|| format!("struct {ty} is missing `{}`", member.name))?;
                    self.encode(&member.ty, field, out, depth + 1)?;
                }
            }
            Value::Array(items) if items.len() == members.len() => {
                for (member, item) in members.iter().zip(items) {
                    self.encode(&member.ty, item, out, depth + 1)?;
                }
            }
            other => return Err(format!("expected object for struct {ty}, got {other}")),
        }
        Ok(())
    }

    fn encode_enum(
        &self,
        ty: &str,
        variants: &[AbiParam],
        value: &Value,
        out: &mut Vec<Felt>,
        depth: usize,
    ) -> Result<(), String> {
        // `null` selects a `None` variant (Option::None).
        let (name, data) = match value {
            Value::Null => ("None", &Value::Null),
            Value::String(name) => (name.as_str(), &Value::Null),
            Value::Object(map) if map.len() == 1 => {
                let (name, data) = map.iter().next().ok_or("empty enum object")?;
                (name.as_str(), data)
            }
            other => return Err(format!("expected variant for enum {ty}, got {other}")),
        };
        let (index, variant) = variants
            .iter()
            .enumerate()
            .find(|(_, v)| v.name == name)
            .ok_or_else(|| format!("enum {ty} has no variant `{name}`"))?;

        out.push(Felt::from(index as u64));
        if variant.ty.trim() != "()" {
            self.encode(&variant.ty, data, out, depth + 1)?;
        }
        Ok(())
    }
}

/// Split `a, b<c, d>, (e, f)` at commas that are not nested.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '<' | '(' => depth += 1,
            '>' | ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

fn int_bits(short: &str) -> usize {
    short[1..].parse().unwrap_or(128)
}

fn max_unsigned(bits: usize) -> U256 {
    (U256::from(1u8) << bits) - U256::from(1u8)
}

fn parse_uint(value: &Value) -> Result<U256, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| format!("{n} is not a non-negative integer")),
        Value::String(s) => {
            let s = s.trim();
            let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => (hex, 16),
                None => (s, 10),
            };
            if digits.is_empty() {
                return Err(format!("{s:?} is not a number"));
            }
            U256::from_str_radix(digits, radix).map_err(|e| format!("{s:?} is not a number: {e}"))
        }
        other => Err(format!("expected number, got {other}")),
    }
}

fn parse_felt(value: &Value, allow_short_string: bool) -> Result<Felt, String> {
    match value {
        Value::String(s) if allow_short_string && parse_uint(value).is_err() => {
            Felt::from_short_string(s)
        }
        other => Felt::from_u256(parse_uint(other)?),
    }
}

fn parse_bool(value: &Value) -> Result<Felt, String> {
    match value {
        Value::Bool(b) => Ok(Felt::from(u64::from(*b))),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(Felt::ZERO),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(Felt::from(1u64)),
        other => Err(format!("expected bool, got {other}")),
    }
}

/// Negative values are encoded as `P - |v|`.
fn parse_signed(value: &Value, bits: usize) -> Result<Felt, String> {
    let (negative, magnitude) = match value {
        Value::Number(n) => match n.as_i64() {
            Some(v) => (v < 0, U256::from(v.unsigned_abs())),
            None => return Err(format!("{n} is not an integer")),
        },
        Value::String(s) => match s.trim().strip_prefix('-') {
            Some(rest) => (true, parse_uint(&Value::String(rest.to_string()))?),
            None => (false, parse_uint(value)?),
        },
        other => return Err(format!("expected integer, got {other}")),
    };

    let half = U256::from(1u8) << (bits - 1);
    if negative {
        if magnitude > half {
            return Err(format!("-{magnitude} does not fit in i{bits}"));
        }
        if magnitude.is_zero() {
            return Ok(Felt::ZERO);
        }
        Felt::from_u256(*FIELD_PRIME - magnitude)
    } else {
        if magnitude >= half {
            return Err(format!("{magnitude} does not fit in i{bits}"));
        }
        Felt::from_u256(magnitude)
    }
}

/// Inverse of the `ByteArray` encoding below.
pub fn decode_byte_array(words: &[Felt]) -> Result<String, String> {
    let (&len, rest) = words.split_first().ok_or("empty ByteArray")?;
    let full = usize::try_from(len.to_u256()).map_err(|_| "ByteArray length overflow")?;
    if rest.len() != full + 2 {
        return Err(format!(
            "ByteArray with {full} full words needs {} felts, got {}",
            full + 3,
            words.len()
        ));
    }
    let pending_len = usize::try_from(rest[full + 1].to_u256())
        .ok()
        .filter(|n| *n < 31)
        .ok_or("bad ByteArray pending length")?;

    let mut bytes = Vec::with_capacity(full * 31 + pending_len);
    for word in &rest[..full] {
        bytes.extend_from_slice(&word.to_u256().to_be_bytes::<32>()[1..]);
    }
    let pending = rest[full].to_u256().to_be_bytes::<32>();
    bytes.extend_from_slice(&pending[32 - pending_len..]);
    String::from_utf8(bytes).map_err(|e| format!("ByteArray is not UTF-8: {e}"))
}

/// `[full_words_len, full_words..., pending_word, pending_word_len]`.
fn encode_byte_array(text: &str, out: &mut Vec<Felt>) -> Result<(), String> {
    let bytes = text.as_bytes();
    let chunks: Vec<&[u8]> = bytes.chunks(31).collect();
    let (full, pending): (&[&[u8]], &[u8]) = match chunks.last() {
        Some(last) if last.len() < 31 => (&chunks[..chunks.len() - 1], *last),
        _ => (&chunks[..], &[]),
    };
    out.push(Felt::from(full.len() as u64));
    for word in full {
        out.push(Felt::from_u256(U256::from_be_slice(word))?);
    }
    out.push(Felt::from_u256(U256::from_be_slice(pending))?);
    out.push(Felt::from(pending.len() as u64));
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
