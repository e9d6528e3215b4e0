// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Value-transfer transactions: canonical hashing, recoverable signatures and
//! the text (JSON) representation.
//!
//! Signing payload (Keccak-256 input):
//!
//! ```text
//! "Amunchain-Tx-v1" || from(20) || to(20)
//!   || len(value)(u64 BE) || value (big-endian magnitude)
//!   || len(data)(u64 BE) || data
//!   || nonce(u64 BE)
//! ```

use num_bigint::{BigInt, BigUint};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::core::{
    security::keystore::{verify_signer, SigningKey},
    types::{decode_canonical_limited, decode_hex_prefixed, encode_canonical, encode_hex_prefixed, keccak256, Address, H256},
};

const TX_DOMAIN: &[u8] = b"Amunchain-Tx-v1";

/// Upper bound on an encoded transaction.
pub const MAX_TX_BYTES: usize = 128 * 1024;

/// Upper bound on the opaque payload; leaves room for the fixed fields.
pub const MAX_TX_DATA_BYTES: usize = MAX_TX_BYTES - 1024;

/// Upper bound on the big-endian magnitude of `value`.
pub const MAX_VALUE_BYTES: usize = 64;

/// Transaction errors.
#[derive(Debug, Error)]
pub enum TxError {
    /// Malformed input (negative value, bad hex, ...).
    #[error("invalid transaction: {0}")]
    Validation(String),
    /// Key or algorithm failure while signing.
    #[error("signing: {0}")]
    Signing(String),
    /// Encoded bytes are not a transaction.
    #[error("deserialization")]
    Deserialization,
}

mod biguint_be {
    use super::*;

    pub fn serialize<S: Serializer>(v: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        v.to_bytes_be().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        let bytes = Vec::<u8>::deserialize(d)?;
        Ok(BigUint::from_bytes_be(&bytes))
    }
}

/// Intended value transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender.
    pub from: Address,
    /// Recipient.
    pub to: Address,
    /// Amount, arbitrary precision.
    #[serde(with = "biguint_be")]
    pub value: BigUint,
    /// Opaque payload.
    pub data: Vec<u8>,
    /// Per-sender counter.
    pub nonce: u64,
    /// `r || s || v`; `None` until signed.
    pub signature: Option<Vec<u8>>,
}

impl Transaction {
    /// Unsigned transaction. Negative values are rejected.
    pub fn new(
        from: Address,
        to: Address,
        value: impl Into<BigInt>,
        data: Vec<u8>,
        nonce: u64,
    ) -> Result<Self, TxError> {
        let value: BigInt = value.into();
        let value = value
            .to_biguint()
            .ok_or_else(|| TxError::Validation("value must be non-negative".to_string()))?;
        let tx = Self { from, to, value, data, nonce, signature: None };
        tx.check_bounds()?;
        Ok(tx)
    }

    /// Reject payloads and values larger than a transaction may carry.
    pub fn check_bounds(&self) -> Result<(), TxError> {
        if self.data.len() > MAX_TX_DATA_BYTES {
            return Err(TxError::Validation(format!("data exceeds {MAX_TX_DATA_BYTES} bytes")));
        }
        if self.value.bits() > (MAX_VALUE_BYTES as u64) * 8 {
            return Err(TxError::Validation(format!("value exceeds {MAX_VALUE_BYTES} bytes")));
        }
        Ok(())
    }

    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let value = self.value.to_bytes_be();
        let mut out =
            Vec::with_capacity(TX_DOMAIN.len() + 40 + 8 + value.len() + 8 + self.data.len() + 8);
        out.extend_from_slice(TX_DOMAIN);
        out.extend_from_slice(self.from.as_bytes());
        out.extend_from_slice(self.to.as_bytes());
        out.extend_from_slice(&(value.len() as u64).to_be_bytes());
        out.extend_from_slice(&value);
        out.extend_from_slice(&(self.data.len() as u64).to_be_bytes());
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out
    }

    /// Keccak-256 over [`Transaction::signing_bytes`]. The signature is not covered.
    pub fn hash(&self) -> H256 {
        H256::from_bytes(keccak256(&self.signing_bytes()))
    }

    /// Sign with `key`, replacing any previous signature.
    pub fn sign(&mut self, key: &SigningKey) -> Result<(), TxError> {
        if key.address() != self.from {
            return Err(TxError::Signing("key does not belong to sender".to_string()));
        }
        self.check_bounds()?;
        let digest = self.hash();
        let sig = key
            .sign_digest(digest.as_bytes())
            .map_err(|e| TxError::Signing(e.to_string()))?;
        self.signature = Some(sig.to_vec());
        Ok(())
    }

    /// True iff signed and the recovered signer is `from`. Never errors.
    pub fn verify(&self) -> bool {
        match &self.signature {
            Some(sig) => verify_signer(self.hash().as_bytes(), sig, &self.from),
            None => false,
        }
    }

    /// Whether a signature is attached.
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Full binary encoding, signature included.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TxError> {
        encode_canonical(self).map_err(|_| TxError::Deserialization)
    }

    /// Decode [`Transaction::to_bytes`] output.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TxError> {
        let tx: Self =
            decode_canonical_limited(bytes, MAX_TX_BYTES).map_err(|_| TxError::Deserialization)?;
        tx.check_bounds().map_err(|_| TxError::Deserialization)?;
        Ok(tx)
    }
}

/// Text representation used across JSON boundaries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxJson {
    /// Checksummed hex address.
    pub from: String,
    /// Checksummed hex address.
    pub to: String,
    /// Base-10 amount.
    pub value: String,
    /// `0x` hex payload.
    #[serde(default)]
    pub data: String,
    /// Sender counter.
    pub nonce: u64,
    /// `0x` hex signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl From<&Transaction> for TxJson {
    fn from(tx: &Transaction) -> Self {
        Self {
            from: tx.from.to_checksum(),
            to: tx.to.to_checksum(),
            value: tx.value.to_str_radix(10),
            data: encode_hex_prefixed(&tx.data),
            nonce: tx.nonce,
            signature: tx.signature.as_deref().map(encode_hex_prefixed),
        }
    }
}

fn parse_value(s: &str) -> Result<BigUint, TxError> {
    if s.starts_with('-') {
        return Err(TxError::Validation("value must be non-negative".to_string()));
    }
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TxError::Validation("value must be a base-10 integer".to_string()));
    }
    BigUint::parse_bytes(s.as_bytes(), 10)
        .ok_or_else(|| TxError::Validation("value must be a base-10 integer".to_string()))
}

impl TryFrom<TxJson> for Transaction {
    type Error = TxError;

    fn try_from(j: TxJson) -> Result<Self, Self::Error> {
        let from: Address = j
            .from
            .parse()
            .map_err(|e| TxError::Validation(format!("from: {e}")))?;
        let to: Address = j.to.parse().map_err(|e| TxError::Validation(format!("to: {e}")))?;
        let value = parse_value(&j.value)?;
        let data = if j.data.is_empty() {
            Vec::new()
        } else {
            decode_hex_prefixed(&j.data).map_err(|e| TxError::Validation(format!("data: {e}")))?
        };
        let signature = match j.signature.as_deref() {
            None | Some("") => None,
            Some(s) => Some(
                decode_hex_prefixed(s).map_err(|e| TxError::Validation(format!("signature: {e}")))?,
            ),
        };
        let tx = Self { from, to, value, data, nonce: j.nonce, signature };
        tx.check_bounds()?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SigningKey {
        SigningKey::generate().unwrap()
    }

    #[test]
    fn negative_value_is_rejected() {
        let a = Address::from_bytes([1; 20]);
        assert!(matches!(
            Transaction::new(a, a, -1i64, vec![], 0),
            Err(TxError::Validation(_))
        ));
    }

    #[test]
    fn sign_then_verify_and_resign_overwrites() {
        let k = key();
        let mut tx = Transaction::new(k.address(), Address::from_bytes([2; 20]), 100u64, vec![], 0).unwrap();
        assert!(!tx.verify());
        tx.sign(&k).unwrap();
        assert!(tx.verify());
        let first = tx.signature.clone();
        tx.nonce = 1;
        assert!(!tx.verify());
        tx.sign(&k).unwrap();
        assert!(tx.verify());
        assert_ne!(tx.signature, first);
    }

    #[test]
    fn signing_with_foreign_key_fails() {
        let mut tx = Transaction::new(Address::from_bytes([9; 20]), Address::from_bytes([2; 20]), 1u64, vec![], 0).unwrap();
        assert!(matches!(tx.sign(&key()), Err(TxError::Signing(_))));
        assert!(!tx.is_signed());
    }

    #[test]
    fn length_prefixes_disambiguate_value_and_data() {
        let a = Address::from_bytes([1; 20]);
        // value 0x01 with data [0x02] vs value 0x0102 with empty data
        let t1 = Transaction::new(a, a, 1u64, vec![2], 0).unwrap();
        let t2 = Transaction::new(a, a, 0x0102u64, vec![], 0).unwrap();
        assert_ne!(t1.hash(), t2.hash());
    }

    #[test]
    fn json_keeps_large_values_exact() {
        let k = key();
        let big = BigUint::parse_bytes(b"123456789012345678901234567890123456789", 10).unwrap();
        let mut tx = Transaction::new(k.address(), Address::from_bytes([3; 20]), BigInt::from(big.clone()), vec![0xde, 0xad], 7).unwrap();
        tx.sign(&k).unwrap();

        let j = TxJson::from(&tx);
        assert_eq!(j.value, "123456789012345678901234567890123456789");
        assert_eq!(j.data, "0xdead");
        let text = serde_json::to_string(&j).unwrap();
        let back = Transaction::try_from(serde_json::from_str::<TxJson>(&text).unwrap()).unwrap();
        assert_eq!(back, tx);
        assert_eq!(back.hash(), tx.hash());
        assert!(back.verify());
    }

    #[test]
    fn json_rejects_bad_fields() {
        let good = TxJson {
            from: Address::from_bytes([1; 20]).to_checksum(),
            to: Address::from_bytes([2; 20]).to_checksum(),
            value: "5".into(),
            data: String::new(),
            nonce: 0,
            signature: None,
        };
        for bad in [
            TxJson { value: "-5".into(), ..good.clone() },
            TxJson { value: "5.0".into(), ..good.clone() },
            TxJson { value: "".into(), ..good.clone() },
            TxJson { to: "0x1234".into(), ..good.clone() },
            TxJson { data: "0xzz".into(), ..good.clone() },
        ] {
            assert!(matches!(Transaction::try_from(bad), Err(TxError::Validation(_))));
        }
        assert!(Transaction::try_from(good).is_ok());
    }

    #[test]
    fn oversized_payload_and_value_are_rejected() {
        let a = Address::from_bytes([1; 20]);
        assert!(Transaction::new(a, a, 1u64, vec![0; MAX_TX_DATA_BYTES], 0).is_ok());
        assert!(matches!(
            Transaction::new(a, a, 1u64, vec![0; MAX_TX_DATA_BYTES + 1], 0),
            Err(TxError::Validation(_))
        ));

        let huge = BigUint::from_bytes_be(&[0xff; MAX_VALUE_BYTES + 1]);
        assert!(matches!(
            Transaction::new(a, a, BigInt::from(huge), vec![], 0),
            Err(TxError::Validation(_))
        ));

        let json = TxJson {
            from: a.to_checksum(),
            to: a.to_checksum(),
            value: "1".into(),
            data: encode_hex_prefixed(&vec![0u8; MAX_TX_DATA_BYTES + 1]),
            nonce: 0,
            signature: None,
        };
        assert!(matches!(Transaction::try_from(json), Err(TxError::Validation(_))));

        // A payload grown after construction cannot be signed.
        let k = key();
        let mut tx = Transaction::new(k.address(), a, 1u64, vec![], 0).unwrap();
        tx.data = vec![0; MAX_TX_DATA_BYTES + 1];
        assert!(matches!(tx.sign(&k), Err(TxError::Validation(_))));
    }

    #[test]
    fn truncated_bytes_fail_to_decode() {
        let a = Address::from_bytes([1; 20]);
        let bytes = Transaction::new(a, a, 10u64, vec![1, 2, 3], 4).unwrap().to_bytes().unwrap();
        assert!(matches!(
            Transaction::from_bytes(&bytes[..bytes.len() - 1]),
            Err(TxError::Deserialization)
        ));
    }
}
