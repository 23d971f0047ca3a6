//! Payment winner announcements
//!
//! A winner names the masternode (by its collateral input) entitled to the
//! service payment of one block height. It is signed by the network
//! masternode-payments key and identified by a content hash that excludes
//! the signature.

use std::fmt;

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::ADDRESS_PREFIX;
use crate::crypto::{double_hash, hash_bytes, Hash, PrivateKey, PublicKey, SchnorrSignature};

/// Sequence number every masternode collateral input must carry
pub const FINAL_SEQUENCE: u32 = u32::MAX;

/// Reference to a transaction output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutPoint({}, {})", &self.hash.to_hex()[..10], self.index)
    }
}

/// Collateral input identifying a masternode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            sequence: FINAL_SEQUENCE,
        }
    }

    pub fn is_final(&self) -> bool {
        self.sequence == FINAL_SEQUENCE
    }
}

impl fmt::Display for TxIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxIn({}", self.prevout)?;
        if !self.is_final() {
            write!(f, ", nSequence={}", self.sequence)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address prefix")]
    Prefix,
    #[error("Invalid base58 encoding")]
    Encoding,
    #[error("Invalid address length")]
    Length,
    #[error("Invalid checksum")]
    Checksum,
}

/// Pay-to-key-hash destination of a masternode payment
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayeeScript(pub [u8; 20]);

impl PayeeScript {
    pub fn pay_to_key(key: &PublicKey) -> Self {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&key.key_hash().0[..20]);
        PayeeScript(bytes)
    }

    /// "CC" + Base58Check(key_hash[0:20] + checksum[0:4])
    pub fn to_address(&self) -> String {
        let checksum = double_hash(&self.0);
        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(&self.0);
        payload.extend_from_slice(&checksum.0[..4]);
        format!("{}{}", ADDRESS_PREFIX, bs58::encode(payload).into_string())
    }

    pub fn from_address(address: &str) -> Result<Self, AddressError> {
        let encoded = address.strip_prefix(ADDRESS_PREFIX).ok_or(AddressError::Prefix)?;
        let decoded = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| AddressError::Encoding)?;
        if decoded.len() != 24 {
            return Err(AddressError::Length);
        }

        let (key_hash, checksum) = decoded.split_at(20);
        if checksum != &double_hash(key_hash).0[..4] {
            return Err(AddressError::Checksum);
        }

        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(key_hash);
        Ok(PayeeScript(bytes))
    }
}

impl fmt::Display for PayeeScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_address())
    }
}

impl fmt::Debug for PayeeScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayeeScript({})", self.to_address())
    }
}

/// Signed claim that a masternode is paid at a given height
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentWinner {
    pub height: u64,
    pub vin: TxIn,
    pub payee: PayeeScript,
    /// Local election score, kept off the wire and out of the content hash
    #[serde(skip)]
    pub score: u64,
    pub signature: Option<SchnorrSignature>,
}

impl PaymentWinner {
    pub fn new(height: u64, vin: TxIn, payee: PayeeScript) -> Self {
        Self {
            height,
            vin,
            payee,
            score: 0,
            signature: None,
        }
    }

    /// Text covered by the payments-key signature
    pub fn signing_message(&self) -> String {
        format!("{}{}{}", self.vin, self.height, self.payee)
    }

    /// Content hash used for inventory and dedup; covers exactly the signed fields
    pub fn hash(&self) -> Hash {
        let mut bytes = Vec::with_capacity(8 + 32 + 4 + 4 + 20);
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.extend_from_slice(&self.vin.prevout.hash.0);
        bytes.extend_from_slice(&self.vin.prevout.index.to_le_bytes());
        bytes.extend_from_slice(&self.vin.sequence.to_le_bytes());
        bytes.extend_from_slice(&self.payee.0);
        hash_bytes(&bytes)
    }

    pub fn sign(&mut self, key: &PrivateKey) {
        self.signature = Some(key.sign_message(&self.signing_message()));
    }

    /// Check the signature against the network payments key
    pub fn verify(&self, key: &PublicKey) -> bool {
        match &self.signature {
            Some(signature) => key.verify_message(&self.signing_message(), signature),
            None => false,
        }
    }
}

/// Distance between a block hash and a collateral input, truncated to 64 bits.
///
/// `|H(H(block_hash)) - H(vin.prevout.hash)|`
pub fn calculate_score(block_hash: &Hash, vin: &TxIn) -> u64 {
    let block_side: U256 = double_hash(&block_hash.0).to_u256();
    let vin_side: U256 = hash_bytes(&vin.prevout.hash.0).to_u256();
    let distance = if vin_side > block_side {
        vin_side - block_side
    } else {
        block_side - vin_side
    };
    distance.low_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vin(seed: u8) -> TxIn {
        TxIn::new(OutPoint {
            hash: Hash([seed; 32]),
            index: 1,
        })
    }

    #[test]
    fn test_address_roundtrip() {
        let key = PrivateKey::generate().public_key();
        let payee = PayeeScript::pay_to_key(&key);
        let address = payee.to_address();
        assert!(address.starts_with("CC"));
        assert_eq!(PayeeScript::from_address(&address), Ok(payee));
    }

    #[test]
    fn test_address_errors() {
        assert_eq!(PayeeScript::from_address("RH1111"), Err(AddressError::Prefix));
        assert_eq!(PayeeScript::from_address("CC0OIl"), Err(AddressError::Encoding));
        assert_eq!(PayeeScript::from_address("CC2g"), Err(AddressError::Length));

        let mut address = PayeeScript([3u8; 20]).to_address();
        let last = address.pop().unwrap();
        address.push(if last == '2' { '3' } else { '2' });
        assert_eq!(PayeeScript::from_address(&address), Err(AddressError::Checksum));
    }

    #[test]
    fn test_signature_covers_height() {
        let key = PrivateKey::generate();
        let mut winner = PaymentWinner::new(1200, vin(1), PayeeScript([9u8; 20]));
        assert!(!winner.verify(&key.public_key()));

        winner.sign(&key);
        assert!(winner.verify(&key.public_key()));

        winner.height += 1;
        assert!(!winner.verify(&key.public_key()));
    }

    #[test]
    fn test_hash_ignores_signature() {
        let mut winner = PaymentWinner::new(7, vin(2), PayeeScript([1u8; 20]));
        let unsigned = winner.hash();
        winner.sign(&PrivateKey::generate());
        assert_eq!(winner.hash(), unsigned);
        assert_ne!(PaymentWinner::new(8, vin(2), PayeeScript([1u8; 20])).hash(), unsigned);
    }

    #[test]
    fn test_score_outside_hash_and_wire() {
        let key = PrivateKey::generate();
        let mut winner = PaymentWinner::new(9, vin(3), PayeeScript([2u8; 20]));
        winner.sign(&key);
        let original = winner.hash();

        winner.score = 4242;
        assert_eq!(winner.hash(), original);
        assert!(winner.verify(&key.public_key()));

        let decoded: PaymentWinner = bincode::deserialize(&bincode::serialize(&winner).unwrap()).unwrap();
        assert_eq!(decoded.score, 0);
        assert_eq!(decoded.hash(), original);
    }

    #[test]
    fn test_non_final_input_rendering() {
        let mut input = vin(4);
        assert!(input.is_final());
        input.sequence = 0;
        assert!(!input.is_final());
        assert!(input.to_string().contains("nSequence=0"));
    }

    #[test]
    fn test_score_is_symmetric_distance() {
        let block = Hash([5u8; 32]);
        assert_eq!(calculate_score(&block, &vin(1)), calculate_score(&block, &vin(1)));
        assert_ne!(calculate_score(&block, &vin(1)), calculate_score(&block, &vin(2)));
    }
}
