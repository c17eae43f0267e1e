//! Tron address codec.
//!
//! Tron addresses are a `0x41` prefix plus the 20-byte EVM address, shown as
//! base58check (`T...`) or as 21-byte hex (`41...`).

use sha2::{Digest, Sha256};

use crate::domain::{AppError, BlockchainError};

const TRON_PREFIX: u8 = 0x41;

fn checksum(payload: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[..4]);
    out
}

fn invalid(address: &str) -> AppError {
    AppError::Blockchain(BlockchainError::InvalidAddress(address.to_string()))
}

/// Decode any accepted Tron address form into its 20-byte EVM body.
///
/// Accepts base58check, `41`-prefixed hex, and `0x`-prefixed 20-byte hex.
pub fn tron_to_evm_bytes(address: &str) -> Result<[u8; 20], AppError> {
    let address = address.trim();
    let body: Vec<u8> = if address.starts_with('T') {
        let raw = bs58::decode(address)
            .into_vec()
            .map_err(|_| invalid(address))?;
        if raw.len() != 25 {
            return Err(invalid(address));
        }
        let (payload, check) = raw.split_at(21);
        if checksum(payload) != check || payload[0] != TRON_PREFIX {
            return Err(invalid(address));
        }
        payload[1..].to_vec()
    } else {
        let digits = address.strip_prefix("0x").unwrap_or(address);
        let raw = hex::decode(digits).map_err(|_| invalid(address))?;
        match raw.len() {
            21 if raw[0] == TRON_PREFIX => raw[1..].to_vec(),
            20 => raw,
            _ => return Err(invalid(address)),
        }
    };

    let mut out = [0u8; 20];
    out.copy_from_slice(&body);
    Ok(out)
}

/// Encode a 20-byte EVM body as a base58check Tron address
#[must_use]
pub fn evm_bytes_to_tron(body: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(25);
    payload.push(TRON_PREFIX);
    payload.extend_from_slice(body);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    bs58::encode(payload).into_string()
}

/// Normalize any accepted form to base58check
pub fn to_base58(address: &str) -> Result<String, AppError> {
    tron_to_evm_bytes(address).map(|body| evm_bytes_to_tron(&body))
}

/// `41`-prefixed hex form expected by the full node HTTP API
pub fn to_hex(address: &str) -> Result<String, AppError> {
    tron_to_evm_bytes(address).map(|body| format!("41{}", hex::encode(body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    // USDT on Tron mainnet
    const USDT_BASE58: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
    const USDT_HEX: &str = "41a614f803b6fd780986a42c78ec9c7f77e6ded13c";

    #[test]
    fn test_base58_to_hex() {
        assert_eq!(to_hex(USDT_BASE58).unwrap(), USDT_HEX);
    }

    #[test]
    fn test_hex_to_base58() {
        assert_eq!(to_base58(USDT_HEX).unwrap(), USDT_BASE58);
        assert_eq!(
            to_base58("0xa614f803b6fd780986a42c78ec9c7f77e6ded13c").unwrap(),
            USDT_BASE58
        );
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut tampered = USDT_BASE58.to_string();
        tampered.pop();
        tampered.push('u');
        assert!(tron_to_evm_bytes(&tampered).is_err());
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(tron_to_evm_bytes("41a614").is_err());
        assert!(tron_to_evm_bytes("").is_err());
    }
}
