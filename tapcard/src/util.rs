//! Hashing and encoding helpers.

use bitcoin_hashes as hashes;
use bitcoin_hashes::{Hash, HashEngine};

use crate::constants::{HRP_MAINNET, HRP_TESTNET, PRIVKEY_SIZE, PUBKEY_SIZE, WIF_MAINNET, WIF_TESTNET};

/// Computes a one-off SHA256 hash.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    hashes::sha256::Hash::hash(data).to_byte_array()
}

/// Computes SHA256(SHA256(data)).
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    hashes::sha256d::Hash::hash(data).to_byte_array()
}

/// Computes RIPEMD160(SHA256(data)).
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hashes::hash160::Hash::hash(data).to_byte_array()
}

/// Allows the computation of a SHA256 hash using multiple updates.
#[derive(Default)]
pub struct Sha256Engine(hashes::sha256::HashEngine);

impl Sha256Engine {
    /// Updates the engine with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.input(data);
    }

    /// Consumes the engine and returns the hash.
    pub fn finalize(self) -> [u8; 32] {
        hashes::sha256::Hash::from_engine(self.0).to_byte_array()
    }
}

/// Human-readable card identity derived from the card public key, e.g. `YLZ27-NCQ6M-IE2PS-KCXGQ`.
pub fn identity(card_pubkey: &[u8; PUBKEY_SIZE]) -> String {
    let digest = sha256(card_pubkey);
    let encoded = base32::encode(base32::Alphabet::RFC4648 { padding: false }, &digest[8..]);

    encoded
        .as_bytes()
        .chunks(5)
        .take(4)
        .map(|group| String::from_utf8_lossy(group).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

/// Native segwit (P2WPKH) address for a compressed public key.
pub fn payment_address(pubkey: &[u8; PUBKEY_SIZE], testnet: bool) -> Result<String, bech32::Error> {
    use bech32::{ToBase32, Variant};

    let hrp = if testnet { HRP_TESTNET } else { HRP_MAINNET };
    let mut data = vec![bech32::u5::try_from_u8(0)?];
    data.extend(hash160(pubkey).to_base32());

    bech32::encode(hrp, data, Variant::Bech32)
}

/// Wallet import format for a private key belonging to a compressed public key.
pub fn wif(privkey: &[u8; PRIVKEY_SIZE], testnet: bool) -> String {
    use base58::ToBase58;

    let mut payload = Vec::with_capacity(1 + PRIVKEY_SIZE + 1 + 4);
    payload.push(if testnet { WIF_TESTNET } else { WIF_MAINNET });
    payload.extend(privkey);
    payload.push(0x01);
    let checksum = sha256d(&payload);
    payload.extend(&checksum[..4]);

    payload.to_base58()
}
