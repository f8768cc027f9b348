//! Factory certificate chain validation.

use k256::PublicKey;

use crate::constants::{CERT_SIZE, EMULATOR_ROOT_PUBKEY, FACTORY_ROOT_PUBKEY, PUBKEY_SIZE};
use crate::crypto;
use crate::util::sha256;
use crate::Error;

/// Key a certificate chain must end at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FactoryRoot {
    /// Coinkite production root.
    #[default]
    Production,
    /// Root baked into the card emulator.
    Emulator,
    Custom(PublicKey),
}

impl FactoryRoot {
    pub fn public_key(&self) -> Result<PublicKey, Error> {
        match self {
            FactoryRoot::Production => crypto::parse_public_key(&FACTORY_ROOT_PUBKEY),
            FactoryRoot::Emulator => crypto::parse_public_key(&EMULATOR_ROOT_PUBKEY),
            FactoryRoot::Custom(pk) => Ok(*pk),
        }
    }
}

/// Encoding of the signed key each certificate commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainDigest {
    /// SHA256 over the 33-byte compressed key.
    #[default]
    Compressed,
    /// SHA256 over the 65-byte uncompressed key.
    Uncompressed,
}

impl ChainDigest {
    fn digest(self, pk: &PublicKey) -> [u8; 32] {
        match self {
            ChainDigest::Compressed => sha256(&crypto::compressed(pk)),
            ChainDigest::Uncompressed => sha256(&crypto::uncompressed(pk)),
        }
    }
}

/// Walks the chain from the card key upward and requires it to end at `root`.
///
/// Each certificate is a recoverable signature by the next key up over the
/// digest of the current key. An empty chain attests nothing and is rejected.
pub fn validate_chain(
    card_pubkey: &[u8; PUBKEY_SIZE],
    chain: &[[u8; CERT_SIZE]],
    root: &FactoryRoot,
    digest: ChainDigest,
) -> Result<(), Error> {
    if chain.is_empty() {
        return Err(Error::Counterfeit);
    }

    let mut current = crypto::parse_public_key(card_pubkey)?;
    for (_depth, cert) in chain.iter().enumerate() {
        current = crypto::recover(&digest.digest(&current), cert)?;

        #[cfg(feature = "log")]
        log::debug!(
            "certificate {_depth}: header {}, signer {:02x?}",
            cert[0],
            crypto::compressed(&current)
        );
    }

    if current != root.public_key()? {
        #[cfg(feature = "log")]
        log::warn!("certificate chain ends at an unknown key");
        return Err(Error::Counterfeit);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::tests::{card_secret, CARD_PUBKEY};
    use k256::ecdsa::SigningKey;
    use k256::SecretKey;

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    fn certify(signer: &SecretKey, subject: &PublicKey, digest: ChainDigest, base: u8) -> [u8; 65] {
        let (signature, recovery_id) = SigningKey::from(signer)
            .sign_prehash_recoverable(&digest.digest(subject))
            .unwrap();
        let mut cert = [0; 65];
        cert[0] = base + recovery_id.to_byte();
        cert[1..].copy_from_slice(&signature.to_bytes());
        cert
    }

    fn chain(digest: ChainDigest) -> (Vec<[u8; 65]>, FactoryRoot) {
        let batch = key(0x0b);
        let root = key(0x0c);
        let chain = vec![
            certify(&batch, &card_secret().public_key(), digest, 39),
            certify(&root, &batch.public_key(), digest, 27),
        ];
        (chain, FactoryRoot::Custom(root.public_key()))
    }

    #[test]
    fn genuine_chain() {
        let (chain, root) = chain(ChainDigest::Compressed);
        validate_chain(&CARD_PUBKEY, &chain, &root, ChainDigest::Compressed).unwrap();
    }

    #[test]
    fn uncompressed_chain() {
        let (chain, root) = chain(ChainDigest::Uncompressed);
        validate_chain(&CARD_PUBKEY, &chain, &root, ChainDigest::Uncompressed).unwrap();
        assert!(validate_chain(&CARD_PUBKEY, &chain, &root, ChainDigest::Compressed).is_err());
    }

    #[test]
    fn unknown_root_is_counterfeit() {
        let (chain, _) = chain(ChainDigest::Compressed);
        assert!(matches!(
            validate_chain(&CARD_PUBKEY, &chain, &FactoryRoot::Production, ChainDigest::Compressed),
            Err(Error::Counterfeit)
        ));
        assert!(matches!(
            validate_chain(&CARD_PUBKEY, &chain, &FactoryRoot::Emulator, ChainDigest::Compressed),
            Err(Error::Counterfeit)
        ));
    }

    #[test]
    fn truncated_or_reordered_chain() {
        let (chain, root) = chain(ChainDigest::Compressed);
        assert!(validate_chain(&CARD_PUBKEY, &chain[..1], &root, ChainDigest::Compressed).is_err());

        let reversed: Vec<_> = chain.iter().rev().copied().collect();
        assert!(validate_chain(&CARD_PUBKEY, &reversed, &root, ChainDigest::Compressed).is_err());

        assert!(matches!(
            validate_chain(&CARD_PUBKEY, &[], &root, ChainDigest::Compressed),
            Err(Error::Counterfeit)
        ));
    }

    #[test]
    fn bad_header_fails() {
        let (mut chain, root) = chain(ChainDigest::Compressed);
        chain[0][0] = 50;
        assert!(matches!(
            validate_chain(&CARD_PUBKEY, &chain, &root, ChainDigest::Compressed),
            Err(Error::Recovery(50))
        ));
    }

    #[test]
    fn builtin_roots_parse() {
        let production = FactoryRoot::Production.public_key().unwrap();
        assert_eq!(crypto::compressed(&production), FACTORY_ROOT_PUBKEY);
        assert!(FactoryRoot::Emulator.public_key().is_ok());
    }
}
