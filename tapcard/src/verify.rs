//! Checks on card responses before anything in them is trusted.

use k256::SecretKey;

use crate::constants::{OPENDIME, PRIVKEY_SIZE};
use crate::crypto;
use crate::protocol::{CheckResponse, CommandName, ReadResponse, UnsealResponse};
use crate::session::Session;
use crate::util::Sha256Engine;
use crate::Error;

fn signed_digest(parts: &[&[u8]]) -> [u8; 32] {
    let mut engine = Sha256Engine::default();
    engine.update(OPENDIME);
    for part in parts {
        engine.update(part);
    }
    engine.finalize()
}

/// Verifies the slot signature of a `read` answer and adopts its slot key and nonce.
pub fn verify_read(session: &mut Session, response: &ReadResponse) -> Result<(), Error> {
    let slot = u8::try_from(session.active_slot())
        .map_err(|_| Error::SlotOutOfRange(session.active_slot()))?;
    let slot = [slot];
    let digest = signed_digest(&[
        session.card_nonce().as_slice(),
        session.app_nonce().as_slice(),
        slot.as_slice(),
    ]);

    #[cfg(feature = "log")]
    log::debug!(
        "read: card nonce {:02x?}, app nonce {:02x?}, slot {}, digest {digest:02x?}",
        session.card_nonce(),
        session.app_nonce(),
        slot[0]
    );

    let slot_key = crypto::parse_public_key(&response.pubkey)
        .map_err(|_| Error::InvalidSignature(CommandName::Read))?;
    if !crypto::verify(&digest, &response.sig, &slot_key) {
        return Err(Error::InvalidSignature(CommandName::Read));
    }

    session.set_active_slot_pubkey(Some(response.pubkey));
    session.adopt_card_nonce(response.card_nonce);
    Ok(())
}

/// Verifies that a `check` answer was signed by the card key.
///
/// The certificate chain still has to be validated afterwards.
pub fn verify_check(session: &mut Session, response: &CheckResponse) -> Result<(), Error> {
    let card_pubkey = session.card_pubkey().ok_or(Error::MissingCardKey)?;
    let card_pubkey = crypto::parse_public_key(card_pubkey)?;

    let slot_pubkey = session.active_slot_pubkey().map(|pk| pk.as_slice()).unwrap_or_default();
    let digest = signed_digest(&[
        session.card_nonce().as_slice(),
        session.app_nonce().as_slice(),
        slot_pubkey,
    ]);

    #[cfg(feature = "log")]
    log::debug!(
        "check: card nonce {:02x?}, app nonce {:02x?}, slot pubkey {slot_pubkey:02x?}, digest {digest:02x?}",
        session.card_nonce(),
        session.app_nonce()
    );

    if !crypto::verify(&digest, &response.auth_sig, &card_pubkey) {
        return Err(Error::InvalidSignature(CommandName::Check));
    }

    session.adopt_card_nonce(response.card_nonce);
    Ok(())
}

/// Decrypts the slot private key of an `unseal` answer.
///
/// The session key is consumed. The decrypted key must belong to the
/// public key the card reported for the slot.
pub fn open_unseal(session: &mut Session, response: &UnsealResponse) -> Result<[u8; PRIVKEY_SIZE], Error> {
    let session_key = session.take_session_key().ok_or(Error::MissingSessionKey)?;

    let mut privkey = [0; PRIVKEY_SIZE];
    privkey.copy_from_slice(&crypto::xor(&response.privkey, &session_key)?);

    let secret = SecretKey::from_slice(&privkey).map_err(|_| Error::KeyMismatch)?;
    if crypto::compressed(&secret.public_key()) != response.pubkey {
        return Err(Error::KeyMismatch);
    }

    #[cfg(feature = "log")]
    log::debug!(
        "unseal: slot {} opened, pubkey {:02x?}",
        response.slot,
        response.pubkey
    );

    session.adopt_card_nonce(response.card_nonce);
    Ok(privkey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::tests::{card_secret, ephemeral_secret, CARD_PUBKEY, SESSION_KEY};
    use crate::util::sha256;
    use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};
    use rand::SeedableRng;

    fn sign(key: &SecretKey, digest: &[u8; 32]) -> [u8; 64] {
        let signature: Signature = SigningKey::from(key).sign_prehash(digest).unwrap();
        signature.to_bytes().as_slice().try_into().unwrap()
    }

    fn slot_secret() -> SecretKey {
        SecretKey::from_slice(&[0x42; 32]).unwrap()
    }

    fn session() -> Session {
        let mut session = Session::default();
        session.set_card_pubkey(CARD_PUBKEY);
        session.set_slots(2, 10);
        session.adopt_card_nonce([0x11; 16]);
        session.fresh_app_nonce(&mut rand::rngs::StdRng::seed_from_u64(7));
        session
    }

    fn message(session: &Session, tail: &[u8]) -> [u8; 32] {
        let mut message = b"OPENDIME".to_vec();
        message.extend(session.card_nonce());
        message.extend(session.app_nonce());
        message.extend(tail);
        sha256(&message)
    }

    fn read_response() -> ReadResponse {
        ReadResponse {
            sig: sign(&slot_secret(), &message(&session(), &[2])),
            pubkey: crypto::compressed(&slot_secret().public_key()),
            card_nonce: [0x22; 16],
        }
    }

    #[test]
    fn read_test() {
        let mut session = session();
        let response = read_response();

        verify_read(&mut session, &response).unwrap();

        assert_eq!(session.active_slot_pubkey(), Some(&response.pubkey));
        assert_eq!(session.card_nonce(), &[0x22; 16]);
    }

    #[test]
    fn read_rejects_any_bit_flip() {
        let response = read_response();

        for byte in 0..64 {
            for bit in 0..8 {
                let mut tampered = response.clone();
                tampered.sig[byte] ^= 1 << bit;
                assert!(verify_read(&mut session(), &tampered).is_err());
            }
        }

        for byte in 0..33 {
            for bit in 0..8 {
                let mut tampered = response.clone();
                tampered.pubkey[byte] ^= 1 << bit;
                assert!(verify_read(&mut session(), &tampered).is_err());
            }
        }
    }

    #[test]
    fn read_failure_keeps_nonce() {
        let mut session = session();
        let mut response = read_response();
        response.sig[0] ^= 0x80;

        assert!(matches!(
            verify_read(&mut session, &response),
            Err(Error::InvalidSignature(CommandName::Read))
        ));
        assert_eq!(session.card_nonce(), &[0x11; 16]);
        assert!(session.active_slot_pubkey().is_none());
    }

    #[test]
    fn read_signs_active_slot() {
        let mut session = session();
        session.set_slots(3, 10);
        assert!(verify_read(&mut session, &read_response()).is_err());
    }

    #[test]
    fn read_rejects_slot_past_one_byte() {
        let mut session = session();
        session.set_slots(256, 300);
        assert!(matches!(
            verify_read(&mut session, &read_response()),
            Err(Error::SlotOutOfRange(256))
        ));
        assert_eq!(session.card_nonce(), &[0x11; 16]);
    }

    #[test]
    fn check_test() {
        let slot_pubkey = crypto::compressed(&slot_secret().public_key());

        let mut bare = session();
        let response = CheckResponse {
            auth_sig: sign(&card_secret(), &message(&bare, &[])),
            card_nonce: [0x33; 16],
        };
        verify_check(&mut bare, &response).unwrap();
        assert_eq!(bare.card_nonce(), &[0x33; 16]);

        let mut with_slot = session();
        with_slot.set_active_slot_pubkey(Some(slot_pubkey));
        assert!(verify_check(&mut with_slot, &response).is_err());

        let mut with_slot = session();
        with_slot.set_active_slot_pubkey(Some(slot_pubkey));
        let response = CheckResponse {
            auth_sig: sign(&card_secret(), &message(&with_slot, &slot_pubkey)),
            card_nonce: [0x33; 16],
        };
        verify_check(&mut with_slot, &response).unwrap();
    }

    #[test]
    fn check_rejects_other_signer() {
        let mut session = session();
        let response = CheckResponse {
            auth_sig: sign(&ephemeral_secret(), &message(&session, &[])),
            card_nonce: [0x33; 16],
        };
        assert!(matches!(
            verify_check(&mut session, &response),
            Err(Error::InvalidSignature(CommandName::Check))
        ));
    }

    fn unseal_response() -> UnsealResponse {
        UnsealResponse {
            slot: 0,
            // generated using Python: card key XOR session key
            privkey: [
                149, 64, 217, 56, 171, 179, 121, 39, 139, 137, 204, 227, 25, 21, 204, 235, 56, 228,
                154, 81, 84, 165, 82, 38, 126, 220, 159, 166, 101, 93, 209, 82,
            ],
            pubkey: CARD_PUBKEY,
            master_pk: [0; 32],
            chain_code: [0; 32],
            card_nonce: [0x44; 16],
        }
    }

    #[test]
    fn unseal_test() {
        let mut session = session();
        session.set_session_key(SESSION_KEY);

        let privkey = open_unseal(&mut session, &unseal_response()).unwrap();

        assert_eq!(privkey.as_slice(), card_secret().to_bytes().as_slice());
        assert_eq!(
            crate::util::wif(&privkey, false),
            "KwFfpDsaF7yxCELuyrH9gP5XL7TAt5b9HPWC1xCQbmrxvhJgMQHb"
        );
        assert!(!session.has_session_key());
        assert_eq!(session.card_nonce(), &[0x44; 16]);
    }

    #[test]
    fn unseal_key_mismatch() {
        let mut session = session();
        session.set_session_key(SESSION_KEY);
        let mut response = unseal_response();
        response.pubkey = crypto::compressed(&slot_secret().public_key());

        assert!(matches!(
            open_unseal(&mut session, &response),
            Err(Error::KeyMismatch)
        ));
    }

    #[test]
    fn unseal_needs_session_key() {
        assert!(matches!(
            open_unseal(&mut session(), &unseal_response()),
            Err(Error::MissingSessionKey)
        ));
    }
}
