//! secp256k1 primitives used by the protocol.

use k256::ecdsa::{signature::hazmat::PrehashVerifier, RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::{CryptoRng, RngCore};

use crate::constants::{CERT_SIZE, PUBKEY_SIZE, SIGNATURE_SIZE};
use crate::util::sha256;
use crate::Error;

/// Generates a fresh ephemeral key pair.
pub fn ephemeral_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (SecretKey, [u8; PUBKEY_SIZE]) {
    let sk = SecretKey::random(rng);
    let pk = compressed(&sk.public_key());
    (sk, pk)
}

/// SEC1 compressed encoding of a public key.
pub fn compressed(pk: &PublicKey) -> [u8; PUBKEY_SIZE] {
    let mut out = [0; PUBKEY_SIZE];
    out.copy_from_slice(pk.to_encoded_point(true).as_bytes());
    out
}

/// SEC1 uncompressed encoding of a public key.
pub fn uncompressed(pk: &PublicKey) -> [u8; 65] {
    let mut out = [0; 65];
    out.copy_from_slice(pk.to_encoded_point(false).as_bytes());
    out
}

pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, Error> {
    Ok(PublicKey::from_sec1_bytes(bytes)?)
}

/// ECDH point `sk * pk`, encoded as `(0x02 | y & 1) || x`.
pub fn shared_point(sk: &SecretKey, pk: &PublicKey) -> Result<[u8; PUBKEY_SIZE], Error> {
    let point = (*pk.as_affine() * *sk.to_nonzero_scalar()).to_affine();
    let shared = PublicKey::from_affine(point)?;
    Ok(compressed(&shared))
}

/// SHA256 of the shared point; both the card and the app derive the same value.
pub fn session_key(sk: &SecretKey, pk: &PublicKey) -> Result<[u8; 32], Error> {
    Ok(sha256(&shared_point(sk, pk)?))
}

/// Bytewise XOR of two equal-length inputs.
pub fn xor(a: &[u8], b: &[u8]) -> Result<Vec<u8>, Error> {
    if a.len() != b.len() {
        return Err(Error::LengthMismatch(a.len(), b.len()));
    }
    Ok(a.iter().zip(b).map(|(x, y)| x ^ y).collect())
}

/// Verifies a 64-byte `r || s` signature over a 32-byte digest.
///
/// High-S signatures are normalized first.
pub fn verify(digest: &[u8; 32], signature: &[u8; SIGNATURE_SIZE], pk: &PublicKey) -> bool {
    let (r, s) = signature.split_at(32);
    let (Ok(r), Ok(s)) = (<[u8; 32]>::try_from(r), <[u8; 32]>::try_from(s)) else {
        return false;
    };
    let Ok(signature) = Signature::from_scalars(r, s) else {
        return false;
    };
    let signature = signature.normalize_s().unwrap_or(signature);

    VerifyingKey::from(pk).verify_prehash(digest, &signature).is_ok()
}

/// Folds the recoverable-signature header variants onto `27..=30`.
///
/// `31..=34` (compressed), `35..=38` (segwit P2SH) and `39..=42` (segwit bech32)
/// carry the same recovery id as `27..=30`. Anything else is left untouched and
/// fails recovery.
pub fn normalize_header(header: u8) -> u8 {
    match header {
        27..=42 => 27 + (header - 27) % 4,
        other => other,
    }
}

/// Recovers the signer of `digest` from a 65-byte `header || r || s` signature.
pub fn recover(digest: &[u8; 32], signature: &[u8; CERT_SIZE]) -> Result<PublicKey, Error> {
    let header = normalize_header(signature[0]);
    let mut recovery_id = header
        .checked_sub(27)
        .and_then(RecoveryId::from_byte)
        .ok_or(Error::Recovery(signature[0]))?;

    let mut signature = Signature::from_slice(&signature[1..])?;
    if let Some(normalized) = signature.normalize_s() {
        // negating s mirrors R across the x axis
        signature = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let vk = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)?;
    Ok(PublicKey::from(&vk))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k256::ecdsa::{signature::hazmat::PrehashSigner, SigningKey};

    // generated using Python
    pub const CARD_PUBKEY: [u8; 33] = [
        2, 132, 191, 117, 98, 38, 43, 189, 105, 64, 8, 87, 72, 243, 190, 106, 250, 82, 174, 49,
        113, 85, 24, 30, 206, 49, 182, 99, 81, 204, 255, 164, 176,
    ];

    pub const EPHEMERAL_SK: [u8; 32] = [
        54, 87, 69, 21, 237, 128, 12, 240, 76, 202, 164, 71, 187, 45, 83, 164, 166, 220, 223, 141,
        45, 194, 122, 194, 238, 254, 252, 128, 11, 241, 248, 173,
    ];

    pub const EPHEMERAL_PK: [u8; 33] = [
        3, 33, 198, 165, 129, 148, 5, 205, 180, 151, 148, 169, 226, 233, 148, 157, 104, 65, 120,
        190, 220, 122, 123, 133, 96, 158, 130, 136, 31, 143, 114, 133, 219,
    ];

    pub const SESSION_KEY: [u8; 32] = [
        148, 66, 218, 60, 174, 181, 126, 47, 130, 131, 199, 239, 20, 27, 195, 251, 41, 246, 137,
        69, 65, 179, 69, 62, 103, 198, 132, 186, 120, 67, 206, 114,
    ];

    pub fn card_secret() -> SecretKey {
        let bytes: [u8; 32] = core::array::from_fn(|i| i as u8 + 1);
        SecretKey::from_slice(&bytes).unwrap()
    }

    pub fn ephemeral_secret() -> SecretKey {
        SecretKey::from_slice(&EPHEMERAL_SK).unwrap()
    }

    #[test]
    fn session_key_test() {
        let card = card_secret();
        assert_eq!(compressed(&card.public_key()), CARD_PUBKEY);
        assert_eq!(compressed(&ephemeral_secret().public_key()), EPHEMERAL_PK);

        let app_side = session_key(&ephemeral_secret(), &card.public_key()).unwrap();
        let card_side = session_key(&card, &ephemeral_secret().public_key()).unwrap();
        assert_eq!(app_side, SESSION_KEY);
        assert_eq!(card_side, SESSION_KEY);
    }

    #[test]
    fn shared_point_parity() {
        let point = shared_point(&ephemeral_secret(), &card_secret().public_key()).unwrap();
        assert!(point[0] == 0x02 || point[0] == 0x03);
        assert!(parse_public_key(&point).is_ok());
    }

    #[test]
    fn ephemeral_keys_differ() {
        let mut rng = rand::thread_rng();
        let (sk1, pk1) = ephemeral_keypair(&mut rng);
        let (_, pk2) = ephemeral_keypair(&mut rng);
        assert_ne!(pk1, pk2);
        assert_eq!(compressed(&sk1.public_key()), pk1);
    }

    #[test]
    fn xor_test() {
        let a = [0x0f, 0xf0, 0xaa];
        let b = [0xff, 0x0f, 0x55];
        let once = xor(&a, &b).unwrap();
        assert_eq!(once, [0xf0, 0xff, 0xff]);
        assert_eq!(xor(&once, &b).unwrap(), a);
        assert!(matches!(xor(&a, &b[..2]), Err(Error::LengthMismatch(3, 2))));
    }

    #[test]
    fn verify_test() {
        let signer = SigningKey::from(card_secret());
        let digest = sha256(b"message");
        let signature: Signature = signer.sign_prehash(&digest).unwrap();
        let signature: [u8; 64] = signature.to_bytes().as_slice().try_into().unwrap();
        let pk = card_secret().public_key();

        assert!(verify(&digest, &signature, &pk));
        assert!(!verify(&sha256(b"other"), &signature, &pk));

        let mut flipped = signature;
        flipped[10] ^= 0x01;
        assert!(!verify(&digest, &flipped, &pk));
    }

    #[test]
    fn verify_accepts_high_s() {
        let signer = SigningKey::from(card_secret());
        let digest = sha256(b"message");
        let signature: Signature = signer.sign_prehash(&digest).unwrap();
        let (r, s) = signature.split_scalars();
        let high = Signature::from_scalars(r.to_bytes(), (-*s).to_bytes()).unwrap();
        let high: [u8; 64] = high.to_bytes().as_slice().try_into().unwrap();

        assert!(verify(&digest, &high, &card_secret().public_key()));
    }

    #[test]
    fn header_normalization() {
        for header in 27..=42u8 {
            let normalized = normalize_header(header);
            assert!((27..=30).contains(&normalized));
            assert_eq!((normalized - 27) % 4, (header - 27) % 4);
        }
        assert_eq!(normalize_header(39), 27);
        assert_eq!(normalize_header(42), 30);
        assert_eq!(normalize_header(35), 27);
        assert_eq!(normalize_header(38), 30);
        assert_eq!(normalize_header(26), 26);
        assert_eq!(normalize_header(43), 43);
    }

    #[test]
    fn recover_test() {
        let signer = SigningKey::from(card_secret());
        let digest = sha256(b"certificate");
        let (signature, recovery_id) = signer.sign_prehash_recoverable(&digest).unwrap();

        for base in [27u8, 31, 35, 39] {
            let mut cert = [0; 65];
            cert[0] = base + recovery_id.to_byte();
            cert[1..].copy_from_slice(&signature.to_bytes());
            let recovered = recover(&digest, &cert).unwrap();
            assert_eq!(compressed(&recovered), CARD_PUBKEY);
        }

        let mut cert = [0; 65];
        cert[1..].copy_from_slice(&signature.to_bytes());
        for header in [0u8, 26, 43, 0xff] {
            cert[0] = header;
            assert!(matches!(recover(&digest, &cert), Err(Error::Recovery(h)) if h == header));
        }
    }
}
