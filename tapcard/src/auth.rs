//! CVC masking for authenticated commands.

use k256::SecretKey;

use crate::crypto;
use crate::protocol::{Auth, CommandName, Cvc};
use crate::session::Session;
use crate::util::Sha256Engine;
use crate::Error;

/// Builds the authentication fields for `command` with a fresh ephemeral key.
///
/// The card nonce is consumed and the session key is kept in `session` for
/// decrypting the response.
pub fn authenticate(session: &mut Session, cvc: &Cvc, command: CommandName) -> Result<Auth, Error> {
    let (ephemeral, _) = crypto::ephemeral_keypair(&mut rand::thread_rng());
    authenticate_with(session, cvc, command, &ephemeral)
}

/// Same as [`authenticate`] with a caller-chosen ephemeral key.
pub fn authenticate_with(
    session: &mut Session,
    cvc: &Cvc,
    command: CommandName,
    ephemeral: &SecretKey,
) -> Result<Auth, Error> {
    let card_pubkey = session.card_pubkey().ok_or(Error::MissingCardKey)?;
    let card_pubkey = crypto::parse_public_key(card_pubkey)?;
    let session_key = crypto::session_key(ephemeral, &card_pubkey)?;

    let card_nonce = session.consume_card_nonce();
    let mut engine = Sha256Engine::default();
    engine.update(&card_nonce);
    engine.update(command.as_str().as_bytes());
    let md = engine.finalize();

    #[cfg(feature = "log")]
    log::debug!("{command}: card nonce {card_nonce:02x?}, mask digest {md:02x?}");

    let cvc = cvc.as_bytes();
    let mask = crypto::xor(&session_key, &md)?;
    let xcvc = crypto::xor(cvc, &mask[..cvc.len()])?;

    session.set_session_key(session_key);

    let epubkey = crypto::compressed(&ephemeral.public_key());
    #[cfg(feature = "log")]
    log::debug!("{command}: ephemeral pubkey {epubkey:02x?}");

    Ok(Auth { epubkey, xcvc })
}
