//! Per-card state carried between commands.

use rand::{CryptoRng, RngCore};

use crate::constants::{CARD_NONCE_SIZE, CERT_SIZE, PUBKEY_SIZE, USER_NONCE_SIZE};

/// What the app knows about the card it is talking to.
///
/// A zero card nonce means no fresh nonce is held and a `status` round trip
/// is needed before anything nonce-dependent.
#[derive(Default)]
pub struct Session {
    card_pubkey: Option<[u8; PUBKEY_SIZE]>,
    card_nonce: [u8; CARD_NONCE_SIZE],
    app_nonce: [u8; USER_NONCE_SIZE],
    session_key: Option<[u8; 32]>,
    active_slot: u32,
    number_of_slots: u32,
    active_slot_pubkey: Option<[u8; PUBKEY_SIZE]>,
    certificate_chain: Vec<[u8; CERT_SIZE]>,
}

impl Session {
    pub fn card_pubkey(&self) -> Option<&[u8; PUBKEY_SIZE]> {
        self.card_pubkey.as_ref()
    }

    pub fn card_nonce(&self) -> &[u8; CARD_NONCE_SIZE] {
        &self.card_nonce
    }

    pub fn has_card_nonce(&self) -> bool {
        self.card_nonce != [0; CARD_NONCE_SIZE]
    }

    pub fn app_nonce(&self) -> &[u8; USER_NONCE_SIZE] {
        &self.app_nonce
    }

    pub fn active_slot(&self) -> u32 {
        self.active_slot
    }

    pub fn number_of_slots(&self) -> u32 {
        self.number_of_slots
    }

    pub fn active_slot_pubkey(&self) -> Option<&[u8; PUBKEY_SIZE]> {
        self.active_slot_pubkey.as_ref()
    }

    pub fn certificate_chain(&self) -> &[[u8; CERT_SIZE]] {
        &self.certificate_chain
    }

    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    pub(crate) fn set_card_pubkey(&mut self, pubkey: [u8; PUBKEY_SIZE]) {
        self.card_pubkey = Some(pubkey);
    }

    pub(crate) fn set_slots(&mut self, active: u32, total: u32) {
        self.set_active_slot(active);
        self.number_of_slots = total;
    }

    pub(crate) fn set_active_slot(&mut self, slot: u32) {
        if slot != self.active_slot {
            self.active_slot_pubkey = None;
        }
        self.active_slot = slot;
    }

    pub(crate) fn set_active_slot_pubkey(&mut self, pubkey: Option<[u8; PUBKEY_SIZE]>) {
        self.active_slot_pubkey = pubkey;
    }

    pub(crate) fn set_certificate_chain(&mut self, chain: Vec<[u8; CERT_SIZE]>) {
        self.certificate_chain = chain;
    }

    pub(crate) fn adopt_card_nonce(&mut self, nonce: [u8; CARD_NONCE_SIZE]) {
        self.card_nonce = nonce;
    }

    /// Hands out the card nonce for use in an authenticated command and forgets it.
    pub(crate) fn consume_card_nonce(&mut self) -> [u8; CARD_NONCE_SIZE] {
        std::mem::take(&mut self.card_nonce)
    }

    /// Picks a new random app nonce. The card rejects nonces made of one repeated byte.
    pub(crate) fn fresh_app_nonce<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> [u8; USER_NONCE_SIZE] {
        loop {
            rng.fill_bytes(&mut self.app_nonce);
            if self.app_nonce.iter().any(|b| *b != self.app_nonce[0]) {
                return self.app_nonce;
            }
        }
    }

    pub(crate) fn set_session_key(&mut self, key: [u8; 32]) {
        self.session_key = Some(key);
    }

    pub(crate) fn take_session_key(&mut self) -> Option<[u8; 32]> {
        self.session_key.take()
    }

    /// Drops everything tied to the in-flight exchange. Card identity and slot
    /// knowledge survive.
    pub(crate) fn reset(&mut self) {
        self.card_nonce = [0; CARD_NONCE_SIZE];
        self.app_nonce = [0; USER_NONCE_SIZE];
        self.session_key = None;
    }
}
