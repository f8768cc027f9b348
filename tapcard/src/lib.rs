//! # SATSCARD interface library in Rust.
//!
//! This library speaks the Coinkite Tap Protocol from the app side. It builds
//! command frames, parses and verifies the card's answers and sequences the
//! multi-step operations (`status`, `read`, `unseal`, `new`, `certs`, `wait`).
//! Nothing the card reports is trusted before its signature checks out, and
//! `certs` walks the factory certificate chain to prove the card is genuine.
//!
//! The engine is transport agnostic: feed the frames it returns to a card and
//! hand the answers back to [`Satscard::parse_response`], or let one of the
//! blocking drivers do that over a [`Transport`].
//!
//! ```no_run
//! use tapcard::emulator::EmulatorTransport;
//! use tapcard::{FactoryRoot, Options, Satscard};
//!
//! # fn main() -> Result<(), tapcard::Error> {
//! let mut transport = EmulatorTransport::default();
//! let mut card = Satscard::new(Options {
//!     factory_root: FactoryRoot::Emulator,
//!     ..Default::default()
//! });
//!
//! // verify the card before trusting anything else it says
//! card.certs(&mut transport)?;
//!
//! let address = card.read(&mut transport)?;
//! println!("{} holds {}", card.identity().unwrap_or("?"), address);
//!
//! // spend the slot
//! let unsealed = card.unseal(&mut transport, tapcard::Cvc::new("123456")?)?;
//! println!("{}", unsealed.wif);
//! # Ok(())
//! # }
//! ```
pub mod auth;
pub mod certs;
pub mod constants;
pub mod crypto;
#[cfg(unix)]
pub mod emulator;
pub mod frame;
#[cfg(feature = "pcsc")]
pub mod pcsc;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod transport;
pub mod util;
pub mod verify;

pub use certs::{ChainDigest, FactoryRoot};
pub use protocol::{CommandName, Cvc};
pub use transport::Transport;

use constants::PUBKEY_SIZE;
use protocol::{
    Auth, CertsResponse, CheckResponse, Command, NewResponse, ReadResponse, Response,
    StatusResponse, UnsealResponse, WaitResponse,
};
use queue::CommandQueue;
use session::Session;
use transport::Connection;

/// Engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Root the certificate chain must end at.
    pub factory_root: FactoryRoot,
    pub chain_digest: ChainDigest,
    /// Reject responses carrying fields this crate does not know.
    pub strict_decoding: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            factory_root: FactoryRoot::Production,
            chain_digest: ChainDigest::Compressed,
            strict_decoding: true,
        }
    }
}

/// Key material of a slot that was just unsealed.
pub struct Unsealed {
    pub slot: u32,
    pub pubkey: [u8; PUBKEY_SIZE],
    pub address: String,
    /// Private key in wallet import format.
    pub wif: String,
    pub master_pk: [u8; 32],
    pub chain_code: [u8; 32],
}

/// Protocol engine for one SATSCARD.
///
/// One operation runs at a time. Starting another while commands are still
/// pending abandons the first.
#[derive(Default)]
pub struct Satscard {
    options: Options,
    session: Session,
    queue: CommandQueue,
    proto: u32,
    birth: u32,
    version: String,
    auth_delay: u32,
    testnet: bool,
    identity: Option<String>,
    censored_address: Option<String>,
    payment_address: Option<String>,
    certified: bool,
    unsealed: Option<Unsealed>,
}

impl Satscard {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Commands still owed to the card.
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn card_pubkey(&self) -> Option<&[u8; PUBKEY_SIZE]> {
        self.session.card_pubkey()
    }

    /// Card identity, e.g. `YLZ27-NCQ6M-IE2PS-KCXGQ`.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn active_slot(&self) -> u32 {
        self.session.active_slot()
    }

    pub fn number_of_slots(&self) -> u32 {
        self.session.number_of_slots()
    }

    pub fn proto(&self) -> u32 {
        self.proto
    }

    /// Block height the card was made at.
    pub fn birth(&self) -> u32 {
        self.birth
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Seconds the card wants to wait before accepting the CVC again.
    pub fn auth_delay(&self) -> u32 {
        self.auth_delay
    }

    pub fn testnet(&self) -> bool {
        self.testnet
    }

    /// The partly hidden address the card reports in `status`. Not verified.
    pub fn censored_address(&self) -> Option<&str> {
        self.censored_address.as_deref()
    }

    /// Address of the active slot, derived from a verified `read`.
    pub fn payment_address(&self) -> Option<&str> {
        self.payment_address.as_deref()
    }

    /// Whether the card passed `check` and the certificate chain in this session.
    pub fn is_certified(&self) -> bool {
        self.certified
    }

    /// Takes the result of the last successful `unseal`.
    pub fn take_unsealed(&mut self) -> Option<Unsealed> {
        self.unsealed.take()
    }

    /// Frame selecting the tap card applet. The card answers with its status.
    pub fn select_request(&mut self) -> Result<Vec<u8>, Error> {
        self.begin(&[CommandName::Status], false, None);
        Ok(frame::select())
    }

    pub fn status_request(&mut self) -> Result<Vec<u8>, Error> {
        self.start(&[CommandName::Status], false, None)
    }

    /// Reads and verifies the active slot's public key.
    pub fn read_request(&mut self) -> Result<Vec<u8>, Error> {
        self.start(&[CommandName::Read], true, None)
    }

    /// Unseals the active slot and reveals its private key.
    pub fn unseal_request(&mut self, cvc: Cvc) -> Result<Vec<u8>, Error> {
        self.start(&[CommandName::Unseal], true, Some(cvc))
    }

    /// Picks a fresh private key for the active slot once it has been unsealed.
    pub fn new_request(&mut self, cvc: Cvc) -> Result<Vec<u8>, Error> {
        self.start(&[CommandName::New], true, Some(cvc))
    }

    /// Proves the card is genuine: fetch the certificates, read the slot, check the card key.
    pub fn certs_request(&mut self) -> Result<Vec<u8>, Error> {
        self.start(
            &[CommandName::Certs, CommandName::Read, CommandName::Check],
            true,
            None,
        )
    }

    /// Burns one second of the card's authentication delay.
    pub fn wait_request(&mut self) -> Result<Vec<u8>, Error> {
        self.start(&[CommandName::Wait], true, None)
    }

    /// Consumes one response frame and returns the next request, or `None` once
    /// the operation is complete.
    ///
    /// Any error abandons the operation.
    pub fn parse_response(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let result = self.handle_response(frame);

        if let Err(_error) = &result {
            #[cfg(feature = "log")]
            log::warn!("abandoning operation: {_error}");
            self.abandon();
        }

        result
    }

    /// Drops the pending commands together with the nonces, session key and CVC.
    pub fn abandon(&mut self) {
        self.queue.clear();
        self.session.reset();
    }

    fn begin(&mut self, commands: &[CommandName], needs_nonce: bool, cvc: Option<Cvc>) {
        if !self.queue.is_empty() {
            #[cfg(feature = "log")]
            log::debug!("starting over with {} commands pending", self.queue.len());
            self.abandon();
        }

        if needs_nonce && !self.session.has_card_nonce() {
            self.queue.enqueue(CommandName::Status);
        }
        for command in commands {
            self.queue.enqueue(*command);
        }
        if let Some(cvc) = cvc {
            self.queue.stash_cvc(cvc);
        }
    }

    fn start(
        &mut self,
        commands: &[CommandName],
        needs_nonce: bool,
        cvc: Option<Cvc>,
    ) -> Result<Vec<u8>, Error> {
        self.begin(commands, needs_nonce, cvc);

        let request = self
            .next_request()
            .and_then(|request| request.ok_or(Error::QueueEmpty));
        if request.is_err() {
            self.abandon();
        }
        request
    }

    fn next_request(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let Some(name) = self.queue.peek() else {
            self.queue.forget_cvc();
            return Ok(None);
        };

        #[cfg(feature = "log")]
        log::debug!("request: {name}");

        let command = self.build(name)?;
        Ok(Some(frame::command(&command.encode()?)?))
    }

    fn build(&mut self, name: CommandName) -> Result<Command, Error> {
        let mut rng = rand::thread_rng();

        let command = match name {
            CommandName::Status => Command::Status,
            CommandName::Certs => Command::Certs,
            CommandName::Wait => Command::Wait,
            CommandName::Read => Command::Read {
                nonce: self.session.fresh_app_nonce(&mut rng),
            },
            CommandName::Check => Command::Check {
                nonce: self.session.fresh_app_nonce(&mut rng),
            },
            CommandName::Unseal => Command::Unseal {
                slot: self.session.active_slot(),
                auth: self.authenticate(name)?,
            },
            CommandName::New => {
                let slot = self.session.active_slot();
                if slot.saturating_add(1) >= self.session.number_of_slots() {
                    return Err(Error::NoMoreSlots);
                }
                Command::New {
                    slot,
                    auth: self.authenticate(name)?,
                }
            }
        };

        Ok(command)
    }

    fn authenticate(&mut self, name: CommandName) -> Result<Auth, Error> {
        let cvc = self.queue.cvc().ok_or(Error::MissingCvc)?;
        auth::authenticate(&mut self.session, cvc, name)
    }

    fn handle_response(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let name = self.queue.dequeue()?;
        let payload = frame::unwrap(frame)?;

        #[cfg(feature = "log")]
        log::debug!("response: {name}");

        match Response::decode(name, payload, self.options.strict_decoding)? {
            Response::Status(response) => self.on_status(response)?,
            Response::Read(response) => self.on_read(response)?,
            Response::Unseal(response) => self.on_unseal(response)?,
            Response::New(response) => self.on_new(response)?,
            Response::Certs(response) => self.on_certs(response),
            Response::Check(response) => self.on_check(response)?,
            Response::Wait(response) => self.on_wait(response),
            Response::Error(error) => {
                return Err(Error::Card {
                    code: error.code,
                    message: error.error,
                })
            }
        }

        self.next_request()
    }

    fn on_status(&mut self, response: StatusResponse) -> Result<(), Error> {
        let (active, total) = response.slots;

        if let Some(known) = self.session.card_pubkey() {
            if *known != response.pubkey {
                return Err(Error::CardChanged);
            }
            if active < self.session.active_slot() {
                return Err(Error::SlotRegressed {
                    active: self.session.active_slot(),
                    reported: active,
                });
            }
        }

        if active != self.session.active_slot() {
            self.payment_address = None;
        }

        self.session.set_card_pubkey(response.pubkey);
        self.session.set_slots(active, total);
        self.session.adopt_card_nonce(response.card_nonce);

        self.identity = Some(util::identity(&response.pubkey));
        self.proto = response.proto;
        self.birth = response.birth;
        self.version = response.ver;
        self.censored_address = response.addr;
        self.auth_delay = response.auth_delay.unwrap_or_default();
        self.testnet = response.testnet;

        Ok(())
    }

    fn on_read(&mut self, response: ReadResponse) -> Result<(), Error> {
        verify::verify_read(&mut self.session, &response)?;
        self.payment_address = Some(util::payment_address(&response.pubkey, self.testnet)?);
        Ok(())
    }

    fn on_unseal(&mut self, response: UnsealResponse) -> Result<(), Error> {
        let privkey = verify::open_unseal(&mut self.session, &response)?;

        self.unsealed = Some(Unsealed {
            slot: response.slot,
            pubkey: response.pubkey,
            address: util::payment_address(&response.pubkey, self.testnet)?,
            wif: util::wif(&privkey, self.testnet),
            master_pk: response.master_pk,
            chain_code: response.chain_code,
        });

        Ok(())
    }

    fn on_new(&mut self, response: NewResponse) -> Result<(), Error> {
        if response.slot < self.session.active_slot() {
            return Err(Error::SlotRegressed {
                active: self.session.active_slot(),
                reported: response.slot,
            });
        }

        self.session.set_active_slot(response.slot);
        self.session.set_active_slot_pubkey(None);
        self.session.adopt_card_nonce(response.card_nonce);
        self.payment_address = None;
        Ok(())
    }

    fn on_certs(&mut self, response: CertsResponse) {
        self.session.set_certificate_chain(response.cert_chain);
        self.certified = false;
    }

    fn on_check(&mut self, response: CheckResponse) -> Result<(), Error> {
        verify::verify_check(&mut self.session, &response)?;

        let card_pubkey = *self.session.card_pubkey().ok_or(Error::MissingCardKey)?;
        certs::validate_chain(
            &card_pubkey,
            self.session.certificate_chain(),
            &self.options.factory_root,
            self.options.chain_digest,
        )?;

        self.certified = true;
        Ok(())
    }

    fn on_wait(&mut self, response: WaitResponse) {
        self.auth_delay = response.auth_delay;
    }

    /// Refreshes the card status.
    pub fn status<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<(), Error> {
        self.run(transport, Self::status_request)
    }

    /// Returns the verified address of the active slot.
    pub fn read<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<String, Error> {
        self.run(transport, Self::read_request)?;
        self.payment_address.clone().ok_or(Error::Incomplete)
    }

    pub fn unseal<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        cvc: Cvc,
    ) -> Result<Unsealed, Error> {
        self.run(transport, move |card| card.unseal_request(cvc))?;
        self.unsealed.take().ok_or(Error::Incomplete)
    }

    /// Returns the slot that became active.
    pub fn new_slot<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        cvc: Cvc,
    ) -> Result<u32, Error> {
        self.run(transport, move |card| card.new_request(cvc))?;
        Ok(self.session.active_slot())
    }

    /// Succeeds only for a genuine card.
    pub fn certs<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<(), Error> {
        self.run(transport, Self::certs_request)
    }

    /// Returns the remaining authentication delay.
    pub fn wait<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<u32, Error> {
        self.run(transport, Self::wait_request)?;
        Ok(self.auth_delay)
    }

    fn run<T, F>(&mut self, transport: &mut T, request: F) -> Result<(), Error>
    where
        T: Transport + ?Sized,
        F: FnOnce(&mut Self) -> Result<Vec<u8>, Error>,
    {
        let mut connection = Connection::open(transport)?;

        if connection.requires_select() {
            let select = self.select_request()?;
            self.exchange(&mut connection, select)?;
        }

        let first = request(self)?;
        self.exchange(&mut connection, first)
    }

    fn exchange<T: Transport + ?Sized>(
        &mut self,
        connection: &mut Connection<'_, T>,
        request: Vec<u8>,
    ) -> Result<(), Error> {
        let mut next = Some(request);

        while let Some(request) = next {
            let response = connection.transmit(&request).map_err(|error| {
                self.abandon();
                error
            })?;
            next = self.parse_response(&response)?;
        }

        Ok(())
    }
}

/// Error variants that can occur while talking to a card.
#[derive(Debug)]
pub enum Error {
    Transport(String),
    Io(std::io::Error),
    Frame(frame::Error),
    Encoding(protocol::EncodeError),
    Decoding(protocol::DecodeError),
    /// The card answered with an error.
    Card { code: u32, message: String },
    InvalidSignature(CommandName),
    Secp256k1,
    /// Certificate header byte that maps to no recovery id.
    Recovery(u8),
    LengthMismatch(usize, usize),
    Address(bech32::Error),
    KeyMismatch,
    Counterfeit,
    CardChanged,
    SlotRegressed { active: u32, reported: u32 },
    /// Slot number that does not fit the single byte the card signs over.
    SlotOutOfRange(u32),
    NoMoreSlots,
    QueueEmpty,
    MissingCardKey,
    MissingSessionKey,
    MissingCvc,
    NotConnected,
    Incomplete,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            Error::Frame(error) => Some(error),
            Error::Encoding(error) => Some(error),
            Error::Decoding(error) => Some(error),
            Error::Address(error) => Some(error),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<frame::Error> for Error {
    fn from(error: frame::Error) -> Self {
        Error::Frame(error)
    }
}

impl From<protocol::EncodeError> for Error {
    fn from(error: protocol::EncodeError) -> Self {
        Error::Encoding(error)
    }
}

impl From<protocol::DecodeError> for Error {
    fn from(error: protocol::DecodeError) -> Self {
        Error::Decoding(error)
    }
}

impl From<bech32::Error> for Error {
    fn from(error: bech32::Error) -> Self {
        Error::Address(error)
    }
}

impl From<k256::elliptic_curve::Error> for Error {
    fn from(_: k256::elliptic_curve::Error) -> Self {
        Error::Secp256k1
    }
}

impl From<k256::ecdsa::Error> for Error {
    fn from(_: k256::ecdsa::Error) -> Self {
        Error::Secp256k1
    }
}
