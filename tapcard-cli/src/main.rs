use std::path::PathBuf;

use clap::Parser;

use tapcard::protocol::EncodeError;
use tapcard::{Cvc, FactoryRoot, Options, Satscard, Transport};

#[derive(clap::Parser)]
#[clap(author, version, about)]
#[clap(propagate_version = true)]
struct Cli {
    /// The main command to execute
    #[clap(subcommand)]
    command: Command,

    /// Talk to the card emulator instead of an NFC reader
    #[clap(long)]
    emulator: bool,

    /// Path of the emulator socket
    #[clap(long, default_value = "/tmp/ecard-pipe")]
    socket: PathBuf,

    /// The PC/SC reader to use (default: first one found)
    #[clap(long)]
    reader: Option<String>,

    /// Accept card responses carrying unknown fields
    #[clap(long)]
    lenient: bool,

    /// Print debug logs
    #[clap(long)]
    debug: bool,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Show the card status
    Status,

    /// Show the card identity
    Identity,

    /// Show the verified address of the active slot
    Read,

    /// Verify that the card was made by Coinkite
    Certs,

    /// Unseal the active slot and show its private key
    Unseal {
        /// The CVC printed on the back of the card. Will be prompted if missing.
        #[clap(long)]
        cvc: Option<String>,
    },

    /// Pick a new key for the next slot after the active one was unsealed
    New {
        /// The CVC printed on the back of the card. Will be prompted if missing.
        #[clap(long)]
        cvc: Option<String>,
    },

    /// Wait out the authentication delay after wrong CVC attempts
    Wait,
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    handle(cli)
}

fn handle(cli: Cli) -> Result<(), Error> {
    let mut transport = transport(&cli)?;
    let transport = transport.as_mut();

    let mut card = Satscard::new(Options {
        factory_root: if cli.emulator {
            FactoryRoot::Emulator
        } else {
            FactoryRoot::Production
        },
        strict_decoding: !cli.lenient,
        ..Default::default()
    });

    match cli.command {
        Command::Status => {
            card.status(transport)?;
            println!("identity: {}", card.identity().unwrap_or_default());
            if let Some(pubkey) = card.card_pubkey() {
                println!("pubkey: {}", hex::encode(pubkey));
            }
            println!(
                "slot: {} of {}",
                card.active_slot() + 1,
                card.number_of_slots()
            );
            if let Some(address) = card.censored_address() {
                println!("address: {address}");
            }
            println!("version: {}", card.version());
            println!("birth: {}", card.birth());
            if card.testnet() {
                println!("network: testnet");
            }
            if card.auth_delay() > 0 {
                println!("auth delay: {}s", card.auth_delay());
            }
        }

        Command::Identity => {
            card.status(transport)?;
            println!("{}", card.identity().unwrap_or_default());
        }

        Command::Read => {
            println!("{}", card.read(transport)?);
        }

        Command::Certs => {
            card.certs(transport)?;
            println!("genuine card {}", card.identity().unwrap_or_default());
        }

        Command::Unseal { cvc } => {
            let unsealed = card.unseal(transport, prompt_cvc(cvc)?)?;
            println!("slot: {}", unsealed.slot);
            println!("address: {}", unsealed.address);
            println!("private key: {}", unsealed.wif);
        }

        Command::New { cvc } => {
            let slot = card.new_slot(transport, prompt_cvc(cvc)?)?;
            eprintln!("Slot {} is now active", slot + 1);
            println!("{}", card.read(transport)?);
        }

        Command::Wait => {
            card.status(transport)?;
            let mut delay = card.auth_delay();
            while delay > 0 {
                eprintln!("{delay}s left");
                delay = card.wait(transport)?;
            }
            eprintln!("OK");
        }
    }

    Ok(())
}

fn prompt_cvc(cvc: Option<String>) -> Result<Cvc, Error> {
    let cvc = match cvc {
        Some(cvc) => cvc,
        None => rpassword::prompt_password("Enter the CVC: ")?,
    };

    Ok(Cvc::new(cvc.trim())?)
}

fn transport(cli: &Cli) -> Result<Box<dyn Transport>, Error> {
    if cli.emulator {
        emulator(cli)
    } else {
        reader(cli)
    }
}

#[cfg(unix)]
fn emulator(cli: &Cli) -> Result<Box<dyn Transport>, Error> {
    Ok(Box::new(tapcard::emulator::EmulatorTransport::new(&cli.socket)))
}

#[cfg(not(unix))]
fn emulator(_: &Cli) -> Result<Box<dyn Transport>, Error> {
    Err(Error::NoTransport)
}

#[cfg(feature = "pcsc")]
fn reader(cli: &Cli) -> Result<Box<dyn Transport>, Error> {
    Ok(Box::new(tapcard::pcsc::PcscTransport::new(
        cli.reader.as_deref(),
    )?))
}

#[cfg(not(feature = "pcsc"))]
fn reader(cli: &Cli) -> Result<Box<dyn Transport>, Error> {
    let _ = &cli.reader;
    Err(Error::NoTransport)
}

#[derive(Debug)]
enum Error {
    Tapcard(tapcard::Error),
    Encode(EncodeError),
    Io(std::io::Error),
    /// Built without PC/SC support and `--emulator` not given.
    NoTransport,
}

impl From<tapcard::Error> for Error {
    fn from(error: tapcard::Error) -> Self {
        Self::Tapcard(error)
    }
}

impl From<EncodeError> for Error {
    fn from(error: EncodeError) -> Self {
        Self::Encode(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}
