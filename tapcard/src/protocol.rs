//! CBOR messages exchanged with the card.

use std::fmt;
use std::str::FromStr;

use ciborium::Value;
use enum_as_inner::EnumAsInner;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::constants::{
    CARD_NONCE_SIZE, CERT_SIZE, CVC_MAX_LEN, CVC_MIN_LEN, PRIVKEY_SIZE, PUBKEY_SIZE,
    SIGNATURE_SIZE, USER_NONCE_SIZE,
};

macro_rules! impl_new_with_range {
    ($thing:ident, $range:expr) => {
        impl_new_with_range!($thing, $range, 0_u8..);
    };
    ($thing:ident, $range:expr, $valid_char_range:expr) => {
        impl $thing {
            pub fn new(value: impl AsRef<[u8]>) -> Result<Self, EncodeError> {
                let value = value.as_ref();
                for c in value {
                    if !$valid_char_range.contains(c) {
                        return Err(EncodeError::InvalidCharValue);
                    }
                }
                let type_name = std::any::type_name::<$thing>();
                #[allow(unused_comparisons)]
                if value.len() < $range.start || value.len() > $range.end {
                    return Err(EncodeError::LengthMismatch(type_name, value.len()));
                }
                Ok(Self(value.to_owned()))
            }
        }
    };
}

/// Card verification code printed on the back of the card.
#[derive(Clone, PartialEq, Eq)]
pub struct Cvc(Vec<u8>);

impl_new_with_range!(Cvc, CVC_MIN_LEN..CVC_MAX_LEN, 0x21_u8..=0x7e);

impl Cvc {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Cvc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cvc(..)")
    }
}

/// Names of the commands this crate speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Status,
    Read,
    Unseal,
    New,
    Certs,
    Check,
    Wait,
}

impl CommandName {
    pub const ALL: [CommandName; 7] = [
        CommandName::Status,
        CommandName::Read,
        CommandName::Unseal,
        CommandName::New,
        CommandName::Certs,
        CommandName::Check,
        CommandName::Wait,
    ];

    /// The `cmd` string on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::Status => "status",
            CommandName::Read => "read",
            CommandName::Unseal => "unseal",
            CommandName::New => "new",
            CommandName::Certs => "certs",
            CommandName::Check => "check",
            CommandName::Wait => "wait",
        }
    }

    /// Whether the command carries an encrypted CVC.
    pub fn is_authenticated(self) -> bool {
        matches!(self, CommandName::Unseal | CommandName::New)
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownCommand(s.to_owned()))
    }
}

/// Authentication fields attached to commands that require the CVC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    /// App's ephemeral public key.
    pub epubkey: [u8; PUBKEY_SIZE],
    /// CVC masked with the session key.
    pub xcvc: Vec<u8>,
}

/// Commands that can be sent to a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Read { nonce: [u8; USER_NONCE_SIZE] },
    Unseal { slot: u32, auth: Auth },
    New { slot: u32, auth: Auth },
    Certs,
    Check { nonce: [u8; USER_NONCE_SIZE] },
    Wait,
}

#[derive(Serialize, Deserialize)]
struct WireCommand {
    cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    slot: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    epubkey: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    xcvc: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    nonce: Option<Vec<u8>>,
}

const COMMAND_FIELDS: &[&str] = &["cmd", "slot", "epubkey", "xcvc", "nonce"];

impl Command {
    pub fn name(&self) -> CommandName {
        match self {
            Command::Status => CommandName::Status,
            Command::Read { .. } => CommandName::Read,
            Command::Unseal { .. } => CommandName::Unseal,
            Command::New { .. } => CommandName::New,
            Command::Certs => CommandName::Certs,
            Command::Check { .. } => CommandName::Check,
            Command::Wait => CommandName::Wait,
        }
    }

    /// Encodes the command as a CBOR map.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut wire = WireCommand {
            cmd: self.name().as_str().to_owned(),
            slot: None,
            epubkey: None,
            xcvc: None,
            nonce: None,
        };

        match self {
            Command::Status | Command::Certs | Command::Wait => {}
            Command::Read { nonce } | Command::Check { nonce } => {
                wire.nonce = Some(nonce.to_vec());
            }
            Command::Unseal { slot, auth } | Command::New { slot, auth } => {
                wire.slot = Some(*slot);
                wire.epubkey = Some(auth.epubkey.to_vec());
                wire.xcvc = Some(auth.xcvc.clone());
            }
        }

        to_cbor(&wire)
    }

    /// Decodes a CBOR command map, as a card would.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let value = parse(payload)?;
        let wire: WireCommand = body(&value, COMMAND_FIELDS, true)?;

        let command = match wire.cmd.parse()? {
            CommandName::Status => Command::Status,
            CommandName::Certs => Command::Certs,
            CommandName::Wait => Command::Wait,
            CommandName::Read => Command::Read {
                nonce: fixed("nonce", wire.nonce)?,
            },
            CommandName::Check => Command::Check {
                nonce: fixed("nonce", wire.nonce)?,
            },
            name @ (CommandName::Unseal | CommandName::New) => {
                let slot = wire.slot.ok_or(DecodeError::MissingField("slot"))?;
                let auth = Auth {
                    epubkey: fixed("epubkey", wire.epubkey)?,
                    xcvc: wire.xcvc.ok_or(DecodeError::MissingField("xcvc"))?,
                };
                if name == CommandName::Unseal {
                    Command::Unseal { slot, auth }
                } else {
                    Command::New { slot, auth }
                }
            }
        };

        Ok(command)
    }
}

fn fixed<const N: usize>(field: &'static str, value: Option<Vec<u8>>) -> Result<[u8; N], DecodeError> {
    let value = value.ok_or(DecodeError::MissingField(field))?;
    let actual = value.len();
    value.try_into().map_err(|_| DecodeError::Length {
        field,
        expected: N,
        actual,
    })
}

/// Fixed-size byte strings as CBOR bytes.
mod byte_array {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
        let len = bytes.len();
        bytes
            .into_vec()
            .try_into()
            .map_err(|_| D::Error::invalid_length(len, &"a fixed-size byte string"))
    }
}

/// Arrays of fixed-size byte strings.
mod byte_array_seq {
    use serde::{de::Error, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer, const N: usize>(
        items: &Vec<[u8; N]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in items {
            seq.serialize_element(serde_bytes::Bytes::new(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<Vec<[u8; N]>, D::Error> {
        Vec::<serde_bytes::ByteBuf>::deserialize(deserializer)?
            .into_iter()
            .map(|bytes| {
                let len = bytes.len();
                bytes
                    .into_vec()
                    .try_into()
                    .map_err(|_| D::Error::invalid_length(len, &"a fixed-size byte string"))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub proto: u32,
    pub ver: String,
    pub birth: u32,
    /// Active slot and total number of slots.
    pub slots: (u32, u32),
    /// Censored address of the active slot, if it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(with = "byte_array")]
    pub pubkey: [u8; PUBKEY_SIZE],
    #[serde(with = "byte_array")]
    pub card_nonce: [u8; CARD_NONCE_SIZE],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_delay: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub testnet: bool,
}

const STATUS_FIELDS: &[&str] = &[
    "cmd",
    "proto",
    "ver",
    "birth",
    "slots",
    "addr",
    "pubkey",
    "card_nonce",
    "auth_delay",
    "testnet",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResponse {
    #[serde(with = "byte_array")]
    pub sig: [u8; SIGNATURE_SIZE],
    /// Public key of the active slot.
    #[serde(with = "byte_array")]
    pub pubkey: [u8; PUBKEY_SIZE],
    #[serde(with = "byte_array")]
    pub card_nonce: [u8; CARD_NONCE_SIZE],
}

const READ_FIELDS: &[&str] = &["cmd", "sig", "pubkey", "card_nonce"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsealResponse {
    pub slot: u32,
    /// Slot private key, XOR-ed with the session key.
    #[serde(with = "byte_array")]
    pub privkey: [u8; PRIVKEY_SIZE],
    #[serde(with = "byte_array")]
    pub pubkey: [u8; PUBKEY_SIZE],
    #[serde(with = "byte_array")]
    pub master_pk: [u8; 32],
    #[serde(with = "byte_array")]
    pub chain_code: [u8; 32],
    #[serde(with = "byte_array")]
    pub card_nonce: [u8; CARD_NONCE_SIZE],
}

const UNSEAL_FIELDS: &[&str] = &[
    "cmd",
    "slot",
    "privkey",
    "pubkey",
    "master_pk",
    "chain_code",
    "card_nonce",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResponse {
    pub slot: u32,
    #[serde(with = "byte_array")]
    pub card_nonce: [u8; CARD_NONCE_SIZE],
}

const NEW_FIELDS: &[&str] = &["cmd", "slot", "card_nonce"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertsResponse {
    /// Recoverable signatures, card-side first.
    #[serde(with = "byte_array_seq")]
    pub cert_chain: Vec<[u8; CERT_SIZE]>,
}

const CERTS_FIELDS: &[&str] = &["cmd", "cert_chain"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    #[serde(with = "byte_array")]
    pub auth_sig: [u8; SIGNATURE_SIZE],
    #[serde(with = "byte_array")]
    pub card_nonce: [u8; CARD_NONCE_SIZE],
}

const CHECK_FIELDS: &[&str] = &["cmd", "auth_sig", "card_nonce"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitResponse {
    pub success: bool,
    /// Seconds of delay left before the card accepts authenticated commands.
    #[serde(default)]
    pub auth_delay: u32,
}

const WAIT_FIELDS: &[&str] = &["cmd", "success", "auth_delay"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
}

const ERROR_FIELDS: &[&str] = &["cmd", "code", "error"];

/// Response variants that can be read from a card.
#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Response {
    Status(StatusResponse),
    Read(ReadResponse),
    Unseal(UnsealResponse),
    New(NewResponse),
    Certs(CertsResponse),
    Check(CheckResponse),
    Wait(WaitResponse),
    Error(ErrorResponse),
}

impl Response {
    /// The command this response answers, `None` for errors.
    pub fn name(&self) -> Option<CommandName> {
        match self {
            Response::Status(_) => Some(CommandName::Status),
            Response::Read(_) => Some(CommandName::Read),
            Response::Unseal(_) => Some(CommandName::Unseal),
            Response::New(_) => Some(CommandName::New),
            Response::Certs(_) => Some(CommandName::Certs),
            Response::Check(_) => Some(CommandName::Check),
            Response::Wait(_) => Some(CommandName::Wait),
            Response::Error(_) => None,
        }
    }

    /// Decodes the answer to `expected`, falling back to the error shape.
    ///
    /// In strict mode a map carrying keys outside the variant's field set is rejected.
    pub fn decode(expected: CommandName, payload: &[u8], strict: bool) -> Result<Self, DecodeError> {
        let value = parse(payload)?;

        let decoded = match expected {
            CommandName::Status => body(&value, STATUS_FIELDS, strict).map(Response::Status),
            CommandName::Read => body(&value, READ_FIELDS, strict).map(Response::Read),
            CommandName::Unseal => body(&value, UNSEAL_FIELDS, strict).map(Response::Unseal),
            CommandName::New => body(&value, NEW_FIELDS, strict).map(Response::New),
            CommandName::Certs => body(&value, CERTS_FIELDS, strict).map(Response::Certs),
            CommandName::Check => body(&value, CHECK_FIELDS, strict).map(Response::Check),
            CommandName::Wait => body(&value, WAIT_FIELDS, strict).map(Response::Wait),
        };

        decoded.or_else(|err| {
            body(&value, ERROR_FIELDS, strict)
                .map(Response::Error)
                .map_err(|_| DecodeError::Unexpected {
                    expected,
                    reason: err.to_string(),
                })
        })
    }

    /// Encodes the response as a CBOR map, as a card would.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            Response::Status(r) => to_cbor(r),
            Response::Read(r) => to_cbor(r),
            Response::Unseal(r) => to_cbor(r),
            Response::New(r) => to_cbor(r),
            Response::Certs(r) => to_cbor(r),
            Response::Check(r) => to_cbor(r),
            Response::Wait(r) => to_cbor(r),
            Response::Error(r) => to_cbor(r),
        }
    }
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| EncodeError::Cbor(e.to_string()))?;
    Ok(buf)
}

fn parse(payload: &[u8]) -> Result<Value, DecodeError> {
    ciborium::de::from_reader(payload).map_err(|e| DecodeError::Cbor(e.to_string()))
}

fn body<T: DeserializeOwned>(
    value: &Value,
    fields: &[&str],
    strict: bool,
) -> Result<T, DecodeError> {
    let entries = value.as_map().ok_or(DecodeError::NotAMap)?;

    if strict {
        for (key, _) in entries {
            let key = key.as_text().ok_or(DecodeError::Decode("non-text map key"))?;
            if !fields.contains(&key) {
                return Err(DecodeError::UnknownField(key.to_owned()));
            }
        }
    }

    value
        .deserialized()
        .map_err(|e| DecodeError::Cbor(e.to_string()))
}

/// Error variants that can occur while encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    LengthMismatch(&'static str, usize),
    InvalidCharValue,
    Cbor(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::LengthMismatch(what, len) => write!(f, "{what} has bad length {len}"),
            EncodeError::InvalidCharValue => f.write_str("invalid character"),
            EncodeError::Cbor(e) => write!(f, "cbor: {e}"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Error variants that can occur while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Cbor(String),
    NotAMap,
    Decode(&'static str),
    UnknownField(String),
    MissingField(&'static str),
    Length {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    UnknownCommand(String),
    /// Payload matches neither the expected response nor the error shape.
    Unexpected {
        expected: CommandName,
        reason: String,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Cbor(e) => write!(f, "cbor: {e}"),
            DecodeError::NotAMap => f.write_str("payload is not a map"),
            DecodeError::Decode(e) => f.write_str(e),
            DecodeError::UnknownField(field) => write!(f, "unknown field `{field}`"),
            DecodeError::MissingField(field) => write!(f, "missing field `{field}`"),
            DecodeError::Length {
                field,
                expected,
                actual,
            } => write!(f, "field `{field}` is {actual} bytes, expected {expected}"),
            DecodeError::UnknownCommand(cmd) => write!(f, "unknown command `{cmd}`"),
            DecodeError::Unexpected { expected, reason } => {
                write!(f, "unexpected answer to `{expected}`: {reason}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}
