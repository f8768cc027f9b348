/// Application identifier selected before talking to the card over ISO 7816.
pub const APP_ID: [u8; 15] = *b"\xf0CoinkiteCARDv1";

pub const CLA: u8 = 0x00;
pub const INS_SELECT: u8 = 0xA4;
pub const INS_CBOR: u8 = 0xCB;
pub const P1_SELECT_BY_NAME: u8 = 0x04;

pub const SW_SUCCESS: u16 = 0x9000;

/// Fixed prefix of every message signed by the card.
pub const OPENDIME: &[u8; 8] = b"OPENDIME";

pub const CARD_NONCE_SIZE: usize = 16;
pub const USER_NONCE_SIZE: usize = 16;
pub const PUBKEY_SIZE: usize = 33;
pub const PRIVKEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;
pub const CERT_SIZE: usize = 65;

pub const CVC_MIN_LEN: usize = 6;
pub const CVC_MAX_LEN: usize = 32;

/// Largest payload a short APDU can carry.
pub const MAX_SHORT_DATA: usize = 255;
pub const MAX_EXTENDED_DATA: usize = 65535;

/// Coinkite production root key every genuine card chains up to.
pub const FACTORY_ROOT_PUBKEY: [u8; PUBKEY_SIZE] = [
    0x03, 0x02, 0x8a, 0x0e, 0x89, 0xe7, 0x0d, 0x0e, 0xc0, 0xd9, 0x32, 0x05, 0x3a, 0x89, 0xab, 0x1d,
    0xa7, 0xd9, 0x18, 0x2b, 0xdc, 0x6d, 0x2f, 0x03, 0xe7, 0x06, 0xee, 0x99, 0x51, 0x7d, 0x05, 0xd9,
    0xe1,
];

/// Root key used by the card emulator.
pub const EMULATOR_ROOT_PUBKEY: [u8; PUBKEY_SIZE] = [
    0x02, 0x2b, 0x67, 0x50, 0xa0, 0xc0, 0x9f, 0x63, 0x2d, 0xf3, 0x2a, 0xfc, 0x5b, 0xef, 0x66, 0x56,
    0x86, 0x67, 0xe0, 0x4b, 0x2e, 0x0f, 0x57, 0xcb, 0x86, 0x40, 0xac, 0x5a, 0x04, 0x01, 0x79, 0x44,
    0x2b,
];

pub const WIF_MAINNET: u8 = 0x80;
pub const WIF_TESTNET: u8 = 0xef;

pub const HRP_MAINNET: &str = "bc";
pub const HRP_TESTNET: &str = "tb";
