//! Command framing for the CT-API terminal and memory cards.
//!
//! Commands addressed to the terminal itself (`CLA = 0x20`) go to
//! [`DAD_CT`]; card commands (`CLA = 0x00`) go to [`DAD_ICC1`].

use std::fmt;

/// Largest data field a single command or response can carry.
pub const MAX_CHUNK: usize = 255;

/// Destination address of the card in slot 1.
pub const DAD_ICC1: u8 = 0;
/// Destination address of the terminal.
pub const DAD_CT: u8 = 1;
/// Source address of the host.
pub const SAD_HOST: u8 = 2;

const CLA_CT: u8 = 0x20;
const CLA_ICC: u8 = 0x00;

pub const INS_RESET_CT: u8 = 0x11;
pub const INS_REQUEST_ICC: u8 = 0x12;
pub const INS_SELECT_FILE: u8 = 0xA4;
pub const INS_VERIFY: u8 = 0x20;
pub const INS_READ_BINARY: u8 = 0xB0;
pub const INS_UPDATE_BINARY: u8 = 0xD6;

/// File identifier of the master file, i.e. the whole data area.
pub const MASTER_FILE: [u8; 2] = [0x3F, 0x00];

/// A command frame plus the address it is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub dad: u8,
    pub bytes: Vec<u8>,
}

impl Command {
    fn ct(ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            dad: DAD_CT,
            bytes: vec![CLA_CT, ins, p1, p2, 0x00],
        }
    }

    fn icc(ins: u8, p1: u8, p2: u8, data: &[u8]) -> Self {
        debug_assert!(data.len() <= MAX_CHUNK);
        let mut bytes = Vec::with_capacity(5 + data.len());
        bytes.extend_from_slice(&[CLA_ICC, ins, p1, p2, data.len() as u8]);
        bytes.extend_from_slice(data);
        Self {
            dad: DAD_ICC1,
            bytes,
        }
    }

    /// REQUEST ICC on slot 1.
    pub fn request_icc() -> Self {
        Self::ct(INS_REQUEST_ICC, 0x01, 0x00)
    }

    /// RESET CT for slot 1, asking for the complete answer-to-reset.
    pub fn reset() -> Self {
        Self::ct(INS_RESET_CT, 0x01, 0x01)
    }

    pub fn select_master_file() -> Self {
        Self::icc(INS_SELECT_FILE, 0x00, 0x00, &MASTER_FILE)
    }

    pub fn verify(pin: &[u8]) -> Self {
        Self::icc(INS_VERIFY, 0x00, 0x00, pin)
    }

    /// READ BINARY of `len` bytes (1..=255) at `offset`.
    pub fn read_binary(offset: u16, len: u8) -> Self {
        let [hi, lo] = offset.to_be_bytes();
        Self {
            dad: DAD_ICC1,
            bytes: vec![CLA_ICC, INS_READ_BINARY, hi, lo, len],
        }
    }

    pub fn update_binary(offset: u16, data: &[u8]) -> Self {
        let [hi, lo] = offset.to_be_bytes();
        Self::icc(INS_UPDATE_BINARY, hi, lo, data)
    }

    pub fn ins(&self) -> u8 {
        self.bytes[1]
    }
}

/// Two-byte status word closing every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const SUCCESS: StatusWord = StatusWord(0x9000);
    /// REQUEST ICC: an asynchronous (processor) card answered.
    pub const PROCESSOR_CARD: StatusWord = StatusWord(0x9001);
    /// No card present in the slot.
    pub const NO_CARD: StatusWord = StatusWord(0x6200);
    /// End of data reached before `Le` bytes were read.
    pub const END_OF_DATA: StatusWord = StatusWord(0x6282);
    pub const SECURITY_NOT_SATISFIED: StatusWord = StatusWord(0x6982);
    pub const PIN_BLOCKED: StatusWord = StatusWord(0x6983);
    pub const WRONG_LENGTH: StatusWord = StatusWord(0x6700);
    pub const WRONG_PARAMETERS: StatusWord = StatusWord(0x6B00);
    pub const INS_NOT_SUPPORTED: StatusWord = StatusWord(0x6D00);

    pub fn from_bytes(sw1: u8, sw2: u8) -> Self {
        Self(u16::from_be_bytes([sw1, sw2]))
    }

    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Remaining PIN attempts carried by a `63Cx` warning.
    pub fn retries_left(self) -> Option<u8> {
        let [sw1, sw2] = self.to_bytes();
        (sw1 == 0x63 && sw2 & 0xF0 == 0xC0).then_some(sw2 & 0x0F)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// A response split into data and status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Vec<u8>,
    pub status: StatusWord,
}

impl Response {
    /// Splits a raw response. Returns `None` if it is shorter than a
    /// status word.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let split = raw.len().checked_sub(2)?;
        let (data, sw) = raw.split_at(split);
        Some(Self {
            data: data.to_vec(),
            status: StatusWord::from_bytes(sw[0], sw[1]),
        })
    }
}

/// Converts a six hex digit PIN into its three byte binary form.
pub fn encode_pin(pin: &str) -> Option<[u8; 3]> {
    let pin = pin.trim();
    if pin.len() != 6 || !pin.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let mut out = [0u8; 3];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&pin[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}
