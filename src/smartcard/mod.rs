//! Smartcard wire driver.
//!
//! Talks to a memory card through a CT-API terminal driver. A [`Smartcard`]
//! owns one terminal session and moves through
//! `Unopened -> Initialized -> Selected -> Closed`. Every card operation
//! requires an initialized session. Reads and writes are split into
//! [`MAX_CHUNK`] byte commands.

pub mod apdu;
pub mod ctapi;
pub mod emulator;
pub mod layout;
pub mod worker;

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};
use zeroize::{Zeroize, Zeroizing};

pub use apdu::{MAX_CHUNK, StatusWord};
pub use ctapi::CtApiTerminal;
pub use emulator::MemoryCardTerminal;
pub use layout::CardImage;

use apdu::{Command, Response, encode_pin};

/// Return codes of the CT-API entry points other than `OK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtError {
    /// `ERR_INVALID` (-1)
    Invalid,
    /// `ERR_CT` (-8)
    Terminal,
    /// `ERR_TRANS` (-10)
    Transmission,
    /// `ERR_MEMORY` (-11)
    Memory,
    /// `ERR_HTSI` (-128)
    HostInterface,
    Other(i8),
}

impl CtError {
    /// Maps a driver status byte; `0` means success.
    pub fn check(code: i8) -> Result<(), CtError> {
        match code {
            0 => Ok(()),
            -1 => Err(CtError::Invalid),
            -8 => Err(CtError::Terminal),
            -10 => Err(CtError::Transmission),
            -11 => Err(CtError::Memory),
            -128 => Err(CtError::HostInterface),
            other => Err(CtError::Other(other)),
        }
    }

    pub fn code(self) -> i8 {
        match self {
            CtError::Invalid => -1,
            CtError::Terminal => -8,
            CtError::Transmission => -10,
            CtError::Memory => -11,
            CtError::HostInterface => -128,
            CtError::Other(code) => code,
        }
    }
}

impl fmt::Display for CtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CtError::Invalid => "invalid parameter or value",
            CtError::Terminal => "terminal error",
            CtError::Transmission => "transmission error",
            CtError::Memory => "memory allocation error",
            CtError::HostInterface => "host interface error",
            CtError::Other(_) => "unknown driver error",
        };
        write!(f, "{text} ({})", self.code())
    }
}

/// Faults raised by the smartcard layer.
#[derive(Debug, Error)]
pub enum CardError {
    #[error("cannot load terminal driver '{}': {reason}", path.display())]
    NoSuchLibrary { path: PathBuf, reason: String },

    #[error("terminal session is not initialized")]
    NotInitialized,

    #[error("terminal driver: {0}")]
    Driver(CtError),

    #[error("card answered with status {0}")]
    Status(StatusWord),

    #[error("wrong PIN, {retries} attempt(s) left")]
    WrongPin { retries: u8 },

    #[error("PIN must be six hex digits")]
    InvalidPin,

    #[error("end of card data: requested {requested} bytes, got {received}")]
    EndOfData { requested: usize, received: usize },

    #[error("no card in terminal")]
    NoCard,

    #[error("unsupported card type: {0}")]
    UnsupportedCard(CardType),

    #[error("wrong card inserted (expected id {expected:#04x}, found {found:#04x})")]
    WrongCard { expected: u8, found: u8 },

    #[error("data of {needed} bytes does not fit into {capacity} bytes of card memory")]
    CapacityExceeded { needed: usize, capacity: usize },

    #[error("corrupt card layout: {0}")]
    Layout(String),

    #[error("smartcard worker terminated unexpectedly")]
    Worker,
}

impl From<CtError> for CardError {
    fn from(e: CtError) -> Self {
        CardError::Driver(e)
    }
}

impl CardError {
    /// Whether the user might succeed by retrying (e.g. re-inserting the
    /// card or choosing another port).
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CardError::NoSuchLibrary { .. }
                | CardError::InvalidPin
                | CardError::CapacityExceeded { .. }
                | CardError::Layout(_)
                | CardError::Worker
        )
    }
}

/// CT-API seam: the three driver entry points.
pub trait Terminal: Send {
    fn init(&mut self, ctn: u16, port: u16) -> Result<(), CtError>;

    /// Sends `command` to `dad` and writes the raw response (data followed
    /// by the status word) into `response`, returning its length.
    fn exchange(
        &mut self,
        ctn: u16,
        dad: u8,
        command: &[u8],
        response: &mut [u8],
    ) -> Result<usize, CtError>;

    fn close(&mut self, ctn: u16) -> Result<(), CtError>;
}

/// Produces a terminal for the configured driver library.
pub trait Connector: Send + Sync {
    fn connect(&self, library: &Path) -> Result<Box<dyn Terminal>, CardError>;
}

/// Loads the vendor CT-API library from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct CtApiConnector;

impl Connector for CtApiConnector {
    fn connect(&self, library: &Path) -> Result<Box<dyn Terminal>, CardError> {
        Ok(Box::new(CtApiTerminal::load(library)?))
    }
}

/// Interactive steps of a card exchange.
pub trait CardPrompt: Send + Sync {
    /// Asks the user to insert the card. `false` declines the operation.
    fn insert_card(&self) -> bool {
        true
    }

    /// Asks for the card PIN. `None` declines the operation.
    fn pin(&self) -> Option<Zeroizing<String>> {
        None
    }
}

/// Never interacts: assumes the card is present and has no PIN to offer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl CardPrompt for NoPrompt {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Initialized,
    Selected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    MemoryCard,
    ProcessorCard,
    Other(StatusWord),
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardType::MemoryCard => f.write_str("memory card"),
            CardType::ProcessorCard => f.write_str("processor card"),
            CardType::Other(sw) => write!(f, "unknown ({sw})"),
        }
    }
}

/// Transmission protocol announced in the answer-to-reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    I2c,
    ThreeWire,
    TwoWire,
    Other(u8),
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::I2c => f.write_str("I2C"),
            Protocol::ThreeWire => f.write_str("3-wire"),
            Protocol::TwoWire => f.write_str("2-wire"),
            Protocol::Other(n) => write!(f, "type {n:#x}"),
        }
    }
}

/// Answer-to-reset of a synchronous memory card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atr(pub Vec<u8>);

impl Atr {
    /// Protocol family from the high nibble of the first byte.
    pub fn protocol(&self) -> Option<Protocol> {
        let h1 = *self.0.first()?;
        Some(match h1 >> 4 {
            0x8 => Protocol::I2c,
            0x9 => Protocol::ThreeWire,
            0xA => Protocol::TwoWire,
            n => Protocol::Other(n),
        })
    }

    /// Card memory in bytes: `2^(n+6)` units of `2^m` bits, taken from the
    /// second byte. `None` when the card gives no indication (`n == 0`).
    pub fn capacity(&self) -> Option<usize> {
        let h2 = *self.0.get(1)?;
        let n = usize::from((h2 >> 3) & 0x0F);
        if n == 0 {
            return None;
        }
        let unit_bits = 1usize << (h2 & 0x07);
        Some((1usize << (n + 6)) * unit_bits / 8)
    }
}

/// One open terminal session.
pub struct Smartcard {
    terminal: Box<dyn Terminal>,
    ctn: u16,
    state: SessionState,
}

impl Smartcard {
    /// Terminal number used for the session.
    pub const CTN: u16 = 1;

    pub fn new(terminal: Box<dyn Terminal>) -> Self {
        Self {
            terminal,
            ctn: Self::CTN,
            state: SessionState::Unopened,
        }
    }

    /// Creates a session and initializes it on `port`.
    pub fn open(terminal: Box<dyn Terminal>, port: u16) -> Result<Self, CardError> {
        let mut card = Self::new(terminal);
        card.init(port)?;
        Ok(card)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Initializes the terminal. On failure the session stays unopened and
    /// the caller may retry with another port.
    pub fn init(&mut self, port: u16) -> Result<(), CardError> {
        if self.is_open() {
            return Ok(());
        }
        self.terminal.init(self.ctn, port)?;
        debug!(port, "terminal initialized");
        self.state = SessionState::Initialized;
        Ok(())
    }

    fn is_open(&self) -> bool {
        matches!(
            self.state,
            SessionState::Initialized | SessionState::Selected
        )
    }

    fn transmit(&mut self, command: &Command) -> Result<Response, CardError> {
        if !self.is_open() {
            return Err(CardError::NotInitialized);
        }

        let mut buf = [0u8; MAX_CHUNK + 2];
        let len = self
            .terminal
            .exchange(self.ctn, command.dad, &command.bytes, &mut buf)?;
        let response = Response::parse(&buf[..len.min(buf.len())])
            .ok_or(CardError::Driver(CtError::Transmission))?;

        trace!(
            ins = command.ins(),
            status = %response.status,
            len = response.data.len(),
            "card exchange"
        );
        Ok(response)
    }

    pub fn card_type(&mut self) -> Result<CardType, CardError> {
        let response = self.transmit(&Command::request_icc())?;
        Ok(match response.status {
            StatusWord::SUCCESS => CardType::MemoryCard,
            StatusWord::PROCESSOR_CARD => CardType::ProcessorCard,
            other => CardType::Other(other),
        })
    }

    pub fn reset(&mut self) -> Result<Atr, CardError> {
        let response = self.transmit(&Command::reset())?;
        let [sw1, _] = response.status.to_bytes();
        if sw1 != 0x90 {
            return Err(CardError::Status(response.status));
        }
        Ok(Atr(response.data))
    }

    /// Selects the whole data area. Returns whether the card accepted it.
    pub fn select_file(&mut self) -> Result<bool, CardError> {
        let response = self.transmit(&Command::select_master_file())?;
        let selected = response.status.is_success();
        if selected {
            self.state = SessionState::Selected;
        }
        Ok(selected)
    }

    /// Submits a six hex digit PIN.
    pub fn verify(&mut self, pin: &str) -> Result<(), CardError> {
        let mut binary = encode_pin(pin).ok_or(CardError::InvalidPin)?;
        let result = self.transmit(&Command::verify(&binary));
        binary.zeroize();

        let status = result?.status;
        if status.is_success() {
            return Ok(());
        }
        if let Some(retries) = status.retries_left() {
            return Err(CardError::WrongPin { retries });
        }
        if status == StatusWord::PIN_BLOCKED {
            return Err(CardError::WrongPin { retries: 0 });
        }
        Err(CardError::Status(status))
    }

    /// Reads `length` bytes starting at `offset`.
    pub fn read(&mut self, offset: usize, length: usize) -> Result<Vec<u8>, CardError> {
        check_range(offset, length)?;

        let mut out = Vec::with_capacity(length);
        while out.len() < length {
            let chunk = (length - out.len()).min(MAX_CHUNK);
            let address = (offset + out.len()) as u16;
            let response = self.transmit(&Command::read_binary(address, chunk as u8))?;

            match response.status {
                StatusWord::SUCCESS => {}
                StatusWord::END_OF_DATA => {
                    return Err(CardError::EndOfData {
                        requested: length,
                        received: out.len() + response.data.len().min(chunk),
                    });
                }
                other => return Err(CardError::Status(other)),
            }

            if response.data.len() < chunk {
                return Err(CardError::EndOfData {
                    requested: length,
                    received: out.len() + response.data.len(),
                });
            }
            out.extend_from_slice(&response.data[..chunk]);
        }
        Ok(out)
    }

    /// Writes `data` starting at `offset`.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), CardError> {
        check_range(offset, data.len())?;

        for (i, chunk) in data.chunks(MAX_CHUNK).enumerate() {
            let address = (offset + i * MAX_CHUNK) as u16;
            let response = self.transmit(&Command::update_binary(address, chunk))?;
            if !response.status.is_success() {
                return Err(CardError::Status(response.status));
            }
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), CardError> {
        if !self.is_open() {
            return Ok(());
        }
        self.state = SessionState::Closed;
        self.terminal.close(self.ctn)?;
        debug!("terminal closed");
        Ok(())
    }
}

impl Drop for Smartcard {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Card addresses are 16 bit.
fn check_range(offset: usize, length: usize) -> Result<(), CardError> {
    const ADDRESS_SPACE: usize = 1 << 16;
    match offset.checked_add(length) {
        Some(end) if end <= ADDRESS_SPACE => Ok(()),
        _ => Err(CardError::CapacityExceeded {
            needed: offset.saturating_add(length),
            capacity: ADDRESS_SPACE,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_card() -> (MemoryCardTerminal, Smartcard) {
        let terminal = MemoryCardTerminal::new(1024);
        let card = Smartcard::open(Box::new(terminal.clone()), 1).unwrap();
        (terminal, card)
    }

    #[test]
    fn operations_require_init() {
        let mut card = Smartcard::new(Box::new(MemoryCardTerminal::new(256)));
        assert_eq!(card.state(), SessionState::Unopened);
        assert!(matches!(card.card_type(), Err(CardError::NotInitialized)));
        assert!(matches!(card.read(0, 1), Err(CardError::NotInitialized)));
    }

    #[test]
    fn failed_init_can_be_retried_on_another_port() {
        let terminal = MemoryCardTerminal::new(256).with_port(2);
        let mut card = Smartcard::new(Box::new(terminal));
        assert!(matches!(
            card.init(1),
            Err(CardError::Driver(CtError::Terminal))
        ));
        assert_eq!(card.state(), SessionState::Unopened);
        card.init(2).unwrap();
        assert_eq!(card.state(), SessionState::Initialized);
    }

    #[test]
    fn closed_session_rejects_commands() {
        let (_, mut card) = open_card();
        card.close().unwrap();
        assert_eq!(card.state(), SessionState::Closed);
        assert!(matches!(card.select_file(), Err(CardError::NotInitialized)));
    }

    #[test]
    fn card_type_and_reset() {
        let (terminal, mut card) = open_card();
        assert_eq!(card.card_type().unwrap(), CardType::MemoryCard);

        let atr = card.reset().unwrap();
        assert_eq!(atr.capacity(), Some(1024));
        assert_eq!(atr.protocol(), Some(Protocol::TwoWire));

        terminal.eject();
        assert_eq!(
            card.card_type().unwrap(),
            CardType::Other(StatusWord::NO_CARD)
        );
    }

    #[test]
    fn atr_decoding() {
        // SLE4442: 256 units of 8 bits over a 2-wire bus
        let atr = Atr(vec![0xA2, 0x13, 0x10, 0x91]);
        assert_eq!(atr.capacity(), Some(256));
        assert_eq!(atr.protocol(), Some(Protocol::TwoWire));

        assert_eq!(Atr(vec![0x82, 0x03]).capacity(), None);
        assert_eq!(Atr(vec![0x82]).protocol(), Some(Protocol::I2c));
        assert_eq!(Atr(vec![]).protocol(), None);
    }

    #[test]
    fn select_moves_to_selected() {
        let (_, mut card) = open_card();
        assert!(card.select_file().unwrap());
        assert_eq!(card.state(), SessionState::Selected);
    }

    #[test]
    fn chunked_write_and_read() {
        let (terminal, mut card) = open_card();
        card.select_file().unwrap();

        let data: Vec<u8> = (0..700u32).map(|i| (i % 251) as u8).collect();
        card.write(10, &data).unwrap();
        assert_eq!(card.read(10, 700).unwrap(), data);

        // 700 bytes need three commands each way
        assert_eq!(terminal.command_count(apdu::INS_UPDATE_BINARY), 3);
        assert_eq!(terminal.command_count(apdu::INS_READ_BINARY), 3);
    }

    #[test]
    fn reading_past_written_data_is_end_of_data() {
        let (_, mut card) = open_card();
        card.select_file().unwrap();
        card.write(0, &[1, 2, 3, 4]).unwrap();

        match card.read(0, 10) {
            Err(CardError::EndOfData {
                requested,
                received,
            }) => assert_eq!((requested, received), (10, 4)),
            other => panic!("expected EndOfData, got {other:?}"),
        }
    }

    #[test]
    fn wrong_pin_reports_retries() {
        let terminal = MemoryCardTerminal::new(256).with_pin([0x12, 0x34, 0x56]);
        let mut card = Smartcard::open(Box::new(terminal), 1).unwrap();

        assert!(matches!(
            card.verify("000000"),
            Err(CardError::WrongPin { retries: 2 })
        ));
        assert!(matches!(
            card.verify("000000"),
            Err(CardError::WrongPin { retries: 1 })
        ));
        card.verify("123456").unwrap();
        assert!(matches!(card.verify("12345"), Err(CardError::InvalidPin)));
    }

    #[test]
    fn protected_card_rejects_unverified_write() {
        let terminal = MemoryCardTerminal::new(256)
            .with_pin([0xAB, 0xCD, 0xEF])
            .write_protected();
        let mut card = Smartcard::open(Box::new(terminal), 1).unwrap();
        card.select_file().unwrap();

        assert!(matches!(
            card.write(0, &[1]),
            Err(CardError::Status(StatusWord::SECURITY_NOT_SATISFIED))
        ));
        card.verify("abcdef").unwrap();
        card.write(0, &[1]).unwrap();
    }

    #[test]
    fn out_of_address_space_is_rejected() {
        let (_, mut card) = open_card();
        assert!(matches!(
            card.write(65_535, &[0, 0]),
            Err(CardError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn ct_error_codes() {
        assert_eq!(CtError::check(0), Ok(()));
        assert_eq!(CtError::check(-10), Err(CtError::Transmission));
        assert_eq!(CtError::check(-5), Err(CtError::Other(-5)));
        assert_eq!(CtError::HostInterface.code(), -128);
    }
}
