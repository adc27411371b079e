//! In-process memory card behind an emulated terminal.
//!
//! Speaks the same commands as a real CT-API reader with a synchronous
//! memory card inserted. Clones share the card, so a test can keep a handle
//! to inspect it while the store owns another.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::apdu::{
    DAD_CT, DAD_ICC1, INS_READ_BINARY, INS_REQUEST_ICC, INS_RESET_CT, INS_SELECT_FILE,
    INS_UPDATE_BINARY, INS_VERIFY, MASTER_FILE, StatusWord,
};
use super::{CardError, Connector, CtError, Terminal};

const PIN_ATTEMPTS: u8 = 3;
const FILE_NOT_FOUND: StatusWord = StatusWord(0x6A82);

#[derive(Debug)]
struct CardState {
    port: u16,
    capacity: usize,
    memory: Vec<u8>,
    pin: Option<[u8; 3]>,
    attempts_left: u8,
    verified: bool,
    write_protected: bool,
    inserted: bool,
    log: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MemoryCardTerminal {
    state: Arc<Mutex<CardState>>,
}

impl MemoryCardTerminal {
    /// A blank card of `capacity` bytes on port 1. Memory holds only what
    /// has been written so far.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CardState {
                port: 1,
                capacity,
                memory: Vec::new(),
                pin: None,
                attempts_left: PIN_ATTEMPTS,
                verified: false,
                write_protected: false,
                inserted: true,
                log: Vec::new(),
            })),
        }
    }

    pub fn with_port(self, port: u16) -> Self {
        self.lock().port = port;
        self
    }

    pub fn with_pin(self, pin: [u8; 3]) -> Self {
        self.lock().pin = Some(pin);
        self
    }

    /// Updates require a verified PIN.
    pub fn write_protected(self) -> Self {
        self.lock().write_protected = true;
        self
    }

    pub fn eject(&self) {
        let mut state = self.lock();
        state.inserted = false;
        state.verified = false;
    }

    pub fn insert(&self) {
        self.lock().inserted = true;
    }

    /// Snapshot of the written card memory.
    pub fn memory(&self) -> Vec<u8> {
        self.lock().memory.clone()
    }

    /// Overwrites card memory directly, bypassing the command interface.
    pub fn poke(&self, offset: usize, bytes: &[u8]) {
        let mut state = self.lock();
        let end = offset + bytes.len();
        if state.memory.len() < end {
            state.memory.resize(end, 0xFF);
        }
        state.memory[offset..end].copy_from_slice(bytes);
    }

    /// Number of commands with instruction byte `ins` seen so far.
    pub fn command_count(&self, ins: u8) -> usize {
        self.lock().log.iter().filter(|&&i| i == ins).count()
    }

    fn lock(&self) -> MutexGuard<'_, CardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CardState {
    fn answer_to_reset(&self) -> Vec<u8> {
        let n = if self.capacity.is_power_of_two() && self.capacity >= 128 {
            (self.capacity.trailing_zeros() - 6).min(0x0F) as u8
        } else {
            0
        };
        // 2-wire protocol, units of 8 bits
        vec![0xA2, (n << 3) | 0x03, 0x10, 0x91]
    }

    fn terminal_command(&mut self, command: &[u8]) -> (Vec<u8>, StatusWord) {
        match command[1] {
            INS_REQUEST_ICC | INS_RESET_CT if !self.inserted => (Vec::new(), StatusWord::NO_CARD),
            INS_REQUEST_ICC => (Vec::new(), StatusWord::SUCCESS),
            INS_RESET_CT => {
                self.verified = false;
                (self.answer_to_reset(), StatusWord::SUCCESS)
            }
            _ => (Vec::new(), StatusWord::INS_NOT_SUPPORTED),
        }
    }

    fn card_command(&mut self, command: &[u8]) -> (Vec<u8>, StatusWord) {
        if !self.inserted {
            return (Vec::new(), StatusWord::NO_CARD);
        }

        let offset = usize::from(u16::from_be_bytes([command[2], command[3]]));
        let lc = command.get(4).copied().map(usize::from).unwrap_or(0);
        let body = command.get(5..);

        match command[1] {
            INS_SELECT_FILE => match body {
                Some(data) if data == MASTER_FILE => (Vec::new(), StatusWord::SUCCESS),
                _ => (Vec::new(), FILE_NOT_FOUND),
            },
            INS_VERIFY => {
                let Some(expected) = self.pin else {
                    return (Vec::new(), StatusWord::SUCCESS);
                };
                if self.attempts_left == 0 {
                    return (Vec::new(), StatusWord::PIN_BLOCKED);
                }
                if body == Some(&expected[..]) {
                    self.verified = true;
                    self.attempts_left = PIN_ATTEMPTS;
                    (Vec::new(), StatusWord::SUCCESS)
                } else {
                    self.attempts_left -= 1;
                    (
                        Vec::new(),
                        StatusWord(0x63C0 | u16::from(self.attempts_left)),
                    )
                }
            }
            INS_READ_BINARY => {
                let le = if lc == 0 { 256 } else { lc };
                let available = self.memory.len().saturating_sub(offset);
                let take = le.min(available);
                let data = self.memory[offset.min(self.memory.len())..][..take].to_vec();
                let status = if take < le {
                    StatusWord::END_OF_DATA
                } else {
                    StatusWord::SUCCESS
                };
                (data, status)
            }
            INS_UPDATE_BINARY => {
                if self.write_protected && !self.verified {
                    return (Vec::new(), StatusWord::SECURITY_NOT_SATISFIED);
                }
                let Some(data) = body.filter(|d| d.len() == lc) else {
                    return (Vec::new(), StatusWord::WRONG_LENGTH);
                };
                let end = offset + lc;
                if end > self.capacity {
                    return (Vec::new(), StatusWord::WRONG_PARAMETERS);
                }
                if self.memory.len() < end {
                    self.memory.resize(end, 0xFF);
                }
                self.memory[offset..end].copy_from_slice(data);
                (Vec::new(), StatusWord::SUCCESS)
            }
            _ => (Vec::new(), StatusWord::INS_NOT_SUPPORTED),
        }
    }
}

impl Terminal for MemoryCardTerminal {
    fn init(&mut self, _ctn: u16, port: u16) -> Result<(), CtError> {
        if self.lock().port == port {
            Ok(())
        } else {
            Err(CtError::Terminal)
        }
    }

    fn exchange(
        &mut self,
        _ctn: u16,
        dad: u8,
        command: &[u8],
        response: &mut [u8],
    ) -> Result<usize, CtError> {
        if command.len() < 4 {
            return Err(CtError::Invalid);
        }

        let mut state = self.lock();
        state.log.push(command[1]);
        let (data, status) = match dad {
            DAD_CT => state.terminal_command(command),
            DAD_ICC1 => state.card_command(command),
            _ => return Err(CtError::Invalid),
        };

        let len = data.len() + 2;
        if response.len() < len {
            return Err(CtError::Memory);
        }
        response[..data.len()].copy_from_slice(&data);
        response[data.len()..len].copy_from_slice(&status.to_bytes());
        Ok(len)
    }

    fn close(&mut self, _ctn: u16) -> Result<(), CtError> {
        Ok(())
    }
}

impl Connector for MemoryCardTerminal {
    fn connect(&self, _library: &Path) -> Result<Box<dyn Terminal>, CardError> {
        Ok(Box::new(self.clone()))
    }
}
