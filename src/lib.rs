//! Local credential store with optional smartcard second factor.
//!
//! A document of groups and properties is written to disk as XML with every
//! password value encrypted under a passphrase. In smartcard mode the
//! ciphertext and the password hash live on a memory card instead, and the
//! file only holds references into the card buffer.

pub mod config;
pub mod crypto;
pub mod document;
pub mod error;
pub mod format;
pub mod quality;
pub mod smartcard;
pub mod storage;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

pub use crate::config::Config;
pub use crate::document::{Document, Group, Node, Property, PropertyKind};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::storage::Storage;

use crate::crypto::{CardCollector, CipherEngine, hash, random_card_id};
use crate::document::{AppData, CardInfo, Direction, SMARTCARD_HASH, walk};
use crate::smartcard::{
    Atr, CardError, CardPrompt, CardType, Connector, CtApiConnector, NoPrompt, Protocol,
    Smartcard, StatusWord, worker,
};
use crate::smartcard::layout::CardImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Start,
    EngineSelected,
    SmartcardExchanged,
    DocumentWalked,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Start => "start",
            Stage::EngineSelected => "engine-selected",
            Stage::SmartcardExchanged => "smartcard-exchanged",
            Stage::DocumentWalked => "document-walked",
            Stage::Done => "done",
        })
    }
}

struct Progress {
    operation: &'static str,
    stage: Stage,
}

impl Progress {
    fn start(operation: &'static str) -> Self {
        debug!(operation, stage = %Stage::Start, "store operation");
        Self {
            operation,
            stage: Stage::Start,
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        debug!(operation = self.operation, stage = %stage, "store operation");
    }

    fn finish<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!(
                operation = self.operation,
                stage = %self.stage,
                kind = %e.kind(),
                "store operation failed: {e}"
            );
        }
        result
    }
}

/// What a terminal reports about the inserted card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardStatus {
    pub card_type: CardType,
    pub capacity: Option<usize>,
    pub protocol: Option<Protocol>,
}

/// Reads and writes the credential document.
#[derive(Clone)]
pub struct CardNest {
    storage: Storage,
    connector: Arc<dyn Connector>,
    prompt: Arc<dyn CardPrompt>,
}

impl fmt::Debug for CardNest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardNest")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl CardNest {
    /// A store on `storage` that loads the configured CT-API driver and never
    /// prompts.
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            connector: Arc::new(CtApiConnector),
            prompt: Arc::new(NoPrompt),
        }
    }

    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    pub fn with_prompt(mut self, prompt: impl CardPrompt + 'static) -> Self {
        self.prompt = Arc::new(prompt);
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Writes an empty document. Fails if one already exists.
    pub fn init(&self, passphrase: &str, config: &Config) -> Result<()> {
        if self.storage.exists() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", self.storage.path().display()),
            )));
        }
        self.write(&[], passphrase, config)
    }

    /// Encrypts `passwords` and stores them.
    ///
    /// The caller's tree is left untouched. In smartcard mode the ciphertext
    /// and the password hash go to the card first; the file is written only
    /// after the card exchange succeeded.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the destination is not writable, checked before
    ///   any cipher or card work
    /// - [`Error::NoAlgorithm`] if the configured cipher is unavailable
    /// - [`Error::Smartcard`] or [`Error::Abort`] from the card exchange
    pub fn write(&self, passwords: &[Node], passphrase: &str, config: &Config) -> Result<()> {
        let mut progress = Progress::start("write");
        let result = self.write_inner(passwords, passphrase, config, &mut progress);
        progress.finish(result)
    }

    fn write_inner(
        &self,
        passwords: &[Node],
        passphrase: &str,
        config: &Config,
        progress: &mut Progress,
    ) -> Result<()> {
        self.storage.check_writable()?;

        let mut engine = CipherEngine::new(&config.cipher_algorithm, passphrase)?;
        progress.enter(Stage::EngineSelected);

        let mut tree = passwords.to_vec();
        let mut app_data = AppData::new(engine.algorithm().name());

        if config.use_smartcard {
            let mut collector = CardCollector::new(&engine);
            walk(&mut tree, &mut collector, Direction::Encrypt)?;
            progress.enter(Stage::DocumentWalked);

            let image = CardImage {
                card_id: random_card_id()?,
                hash: hash::generate(passphrase)?,
                payload: collector.into_bytes(),
            };
            let card_id = image.card_id;
            let session = self.session(config);
            let protected = config.card_has_write_protection;
            worker::run(move || session.write(&image, protected))?;
            progress.enter(Stage::SmartcardExchanged);

            app_data.password_hash = SMARTCARD_HASH.to_string();
            app_data.smartcard = CardInfo {
                use_card: true,
                card_id,
            };
        } else {
            walk(&mut tree, &mut engine, Direction::Encrypt)?;
            progress.enter(Stage::DocumentWalked);
            app_data.password_hash = hash::generate_text(passphrase)?;
        }

        let document = Document::new(app_data, tree);
        self.storage.save(&format::serialize(&document)?)?;
        progress.enter(Stage::Done);
        Ok(())
    }

    /// Loads the document and decrypts its passwords.
    ///
    /// The passphrase is checked against the stored hash before anything is
    /// decrypted.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidData`] if the file does not parse
    /// - [`Error::Configuration`] if the file needs a card but `config` does
    ///   not enable one
    /// - [`Error::WrongPassword`] if the passphrase does not match
    /// - [`Error::Smartcard`] with [`CardError::WrongCard`] if another card
    ///   than the one written to is inserted
    pub fn read(&self, passphrase: &str, config: &Config) -> Result<Document> {
        let mut progress = Progress::start("read");
        let result = self.read_inner(passphrase, config, &mut progress);
        progress.finish(result)
    }

    fn read_inner(
        &self,
        passphrase: &str,
        config: &Config,
        progress: &mut Progress,
    ) -> Result<Document> {
        let mut document = format::parse(&self.storage.load()?)?;
        let info = document.app_data.smartcard;

        if info.use_card && !config.use_smartcard {
            return Err(Error::Configuration(
                "document is stored on a smartcard but smartcard use is disabled".into(),
            ));
        }

        if info.use_card {
            let session = self.session(config);
            let image = worker::run(move || session.read())?;
            progress.enter(Stage::SmartcardExchanged);

            if image.card_id != info.card_id {
                return Err(CardError::WrongCard {
                    expected: info.card_id,
                    found: image.card_id,
                }
                .into());
            }
            if !hash::verify(passphrase, &image.hash) {
                return Err(Error::WrongPassword);
            }

            let engine = CipherEngine::new(&document.app_data.crypt_algorithm, passphrase)?;
            progress.enter(Stage::EngineSelected);
            let mut collector = CardCollector::new(&engine);
            collector.set_bytes(image.payload);
            walk(&mut document.passwords, &mut collector, Direction::Decrypt)?;
        } else {
            if !hash::verify_text(passphrase, &document.app_data.password_hash) {
                return Err(Error::WrongPassword);
            }

            let mut engine = CipherEngine::new(&document.app_data.crypt_algorithm, passphrase)?;
            progress.enter(Stage::EngineSelected);
            walk(&mut document.passwords, &mut engine, Direction::Decrypt)?;
        }
        progress.enter(Stage::DocumentWalked);

        progress.enter(Stage::Done);
        Ok(document)
    }

    /// Initializes the configured terminal and describes the inserted card.
    pub fn card_info(&self, config: &Config) -> Result<CardStatus> {
        let session = self.session(config);
        worker::run(move || session.status())
    }

    fn session(&self, config: &Config) -> CardSession {
        CardSession {
            connector: Arc::clone(&self.connector),
            prompt: Arc::clone(&self.prompt),
            library: config.smartcard_library_path.clone(),
            port: config.smartcard_port,
        }
    }
}

/// Everything a card job needs, owned so it can move to the worker thread.
struct CardSession {
    connector: Arc<dyn Connector>,
    prompt: Arc<dyn CardPrompt>,
    library: PathBuf,
    port: u16,
}

impl CardSession {
    fn connect(&self) -> Result<Smartcard> {
        if !self.prompt.insert_card() {
            return Err(Error::Abort);
        }
        let terminal = self.connector.connect(&self.library)?;
        Ok(Smartcard::open(terminal, self.port)?)
    }

    /// Connects, checks for a memory card, resets it and selects its data.
    fn open(&self) -> Result<(Smartcard, Atr)> {
        let mut card = self.connect()?;
        match card.card_type()? {
            CardType::MemoryCard => {}
            CardType::Other(StatusWord::NO_CARD) => return Err(CardError::NoCard.into()),
            other => return Err(CardError::UnsupportedCard(other).into()),
        }

        let atr = card.reset()?;
        if !card.select_file()? {
            return Err(CardError::Layout("card refused to select its data area".into()).into());
        }
        Ok((card, atr))
    }

    fn write(&self, image: &CardImage, protected: bool) -> Result<()> {
        let (mut card, atr) = self.open()?;
        if protected {
            let pin = self.prompt.pin().ok_or(Error::Abort)?;
            card.verify(&pin)?;
        }
        image.write_to(&mut card, atr.capacity())?;
        card.close()?;
        Ok(())
    }

    fn read(&self) -> Result<CardImage> {
        let (mut card, _) = self.open()?;
        let image = CardImage::read_from(&mut card)?;
        card.close()?;
        Ok(image)
    }

    fn status(&self) -> Result<CardStatus> {
        let mut card = self.connect()?;
        let card_type = card.card_type()?;
        let atr = match card_type {
            CardType::MemoryCard => Some(card.reset()?),
            _ => None,
        };
        card.close()?;

        Ok(CardStatus {
            card_type,
            capacity: atr.as_ref().and_then(Atr::capacity),
            protocol: atr.as_ref().and_then(Atr::protocol),
        })
    }
}

/// Storage at the platform's data directory.
pub fn default_storage() -> Result<Storage> {
    Ok(Storage::new(config::default_document_path()?))
}
