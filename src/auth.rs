use anyhow::{Result, bail};
use cardnest::smartcard::CardPrompt;
use std::io::{self, BufRead, IsTerminal, Write};
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "CARDNEST_PASSWORD";
pub const PIN_ENV: &str = "CARDNEST_PIN";

pub fn read_password() -> Result<Zeroizing<String>> {
    //  Environment Variable
    //  CARDNEST_PASSWORD="supersecret" cardnest export
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    //  stdin (Pipeline)
    //  echo "supersecret" | cardnest export
    if !io::stdin().is_terminal() {
        let mut buf = Zeroizing::new(String::new());
        io::stdin().lock().read_line(&mut buf)?;
        let pw = buf.trim_end_matches(['\r', '\n']);

        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw.to_string()));
        }
    }

    //  Interactive (TTY)
    if io::stdin().is_terminal() {
        let pw = Zeroizing::new(rpassword::prompt_password("Password: ")?);
        if !pw.is_empty() {
            return Ok(pw);
        }
    }

    bail!("No password provided")
}

/// Card interaction on the controlling terminal.
///
/// Without a terminal the card is assumed to be present and the PIN is taken
/// from `CARDNEST_PIN`.
pub struct TerminalPrompt;

impl CardPrompt for TerminalPrompt {
    fn insert_card(&self) -> bool {
        if !io::stdin().is_terminal() {
            return true;
        }

        eprint!("Insert the smartcard and press Enter (q to cancel): ");
        let _ = io::stderr().flush();
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => false,
            Ok(_) => !answer.trim().eq_ignore_ascii_case("q"),
        }
    }

    fn pin(&self) -> Option<Zeroizing<String>> {
        if let Ok(pin) = std::env::var(PIN_ENV) {
            if !pin.is_empty() {
                return Some(Zeroizing::new(pin));
            }
        }

        if !io::stdin().is_terminal() {
            return None;
        }
        let pin = Zeroizing::new(rpassword::prompt_password("Card PIN: ").ok()?);
        (!pin.is_empty()).then_some(pin)
    }
}
