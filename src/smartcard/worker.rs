//! Runs a whole card exchange on one dedicated thread.
//!
//! Terminal sessions are stateful and not reentrant, so the complete
//! verify/select/read or write sequence is moved onto a single worker and
//! the caller blocks until it finishes. CT-API commands cannot be
//! interrupted; a job can only decline to issue its next command.

use std::thread;

use super::CardError;
use crate::error::{Error, Result};

const WORKER_NAME: &str = "cardnest-smartcard";

pub fn run<T, F>(job: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let handle = thread::Builder::new()
        .name(WORKER_NAME.to_string())
        .spawn(job)?;

    handle.join().map_err(|_| Error::Smartcard(CardError::Worker))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_runs_off_the_calling_thread() {
        let caller = thread::current().id();
        let (worker, name) = run(|| {
            let current = thread::current();
            Ok((current.id(), current.name().map(str::to_owned)))
        })
        .unwrap();

        assert_ne!(worker, caller);
        assert_eq!(name.as_deref(), Some(WORKER_NAME));
    }

    #[test]
    fn job_errors_are_passed_through() {
        let result: Result<()> = run(|| Err(Error::Abort));
        assert!(matches!(result, Err(Error::Abort)));
    }

    #[test]
    fn panicking_job_is_a_worker_error() {
        let result: Result<()> = run(|| panic!("driver crashed"));
        assert!(matches!(result, Err(Error::Smartcard(CardError::Worker))));
    }
}
