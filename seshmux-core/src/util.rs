//! Utilities.

use std::{error::Error, fmt};

/// Displays an error followed by its chain of sources, separated by `: `.
///
/// Obtained through [`ErrorExt::display_chain`]; used when logging errors
/// that must not propagate.
pub struct ErrorChain<'a>(&'a (dyn Error + 'static));

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }

        Ok(())
    }
}

impl fmt::Debug for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Extension trait rendering an error's full source chain.
pub trait ErrorExt {
    fn display_chain(&self) -> ErrorChain<'_>;
}

impl<E: Error + 'static> ErrorExt for E {
    fn display_chain(&self) -> ErrorChain<'_> {
        ErrorChain(self)
    }
}
