//! Defines the [`Termination`] trait.

use std::{convert::Infallible, fmt::Debug, process};

/// Extends [`std::process::Termination`] with a success check.
///
/// The window event loop owns the main thread and never returns, so the application thread's
/// result cannot simply be returned from `main`. [`crate::run`] inspects the value instead and
/// exits the process itself.
pub trait Termination: process::Termination {
    fn is_success(&self) -> bool;
}

impl Termination for Infallible {
    fn is_success(&self) -> bool {
        match *self {}
    }
}

impl Termination for () {
    fn is_success(&self) -> bool {
        true
    }
}

impl<T: Termination, E: Debug> Termination for Result<T, E> {
    fn is_success(&self) -> bool {
        match self {
            Ok(term) => term.is_success(),
            Err(_) => false,
        }
    }
}
