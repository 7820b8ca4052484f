use std::error::Error as StdError;
use std::fmt;

use crate::internal::prelude::*;
use crate::model::ModelError;
use crate::settings::SettingsError;
use crate::shard::ShardError;

/// The common result type between most library functions.
///
/// The library exposes functions which, for a result type, expose only one
/// type, rather than the usual two (`Result<T, Error>`). This is because all
/// functions that return a result return the library's [`Error`], so this is
/// implied, and a "simpler" result is used.
pub type Result<T> = StdResult<T, Error>;

/// A common error enum returned by most of the library's functionality within
/// a custom [`Result`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Error {
    /// An error from the [`model`] module.
    ///
    /// [`model`]: crate::model
    Model(ModelError),
    /// A configuration error, surfaced when a manager or host is constructed
    /// from invalid [`Settings`].
    ///
    /// [`Settings`]: crate::settings::Settings
    Settings(SettingsError),
    /// An error raised by a shard controller.
    Shard(ShardError),
}

impl From<ModelError> for Error {
    fn from(e: ModelError) -> Self {
        Self::Model(e)
    }
}

impl From<SettingsError> for Error {
    fn from(e: SettingsError) -> Self {
        Self::Settings(e)
    }
}

impl From<ShardError> for Error {
    fn from(e: ShardError) -> Self {
        Self::Shard(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(inner) => fmt::Display::fmt(inner, f),
            Self::Settings(inner) => fmt::Display::fmt(inner, f),
            Self::Shard(inner) => fmt::Display::fmt(inner, f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Model(inner) => Some(inner),
            Self::Settings(inner) => Some(inner),
            Self::Shard(inner) => Some(inner),
        }
    }
}
