/*
 * subvolrs: unprivileged btrfs subvolume iteration on Linux
 * Copyright (C) 2019-2024 Aleksa Sarai <cyphar@cyphar.com>
 * Copyright (C) 2019-2024 SUSE LLC
 *
 * This program is free software: you can redistribute it and/or modify it
 * under the terms of the GNU Lesser General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or (at your
 * option) any later version.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
 * or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License
 * for more details.
 *
 * You should have received a copy of the GNU Lesser General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![forbid(unsafe_code)]

//! Error types for subvolrs.

use crate::syscalls::Error as SyscallError;

use std::{borrow::Cow, io::Error as IOError};

/// Opaque error type for subvolrs.
///
/// If you wish to do non-trivial error handling with subvolrs errors, use
/// [`Error::kind`] to get an [`ErrorKind`] you can handle programmatically.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(#[from] Box<ErrorImpl>);

impl<E: Into<ErrorImpl>> From<E> for Error {
    #[doc(hidden)]
    fn from(err: E) -> Self {
        Self(Box::new(err.into()))
    }
}

impl Error {
    /// Get the [`ErrorKind`] of this error, looking through any context the
    /// error was wrapped with.
    ///
    /// ```no_run
    /// use subvolrs::{error::ErrorKind, IteratorFlags, SubvolumeIter};
    /// use std::fs::File;
    ///
    /// let root = File::open("/proc")?;
    /// match SubvolumeIter::open(root.into(), IteratorFlags::empty()) {
    ///     Err(err) if err.kind() == ErrorKind::NotSupported => {
    ///         println!("/proc is not on btrfs");
    ///     }
    ///     Err(err) => return Err(err.into()),
    ///     Ok(_) => unreachable!("/proc is never btrfs"),
    /// }
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }

    /// Whether this error only means that a single subvolume could not be
    /// reached. The walk carries on past these.
    ///
    /// That covers a path that vanished underneath us, a directory on the way
    /// we lack search permission for, and a path that was swapped for a
    /// symlink or a mount after the subvolume was listed.
    pub(crate) fn is_skippable(&self) -> bool {
        self.kind().is_skippable()
    }
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum ErrorImpl {
    #[error("feature {feature} not supported on this kernel")]
    NotSupported { feature: Cow<'static, str> },

    #[error("broken frame stack during iteration: {description}")]
    BrokenFrameStack { description: Cow<'static, str> },

    #[error("malformed reply from {operation}: {description}")]
    BadKernelReply {
        operation: Cow<'static, str>,
        description: Cow<'static, str>,
    },

    #[error("{operation} failed")]
    OsError {
        operation: Cow<'static, str>,
        source: IOError,
    },

    #[error("{operation} failed")]
    RawOsError {
        operation: Cow<'static, str>,
        source: SyscallError,
    },

    #[error("{context}")]
    Wrapped {
        context: Cow<'static, str>,
        source: Box<ErrorImpl>,
    },
}

impl From<IOError> for ErrorImpl {
    fn from(err: IOError) -> Self {
        Self::OsError {
            operation: "directory operation".into(),
            source: err,
        }
    }
}

/// Underlying error class for subvolrs errors.
///
/// This is similar in concept to [`std::io::ErrorKind`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The running kernel (or the filesystem the handle lives on) does not
    /// provide the btrfs ioctls needed for unprivileged iteration.
    NotSupported,
    /// Some internal error occurred. For more information, see the string
    /// description of the original [`Error`].
    InternalError,
    /// The underlying error came from a system call. The provided
    /// [`std::io::RawOsError`] is the numerical value of the `errno` number, if
    /// available.
    OsError(Option<i32>),
}

impl ErrorImpl {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::OsError { source, .. } => ErrorKind::OsError(source.raw_os_error()),
            Self::RawOsError { source, .. } => {
                ErrorKind::OsError(source.root_cause().raw_os_error())
            }
            Self::BrokenFrameStack { .. } | Self::BadKernelReply { .. } => ErrorKind::InternalError,
            Self::Wrapped { source, .. } => source.kind(),
        }
    }
}

impl ErrorKind {
    /// Return a C-like errno for the [`ErrorKind`].
    pub fn errno(&self) -> Option<i32> {
        match self {
            ErrorKind::NotSupported => Some(libc::ENOTTY),
            ErrorKind::OsError(errno) => *errno,
            _ => None,
        }
    }

    pub(crate) fn is_skippable(&self) -> bool {
        // ELOOP and EXDEV come from descending with RESOLVE_NO_SYMLINKS and
        // RESOLVE_NO_XDEV.
        matches!(
            self,
            ErrorKind::OsError(Some(libc::ENOENT | libc::EACCES | libc::ELOOP | libc::EXDEV))
        )
    }
}

// Private trait necessary to work around the "orphan trait" restriction.
pub(crate) trait ErrorExt: Sized {
    /// Wrap a `Result<..., Error>` with an additional context string created by
    /// a closure.
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String;
}

impl ErrorExt for ErrorImpl {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        Self::Wrapped {
            context: context_fn().into(),
            source: self.into(),
        }
    }
}

impl ErrorExt for Error {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        Self((*self.0).with_wrap(context_fn).into())
    }
}

impl<T, E: ErrorExt> ErrorExt for Result<T, E> {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| err.with_wrap(context_fn))
    }
}
