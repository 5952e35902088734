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

/// Like [`std::borrow::Cow`] but without the [`ToOwned`] requirement, for
/// directory handles.
///
/// [`SubvolumeIter`] can either take ownership of the handle it walks from
/// (closing it when the iterator is dropped) or borrow one that the caller
/// keeps using afterwards.
///
/// ```
/// # use subvolrs::MaybeOwnedDir;
/// # use std::{fs::File, os::unix::io::OwnedFd};
/// # fn main() -> Result<(), std::io::Error> {
/// let dir: OwnedFd = File::open("/")?.into();
/// let borrowed = MaybeOwnedDir::Borrowed(&dir);
/// assert!(!borrowed.is_owned());
/// let owned = MaybeOwnedDir::from(dir);
/// assert!(owned.is_owned());
/// # Ok(())
/// # }
/// ```
///
/// [`SubvolumeIter`]: crate::SubvolumeIter
/// [`ToOwned`]: std::borrow::ToOwned
#[derive(Debug)]
pub enum MaybeOwnedDir<'d, D> {
    /// Closed when dropped.
    Owned(D),
    Borrowed(&'d D),
}

impl<'d, D> MaybeOwnedDir<'d, D> {
    /// Get a reference to the underlying handle, regardless of who owns it.
    pub fn get(&self) -> &D {
        match self {
            MaybeOwnedDir::Owned(dir) => dir,
            MaybeOwnedDir::Borrowed(dir) => dir,
        }
    }

    /// Whether the handle is owned, and thus closed when this is dropped.
    pub fn is_owned(&self) -> bool {
        matches!(self, MaybeOwnedDir::Owned(_))
    }
}

impl<D> From<D> for MaybeOwnedDir<'_, D> {
    fn from(dir: D) -> Self {
        MaybeOwnedDir::Owned(dir)
    }
}
