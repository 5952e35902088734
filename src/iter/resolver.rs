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

//! Mapping a child subvolume to the location of its mount point.

use crate::{
    backend::{LookupUser, RootRef, SubvolumeBackend},
    error::{Error, ErrorExt},
};

use tracing::debug;

/// Outcome of resolving one child subvolume.
#[derive(Debug)]
pub(crate) enum Resolution {
    /// Where the child's mount point lives, relative to the parent's handle.
    Resolved(LookupUser),
    /// The child cannot be reached from here (no search permission on the
    /// way, or the path went away since the child was listed).
    Skipped,
}

/// Resolve where `rootref` is mounted, relative to `dir` (which must be the
/// root directory of the child's parent subvolume).
pub(crate) fn resolve<B: SubvolumeBackend>(
    backend: &B,
    dir: &B::Dir,
    rootref: RootRef,
) -> Result<Resolution, Error> {
    match backend.lookup_user(dir, rootref) {
        Ok(found) => Ok(Resolution::Resolved(found)),
        Err(err) if err.is_skippable() => {
            debug!(
                subvolume = %rootref.id,
                dirid = rootref.dirid,
                error = %err,
                "skipping unreachable subvolume"
            );
            Ok(Resolution::Skipped)
        }
        Err(err) => Err(err).with_wrap(|| format!("resolve path of subvolume {}", rootref.id)),
    }
}
