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

//! Flags controlling subvolume iteration.

use bitflags::bitflags;

bitflags! {
    /// Optional behaviour for [`SubvolumeIter`].
    ///
    /// The default (empty) set of flags produces every reachable descendant
    /// of the root subvolume, but not the root itself.
    ///
    /// ```
    /// # use subvolrs::flags::IteratorFlags;
    /// let flags = IteratorFlags::default();
    /// assert!(!flags.contains(IteratorFlags::INCLUDE_ROOT));
    /// ```
    ///
    /// [`SubvolumeIter`]: crate::SubvolumeIter
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
    pub struct IteratorFlags: u32 {
        /// Produce the root subvolume of the walk first, with an empty path.
        const INCLUDE_ROOT = 1 << 0;
    }
}
