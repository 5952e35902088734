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

//! Kernel ABI for the handful of btrfs ioctls we use.
//!
//! The layouts are copied from `include/uapi/linux/btrfs.h`. We define them
//! ourselves rather than pulling in a bindings crate, since only three
//! argument structures are needed and older libc headers don't carry the
//! unprivileged (`*_USER`) variants at all.

use std::{fmt, mem};

use libc::c_ulong;

/// Identifier of a btrfs subvolume (its tree id).
///
/// Subvolume ids are opaque as far as the iterator is concerned: they are
/// only ever compared and handed back to the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubvolumeId(pub u64);

impl SubvolumeId {
    /// The id of the default top-level subvolume (`BTRFS_FS_TREE_OBJECTID`).
    pub const TOP_LEVEL: Self = Self(5);

    /// The smallest id strictly greater than this one.
    pub(crate) fn successor(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for SubvolumeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubvolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) const BTRFS_IOCTL_MAGIC: u8 = 0x94;

pub(crate) const BTRFS_VOL_NAME_MAX: usize = 255;
pub(crate) const BTRFS_INO_LOOKUP_PATH_MAX: usize = 4080;
pub(crate) const BTRFS_INO_LOOKUP_USER_PATH_MAX: usize = 4080 - BTRFS_VOL_NAME_MAX - 1;
pub(crate) const BTRFS_MAX_ROOTREF_BUFFER_NUM: usize = 255;

/// Inode number of the root directory of every subvolume.
pub(crate) const BTRFS_FIRST_FREE_OBJECTID: u64 = 256;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct BtrfsRootRef {
    pub(crate) treeid: u64,
    pub(crate) dirid: u64,
}

/// `struct btrfs_ioctl_get_subvol_rootref_args`
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct BtrfsGetSubvolRootrefArgs {
    /// in/out: the kernel bumps this past the last returned entry.
    pub(crate) min_treeid: u64,
    pub(crate) rootref: [BtrfsRootRef; BTRFS_MAX_ROOTREF_BUFFER_NUM],
    pub(crate) num_items: u8,
    pub(crate) align: [u8; 7],
}

impl BtrfsGetSubvolRootrefArgs {
    pub(crate) fn new(min_treeid: u64) -> Self {
        Self {
            min_treeid,
            rootref: [BtrfsRootRef::default(); BTRFS_MAX_ROOTREF_BUFFER_NUM],
            num_items: 0,
            align: [0; 7],
        }
    }

    /// The entries the kernel filled in.
    pub(crate) fn items(&self) -> &[BtrfsRootRef] {
        let len = usize::from(self.num_items).min(BTRFS_MAX_ROOTREF_BUFFER_NUM);
        &self.rootref[..len]
    }
}

/// `struct btrfs_ioctl_ino_lookup_user_args`
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct BtrfsInoLookupUserArgs {
    /// in: inode number of the directory containing the subvolume entry.
    pub(crate) dirid: u64,
    /// in: the subvolume to look up.
    pub(crate) treeid: u64,
    /// out: the name of the subvolume entry inside `dirid`.
    pub(crate) name: [u8; BTRFS_VOL_NAME_MAX + 1],
    /// out: path from the ioctl fd to `dirid`, with a trailing '/' if it is
    /// not empty.
    pub(crate) path: [u8; BTRFS_INO_LOOKUP_USER_PATH_MAX],
}

impl BtrfsInoLookupUserArgs {
    pub(crate) fn new(treeid: u64, dirid: u64) -> Self {
        Self {
            dirid,
            treeid,
            name: [0; BTRFS_VOL_NAME_MAX + 1],
            path: [0; BTRFS_INO_LOOKUP_USER_PATH_MAX],
        }
    }
}

/// `struct btrfs_ioctl_ino_lookup_args`
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct BtrfsInoLookupArgs {
    pub(crate) treeid: u64,
    pub(crate) objectid: u64,
    pub(crate) name: [u8; BTRFS_INO_LOOKUP_PATH_MAX],
}

impl BtrfsInoLookupArgs {
    pub(crate) fn new(treeid: u64, objectid: u64) -> Self {
        Self {
            treeid,
            objectid,
            name: [0; BTRFS_INO_LOOKUP_PATH_MAX],
        }
    }
}

// All three argument structures are exactly one page.
const _: () = assert!(mem::size_of::<BtrfsGetSubvolRootrefArgs>() == 4096);
const _: () = assert!(mem::size_of::<BtrfsInoLookupUserArgs>() == 4096);
const _: () = assert!(mem::size_of::<BtrfsInoLookupArgs>() == 4096);

// asm-generic/ioctl.h encoding. The architectures with a different layout
// (powerpc, mips, sparc) still produce identical numbers for _IOWR with
// 4096-byte arguments.
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;
const IOC_READ_WRITE: c_ulong = 3;

const fn iowr(nr: u8, size: usize) -> c_ulong {
    (IOC_READ_WRITE << IOC_DIRSHIFT)
        | ((size as c_ulong) << IOC_SIZESHIFT)
        | ((BTRFS_IOCTL_MAGIC as c_ulong) << IOC_TYPESHIFT)
        | ((nr as c_ulong) << IOC_NRSHIFT)
}

pub(crate) const BTRFS_IOC_INO_LOOKUP: c_ulong = iowr(18, mem::size_of::<BtrfsInoLookupArgs>());
pub(crate) const BTRFS_IOC_GET_SUBVOL_ROOTREF: c_ulong =
    iowr(61, mem::size_of::<BtrfsGetSubvolRootrefArgs>());
pub(crate) const BTRFS_IOC_INO_LOOKUP_USER: c_ulong =
    iowr(62, mem::size_of::<BtrfsInoLookupUserArgs>());
