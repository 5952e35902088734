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

//! subvolrs walks the tree of btrfs subvolumes below a directory without any
//! privileges.
//!
//! The usual way of listing subvolumes (`BTRFS_IOC_TREE_SEARCH`) requires
//! `CAP_SYS_ADMIN`. Instead, subvolrs uses the unprivileged ioctls added in
//! Linux 4.18 and 5.7 to list the children of a subvolume and find where each
//! child is mounted, opening each child through the filesystem as it goes.
//! This means the walk only reaches subvolumes whose mount points the caller
//! could reach by path anyway, and everything else is silently skipped.
//!
//! # Assumptions
//!
//! * The kernel supports `BTRFS_IOC_GET_SUBVOL_ROOTREF` and
//!   `BTRFS_IOC_INO_LOOKUP_USER` (Linux 5.7 or later).
//! * The directory the walk starts from is the root directory of a
//!   subvolume, opened as a regular (not `O_PATH`) directory.
//!
//! # Examples
//!
//! ```no_run
//! # use subvolrs::{error::Error, flags::IteratorFlags, SubvolumeIter};
//! # use std::{fs::File, os::unix::io::OwnedFd};
//! # fn main() -> Result<(), Error> {
//! let root: OwnedFd = File::open("/mnt/btrfs")
//!     .expect("open btrfs mount")
//!     .into();
//! let mut iter = SubvolumeIter::open(root, IteratorFlags::empty())?;
//! while let Some((path, id)) = iter.next_entry()? {
//!     println!("{id}\t{}", path.display());
//! }
//! iter.end();
//! # Ok(())
//! # }
//! ```
//!
//! [`SubvolumeIter`] is also an [`Iterator`] over owned paths, which is more
//! convenient when the paths need to outlive the walk:
//!
//! ```no_run
//! # use subvolrs::{error::Error, flags::IteratorFlags, SubvolumeIter};
//! # use std::{fs::File, os::unix::io::OwnedFd, path::PathBuf};
//! # fn main() -> Result<(), Error> {
//! # let root: OwnedFd = File::open("/mnt/btrfs").expect("open").into();
//! let subvolumes = SubvolumeIter::open(root, IteratorFlags::INCLUDE_ROOT)?
//!     .collect::<Result<Vec<_>, _>>()?;
//! # Ok(())
//! # }
//! ```

// btrfs only exists on Linux.
#![cfg(target_os = "linux")]

// `Error` definitions.
pub mod error;

// Iterator configuration.
pub mod flags;
#[doc(inline)]
pub use flags::IteratorFlags;

// btrfs ioctl ABI.
mod btrfs;
pub use btrfs::SubvolumeId;

// Directory-handle operations the iterator is written against.
mod backend;
pub use backend::{subvolume_id, Kernel, LookupUser, PageStatus, RootRef, SubvolumeBackend};

// `SubvolumeIter` implementation.
mod iter;
#[doc(inline)]
pub use iter::SubvolumeIter;

// Internally used helpers.
mod syscalls;
mod utils;
pub use utils::MaybeOwnedDir;
