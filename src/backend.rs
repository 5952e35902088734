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

//! The kernel primitives the subvolume iterator is built from.
//!
//! [`SubvolumeBackend`] is the seam between the walk and the system: the
//! iterator itself never issues a syscall directly. [`Kernel`] is the real
//! implementation on top of `OwnedFd`s.

use crate::{
    btrfs::{
        BtrfsGetSubvolRootrefArgs, BtrfsInoLookupArgs, BtrfsInoLookupUserArgs, SubvolumeId,
        BTRFS_FIRST_FREE_OBJECTID,
    },
    error::{Error, ErrorImpl},
    syscalls,
};

use std::{
    ffi::{CStr, OsStr, OsString},
    os::unix::{
        ffi::OsStrExt,
        io::{AsFd, OwnedFd},
    },
    path::PathBuf,
};

use rustix::fs::{OFlags, ResolveFlags};
use tracing::trace;

/// A `(child subvolume, containing directory)` pair as reported by
/// `BTRFS_IOC_GET_SUBVOL_ROOTREF`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootRef {
    /// The child subvolume.
    pub id: SubvolumeId,
    /// Inode number (inside the parent subvolume) of the directory holding
    /// the child's mount point.
    pub dirid: u64,
}

/// Whether a page of [`RootRef`]s is the last one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageStatus {
    /// Every remaining child fit in the page.
    Complete,
    /// The page was filled and there are more children to fetch.
    Truncated,
}

/// Result of an unprivileged subvolume path lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupUser {
    /// Name of the subvolume's mount point entry.
    pub name: OsString,
    /// Directory path from the lookup handle down to the directory containing
    /// the mount point. Empty if the mount point is directly inside the handle.
    /// The kernel includes a trailing `/` on non-empty paths.
    pub subpath: PathBuf,
}

/// Directory-handle operations needed to walk a subvolume tree.
///
/// Every method is a single blocking operation relative to an open directory
/// handle. Errors are expected to carry an errno (see [`Error::kind`]) so the
/// iterator can tell permission and race failures (`EACCES`, `ENOENT`,
/// `ELOOP`, `EXDEV`) apart from fatal ones. Implementations outside this crate can convert a
/// [`std::io::Error`] into an [`Error`] to keep its errno.
pub trait SubvolumeBackend {
    /// An open directory handle. Dropping it must close it.
    type Dir;

    /// Append the next page of direct children of the subvolume containing
    /// `dir` whose ids are `>= min_id` to `out`, in ascending id order.
    fn rootrefs(
        &self,
        dir: &Self::Dir,
        min_id: SubvolumeId,
        out: &mut Vec<RootRef>,
    ) -> Result<PageStatus, Error>;

    /// Look up where the mount point of child subvolume `rootref` lives,
    /// relative to `dir`.
    fn lookup_user(&self, dir: &Self::Dir, rootref: RootRef) -> Result<LookupUser, Error>;

    /// Open the directory at `path` (relative, `/`-separated) below `dir`.
    ///
    /// Implementations should refuse to follow symlinks or cross mounts on
    /// the way, failing with `ELOOP` or `EXDEV` instead.
    fn open_subdir(&self, dir: &Self::Dir, path: &CStr) -> Result<Self::Dir, Error>;

    /// Open the parent directory of `dir`.
    fn open_parent(&self, dir: &Self::Dir) -> Result<Self::Dir, Error>;
}

/// [`SubvolumeBackend`] that talks to the running kernel.
///
/// All operations work without `CAP_SYS_ADMIN` (Linux 4.18 for
/// `GET_SUBVOL_ROOTREF`, Linux 5.7 for `INO_LOOKUP_USER`).
#[derive(Clone, Copy, Debug, Default)]
pub struct Kernel;

const DOTDOT: &CStr = match CStr::from_bytes_with_nul(b"..\0") {
    Ok(path) => path,
    Err(_) => panic!("\"..\" is a valid C string"),
};

fn dir_flags() -> OFlags {
    OFlags::RDONLY | OFlags::DIRECTORY
}

/// Lookup restrictions for opening a subvolume below its parent. The path
/// came from `INO_LOOKUP_USER` and never contains `..`, symlinks or mount
/// points, so any of them showing up means the tree changed underneath us.
fn beneath_resolve() -> ResolveFlags {
    ResolveFlags::BENEATH
        | ResolveFlags::NO_SYMLINKS
        | ResolveFlags::NO_MAGICLINKS
        | ResolveFlags::NO_XDEV
}

/// `openat2` fails with `EAGAIN` when a rename or mount raced with the lookup.
const MAX_EAGAIN_RETRIES: usize = 16;

fn open_beneath(dir: &OwnedFd, path: &CStr) -> Result<OwnedFd, syscalls::Error> {
    let mut retries = 0;
    loop {
        match syscalls::openat2(dir, path, dir_flags(), beneath_resolve()) {
            Err(err) if err.errno() == Some(libc::EAGAIN) && retries < MAX_EAGAIN_RETRIES => {
                trace!(retries, path = ?path, "openat2 raced with a rename or mount, retrying");
                retries += 1;
            }
            ret => return ret,
        }
    }
}

fn convert_errno(err: syscalls::Error, operation: &'static str, ioctl: &'static str) -> ErrorImpl {
    // Either the kernel predates the ioctl or this is not a btrfs handle.
    if err.errno() == Some(libc::ENOTTY) {
        ErrorImpl::NotSupported {
            feature: ioctl.into(),
        }
    } else {
        ErrorImpl::RawOsError {
            operation: operation.into(),
            source: err,
        }
    }
}

fn nul_terminated<'a>(
    buf: &'a [u8],
    operation: &'static str,
    field: &'static str,
) -> Result<&'a OsStr, Error> {
    CStr::from_bytes_until_nul(buf)
        .map(|s| OsStr::from_bytes(s.to_bytes()))
        .map_err(|_| {
            ErrorImpl::BadKernelReply {
                operation: operation.into(),
                description: format!("{field} is not NUL-terminated").into(),
            }
            .into()
        })
}

impl SubvolumeBackend for Kernel {
    type Dir = OwnedFd;

    fn rootrefs(
        &self,
        dir: &OwnedFd,
        min_id: SubvolumeId,
        out: &mut Vec<RootRef>,
    ) -> Result<PageStatus, Error> {
        let mut args = BtrfsGetSubvolRootrefArgs::new(min_id.0);
        let status = match syscalls::btrfs_get_subvol_rootref(dir, &mut args) {
            Ok(()) => PageStatus::Complete,
            // The page is full and valid, there are just more entries after it.
            Err(err) if err.errno() == Some(libc::EOVERFLOW) => PageStatus::Truncated,
            Err(err) => Err(convert_errno(
                err,
                "list child subvolumes",
                "BTRFS_IOC_GET_SUBVOL_ROOTREF",
            ))?,
        };
        out.extend(args.items().iter().map(|rootref| RootRef {
            id: SubvolumeId(rootref.treeid),
            dirid: rootref.dirid,
        }));
        Ok(status)
    }

    fn lookup_user(&self, dir: &OwnedFd, rootref: RootRef) -> Result<LookupUser, Error> {
        const OPERATION: &str = "look up subvolume path";

        let mut args = BtrfsInoLookupUserArgs::new(rootref.id.0, rootref.dirid);
        syscalls::btrfs_ino_lookup_user(dir, &mut args)
            .map_err(|err| convert_errno(err, OPERATION, "BTRFS_IOC_INO_LOOKUP_USER"))?;

        Ok(LookupUser {
            name: nul_terminated(&args.name, OPERATION, "name")?.to_os_string(),
            subpath: nul_terminated(&args.path, OPERATION, "path")?.into(),
        })
    }

    fn open_subdir(&self, dir: &OwnedFd, path: &CStr) -> Result<OwnedFd, Error> {
        let dir = if syscalls::openat2_is_supported() {
            open_beneath(dir, path)
        } else {
            syscalls::openat(dir, path, dir_flags())
        };
        dir.map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "open subvolume directory".into(),
                source: err,
            }
            .into()
        })
    }

    fn open_parent(&self, dir: &OwnedFd) -> Result<OwnedFd, Error> {
        syscalls::openat(dir, DOTDOT, dir_flags()).map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "open parent directory".into(),
                source: err,
            }
            .into()
        })
    }
}

/// Get the id of the subvolume containing the directory `fd`.
///
/// This uses the one form of `BTRFS_IOC_INO_LOOKUP` which does not require
/// privileges (looking up the subvolume root inode of the fd's own tree).
pub fn subvolume_id<Fd: AsFd>(fd: Fd) -> Result<SubvolumeId, Error> {
    let mut args = BtrfsInoLookupArgs::new(0, BTRFS_FIRST_FREE_OBJECTID);
    syscalls::btrfs_ino_lookup(fd, &mut args)
        .map_err(|err| convert_errno(err, "get subvolume id", "BTRFS_IOC_INO_LOOKUP"))?;
    Ok(SubvolumeId(args.treeid))
}
