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

// We need to permit unsafe code because we are interacting with libc APIs.
#![allow(unsafe_code)]

use crate::{
    btrfs::{
        BtrfsGetSubvolRootrefArgs, BtrfsInoLookupArgs, BtrfsInoLookupUserArgs,
        BTRFS_IOC_GET_SUBVOL_ROOTREF, BTRFS_IOC_INO_LOOKUP, BTRFS_IOC_INO_LOOKUP_USER,
    },
    utils::FdExt,
};

use std::{
    ffi::{CStr, OsStr},
    fmt,
    io::Error as IOError,
    os::unix::{
        ffi::OsStrExt,
        io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    },
    path::PathBuf,
    sync::OnceLock,
};

use libc::c_ulong;
use tracing::debug;
use rustix::fs::{self as rustix_fs, Mode, OFlags, ResolveFlags};

/// Representation of a file descriptor and its associated path at a given point
/// in time.
///
/// This is primarily used to make pretty-printing syscall arguments much nicer,
/// and users really shouldn't be interacting with this directly.
///
/// # Caveats
/// Note that the file descriptor value is very unlikely to reference a live
/// file descriptor. Its value is only used for informational purposes.
#[derive(Clone, Debug)]
pub(crate) struct FrozenFd(RawFd, Option<PathBuf>);

impl From<BorrowedFd<'_>> for FrozenFd {
    fn from(fd: BorrowedFd<'_>) -> Self {
        // SAFETY: as_unsafe_path is safe here since it is only used for
        //         pretty-printing error messages and no real logic.
        Self(fd.as_raw_fd(), fd.as_unsafe_path_unchecked().ok())
    }
}

impl fmt::Display for FrozenFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0)?;
        match &self.1 {
            Some(path) => write!(f, "{path:?}")?,
            None => write!(f, "<unknown>")?,
        };
        Ok(())
    }
}

/// Internal error returned by subvolrs's syscall wrappers.
///
/// The primary thing of note is that these errors contain detailed debugging
/// information about the arguments to each given syscall. Users would most
/// often not interact with these error variants directly and instead would make
/// use of the top-level [`Error`] type.
///
/// [`Error`]: crate::error::Error
#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error("openat({dirfd}, {path:?}, {flags:?})")]
    Openat {
        dirfd: FrozenFd,
        path: PathBuf,
        flags: OFlags,
        source: IOError,
    },

    #[error("openat2({dirfd}, {path:?}, {flags:?}, {resolve:?})")]
    Openat2 {
        dirfd: FrozenFd,
        path: PathBuf,
        flags: OFlags,
        resolve: ResolveFlags,
        source: IOError,
    },

    #[error("ioctl({fd}, BTRFS_IOC_GET_SUBVOL_ROOTREF, min_treeid={min_treeid})")]
    GetSubvolRootref {
        fd: FrozenFd,
        min_treeid: u64,
        source: IOError,
    },

    #[error("ioctl({fd}, BTRFS_IOC_INO_LOOKUP_USER, treeid={treeid}, dirid={dirid})")]
    InoLookupUser {
        fd: FrozenFd,
        treeid: u64,
        dirid: u64,
        source: IOError,
    },

    #[error("ioctl({fd}, BTRFS_IOC_INO_LOOKUP, treeid={treeid}, objectid={objectid})")]
    InoLookup {
        fd: FrozenFd,
        treeid: u64,
        objectid: u64,
        source: IOError,
    },
}

impl Error {
    pub(crate) fn root_cause(&self) -> &IOError {
        match self {
            Error::Openat { source, .. } => source,
            Error::Openat2 { source, .. } => source,
            Error::GetSubvolRootref { source, .. } => source,
            Error::InoLookupUser { source, .. } => source,
            Error::InoLookup { source, .. } => source,
        }
    }

    pub(crate) fn errno(&self) -> Option<i32> {
        self.root_cause().raw_os_error()
    }
}

/// Wrapper for `openat(2)` which auto-sets `O_CLOEXEC | O_NOCTTY`.
///
/// The path is taken as a [`CStr`] so that slices of an already
/// NUL-terminated buffer can be passed to the kernel without copying.
pub(crate) fn openat<Fd: AsFd>(dirfd: Fd, path: &CStr, flags: OFlags) -> Result<OwnedFd, Error> {
    let dirfd = dirfd.as_fd();
    let flags = flags | OFlags::CLOEXEC | OFlags::NOCTTY;

    rustix_fs::openat(dirfd, path, flags, Mode::empty()).map_err(|errno| Error::Openat {
        dirfd: dirfd.into(),
        path: OsStr::from_bytes(path.to_bytes()).into(),
        flags,
        source: errno.into(),
    })
}

/// Wrapper for `openat2(2)` which auto-sets `O_CLOEXEC | O_NOCTTY`.
///
/// The kernel can fail the lookup with `EAGAIN` if a rename or mount raced
/// with it. Retrying is left to the caller.
pub(crate) fn openat2<Fd: AsFd>(
    dirfd: Fd,
    path: &CStr,
    flags: OFlags,
    resolve: ResolveFlags,
) -> Result<OwnedFd, Error> {
    let dirfd = dirfd.as_fd();
    let flags = flags | OFlags::CLOEXEC | OFlags::NOCTTY;
    let mode = Mode::empty();

    rustix_fs::openat2(dirfd, path, flags, mode, resolve).map_err(|errno| Error::Openat2 {
        dirfd: dirfd.into(),
        path: OsStr::from_bytes(path.to_bytes()).into(),
        flags,
        resolve,
        source: errno.into(),
    })
}

/// Whether `openat2(2)` is usable here (Linux 5.6, and not blocked by a
/// seccomp profile). Checked once per process.
pub(crate) fn openat2_is_supported() -> bool {
    const DOT: &CStr = match CStr::from_bytes_with_nul(b".\0") {
        Ok(path) => path,
        Err(_) => panic!("\".\" is a valid C string"),
    };
    static IS_SUPPORTED: OnceLock<bool> = OnceLock::new();

    *IS_SUPPORTED.get_or_init(|| {
        let fd = openat2(rustix_fs::CWD, DOT, OFlags::PATH, ResolveFlags::empty());
        debug!(supported = fd.is_ok(), "checked for openat2 support");
        fd.is_ok()
    })
}

/// Issue a btrfs ioctl whose single argument is a pointer to `arg`.
///
/// # Safety
///
/// `request` must be an ioctl that reads and writes exactly a `T`.
unsafe fn btrfs_ioctl<T>(fd: BorrowedFd<'_>, request: c_ulong, arg: &mut T) -> Result<(), IOError> {
    // SAFETY: The caller guarantees that the kernel will not access more than
    //         size_of::<T>() bytes through the pointer.
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request as _, arg as *mut T) };
    let err = IOError::last_os_error();

    if ret >= 0 {
        Ok(())
    } else {
        Err(err)
    }
}

/// Wrapper for `ioctl(BTRFS_IOC_GET_SUBVOL_ROOTREF)`.
///
/// Note that `EOVERFLOW` is returned as an error even though the kernel has
/// filled `args` with a full page of results. Callers need to handle that.
pub(crate) fn btrfs_get_subvol_rootref<Fd: AsFd>(
    fd: Fd,
    args: &mut BtrfsGetSubvolRootrefArgs,
) -> Result<(), Error> {
    let fd = fd.as_fd();
    let min_treeid = args.min_treeid;

    // SAFETY: BTRFS_IOC_GET_SUBVOL_ROOTREF takes a btrfs_ioctl_get_subvol_rootref_args.
    unsafe { btrfs_ioctl(fd, BTRFS_IOC_GET_SUBVOL_ROOTREF, args) }.map_err(|err| {
        Error::GetSubvolRootref {
            fd: fd.into(),
            min_treeid,
            source: err,
        }
    })
}

/// Wrapper for `ioctl(BTRFS_IOC_INO_LOOKUP_USER)`.
pub(crate) fn btrfs_ino_lookup_user<Fd: AsFd>(
    fd: Fd,
    args: &mut BtrfsInoLookupUserArgs,
) -> Result<(), Error> {
    let fd = fd.as_fd();
    let (treeid, dirid) = (args.treeid, args.dirid);

    // SAFETY: BTRFS_IOC_INO_LOOKUP_USER takes a btrfs_ioctl_ino_lookup_user_args.
    unsafe { btrfs_ioctl(fd, BTRFS_IOC_INO_LOOKUP_USER, args) }.map_err(|err| {
        Error::InoLookupUser {
            fd: fd.into(),
            treeid,
            dirid,
            source: err,
        }
    })
}

/// Wrapper for `ioctl(BTRFS_IOC_INO_LOOKUP)`.
///
/// This is only unprivileged when `treeid == 0` and `objectid ==
/// BTRFS_FIRST_FREE_OBJECTID`, which is all we use it for.
pub(crate) fn btrfs_ino_lookup<Fd: AsFd>(
    fd: Fd,
    args: &mut BtrfsInoLookupArgs,
) -> Result<(), Error> {
    let fd = fd.as_fd();
    let (treeid, objectid) = (args.treeid, args.objectid);

    // SAFETY: BTRFS_IOC_INO_LOOKUP takes a btrfs_ioctl_ino_lookup_args.
    unsafe { btrfs_ioctl(fd, BTRFS_IOC_INO_LOOKUP, args) }.map_err(|err| Error::InoLookup {
        fd: fd.into(),
        treeid,
        objectid,
        source: err,
    })
}
