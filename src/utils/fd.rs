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

use crate::error::{Error, ErrorImpl};

use std::{
    fs,
    os::unix::io::{AsFd, AsRawFd},
    path::PathBuf,
};

pub(crate) trait FdExt: AsFd {
    /// Get the path this file descriptor is referencing.
    ///
    /// This is done through `readlink(/proc/self/fd)` and is naturally racy
    /// (hence the name "unsafe"), so it's important to only use this with the
    /// understanding that it only provides the guarantee that "at some point
    /// during execution this was the path the fd pointed to" and no more.
    ///
    /// It must only be used for diagnostics (such as the paths included in
    /// syscall error messages) and never to make decisions during a walk.
    fn as_unsafe_path_unchecked(&self) -> Result<PathBuf, Error>;
}

impl<Fd: AsFd> FdExt for Fd {
    fn as_unsafe_path_unchecked(&self) -> Result<PathBuf, Error> {
        let fd_path = PathBuf::from(format!("/proc/self/fd/{}", self.as_fd().as_raw_fd()));
        fs::read_link(&fd_path).map_err(|err| {
            ErrorImpl::OsError {
                operation: format!("readlink fd magic-link {fd_path:?}").into(),
                source: err,
            }
            .into()
        })
    }
}
