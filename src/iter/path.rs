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

//! The shared path buffer for a walk.
//!
//! Every frame on the iterator's stack only records the length of its own
//! path. Since a child's path always extends its parent's path, one buffer is
//! enough to hold the paths of the whole current DFS branch: descending
//! appends to it, ascending only moves the length back. Siblings overwrite
//! each other's suffixes but never touch the common prefix.

use crate::error::{Error, ErrorImpl};

use std::{
    ffi::{CStr, OsStr},
    os::unix::ffi::OsStrExt,
    path::Path,
};

const PATH_SEPARATOR: u8 = b'/';

/// Initial capacity of the buffer, grown as needed.
const INITIAL_CAPACITY: usize = 256;

/// Growable path buffer that is always NUL-terminated after its contents.
#[derive(Debug)]
pub(crate) struct PathTrie {
    // Invariant: non-empty, and the last byte is the NUL terminator.
    buf: Vec<u8>,
}

impl PathTrie {
    pub(crate) fn new() -> Self {
        let mut buf = Vec::with_capacity(INITIAL_CAPACITY);
        buf.push(b'\0');
        Self { buf }
    }

    /// Length of the path currently written (excluding the terminator).
    pub(crate) fn len(&self) -> usize {
        self.buf.len() - 1
    }

    /// Cut the buffer back to `len` bytes.
    pub(crate) fn truncate(&mut self, len: usize) {
        debug_assert!(len <= self.len(), "truncate must not grow the path");
        self.buf.truncate(len);
        self.buf.push(b'\0');
    }

    /// Write the path of a child below the parent path (the first
    /// `parent_len` bytes) and return the child's path length.
    ///
    /// `subpath` is the directory path from the parent down to the directory
    /// containing `name`, and may be empty or carry leading or trailing
    /// separators. A separator is only inserted between two non-empty pieces,
    /// so the result never starts with one or contains `//`.
    ///
    /// Bytes before `parent_len` are never modified.
    pub(crate) fn append(&mut self, parent_len: usize, subpath: &[u8], name: &[u8]) -> usize {
        self.truncate(parent_len);
        self.buf.pop();
        for piece in [trim_separators(subpath), trim_separators(name)] {
            if piece.is_empty() {
                continue;
            }
            if !self.buf.is_empty() {
                self.buf.push(PATH_SEPARATOR);
            }
            self.buf.extend_from_slice(piece);
        }
        self.buf.push(b'\0');
        self.len()
    }

    /// The first `len` bytes of the buffer as a path.
    pub(crate) fn path(&self, len: usize) -> &Path {
        Path::new(OsStr::from_bytes(&self.buf[..len.min(self.len())]))
    }

    /// The part of the current path after the first `start` bytes, without a
    /// leading separator, as a C string borrowed from the buffer.
    pub(crate) fn suffix_cstr(&self, start: usize) -> Result<&CStr, Error> {
        let mut suffix = &self.buf[start.min(self.len())..];
        if suffix.first() == Some(&PATH_SEPARATOR) {
            suffix = &suffix[1..];
        }
        CStr::from_bytes_with_nul(suffix).map_err(|err| {
            ErrorImpl::BadKernelReply {
                operation: "append subvolume path".into(),
                description: format!("path component contains a NUL byte: {err}").into(),
            }
            .into()
        })
    }

    /// Number of path components in `path(to)` that are not in `path(from)`.
    ///
    /// `from` must be the length of an ancestor path (or 0).
    pub(crate) fn components_between(&self, from: usize, to: usize) -> usize {
        if from >= to {
            return 0;
        }
        let separators = memchr::memchr_iter(PATH_SEPARATOR, &self.buf[from..to]).count();
        // Only the root path has no separator before its first component.
        separators + usize::from(from == 0)
    }
}

fn trim_separators(mut bytes: &[u8]) -> &[u8] {
    while let [PATH_SEPARATOR, rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., PATH_SEPARATOR] = bytes {
        bytes = rest;
    }
    bytes
}
