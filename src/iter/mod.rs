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

//! Unprivileged, depth-first iteration over a btrfs subvolume tree.

mod cursor;
mod path;
mod resolver;
mod stack;

use crate::{
    backend::{subvolume_id, Kernel, SubvolumeBackend},
    btrfs::SubvolumeId,
    error::Error,
    flags::IteratorFlags,
    utils::MaybeOwnedDir,
};

use self::{
    path::PathTrie,
    resolver::Resolution,
    stack::{Descent, FrameStack},
};

use std::{
    fmt,
    iter::FusedIterator,
    os::unix::{ffi::OsStrExt, io::OwnedFd},
    path::{Path, PathBuf},
};

use tracing::{debug, trace};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IterState {
    /// Nothing has been yielded yet.
    Fresh,
    Walking,
    /// The walk finished or hit a fatal error.
    Done,
}

/// Iterator over every subvolume below a directory, without privileges.
///
/// Subvolumes are produced depth-first: a subvolume's entire subtree is
/// produced before its next sibling, and siblings are produced in ascending id
/// order. Each produced path is relative to the root directory of the walk,
/// uses `/` separators and has no leading `/`.
///
/// Subvolumes that cannot be reached (because a directory on the way lacks
/// search permission, or because the path changed underneath the walk) are
/// silently left out, together with everything below them. Any other failure
/// is returned as an error and ends the walk.
///
/// The walk is lazy: each call to [`SubvolumeIter::next_entry`] only does the
/// I/O needed to find the next subvolume. Apart from the root handle, the walk
/// holds a single directory handle (two for a moment while stepping back up
/// through `..`), and all of them are closed by
/// [`SubvolumeIter::end`] (or when the iterator is dropped), no matter how
/// the walk went.
///
/// A `SubvolumeIter` must not be shared between threads. Walk the same tree
/// concurrently with separate iterators instead.
pub struct SubvolumeIter<'r, B: SubvolumeBackend = Kernel> {
    backend: B,
    root: MaybeOwnedDir<'r, B::Dir>,
    stack: FrameStack<B::Dir>,
    path: PathTrie,
    flags: IteratorFlags,
    state: IterState,
}

impl SubvolumeIter<'static, Kernel> {
    /// Start a walk of the subvolume containing `root`, taking ownership of
    /// the handle.
    ///
    /// `root` must be a regular (not `O_PATH`) directory handle on btrfs.
    pub fn open(root: OwnedFd, flags: IteratorFlags) -> Result<Self, Error> {
        let top = subvolume_id(&root)?;
        Ok(Self::start(Kernel, MaybeOwnedDir::Owned(root), top, flags))
    }
}

impl<'r> SubvolumeIter<'r, Kernel> {
    /// Like [`SubvolumeIter::open`], but borrows `root` for the duration of
    /// the walk.
    pub fn open_borrowed(root: &'r OwnedFd, flags: IteratorFlags) -> Result<Self, Error> {
        let top = subvolume_id(root)?;
        Ok(Self::start(
            Kernel,
            MaybeOwnedDir::Borrowed(root),
            top,
            flags,
        ))
    }
}

impl<'r, B: SubvolumeBackend> SubvolumeIter<'r, B> {
    /// Start a walk from `root`, which must be the root directory of
    /// subvolume `top`.
    ///
    /// No I/O is done until the first call to [`SubvolumeIter::next_entry`].
    /// `top` is only used to report the root itself when
    /// [`IteratorFlags::INCLUDE_ROOT`] is set.
    pub fn start(
        backend: B,
        root: MaybeOwnedDir<'r, B::Dir>,
        top: SubvolumeId,
        flags: IteratorFlags,
    ) -> Self {
        trace!(subvolume = %top, ?flags, "starting subvolume walk");
        Self {
            backend,
            root,
            stack: FrameStack::new(top),
            path: PathTrie::new(),
            flags,
            state: IterState::Fresh,
        }
    }

    /// Produce the next subvolume in the walk.
    ///
    /// The returned path borrows the iterator's internal buffer and is only
    /// valid until the next call (use [`Iterator::next`] to get owned paths).
    /// `Ok(None)` means the walk is complete. After an error the walk cannot
    /// be continued, and every later call returns `Ok(None)`.
    pub fn next_entry(&mut self) -> Result<Option<(&Path, SubvolumeId)>, Error> {
        match self.state {
            IterState::Done => return Ok(None),
            IterState::Fresh => {
                self.state = IterState::Walking;
                if self.flags.contains(IteratorFlags::INCLUDE_ROOT) {
                    if let Some(id) = self.stack.top().map(|frame| frame.id) {
                        return Ok(Some((self.path.path(0), id)));
                    }
                }
            }
            IterState::Walking => {}
        }

        match self.advance() {
            Ok(Some(id)) => {
                let len = self.stack.top().map_or(0, |frame| frame.path_len);
                Ok(Some((self.path.path(len), id)))
            }
            Ok(None) => {
                debug!("subvolume walk complete");
                self.release();
                Ok(None)
            }
            Err(err) => {
                debug!(error = %err, depth = self.stack.depth(), "subvolume walk aborted");
                self.release();
                Err(err)
            }
        }
    }

    /// Walk until the next subvolume we can enter, and return its id.
    fn advance(&mut self) -> Result<Option<SubvolumeId>, Error> {
        loop {
            let parent_len = match self.stack.top() {
                Some(frame) => frame.path_len,
                None => return Ok(None),
            };

            let rootref = match self.stack.next_rootref(&self.backend, self.root.get())? {
                Some(rootref) => rootref,
                None => {
                    self.stack.ascend(&self.backend, &self.path)?;
                    continue;
                }
            };

            let dir = self.stack.current(self.root.get());
            let found = match resolver::resolve(&self.backend, dir, rootref)? {
                Resolution::Resolved(found) => found,
                Resolution::Skipped => continue,
            };

            let path_len = self.path.append(
                parent_len,
                found.subpath.as_os_str().as_bytes(),
                found.name.as_bytes(),
            );
            match self.stack.descend(
                &self.backend,
                self.root.get(),
                &self.path,
                rootref.id,
                path_len,
            )? {
                Descent::Entered => return Ok(Some(rootref.id)),
                Descent::Skipped => self.path.truncate(parent_len),
            }
        }
    }

    /// Current depth of the walk (1 while enumerating the root's children).
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Whether the walk is over, either because it completed or because it
    /// failed.
    pub fn is_done(&self) -> bool {
        self.state == IterState::Done
    }

    /// Release every resource held by the walk: all frames, the current
    /// directory handle, the path buffer, and the root handle if the
    /// iterator owns it.
    ///
    /// This is what dropping the iterator does as well, but it can be
    /// clearer to spell it out.
    pub fn end(self) {}

    /// Drop every frame and directory handle except the root. The walk
    /// cannot be resumed afterwards.
    fn release(&mut self) {
        self.stack.clear();
        self.path.truncate(0);
        self.state = IterState::Done;
    }
}

impl<B: SubvolumeBackend> Drop for SubvolumeIter<'_, B> {
    fn drop(&mut self) {
        self.release();
        // The root handle (if owned) is closed when the fields are dropped.
    }
}

impl<B: SubvolumeBackend> Iterator for SubvolumeIter<'_, B> {
    type Item = Result<(PathBuf, SubvolumeId), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
            .map(|entry| entry.map(|(path, id)| (path.to_path_buf(), id)))
            .transpose()
    }
}

impl<B: SubvolumeBackend> FusedIterator for SubvolumeIter<'_, B> {}

impl<B: SubvolumeBackend> fmt::Debug for SubvolumeIter<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubvolumeIter")
            .field("path", &self.path.path(self.path.len()))
            .field("depth", &self.stack.depth())
            .field("holds_subvolume_handle", &self.stack.has_open_handle())
            .field("owns_root", &self.root.is_owned())
            .field("flags", &self.flags)
            .field("state", &self.state)
            .finish()
    }
}
