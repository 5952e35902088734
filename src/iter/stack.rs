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

//! The DFS control stack and the directory handle that follows it.
//!
//! Only one directory handle is kept open at a time (besides the root the
//! walk started from): the one for the subvolume of the top frame. Descending
//! opens the child relative to it, ascending walks back up with `..` once per
//! path component that the popped frame added. Replacing the handle closes
//! the previous one, so a frame's handle is closed exactly when the walk
//! leaves that frame.

use crate::{
    backend::{RootRef, SubvolumeBackend},
    btrfs::SubvolumeId,
    error::{Error, ErrorExt, ErrorImpl},
    iter::{cursor::RootRefCursor, path::PathTrie},
};

use tracing::{debug, trace};

#[derive(Debug)]
pub(crate) struct Frame {
    /// The subvolume whose children this frame enumerates.
    pub(crate) id: SubvolumeId,
    pub(crate) cursor: RootRefCursor,
    /// Length of this subvolume's path in the [`PathTrie`].
    pub(crate) path_len: usize,
}

impl Frame {
    fn new(id: SubvolumeId, path_len: usize) -> Self {
        Self {
            id,
            cursor: RootRefCursor::new(),
            path_len,
        }
    }
}

/// Outcome of trying to enter a child subvolume.
#[derive(Debug)]
pub(crate) enum Descent {
    Entered,
    /// The child's directory could not be opened. Nothing was pushed.
    Skipped,
}

#[derive(Debug)]
pub(crate) struct FrameStack<D> {
    frames: Vec<Frame>,
    /// Handle for the top frame's subvolume, or `None` while the top frame is
    /// the root of the walk (whose handle is owned by the iterator).
    current: Option<D>,
}

fn broken_stack(description: &'static str) -> Error {
    ErrorImpl::BrokenFrameStack {
        description: description.into(),
    }
    .into()
}

impl<D> FrameStack<D> {
    pub(crate) fn new(top: SubvolumeId) -> Self {
        Self {
            frames: vec![Frame::new(top, 0)],
            current: None,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Whether a directory handle other than the root is currently open.
    pub(crate) fn has_open_handle(&self) -> bool {
        self.current.is_some()
    }

    /// The directory handle of the top frame.
    pub(crate) fn current<'a>(&'a self, root: &'a D) -> &'a D {
        self.current.as_ref().unwrap_or(root)
    }

    /// Next child of the top frame, fetching through the top frame's handle.
    pub(crate) fn next_rootref<B>(
        &mut self,
        backend: &B,
        root: &D,
    ) -> Result<Option<RootRef>, Error>
    where
        B: SubvolumeBackend<Dir = D>,
    {
        let dir = self.current.as_ref().unwrap_or(root);
        let top = self
            .frames
            .last_mut()
            .ok_or_else(|| broken_stack("listing children with no frames"))?;
        top.cursor
            .next(backend, dir)
            .with_wrap(|| format!("list children of subvolume {}", top.id))
    }

    /// Open the child subvolume whose path was just written to `path` (with
    /// length `path_len`) and push a frame for it.
    pub(crate) fn descend<B>(
        &mut self,
        backend: &B,
        root: &D,
        path: &PathTrie,
        id: SubvolumeId,
        path_len: usize,
    ) -> Result<Descent, Error>
    where
        B: SubvolumeBackend<Dir = D>,
    {
        let parent_len = self
            .top()
            .ok_or_else(|| broken_stack("descending with no frames"))?
            .path_len;
        let subpath = path.suffix_cstr(parent_len)?;

        let dir = match backend.open_subdir(self.current(root), subpath) {
            Ok(dir) => dir,
            Err(err) if err.is_skippable() => {
                debug!(
                    subvolume = %id,
                    path = ?path.path(path_len),
                    error = %err,
                    "skipping unopenable subvolume"
                );
                return Ok(Descent::Skipped);
            }
            Err(err) => {
                return Err(err).with_wrap(|| {
                    format!("descend into subvolume {id} at {:?}", path.path(path_len))
                })
            }
        };

        // The parent's handle (if it isn't the root) is closed here. It is
        // reopened through ".." when the child frame is popped.
        self.current = Some(dir);
        self.frames.push(Frame::new(id, path_len));
        trace!(subvolume = %id, depth = self.frames.len(), "pushed frame");
        Ok(Descent::Entered)
    }

    /// Pop the top frame and move the current handle back to the new top
    /// frame's subvolume. Popping the last frame ends the walk.
    pub(crate) fn ascend<B>(&mut self, backend: &B, path: &PathTrie) -> Result<(), Error>
    where
        B: SubvolumeBackend<Dir = D>,
    {
        let popped = self
            .frames
            .pop()
            .ok_or_else(|| broken_stack("popping an empty stack"))?;
        trace!(subvolume = %popped.id, depth = self.frames.len(), "popped frame");

        let parent_len = match self.frames.last() {
            Some(parent) => parent.path_len,
            None => {
                self.current = None;
                return Ok(());
            }
        };
        if parent_len == 0 {
            // Back at the root of the walk, there is nothing to reopen.
            self.current = None;
            return Ok(());
        }

        for _ in 0..path.components_between(parent_len, popped.path_len) {
            let dir = self
                .current
                .as_ref()
                .ok_or_else(|| broken_stack("no directory handle below the root frame"))?;
            let parent = backend.open_parent(dir).with_wrap(|| {
                format!(
                    "return to {:?} from subvolume {}",
                    path.path(parent_len),
                    popped.id
                )
            })?;
            self.current = Some(parent);
        }
        Ok(())
    }

    /// Pop every frame and close the current handle.
    pub(crate) fn clear(&mut self) {
        while self.frames.pop().is_some() {}
        self.current = None;
    }
}
