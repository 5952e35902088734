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

//! Paginated enumeration of the direct children of one subvolume.

use crate::{
    backend::{PageStatus, RootRef, SubvolumeBackend},
    btrfs::SubvolumeId,
    error::{Error, ErrorImpl},
};

use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CursorState {
    /// Nothing fetched yet.
    Fresh,
    /// The last page was truncated, fetch again once it is consumed.
    MorePages,
    /// The last page held every remaining child.
    LastPage,
}

/// Read cursor over the children of a subvolume.
///
/// Children are fetched one page at a time. `min_id` is the low-water mark:
/// after each fetch it is moved past the largest id returned, so a refetch
/// never returns an entry twice and never skips one.
#[derive(Debug)]
pub(crate) struct RootRefCursor {
    min_id: SubvolumeId,
    page: Vec<RootRef>,
    pos: usize,
    state: CursorState,
}

impl RootRefCursor {
    pub(crate) fn new() -> Self {
        Self {
            min_id: SubvolumeId(0),
            page: Vec::new(),
            pos: 0,
            state: CursorState::Fresh,
        }
    }

    /// Return the next child, fetching the next page through `dir` if the
    /// current one has been consumed. `Ok(None)` means there are no more
    /// children.
    pub(crate) fn next<B: SubvolumeBackend>(
        &mut self,
        backend: &B,
        dir: &B::Dir,
    ) -> Result<Option<RootRef>, Error> {
        if self.pos >= self.page.len() && !self.fetch(backend, dir)? {
            return Ok(None);
        }
        let rootref = self.page[self.pos];
        self.pos += 1;
        Ok(Some(rootref))
    }

    /// Fetch the next page. Returns whether any entries were fetched.
    fn fetch<B: SubvolumeBackend>(&mut self, backend: &B, dir: &B::Dir) -> Result<bool, Error> {
        if self.state == CursorState::LastPage {
            return Ok(false);
        }

        self.page.clear();
        self.pos = 0;
        let status = backend.rootrefs(dir, self.min_id, &mut self.page)?;
        trace!(min_id = %self.min_id, fetched = self.page.len(), ?status, "fetched rootref page");

        if let Some(max) = self.page.iter().map(|rootref| rootref.id).max() {
            self.min_id = max.successor();
        }
        self.state = match status {
            PageStatus::Complete => CursorState::LastPage,
            // A truncated page with nothing in it would have us refetch the
            // same range forever.
            PageStatus::Truncated if self.page.is_empty() => Err(ErrorImpl::BadKernelReply {
                operation: "list child subvolumes".into(),
                description: format!(
                    "page starting at subvolume {} is truncated but empty",
                    self.min_id
                )
                .into(),
            })?,
            PageStatus::Truncated => CursorState::MorePages,
        };
        Ok(!self.page.is_empty())
    }
}
