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

use crate::{
    flags::IteratorFlags, tests::common::FakeFs, MaybeOwnedDir, SubvolumeId, SubvolumeIter,
};

use anyhow::{Context, Error};

macro_rules! fake_tree {
    (@do $fs:ident, $path:expr, dir) => {
        $fs.mkdir($path).with_context(|| format!("mkdir {}", $path))?;
    };
    (@do $fs:ident, $path:expr, subvol $id:expr) => {
        $fs.create_subvolume($path, $id)
            .with_context(|| format!("create subvolume {} at {}", $id, $path))?;
    };
    (@do $fs:ident, $path:expr, chmod 0) => {
        $fs.set_searchable($path, false)
            .with_context(|| format!("chmod 0 {}", $path))?;
    };

    // fake_tree! {
    //     "a" => (subvol 256);
    //     "a/b/c" => (dir);
    //     "a/b" => (chmod 0);
    // }
    ($($subpath:expr => ($($inner:tt)*));+ $(;)*) => {
        {
            let fs = FakeFs::new();
            $(
                fake_tree!(@do fs, $subpath, $($inner)*);
            )+
            fs
        }
    };
}

/// Subvolumes of [`create_basic_tree`] in walk order.
pub(crate) const BASIC_TREE: &[(&str, u64)] = &[
    ("subvol1", 256),
    ("subvol1/subvol3", 258),
    ("subvol1/dir1/dir2/subvol4", 259),
    ("subvol2", 257),
];

pub(crate) fn create_basic_tree() -> Result<FakeFs, Error> {
    Ok(fake_tree! {
        "subvol1" => (subvol 256);
        "subvol2" => (subvol 257);
        "subvol1/subvol3" => (subvol 258);
        "subvol1/dir1/dir2/subvol4" => (subvol 259);
        // Plain directories without subvolumes are invisible to the walk.
        "subvol2/empty/dir" => (dir);
        "plain" => (dir);
    })
}

/// A tree whose ids do not follow the order the subvolumes were created in,
/// to catch walks that depend on creation order.
pub(crate) fn create_shuffled_tree() -> Result<FakeFs, Error> {
    Ok(fake_tree! {
        "z" => (subvol 300);
        "a" => (subvol 280);
        "m/n" => (subvol 290);
        "z/deep/er" => (subvol 260);
        "z/first" => (subvol 310);
        "a/inner" => (subvol 270);
        "a/inner/innermost" => (subvol 400);
    })
}

/// Root with `count` direct children, with ids starting at 256.
pub(crate) fn create_wide_tree(count: u64) -> Result<FakeFs, Error> {
    let fs = FakeFs::new();
    for idx in 0..count {
        let id = 256 + idx;
        fs.create_subvolume(&format!("sub{idx:03}"), id)?;
    }
    // One grandchild so the wide level has to be resumed after a descent.
    fs.create_subvolume("sub000/nested", 256 + count)?;
    Ok(fs)
}

/// Start a walk of `fs` from its root directory.
pub(crate) fn walk_fake(
    fs: &FakeFs,
    flags: IteratorFlags,
) -> Result<SubvolumeIter<'static, FakeFs>, Error> {
    let root = fs.open_root()?;
    Ok(SubvolumeIter::start(
        fs.clone(),
        MaybeOwnedDir::Owned(root),
        SubvolumeId::TOP_LEVEL,
        flags,
    ))
}

/// Run a whole walk, returning `(path, id)` pairs.
pub(crate) fn collect_walk(fs: &FakeFs, flags: IteratorFlags) -> Result<Vec<(String, u64)>, Error> {
    let mut iter = walk_fake(fs, flags)?;
    let mut found = Vec::new();
    while let Some((path, id)) = iter.next_entry()? {
        found.push((path.to_string_lossy().into_owned(), id.0));
    }
    iter.end();
    Ok(found)
}

/// Owned form of an expected walk, for comparing with [`collect_walk`].
pub(crate) fn expected(entries: &[(&str, u64)]) -> Vec<(String, u64)> {
    entries
        .iter()
        .map(|&(path, id)| (path.to_string(), id))
        .collect()
}
