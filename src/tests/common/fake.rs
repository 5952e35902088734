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

//! In-memory btrfs lookalike for exercising [`SubvolumeIter`] without a real
//! btrfs mount.
//!
//! The model is a single directory tree in which some directories are the
//! root directories of subvolumes. Each subvolume records its parent and the
//! inode number of the directory holding its mount point, just like the
//! kernel's root backrefs, and the backend operations follow the kernel's
//! permission and lookup rules closely enough for the walk to notice the
//! difference.
//!
//! [`SubvolumeIter`]: crate::SubvolumeIter

use crate::{
    backend::{LookupUser, PageStatus, RootRef, SubvolumeBackend},
    btrfs::{SubvolumeId, BTRFS_FIRST_FREE_OBJECTID},
    error::{Error as SubvolError, ErrorImpl},
};

use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    ffi::{CStr, OsStr},
    io::Error as IOError,
    os::unix::ffi::OsStrExt,
    path::PathBuf,
    rc::Rc,
};

use anyhow::{bail, Context, Error};

#[derive(Debug)]
struct Node {
    name: Vec<u8>,
    parent: Option<usize>,
    children: BTreeMap<Vec<u8>, usize>,
    /// The subvolume this directory belongs to.
    subvol: u64,
    ino: u64,
    searchable: bool,
    vanished: bool,
    fail_open: Option<i32>,
}

#[derive(Debug)]
struct Subvol {
    /// Root directory node.
    root: usize,
    parent: Option<u64>,
    /// Inode (in the parent subvolume) of the directory holding the mount
    /// point.
    dirid: u64,
    next_ino: u64,
    rootref_error: Option<i32>,
}

#[derive(Debug)]
struct FakeTree {
    nodes: Vec<Node>,
    subvols: BTreeMap<u64, Subvol>,
    page_capacity: usize,
    open_limit: Option<usize>,
    rootref_calls: usize,
    parent_opens: usize,
}

impl FakeTree {
    fn lookup(&self, path: &str) -> Option<usize> {
        components(path).try_fold(0, |node, name| {
            self.nodes[node].children.get(name.as_bytes()).copied()
        })
    }

    fn mkdir_all(&mut self, path: &str) -> Result<usize, Error> {
        let mut node = 0;
        for name in components(path) {
            node = match self.nodes[node].children.get(name.as_bytes()) {
                Some(&child) => child,
                None => {
                    let subvol = self.nodes[node].subvol;
                    let info = self
                        .subvols
                        .get_mut(&subvol)
                        .with_context(|| format!("subvolume {subvol} of {name:?} is missing"))?;
                    let ino = info.next_ino;
                    info.next_ino += 1;
                    self.add_node(node, name, subvol, ino)
                }
            };
        }
        Ok(node)
    }

    fn add_node(&mut self, parent: usize, name: &str, subvol: u64, ino: u64) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            name: name.as_bytes().to_vec(),
            parent: Some(parent),
            children: BTreeMap::new(),
            subvol,
            ino,
            searchable: true,
            vanished: false,
            fail_open: None,
        });
        self.nodes[parent]
            .children
            .insert(name.as_bytes().to_vec(), idx);
        idx
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut Node, Error> {
        let idx = self
            .lookup(path)
            .with_context(|| format!("no such fake directory {path:?}"))?;
        Ok(&mut self.nodes[idx])
    }

    fn new_handle(&self, node: usize, handles: &Rc<Cell<usize>>) -> Result<FakeDir, SubvolError> {
        if let Some(limit) = self.open_limit {
            if handles.get() >= limit {
                return Err(os_error("open", libc::EMFILE));
            }
        }
        handles.set(handles.get() + 1);
        Ok(FakeDir {
            node,
            handles: Rc::clone(handles),
        })
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|name| !name.is_empty())
}

fn os_error(operation: &'static str, errno: i32) -> SubvolError {
    ErrorImpl::OsError {
        operation: operation.into(),
        source: IOError::from_raw_os_error(errno),
    }
    .into()
}

/// Handle to a directory in a [`FakeFs`]. Counts as an open file until it is
/// dropped.
#[derive(Debug)]
pub(crate) struct FakeDir {
    node: usize,
    handles: Rc<Cell<usize>>,
}

impl Drop for FakeDir {
    fn drop(&mut self) {
        self.handles.set(self.handles.get() - 1);
    }
}

/// Shared handle to a fake filesystem. Clones refer to the same tree, so a
/// test can keep one to modify the tree while an iterator walks it.
#[derive(Clone, Debug)]
pub(crate) struct FakeFs {
    tree: Rc<RefCell<FakeTree>>,
    handles: Rc<Cell<usize>>,
}

impl FakeFs {
    /// An empty filesystem whose root directory is the top-level subvolume.
    pub(crate) fn new() -> Self {
        let top = SubvolumeId::TOP_LEVEL.0;
        let root = Node {
            name: Vec::new(),
            parent: None,
            children: BTreeMap::new(),
            subvol: top,
            ino: BTRFS_FIRST_FREE_OBJECTID,
            searchable: true,
            vanished: false,
            fail_open: None,
        };
        let subvols = BTreeMap::from([(
            top,
            Subvol {
                root: 0,
                parent: None,
                dirid: 0,
                next_ino: BTRFS_FIRST_FREE_OBJECTID + 1,
                rootref_error: None,
            },
        )]);
        Self {
            tree: Rc::new(RefCell::new(FakeTree {
                nodes: vec![root],
                subvols,
                page_capacity: crate::btrfs::BTRFS_MAX_ROOTREF_BUFFER_NUM,
                open_limit: None,
                rootref_calls: 0,
                parent_opens: 0,
            })),
            handles: Rc::new(Cell::new(0)),
        }
    }

    /// Create a plain directory, and any missing parents.
    pub(crate) fn mkdir(&self, path: &str) -> Result<(), Error> {
        self.tree.borrow_mut().mkdir_all(path).map(|_| ())
    }

    /// Create subvolume `id` with its mount point at `path`. Missing parents
    /// are created as plain directories.
    pub(crate) fn create_subvolume(&self, path: &str, id: u64) -> Result<(), Error> {
        let (parent_path, name) = match path.trim_end_matches('/').rsplit_once('/') {
            Some((parent, name)) => (parent, name),
            None => ("", path.trim_end_matches('/')),
        };
        if name.is_empty() {
            bail!("cannot create subvolume at {path:?}");
        }

        let mut tree = self.tree.borrow_mut();
        if tree.subvols.contains_key(&id) {
            bail!("subvolume {id} already exists");
        }
        let parent = tree.mkdir_all(parent_path)?;
        if tree.nodes[parent].children.contains_key(name.as_bytes()) {
            bail!("{path:?} already exists");
        }

        let (parent_subvol, dirid) = (tree.nodes[parent].subvol, tree.nodes[parent].ino);
        let root = tree.add_node(parent, name, id, BTRFS_FIRST_FREE_OBJECTID);
        tree.subvols.insert(
            id,
            Subvol {
                root,
                parent: Some(parent_subvol),
                dirid,
                next_ino: BTRFS_FIRST_FREE_OBJECTID + 1,
                rootref_error: None,
            },
        );
        Ok(())
    }

    /// Toggle search (and read) permission on a directory.
    pub(crate) fn set_searchable(&self, path: &str, searchable: bool) -> Result<(), Error> {
        self.tree.borrow_mut().node_mut(path)?.searchable = searchable;
        Ok(())
    }

    /// Make a directory disappear, as if it was renamed away or unmounted.
    pub(crate) fn vanish(&self, path: &str) -> Result<(), Error> {
        self.tree.borrow_mut().node_mut(path)?.vanished = true;
        Ok(())
    }

    /// Make opening the directory at `path` fail with `errno`.
    pub(crate) fn fail_open(&self, path: &str, errno: i32) -> Result<(), Error> {
        self.tree.borrow_mut().node_mut(path)?.fail_open = Some(errno);
        Ok(())
    }

    /// Make listing the children of subvolume `id` fail with `errno`.
    pub(crate) fn fail_rootrefs(&self, id: u64, errno: i32) -> Result<(), Error> {
        let mut tree = self.tree.borrow_mut();
        let subvol = tree
            .subvols
            .get_mut(&id)
            .with_context(|| format!("no such subvolume {id}"))?;
        subvol.rootref_error = Some(errno);
        Ok(())
    }

    /// Maximum number of children returned per rootref page.
    pub(crate) fn set_page_capacity(&self, capacity: usize) {
        self.tree.borrow_mut().page_capacity = capacity;
    }

    /// Maximum number of simultaneously open handles before `EMFILE`.
    pub(crate) fn set_open_limit(&self, limit: Option<usize>) {
        self.tree.borrow_mut().open_limit = limit;
    }

    /// Open the root directory of the filesystem.
    pub(crate) fn open_root(&self) -> Result<FakeDir, Error> {
        Ok(self.tree.borrow().new_handle(0, &self.handles)?)
    }

    /// Number of [`FakeDir`]s currently alive.
    pub(crate) fn open_handles(&self) -> usize {
        self.handles.get()
    }

    pub(crate) fn rootref_calls(&self) -> usize {
        self.tree.borrow().rootref_calls
    }

    pub(crate) fn parent_opens(&self) -> usize {
        self.tree.borrow().parent_opens
    }
}

impl SubvolumeBackend for FakeFs {
    type Dir = FakeDir;

    fn rootrefs(
        &self,
        dir: &FakeDir,
        min_id: SubvolumeId,
        out: &mut Vec<RootRef>,
    ) -> Result<PageStatus, SubvolError> {
        let mut tree = self.tree.borrow_mut();
        tree.rootref_calls += 1;

        let subvol = tree.nodes[dir.node].subvol;
        let rootref_error = tree
            .subvols
            .get(&subvol)
            .and_then(|info| info.rootref_error);
        if let Some(errno) = rootref_error {
            return Err(os_error("list subvolume children", errno));
        }

        let capacity = tree.page_capacity;
        let mut children = tree
            .subvols
            .range(min_id.0..)
            .filter(|(_, info)| info.parent == Some(subvol))
            .map(|(&id, info)| RootRef {
                id: SubvolumeId(id),
                dirid: info.dirid,
            });
        out.extend(children.by_ref().take(capacity));
        Ok(if children.next().is_some() {
            PageStatus::Truncated
        } else {
            PageStatus::Complete
        })
    }

    fn lookup_user(&self, dir: &FakeDir, rootref: RootRef) -> Result<LookupUser, SubvolError> {
        let tree = self.tree.borrow();
        let subvol = tree.nodes[dir.node].subvol;
        if tree.subvols.get(&subvol).map(|info| info.root) != Some(dir.node) {
            // The walk only ever looks up children through subvolume roots.
            return Err(os_error("lookup subvolume", libc::EINVAL));
        }

        let child = match tree.subvols.get(&rootref.id.0) {
            Some(child) if child.parent == Some(subvol) => child,
            _ => return Err(os_error("lookup subvolume", libc::ENOENT)),
        };
        let mount_point = &tree.nodes[child.root];
        if mount_point.vanished {
            return Err(os_error("lookup subvolume", libc::ENOENT));
        }

        let mut names = Vec::new();
        let mut cur = mount_point.parent;
        loop {
            let idx = cur.ok_or_else(|| os_error("lookup subvolume", libc::EACCES))?;
            if idx == dir.node {
                break;
            }
            let node = &tree.nodes[idx];
            if node.vanished {
                return Err(os_error("lookup subvolume", libc::ENOENT));
            }
            if !node.searchable {
                return Err(os_error("lookup subvolume", libc::EACCES));
            }
            names.push(node.name.as_slice());
            cur = node.parent;
        }

        let mut subpath = Vec::new();
        for name in names.into_iter().rev() {
            subpath.extend_from_slice(name);
            subpath.push(b'/');
        }
        Ok(LookupUser {
            name: OsStr::from_bytes(&mount_point.name).to_os_string(),
            subpath: PathBuf::from(OsStr::from_bytes(&subpath)),
        })
    }

    fn open_subdir(&self, dir: &FakeDir, path: &CStr) -> Result<FakeDir, SubvolError> {
        let tree = self.tree.borrow();
        let mut cur = dir.node;
        let names = path.to_bytes().split(|&b| b == b'/');
        for name in names.filter(|n| !n.is_empty()) {
            let node = &tree.nodes[cur];
            if !node.searchable {
                return Err(os_error("open subvolume", libc::EACCES));
            }
            cur = match node.children.get(name) {
                Some(&child) if !tree.nodes[child].vanished => child,
                _ => return Err(os_error("open subvolume", libc::ENOENT)),
            };
        }

        let node = &tree.nodes[cur];
        if let Some(errno) = node.fail_open {
            return Err(os_error("open subvolume", errno));
        }
        if !node.searchable {
            return Err(os_error("open subvolume", libc::EACCES));
        }
        tree.new_handle(cur, &self.handles)
    }

    fn open_parent(&self, dir: &FakeDir) -> Result<FakeDir, SubvolError> {
        let mut tree = self.tree.borrow_mut();
        tree.parent_opens += 1;
        let parent = tree.nodes[dir.node].parent.unwrap_or(dir.node);
        tree.new_handle(parent, &self.handles)
    }
}

#[test]
fn fake_lookup_user_paths() -> Result<(), Error> {
    let fs = FakeFs::new();
    fs.create_subvolume("a", 256)?;
    fs.create_subvolume("x/y/b", 257)?;
    let root = fs.open_root()?;

    let found = fs.lookup_user(
        &root,
        RootRef {
            id: SubvolumeId(257),
            dirid: 258,
        },
    )?;
    assert_eq!(found.name, "b");
    assert_eq!(found.subpath, PathBuf::from("x/y/"));

    let found = fs.lookup_user(
        &root,
        RootRef {
            id: SubvolumeId(256),
            dirid: 256,
        },
    )?;
    assert_eq!(found.name, "a");
    assert_eq!(found.subpath, PathBuf::from(""));
    Ok(())
}
