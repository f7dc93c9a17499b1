//! Configuration-backed folder directory.
//!
//! The daemon's real folder groups run the sync protocol; here a group only
//! owns the links attached to it, which is what the broker hands over.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use synclink_core::FolderId;
use tracing::debug;
use uuid::Uuid;

use crate::application::{FolderDirectory, FolderGroup, PeerLink};

/// Owns the peer links of one folder.
pub struct LocalFolderGroup {
    folder_id: FolderId,
    links: Mutex<Vec<Box<dyn PeerLink>>>,
}

impl LocalFolderGroup {
    pub fn new(folder_id: FolderId) -> Self {
        Self {
            folder_id,
            links: Mutex::new(Vec::new()),
        }
    }

    /// Number of links still open.
    pub fn link_count(&self) -> usize {
        self.open_links().len()
    }

    /// Ids of the links still open.
    pub fn link_ids(&self) -> Vec<Uuid> {
        self.open_links().iter().map(|l| l.id()).collect()
    }

    /// Closes and drops the link with `id`.  Returns whether it was found.
    pub fn detach(&self, id: Uuid) -> bool {
        let mut links = self.links();
        match links.iter().position(|l| l.id() == id) {
            Some(index) => {
                let mut link = links.swap_remove(index);
                link.close();
                true
            }
            None => false,
        }
    }

    /// Closes every link.
    pub fn close_all(&self) {
        for mut link in self.links().drain(..) {
            link.close();
        }
    }

    fn links(&self) -> MutexGuard<'_, Vec<Box<dyn PeerLink>>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The link list with links whose session has ended dropped.
    fn open_links(&self) -> MutexGuard<'_, Vec<Box<dyn PeerLink>>> {
        let mut links = self.links();
        links.retain(|l| l.is_open());
        links
    }
}

impl FolderGroup for LocalFolderGroup {
    fn folder_id(&self) -> &FolderId {
        &self.folder_id
    }

    fn attach(&self, link: Box<dyn PeerLink>) {
        let mut links = self.open_links();
        debug!(folder = %self.folder_id, link = %link.id(), "peer link attached");
        links.push(link);
    }
}

/// Fixed set of folders, usually taken from the configuration.
#[derive(Default)]
pub struct StaticFolderDirectory {
    groups: HashMap<FolderId, Arc<LocalFolderGroup>>,
}

impl StaticFolderDirectory {
    /// Builds a directory hosting each id once; duplicates collapse.
    pub fn from_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = FolderId>,
    {
        let groups = ids
            .into_iter()
            .map(|id| (id.clone(), Arc::new(LocalFolderGroup::new(id))))
            .collect();
        Self { groups }
    }

    /// The concrete group for `folder_id`, for inspection.
    pub fn group(&self, folder_id: &FolderId) -> Option<Arc<LocalFolderGroup>> {
        self.groups.get(folder_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drops the link with `link_id` from whichever group holds it.
    /// Returns whether any group did.
    pub fn detach(&self, link_id: Uuid) -> bool {
        self.groups.values().any(|g| g.detach(link_id))
    }

    /// Closes every link in every group.
    pub fn close_all(&self) {
        for group in self.groups.values() {
            group.close_all();
        }
    }
}

impl FolderDirectory for StaticFolderDirectory {
    fn get_group(&self, folder_id: &FolderId) -> Option<Arc<dyn FolderGroup>> {
        self.groups
            .get(folder_id)
            .map(|g| Arc::clone(g) as Arc<dyn FolderGroup>)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
