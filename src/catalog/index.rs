//! In-memory catalog index
//!
//! Holds the four lookup structures (by id, by path, by hash, parent/child
//! links inside `DirEntry::child_id`) plus the set of paths written by network
//! imports. Not synchronized; the owning [`Catalog`](super::Catalog) keeps it
//! behind its write lock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::logging::*;
use crate::types::DataPackage;

pub struct CatalogIndex {
	root: PathBuf,
	by_id: BTreeMap<String, DataPackage>,
	by_path: HashMap<PathBuf, String>,
	by_hash: HashMap<String, String>,
	pending_network: HashSet<PathBuf>,
}

impl CatalogIndex {
	pub fn new(root: PathBuf) -> Self {
		CatalogIndex {
			root,
			by_id: BTreeMap::new(),
			by_path: HashMap::new(),
			by_hash: HashMap::new(),
			pending_network: HashSet::new(),
		}
	}

	/// Build the index from persisted entries. Ids are inserted first so that
	/// paths can be reconstructed regardless of the order entries were saved in.
	pub fn rebuild(root: PathBuf, entries: Vec<DataPackage>) -> Self {
		let mut index = CatalogIndex::new(root);

		for entry in entries {
			if let Some(hash) = entry.hash() {
				if hash.is_empty() {
					warn!("File {} has no hash, not indexed by content", entry.id());
				} else if let Some(first) = index.by_hash.get(hash) {
					warn!("Files {} and {} share hash {}, keeping {}", first, entry.id(), hash, first);
				} else {
					index.by_hash.insert(hash.to_string(), entry.id().to_string());
				}
			}
			index.by_id.insert(entry.id().to_string(), entry);
		}

		let ids: Vec<String> = index.by_id.keys().cloned().collect();
		for id in ids {
			let path = index.build_path(&id);
			index.by_path.insert(path, id);
		}

		index
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn len(&self) -> usize {
		self.by_id.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_id.is_empty()
	}

	pub fn get(&self, id: &str) -> Option<&DataPackage> {
		self.by_id.get(id)
	}

	/// All entries ordered by id (creation order for locally allocated ids)
	pub fn snapshot(&self) -> Vec<DataPackage> {
		self.by_id.values().cloned().collect()
	}

	/// Absolute path of an entry, rebuilt by walking `parent_id` links up to
	/// the root. A missing parent or a cycle ends the walk.
	pub fn build_path(&self, id: &str) -> PathBuf {
		let mut segments = Vec::new();
		let mut seen = HashSet::new();
		let mut current = id;

		while !current.is_empty() && seen.insert(current) {
			match self.by_id.get(current) {
				Some(item) => {
					segments.push(item.segment());
					current = item.parent_id();
				}
				None => break,
			}
		}

		let mut path = self.root.clone();
		for segment in segments.iter().rev() {
			path.push(segment);
		}
		path
	}

	pub fn lookup_path(&self, path: &Path) -> Option<&DataPackage> {
		self.by_path.get(path).and_then(|id| self.by_id.get(id))
	}

	/// Entry owning `hash`. A hash pointing at a vanished entry is dropped
	/// with a warning and reported as unknown.
	pub fn lookup_hash(&mut self, hash: &str) -> Option<DataPackage> {
		let id = self.by_hash.get(hash)?.clone();
		match self.by_id.get(&id) {
			Some(entry) => Some(entry.clone()),
			None => {
				warn!("Hash {} references missing entry {}, dropping stale mapping", hash, id);
				self.by_hash.remove(hash);
				None
			}
		}
	}

	/// Id of the directory containing `path`; empty for root-level items or
	/// when the containing directory is not indexed yet
	pub fn resolve_parent(&self, path: &Path) -> String {
		let parent = match path.parent() {
			Some(p) => p,
			None => return String::new(),
		};
		if parent == self.root {
			return String::new();
		}

		match self.by_path.get(parent) {
			Some(id) if self.by_id.get(id).map(|p| p.is_dir()).unwrap_or(false) => id.clone(),
			_ => {
				warn!("Parent directory not indexed for {}", path.display());
				String::new()
			}
		}
	}

	/// Record an extra path under which an existing entry is known
	pub fn add_alias(&mut self, path: PathBuf, id: &str) {
		self.by_path.insert(path, id.to_string());
	}

	/// Insert a freshly allocated entry at `path`
	pub fn insert_new(&mut self, package: DataPackage, path: PathBuf) {
		let id = package.id().to_string();

		if !package.parent_id().is_empty() {
			self.link_into_parent(package.parent_id(), &id);
		}
		if let Some(hash) = package.hash() {
			self.by_hash.insert(hash.to_string(), id.clone());
		}
		self.by_path.insert(path, id.clone());
		self.by_id.insert(id, package);
	}

	/// Insert or replace an entry received from a peer.
	///
	/// The stored copy is marked downloaded/synchronized. An existing entry
	/// keeps its origin and, for directories, the union of both child lists.
	/// Returns the stored entry, whether it is new, and its path.
	pub fn upsert_synced(&mut self, mut incoming: DataPackage) -> (DataPackage, bool, PathBuf) {
		let id = incoming.id().to_string();
		incoming.mark_synchronized();

		let is_new = match self.by_id.get(&id).cloned() {
			Some(existing) => {
				incoming.set_origin(existing.origin());

				if let (Some(old), Some(new)) = (existing.as_dir(), incoming.as_dir_mut()) {
					let mut merged = old.child_id.clone();
					for child in &new.child_id {
						if !merged.contains(child) {
							merged.push(child.clone());
						}
					}
					new.child_id = merged;
				}

				let old_parent = existing.parent_id().to_string();
				if old_parent != incoming.parent_id() && !old_parent.is_empty() {
					self.unlink_from_parent(&old_parent, &id);
				}
				if let Some(old_hash) = existing.hash().map(str::to_string) {
					if Some(old_hash.as_str()) != incoming.hash()
						&& self.by_hash.get(&old_hash) == Some(&id)
					{
						self.by_hash.remove(&old_hash);
					}
				}
				false
			}
			None => {
				incoming.set_origin(crate::types::Origin::Network);
				true
			}
		};

		if !incoming.parent_id().is_empty() {
			let parent = incoming.parent_id().to_string();
			self.link_into_parent(&parent, &id);
		}

		// Children may have been synced before their directory
		let orphans: Vec<String> = match incoming.as_dir_mut() {
			Some(dir) => {
				let found: Vec<String> = self
					.by_id
					.values()
					.filter(|e| e.parent_id() == id && e.id() != id)
					.map(|e| e.id().to_string())
					.collect();
				for child in &found {
					dir.link_child(child);
				}
				found
			}
			None => Vec::new(),
		};
		let moved: Vec<(String, PathBuf)> =
			self.subtree(&orphans).into_iter().map(|m| (m.clone(), self.build_path(&m))).collect();

		if let Some(hash) = incoming.hash() {
			match self.by_hash.get(hash) {
				Some(other) if *other != id => {
					warn!("Synced file {} duplicates content of {}, hash stays with {}", id, other, other)
				}
				Some(_) => {}
				None => {
					self.by_hash.insert(hash.to_string(), id.clone());
				}
			}
		}

		self.by_id.insert(id.clone(), incoming.clone());
		let path = self.build_path(&id);
		self.by_path.insert(path.clone(), id);

		for (moved_id, old_path) in moved {
			let new_path = self.build_path(&moved_id);
			if new_path != old_path {
				if self.by_path.get(&old_path) == Some(&moved_id) {
					self.by_path.remove(&old_path);
				}
				self.by_path.insert(new_path, moved_id);
			}
		}

		(incoming, is_new, path)
	}

	/// `roots` and every entry below them, following `child_id` links
	fn subtree(&self, roots: &[String]) -> Vec<String> {
		let mut seen: HashSet<String> = HashSet::new();
		let mut queue: Vec<String> = roots.to_vec();
		while let Some(id) = queue.pop() {
			if !seen.insert(id.clone()) {
				continue;
			}
			if let Some(dir) = self.by_id.get(&id).and_then(|e| e.as_dir()) {
				queue.extend(dir.child_id.iter().cloned());
			}
		}
		seen.into_iter().collect()
	}

	pub fn mark_pending(&mut self, path: PathBuf) {
		self.pending_network.insert(path);
	}

	/// Consume a pending network path; true if it was pending
	pub fn take_pending(&mut self, path: &Path) -> bool {
		self.pending_network.remove(path)
	}

	pub fn is_pending(&self, path: &Path) -> bool {
		self.pending_network.contains(path)
	}

	/// Describe every broken parent/child link
	pub fn link_violations(&self) -> Vec<String> {
		let mut problems = Vec::new();

		for entry in self.by_id.values() {
			let parent_id = entry.parent_id();
			if parent_id.is_empty() {
				continue;
			}
			match self.by_id.get(parent_id).and_then(|p| p.as_dir()) {
				None => problems.push(format!("{}: parent {} is not an indexed directory", entry.id(), parent_id)),
				Some(dir) if !dir.child_id.iter().any(|c| c == entry.id()) => {
					problems.push(format!("{}: missing from childId of {}", entry.id(), parent_id))
				}
				Some(_) => {}
			}
		}

		for entry in self.by_id.values() {
			if let Some(dir) = entry.as_dir() {
				for child in &dir.child_id {
					match self.by_id.get(child) {
						Some(c) if c.parent_id() == dir.id => {}
						Some(_) => problems.push(format!("{}: child {} points elsewhere", dir.id, child)),
						// Children announced by a peer may arrive after their parent
						None => {}
					}
				}
			}
		}

		problems
	}

	fn link_into_parent(&mut self, parent_id: &str, child_id: &str) {
		match self.by_id.get_mut(parent_id).and_then(|p| p.as_dir_mut()) {
			Some(dir) => {
				dir.link_child(child_id);
			}
			None => warn!("Cannot link {} into {}: not an indexed directory", child_id, parent_id),
		}
	}

	fn unlink_from_parent(&mut self, parent_id: &str, child_id: &str) {
		if let Some(dir) = self.by_id.get_mut(parent_id).and_then(|p| p.as_dir_mut()) {
			dir.child_id.retain(|c| c != child_id);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{DirEntry, FileEntry, Origin};

	fn dir(id: &str, parent: &str, name: &str) -> DataPackage {
		DataPackage::Dir(DirEntry::new(id.into(), parent.into(), name.into(), Origin::Local))
	}

	fn file(id: &str, parent: &str, name: &str, hash: &str) -> DataPackage {
		DataPackage::File(FileEntry::new(
			id.into(),
			parent.into(),
			name.into(),
			".txt".into(),
			hash.into(),
			1,
			Origin::Local,
		))
	}

	#[test]
	fn test_rebuild_reconstructs_paths_in_any_order() {
		let mut parent = dir("a", "", "docs");
		parent.as_dir_mut().unwrap().child_id.push("b".into());
		let entries = vec![file("b", "a", "note", "h1"), parent];

		let index = CatalogIndex::rebuild(PathBuf::from("/root"), entries);
		assert_eq!(index.build_path("b"), PathBuf::from("/root/docs/note.txt"));
		assert_eq!(index.lookup_path(Path::new("/root/docs/note.txt")).unwrap().id(), "b");
		assert!(index.link_violations().is_empty());
	}

	#[test]
	fn test_build_path_survives_cycles() {
		let entries = vec![dir("a", "b", "x"), dir("b", "a", "y")];
		let index = CatalogIndex::rebuild(PathBuf::from("/r"), entries);
		assert_eq!(index.build_path("a"), PathBuf::from("/r/y/x"));
	}

	#[test]
	fn test_stale_hash_mapping_is_dropped() {
		let mut index = CatalogIndex::new(PathBuf::from("/r"));
		index.by_hash.insert("h".into(), "ghost".into());
		assert!(index.lookup_hash("h").is_none());
		assert!(index.by_hash.is_empty());
	}

	#[test]
	fn test_upsert_keeps_origin_and_merges_children() {
		let mut index = CatalogIndex::new(PathBuf::from("/r"));
		let mut local = dir("d", "", "docs");
		local.as_dir_mut().unwrap().child_id.push("x".into());
		index.insert_new(local, PathBuf::from("/r/docs"));

		let mut remote = dir("d", "", "docs");
		remote.as_dir_mut().unwrap().child_id.push("y".into());
		let (stored, is_new, _) = index.upsert_synced(remote);

		assert!(!is_new);
		assert_eq!(stored.origin(), Origin::Local);
		assert_eq!(stored.as_dir().unwrap().child_id, vec!["x".to_string(), "y".to_string()]);
	}

	#[test]
	fn test_directory_synced_after_its_children_adopts_them() {
		let mut index = CatalogIndex::new(PathBuf::from("/r"));
		index.upsert_synced(file("f", "d", "note", "h"));
		assert_eq!(index.lookup_path(Path::new("/r/note.txt")).unwrap().id(), "f");

		let (stored, _, _) = index.upsert_synced(dir("d", "", "docs"));

		assert_eq!(stored.as_dir().unwrap().child_id, vec!["f".to_string()]);
		assert!(index.link_violations().is_empty());
		assert_eq!(index.lookup_path(Path::new("/r/docs/note.txt")).unwrap().id(), "f");
		assert!(index.lookup_path(Path::new("/r/note.txt")).is_none());
	}

	#[test]
	fn test_violation_reported_for_unlinked_child() {
		let entries = vec![dir("a", "", "docs"), file("b", "a", "note", "h")];
		let index = CatalogIndex::rebuild(PathBuf::from("/r"), entries);
		assert_eq!(index.link_violations().len(), 1);
	}
}

// vim: ts=4
