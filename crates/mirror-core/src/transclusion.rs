use std::collections::{BTreeSet, HashMap, HashSet};

use wiki_links::{parse_embeds, WikiLink};

use crate::fs::{parent_folder, walk_files, FileSystem, Result};
use crate::pairing::{extension, MIRROR_EXTENSION};

/// Tracks which documents embed which files.
///
/// The index keeps both directions so a document can be re-scanned
/// incrementally:
/// - Embedders: embedded file -> documents that embed it
/// - Embeds: document -> files it embeds
///
/// Keys are full vault paths, so the index survives two files sharing a name.
#[derive(Debug, Default)]
pub struct TransclusionIndex {
    embedders: HashMap<String, HashSet<String>>,
    embeds: HashMap<String, HashSet<String>>,
    /// Embeds whose target did not exist yet, retried when files appear
    unresolved: HashMap<String, Vec<WikiLink>>,
    resolver: LinkResolver,
}

impl TransclusionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index by scanning the vault.
    ///
    /// Every file is registered for link resolution; every markdown document
    /// outside `excluded_folder` is parsed for embeds.
    pub async fn initialize<F: FileSystem + ?Sized>(
        &mut self,
        fs: &F,
        excluded_folder: Option<&str>,
    ) -> Result<()> {
        tracing::info!("Scanning vault for embeds...");
        *self = Self::default();

        let files = walk_files(fs).await?;
        for path in &files {
            self.resolver.insert(path);
        }

        let excluded_prefix = excluded_folder.map(|folder| format!("{}/", folder));
        let documents: Vec<&String> = files
            .iter()
            .filter(|path| is_document(path))
            .filter(|path| {
                excluded_prefix
                    .as_deref()
                    .map_or(true, |prefix| !path.starts_with(prefix))
            })
            .collect();
        tracing::info!("Found {} files, {} documents", files.len(), documents.len());

        for path in documents {
            match fs.read(path).await {
                Ok(bytes) => self.index_document(path, &String::from_utf8_lossy(&bytes)),
                Err(e) => tracing::warn!("Failed to index {}: {}", path, e),
            }
        }

        tracing::info!(
            "Indexed {} embedded files with {} total embeds",
            self.len(),
            self.total_embeds()
        );
        Ok(())
    }

    /// Replace the embeds recorded for `document` with those found in
    /// `content`.
    pub fn index_document(&mut self, document: &str, content: &str) {
        self.track_file(document);
        self.drop_outgoing(document);

        let mut pending = Vec::new();
        for link in parse_embeds(content) {
            match self.resolver.resolve(&link, document) {
                Some(target) => self.link(document, target),
                None => pending.push(link),
            }
        }
        if !pending.is_empty() {
            self.unresolved.insert(document.to_string(), pending);
        }
    }

    /// Register a file that now exists, resolving embeds that were waiting
    /// for it.
    pub fn track_file(&mut self, path: &str) {
        if self.resolver.insert(path) {
            self.retry_unresolved();
        }
    }

    /// Remove a deleted file: its outgoing embeds, its resolver entry, and
    /// every membership pointing at it.
    ///
    /// Documents that embedded the file keep waiting for it, so the embed is
    /// indexed again if a file appears at the same path.
    pub fn forget_file(&mut self, path: &str) {
        self.resolver.remove(path);
        self.drop_outgoing(path);

        if let Some(documents) = self.embedders.remove(path) {
            for document in documents {
                if let Some(targets) = self.embeds.get_mut(&document) {
                    targets.remove(path);
                    if targets.is_empty() {
                        self.embeds.remove(&document);
                    }
                }
                self.unresolved
                    .entry(document)
                    .or_default()
                    .push(WikiLink::embed(path));
            }
        }
    }

    /// Move every record of `old_path` to `new_path`.
    ///
    /// Applying the same rename twice leaves the index unchanged.
    pub fn update_transclusion(&mut self, old_path: &str, new_path: &str) {
        if old_path == new_path {
            return;
        }

        // Rekey the record of the renamed file itself
        if let Some(documents) = self.embedders.remove(old_path) {
            self.embedders
                .entry(new_path.to_string())
                .or_default()
                .extend(documents);
        }
        // Rewrite memberships of the renamed file as an embedding document
        for documents in self.embedders.values_mut() {
            if documents.remove(old_path) {
                documents.insert(new_path.to_string());
            }
        }

        if let Some(targets) = self.embeds.remove(old_path) {
            self.embeds
                .entry(new_path.to_string())
                .or_default()
                .extend(targets);
        }
        for targets in self.embeds.values_mut() {
            if targets.remove(old_path) {
                targets.insert(new_path.to_string());
            }
        }

        if let Some(links) = self.unresolved.remove(old_path) {
            self.unresolved.insert(new_path.to_string(), links);
        }

        self.resolver.remove(old_path);
        if self.resolver.insert(new_path) {
            self.retry_unresolved();
        }
    }

    /// Documents embedding `path`.
    pub fn lookup(&self, path: &str) -> HashSet<String> {
        self.embedders.get(path).cloned().unwrap_or_default()
    }

    /// Files embedded by `document`.
    pub fn embeds_of(&self, document: &str) -> HashSet<String> {
        self.embeds.get(document).cloned().unwrap_or_default()
    }

    /// Number of files embedded by at least one document.
    pub fn len(&self) -> usize {
        self.embedders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embedders.is_empty()
    }

    fn total_embeds(&self) -> usize {
        self.embeds.values().map(|targets| targets.len()).sum()
    }

    fn link(&mut self, document: &str, target: String) {
        self.embedders
            .entry(target.clone())
            .or_default()
            .insert(document.to_string());
        self.embeds
            .entry(document.to_string())
            .or_default()
            .insert(target);
    }

    fn drop_outgoing(&mut self, document: &str) {
        self.unresolved.remove(document);
        let Some(targets) = self.embeds.remove(document) else {
            return;
        };
        for target in targets {
            if let Some(documents) = self.embedders.get_mut(&target) {
                documents.remove(document);
                if documents.is_empty() {
                    self.embedders.remove(&target);
                }
            }
        }
    }

    fn retry_unresolved(&mut self) {
        let waiting = std::mem::take(&mut self.unresolved);
        for (document, links) in waiting {
            let mut still_pending = Vec::new();
            for link in links {
                match self.resolver.resolve(&link, &document) {
                    Some(target) => self.link(&document, target),
                    None => still_pending.push(link),
                }
            }
            if !still_pending.is_empty() {
                self.unresolved.insert(document, still_pending);
            }
        }
    }
}

fn is_document(path: &str) -> bool {
    extension(path) == Some(MIRROR_EXTENSION)
}

/// Resolves link text to vault paths the way Obsidian picks a link target.
#[derive(Debug, Default)]
struct LinkResolver {
    paths: HashSet<String>,
    /// File name -> every path with that name
    by_name: HashMap<String, BTreeSet<String>>,
}

impl LinkResolver {
    /// Returns true if the path was not known before.
    fn insert(&mut self, path: &str) -> bool {
        if !self.paths.insert(path.to_string()) {
            return false;
        }
        self.by_name
            .entry(file_name(path).to_string())
            .or_default()
            .insert(path.to_string());
        true
    }

    fn remove(&mut self, path: &str) {
        if !self.paths.remove(path) {
            return;
        }
        let name = file_name(path);
        if let Some(paths) = self.by_name.get_mut(name) {
            paths.remove(path);
            if paths.is_empty() {
                self.by_name.remove(name);
            }
        }
    }

    /// Exact vault path, then relative to the source's folder, then by file
    /// name preferring the source's folder and then the shortest path.
    fn resolve(&self, link: &WikiLink, source: &str) -> Option<String> {
        let target = link.target.trim_start_matches('/');
        let target = if link.extension().is_some() {
            target.to_string()
        } else {
            format!("{}.{}", target, MIRROR_EXTENSION)
        };

        if self.paths.contains(&target) {
            return Some(target);
        }

        let source_folder = parent_folder(source);
        if let Some(relative) = join(source_folder, &target) {
            if self.paths.contains(&relative) {
                return Some(relative);
            }
        }

        let suffix = format!("/{}", target);
        let candidates = self.by_name.get(file_name(&target))?;
        candidates
            .iter()
            .filter(|path| **path == target || path.ends_with(&suffix))
            .min_by_key(|path| (parent_folder(path) != source_folder, path.len()))
            .cloned()
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Join a relative link onto a folder, resolving `.` and `..`.
fn join(folder: &str, relative: &str) -> Option<String> {
    let mut segments: Vec<&str> = folder.split('/').filter(|s| !s.is_empty()).collect();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            name => segments.push(name),
        }
    }
    Some(segments.join("/"))
}
