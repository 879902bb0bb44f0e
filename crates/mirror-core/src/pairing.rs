//! Path pairing between drawings and their mirrors.
//!
//! A primary `a/b.excalidraw` pairs with the mirror `<folder>/a/b.md`. The
//! translation is a pure function of the mirror folder, so the pairing never
//! needs a lookup table:
//!
//! ```
//! use mirror_core::pairing::{FileClass, PathPairing};
//!
//! let pairing = PathPairing::new("_sync").unwrap();
//! assert_eq!(
//!     pairing.classify("Excalidraw/Drawing 1.excalidraw"),
//!     FileClass::Primary { mirror: "_sync/Excalidraw/Drawing 1.md".into() }
//! );
//! ```

/// Extension of the canonical drawing file.
pub const PRIMARY_EXTENSION: &str = "excalidraw";
/// Extension of the mirror file.
pub const MIRROR_EXTENSION: &str = "md";
/// Extensions of rendered exports saved next to a drawing.
pub const EXPORT_EXTENSIONS: &[&str] = &["svg", "png"];
/// Theme suffixes an export may carry (`name.dark.svg`).
const EXPORT_THEMES: &[&str] = &["", ".dark", ".light"];

/// Which namespace a path belongs to, with its counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileClass {
    /// A drawing outside the mirror folder.
    Primary { mirror: String },
    /// A mirror inside the mirror folder.
    Mirror { primary: String },
    /// Anything else, including paths that break the pairing shape.
    Unrelated,
}

/// Normalize a vault path the way Obsidian does: forward slashes, no
/// duplicate or surrounding slashes, non-breaking spaces as plain spaces.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .replace(['\u{00A0}', '\u{202F}'], " ")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Extension of the last path segment, without the dot.
///
/// Dotfiles (`.gitignore`) have no extension.
pub fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit_once('/').map_or(path, |(_, name)| name);
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => Some(&name[pos + 1..]),
        _ => None,
    }
}

/// Strip `.ext` from `path`, requiring a non-empty file stem.
fn strip_extension<'a>(path: &'a str, ext: &str) -> Option<&'a str> {
    let stem = path.strip_suffix(ext)?.strip_suffix('.')?;
    let name = stem.rsplit_once('/').map_or(stem, |(_, name)| name);
    (!name.is_empty()).then_some(stem)
}

/// True if `path` is a drawing by extension alone.
pub fn is_drawing(path: &str) -> bool {
    extension(path) == Some(PRIMARY_EXTENSION)
}

/// Existing-or-not export siblings of a drawing: same folder, same stem.
pub fn export_siblings(primary: &str) -> Vec<String> {
    let Some(stem) = strip_extension(primary, PRIMARY_EXTENSION) else {
        return Vec::new();
    };
    EXPORT_THEMES
        .iter()
        .flat_map(|theme| {
            EXPORT_EXTENSIONS
                .iter()
                .map(move |ext| format!("{}{}.{}", stem, theme, ext))
        })
        .collect()
}

/// The pairing function for one mirror folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPairing {
    mirror_folder: String,
    prefix: String,
}

impl PathPairing {
    /// Pairing for `mirror_folder`. Returns None if the folder normalizes to
    /// the vault root, where the two namespaces would overlap.
    pub fn new(mirror_folder: &str) -> Option<Self> {
        let mirror_folder = normalize_path(mirror_folder);
        if mirror_folder.is_empty() {
            return None;
        }
        let prefix = format!("{}/", mirror_folder);
        Some(Self {
            mirror_folder,
            prefix,
        })
    }

    pub fn mirror_folder(&self) -> &str {
        &self.mirror_folder
    }

    /// True if `path` lies under the mirror folder.
    pub fn is_in_mirror_folder(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    /// `a/b.excalidraw` -> `<folder>/a/b.md`
    pub fn to_mirror_path(&self, primary: &str) -> Option<String> {
        if self.is_in_mirror_folder(primary) {
            return None;
        }
        let stem = strip_extension(primary, PRIMARY_EXTENSION)?;
        Some(format!("{}{}.{}", self.prefix, stem, MIRROR_EXTENSION))
    }

    /// `<folder>/a/b.md` -> `a/b.excalidraw`
    pub fn to_primary_path(&self, mirror: &str) -> Option<String> {
        let relative = mirror.strip_prefix(&self.prefix)?;
        let stem = strip_extension(relative, MIRROR_EXTENSION)?;
        let primary = format!("{}.{}", stem, PRIMARY_EXTENSION);
        // A mirror of a mirror-folder path would not round-trip
        (!self.is_in_mirror_folder(&primary)).then_some(primary)
    }

    /// Classify a path once per event.
    pub fn classify(&self, path: &str) -> FileClass {
        match extension(path) {
            Some(PRIMARY_EXTENSION) => match self.to_mirror_path(path) {
                Some(mirror) => FileClass::Primary { mirror },
                None => FileClass::Unrelated,
            },
            Some(MIRROR_EXTENSION) => match self.to_primary_path(path) {
                Some(primary) => FileClass::Mirror { primary },
                None => FileClass::Unrelated,
            },
            _ => FileClass::Unrelated,
        }
    }
}
