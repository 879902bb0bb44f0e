//! Parser for Obsidian-style wiki links and drawing embeds
//!
//! Supports:
//! - Basic links: `[[Note]]`
//! - Paths: `[[folder/Drawing.excalidraw]]`
//! - Headings: `[[Note#Heading]]`
//! - Block references: `[[Note#^block-id]]`
//! - Embeds: `![[Drawing.excalidraw]]`
//! - Aliases, including embed size hints: `![[Drawing.excalidraw|400x300|style]]`
//! - Drawing code blocks: a bare `[[...]]` inside a fenced `excalidraw` block
//!   counts as an embed

use serde::{Deserialize, Serialize};

/// Language tag of a fenced code block whose link is rendered as an embed.
pub const DRAWING_CODE_BLOCK: &str = "excalidraw";

/// Fragment that narrows a link to part of the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Anchor {
    /// `#Heading`
    Heading(String),
    /// `#^block-id`
    Block(String),
}

/// A parsed wiki link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiLink {
    /// Link target as written, without the fragment: "folder/Drawing.excalidraw"
    pub target: String,
    /// Heading or block fragment, if any
    pub anchor: Option<Anchor>,
    /// Text after the first `|`
    pub alias: Option<String>,
    /// `![[...]]` or a link inside a drawing code block
    pub is_embed: bool,
}

impl WikiLink {
    /// Embed of `target` with no anchor or alias.
    pub fn embed(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            anchor: None,
            alias: None,
            is_embed: true,
        }
    }

    /// Final path segment of the target: "Drawing.excalidraw"
    pub fn file_name(&self) -> &str {
        self.target
            .rsplit_once('/')
            .map_or(self.target.as_str(), |(_, name)| name)
    }

    /// Extension of the target without the dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(pos) if pos > 0 && pos + 1 < name.len() => Some(&name[pos + 1..]),
            _ => None,
        }
    }
}

/// Parse all wiki links from markdown content.
///
/// Links inside a fenced `excalidraw` code block are reported as embeds.
pub fn parse_wiki_links(content: &str) -> Vec<WikiLink> {
    let mut links = Vec::new();
    let mut fence: Option<String> = None;

    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("```") {
            fence = match fence {
                Some(_) => None,
                None => Some(rest.trim().to_ascii_lowercase()),
            };
            continue;
        }

        let in_drawing_block = fence.as_deref() == Some(DRAWING_CODE_BLOCK);
        if fence.is_some() && !in_drawing_block {
            continue;
        }

        for mut link in parse_line(line) {
            link.is_embed |= in_drawing_block;
            links.push(link);
        }
    }

    links
}

/// Parse only the embeds in markdown content.
pub fn parse_embeds(content: &str) -> Vec<WikiLink> {
    parse_wiki_links(content)
        .into_iter()
        .filter(|link| link.is_embed)
        .collect()
}

fn parse_line(line: &str) -> Vec<WikiLink> {
    let mut links = Vec::new();
    let mut rest = line;

    while let Some(open) = rest.find("[[") {
        let is_embed = rest[..open].ends_with('!');
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("]]") else {
            break;
        };
        if let Some(link) = parse_link_content(&after_open[..close], is_embed) {
            links.push(link);
        }
        rest = &after_open[close + 2..];
    }

    links
}

/// Parse the text between `[[` and `]]`.
fn parse_link_content(content: &str, is_embed: bool) -> Option<WikiLink> {
    let (target_part, alias) = match content.split_once('|') {
        Some((target, alias)) => (target, Some(alias.trim().to_string())),
        None => (content, None),
    };

    let (path, anchor) = parse_fragment(target_part);
    let target = path.trim();
    if target.is_empty() {
        return None;
    }

    Some(WikiLink {
        target: target.to_string(),
        anchor,
        alias: alias.filter(|a| !a.is_empty()),
        is_embed,
    })
}

/// Split `Note#^block` / `Note#Heading` into the path and its anchor.
fn parse_fragment(target: &str) -> (&str, Option<Anchor>) {
    if let Some(pos) = target.find("#^") {
        return (&target[..pos], Some(Anchor::Block(target[pos + 2..].trim().to_string())));
    }
    if let Some(pos) = target.find('#') {
        return (&target[..pos], Some(Anchor::Heading(target[pos + 1..].trim().to_string())));
    }
    (target, None)
}
