//! Publish eligibility.
//!
//! A markdown note is published when its leading YAML block sets
//! `publish: true`. An image is published when at least one published note
//! embeds it, either as `![[name.png]]` or `![alt](path/name.png)`. Images are
//! matched by file name only, the way note apps resolve embeds.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::error::Result;
use crate::fs::local::LocalTree;
use crate::fs::types::LocalFile;
use crate::sync::exclude::{is_image, is_markdown};

static WIKI_EMBED: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[\[([^\]]+)\]\]").unwrap());
static MARKDOWN_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").unwrap());

/// The part of the frontmatter we care about. Other keys are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct Frontmatter {
    #[serde(default)]
    pub publish: bool,
}

/// Parse the leading `---` delimited YAML block. None if there is no block or
/// it is not valid YAML.
pub fn parse_frontmatter(content: &str) -> Option<Frontmatter> {
    let mut lines = content.lines();
    if lines.next()?.trim() != "---" {
        return None;
    }

    let block: Vec<&str> = lines.take_while(|line| line.trim() != "---").collect();
    if block.is_empty() {
        return None;
    }

    serde_yaml::from_str(&block.join("\n")).ok()
}

pub fn is_published_content(content: &str) -> bool {
    parse_frontmatter(content).is_some_and(|fm| fm.publish)
}

/// Read a note and check its publish flag. Unreadable files are not published.
pub fn is_published(path: &Path) -> bool {
    match std::fs::read_to_string(path) {
        Ok(content) => is_published_content(&content),
        Err(_) => false,
    }
}

fn file_name(target: &str) -> Option<String> {
    let mut target = target.trim().trim_start_matches('<').trim_end_matches('>');
    // ![alt](img.png "title")
    if let Some(idx) = target.find(" \"") {
        target = &target[..idx];
    }
    let target = target.replace("%20", " ");
    let name = target.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || !is_image(name) {
        return None;
    }
    Some(name.to_string())
}

/// Image file names embedded in a note, deduplicated, in order of appearance.
pub fn extract_image_refs(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    let wiki = WIKI_EMBED.captures_iter(content).map(|c| {
        let inner = c.get(1).map_or("", |m| m.as_str());
        // ![[alt|image.png]]
        match inner.find('|') {
            Some(idx) => inner[idx + 1..].to_string(),
            None => inner.to_string(),
        }
    });
    let markdown = MARKDOWN_IMAGE
        .captures_iter(content)
        .map(|c| c.get(1).map_or("", |m| m.as_str()).to_string());

    for target in wiki.collect::<Vec<_>>().into_iter().chain(markdown) {
        if let Some(name) = file_name(&target) {
            if seen.insert(name.clone()) {
                refs.push(name);
            }
        }
    }
    refs
}

/// Eligibility predicate for a publish target.
#[derive(Debug, Clone, Default)]
pub struct PublishFilter {
    referenced: HashSet<String>,
}

impl PublishFilter {
    /// Collect the images referenced by every published note in the tree.
    pub fn scan(tree: &LocalTree) -> Result<Self> {
        Ok(Self::from_files(&tree.scan()?))
    }

    /// Same as [`PublishFilter::scan`] over an existing walk.
    pub fn from_files(files: &[LocalFile]) -> Self {
        let mut filter = Self::default();
        for file in files {
            if !is_markdown(&file.rel_path) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&file.abs_path) else {
                continue;
            };
            if is_published_content(&content) {
                filter.add_refs(&content);
            }
        }
        tracing::debug!("{} images referenced by published notes", filter.referenced.len());
        filter
    }

    pub fn add_refs(&mut self, content: &str) {
        self.referenced.extend(extract_image_refs(content));
    }

    pub fn is_referenced(&self, rel_path: &str) -> bool {
        let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        self.referenced.contains(name)
    }

    /// Whether the file at `rel_path` (on disk at `abs_path`) belongs on the
    /// publish target.
    pub fn is_eligible(&self, rel_path: &str, abs_path: &Path) -> bool {
        if is_markdown(rel_path) {
            is_published(abs_path)
        } else {
            self.is_referenced(rel_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::exclude::SyncFilter;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_frontmatter_publish_flag() {
        assert!(is_published_content("---\ntitle: A\npublish: true\n---\nbody"));
        assert!(!is_published_content("---\npublish: false\n---\nbody"));
        assert!(!is_published_content("---\ntitle: A\n---\nbody"));
        assert!(!is_published_content("no frontmatter\npublish: true"));
        assert!(!is_published_content("---\n---\nbody"));
        assert!(!is_published_content(""));
    }

    #[test]
    fn test_frontmatter_invalid_yaml() {
        assert!(!is_published_content("---\npublish: [true\n---\n"));
        assert!(!is_published_content("---\npublish: maybe\n---\n"));
    }

    #[test]
    fn test_frontmatter_unterminated_block() {
        // Everything after the opening line is the block
        assert!(is_published_content("---\npublish: true\n"));
    }

    #[test]
    fn test_extract_image_refs() {
        let content = "\
![[photo.png]]
![[alt text|images/diagram.svg]]
![chart](assets/chart.jpg)
![again](photo.png)
![[note-embed]]
![link](https://example.com/page)
![spaced](my%20pic.webp \"title\")
";
        assert_eq!(
            extract_image_refs(content),
            vec!["photo.png", "diagram.svg", "chart.jpg", "my pic.webp"]
        );
    }

    #[test]
    fn test_filter_scan_and_eligibility() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("img")).unwrap();
        fs::write(root.join("public.md"), "---\npublish: true\n---\n![[a.png]]").unwrap();
        fs::write(root.join("private.md"), "---\npublish: false\n---\n![[b.png]]").unwrap();
        fs::write(root.join("img/a.png"), b"a").unwrap();
        fs::write(root.join("img/b.png"), b"b").unwrap();

        let tree = LocalTree::new(root, SyncFilter::default());
        let filter = PublishFilter::scan(&tree).unwrap();

        assert!(filter.is_eligible("public.md", &root.join("public.md")));
        assert!(!filter.is_eligible("private.md", &root.join("private.md")));
        assert!(filter.is_eligible("img/a.png", &root.join("img/a.png")));
        assert!(!filter.is_eligible("img/b.png", &root.join("img/b.png")));
    }
}
