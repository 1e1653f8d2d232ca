//! Recognizers that ship with the system.

use std::sync::Arc;

use glob::Pattern;

use super::error::RecognitionError;
use super::recognizer::{BuildContext, Claim, ExamineContext, PrimaryFileGroup, Recognizer};
use crate::config::RecognizerConfig;
use crate::fs::split_name;
use crate::object::{Facet, FacetKind, ObjectOps, ObjectShape, ObjectSpec};
use crate::types::{FileGroupKey, FileId, RecognizerId};

/// Extension of link files.
pub const SHADOW_EXTENSION: &str = "shadow";

/// Claims every folder and gives it a `Container` facet.
#[derive(Debug, Default)]
pub struct FolderRecognizer;

impl FolderRecognizer {
    pub const ID: &'static str = "folder";
}

impl Recognizer for FolderRecognizer {
    fn id(&self) -> RecognizerId {
        RecognizerId::from(Self::ID)
    }

    fn examine(&self, cx: &ExamineContext<'_>, file: FileId) -> Option<Claim> {
        cx.fs
            .is_folder(file)
            .ok()?
            .then(|| Claim::Primary(PrimaryFileGroup::single(file)))
    }

    fn build(&self, cx: &BuildContext<'_>, group: &PrimaryFileGroup) -> Result<ObjectSpec, RecognitionError> {
        let mut ops = ObjectOps::all();
        if group.primary == cx.fs.root() {
            ops = ObjectOps::COPY | ObjectOps::SHADOW;
        }
        Ok(ObjectSpec::new("folder")
            .facet(Facet::Container {
                folder: group.primary,
            })
            .facet(Facet::Open)
            .ops(ops))
    }
}

/// Claims `*.shadow` link files. The file content is the path of the
/// target's primary file.
#[derive(Debug, Default)]
pub struct ShadowRecognizer;

impl ShadowRecognizer {
    pub const ID: &'static str = "shadow";
}

impl Recognizer for ShadowRecognizer {
    fn id(&self) -> RecognizerId {
        RecognizerId::from(Self::ID)
    }

    fn examine(&self, cx: &ExamineContext<'_>, file: FileId) -> Option<Claim> {
        if cx.fs.is_folder(file).ok()? {
            return None;
        }
        let name = cx.fs.name(file).ok()?;
        match split_name(&name) {
            (_, Some(SHADOW_EXTENSION)) => Some(Claim::Primary(PrimaryFileGroup::single(file))),
            _ => None,
        }
    }

    fn build(&self, cx: &BuildContext<'_>, group: &PrimaryFileGroup) -> Result<ObjectSpec, RecognitionError> {
        let link = group.primary;
        let content = cx.fs.content(link)?;

        let target = match std::str::from_utf8(&content) {
            Ok(path) if path.trim().is_empty() => Err("link is empty".to_string()),
            Ok(path) => cx
                .fs
                .resolve_path(path.trim())
                .map_err(|e| e.to_string()),
            Err(_) => Err("link is not valid UTF-8".to_string()),
        };

        let spec = match target {
            Ok(target) => {
                let target = FileGroupKey::of(target);
                ObjectSpec::new("shadow")
                    .facet(Facet::Link { target })
                    .facet(Facet::Open)
                    .shape(ObjectShape::Shadow { link, target })
            }
            Err(reason) => {
                crate::debug_event!("shadow", "broken", "file={link} reason={reason}");
                ObjectSpec::new("broken-shadow")
                    .ops(ObjectOps::DELETE | ObjectOps::RENAME | ObjectOps::MOVE)
                    .shape(ObjectShape::BrokenShadow { link, reason })
            }
        };
        Ok(spec)
    }
}

/// Catch-all for data files no other recognizer claimed.
#[derive(Debug, Default)]
pub struct DefaultRecognizer;

impl DefaultRecognizer {
    pub const ID: &'static str = "default";
}

impl Recognizer for DefaultRecognizer {
    fn id(&self) -> RecognizerId {
        RecognizerId::from(Self::ID)
    }

    fn examine(&self, cx: &ExamineContext<'_>, file: FileId) -> Option<Claim> {
        let folder = cx.fs.is_folder(file).ok()?;
        (!folder).then(|| Claim::Primary(PrimaryFileGroup::single(file)))
    }

    fn build(&self, _cx: &BuildContext<'_>, _group: &PrimaryFileGroup) -> Result<ObjectSpec, RecognitionError> {
        Ok(ObjectSpec::new("file").facet(Facet::Open))
    }
}

/// Name-pattern recognizer, usually defined in `[recognizers.<name>]`.
///
/// A data file whose name matches one of the patterns is a primary. Sibling
/// files with the same base name and one of the secondary extensions join
/// its group.
#[derive(Debug)]
pub struct PatternRecognizer {
    id: RecognizerId,
    type_name: Arc<str>,
    patterns: Vec<Pattern>,
    secondary_extensions: Vec<String>,
    facets: Vec<FacetKind>,
    mime: Option<String>,
}

impl PatternRecognizer {
    pub fn new(
        id: &str,
        type_name: &str,
        patterns: &[&str],
        secondary_extensions: &[&str],
    ) -> Result<Self, RecognitionError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| RecognitionError::InvalidDefinition {
                    name: id.to_string(),
                    reason: format!("bad pattern '{p}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if patterns.is_empty() {
            return Err(RecognitionError::InvalidDefinition {
                name: id.to_string(),
                reason: "at least one pattern is required".to_string(),
            });
        }

        Ok(Self {
            id: RecognizerId::from(id),
            type_name: Arc::from(type_name),
            patterns,
            secondary_extensions: secondary_extensions.iter().map(|e| e.to_string()).collect(),
            facets: vec![FacetKind::Open],
            mime: None,
        })
    }

    pub fn from_config(name: &str, config: &RecognizerConfig) -> Result<Self, RecognitionError> {
        let patterns: Vec<&str> = config.patterns.iter().map(String::as_str).collect();
        let secondaries: Vec<&str> = config.secondary_extensions.iter().map(String::as_str).collect();
        let type_name = config.type_name.as_deref().unwrap_or(name);

        let facets = config
            .facets
            .iter()
            .map(|f| {
                FacetKind::from_name(f).ok_or_else(|| RecognitionError::InvalidDefinition {
                    name: name.to_string(),
                    reason: format!("unknown facet '{f}'"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut recognizer = Self::new(name, type_name, &patterns, &secondaries)?;
        if !facets.is_empty() {
            recognizer.facets = facets;
        }
        recognizer.mime = config.mime.clone();
        Ok(recognizer)
    }

    pub fn with_facets(mut self, facets: impl IntoIterator<Item = FacetKind>) -> Self {
        self.facets = facets.into_iter().collect();
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }

    fn is_secondary_extension(&self, ext: Option<&str>) -> bool {
        ext.is_some_and(|ext| self.secondary_extensions.iter().any(|e| e == ext))
    }
}

impl Recognizer for PatternRecognizer {
    fn id(&self) -> RecognizerId {
        self.id.clone()
    }

    fn examine(&self, cx: &ExamineContext<'_>, file: FileId) -> Option<Claim> {
        let tree = cx.fs.read();
        if tree.is_folder(file).ok()? {
            return None;
        }
        let name = tree.name(file).ok()?;
        let parent = tree.parent(file).ok()??;
        let (base, ext) = split_name(name);

        if self.matches(name) {
            let secondaries = tree.children(parent).ok()?.iter().copied().filter(|&sibling| {
                if sibling == file || tree.is_folder(sibling).unwrap_or(true) {
                    return false;
                }
                let Ok(sibling_name) = tree.name(sibling) else {
                    return false;
                };
                let (sibling_base, sibling_ext) = split_name(sibling_name);
                sibling_base == base
                    && self.is_secondary_extension(sibling_ext)
                    && !self.matches(sibling_name)
            });
            return Some(Claim::Primary(PrimaryFileGroup::with_secondaries(file, secondaries)));
        }

        if self.is_secondary_extension(ext) {
            let primary = tree.children(parent).ok()?.iter().copied().find(|&sibling| {
                sibling != file
                    && !tree.is_folder(sibling).unwrap_or(true)
                    && tree.name(sibling).is_ok_and(|n| split_name(n).0 == base && self.matches(n))
            })?;
            return Some(Claim::Secondary { primary });
        }

        None
    }

    fn build(&self, _cx: &BuildContext<'_>, _group: &PrimaryFileGroup) -> Result<ObjectSpec, RecognitionError> {
        let mut spec = ObjectSpec::new(Arc::clone(&self.type_name));
        for kind in &self.facets {
            let facet = match kind {
                FacetKind::Open => Facet::Open,
                FacetKind::Edit => Facet::Edit {
                    mime: self
                        .mime
                        .clone()
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                },
                FacetKind::Instance => Facet::Instance {
                    type_name: self.type_name.to_string(),
                },
                FacetKind::Container | FacetKind::Link => {
                    crate::debug_event!("pattern", "facet skipped", "{} {kind:?}", self.id);
                    continue;
                }
            };
            spec = spec.facet(facet);
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileTree;

    #[test]
    fn test_pattern_groups_secondaries_by_base_name() {
        let fs = FileTree::new();
        let root = fs.root();
        let form = fs.create_file(root, "Main.form", b"").unwrap();
        let java = fs.create_file(root, "Main.java", b"").unwrap();
        let other = fs.create_file(root, "Other.java", b"").unwrap();

        let recognizer = PatternRecognizer::new("form", "form", &["*.form"], &["java"]).unwrap();
        let cx = ExamineContext::new(&fs);

        let Some(Claim::Primary(group)) = recognizer.examine(&cx, form) else {
            panic!("expected primary claim");
        };
        assert_eq!(group.files(), vec![form, java]);
        assert_eq!(recognizer.examine(&cx, java), Some(Claim::Secondary { primary: form }));
        assert_eq!(recognizer.examine(&cx, other), None);
    }

    #[test]
    fn test_bad_pattern_is_rejected() {
        let err = PatternRecognizer::new("bad", "bad", &["[*"], &[]).unwrap_err();
        assert!(matches!(err, RecognitionError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_folder_and_default_split_the_tree() {
        let fs = FileTree::new();
        let folder = fs.create_folder(fs.root(), "docs").unwrap();
        let file = fs.create_file(folder, "a.txt", b"").unwrap();
        let cx = ExamineContext::new(&fs);

        assert!(FolderRecognizer.examine(&cx, folder).is_some());
        assert!(FolderRecognizer.examine(&cx, file).is_none());
        assert!(DefaultRecognizer.examine(&cx, folder).is_none());
        assert!(DefaultRecognizer.examine(&cx, file).is_some());
    }

    #[test]
    fn test_shadow_claims_only_link_files() {
        let fs = FileTree::new();
        let link = fs.create_file(fs.root(), "a.shadow", b"docs/a.txt").unwrap();
        let plain = fs.create_file(fs.root(), "a.txt", b"").unwrap();
        let cx = ExamineContext::new(&fs);

        assert!(ShadowRecognizer.examine(&cx, link).is_some());
        assert!(ShadowRecognizer.examine(&cx, plain).is_none());
    }
}
