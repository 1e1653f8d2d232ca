//! Operations on objects. Each one touches every member file inside a single
//! atomic batch, so recognition never sees half of a multi-file object
//! renamed or moved.

use std::sync::Arc;

use super::{IdentityRegistry, RegistryError, RegistryResult};
use crate::fs::{FsError, FsResult, TreeState, split_name};
use crate::object::{ObjectOps, TypedObject};
use crate::recognize::SHADOW_EXTENSION;
use crate::types::FileId;

/// Attribute on a primary file marking the object as a template.
pub const TEMPLATE_ATTR: &str = "template";

/// `name` with its base replaced, keeping the extension.
fn with_base(name: &str, base: &str) -> String {
    match split_name(name).1 {
        Some(ext) => format!("{base}.{ext}"),
        None => base.to_string(),
    }
}

/// New names for `files` under `base`; folders take the base verbatim.
fn names_for(view: &TreeState, files: &[FileId], base: &str) -> FsResult<Vec<String>> {
    files
        .iter()
        .map(|&file| {
            if view.is_folder(file)? {
                Ok(base.to_string())
            } else {
                Ok(with_base(view.name(file)?, base))
            }
        })
        .collect()
}

/// First of `base`, `base_1`, `base_2`, ... under which no member name clashes
/// inside `folder`.
fn free_names(view: &TreeState, folder: FileId, files: &[FileId], base: &str) -> FsResult<Vec<String>> {
    let mut candidate = base.to_string();
    let mut n = 0;
    loop {
        let names = names_for(view, files, &candidate)?;
        let mut clash = false;
        for name in &names {
            if view.child_by_name(folder, name)?.is_some() {
                clash = true;
                break;
            }
        }
        if !clash {
            return Ok(names);
        }
        n += 1;
        candidate = format!("{base}_{n}");
    }
}

impl IdentityRegistry {
    fn check_op(&self, object: &TypedObject, op: ObjectOps, operation: &'static str) -> RegistryResult<()> {
        if !object.is_valid() {
            return Err(RegistryError::Invalidated { object: object.id() });
        }
        if !object.allows(op) {
            return Err(RegistryError::OperationNotAllowed {
                operation,
                object: object.id(),
                type_name: object.type_name().to_string(),
            });
        }
        Ok(())
    }

    /// Rename every member file to `new_base`, keeping extensions.
    ///
    /// File ids are stable across renames, so the object keeps its identity
    /// as long as the recognizer still claims the renamed group.
    pub fn rename(&self, object: &Arc<TypedObject>, new_base: &str) -> RegistryResult<()> {
        self.check_op(object, ObjectOps::RENAME, "rename")?;
        let files = object.files();
        self.fs.atomic(|batch| {
            let names = names_for(batch.view(), &files, new_base)?;
            for (file, name) in files.iter().zip(&names) {
                batch.rename(*file, name)?;
            }
            Ok(())
        })?;
        crate::log_event!("registry", "renamed", "{} -> {new_base}", object.key());
        Ok(())
    }

    /// Move every member file into `folder`.
    pub fn move_to(&self, object: &Arc<TypedObject>, folder: FileId) -> RegistryResult<()> {
        self.check_op(object, ObjectOps::MOVE, "move")?;
        let files = object.files();
        self.fs.atomic(|batch| {
            if !batch.view().is_folder(folder)? {
                return Err(FsError::NotAFolder { file: folder });
            }
            for file in &files {
                batch.move_to(*file, folder)?;
            }
            Ok(())
        })?;
        crate::log_event!("registry", "moved", "{} -> {folder}", object.key());
        Ok(())
    }

    /// Copy the member files into `folder` and return the copy's object.
    pub fn copy_to(&self, object: &Arc<TypedObject>, folder: FileId) -> RegistryResult<Arc<TypedObject>> {
        self.check_op(object, ObjectOps::COPY, "copy")?;
        let primary = self.copy_files(object, folder, None, false)?;
        self.find(primary)
    }

    /// Delete every member file and retire the object.
    pub fn delete(&self, object: &Arc<TypedObject>) -> RegistryResult<()> {
        self.check_op(object, ObjectOps::DELETE, "delete")?;
        let files = object.files();
        self.fs.atomic(|batch| {
            for file in &files {
                if batch.view().is_valid(*file) {
                    batch.delete(*file)?;
                }
            }
            Ok(())
        })?;
        self.invalidate(object);
        crate::log_event!("registry", "deleted", "{}", object.key());
        Ok(())
    }

    pub fn is_template(&self, object: &TypedObject) -> bool {
        self.fs
            .attribute(object.primary(), TEMPLATE_ATTR)
            .ok()
            .flatten()
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    pub fn set_template(&self, object: &Arc<TypedObject>, template: bool) -> RegistryResult<()> {
        if !object.is_valid() {
            return Err(RegistryError::Invalidated { object: object.id() });
        }
        if template {
            self.fs.set_attribute(object.primary(), TEMPLATE_ATTR, true)?;
        } else {
            self.fs.remove_attribute(object.primary(), TEMPLATE_ATTR)?;
        }
        Ok(())
    }

    /// Instantiate `object` into `folder`, optionally under a new base name.
    ///
    /// The copy never carries the template flag.
    pub fn create_from_template(
        &self,
        object: &Arc<TypedObject>,
        folder: FileId,
        name: Option<&str>,
    ) -> RegistryResult<Arc<TypedObject>> {
        self.check_op(object, ObjectOps::COPY, "create from template")?;
        let primary = self.copy_files(object, folder, name, true)?;
        self.find(primary)
    }

    /// Create a `.shadow` link to `object` inside `folder`.
    pub fn create_shadow(&self, object: &Arc<TypedObject>, folder: FileId) -> RegistryResult<Arc<TypedObject>> {
        self.check_op(object, ObjectOps::SHADOW, "shadow")?;
        let primary = object.primary();
        let target = self.fs.path(primary)?;

        let link = self.fs.atomic(|batch| {
            let view = batch.view();
            if !view.is_folder(folder)? {
                return Err(FsError::NotAFolder { file: folder });
            }
            let base = match view.name(primary)? {
                "" => "root".to_string(),
                name => name.to_string(),
            };
            let mut candidate = format!("{base}.{SHADOW_EXTENSION}");
            let mut n = 0;
            while view.child_by_name(folder, &candidate)?.is_some() {
                n += 1;
                candidate = format!("{base}_{n}.{SHADOW_EXTENSION}");
            }
            batch.create_file(folder, &candidate, target.as_bytes())
        })?;
        crate::log_event!("registry", "shadowed", "{} at {link}", object.key());
        self.find(link)
    }

    fn copy_files(
        &self,
        object: &TypedObject,
        folder: FileId,
        base: Option<&str>,
        clear_template: bool,
    ) -> RegistryResult<FileId> {
        let files = object.files();
        let primary = object.primary();

        let copied = self.fs.atomic(|batch| {
            let names = {
                let view = batch.view();
                if !view.is_folder(folder)? {
                    return Err(FsError::NotAFolder { file: folder });
                }
                let base = match base {
                    Some(base) => base.to_string(),
                    None if view.is_folder(primary)? => view.name(primary)?.to_string(),
                    None => split_name(view.name(primary)?).0.to_string(),
                };
                free_names(view, folder, &files, &base)?
            };

            let mut copied_primary = None;
            for (file, name) in files.iter().zip(&names) {
                let copy = batch.copy_to(*file, folder, name)?;
                if *file == primary {
                    copied_primary = Some(copy);
                }
            }
            let copied = copied_primary.ok_or(FsError::InvalidFile { file: primary })?;
            if clear_template {
                batch.set_attribute(copied, TEMPLATE_ATTR, None)?;
            }
            Ok(copied)
        })?;
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileTree;
    use crate::object::ObjectShape;
    use crate::recognize::{PatternRecognizer, RecognizerChain};

    fn setup() -> (Arc<FileTree>, Arc<IdentityRegistry>) {
        let fs = Arc::new(FileTree::new());
        let chain = Arc::new(RecognizerChain::new());
        chain
            .install(Arc::new(
                PatternRecognizer::new("form", "form", &["*.form"], &["java"]).unwrap(),
            ))
            .unwrap();
        let registry = IdentityRegistry::new(Arc::clone(&fs), chain);
        (fs, registry)
    }

    #[test]
    fn test_rename_keeps_identity_of_multi_file_object() {
        let (fs, registry) = setup();
        let root = fs.root();
        let form = fs.create_file(root, "Main.form", b"").unwrap();
        let java = fs.create_file(root, "Main.java", b"").unwrap();
        let object = registry.find(form).unwrap();

        registry.rename(&object, "Dialog").unwrap();

        assert!(object.is_valid());
        assert_eq!(fs.name(form).unwrap(), "Dialog.form");
        assert_eq!(fs.name(java).unwrap(), "Dialog.java");
        assert_eq!(object.files(), vec![form, java]);
    }

    #[test]
    fn test_failed_rename_leaves_group_intact() {
        let (fs, registry) = setup();
        let root = fs.root();
        let form = fs.create_file(root, "Main.form", b"").unwrap();
        let java = fs.create_file(root, "Main.java", b"").unwrap();
        let other = fs.create_file(root, "X.java", b"").unwrap();
        let object = registry.find(form).unwrap();

        let err = registry.rename(&object, "X").unwrap_err();
        assert!(matches!(err, RegistryError::Fs(FsError::AlreadyExists { .. })));

        assert!(object.is_valid());
        assert_eq!(fs.name(form).unwrap(), "Main.form");
        assert_eq!(fs.name(java).unwrap(), "Main.java");
        assert_eq!(object.files(), vec![form, java]);
        assert_ne!(registry.owner_of(other), Some(object.key()));
    }

    #[test]
    fn test_failed_move_leaves_files_in_place() {
        let (fs, registry) = setup();
        let root = fs.root();
        let target = fs.create_folder(root, "target").unwrap();
        fs.create_file(target, "Main.java", b"").unwrap();
        let form = fs.create_file(root, "Main.form", b"").unwrap();
        let java = fs.create_file(root, "Main.java", b"").unwrap();
        let object = registry.find(form).unwrap();

        assert!(registry.move_to(&object, target).is_err());

        assert_eq!(fs.parent(form).unwrap(), Some(root));
        assert_eq!(fs.parent(java).unwrap(), Some(root));
        assert!(object.is_valid());
        assert_eq!(object.files(), vec![form, java]);
    }

    #[test]
    fn test_copy_picks_free_base_name() {
        let (fs, registry) = setup();
        let root = fs.root();
        let form = fs.create_file(root, "Main.form", b"").unwrap();
        fs.create_file(root, "Main.java", b"").unwrap();
        let object = registry.find(form).unwrap();

        let copy = registry.copy_to(&object, root).unwrap();

        assert_ne!(copy.id(), object.id());
        assert_eq!(fs.name(copy.primary()).unwrap(), "Main_1.form");
        assert_eq!(copy.files().len(), 2);
    }

    #[test]
    fn test_delete_retires_object() {
        let (fs, registry) = setup();
        let form = fs.create_file(fs.root(), "Main.form", b"").unwrap();
        let object = registry.find(form).unwrap();

        registry.delete(&object).unwrap();

        assert!(!object.is_valid());
        assert!(!fs.is_valid(form));
        assert!(matches!(
            registry.rename(&object, "x"),
            Err(RegistryError::Invalidated { .. })
        ));
    }

    #[test]
    fn test_template_flag_not_copied() {
        let (fs, registry) = setup();
        let root = fs.root();
        let templates = fs.create_folder(root, "Templates").unwrap();
        let form = fs.create_file(templates, "Blank.form", b"").unwrap();
        let template = registry.find(form).unwrap();
        registry.set_template(&template, true).unwrap();
        assert!(registry.is_template(&template));

        let created = registry
            .create_from_template(&template, root, Some("Login"))
            .unwrap();

        assert_eq!(fs.name(created.primary()).unwrap(), "Login.form");
        assert!(!registry.is_template(&created));
    }

    #[test]
    fn test_shadow_links_to_target_and_breaks_on_delete() {
        let (fs, registry) = setup();
        let root = fs.root();
        let docs = fs.create_folder(root, "docs").unwrap();
        let file = fs.create_file(docs, "a.txt", b"").unwrap();
        let target = registry.find(file).unwrap();

        let shadow = registry.create_shadow(&target, root).unwrap();
        assert_eq!(
            shadow.shape(),
            ObjectShape::Shadow {
                link: shadow.primary(),
                target: target.key(),
            }
        );

        registry.delete(&target).unwrap();
        assert!(!shadow.is_valid());
        let broken = registry.find(shadow.primary()).unwrap();
        assert!(matches!(broken.shape(), ObjectShape::BrokenShadow { .. }));
    }

    #[test]
    fn test_operation_flags_are_enforced() {
        let (fs, registry) = setup();
        let root = registry.find(fs.root()).unwrap();
        assert!(matches!(
            registry.delete(&root),
            Err(RegistryError::OperationNotAllowed { operation: "delete", .. })
        ));
    }
}
