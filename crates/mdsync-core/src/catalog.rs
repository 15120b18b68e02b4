//! Metadata type lookup.
//!
//! Decides which files under the source root are deployable source units and
//! maps source directories to remote type names. The remote describe cache is
//! not part of this crate; [`StaticCatalog`] carries the common types.

/// Package descriptor, always deployed with every unit.
pub const PACKAGE_XML: &str = "package.xml";

/// Suffix of descriptor companions (`Foo.cls-meta.xml`).
pub const META_SUFFIX: &str = "-meta.xml";

/// One metadata type: where it lives and what its files end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataType {
    pub directory: &'static str,
    pub type_name: &'static str,
    /// File suffix without the dot. `None` for bundle types, whose members
    /// are directories holding arbitrary files.
    pub suffix: Option<&'static str>,
}

pub trait MetadataCatalog {
    fn types(&self) -> &[MetadataType];

    fn by_directory(&self, directory: &str) -> Option<&MetadataType> {
        self.types().iter().find(|t| t.directory == directory)
    }

    fn by_type_name(&self, type_name: &str) -> Option<&MetadataType> {
        self.types()
            .iter()
            .find(|t| t.type_name.eq_ignore_ascii_case(type_name))
    }

    /// Whether a source-relative path (`classes/Foo.cls`) is a deployable unit.
    fn is_source_file(&self, relative: &str) -> bool {
        if relative == PACKAGE_XML {
            return true;
        }
        let parts: Vec<&str> = relative.split('/').collect();
        if parts.len() < 2 {
            return false;
        }
        let Some(meta_type) = self.by_directory(parts[0]) else {
            return false;
        };
        let file_name = parts[parts.len() - 1];
        match meta_type.suffix {
            None => parts.len() >= 3,
            Some(suffix) => {
                let primary = file_name.strip_suffix(META_SUFFIX).unwrap_or(file_name);
                primary
                    .rsplit_once('.')
                    .is_some_and(|(stem, ext)| !stem.is_empty() && ext == suffix)
            }
        }
    }

    /// Remote member name for a source-relative path, with the owning type.
    fn member_for(&self, relative: &str) -> Option<(&MetadataType, String)> {
        let (directory, rest) = relative.split_once('/')?;
        let meta_type = self.by_directory(directory)?;
        let member = match meta_type.suffix {
            None => rest.split('/').next()?.to_string(),
            Some(suffix) => {
                let rest = rest.strip_suffix(META_SUFFIX).unwrap_or(rest);
                let dotted = format!(".{}", suffix);
                rest.strip_suffix(dotted.as_str()).unwrap_or(rest).to_string()
            }
        };
        if member.is_empty() {
            return None;
        }
        Some((meta_type, member))
    }
}

const BUILT_IN_TYPES: &[MetadataType] = &[
    MetadataType { directory: "classes", type_name: "ApexClass", suffix: Some("cls") },
    MetadataType { directory: "triggers", type_name: "ApexTrigger", suffix: Some("trigger") },
    MetadataType { directory: "pages", type_name: "ApexPage", suffix: Some("page") },
    MetadataType { directory: "components", type_name: "ApexComponent", suffix: Some("component") },
    MetadataType { directory: "staticresources", type_name: "StaticResource", suffix: Some("resource") },
    MetadataType { directory: "objects", type_name: "CustomObject", suffix: Some("object") },
    MetadataType { directory: "labels", type_name: "CustomLabels", suffix: Some("labels") },
    MetadataType { directory: "layouts", type_name: "Layout", suffix: Some("layout") },
    MetadataType { directory: "tabs", type_name: "CustomTab", suffix: Some("tab") },
    MetadataType { directory: "applications", type_name: "CustomApplication", suffix: Some("app") },
    MetadataType { directory: "permissionsets", type_name: "PermissionSet", suffix: Some("permissionset") },
    MetadataType { directory: "profiles", type_name: "Profile", suffix: Some("profile") },
    MetadataType { directory: "flows", type_name: "Flow", suffix: Some("flow") },
    MetadataType { directory: "workflows", type_name: "Workflow", suffix: Some("workflow") },
    MetadataType { directory: "remoteSiteSettings", type_name: "RemoteSiteSetting", suffix: Some("remoteSite") },
    MetadataType { directory: "email", type_name: "EmailTemplate", suffix: Some("email") },
    MetadataType { directory: "aura", type_name: "AuraDefinitionBundle", suffix: None },
    MetadataType { directory: "lwc", type_name: "LightningComponentBundle", suffix: None },
];

/// Catalog backed by a fixed type table.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    types: Vec<MetadataType>,
}

impl StaticCatalog {
    pub fn new(types: Vec<MetadataType>) -> Self {
        Self { types }
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::new(BUILT_IN_TYPES.to_vec())
    }
}

impl MetadataCatalog for StaticCatalog {
    fn types(&self) -> &[MetadataType] {
        &self.types
    }
}

/// Primary file for a companion (`classes/Foo.cls-meta.xml` -> `classes/Foo.cls`).
pub fn primary_of(relative: &str) -> Option<&str> {
    relative.strip_suffix(META_SUFFIX)
}

/// Companion for a primary file (`classes/Foo.cls` -> `classes/Foo.cls-meta.xml`).
pub fn companion_of(relative: &str) -> String {
    format!("{}{}", relative, META_SUFFIX)
}
