//! Deletion manifests.
//!
//! A deletion is deployed as an archive holding `destructiveChanges.xml`, which
//! names the components to remove, next to an empty `package.xml`.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::catalog::{MetadataCatalog, PACKAGE_XML};
use crate::error::MdsyncError;

pub const DESTRUCTIVE_XML: &str = "destructiveChanges.xml";

const METADATA_NS: &str = "http://soap.sforce.com/2006/04/metadata";

/// Type name → members to delete, both sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestructiveManifest {
    types: BTreeMap<String, BTreeSet<String>>,
    api_version: String,
}

impl DestructiveManifest {
    /// Group source-relative component keys by type.
    ///
    /// A primary and its `-meta.xml` companion name the same member. A key
    /// outside every known type directory is an input error.
    pub fn build<I, S>(
        keys: I,
        catalog: &dyn MetadataCatalog,
        api_version: &str,
    ) -> Result<Self, MdsyncError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let types = keys.into_iter().try_fold(
            BTreeMap::<String, BTreeSet<String>>::new(),
            |mut acc, key| {
                let key = key.as_ref();
                let (meta_type, member) = catalog.member_for(key).ok_or_else(|| {
                    MdsyncError::input(format!("unrecognized metadata directory for '{}'", key))
                })?;
                acc.entry(meta_type.type_name.to_string())
                    .or_default()
                    .insert(member);
                Ok::<_, MdsyncError>(acc)
            },
        )?;
        Ok(Self {
            types,
            api_version: api_version.to_string(),
        })
    }

    pub fn types(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.types
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.types.values().map(BTreeSet::len).sum()
    }

    pub fn to_xml(&self) -> anyhow::Result<String> {
        write_package_xml(&self.types, &self.api_version)
    }

    /// Read a manifest written by [`to_xml`](Self::to_xml) or by hand.
    ///
    /// Comments and unknown elements are ignored.
    pub fn from_xml(xml: &str) -> anyhow::Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut path: Vec<String> = Vec::new();
        let mut types: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut api_version = String::new();
        let mut name: Option<String> = None;
        let mut members: BTreeSet<String> = BTreeSet::new();

        loop {
            match reader.read_event().context("Failed to parse manifest")? {
                Event::Start(e) => {
                    let tag = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if tag == "types" {
                        name = None;
                        members.clear();
                    }
                    path.push(tag);
                }
                Event::End(_) => {
                    if path.pop().as_deref() == Some("types") {
                        let type_name = name
                            .take()
                            .ok_or_else(|| anyhow::anyhow!("<types> block without <name>"))?;
                        types
                            .entry(type_name)
                            .or_default()
                            .append(&mut members);
                    }
                }
                Event::Text(text) => {
                    let value = text.unescape().context("Failed to parse manifest text")?;
                    let value = value.trim().to_string();
                    match path_tail(&path) {
                        ["types", "members"] => {
                            members.insert(value);
                        }
                        ["types", "name"] => name = Some(value),
                        ["Package", "version"] => api_version = value,
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(Self { types, api_version })
    }

    /// Write the manifest pair into `dir`, ready to be archived.
    pub fn write_package(&self, dir: &Path) -> anyhow::Result<()> {
        let destructive = dir.join(DESTRUCTIVE_XML);
        std::fs::write(&destructive, self.to_xml()?)
            .with_context(|| format!("Failed to write manifest: {}", destructive.display()))?;
        let package = dir.join(PACKAGE_XML);
        std::fs::write(&package, empty_package_xml(&self.api_version)?)
            .with_context(|| format!("Failed to write manifest: {}", package.display()))?;
        Ok(())
    }
}

/// Package descriptor naming no components.
pub fn empty_package_xml(api_version: &str) -> anyhow::Result<String> {
    write_package_xml(&BTreeMap::new(), api_version)
}

fn path_tail<'p>(path: &'p [String]) -> [&'p str; 2] {
    match path {
        [.., parent, child] => [parent.as_str(), child.as_str()],
        _ => ["", ""],
    }
}

fn write_package_xml(
    types: &BTreeMap<String, BTreeSet<String>>,
    api_version: &str,
) -> anyhow::Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 4);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(
        BytesStart::new("Package").with_attributes([("xmlns", METADATA_NS)]),
    ))?;
    for (type_name, members) in types {
        writer.write_event(Event::Start(BytesStart::new("types")))?;
        for member in members {
            write_text_element(&mut writer, "members", member)?;
        }
        write_text_element(&mut writer, "name", type_name)?;
        writer.write_event(Event::End(BytesEnd::new("types")))?;
    }
    write_text_element(&mut writer, "version", api_version)?;
    writer.write_event(Event::End(BytesEnd::new("Package")))?;

    let mut xml = String::from_utf8(writer.into_inner().into_inner())
        .context("Manifest is not UTF-8")?;
    xml.push('\n');
    Ok(xml)
}

fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    tag: &str,
    text: &str,
) -> anyhow::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;

    #[test]
    fn groups_members_by_type() {
        let catalog = StaticCatalog::default();
        let manifest = DestructiveManifest::build(
            [
                "classes/Zeta.cls",
                "classes/Alpha.cls",
                "classes/Alpha.cls-meta.xml",
                "pages/Home.page",
                "lwc/card/card.js",
            ],
            &catalog,
            "60.0",
        )
        .unwrap();

        assert_eq!(manifest.member_count(), 4);
        let classes: Vec<&str> = manifest.types()["ApexClass"].iter().map(String::as_str).collect();
        assert_eq!(classes, vec!["Alpha", "Zeta"]);
        assert!(manifest.types()["LightningComponentBundle"].contains("card"));
    }

    #[test]
    fn unknown_directory_is_input_error() {
        let catalog = StaticCatalog::default();
        let err = DestructiveManifest::build(["widgets/Foo.widget"], &catalog, "60.0").unwrap_err();
        assert!(matches!(err, MdsyncError::Input(_)));
        assert!(err.to_string().contains("widgets/Foo.widget"));
    }

    #[test]
    fn xml_layout() {
        let catalog = StaticCatalog::default();
        let manifest = DestructiveManifest::build(["classes/Foo.cls"], &catalog, "60.0").unwrap();
        let xml = manifest.to_xml().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<Package xmlns=\"http://soap.sforce.com/2006/04/metadata\">"));
        assert!(xml.contains("<members>Foo</members>"));
        assert!(xml.contains("<name>ApexClass</name>"));
        assert!(xml.contains("<version>60.0</version>"));
        assert!(xml.trim_end().ends_with("</Package>"));

        let empty = empty_package_xml("60.0").unwrap();
        assert!(!empty.contains("<types>"));
        assert!(empty.contains("<version>60.0</version>"));
    }

    #[test]
    fn reads_back_written_xml() {
        let catalog = StaticCatalog::default();
        let manifest =
            DestructiveManifest::build(["classes/A.cls", "triggers/B.trigger"], &catalog, "59.0")
                .unwrap();
        assert_eq!(DestructiveManifest::from_xml(&manifest.to_xml().unwrap()).unwrap(), manifest);
    }

    #[test]
    fn special_characters_survive_writing_and_reading() {
        let manifest = DestructiveManifest {
            types: BTreeMap::from([(
                "CustomLabels".to_string(),
                BTreeSet::from(["Tom & Jerry <\"quoted\">".to_string()]),
            )]),
            api_version: "60.0".to_string(),
        };
        let xml = manifest.to_xml().unwrap();
        assert!(xml.contains("&amp;"));
        assert!(xml.contains("&lt;"));
        assert!(!xml.contains("Tom & Jerry"));
        assert_eq!(DestructiveManifest::from_xml(&xml).unwrap(), manifest);
    }

    #[test]
    fn commented_out_types_are_not_deleted() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Package xmlns="http://soap.sforce.com/2006/04/metadata">
    <!-- <types><members>Keep</members><name>ApexClass</name></types> -->
    <types>
        <members>Gone</members>
        <name>ApexClass</name>
    </types>
    <version>60.0</version>
</Package>
"#;
        let manifest = DestructiveManifest::from_xml(xml).unwrap();
        let classes: Vec<&str> = manifest.types()["ApexClass"].iter().map(String::as_str).collect();
        assert_eq!(classes, vec!["Gone"]);
        assert_eq!(manifest.api_version(), "60.0");
    }

    #[test]
    fn types_without_name_are_rejected() {
        let xml = "<Package><types><members>A</members></types></Package>";
        assert!(DestructiveManifest::from_xml(xml).is_err());
    }

    #[test]
    fn writes_manifest_pair() {
        let tmp = tempfile::TempDir::new().unwrap();
        let catalog = StaticCatalog::default();
        let manifest = DestructiveManifest::build(["classes/A.cls"], &catalog, "60.0").unwrap();
        manifest.write_package(tmp.path()).unwrap();
        assert!(tmp.path().join(DESTRUCTIVE_XML).is_file());
        let package = std::fs::read_to_string(tmp.path().join(PACKAGE_XML)).unwrap();
        assert!(package.contains("<version>60.0</version>"));
    }
}
