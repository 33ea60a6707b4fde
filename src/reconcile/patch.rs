use log::info;

use crate::manifest::AssetRecord;
use crate::remote::ManifestSet;

/// Point every manifest entry that references the version superseded by
/// `record` at the new upload instead.
///
/// Rewritten manifests are flagged as updated and re-stamped. Returns the
/// number of manifests touched.
pub fn apply(manifests: &mut ManifestSet, record: &AssetRecord) -> usize {
    let Some(previous) = record.version.checked_sub(1) else {
        return 0;
    };

    let mut touched = 0;
    for entry in manifests.values_mut() {
        let mut changed = false;
        for file in entry
            .content
            .files
            .iter_mut()
            .filter(|file| file.name == record.name && file.version == previous)
        {
            file.size = record.size;
            file.url = record.url.clone();
            file.version = record.version;
            file.compressed = record.compressed.clone();
            changed = true;
        }
        if changed {
            entry.updated = true;
            entry.content.touch();
            touched += 1;
            info!(
                "patch: `{}` now references {} v{}",
                entry.key, record.name, record.version
            );
        }
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetType;
    use crate::manifest::{CompressedVariant, Manifest, ManifestEntry};

    fn file(name: &str, version: u64, compressed: bool) -> AssetRecord {
        AssetRecord {
            name: name.into(),
            size: 1,
            asset_type: Some(AssetType::Json),
            url: format!("old-{version}"),
            version,
            compressed: compressed.then(|| CompressedVariant {
                zsize: 1,
                zurl: format!("old-{version}.gz"),
            }),
        }
    }

    fn manifests(files: Vec<(&str, Vec<AssetRecord>)>) -> ManifestSet {
        files
            .into_iter()
            .map(|(key, files)| {
                (
                    key.to_owned(),
                    ManifestEntry {
                        key: key.to_owned(),
                        content: Manifest {
                            files,
                            last_updated_at: 0,
                        },
                        updated: false,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn rewrites_entries_on_previous_version_only() {
        let mut set = manifests(vec![
            ("config/1.0.0.json", vec![file("/a.json", 3, false), file("/b.json", 3, false)]),
            ("config/0.9.0.json", vec![file("/a.json", 2, false)]),
        ]);
        let new = AssetRecord {
            size: 42,
            url: "new-4".into(),
            ..file("/a.json", 4, false)
        };

        assert_eq!(apply(&mut set, &new), 1);

        let patched = &set["config/1.0.0.json"];
        assert!(patched.updated);
        assert!(patched.content.last_updated_at > 0);
        assert_eq!(patched.content.files[0], new);
        assert_eq!(patched.content.files[1], file("/b.json", 3, false));

        let untouched = &set["config/0.9.0.json"];
        assert!(!untouched.updated);
        assert_eq!(untouched.content.files[0].version, 2);
        assert_eq!(untouched.content.last_updated_at, 0);
    }

    #[test]
    fn matches_compressed_state_of_new_upload() {
        let mut set = manifests(vec![
            ("config/1.0.0.json", vec![file("/x.json", 1, true)]),
            ("config/1.1.0.json", vec![file("/y.json", 1, false)]),
        ]);

        apply(&mut set, &file("/x.json", 2, false));
        apply(&mut set, &file("/y.json", 2, true));

        assert_eq!(set["config/1.0.0.json"].content.files[0].compressed, None);
        assert_eq!(
            set["config/1.1.0.json"].content.files[0].compressed,
            Some(CompressedVariant {
                zsize: 1,
                zurl: "old-2.gz".into(),
            })
        );
    }

    #[test]
    fn leaves_manifests_without_the_asset_alone() {
        let mut set = manifests(vec![("config/1.0.0.json", vec![file("/b.json", 1, false)])]);
        assert_eq!(apply(&mut set, &file("/a.json", 2, false)), 0);
        assert!(!set["config/1.0.0.json"].updated);
    }
}
