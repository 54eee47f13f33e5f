//! Partial bundles: ship only what changed since the last install.
//!
//! Files whose content hash matches the peer's listing are pruned from the
//! bundle, paths the peer has but the bundle no longer carries go into the
//! delete list, and the sentinel `.partial.json` records that list.
//! The app manifest always stays in the bundle so the receiving side knows
//! which app it updates.

use crate::bundle::listing::{content_hash, hashes_match, ContentListing};
use crate::bundle::{Bundle, BundleEntry, MANIFEST_PATH, PARTIAL_MANIFEST_PATH};
use crate::error::{BridgeError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Contents of the `.partial.json` sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialManifest {
    pub delete: Vec<String>,
}

impl PartialManifest {
    pub fn from_bundle(bundle: &Bundle) -> Result<Self> {
        let data = bundle.get_file(PARTIAL_MANIFEST_PATH).ok_or_else(|| {
            BridgeError::InvalidBundle(format!("{} is missing", PARTIAL_MANIFEST_PATH))
        })?;
        serde_json::from_slice(data)
            .map_err(|e| BridgeError::InvalidBundle(format!("{}: {}", PARTIAL_MANIFEST_PATH, e)))
    }
}

/// Reduce `bundle` against what the peer already has.
///
/// Returns `Ok(None)` when installing would change nothing.
pub fn diff_bundle(mut bundle: Bundle, listing: &ContentListing) -> Result<Option<Bundle>> {
    if bundle.is_partial() {
        return Err(BridgeError::AlreadyPartial);
    }

    let mut delete = Vec::new();
    let mut manifest_unchanged = false;
    let mut pruned = 0usize;

    for (path, expected) in listing.iter() {
        let unchanged = match bundle.get(path) {
            None => {
                if path != MANIFEST_PATH {
                    delete.push(path.to_string());
                }
                continue;
            }
            Some(BundleEntry::Directory) => false,
            Some(BundleEntry::File(data)) => hashes_match(&content_hash(data), expected),
        };
        if !unchanged {
            continue;
        }
        if path == MANIFEST_PATH {
            manifest_unchanged = true;
        } else {
            bundle.remove(path);
            pruned += 1;
        }
    }

    let remaining = bundle
        .files()
        .filter(|(path, _)| *path != MANIFEST_PATH)
        .count();
    if manifest_unchanged && delete.is_empty() && remaining == 0 {
        tracing::debug!("Bundle matches the installed content");
        return Ok(None);
    }
    if pruned == 0 {
        return Err(BridgeError::NoReusableFiles);
    }

    tracing::debug!(
        "Partial bundle: {} reused, {} shipped, {} deleted",
        pruned,
        remaining,
        delete.len()
    );
    let sentinel = serde_json::to_vec(&PartialManifest { delete })?;
    bundle.insert_file(PARTIAL_MANIFEST_PATH, sentinel)?;
    Ok(Some(bundle))
}

/// [`diff_bundle`], serialized.
pub fn make_partial_bundle(bundle: Bundle, listing: &ContentListing) -> Result<Option<Bytes>> {
    diff_bundle(bundle, listing)?
        .map(|partial| partial.to_zip())
        .transpose()
}

/// Replay a partial bundle on top of the installed one.
pub fn apply_partial_bundle(installed: &Bundle, partial: &Bundle) -> Result<Bundle> {
    let sentinel = PartialManifest::from_bundle(partial)?;

    let target = partial.manifest()?;
    let current = installed.manifest()?;
    if target.app_id != current.app_id {
        return Err(BridgeError::InvalidBundle(format!(
            "partial bundle targets {} but {} is installed",
            target.app_id, current.app_id
        )));
    }

    let mut result = installed.clone();
    for path in &sentinel.delete {
        if path == MANIFEST_PATH {
            continue;
        }
        result.remove(path);
    }
    for (path, entry) in partial.iter() {
        match entry {
            _ if path == PARTIAL_MANIFEST_PATH => {}
            BundleEntry::File(data) => result.insert_file(path, data.clone())?,
            BundleEntry::Directory => result.insert_dir(path)?,
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MANIFEST: &str = r#"{"uuid":"b4ae822e"}"#;

    fn bundle(files: &[(&str, &str)]) -> Bundle {
        let mut bundle = Bundle::new();
        for (path, data) in files {
            bundle.insert_file(path, data.to_string()).unwrap();
        }
        bundle
    }

    fn listing(files: &[(&str, &str)]) -> ContentListing {
        files
            .iter()
            .map(|(path, data)| (path.to_string(), content_hash(data.as_bytes())))
            .collect()
    }

    #[test]
    fn test_identical_content_is_noop() {
        let files = [(MANIFEST_PATH, MANIFEST), ("a.js", "a"), ("b.js", "b")];
        let mut b = bundle(&files);
        b.insert_dir("lib").unwrap();

        assert_eq!(diff_bundle(b, &listing(&files)).unwrap(), None);
        assert_eq!(
            make_partial_bundle(bundle(&files), &listing(&files)).unwrap(),
            None
        );
    }

    #[test]
    fn test_nothing_reusable() {
        let b = bundle(&[(MANIFEST_PATH, MANIFEST), ("a.js", "new a")]);
        let l = listing(&[(MANIFEST_PATH, "{}"), ("a.js", "old a")]);
        assert!(matches!(diff_bundle(b, &l), Err(BridgeError::NoReusableFiles)));
    }

    #[test]
    fn test_already_partial() {
        let mut b = bundle(&[(MANIFEST_PATH, MANIFEST)]);
        b.insert_file(PARTIAL_MANIFEST_PATH, r#"{"delete":[]}"#).unwrap();
        assert!(matches!(
            diff_bundle(b, &ContentListing::new()),
            Err(BridgeError::AlreadyPartial)
        ));
    }

    #[test]
    fn test_changed_and_new_files_are_shipped() {
        let b = bundle(&[
            (MANIFEST_PATH, MANIFEST),
            ("updated.js", "new"),
            ("new.js", "x"),
            ("same.js", "same"),
        ]);
        let l = listing(&[
            (MANIFEST_PATH, MANIFEST),
            ("updated.js", "old"),
            ("same.js", "same"),
        ]);

        let partial = diff_bundle(b, &l).unwrap().unwrap();
        let paths: Vec<_> = partial.iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![PARTIAL_MANIFEST_PATH, MANIFEST_PATH, "new.js", "updated.js"]
        );
        assert_eq!(
            PartialManifest::from_bundle(&partial).unwrap().delete,
            Vec::<String>::new()
        );
    }

    #[test]
    fn test_missing_paths_are_deleted() {
        let b = bundle(&[(MANIFEST_PATH, MANIFEST), ("a.js", "a")]);
        let l = listing(&[("a.js", "a"), ("prune.js", "p")]);

        let partial = diff_bundle(b, &l).unwrap().unwrap();
        assert_eq!(
            PartialManifest::from_bundle(&partial).unwrap().delete,
            vec!["prune.js".to_string()]
        );
        assert!(!partial.contains("a.js"));
        assert!(partial.contains(MANIFEST_PATH));
    }

    #[test]
    fn test_uppercase_listing_hashes_match() {
        let b = bundle(&[(MANIFEST_PATH, MANIFEST), ("a.js", "a"), ("b.js", "b2")]);
        let mut l = ContentListing::new();
        l.insert("a.js", content_hash(b"a").to_uppercase());
        l.insert("b.js", content_hash(b"b"));

        let partial = diff_bundle(b, &l).unwrap().unwrap();
        assert!(!partial.contains("a.js"));
        assert!(partial.contains("b.js"));
    }

    #[test]
    fn test_manifest_never_deleted() {
        // Listing knows a manifest the bundle lacks; it must not be scheduled.
        let b = bundle(&[("a.js", "a"), ("b.js", "b")]);
        let l = listing(&[(MANIFEST_PATH, MANIFEST), ("a.js", "a")]);

        let partial = diff_bundle(b, &l).unwrap().unwrap();
        assert!(PartialManifest::from_bundle(&partial)
            .unwrap()
            .delete
            .is_empty());
    }

    #[test]
    fn test_apply_rejects_other_app() {
        let installed = bundle(&[(MANIFEST_PATH, r#"{"uuid":"other"}"#)]);
        let partial = bundle(&[
            (MANIFEST_PATH, MANIFEST),
            (PARTIAL_MANIFEST_PATH, r#"{"delete":[]}"#),
        ]);
        assert!(matches!(
            apply_partial_bundle(&installed, &partial),
            Err(BridgeError::InvalidBundle(_))
        ));
        assert!(matches!(
            apply_partial_bundle(&installed, &installed),
            Err(BridgeError::InvalidBundle(_))
        ));
    }

    fn file_set() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::btree_map("[a-e]\\.js", "[xyz]{0,3}", 0..5)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_partial_replays_to_new_bundle(old in file_set(), new in file_set()) {
            let mut installed = Bundle::new();
            installed.insert_file(MANIFEST_PATH, MANIFEST).unwrap();
            for (p, d) in &old {
                installed.insert_file(p, d.clone()).unwrap();
            }
            let mut target = Bundle::new();
            target.insert_file(MANIFEST_PATH, MANIFEST).unwrap();
            for (p, d) in &new {
                target.insert_file(p, d.clone()).unwrap();
            }

            let l = ContentListing::from_bundle(&installed);
            match diff_bundle(target.clone(), &l) {
                Ok(None) => prop_assert_eq!(&installed, &target),
                Ok(Some(partial)) => {
                    let sentinel = PartialManifest::from_bundle(&partial).unwrap();
                    prop_assert!(!sentinel.delete.iter().any(|p| p == MANIFEST_PATH));
                    prop_assert!(partial.contains(MANIFEST_PATH));
                    // Every file that differs from the installed copy is shipped.
                    for (p, data) in target.files() {
                        if installed.get_file(p) != Some(data) {
                            prop_assert_eq!(partial.get_file(p), Some(data));
                        }
                    }
                    prop_assert_eq!(apply_partial_bundle(&installed, &partial).unwrap(), target);
                }
                Err(e) => prop_assert!(matches!(e, BridgeError::NoReusableFiles)),
            }
        }
    }
}
