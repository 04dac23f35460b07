//! Application bundle identity lookup
//!
//! Maps an executable path to the identifier of the `.app` bundle containing
//! it. Lookups are memoized per path, including negative results, so only the
//! first entry from a given executable touches the filesystem.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Maximum number of directories visited while looking for the bundle
pub const MAX_ASCENT: usize = 10;

/// Reads the identifier out of an application bundle directory
pub trait BundleMetadata: Send + Sync {
    fn bundle_identifier(&self, bundle_dir: &Path) -> Option<String>;
}

/// Reads `CFBundleIdentifier` from the bundle's `Info.plist`.
///
/// Both the macOS layout (`Contents/Info.plist`) and the flat iOS layout
/// (`Info.plist` at the bundle root) are checked, in XML or binary form.
#[derive(Clone, Copy, Debug, Default)]
pub struct InfoPlist;

impl InfoPlist {
    const CANDIDATES: [&'static str; 2] = ["Contents/Info.plist", "Info.plist"];

    /// Top-level `CFBundleIdentifier` of a parsed property list
    pub fn identifier(plist: &plist::Value) -> Option<String> {
        plist
            .as_dictionary()?
            .get("CFBundleIdentifier")?
            .as_string()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

impl BundleMetadata for InfoPlist {
    fn bundle_identifier(&self, bundle_dir: &Path) -> Option<String> {
        Self::CANDIDATES
            .iter()
            .map(|rel| bundle_dir.join(rel))
            .filter(|path| path.is_file())
            .find_map(|path| match plist::Value::from_file(&path) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "unreadable Info.plist");
                    None
                }
            })
            .and_then(|value| Self::identifier(&value))
    }
}

/// Walk up from the executable's directory looking for a `.app` directory.
///
/// Empty and relative paths never resolve.
pub fn find_app_bundle(image_path: &str) -> Option<PathBuf> {
    let path = Path::new(image_path);
    if image_path.is_empty() || !path.is_absolute() {
        return None;
    }

    let mut dir = path.parent()?;
    for _ in 0..MAX_ASCENT {
        let is_app = dir
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("app"));
        if is_app {
            return Some(dir.to_path_buf());
        }

        match dir.parent() {
            Some(parent) if parent != dir => dir = parent,
            _ => break,
        }
    }

    None
}

/// Thread-safe, memoizing executable path -> bundle identifier resolver
pub struct BundleIdentityResolver {
    /// Resolved identifiers keyed by the requested image path.
    /// `Some(None)` is a cached negative result.
    cache: Mutex<HashMap<String, Option<String>>>,

    /// Bundle metadata reader
    metadata: Box<dyn BundleMetadata>,

    /// Number of filesystem walks performed
    walks: AtomicU64,
}

static SHARED: OnceLock<Arc<BundleIdentityResolver>> = OnceLock::new();

impl BundleIdentityResolver {
    /// Create a resolver reading `Info.plist` files
    pub fn new() -> Self {
        Self::with_metadata(InfoPlist)
    }

    /// Create a resolver with a custom metadata reader
    pub fn with_metadata(metadata: impl BundleMetadata + 'static) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            metadata: Box::new(metadata),
            walks: AtomicU64::new(0),
        }
    }

    /// Process-wide resolver used when no explicit one is supplied
    pub fn shared() -> Arc<Self> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new())))
    }

    /// Resolve the bundle identifier for an executable path
    pub fn resolve(&self, image_path: &str) -> Option<String> {
        if let Some(hit) = self.cache.lock().get(image_path) {
            return hit.clone();
        }

        // Lock is released while walking; racing misses on the same path do
        // the same work and the first write wins.
        self.walks.fetch_add(1, Ordering::Relaxed);
        let resolved = find_app_bundle(image_path)
            .and_then(|bundle_dir| self.metadata.bundle_identifier(&bundle_dir));

        tracing::debug!(
            image_path,
            bundle_id = resolved.as_deref().unwrap_or("<none>"),
            "resolved bundle identity"
        );

        self.cache
            .lock()
            .entry(image_path.to_string())
            .or_insert(resolved)
            .clone()
    }

    /// Number of filesystem walks performed so far
    pub fn walk_count(&self) -> u64 {
        self.walks.load(Ordering::Relaxed)
    }

    /// Number of memoized paths
    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Default for BundleIdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BundleIdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleIdentityResolver")
            .field("cached", &self.cached_len())
            .field("walks", &self.walk_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Metadata reader that maps bundle directory names to identifiers and
    /// counts how often it is consulted
    #[derive(Default)]
    struct FakeMetadata {
        ids: HashMap<String, String>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeMetadata {
        fn with(mut self, bundle_name: &str, id: &str) -> Self {
            self.ids.insert(bundle_name.to_string(), id.to_string());
            self
        }
    }

    impl BundleMetadata for FakeMetadata {
        fn bundle_identifier(&self, bundle_dir: &Path) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = bundle_dir.file_name()?.to_str()?;
            self.ids.get(name).cloned()
        }
    }

    fn info(id: &str) -> plist::Value {
        let mut dict = plist::Dictionary::new();
        dict.insert("CFBundleName".to_string(), plist::Value::String("Foo".to_string()));
        dict.insert("CFBundleIdentifier".to_string(), plist::Value::String(id.to_string()));
        plist::Value::Dictionary(dict)
    }

    fn write_plist(bundle_dir: &Path, rel: &str, id: &str) {
        let path = bundle_dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        plist::to_file_xml(&path, &info(id)).unwrap();
    }

    fn write_binary_plist(bundle_dir: &Path, rel: &str, id: &str) {
        let path = bundle_dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        plist::to_file_binary(&path, &info(id)).unwrap();
    }

    #[test]
    fn test_find_app_bundle_flat_layout() {
        assert_eq!(
            find_app_bundle("/Applications/Foo.app/Foo"),
            Some(PathBuf::from("/Applications/Foo.app"))
        );
    }

    #[test]
    fn test_find_app_bundle_nested_layout() {
        assert_eq!(
            find_app_bundle("/Applications/Foo.app/Contents/MacOS/Foo"),
            Some(PathBuf::from("/Applications/Foo.app"))
        );
    }

    #[test]
    fn test_find_app_bundle_is_case_insensitive() {
        assert_eq!(
            find_app_bundle("/Applications/Foo.APP/Foo"),
            Some(PathBuf::from("/Applications/Foo.APP"))
        );
    }

    #[test]
    fn test_find_app_bundle_ignores_executable_name() {
        // The executable itself is stripped before the walk starts
        assert_eq!(find_app_bundle("/usr/libexec/tool.app"), None);
    }

    #[test]
    fn test_find_app_bundle_stops_at_root() {
        assert_eq!(find_app_bundle("/usr/libexec/logd"), None);
        assert_eq!(find_app_bundle("/logd"), None);
    }

    #[test]
    fn test_find_app_bundle_respects_ascent_bound() {
        let deep = format!("/Deep.app{}/bin", "/d".repeat(MAX_ASCENT));
        assert_eq!(find_app_bundle(&deep), None);

        let shallow = format!("/Deep.app{}/bin", "/d".repeat(MAX_ASCENT - 1));
        assert_eq!(find_app_bundle(&shallow), Some(PathBuf::from("/Deep.app")));
    }

    #[test]
    fn test_find_app_bundle_rejects_malformed_paths() {
        assert_eq!(find_app_bundle(""), None);
        assert_eq!(find_app_bundle("Foo.app/Foo"), None);
        assert_eq!(find_app_bundle("/"), None);
    }

    #[test]
    fn test_identifier_reads_top_level_key_only() {
        assert_eq!(
            InfoPlist::identifier(&info(" com.example.app ")),
            Some("com.example.app".to_string())
        );
        assert_eq!(InfoPlist::identifier(&info("")), None);
        assert_eq!(InfoPlist::identifier(&plist::Value::Boolean(true)), None);

        let mut outer = plist::Dictionary::new();
        outer.insert("NSExtension".to_string(), info("com.example.nested"));
        assert_eq!(InfoPlist::identifier(&plist::Value::Dictionary(outer)), None);
    }

    #[test]
    fn test_info_plist_reads_binary_format() {
        let root = tempfile::tempdir().unwrap();
        let bundle = root.path().join("Binary.app");
        write_binary_plist(&bundle, "Info.plist", "com.example.binary");

        assert_eq!(
            InfoPlist.bundle_identifier(&bundle),
            Some("com.example.binary".to_string())
        );
    }

    #[test]
    fn test_info_plist_decodes_xml_entities() {
        let root = tempfile::tempdir().unwrap();
        let bundle = root.path().join("Entity.app");
        fs::create_dir_all(&bundle).unwrap();
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>CFBundleIdentifier</key>
    <string>com.example.a&amp;b</string>
</dict>
</plist>"#;
        fs::write(bundle.join("Info.plist"), xml).unwrap();

        assert_eq!(
            InfoPlist.bundle_identifier(&bundle),
            Some("com.example.a&b".to_string())
        );
    }

    #[test]
    fn test_info_plist_garbage_is_negative() {
        let root = tempfile::tempdir().unwrap();
        let bundle = root.path().join("Broken.app");
        fs::create_dir_all(&bundle).unwrap();
        fs::write(bundle.join("Info.plist"), "not a plist").unwrap();

        assert_eq!(InfoPlist.bundle_identifier(&bundle), None);
    }

    #[test]
    fn test_info_plist_reads_both_layouts() {
        let root = tempfile::tempdir().unwrap();

        let mac = root.path().join("Mac.app");
        write_plist(&mac, "Contents/Info.plist", "com.example.mac");
        let ios = root.path().join("Phone.app");
        write_plist(&ios, "Info.plist", "com.example.phone");
        let empty = root.path().join("Empty.app");
        fs::create_dir_all(&empty).unwrap();

        assert_eq!(InfoPlist.bundle_identifier(&mac), Some("com.example.mac".to_string()));
        assert_eq!(InfoPlist.bundle_identifier(&ios), Some("com.example.phone".to_string()));
        assert_eq!(InfoPlist.bundle_identifier(&empty), None);
    }

    #[test]
    fn test_resolve_from_disk() {
        let root = tempfile::tempdir().unwrap();
        let bundle = root.path().join("Foo.app");
        write_plist(&bundle, "Contents/Info.plist", "com.example.app");
        let exe = bundle.join("Contents/MacOS/Foo");

        let resolver = BundleIdentityResolver::new();
        assert_eq!(
            resolver.resolve(exe.to_str().unwrap()),
            Some("com.example.app".to_string())
        );
    }

    #[test]
    fn test_resolve_memoizes_positive_and_negative() {
        let metadata = FakeMetadata::default().with("Foo.app", "com.example.app");
        let calls = Arc::clone(&metadata.calls);
        let resolver = BundleIdentityResolver::with_metadata(metadata);

        for _ in 0..3 {
            assert_eq!(
                resolver.resolve("/Applications/Foo.app/Foo"),
                Some("com.example.app".to_string())
            );
            assert_eq!(resolver.resolve("/usr/sbin/daemon"), None);
            assert_eq!(resolver.resolve("/Applications/Bar.app/Bar"), None);
        }

        assert_eq!(resolver.walk_count(), 3);
        assert_eq!(resolver.cached_len(), 3);
        // Only the two paths that contain a bundle reach the metadata reader
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_resolve_keys_on_image_path() {
        let metadata = FakeMetadata::default().with("Foo.app", "com.example.app");
        let resolver = BundleIdentityResolver::with_metadata(metadata);

        resolver.resolve("/Applications/Foo.app/Foo");
        resolver.resolve("/Applications/Foo.app/Helper");

        // Same bundle, different executables: two walks, two cache entries
        assert_eq!(resolver.walk_count(), 2);
        assert_eq!(resolver.cached_len(), 2);
    }

    #[test]
    fn test_concurrent_resolution_converges() {
        let metadata = FakeMetadata::default().with("Foo.app", "com.example.app");
        let resolver = BundleIdentityResolver::with_metadata(metadata);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        assert_eq!(
                            resolver.resolve("/Applications/Foo.app/Foo"),
                            Some("com.example.app".to_string())
                        );
                        assert_eq!(resolver.resolve("/bin/sh"), None);
                    }
                });
            }
        });

        assert_eq!(resolver.cached_len(), 2);
        // Racing misses may walk more than once, never once per lookup
        assert!(resolver.walk_count() >= 2);
        assert!(resolver.walk_count() <= 16);
    }

    #[test]
    fn test_shared_resolver_is_one_instance() {
        let a = BundleIdentityResolver::shared();
        let b = BundleIdentityResolver::shared();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
