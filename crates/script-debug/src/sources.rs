//! Source store.
//! - SourceStore: chunk-name resolution cache and virtual source contents
//! - SourceCache: default store, insertion ordered for `loadedSources`
//! - SourceOrigin::file: resolve a `@path` chunk through the path mapping

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::path::{path_key, PathReconciler};
use crate::protocol::Source;

/// Where a chunk's text lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    /// Loaded from a file; `client` is the mapped path.
    File {
        server: String,
        client: String,
        skipped: bool,
    },
    /// Loaded from a string; `code` is served through `source`.
    Virtual { name: String, code: String },
}

impl SourceOrigin {
    /// File origin of a `@path` chunk under the given mapping.
    #[must_use]
    pub fn file(paths: &PathReconciler, chunk: &[u8]) -> Option<Self> {
        let server = paths.source_to_server(chunk)?;
        let client = paths.server_to_client(&server);
        let skipped = paths.is_skipped(&server, &client);
        Some(Self::File {
            server,
            client,
            skipped,
        })
    }
}

/// Resolution of a chunk name, cached for the hook fast path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub source: Source,
    /// Breakpoint table key.
    pub key: String,
    pub skipped: bool,
    pub server: Option<String>,
}

pub trait SourceStore: Send + Sync {
    fn lookup(&self, chunk: &[u8]) -> Option<Arc<ResolvedSource>>;

    /// Cache a resolution; the flag is `true` the first time a source is seen.
    fn register(&mut self, chunk: &[u8], origin: SourceOrigin) -> (Arc<ResolvedSource>, bool);

    fn content(&self, reference: u32) -> Option<String>;

    /// Every distinct source seen so far, in discovery order.
    fn loaded(&self) -> Vec<Source>;

    /// Re-resolve file chunks after the path mapping changed.
    ///
    /// Virtual sources keep their references and contents. Returns each
    /// source whose client path moved, once.
    fn remap(
        &mut self,
        resolve: &dyn Fn(&[u8]) -> Option<SourceOrigin>,
    ) -> Vec<Arc<ResolvedSource>>;
}

/// Default `SourceStore`.
#[derive(Debug, Default)]
pub struct SourceCache {
    by_chunk: IndexMap<Vec<u8>, Arc<ResolvedSource>>,
    keys: FxHashSet<String>,
    contents: FxHashMap<u32, String>,
    next_reference: u32,
}

impl SourceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn file_source(server: String, client: &str, skipped: bool) -> ResolvedSource {
    ResolvedSource {
        source: Source {
            name: Some(file_name(client)),
            path: Some(client.to_string()),
            source_reference: None,
        },
        key: path_key(client),
        skipped,
        server: Some(server),
    }
}

/// Key used for breakpoints in a virtual source.
#[must_use]
pub fn reference_key(reference: u32) -> String {
    format!("ref:{reference}")
}

impl SourceStore for SourceCache {
    fn lookup(&self, chunk: &[u8]) -> Option<Arc<ResolvedSource>> {
        self.by_chunk.get(chunk).cloned()
    }

    fn register(&mut self, chunk: &[u8], origin: SourceOrigin) -> (Arc<ResolvedSource>, bool) {
        if let Some(existing) = self.by_chunk.get(chunk) {
            return (Arc::clone(existing), false);
        }
        let resolved = match origin {
            SourceOrigin::File {
                server,
                client,
                skipped,
            } => file_source(server, &client, skipped),
            SourceOrigin::Virtual { name, code } => {
                self.next_reference += 1;
                let reference = self.next_reference;
                self.contents.insert(reference, code);
                ResolvedSource {
                    source: Source {
                        name: Some(name),
                        path: None,
                        source_reference: Some(reference),
                    },
                    key: reference_key(reference),
                    skipped: false,
                    server: None,
                }
            }
        };
        let created = self.keys.insert(resolved.key.clone());
        let resolved = Arc::new(resolved);
        self.by_chunk.insert(chunk.to_vec(), Arc::clone(&resolved));
        (resolved, created)
    }

    fn content(&self, reference: u32) -> Option<String> {
        self.contents.get(&reference).cloned()
    }

    fn loaded(&self) -> Vec<Source> {
        let mut seen = FxHashSet::default();
        self.by_chunk
            .values()
            .filter(|resolved| seen.insert(resolved.key.as_str()))
            .map(|resolved| resolved.source.clone())
            .collect()
    }

    fn remap(
        &mut self,
        resolve: &dyn Fn(&[u8]) -> Option<SourceOrigin>,
    ) -> Vec<Arc<ResolvedSource>> {
        let mut moved = Vec::new();
        let mut reported = FxHashSet::default();
        for (chunk, resolved) in &mut self.by_chunk {
            if resolved.server.is_none() {
                continue;
            }
            let Some(SourceOrigin::File {
                server,
                client,
                skipped,
            }) = resolve(chunk)
            else {
                continue;
            };
            let updated = file_source(server, &client, skipped);
            if updated == **resolved {
                continue;
            }
            let path_moved = updated.source.path != resolved.source.path;
            *resolved = Arc::new(updated);
            if path_moved && reported.insert(resolved.key.clone()) {
                self.keys.insert(resolved.key.clone());
                moved.push(Arc::clone(resolved));
            }
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::{SourceCache, SourceOrigin, SourceStore};
    use crate::config::DebugConfig;
    use crate::path::PathReconciler;

    fn file(client: &str) -> SourceOrigin {
        SourceOrigin::File {
            server: client.to_string(),
            client: client.to_string(),
            skipped: false,
        }
    }

    #[test]
    fn files_resolve_once_per_chunk() {
        let mut cache = SourceCache::new();
        let (first, created) = cache.register(b"@/src/a.lua", file("/src/a.lua"));
        assert!(created);
        assert_eq!(first.source.name.as_deref(), Some("a.lua"));
        let (again, created) = cache.register(b"@/src/a.lua", file("/other.lua"));
        assert!(!created);
        assert_eq!(again.source.path.as_deref(), Some("/src/a.lua"));
        assert!(cache.lookup(b"@/src/a.lua").is_some());
        assert!(cache.lookup(b"@/src/b.lua").is_none());
    }

    #[test]
    fn chunks_sharing_a_client_path_are_one_source() {
        let mut cache = SourceCache::new();
        cache.register(b"@/src/a.lua", file("/src/a.lua"));
        let (_, created) = cache.register(b"@./a.lua", file("/src/a.lua"));
        assert!(!created);
        assert_eq!(cache.loaded().len(), 1);
    }

    #[test]
    fn virtual_sources_get_references_and_content() {
        let mut cache = SourceCache::new();
        let (resolved, created) = cache.register(
            b"return 1",
            SourceOrigin::Virtual {
                name: "return 1".to_string(),
                code: "return 1".to_string(),
            },
        );
        assert!(created);
        let reference = resolved.source.source_reference.expect("reference");
        assert_eq!(resolved.key, format!("ref:{reference}"));
        assert_eq!(cache.content(reference).as_deref(), Some("return 1"));
    }

    #[test]
    fn remapping_moves_files_and_keeps_virtual_references() {
        let mut cache = SourceCache::new();
        let plain = PathReconciler::default();
        let chunk: &[u8] = b"@/srv/a.lua";
        let origin = SourceOrigin::file(&plain, chunk).expect("file chunk");
        cache.register(chunk, origin);
        cache.register(b"@/srv/./a.lua", file("/srv/a.lua"));
        let (inline, _) = cache.register(
            b"return 1",
            SourceOrigin::Virtual {
                name: "return 1".to_string(),
                code: "return 1".to_string(),
            },
        );
        let reference = inline.source.source_reference.expect("reference");

        // Same mapping: nothing moves.
        assert!(cache
            .remap(&|chunk| SourceOrigin::file(&plain, chunk))
            .is_empty());

        let config = DebugConfig {
            source_maps: vec![("/srv/".to_string(), "/home/dev/".to_string())],
            ..DebugConfig::default()
        };
        let mapped = PathReconciler::new(&config).expect("mapping");
        let moved = cache.remap(&|chunk| SourceOrigin::file(&mapped, chunk));
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].source.path.as_deref(), Some("/home/dev/a.lua"));
        assert_eq!(moved[0].server.as_deref(), Some("/srv/a.lua"));
        assert_eq!(
            cache.lookup(chunk).and_then(|resolved| resolved.source.path.clone()),
            Some("/home/dev/a.lua".to_string())
        );

        assert_eq!(cache.content(reference).as_deref(), Some("return 1"));
        assert_eq!(
            cache.lookup(b"return 1").map(|resolved| resolved.key.clone()),
            Some(format!("ref:{reference}"))
        );
        let (_, created) = cache.register(b"@/home/dev/a.lua", file("/home/dev/a.lua"));
        assert!(!created);
    }
}
