//! Path reconciliation between the debugged process and the client.
//! - PathReconciler: immutable snapshot built from a `DebugConfig`
//! - source_to_server/server_to_client/source_to_client: chunk name mapping
//! - client_relative: workspace-relative display paths
//! - is_skipped: skipFiles matching
//! - exception_message: rewrite `file:line:` prefixes
//! - normalize_path/path_key: canonical path forms

use glob::{MatchOptions, Pattern};

use crate::config::DebugConfig;
use crate::encoding::TextEncoding;
use crate::error::ConfigError;

const SKIP_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum RuleKind {
    Prefix,
    Wildcard {
        server_head: String,
        server_tail: String,
        client_head: String,
        client_tail: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceMapRule {
    server: String,
    client: String,
    kind: RuleKind,
}

impl SourceMapRule {
    fn parse(server: &str, client: &str) -> Result<Self, ConfigError> {
        let invalid = |reason| ConfigError::InvalidSourceMap {
            server: server.to_string(),
            reason,
        };
        let server_path = normalize_path(server);
        let client_path = normalize_path(client);
        if server_path.is_empty() {
            return Err(invalid("server prefix is empty"));
        }
        if client_path.is_empty() {
            return Err(invalid("client prefix is empty"));
        }
        let server_stars = server_path.matches('*').count();
        let client_stars = client_path.matches('*').count();
        if server_stars > 1 || client_stars > 1 {
            return Err(invalid("at most one '*' is allowed"));
        }
        if server_stars != client_stars {
            return Err(invalid("'*' must appear on both sides"));
        }
        let kind = match (server_path.split_once('*'), client_path.split_once('*')) {
            (Some((server_head, server_tail)), Some((client_head, client_tail))) => {
                RuleKind::Wildcard {
                    server_head: server_head.to_string(),
                    server_tail: server_tail.to_string(),
                    client_head: client_head.to_string(),
                    client_tail: client_tail.to_string(),
                }
            }
            _ => RuleKind::Prefix,
        };
        Ok(Self {
            server: server_path,
            client: client_path,
            kind,
        })
    }

    /// Literal characters of the server pattern; longer rules are more specific.
    fn specificity(&self) -> usize {
        match &self.kind {
            RuleKind::Prefix => self.server.len(),
            RuleKind::Wildcard {
                server_head,
                server_tail,
                ..
            } => server_head.len() + server_tail.len(),
        }
    }

    fn apply(&self, path: &str) -> Option<String> {
        match &self.kind {
            RuleKind::Prefix => {
                let rest = strip_prefix_at_boundary(path, &self.server)?;
                Some(join_mapped(&self.client, rest))
            }
            RuleKind::Wildcard {
                server_head,
                server_tail,
                client_head,
                client_tail,
            } => {
                let rest = path.strip_prefix(server_head.as_str())?;
                let (captured, remainder) = if server_tail.is_empty() {
                    (rest, "")
                } else {
                    let index = rest.find(server_tail.as_str())?;
                    let after = &rest[index + server_tail.len()..];
                    if !server_tail.ends_with('/') && !after.is_empty() && !after.starts_with('/')
                    {
                        return None;
                    }
                    (&rest[..index], after)
                };
                let mapped = format!("{client_head}{captured}{client_tail}");
                Some(join_mapped(&mapped, remainder))
            }
        }
    }
}

/// Immutable path mapping snapshot.
#[derive(Debug, Clone)]
pub struct PathReconciler {
    rules: Vec<SourceMapRule>,
    skip: Vec<Pattern>,
    workspace_folder: Option<String>,
    cwd: Option<String>,
    source_coding: TextEncoding,
    console_coding: TextEncoding,
}

impl Default for PathReconciler {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            skip: Vec::new(),
            workspace_folder: None,
            cwd: None,
            source_coding: TextEncoding::Utf8,
            console_coding: TextEncoding::Utf8,
        }
    }
}

impl PathReconciler {
    /// Build a reconciler, rejecting malformed rules or patterns.
    pub fn new(config: &DebugConfig) -> Result<Self, ConfigError> {
        let mut rules = config
            .source_maps
            .iter()
            .map(|(server, client)| SourceMapRule::parse(server, client))
            .collect::<Result<Vec<_>, _>>()?;
        // Stable sort keeps configuration order among equally specific rules.
        rules.sort_by_key(|rule| std::cmp::Reverse(rule.specificity()));

        let skip = config
            .skip_files
            .iter()
            .map(|pattern| {
                Pattern::new(&normalize_path(pattern)).map_err(|source| {
                    ConfigError::InvalidSkipPattern {
                        pattern: pattern.clone(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules,
            skip,
            workspace_folder: config
                .workspace_folder
                .as_deref()
                .map(normalize_path)
                .filter(|folder| !folder.is_empty()),
            cwd: config
                .cwd
                .as_deref()
                .map(normalize_path)
                .filter(|cwd| !cwd.is_empty()),
            source_coding: config.source_coding,
            console_coding: config.console_coding,
        })
    }

    #[must_use]
    pub fn console_coding(&self) -> TextEncoding {
        self.console_coding
    }

    #[must_use]
    pub fn source_coding(&self) -> TextEncoding {
        self.source_coding
    }

    /// Map a chunk name to a server path.
    ///
    /// Only chunks loaded from files (`@path`) have a server path.
    #[must_use]
    pub fn source_to_server(&self, chunk: &[u8]) -> Option<String> {
        let raw = chunk.strip_prefix(b"@")?;
        let decoded = self.source_coding.decode(raw);
        let path = normalize_path(&decoded);
        if path.is_empty() {
            return None;
        }
        Some(self.absolutize(path))
    }

    /// Map a server path to a client path; the first matching rule wins.
    #[must_use]
    pub fn server_to_client(&self, server: &str) -> String {
        let server = normalize_path(server);
        self.rules
            .iter()
            .find_map(|rule| rule.apply(&server))
            .map_or(server, |mapped| normalize_path(&mapped))
    }

    #[must_use]
    pub fn source_to_client(&self, chunk: &[u8]) -> Option<String> {
        self.source_to_server(chunk)
            .map(|server| self.server_to_client(&server))
    }

    /// Strip the workspace folder for display.
    #[must_use]
    pub fn client_relative(&self, client: &str) -> String {
        let Some(folder) = self.workspace_folder.as_deref() else {
            return client.to_string();
        };
        match strip_prefix_at_boundary(client, folder) {
            Some(rest) => {
                let rest = rest.trim_start_matches('/');
                if rest.is_empty() {
                    client.to_string()
                } else {
                    rest.to_string()
                }
            }
            None => client.to_string(),
        }
    }

    /// Whether a location is excluded from stepping and breakpoints.
    #[must_use]
    pub fn is_skipped(&self, server: &str, client: &str) -> bool {
        if self.skip.is_empty() {
            return false;
        }
        let relative = self.client_relative(client);
        self.skip.iter().any(|pattern| {
            pattern.matches_with(client, SKIP_MATCH)
                || pattern.matches_with(server, SKIP_MATCH)
                || pattern.matches_with(&relative, SKIP_MATCH)
        })
    }

    /// Rewrite `file:line:` prefixes of each message line to client paths.
    #[must_use]
    pub fn exception_message(&self, message: &str) -> String {
        message
            .split('\n')
            .map(|line| self.rewrite_location(line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn rewrite_location(&self, line: &str) -> String {
        let indent_len = line.len() - line.trim_start().len();
        let (indent, body) = line.split_at(indent_len);
        let Some((file, line_no, rest)) = split_location(body) else {
            return line.to_string();
        };
        if file.starts_with('[') {
            return line.to_string();
        }
        let server = self.absolutize(normalize_path(file));
        let client = self.server_to_client(&server);
        format!("{indent}{client}:{line_no}:{rest}")
    }

    fn absolutize(&self, path: String) -> String {
        match self.cwd.as_deref() {
            Some(cwd) if !is_absolute(&path) => {
                normalize_path(&format!("{}/{}", cwd.trim_end_matches('/'), path))
            }
            _ => path,
        }
    }
}

fn split_location(text: &str) -> Option<(&str, &str, &str)> {
    // `C:/x.lua:3:` has a drive colon; search for the `:<digits>:` pair instead.
    let bytes = text.as_bytes();
    let mut search = 0;
    while let Some(offset) = text[search..].find(':') {
        let colon = search + offset;
        let digits_end = bytes[colon + 1..]
            .iter()
            .position(|byte| !byte.is_ascii_digit())
            .map_or(bytes.len(), |end| colon + 1 + end);
        if digits_end > colon + 1 && bytes.get(digits_end) == Some(&b':') && colon > 0 {
            return Some((
                &text[..colon],
                &text[colon + 1..digits_end],
                &text[digits_end + 1..],
            ));
        }
        search = colon + 1;
    }
    None
}

fn strip_prefix_at_boundary<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn join_mapped(head: &str, rest: &str) -> String {
    if rest.is_empty() {
        return head.to_string();
    }
    match (head.ends_with('/'), rest.starts_with('/')) {
        (true, true) => format!("{head}{}", &rest[1..]),
        (false, false) => format!("{head}/{rest}"),
        _ => format!("{head}{rest}"),
    }
}

fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || has_drive(path)
}

fn has_drive(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Canonical slash-separated form: `\` becomes `/`, `.` and `..` segments
/// are resolved, drive letters are lowercased. A trailing slash is kept.
#[must_use]
pub fn normalize_path(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    let unified = raw.replace('\\', "/");
    let (root, body) = if has_drive(&unified) {
        let (drive, rest) = unified.split_at(2);
        let rooted = rest.starts_with('/');
        let root = format!("{}{}", drive.to_ascii_lowercase(), if rooted { "/" } else { "" });
        (root, rest.trim_start_matches('/').to_string())
    } else if unified.starts_with('/') {
        ("/".to_string(), unified.trim_start_matches('/').to_string())
    } else {
        (String::new(), unified)
    };
    let trailing = body.ends_with('/') && !body.is_empty();

    let mut segments: Vec<&str> = Vec::new();
    for segment in body.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else if root.is_empty() {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let mut normalized = root;
    normalized.push_str(&segments.join("/"));
    if trailing && !segments.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Lookup key for per-file tables; windows-style paths compare case-insensitively.
#[must_use]
pub fn path_key(path: &str) -> String {
    let normalized = normalize_path(path);
    if has_drive(&normalized) {
        normalized.to_ascii_lowercase()
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_path, path_key, PathReconciler};
    use crate::config::DebugConfig;
    use crate::encoding::TextEncoding;

    fn reconciler(maps: &[(&str, &str)]) -> PathReconciler {
        let config = DebugConfig {
            source_maps: maps
                .iter()
                .map(|(server, client)| ((*server).to_string(), (*client).to_string()))
                .collect(),
            ..DebugConfig::default()
        };
        PathReconciler::new(&config).expect("valid config")
    }

    #[test]
    fn longest_prefix_wins_regardless_of_order() {
        let paths = reconciler(&[("/src/", "c:/proj/"), ("/src/lib/", "c:/vendor/")]);
        assert_eq!(paths.server_to_client("/src/lib/x.lua"), "c:/vendor/x.lua");
        assert_eq!(paths.server_to_client("/src/main.lua"), "c:/proj/main.lua");
        assert_eq!(paths.server_to_client("/other/a.lua"), "/other/a.lua");
    }

    #[test]
    fn prefix_requires_segment_boundary() {
        let paths = reconciler(&[("/src", "/client")]);
        assert_eq!(paths.server_to_client("/src/a.lua"), "/client/a.lua");
        assert_eq!(paths.server_to_client("/srcx/a.lua"), "/srcx/a.lua");
    }

    #[test]
    fn mapping_is_applied_once() {
        let paths = reconciler(&[("/src/", "/src/app/")]);
        let client = paths.source_to_client(b"@/src/a.lua").expect("file chunk");
        assert_eq!(client, "/src/app/a.lua");
        assert_eq!(paths.server_to_client("/src/a.lua"), client);
    }

    #[test]
    fn relative_display_matches_composed_mapping() {
        let config = DebugConfig {
            source_maps: vec![("/srv/game/".to_string(), "c:/work/game/".to_string())],
            workspace_folder: Some("C:\\work".to_string()),
            ..DebugConfig::default()
        };
        let paths = PathReconciler::new(&config).expect("valid config");
        let client = paths.source_to_client(b"@/srv/game/ai/brain.lua").expect("file");
        assert_eq!(client, "c:/work/game/ai/brain.lua");
        let relative = paths.client_relative(&client);
        assert_eq!(relative, "game/ai/brain.lua");
        assert_eq!(paths.client_relative(&relative), relative);
    }

    #[test]
    fn wildcard_substitutes_captured_segment() {
        let paths = reconciler(&[("/pkg/*/lua/", "c:/mods/*/scripts/")]);
        assert_eq!(
            paths.server_to_client("/pkg/net/lua/socket.lua"),
            "c:/mods/net/scripts/socket.lua"
        );
        assert_eq!(paths.server_to_client("/pkg/net/src/x.lua"), "/pkg/net/src/x.lua");
    }

    #[test]
    fn malformed_rules_are_rejected() {
        let config = DebugConfig {
            source_maps: vec![("/a/*".to_string(), "/b/".to_string())],
            ..DebugConfig::default()
        };
        assert!(PathReconciler::new(&config).is_err());
        let config = DebugConfig {
            source_maps: vec![(String::new(), "/b/".to_string())],
            ..DebugConfig::default()
        };
        assert!(PathReconciler::new(&config).is_err());
    }

    #[test]
    fn virtual_chunks_have_no_server_path() {
        let paths = PathReconciler::default();
        assert!(paths.source_to_server(b"=stdin").is_none());
        assert!(paths.source_to_server(b"return 1").is_none());
    }

    #[test]
    fn relative_chunks_resolve_against_cwd() {
        let config = DebugConfig {
            cwd: Some("/home/dev/proj".to_string()),
            ..DebugConfig::default()
        };
        let paths = PathReconciler::new(&config).expect("valid config");
        assert_eq!(
            paths.source_to_server(b"@./scripts/../main.lua").as_deref(),
            Some("/home/dev/proj/main.lua")
        );
    }

    #[test]
    fn chunk_names_are_decoded_with_source_coding() {
        let config = DebugConfig {
            source_coding: TextEncoding::Ansi,
            ..DebugConfig::default()
        };
        let paths = PathReconciler::new(&config).expect("valid config");
        assert_eq!(
            paths.source_to_server(b"@/caf\xE9.lua").as_deref(),
            Some("/caf\u{E9}.lua")
        );
    }

    #[test]
    fn skip_patterns_match_client_and_relative_paths() {
        let config = DebugConfig {
            skip_files: vec!["**/vendor/**".to_string(), "lib/*.lua".to_string()],
            workspace_folder: Some("/ws".to_string()),
            ..DebugConfig::default()
        };
        let paths = PathReconciler::new(&config).expect("valid config");
        assert!(paths.is_skipped("/ws/vendor/json.lua", "/ws/vendor/json.lua"));
        assert!(paths.is_skipped("/ws/lib/util.lua", "/ws/lib/util.lua"));
        assert!(!paths.is_skipped("/ws/main.lua", "/ws/main.lua"));
    }

    #[test]
    fn exception_locations_are_rewritten() {
        let paths = reconciler(&[("/src/", "c:/proj/")]);
        assert_eq!(
            paths.exception_message("/src/a.lua:12: attempt to call a nil value"),
            "c:/proj/a.lua:12: attempt to call a nil value"
        );
        assert_eq!(
            paths.exception_message("[string \"x\"]:1: boom"),
            "[string \"x\"]:1: boom"
        );
        assert_eq!(paths.exception_message("no location"), "no location");
    }

    #[test]
    fn normalization_handles_separators_and_drives() {
        assert_eq!(normalize_path("C:\\Proj\\.\\a\\..\\b.lua"), "c:/Proj/b.lua");
        assert_eq!(normalize_path("/src//lib/"), "/src/lib/");
        assert_eq!(normalize_path("../x.lua"), "../x.lua");
        assert_eq!(path_key("C:/Proj/B.lua"), "c:/proj/b.lua");
        assert_eq!(path_key("/Proj/B.lua"), "/Proj/B.lua");
    }
}
