use super::bindings::{Bindings, FieldCapture};
use crate::field::PatternField;
use crate::message::Request;
use crate::recording::{Recording, RequestPattern};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEPTH: usize = PatternField::ALL.len();

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid {field} pattern '{pattern}': {source}")]
    InvalidPattern {
        field: PatternField,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Compile a pattern field the way the tree does, with `.` matching newlines.
pub fn compile_field_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).dot_matches_new_line(true).build()
}

/// A recording reached by a search, with the captures taken on the way.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub recording: Arc<Recording>,
    pub bindings: Bindings,
}

#[derive(Debug, Clone)]
struct Node {
    source: String,
    regex: Regex,
    children: Vec<Arc<Node>>,
    recording: Option<Arc<Recording>>,
}

#[derive(Debug, Default)]
struct Root {
    children: Vec<Arc<Node>>,
    len: usize,
}

/// Recordings indexed by their eight pattern sources.
///
/// Searches load the current root and walk it without locking. Writers are
/// serialized, copy the nodes along the path they change and publish a new
/// root in one store, so a search sees either the old tree or the new one.
#[derive(Debug, Default)]
pub struct MatchTree {
    root: ArcSwap<Root>,
    write_lock: Mutex<()>,
}

impl MatchTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a recording, replacing any recording with identical pattern
    /// sources. Returns the replaced recording.
    ///
    /// A pattern that fails to compile leaves the tree unchanged.
    pub fn insert(&self, recording: Recording) -> Result<Option<Arc<Recording>>, CacheError> {
        self.insert_shared(Arc::new(recording))
    }

    /// [`Self::insert`] for a recording that is already shared.
    pub fn insert_shared(
        &self,
        recording: Arc<Recording>,
    ) -> Result<Option<Arc<Recording>>, CacheError> {
        let regexes = compile_pattern(&recording.pattern)?;
        let _guard = self.write_lock.lock();
        let current = self.root.load_full();
        let (children, replaced) = insert_level(&current.children, 0, &regexes, recording.clone());
        let len = current.len + usize::from(replaced.is_none());
        self.root.store(Arc::new(Root { children, len }));

        match &replaced {
            Some(previous) => info!(
                "Recording {} replaced {} with an identical pattern",
                recording.name(),
                previous.name()
            ),
            None => debug!("Added recording {} to match tree", recording.name()),
        }
        Ok(replaced)
    }

    /// Every recording whose eight field regexes all find a match in the
    /// request, in tree order.
    pub fn search(&self, request: &Request) -> Vec<SearchResult> {
        let root = self.root.load();
        let mut results = Vec::new();
        let mut bindings = Bindings::default();
        for child in &root.children {
            search_node(child, 0, request, &mut bindings, &mut results);
        }
        debug!("Found {} matching recording(s) for {}", results.len(), request);
        results
    }

    /// The recording stored under exactly these pattern sources.
    pub fn find_exact(&self, pattern: &RequestPattern) -> Option<Arc<Recording>> {
        let root = self.root.load();
        let mut children = &root.children;
        let mut found = None;
        for field in PatternField::ALL {
            let node = children.iter().find(|node| node.source == pattern.get(field))?;
            children = &node.children;
            found = node.recording.clone();
        }
        found
    }

    /// All recordings in tree order.
    pub fn recordings(&self) -> Vec<Arc<Recording>> {
        let root = self.root.load();
        let mut out = Vec::with_capacity(root.len);
        collect(&root.children, &mut out);
        out
    }

    /// Replace the whole content with `recordings`. Recordings whose
    /// patterns fail to compile are logged and skipped. Returns how many
    /// recordings the new tree holds.
    pub fn replace_all<I>(&self, recordings: I) -> usize
    where
        I: IntoIterator<Item = Recording>,
    {
        let mut children = Vec::new();
        let mut len = 0;
        for recording in recordings {
            let regexes = match compile_pattern(&recording.pattern) {
                Ok(regexes) => regexes,
                Err(e) => {
                    warn!("Skipping recording {}: {}", recording.name(), e);
                    continue;
                }
            };
            let name = recording.name().to_string();
            let (next, replaced) = insert_level(&children, 0, &regexes, Arc::new(recording));
            children = next;
            match replaced {
                Some(previous) => warn!(
                    "Recording {} has the same pattern as {} and replaces it",
                    name,
                    previous.name()
                ),
                None => len += 1,
            }
        }
        let _guard = self.write_lock.lock();
        self.root.store(Arc::new(Root { children, len }));
        info!("Match tree now holds {} recording(s)", len);
        len
    }

    /// Drop every recording.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.root.store(Arc::new(Root::default()));
    }

    /// Number of indexed recordings.
    pub fn len(&self) -> usize {
        self.root.load().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn compile_pattern(pattern: &RequestPattern) -> Result<Vec<Regex>, CacheError> {
    pattern
        .sources()
        .map(|(field, source)| {
            compile_field_regex(source).map_err(|source_error| CacheError::InvalidPattern {
                field,
                pattern: source.to_string(),
                source: source_error,
            })
        })
        .collect()
}

/// Rebuild `children` with `recording` placed below them. Only the nodes on
/// the recording's path are copied; every other subtree is shared.
fn insert_level(
    children: &[Arc<Node>],
    depth: usize,
    regexes: &[Regex],
    recording: Arc<Recording>,
) -> (Vec<Arc<Node>>, Option<Arc<Recording>>) {
    let source = recording.pattern.get(PatternField::ALL[depth]).to_string();
    let mut next = children.to_vec();
    let position = next.iter().position(|node| node.source == source);
    let mut node = match position {
        Some(index) => Node::clone(&next[index]),
        None => Node {
            source,
            regex: regexes[depth].clone(),
            children: Vec::new(),
            recording: None,
        },
    };

    let replaced = if depth + 1 == DEPTH {
        node.recording.replace(recording)
    } else {
        let (grandchildren, replaced) = insert_level(&node.children, depth + 1, regexes, recording);
        node.children = grandchildren;
        replaced
    };

    match position {
        Some(index) => next[index] = Arc::new(node),
        None => next.push(Arc::new(node)),
    }
    (next, replaced)
}

fn search_node(
    node: &Node,
    depth: usize,
    request: &Request,
    bindings: &mut Bindings,
    results: &mut Vec<SearchResult>,
) {
    let field = PatternField::ALL[depth];
    let Some(captures) = node.regex.captures(field.value(request)) else {
        return;
    };
    bindings.bind_shared(field, Arc::new(FieldCapture::from_captures(&node.regex, &captures)));

    if let Some(recording) = &node.recording {
        results.push(SearchResult {
            recording: recording.clone(),
            bindings: bindings.clone(),
        });
    }
    for child in &node.children {
        search_node(child, depth + 1, request, bindings, results);
    }
    bindings.unbind(field);
}

fn collect(children: &[Arc<Node>], out: &mut Vec<Arc<Recording>>) {
    for node in children {
        if let Some(recording) = &node.recording {
            out.push(recording.clone());
        }
        collect(&node.children, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::ResponseTemplate;
    use proptest::prelude::*;

    fn recording(pattern: RequestPattern, body: &str) -> Recording {
        Recording::new(pattern, vec![ResponseTemplate::new("200", "", body)])
    }

    fn get(path: &str) -> Request {
        Request::builder()
            .host("example.com")
            .path(path)
            .method("GET")
            .build()
    }

    fn body(result: &SearchResult) -> &str {
        result.recording.responses[0].content()
    }

    #[test]
    fn test_literal_request_finds_its_recording() {
        let tree = MatchTree::new();
        let request = get("/x");
        tree.insert(recording(RequestPattern::from_request(&request), "ok"))
            .unwrap();
        let results = tree.search(&request);
        assert_eq!(results.len(), 1);
        assert_eq!(body(&results[0]), "ok");
        assert!(tree.search(&get("/y")).is_empty());
    }

    #[test]
    fn test_identical_sources_last_write_wins() {
        let tree = MatchTree::new();
        let pattern = RequestPattern::default().with(PatternField::Path, "^/x$");
        assert!(tree.insert(recording(pattern.clone(), "first")).unwrap().is_none());
        let replaced = tree.insert(recording(pattern, "second")).unwrap();
        assert_eq!(replaced.unwrap().responses[0].content(), "first");

        assert_eq!(tree.len(), 1);
        let results = tree.search(&get("/x"));
        assert_eq!(results.len(), 1);
        assert_eq!(body(&results[0]), "second");
    }

    #[test]
    fn test_search_is_unanchored_unless_pattern_anchors() {
        let tree = MatchTree::new();
        tree.insert(recording(
            RequestPattern::default().with(PatternField::Path, "items"),
            "loose",
        ))
        .unwrap();
        assert_eq!(tree.search(&get("/v1/items/3")).len(), 1);
    }

    #[test]
    fn test_dot_matches_newline_in_content() {
        let tree = MatchTree::new();
        tree.insert(recording(
            RequestPattern::default().with(PatternField::Content, "^a.b$"),
            "ok",
        ))
        .unwrap();
        let request = Request::builder().content("a\nb").build();
        assert_eq!(tree.search(&request).len(), 1);
    }

    #[test]
    fn test_multiple_matches_and_bindings() {
        let tree = MatchTree::new();
        tree.insert(recording(
            RequestPattern::default().with(PatternField::Path, "^/items/(?<id>[0-9]+)$"),
            "by id",
        ))
        .unwrap();
        tree.insert(recording(
            RequestPattern::default()
                .with(PatternField::Path, "^/items/(?<id>[0-9]+)$")
                .with(PatternField::Method, "^GET$"),
            "get by id",
        ))
        .unwrap();

        let results = tree.search(&get("/items/42"));
        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.bindings.lookup("id"), Some("42"));
            assert_eq!(result.bindings.lookup("PATH:id"), Some("42"));
            assert!(result.bindings.field(PatternField::Host).is_some());
        }
    }

    #[test]
    fn test_bindings_do_not_leak_between_branches() {
        let tree = MatchTree::new();
        tree.insert(recording(
            RequestPattern::default().with(PatternField::Host, "(?<name>example)"),
            "a",
        ))
        .unwrap();
        tree.insert(recording(RequestPattern::default(), "b")).unwrap();

        let results = tree.search(&get("/"));
        let b = results.iter().find(|r| body(r) == "b").unwrap();
        assert_eq!(b.bindings.lookup("name"), None);
    }

    #[test]
    fn test_invalid_pattern_leaves_tree_unchanged() {
        let tree = MatchTree::new();
        tree.insert(recording(RequestPattern::default(), "kept")).unwrap();
        let err = tree
            .insert(recording(
                RequestPattern::default().with(PatternField::Query, "(unclosed"),
                "bad",
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::InvalidPattern {
                field: PatternField::Query,
                ..
            }
        ));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_find_exact() {
        let tree = MatchTree::new();
        let pattern = RequestPattern::default().with(PatternField::Path, "^/x$");
        tree.insert(recording(pattern.clone(), "x")).unwrap();
        assert!(tree.find_exact(&pattern).is_some());
        let looser = RequestPattern::default().with(PatternField::Path, "/x");
        assert!(tree.find_exact(&looser).is_none());
    }

    #[test]
    fn test_replace_all_and_clear() {
        let tree = MatchTree::new();
        tree.insert(recording(RequestPattern::default(), "old")).unwrap();

        let loaded = tree.replace_all(vec![
            recording(RequestPattern::default().with(PatternField::Path, "^/a$"), "a"),
            recording(RequestPattern::default().with(PatternField::Path, "("), "broken"),
            recording(RequestPattern::default().with(PatternField::Path, "^/b$"), "b"),
        ]);
        assert_eq!(loaded, 2);
        let bodies: Vec<String> = tree
            .recordings()
            .iter()
            .map(|r| r.responses[0].content().to_string())
            .collect();
        assert_eq!(bodies, vec!["a", "b"]);

        tree.clear();
        assert!(tree.is_empty());
        assert!(tree.recordings().is_empty());
    }

    #[test]
    fn test_snapshot_unaffected_by_later_insert() {
        let tree = MatchTree::new();
        tree.insert(recording(RequestPattern::default(), "first")).unwrap();
        let before = tree.root.load_full();
        tree.insert(recording(
            RequestPattern::default().with(PatternField::Path, "^/new$"),
            "second",
        ))
        .unwrap();
        let mut out = Vec::new();
        collect(&before.children, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(tree.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_literal_recording_is_found(
            host in "[a-z.]{1,12}",
            path in "/[ -~]{0,20}",
            query in "[ -~]{0,12}",
            content in "(?s).{0,40}",
        ) {
            let request = Request::builder()
                .host(host)
                .path(path)
                .query(query)
                .content(content)
                .build();
            let tree = MatchTree::new();
            tree.insert(recording(RequestPattern::from_request(&request), "hit")).unwrap();
            let results = tree.search(&request);
            prop_assert_eq!(results.len(), 1);
        }
    }
}
