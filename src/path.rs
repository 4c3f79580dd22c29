use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    fmt,
    rc::Rc,
    str::FromStr,
};

use serde_json::{Map, Value};

use crate::error::{InvalidPathError, PathErrorReason};


/// Property names that must never appear as a path segment.
pub const FORBIDDEN_SEGMENTS: [&str; 3] = ["__proto__", "constructor", "prototype"];

const PATH_CACHE_CAPACITY: usize = 1000;

/// How many `null` placeholders a single write may append to an array.
pub const MAX_INDEX_GAP: usize = 10_000;

thread_local! {
    static PATH_CACHE: RefCell<PathCache> = RefCell::new(PathCache::new(PATH_CACHE_CAPACITY));
}

/// A parsed, dot-separated address into the state tree.
///
/// Segments are shared and immutable, so a `Path` handed out by the parse cache
/// can be cloned freely without any risk of corrupting later lookups.
#[derive(Clone)]
pub struct Path(Rc<PathData>);

struct PathData {
    raw: Box<str>,
    segments: Box<[Box<str>]>,
}

impl Path {
    /// Parses `raw`, consulting the per-thread parse cache first.
    pub fn parse(raw: &str) -> Result<Self, InvalidPathError> {
        if let Some(path) = PATH_CACHE.with(|c| c.borrow().get(raw)) {
            return Ok(path);
        }
        let path = Self::parse_uncached(raw)?;
        PATH_CACHE.with(|c| c.borrow_mut().insert(path.clone()));
        Ok(path)
    }

    fn parse_uncached(raw: &str) -> Result<Self, InvalidPathError> {
        if raw.is_empty() {
            return Err(InvalidPathError::new(raw, PathErrorReason::Empty));
        }
        let mut segments = Vec::new();
        for segment in raw.split('.') {
            if segment.is_empty() {
                return Err(InvalidPathError::new(raw, PathErrorReason::EmptySegment));
            }
            if FORBIDDEN_SEGMENTS.contains(&segment) {
                return Err(InvalidPathError::new(
                    raw,
                    PathErrorReason::Forbidden(segment.to_string()),
                ));
            }
            segments.push(Box::from(segment));
        }
        Ok(Self(Rc::new(PathData {
            raw: Box::from(raw),
            segments: segments.into_boxed_slice(),
        })))
    }

    pub fn as_str(&self) -> &str {
        &self.0.raw
    }
    pub fn segments(&self) -> impl ExactSizeIterator<Item = &str> + DoubleEndedIterator {
        self.0.segments.iter().map(|s| &**s)
    }
    pub fn len(&self) -> usize {
        self.0.segments.len()
    }
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Top-level field this path lives under.
    pub fn first_segment(&self) -> &str {
        &self.0.segments[0]
    }
    pub fn last_segment(&self) -> &str {
        &self.0.segments[self.0.segments.len() - 1]
    }

    /// The path of the containing value, or `None` for a top-level field.
    pub fn parent(&self) -> Option<Path> {
        let raw = self.as_str();
        let end = raw.rfind('.')?;
        Some(Self::from_valid_parts(
            &raw[..end],
            &self.0.segments[..self.0.segments.len() - 1],
        ))
    }

    fn from_valid_parts(raw: &str, segments: &[Box<str>]) -> Self {
        Self(Rc::new(PathData {
            raw: Box::from(raw),
            segments: segments.to_vec().into_boxed_slice(),
        }))
    }

    /// Returns true if `other` equals this path or lies in the subtree below it.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.0.segments.starts_with(&self.0.segments)
    }

    fn index_at(&self, segment: &str) -> Result<usize, InvalidPathError> {
        parse_index(segment).ok_or_else(|| {
            InvalidPathError::new(
                self.as_str(),
                PathErrorReason::ExpectedIndex(segment.to_string()),
            )
        })
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.0.raw == other.0.raw
    }
}
impl Eq for Path {}

impl std::hash::Hash for Path {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.raw.hash(state);
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({:?})", self.as_str())
    }
}
impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Path {
    type Err = InvalidPathError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Conversion into a [`Path`] for the path-taking store operations.
pub trait AsPath {
    fn to_path(&self) -> Result<Path, InvalidPathError>;
}

impl AsPath for Path {
    fn to_path(&self) -> Result<Path, InvalidPathError> {
        Ok(self.clone())
    }
}
impl AsPath for &Path {
    fn to_path(&self) -> Result<Path, InvalidPathError> {
        Ok((*self).clone())
    }
}
impl AsPath for &str {
    fn to_path(&self) -> Result<Path, InvalidPathError> {
        Path::parse(self)
    }
}
impl AsPath for String {
    fn to_path(&self) -> Result<Path, InvalidPathError> {
        Path::parse(self)
    }
}
impl AsPath for &String {
    fn to_path(&self) -> Result<Path, InvalidPathError> {
        Path::parse(self)
    }
}

#[doc(hidden)]
pub fn __path_from_macro(raw: &'static str) -> Path {
    match Path::parse(raw) {
        Ok(path) => path,
        Err(e) => panic!("`path!` accepted an invalid path: {e}"),
    }
}

/// Bounded raw-string to [`Path`] cache. The oldest entry is evicted first.
struct PathCache {
    capacity: usize,
    entries: HashMap<Box<str>, Path>,
    order: VecDeque<Box<str>>,
}

impl PathCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }
    fn get(&self, raw: &str) -> Option<Path> {
        self.entries.get(raw).cloned()
    }
    fn insert(&mut self, path: Path) {
        let key: Box<str> = Box::from(path.as_str());
        if self.entries.insert(key.clone(), path).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
pub(crate) fn cached_path_count() -> usize {
    PATH_CACHE.with(|c| c.borrow().len())
}

/// A non-negative base-10 integer; signs and whitespace are rejected.
pub(crate) fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn empty_container(for_segment: &str) -> Value {
    if parse_index(for_segment).is_some() {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

/// Reads the value at `path`.
///
/// Missing keys, out-of-range indices and scalar intermediates all yield `Ok(None)`.
/// A non-numeric segment applied to an array is an error.
pub fn get<'a>(root: &'a Value, path: &Path) -> Result<Option<&'a Value>, InvalidPathError> {
    let mut current = root;
    for segment in path.segments() {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => items.get(path.index_at(segment)?),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Writes `value` at `path`, creating intermediate containers as needed.
///
/// Each missing or scalar intermediate becomes an array when the segment after it is
/// numeric and an object otherwise. Arrays shorter than a target index are padded
/// with `null`. `root` is mutated in place and must be an owned copy.
pub fn set(root: &mut Value, path: &Path, value: Value) -> Result<(), InvalidPathError> {
    let mut current = root;
    let mut segments = path.segments().peekable();
    while let Some(segment) = segments.next() {
        let slot = slot_mut(current, segment, path)?;
        match segments.peek() {
            Some(next) => {
                if !is_container(slot) {
                    *slot = empty_container(next);
                }
                current = slot;
            }
            None => {
                *slot = value;
                return Ok(());
            }
        }
    }
    Ok(())
}

fn slot_mut<'a>(
    container: &'a mut Value,
    segment: &str,
    path: &Path,
) -> Result<&'a mut Value, InvalidPathError> {
    if !is_container(container) {
        *container = empty_container(segment);
    }
    match container {
        Value::Array(items) => {
            let index = path.index_at(segment)?;
            if index >= items.len() {
                let len = index
                    .checked_add(1)
                    .filter(|&len| len - items.len() <= MAX_INDEX_GAP)
                    .ok_or_else(|| {
                        InvalidPathError::new(
                            path.as_str(),
                            PathErrorReason::IndexTooLarge(segment.to_string()),
                        )
                    })?;
                items.resize(len, Value::Null);
            }
            Ok(&mut items[index])
        }
        Value::Object(map) => Ok(map.entry(segment).or_insert(Value::Null)),
        other => {
            *other = Value::Object(Map::new());
            slot_mut(other, segment, path)
        }
    }
}

/// Deletes the value at `path`.
///
/// Array elements are removed by shifting later elements down; object keys are
/// dropped. Returns `Ok(false)` if the path does not resolve.
pub fn remove(root: &mut Value, path: &Path) -> Result<bool, InvalidPathError> {
    let mut segments: Vec<&str> = path.segments().collect();
    let Some(last) = segments.pop() else {
        return Ok(false);
    };
    let mut current = root;
    for segment in segments {
        let next = match current {
            Value::Object(map) => map.get_mut(segment),
            Value::Array(items) => items.get_mut(path.index_at(segment)?),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Ok(false),
        }
    }
    match current {
        Value::Object(map) => Ok(map.remove(last).is_some()),
        Value::Array(items) => {
            let index = path.index_at(last)?;
            if index < items.len() {
                items.remove(index);
                Ok(true)
            } else {
                Ok(false)
            }
        }
        _ => Ok(false),
    }
}

/// A path pattern where a `*` segment matches any single segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathPattern(Path);

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, InvalidPathError> {
        Path::parse(raw).map(Self)
    }

    /// Whole-path match.
    pub fn matches(&self, path: &Path) -> bool {
        self.0.len() == path.len() && self.matches_prefix(path)
    }

    /// Returns true if `path` is matched by this pattern or lies below a match.
    pub fn covers(&self, path: &Path) -> bool {
        self.0.len() <= path.len() && self.matches_prefix(path)
    }

    fn matches_prefix(&self, path: &Path) -> bool {
        self.0
            .segments()
            .zip(path.segments())
            .all(|(p, s)| p == "*" || p == s)
    }
}
