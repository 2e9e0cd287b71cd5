// Declaration model
// The caller-supplied description of an API tree. Three shapes are accepted
// for any node: a URL string, a handler function, or a full node record.
// Nested, flat dotted-path and JSON inputs all produce the same tree.

use crate::error::{RapierError, Result};
use crate::hook::SharedHook;
use indexmap::IndexMap;
use rapier_transport::Method;
use serde_json::{Map, Value};
use std::fmt;

/// One node of a declaration tree.
#[derive(Clone)]
pub enum Declaration {
    /// Shorthand for a node with only `url` set
    Url(String),
    /// Shorthand for a node whose response is produced locally by a hook
    Handler(SharedHook),
    /// Full node record
    Node(NodeDeclaration),
}

/// Full node record.
///
/// A node with `children` set (even to an empty list) is a namespace;
/// otherwise it is an endpoint. The root may carry request fields as well.
#[derive(Clone, Default)]
pub struct NodeDeclaration {
    /// Display name; only the root's is kept, children are named by key
    pub name: Option<String>,
    /// Prefix for relative `url`s of this node and its descendants
    pub base_url: Option<String>,
    pub url: Option<String>,
    pub method: Option<Method>,
    pub cascade: Map<String, Value>,
    pub prefilter: Option<SharedHook>,
    pub process_result: Option<SharedHook>,
    pub children: Option<Vec<(String, Declaration)>>,
}

impl NodeDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// An endpoint record with its URL set
    pub fn endpoint(url: impl Into<String>) -> Self {
        Self::new().url(url)
    }

    /// A namespace record with no children yet
    pub fn namespace() -> Self {
        Self {
            children: Some(Vec::new()),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn cascade(mut self, key: impl Into<String>, value: Value) -> Self {
        self.cascade.insert(key.into(), value);
        self
    }

    pub fn prefilter(mut self, hook: SharedHook) -> Self {
        self.prefilter = Some(hook);
        self
    }

    pub fn process_result(mut self, hook: SharedHook) -> Self {
        self.process_result = Some(hook);
        self
    }

    pub fn child(mut self, name: impl Into<String>, declaration: impl Into<Declaration>) -> Self {
        self.children
            .get_or_insert_with(Vec::new)
            .push((name.into(), declaration.into()));
        self
    }
}

impl fmt::Debug for NodeDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDeclaration")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("cascade", &self.cascade)
            .field("prefilter", &self.prefilter.is_some())
            .field("process_result", &self.process_result.is_some())
            .field("children", &self.children)
            .finish()
    }
}

impl fmt::Debug for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Declaration::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Declaration::Handler(_) => f.write_str("Handler"),
            Declaration::Node(node) => node.fmt(f),
        }
    }
}

impl From<&str> for Declaration {
    fn from(url: &str) -> Self {
        Declaration::Url(url.to_string())
    }
}

impl From<String> for Declaration {
    fn from(url: String) -> Self {
        Declaration::Url(url)
    }
}

impl From<NodeDeclaration> for Declaration {
    fn from(node: NodeDeclaration) -> Self {
        Declaration::Node(node)
    }
}

impl From<SharedHook> for Declaration {
    fn from(handler: SharedHook) -> Self {
        Declaration::Handler(handler)
    }
}

impl Declaration {
    pub fn handler(handler: SharedHook) -> Self {
        Declaration::Handler(handler)
    }

    /// Assemble a nested tree from flat dotted paths (`"."`, `".layer"`,
    /// `".layer.handler"`). Intermediate namespaces that are not declared are
    /// created empty.
    pub fn from_paths<I, P>(entries: I) -> Result<Declaration>
    where
        I: IntoIterator<Item = (P, Declaration)>,
        P: Into<String>,
    {
        let mut flat: IndexMap<Vec<String>, Declaration> = IndexMap::new();
        for (path, declaration) in entries {
            let path = path.into();
            let segments = split_path(&path)?;
            if flat.contains_key(&segments) {
                return Err(RapierError::malformed(path, "path declared more than once"));
            }
            flat.insert(segments, declaration);
        }
        assemble(&[], &mut flat)
    }

    /// Parse a data-only declaration from JSON.
    ///
    /// An object whose keys all start with `.` is read as the flat dotted-path
    /// form; any other object is a nested node record with optional `name`,
    /// `baseURL`, `dataType`, `url`, `type`, `cascade` and `children`. Children
    /// may also be given as `models` (namespaces) and `endpoints` arrays of
    /// records keyed by their `name`. A string is URL shorthand.
    pub fn from_json(value: &Value) -> Result<Declaration> {
        match value {
            Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('.')) => {
                let mut entries = Vec::with_capacity(map.len());
                for (path, node) in map {
                    entries.push((path.clone(), parse_json_node(path, node)?));
                }
                Declaration::from_paths(entries)
            }
            other => parse_json_node(".", other),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Declaration> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RapierError::malformed(".", format!("invalid JSON: {}", e)))?;
        Declaration::from_json(&value)
    }
}

fn split_path(path: &str) -> Result<Vec<String>> {
    let trimmed = path.strip_prefix('.').unwrap_or(path);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split('.')
        .map(|segment| {
            if segment.is_empty() {
                Err(RapierError::malformed(path, "empty path segment"))
            } else {
                Ok(segment.to_string())
            }
        })
        .collect()
}

fn dotted(segments: &[String]) -> String {
    format!(".{}", segments.join("."))
}

fn assemble(prefix: &[String], flat: &mut IndexMap<Vec<String>, Declaration>) -> Result<Declaration> {
    let own = flat.shift_remove(prefix);

    let mut child_names: Vec<String> = Vec::new();
    for key in flat.keys() {
        if key.len() > prefix.len() && key.starts_with(prefix) {
            let name = &key[prefix.len()];
            if !child_names.contains(name) {
                child_names.push(name.clone());
            }
        }
    }

    if child_names.is_empty() {
        return Ok(own.unwrap_or_else(|| Declaration::Node(NodeDeclaration::new())));
    }

    let mut node = match own {
        None => NodeDeclaration::namespace(),
        Some(Declaration::Node(node)) => node,
        Some(_) => {
            return Err(RapierError::malformed(
                dotted(prefix),
                "shorthand declaration cannot have children",
            ))
        }
    };

    for name in child_names {
        let mut child_prefix = prefix.to_vec();
        child_prefix.push(name.clone());
        let child = assemble(&child_prefix, flat)?;
        node.children.get_or_insert_with(Vec::new).push((name, child));
    }

    Ok(Declaration::Node(node))
}

fn parse_json_node(path: &str, value: &Value) -> Result<Declaration> {
    let map = match value {
        Value::String(url) => return Ok(Declaration::Url(url.clone())),
        Value::Object(map) => map,
        other => {
            return Err(RapierError::malformed(
                path,
                format!("expected a URL string or node object, got {}", other),
            ))
        }
    };

    let mut node = NodeDeclaration::new();
    for (key, field) in map {
        match key.as_str() {
            "name" => {
                let name = field
                    .as_str()
                    .ok_or_else(|| RapierError::malformed(path, "'name' must be a string"))?;
                match path.rsplit('.').next() {
                    Some(keyed) if !keyed.is_empty() && keyed != name => {
                        return Err(RapierError::malformed(
                            path,
                            format!("'name' is '{}' but the node is keyed '{}'", name, keyed),
                        ))
                    }
                    _ => node.name = Some(name.to_string()),
                }
            }
            "baseURL" => {
                let base_url = field
                    .as_str()
                    .ok_or_else(|| RapierError::malformed(path, "'baseURL' must be a string"))?;
                node.base_url = Some(base_url.to_string());
            }
            "dataType" => match field.as_str() {
                Some(kind) if kind.eq_ignore_ascii_case("json") => {}
                _ => {
                    return Err(RapierError::malformed(
                        path,
                        format!("unsupported dataType {}, only \"json\" is handled", field),
                    ))
                }
            },
            "models" | "endpoints" => {
                let namespaces = key.as_str() == "models";
                let entries = field.as_array().ok_or_else(|| {
                    RapierError::malformed(path, format!("'{}' must be an array", key))
                })?;
                let children = node.children.get_or_insert_with(Vec::new);
                for entry in entries {
                    children.push(parse_named_entry(path, entry, namespaces)?);
                }
            }
            "url" => {
                let url = field
                    .as_str()
                    .ok_or_else(|| RapierError::malformed(path, "'url' must be a string"))?;
                node.url = Some(url.to_string());
            }
            "type" => {
                let name = field
                    .as_str()
                    .ok_or_else(|| RapierError::malformed(path, "'type' must be a string"))?;
                node.method = Some(parse_method(path, name)?);
            }
            "cascade" => {
                let cascade = field
                    .as_object()
                    .ok_or_else(|| RapierError::malformed(path, "'cascade' must be an object"))?;
                node.cascade = cascade.clone();
            }
            "children" => {
                let children = field
                    .as_object()
                    .ok_or_else(|| RapierError::malformed(path, "'children' must be an object"))?;
                let parsed = node.children.get_or_insert_with(Vec::new);
                for (name, child) in children {
                    parsed.push((name.clone(), parse_json_node(&json_child_path(path, name), child)?));
                }
            }
            other => {
                return Err(RapierError::malformed(
                    path,
                    format!("unknown field '{}'", other),
                ))
            }
        }
    }
    Ok(Declaration::Node(node))
}

/// One record of a `models` or `endpoints` array, keyed by its `name`
fn parse_named_entry(parent: &str, entry: &Value, namespace: bool) -> Result<(String, Declaration)> {
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RapierError::malformed(parent, "array entries need a string 'name'"))?;
    let child = match parse_json_node(&json_child_path(parent, name), entry)? {
        Declaration::Node(mut node) if namespace && node.children.is_none() => {
            node.children = Some(Vec::new());
            Declaration::Node(node)
        }
        other => other,
    };
    Ok((name.to_string(), child))
}

fn json_child_path(parent: &str, name: &str) -> String {
    if parent == "." {
        format!(".{}", name)
    } else {
        format!("{}.{}", parent, name)
    }
}

/// Parse an HTTP method name, case-insensitively.
pub fn parse_method(path: &str, name: &str) -> Result<Method> {
    match name.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        "HEAD" => Ok(Method::HEAD),
        "OPTIONS" => Ok(Method::OPTIONS),
        _ => Err(RapierError::malformed(
            path,
            format!("unsupported HTTP method '{}'", name),
        )),
    }
}
