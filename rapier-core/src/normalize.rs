// Tree normalization
// Walks a declaration once and produces a flat map from dotted path to node
// metadata. Shorthand forms are resolved here into a single NodeSpec so the
// pipeline never has to inspect declaration shapes at call time.

use crate::declaration::{Declaration, NodeDeclaration};
use crate::error::{RapierError, Result};
use crate::hook::SharedHook;
use indexmap::IndexMap;
use rapier_transport::Method;
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

pub const ROOT_PATH: &str = ".";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Root,
    Namespace,
    Endpoint,
}

/// Resolved request behavior of a single node
#[derive(Clone, Default)]
pub struct NodeSpec {
    pub base_url: Option<String>,
    pub url: Option<String>,
    pub method: Option<Method>,
    pub cascade: Map<String, Value>,
    pub prefilter: Option<SharedHook>,
    pub process_result: Option<SharedHook>,
    /// Set for function-shorthand nodes; replaces the transport call
    pub handler: Option<SharedHook>,
}

impl NodeSpec {
    fn from_record(node: &NodeDeclaration) -> Self {
        Self {
            base_url: node.base_url.clone(),
            url: node.url.clone(),
            method: node.method.clone(),
            cascade: node.cascade.clone(),
            prefilter: node.prefilter.clone(),
            process_result: node.process_result.clone(),
            handler: None,
        }
    }

    pub fn is_invocable(&self) -> bool {
        self.url.is_some() || self.handler.is_some()
    }

    /// Declared method, `GET` when absent
    pub fn method_or_default(&self) -> Method {
        self.method.clone().unwrap_or(Method::GET)
    }
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("base_url", &self.base_url)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("cascade", &self.cascade)
            .field("prefilter", &self.prefilter.is_some())
            .field("process_result", &self.process_result.is_some())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedNode {
    pub path: String,
    pub name: String,
    pub node_type: NodeType,
    pub spec: NodeSpec,
    pub parent_path: Option<String>,
    /// Child paths in declaration order
    pub children: Vec<String>,
}

impl NormalizedNode {
    pub fn is_invocable(&self) -> bool {
        match self.node_type {
            NodeType::Endpoint => true,
            NodeType::Root => self.spec.is_invocable(),
            NodeType::Namespace => false,
        }
    }
}

/// Flat, path-addressed view of a declaration tree
#[derive(Debug, Clone)]
pub struct NormalizedTree {
    nodes: IndexMap<String, NormalizedNode>,
}

impl NormalizedTree {
    pub fn get(&self, path: &str) -> Option<&NormalizedNode> {
        self.nodes.get(canonical_path(path).as_str())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in depth-first declaration order, root first
    pub fn iter(&self) -> impl Iterator<Item = &NormalizedNode> {
        self.nodes.values()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &NormalizedNode> {
        self.nodes
            .values()
            .filter(|node| node.node_type == NodeType::Endpoint)
    }

    pub fn children(&self, path: &str) -> Vec<&NormalizedNode> {
        self.get(path)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| self.nodes.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nodes from the root down to `path`, inclusive.
    pub fn chain(&self, path: &str) -> Option<Vec<&NormalizedNode>> {
        let mut chain = Vec::new();
        let mut current = self.get(path);
        while let Some(node) = current {
            chain.push(node);
            current = node
                .parent_path
                .as_deref()
                .and_then(|parent| self.nodes.get(parent));
        }
        if chain.is_empty() {
            return None;
        }
        chain.reverse();
        Some(chain)
    }
}

/// Append a child name to a parent path.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH {
        format!(".{}", name)
    } else {
        format!("{}.{}", parent, name)
    }
}

/// Accept `layer.handler`, `.layer.handler` and the empty string for root.
pub fn canonical_path(path: &str) -> String {
    if path.is_empty() || path == ROOT_PATH {
        ROOT_PATH.to_string()
    } else if path.starts_with('.') {
        path.to_string()
    } else {
        format!(".{}", path)
    }
}

/// Flatten a declaration into a [`NormalizedTree`].
pub fn normalize(root: &Declaration) -> Result<NormalizedTree> {
    let mut nodes = IndexMap::new();
    visit(root, ROOT_PATH, "", None, &mut nodes)?;
    debug!(
        "Normalized declaration into {} nodes ({} endpoints)",
        nodes.len(),
        nodes
            .values()
            .filter(|n: &&NormalizedNode| n.node_type == NodeType::Endpoint)
            .count()
    );
    Ok(NormalizedTree { nodes })
}

fn visit(
    declaration: &Declaration,
    path: &str,
    name: &str,
    parent_path: Option<&str>,
    nodes: &mut IndexMap<String, NormalizedNode>,
) -> Result<()> {
    let is_root = parent_path.is_none();

    let (spec, children) = match declaration {
        Declaration::Url(url) => (
            NodeSpec {
                url: Some(url.clone()),
                ..NodeSpec::default()
            },
            None,
        ),
        Declaration::Handler(handler) => (
            NodeSpec {
                handler: Some(handler.clone()),
                ..NodeSpec::default()
            },
            None,
        ),
        Declaration::Node(node) => (NodeSpec::from_record(node), node.children.as_ref()),
    };

    let name = match declaration {
        Declaration::Node(NodeDeclaration {
            name: Some(label), ..
        }) if is_root => label.as_str(),
        _ => name,
    };

    let node_type = match (is_root, children.is_some()) {
        (true, _) => NodeType::Root,
        (false, true) => NodeType::Namespace,
        (false, false) => NodeType::Endpoint,
    };

    match node_type {
        NodeType::Namespace if spec.url.is_some() => {
            return Err(RapierError::malformed(
                path,
                "namespace cannot declare a url",
            ));
        }
        NodeType::Endpoint if !spec.is_invocable() => {
            return Err(RapierError::malformed(
                path,
                "endpoint declares neither a url nor a handler",
            ));
        }
        _ => {}
    }

    let mut child_paths = Vec::new();
    if let Some(children) = children {
        for (child_name, _) in children {
            if child_name.is_empty() || child_name.contains('.') {
                return Err(RapierError::malformed(
                    path,
                    format!("invalid child name '{}'", child_name),
                ));
            }
            let child = child_path(path, child_name);
            if child_paths.contains(&child) {
                return Err(RapierError::malformed(
                    path,
                    format!("duplicate child '{}'", child_name),
                ));
            }
            child_paths.push(child);
        }
    }

    nodes.insert(
        path.to_string(),
        NormalizedNode {
            path: path.to_string(),
            name: name.to_string(),
            node_type,
            spec,
            parent_path: parent_path.map(str::to_string),
            children: child_paths.clone(),
        },
    );

    if let Some(children) = children {
        for ((child_name, child), child_path) in children.iter().zip(child_paths.iter()) {
            visit(child, child_path, child_name, Some(path), nodes)?;
        }
    }
    Ok(())
}
