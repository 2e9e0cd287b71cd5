// API surface
// Turns a normalized tree into the object callers use: namespaces become
// nested lookups, endpoints become callables bound to their path, and the
// default-option accessors sit on the root.

use crate::declaration::Declaration;
use crate::error::{RapierError, Result};
use crate::normalize::{canonical_path, normalize, NodeType, NormalizedTree, ROOT_PATH};
use crate::options::{CallOptions, DefaultStore};
use crate::pipeline;
use crate::plugin::{PluginRegistry, RegistrySnapshot};
use crate::result::Deferred;
use indexmap::IndexMap;
use rapier_transport::Transport;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[cfg(feature = "http")]
use rapier_transport::{HttpConfig, HttpTransport};

/// A compiled API client. Cheap to clone.
#[derive(Clone)]
pub struct Api {
    inner: Arc<ApiInner>,
}

struct ApiInner {
    tree: NormalizedTree,
    snapshot: RegistrySnapshot,
    transport: Arc<dyn Transport>,
    defaults: DefaultStore,
    surface: Namespace,
}

/// A member of a namespace
#[derive(Debug, Clone)]
pub enum Member {
    Namespace(Namespace),
    Endpoint(String),
}

/// A namespace of the surface, mirroring the declaration nesting
#[derive(Debug, Clone)]
pub struct Namespace {
    path: String,
    members: IndexMap<String, Member>,
}

impl Namespace {
    fn build(tree: &NormalizedTree, path: &str) -> Self {
        let mut members = IndexMap::new();
        for child in tree.children(path) {
            let member = match child.node_type {
                NodeType::Namespace => Member::Namespace(Namespace::build(tree, &child.path)),
                _ => Member::Endpoint(child.path.clone()),
            };
            members.insert(child.name.clone(), member);
        }
        Self {
            path: path.to_string(),
            members,
        }
    }

    fn collect_endpoints(&self, into: &mut Vec<String>) {
        for member in self.members.values() {
            match member {
                Member::Namespace(namespace) => namespace.collect_endpoints(into),
                Member::Endpoint(path) => into.push(path.clone()),
            }
        }
    }

    fn find(&self, segments: &[&str]) -> Option<&Member> {
        let (first, rest) = segments.split_first()?;
        let member = self.members.get(*first)?;
        if rest.is_empty() {
            return Some(member);
        }
        match member {
            Member::Namespace(namespace) => namespace.find(rest),
            Member::Endpoint(_) => None,
        }
    }
}

/// Builder for [`Api`]
pub struct ApiBuilder<'r> {
    declaration: Declaration,
    registry: Option<&'r PluginRegistry>,
    transport: Option<Arc<dyn Transport>>,
    #[cfg(feature = "http")]
    http_config: HttpConfig,
}

impl<'r> ApiBuilder<'r> {
    fn new(declaration: Declaration) -> Self {
        Self {
            declaration,
            registry: None,
            transport: None,
            #[cfg(feature = "http")]
            http_config: HttpConfig::default(),
        }
    }

    /// Registry to snapshot at build time; the global one when unset
    pub fn registry(mut self, registry: &'r PluginRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Configuration for the default HTTP transport
    #[cfg(feature = "http")]
    pub fn http_config(mut self, config: HttpConfig) -> Self {
        self.http_config = config;
        self
    }

    pub fn build(mut self) -> Result<Api> {
        let tree = normalize(&self.declaration)?;
        let snapshot = match self.registry {
            Some(registry) => registry.snapshot(),
            None => PluginRegistry::global().snapshot(),
        };

        let transport = match self.transport.take() {
            Some(transport) => transport,
            None => self.default_transport()?,
        };

        let surface = Namespace::build(&tree, ROOT_PATH);
        debug!(
            "Built API with {} nodes and {} top-level members",
            tree.len(),
            surface.members.len()
        );

        Ok(Api {
            inner: Arc::new(ApiInner {
                tree,
                snapshot,
                transport,
                defaults: DefaultStore::new(),
                surface,
            }),
        })
    }

    #[cfg(feature = "http")]
    fn default_transport(&self) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(HttpTransport::new(self.http_config.clone())?))
    }

    #[cfg(not(feature = "http"))]
    fn default_transport(&self) -> Result<Arc<dyn Transport>> {
        Err(rapier_transport::TransportError::InvalidRequest(
            "no transport configured and the http feature is disabled".into(),
        )
        .into())
    }
}

impl Api {
    pub fn builder<'r>(declaration: impl Into<Declaration>) -> ApiBuilder<'r> {
        ApiBuilder::new(declaration.into())
    }

    /// Build with the global registry and the default transport
    pub fn new(declaration: impl Into<Declaration>) -> Result<Api> {
        Api::builder(declaration).build()
    }

    pub fn root(&self) -> NamespaceRef<'_> {
        NamespaceRef {
            api: self,
            namespace: &self.inner.surface,
        }
    }

    /// Look up a namespace by dotted path
    pub fn namespace(&self, path: &str) -> Option<NamespaceRef<'_>> {
        let canonical = canonical_path(path);
        if canonical == ROOT_PATH {
            return Some(self.root());
        }
        match self.inner.surface.find(&segments(&canonical)) {
            Some(Member::Namespace(namespace)) => Some(NamespaceRef {
                api: self,
                namespace,
            }),
            _ => None,
        }
    }

    /// Look up a callable by dotted path. The root is returned only when it
    /// is itself invocable.
    pub fn endpoint(&self, path: &str) -> Option<Endpoint> {
        let canonical = canonical_path(path);
        if canonical == ROOT_PATH {
            return self
                .inner
                .tree
                .get(ROOT_PATH)
                .filter(|root| root.is_invocable())
                .map(|_| Endpoint::new(self.clone(), ROOT_PATH.to_string()));
        }
        match self.inner.surface.find(&segments(&canonical)) {
            Some(Member::Endpoint(path)) => Some(Endpoint::new(self.clone(), path.clone())),
            _ => None,
        }
    }

    /// Paths of every callable in the surface, in declaration order
    pub fn endpoint_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.inner.surface.collect_endpoints(&mut paths);
        paths
    }

    /// Invoke the node at `path`
    pub fn invoke(&self, path: &str, call: impl Into<CallOptions>) -> Deferred {
        Deferred::new(pipeline::invoke(
            self.clone(),
            canonical_path(path),
            call.into(),
        ))
    }

    /// Read a global default option
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.defaults.get_global(key)
    }

    /// Set a global default option, applied to every call
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.defaults.set_global(key, value);
    }

    /// Read a default option of the node at `path`
    pub fn get_at(&self, path: &str, key: &str) -> Option<Value> {
        self.inner.defaults.get_node(&canonical_path(path), key)
    }

    /// Set a default option for calls against the node at `path`
    pub fn set_at(&self, path: &str, key: impl Into<String>, value: Value) -> Result<()> {
        let canonical = canonical_path(path);
        if !self.inner.tree.contains(&canonical) {
            return Err(RapierError::UnknownPath(canonical));
        }
        self.inner.defaults.set_node(canonical, key, value);
        Ok(())
    }

    pub fn tree(&self) -> &NormalizedTree {
        &self.inner.tree
    }

    pub(crate) fn snapshot(&self) -> &RegistrySnapshot {
        &self.inner.snapshot
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn defaults(&self) -> &DefaultStore {
        &self.inner.defaults
    }

    /// Whether two handles refer to the same built API
    pub fn same_api(&self, other: &Api) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("nodes", &self.inner.tree.len())
            .field("endpoints", &self.endpoint_paths())
            .field("snapshot", &self.inner.snapshot)
            .finish()
    }
}

fn segments(canonical: &str) -> Vec<&str> {
    canonical
        .trim_start_matches('.')
        .split('.')
        .filter(|s| !s.is_empty())
        .collect()
}

/// Borrowed view of a namespace
#[derive(Debug, Clone, Copy)]
pub struct NamespaceRef<'a> {
    api: &'a Api,
    namespace: &'a Namespace,
}

impl<'a> NamespaceRef<'a> {
    pub fn path(&self) -> &'a str {
        &self.namespace.path
    }

    pub fn namespace(&self, name: &str) -> Option<NamespaceRef<'a>> {
        match self.namespace.members.get(name) {
            Some(Member::Namespace(namespace)) => Some(NamespaceRef {
                api: self.api,
                namespace,
            }),
            _ => None,
        }
    }

    pub fn endpoint(&self, name: &str) -> Option<Endpoint> {
        match self.namespace.members.get(name) {
            Some(Member::Endpoint(path)) => Some(Endpoint::new(self.api.clone(), path.clone())),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&'a Member> {
        self.namespace.members.get(name)
    }

    pub fn member_names(&self) -> Vec<&'a str> {
        self.namespace.members.keys().map(String::as_str).collect()
    }
}

/// A callable bound to one node path
#[derive(Clone)]
pub struct Endpoint {
    api: Api,
    path: String,
}

impl Endpoint {
    fn new(api: Api, path: String) -> Self {
        Self { api, path }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    /// Invoke with `data` as the request parameters
    pub fn call(&self, data: Value) -> Deferred {
        self.invoke(CallOptions::new().data(data))
    }

    pub fn invoke(&self, call: impl Into<CallOptions>) -> Deferred {
        self.api.invoke(&self.path, call)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.api.get_at(&self.path, key)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.api.inner.defaults.set_node(self.path.clone(), key, value);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::rule;
    use crate::declaration::NodeDeclaration;
    use crate::hook::hook;
    use crate::plugin::{Plugin, Stage};
    use anyhow::anyhow;
    use rapier_transport::{Method, RecordingTransport, TransportError, TransportResponse};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn build(declaration: impl Into<Declaration>, registry: &PluginRegistry) -> (Api, RecordingTransport) {
        let transport = RecordingTransport::new();
        let api = Api::builder(declaration)
            .registry(registry)
            .transport(transport.clone())
            .build()
            .unwrap();
        (api, transport)
    }

    fn layer() -> Declaration {
        NodeDeclaration::namespace()
            .child(
                "layer",
                NodeDeclaration::namespace()
                    .cascade("handlerLevel", json!({"layer": true}))
                    .child("one", "http://h/layer/one")
                    .child(
                        "two",
                        NodeDeclaration::endpoint("http://h/layer/two/:id").method(Method::POST),
                    ),
            )
            .child("top", "http://h/top")
            .into()
    }

    #[tokio::test]
    async fn test_get_without_arguments() {
        let registry = PluginRegistry::new();
        let declaration = Declaration::from_paths([
            (".", Declaration::Node(NodeDeclaration::new())),
            (".a", Declaration::from("http://h/a")),
        ])
        .unwrap();
        let (api, transport) = build(declaration, &registry);

        let result = api.endpoint("a").unwrap().invoke(CallOptions::new()).await.unwrap();

        assert_eq!(result.status, 200);
        let request = transport.last_request().unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url, "http://h/a");
        assert!(request.query.is_empty());
        assert!(request.body.is_none());
        assert_eq!(result.request["url"], "http://h/a");
    }

    #[tokio::test]
    async fn test_post_consumes_placeholders() {
        let registry = PluginRegistry::new();
        let declaration = NodeDeclaration::namespace().child(
            "a",
            NodeDeclaration::endpoint("http://h/a/:id").method(Method::POST),
        );
        let (api, transport) = build(declaration, &registry);

        api.endpoint(".a")
            .unwrap()
            .call(json!({"id": 1, "x": true}))
            .await
            .unwrap();

        let request = transport.last_request().unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "http://h/a/1");
        assert_eq!(request.body, Some(json!({"x": true})));
    }

    #[test]
    fn test_surface_mirrors_declaration() {
        let registry = PluginRegistry::new();
        let (api, _) = build(layer(), &registry);

        assert_eq!(api.root().member_names(), vec!["layer", "top"]);
        let layer = api.root().namespace("layer").unwrap();
        assert_eq!(layer.path(), ".layer");
        assert_eq!(layer.member_names(), vec!["one", "two"]);
        assert_eq!(layer.endpoint("two").unwrap().path(), ".layer.two");
        assert!(layer.namespace("one").is_none());

        assert_eq!(api.endpoint_paths(), vec![".layer.one", ".layer.two", ".top"]);
        assert!(api.endpoint("layer").is_none());
        assert!(api.endpoint(".").is_none());
        assert!(api.namespace("layer.one").is_none());
        assert_eq!(api.namespace(".layer").unwrap().path(), ".layer");
    }

    #[test]
    fn test_invocable_root() {
        let registry = PluginRegistry::new();
        let declaration = NodeDeclaration::endpoint("http://h/").child("a", "http://h/a");
        let (api, _) = build(declaration, &registry);
        assert_eq!(api.endpoint("").unwrap().path(), ".");
    }

    #[tokio::test]
    async fn test_default_precedence() {
        let registry = PluginRegistry::new();
        let (api, transport) = build(layer(), &registry);

        api.set("data", json!({"someOption": "global", "fromGlobal": 1}));
        api.set_at("layer.one", "data", json!({"someOption": "node"})).unwrap();
        assert_eq!(api.get("data"), Some(json!({"someOption": "global", "fromGlobal": 1})));
        assert_eq!(api.get_at(".layer.one", "data"), Some(json!({"someOption": "node"})));

        api.endpoint("layer.one").unwrap().call(json!({})).await.unwrap();
        let query = transport.last_request().unwrap().query;
        assert_eq!(query["someOption"], "node");
        assert_eq!(query["fromGlobal"], 1);

        api.endpoint("layer.one")
            .unwrap()
            .call(json!({"someOption": "call"}))
            .await
            .unwrap();
        assert_eq!(transport.last_request().unwrap().query["someOption"], "call");

        // node defaults only apply to their own path
        api.endpoint("top").unwrap().call(json!({})).await.unwrap();
        assert_eq!(transport.last_request().unwrap().query["someOption"], "global");

        assert!(matches!(
            api.set_at("missing", "data", json!({})),
            Err(RapierError::UnknownPath(_))
        ));
    }

    #[tokio::test]
    async fn test_non_success_status_keeps_status() {
        let registry = PluginRegistry::new();
        let (api, transport) = build(layer(), &registry);
        transport.push_response(TransportResponse::new(404, json!({"missing": true})));

        let failure = api.endpoint("top").unwrap().call(json!({})).await.unwrap_err();
        assert_eq!(failure.status(), 404);
        assert_eq!(failure.result.data, json!({"missing": true}));
        assert!(failure.error.is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_settles_failure() {
        let registry = PluginRegistry::new();
        let (api, transport) = build(layer(), &registry);
        transport.push_failure(TransportError::Connection("refused".into()));

        let failure = api.endpoint("top").unwrap().call(json!({})).await.unwrap_err();
        assert!(matches!(failure.error, Some(RapierError::Transport(_))));
        assert!(failure.result.data.as_str().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_transport_failure_runs_post_response() {
        let registry = PluginRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));

        let log = seen.clone();
        registry
            .register(Plugin::new("post").stage(
                "_processResult",
                hook(move |_, _, result| {
                    log.lock().unwrap().push(format!("stage:{}", result.status));
                    Ok(())
                }),
            ))
            .unwrap();

        let log = seen.clone();
        let declaration = NodeDeclaration::namespace()
            .process_result(hook(move |_, _, result| {
                let text = result.data.as_str().unwrap_or_default().to_string();
                log.lock().unwrap().push(format!("root:{}", text));
                result.extensions.insert("seen".into(), json!(true));
                Ok(())
            }))
            .child("top", "http://h/top");
        let (api, transport) = build(declaration, &registry);
        transport.push_failure(TransportError::Connection("refused".into()));

        let failure = api.endpoint("top").unwrap().call(json!({})).await.unwrap_err();

        assert!(matches!(
            failure.error,
            Some(RapierError::Transport(TransportError::Connection(_)))
        ));
        assert_eq!(failure.status(), 0);
        assert_eq!(failure.result.extensions["seen"], json!(true));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], "stage:0");
        assert!(seen[1].starts_with("root:") && seen[1].contains("refused"));
    }

    #[tokio::test]
    async fn test_builds_with_global_registry() {
        let transport = RecordingTransport::new();
        let api = Api::builder(layer())
            .transport(transport.clone())
            .build()
            .unwrap();

        let result = api.endpoint("layer.one").unwrap().call(json!({})).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(transport.last_request().unwrap().url, "http://h/layer/one");
    }

    #[tokio::test]
    async fn test_callback_runs_on_both_paths() {
        let registry = PluginRegistry::new();
        let (api, transport) = build(layer(), &registry);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        api.endpoint("top")
            .unwrap()
            .invoke(CallOptions::new().callback(move |_, result| {
                log.lock().unwrap().push(result.status)
            }))
            .await
            .unwrap();

        transport.push_response(TransportResponse::new(500, json!(null)));
        let log = seen.clone();
        let outcome = api
            .endpoint("top")
            .unwrap()
            .invoke(CallOptions::new().callback(move |_, result| {
                log.lock().unwrap().push(result.status)
            }))
            .await;

        assert!(outcome.is_err());
        assert_eq!(*seen.lock().unwrap(), vec![200, 500]);
    }

    #[tokio::test]
    async fn test_handler_bypasses_transport() {
        let registry = PluginRegistry::new();
        let declaration = NodeDeclaration::namespace().child(
            "local",
            Declaration::handler(hook(|_, options, result| {
                let id = options.data().and_then(|d| d.get("id")).cloned();
                result.data = json!({"computed": id});
                Ok(())
            })),
        );
        let (api, transport) = build(declaration, &registry);

        let result = api.endpoint("local").unwrap().call(json!({"id": 7})).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.data, json!({"computed": 7}));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_stage_error_aborts_pipeline() {
        let registry = PluginRegistry::new();
        registry
            .register(Plugin::new("failing").stage(
                "_prefilter",
                hook(|_, _, _| Err(anyhow!("denied"))),
            ))
            .unwrap();
        let (api, transport) = build(layer(), &registry);

        let failure = api.endpoint("top").unwrap().call(json!({})).await.unwrap_err();
        assert!(matches!(failure.error, Some(RapierError::PipelineStage { .. })));
        assert!(failure.result.data.as_str().unwrap().contains("denied"));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_hook_order() {
        let registry = PluginRegistry::new();
        let order = Arc::new(Mutex::new(Vec::<String>::new()));

        let record = |label: &'static str, order: &Arc<Mutex<Vec<String>>>| {
            let order = order.clone();
            hook(move |_, _, _| {
                order.lock().unwrap().push(label.to_string());
                Ok(())
            })
        };

        registry
            .register(
                Plugin::new("tracer")
                    .stage("_prefilter", record("stage:pre", &order))
                    .stage("_processResult", record("stage:post", &order))
                    .with_stage(Stage::pre_request("_early", record("stage:early", &order)).ordinal(-1)),
            )
            .unwrap();

        let declaration = NodeDeclaration::namespace()
            .prefilter(record("root:pre", &order))
            .process_result(record("root:post", &order))
            .child(
                "layer",
                NodeDeclaration::namespace()
                    .prefilter(record("layer:pre", &order))
                    .process_result(record("layer:post", &order))
                    .child(
                        "leaf",
                        NodeDeclaration::endpoint("http://h/leaf")
                            .prefilter(record("leaf:pre", &order))
                            .process_result(record("leaf:post", &order)),
                    ),
            );
        let (api, _) = build(declaration, &registry);
        api.endpoint("layer.leaf").unwrap().call(json!({})).await.unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec![
                "stage:early",
                "stage:pre",
                "root:pre",
                "layer:pre",
                "leaf:pre",
                "stage:post",
                "root:post",
                "layer:post",
                "leaf:post",
            ]
        );
    }

    #[tokio::test]
    async fn test_cascade_reaches_hooks() {
        let registry = PluginRegistry::new();
        registry
            .register(Plugin::new("levels").extend_rule(
                "handlerLevel",
                rule(|declared, accumulated, level| {
                    let mut levels = accumulated.as_array().cloned().unwrap_or_default();
                    if declared.is_some() {
                        levels.push(json!(level.path));
                    }
                    Ok(json!(levels))
                }),
            ))
            .unwrap();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        registry
            .register(Plugin::new("reader").stage(
                "_prefilter",
                hook(move |_, options, _| {
                    *sink.lock().unwrap() = options.cascade_value("handlerLevel").cloned();
                    Ok(())
                }),
            ))
            .unwrap();

        let (api, _) = build(layer(), &registry);
        api.endpoint("layer.one").unwrap().call(json!({})).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(json!([".layer"])));
    }

    #[tokio::test]
    async fn test_snapshot_isolation() {
        let registry = PluginRegistry::new();
        let (before, transport) = build(layer(), &registry);

        registry
            .register(Plugin::new("late").stage(
                "_prefilter",
                hook(|_, options, _| {
                    options.set_header("x-late", "1");
                    Ok(())
                }),
            ))
            .unwrap();
        let after = Api::builder(layer())
            .registry(&registry)
            .transport(transport.clone())
            .build()
            .unwrap();

        before.endpoint("top").unwrap().call(json!({})).await.unwrap();
        assert!(transport.last_request().unwrap().headers.get("x-late").is_none());

        after.endpoint("top").unwrap().call(json!({})).await.unwrap();
        assert_eq!(transport.last_request().unwrap().headers["x-late"], "1");

        registry.reset();
        after.endpoint("top").unwrap().call(json!({})).await.unwrap();
        assert_eq!(transport.last_request().unwrap().headers["x-late"], "1");
        assert!(!before.same_api(&after));
    }

    #[test]
    fn test_malformed_declaration_stops_build() {
        let registry = PluginRegistry::new();
        let declaration = NodeDeclaration::namespace()
            .child("a", "http://h/a")
            .child("a", "http://h/b");
        let err = Api::builder(declaration)
            .registry(&registry)
            .transport(RecordingTransport::new())
            .build()
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
