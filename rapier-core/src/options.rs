// Options
// The per-invocation options record, the call-time options supplied by
// callers, and the store of default options behind the get/set accessors.

use crate::api::Api;
use crate::result::CallResult;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;

pub const BASE_URL_KEY: &str = "baseURL";
pub const URL_KEY: &str = "url";
pub const TYPE_KEY: &str = "type";
pub const DATA_KEY: &str = "data";
pub const HEADERS_KEY: &str = "headers";
pub const CASCADE_KEY: &str = "cascade";

/// Resolved options of a single invocation.
///
/// Well-known keys are `baseURL`, `url`, `type`, `data`, `headers` and
/// `cascade`; any other key is carried through untouched for stages to use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    values: Map<String, Value>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }

    pub fn base_url(&self) -> Option<&str> {
        self.values.get(BASE_URL_KEY).and_then(Value::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.values.get(URL_KEY).and_then(Value::as_str)
    }

    /// The HTTP method name stored under `type`
    pub fn method(&self) -> Option<&str> {
        self.values.get(TYPE_KEY).and_then(Value::as_str)
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.values.get(DATA_KEY).and_then(Value::as_object)
    }

    /// Set one request parameter, creating the `data` object when needed
    pub fn set_data_value(&mut self, key: impl Into<String>, value: Value) {
        self.edit_object(DATA_KEY, |data| data.insert(key.into(), value));
    }

    pub fn cascade(&self) -> Option<&Map<String, Value>> {
        self.values.get(CASCADE_KEY).and_then(Value::as_object)
    }

    /// A single resolved cascading value
    pub fn cascade_value(&self, key: &str) -> Option<&Value> {
        self.cascade().and_then(|c| c.get(key))
    }

    pub fn set_cascade_value(&mut self, key: impl Into<String>, value: Value) {
        self.edit_object(CASCADE_KEY, |cascade| cascade.insert(key.into(), value));
    }

    /// Headers as strings; non-string values are rendered as JSON
    pub fn headers(&self) -> IndexMap<String, String> {
        self.values
            .get(HEADERS_KEY)
            .and_then(Value::as_object)
            .map(|headers| {
                headers
                    .iter()
                    .filter(|(_, value)| !value.is_null())
                    .map(|(name, value)| {
                        let value = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (name.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.edit_object(HEADERS_KEY, |headers| {
            headers.insert(name.into(), Value::String(value.into()))
        });
    }

    /// Merge a higher-precedence layer on top of this record.
    ///
    /// Object values are merged one level deep; anything else replaces the
    /// existing value.
    pub fn merge_layer(&mut self, layer: &Map<String, Value>) {
        for (key, value) in layer {
            match (self.values.get_mut(key), value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    for (k, v) in incoming {
                        existing.insert(k.clone(), v.clone());
                    }
                }
                _ => {
                    self.values.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Edit the object stored under `key`. A missing or non-object value is
    /// replaced by an empty object first; the key keeps its position.
    pub fn edit_object<R>(
        &mut self,
        key: &str,
        edit: impl FnOnce(&mut Map<String, Value>) -> R,
    ) -> R {
        let slot = self.values.entry(key.to_string()).or_insert(Value::Null);
        let mut object = match std::mem::take(slot) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let output = edit(&mut object);
        *slot = Value::Object(object);
        output
    }
}

pub type Callback = Box<dyn FnOnce(&Api, &CallResult) + Send>;

/// Options supplied when calling an endpoint.
#[derive(Default)]
pub struct CallOptions {
    pub(crate) values: Map<String, Value>,
    pub(crate) callback: Option<Callback>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters for the path template and the query or body
    pub fn data(mut self, data: Value) -> Self {
        self.values.insert(DATA_KEY.to_string(), data);
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut options = Options::from_map(std::mem::take(&mut self.values));
        options.set_header(name, value);
        self.values = options.into_map();
        self
    }

    pub fn cascade(mut self, key: impl Into<String>, value: Value) -> Self {
        let mut options = Options::from_map(std::mem::take(&mut self.values));
        options.set_cascade_value(key, value);
        self.values = options.into_map();
        self
    }

    /// Called with the API and the final result just before the call settles,
    /// on both the success and the failure path.
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Api, &CallResult) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

impl From<Value> for CallOptions {
    fn from(data: Value) -> Self {
        CallOptions::new().data(data)
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("values", &self.values)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Default options set through the API accessors
#[derive(Debug, Default)]
pub struct DefaultStore {
    global: DashMap<String, Value>,
    nodes: DashMap<String, Map<String, Value>>,
}

impl DefaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_global(&self, key: &str) -> Option<Value> {
        self.global.get(key).map(|v| v.value().clone())
    }

    pub fn set_global(&self, key: impl Into<String>, value: Value) {
        self.global.insert(key.into(), value);
    }

    pub fn get_node(&self, path: &str, key: &str) -> Option<Value> {
        self.nodes
            .get(path)
            .and_then(|values| values.get(key).cloned())
    }

    pub fn set_node(&self, path: impl Into<String>, key: impl Into<String>, value: Value) {
        self.nodes
            .entry(path.into())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn global_layer(&self) -> Map<String, Value> {
        self.global
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn node_layer(&self, path: &str) -> Map<String, Value> {
        self.nodes
            .get(path)
            .map(|values| values.value().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_layer_shallow_merges_objects() {
        let mut options = Options::from_map(map(json!({
            "data": {"someOption": "global", "keep": 1},
            "type": "GET"
        })));
        options.merge_layer(&map(json!({
            "data": {"someOption": "node"},
            "type": "POST",
            "extra": true
        })));

        assert_eq!(options.data().unwrap()["someOption"], "node");
        assert_eq!(options.data().unwrap()["keep"], 1);
        assert_eq!(options.method(), Some("POST"));
        assert_eq!(options.get("extra"), Some(&json!(true)));
    }

    #[test]
    fn test_merge_layer_replaces_non_objects() {
        let mut options = Options::from_map(map(json!({"data": "scalar"})));
        options.merge_layer(&map(json!({"data": {"a": 1}})));
        assert_eq!(options.get("data"), Some(&json!({"a": 1})));

        options.merge_layer(&map(json!({"data": [1, 2]})));
        assert_eq!(options.get("data"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_object_accessors_create_slots() {
        let mut options = Options::new();
        options.set_data_value("id", json!(1));
        options.set_cascade_value("token", json!("abc"));
        options.set_header("x-token", "abc");
        options.set("headers2", json!(null));

        assert_eq!(options.data().unwrap()["id"], 1);
        assert_eq!(options.cascade_value("token"), Some(&json!("abc")));
        assert_eq!(options.headers().get("x-token").map(String::as_str), Some("abc"));

        options.set("data", json!("not an object"));
        options.set_data_value("x", json!(true));
        assert_eq!(options.get("data"), Some(&json!({"x": true})));
    }

    #[test]
    fn test_edit_object_keeps_contents_and_position() {
        let mut options = Options::from_map(map(json!({
            "url": "http://h",
            "data": {"a": 1},
            "type": "GET"
        })));

        let previous = options.edit_object("data", |data| data.insert("a".into(), json!(2)));
        assert_eq!(previous, Some(json!(1)));
        let keys: Vec<&str> = options.as_map().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["url", "data", "type"]);

        let len = options.edit_object("url", |url| url.len());
        assert_eq!(len, 0);
        assert_eq!(options.get("url"), Some(&json!({})));
    }

    #[test]
    fn test_headers_render_scalars() {
        let options = Options::from_map(map(json!({
            "headers": {"x-count": 3, "x-flag": true, "x-none": null}
        })));
        let headers = options.headers();
        assert_eq!(headers["x-count"], "3");
        assert_eq!(headers["x-flag"], "true");
        assert!(!headers.contains_key("x-none"));
    }

    #[test]
    fn test_call_options_builder() {
        let call = CallOptions::new()
            .data(json!({"id": 1}))
            .header("x-a", "1")
            .cascade("handlerLevel", json!(true))
            .option("timeout", json!(5));

        assert_eq!(call.values["data"], json!({"id": 1}));
        assert_eq!(call.values["headers"], json!({"x-a": "1"}));
        assert_eq!(call.values["cascade"], json!({"handlerLevel": true}));
        assert_eq!(call.values["timeout"], json!(5));
        assert!(call.callback.is_none());

        let from_value: CallOptions = json!({"code": 404}).into();
        assert_eq!(from_value.values["data"], json!({"code": 404}));
    }

    #[test]
    fn test_default_store_layers() {
        let store = DefaultStore::new();
        store.set_global("data", json!({"someOption": "someValue"}));
        store.set_node(".layer.handlerOne", "data", json!({"specified": true}));

        assert_eq!(store.get_global("data"), Some(json!({"someOption": "someValue"})));
        assert_eq!(
            store.get_node(".layer.handlerOne", "data"),
            Some(json!({"specified": true}))
        );
        assert_eq!(store.get_node(".layer", "data"), None);
        assert_eq!(store.global_layer().len(), 1);
        assert!(store.node_layer(".other").is_empty());
    }
}
