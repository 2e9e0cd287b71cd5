// Reference declaration
// The `layer` API used by the end-to-end tests: a root with cascade flags
// and single-shot hooks, a `layer` namespace, and five handlers covering a
// full record, URL shorthand, a local function, a GET template and a POST
// template.

use anyhow::{anyhow, ensure};
use rapier_core::{hook, Declaration, Method, NodeDeclaration, Result};
use serde_json::json;

/// Paths of every callable in the layer declaration
pub const LAYER_ENDPOINTS: [&str; 5] = [
    ".layer.handlerOne",
    ".layer.handlerTwo",
    ".layer.handlerThree",
    ".layer.handlerFour",
    ".layer.handlerFive",
];

/// Build the layer declaration against a server rooted at `base_url`
/// (with trailing slash). The root prefilter insists that all three
/// cascade levels resolved; pass `root_prefilter = false` to omit it.
pub fn layer_declaration(base_url: &str, root_prefilter: bool) -> Result<Declaration> {
    let mut root = NodeDeclaration::new()
        .cascade("rootLevel", json!(true))
        .process_result(hook(|api, _, result| {
            ensure!(!result.data.is_null(), "result has no data");
            ensure!(!result.request.is_null(), "result has no request");
            ensure!(api.tree().contains(".layer"), "hook bound to a foreign api");
            Ok(())
        }));
    if root_prefilter {
        root = root.prefilter(hook(|_, options, _| {
            for level in ["rootLevel", "layerLevel", "handlerLevel"] {
                let set = options
                    .cascade_value(level)
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if !set {
                    return Err(anyhow!("cascade flag '{}' not resolved", level));
                }
            }
            Ok(())
        }));
    }

    Declaration::from_paths([
        (".", root.into()),
        (
            ".layer",
            NodeDeclaration::new().cascade("layerLevel", json!(true)).into(),
        ),
        (
            ".layer.handlerOne",
            NodeDeclaration::endpoint(format!("{}layer/handlerOne", base_url))
                .cascade("handlerLevel", json!(true))
                .into(),
        ),
        (
            ".layer.handlerTwo",
            Declaration::from(format!("{}layer/handlerTwo", base_url)),
        ),
        (
            ".layer.handlerThree",
            Declaration::handler(hook(|_, _, result| {
                result.data = json!({"functionExecuted": true});
                result.request = json!({});
                Ok(())
            })),
        ),
        (
            ".layer.handlerFour",
            NodeDeclaration::endpoint(format!("{}layer/handlerFour/:id", base_url)).into(),
        ),
        (
            ".layer.handlerFive",
            NodeDeclaration::endpoint(format!("{}layer/handlerFive/:id", base_url))
                .method(Method::POST)
                .into(),
        ),
    ])
}
