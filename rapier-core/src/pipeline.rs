// Pipeline executor
// One invocation: resolve options, run pre-request stages and prefilters,
// call the transport (or the node's handler), run post-response stages and
// result processors, then classify the status.

use crate::api::Api;
use crate::cascade;
use crate::declaration::parse_method;
use crate::error::{RapierError, Result};
use crate::normalize::NormalizedNode;
use crate::options::{
    CallOptions, Options, BASE_URL_KEY, CASCADE_KEY, DATA_KEY, TYPE_KEY, URL_KEY,
};
use crate::plugin::{RegistrySnapshot, StagePhase};
use crate::result::{CallFailure, CallResult, Outcome};
use rapier_transport::{expand, Method, TransportError, TransportRequest};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

/// Run the full pipeline for `path` and classify the outcome.
pub(crate) async fn invoke(api: Api, path: String, call: CallOptions) -> Outcome {
    let CallOptions { values, callback } = call;
    let mut result = CallResult::new();

    debug!("Invoking {}", path);
    let error = match run(&api, &path, values, &mut result).await {
        Ok(transport_error) => transport_error,
        Err(error) => {
            warn!("Invocation of {} aborted: {}", path, error);
            result.data = Value::String(error.to_string());
            Some(error)
        }
    };

    if let Some(callback) = callback {
        callback(&api, &result);
    }

    match error {
        None if result.is_success() => {
            debug!("{} settled with status {}", path, result.status);
            Ok(result)
        }
        None => {
            debug!("{} failed with status {}", path, result.status);
            Err(CallFailure {
                path,
                result,
                error: None,
            })
        }
        Some(error) => Err(CallFailure {
            path,
            result,
            error: Some(error),
        }),
    }
}

/// Errors returned here abort the pipeline. A transport failure does not:
/// it is recorded on the result, the post-response side still runs, and it
/// comes back as `Ok(Some(_))`.
async fn run(
    api: &Api,
    path: &str,
    call_values: Map<String, Value>,
    result: &mut CallResult,
) -> Result<Option<RapierError>> {
    let tree = api.tree();
    let chain = tree
        .chain(path)
        .ok_or_else(|| RapierError::UnknownPath(path.to_string()))?;
    let leaf = match chain.last() {
        Some(leaf) if leaf.is_invocable() => *leaf,
        _ => return Err(RapierError::UnknownPath(path.to_string())),
    };
    let snapshot = api.snapshot();

    let mut options = resolve_options(api, snapshot, &chain, leaf, call_values)?;
    trace!("Resolved options for {}: {:?}", leaf.path, options);

    run_stages(api, snapshot, StagePhase::PreRequest, &mut options, result).await?;
    for node in &chain {
        if let Some(prefilter) = &node.spec.prefilter {
            prefilter
                .run(api, &mut options, result)
                .await
                .map_err(|e| RapierError::stage(format!("{}#prefilter", node.path), e))?;
        }
    }

    let mut transport_error = None;
    match &leaf.spec.handler {
        Some(handler) => {
            result.status = 200;
            handler
                .run(api, &mut options, result)
                .await
                .map_err(|e| RapierError::stage(format!("{}#handler", leaf.path), e))?;
        }
        None => {
            let request = build_request(&options)?;
            result.request = request.describe();
            match api.transport().send(request).await {
                Ok(response) => {
                    result.status = response.status;
                    result.data = response.body;
                }
                Err(e) => {
                    let error = RapierError::from(e);
                    warn!("Transport failed for {}: {}", leaf.path, error);
                    result.status = 0;
                    result.data = Value::String(error.to_string());
                    transport_error = Some(error);
                }
            }
        }
    }

    run_stages(api, snapshot, StagePhase::PostResponse, &mut options, result).await?;
    for node in &chain {
        if let Some(process_result) = &node.spec.process_result {
            process_result
                .run(api, &mut options, result)
                .await
                .map_err(|e| RapierError::stage(format!("{}#processResult", node.path), e))?;
        }
    }

    Ok(transport_error)
}

async fn run_stages(
    api: &Api,
    snapshot: &RegistrySnapshot,
    phase: StagePhase,
    options: &mut Options,
    result: &mut CallResult,
) -> Result<()> {
    for stage in snapshot.stages(phase) {
        trace!("Running stage {} from plugin {}", stage.name, stage.plugin);
        stage
            .hook
            .run(api, options, result)
            .await
            .map_err(|e| RapierError::stage(stage.name.clone(), e))?;
    }
    Ok(())
}

/// Layer the options record: declaration, global defaults, node defaults,
/// call-time values, and finally the resolved cascade. An extend rule
/// registered under `cascade` itself replaces the whole record. The
/// declared `baseURL` is the nearest one on the chain.
fn resolve_options(
    api: &Api,
    snapshot: &RegistrySnapshot,
    chain: &[&NormalizedNode],
    leaf: &NormalizedNode,
    call_values: Map<String, Value>,
) -> Result<Options> {
    let mut options = Options::new();
    seed_from_declaration(&mut options, chain, leaf);

    let defaults = api.defaults();
    options.merge_layer(&defaults.global_layer());
    options.merge_layer(&defaults.node_layer(&leaf.path));
    options.merge_layer(&call_values);

    match snapshot.rules().get(CASCADE_KEY) {
        Some(rule) => {
            let record = cascade::resolve_record(chain, rule.as_ref())?;
            options.set(CASCADE_KEY, record);
        }
        None => {
            let resolved = cascade::resolve_all(chain, snapshot.rules())?;
            options.edit_object(CASCADE_KEY, |target| {
                for (key, value) in resolved {
                    target.insert(key, value);
                }
            });
        }
    }
    Ok(options)
}

fn seed_from_declaration(
    options: &mut Options,
    chain: &[&NormalizedNode],
    leaf: &NormalizedNode,
) {
    if let Some(base_url) = chain.iter().rev().find_map(|node| node.spec.base_url.as_ref()) {
        options.set(BASE_URL_KEY, Value::String(base_url.clone()));
    }
    let spec = &leaf.spec;
    if let Some(url) = &spec.url {
        options.set(URL_KEY, Value::String(url.clone()));
    }
    options.set(
        TYPE_KEY,
        Value::String(spec.method_or_default().as_str().to_string()),
    );
}

/// Methods whose remaining parameters travel in the body rather than the query
pub fn sends_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn build_request(options: &Options) -> Result<TransportRequest> {
    let template = options
        .url()
        .ok_or_else(|| TransportError::InvalidRequest("no url resolved for request".into()))?;
    let template = join_url(options.base_url(), template)?;
    let method = request_method(options.method().unwrap_or("GET"))?;

    let (params, raw_body) = match options.get(DATA_KEY) {
        None | Some(Value::Null) => (Map::new(), None),
        Some(Value::Object(map)) => (map.clone(), None),
        Some(other) => (Map::new(), Some(other.clone())),
    };

    let expanded = expand(&template, &params)?;
    let mut request = TransportRequest::new(method.clone(), expanded.url);
    request.headers = options.headers();

    if sends_body(&method) {
        if let Some(body) = raw_body {
            request.body = Some(body);
        } else if !expanded.remaining.is_empty() {
            request.body = Some(Value::Object(expanded.remaining));
        }
    } else {
        if raw_body.is_some() {
            return Err(TransportError::InvalidRequest(format!(
                "{} request data must be an object",
                method
            ))
            .into());
        }
        request.query = expanded.remaining;
    }
    Ok(request)
}

/// Absolute URLs are used as they are; relative ones are appended to the
/// base with exactly one `/` between them.
fn join_url(base_url: Option<&str>, url: &str) -> Result<String> {
    if url.contains("://") {
        return Ok(url.to_string());
    }
    match base_url {
        Some(base) if url.is_empty() => Ok(base.to_string()),
        Some(base) => Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        )),
        None => Err(TransportError::InvalidRequest(format!(
            "relative url '{}' and no baseURL to resolve it against",
            url
        ))
        .into()),
    }
}

fn request_method(name: &str) -> Result<Method> {
    parse_method(URL_KEY, name).map_err(|_| {
        RapierError::from(TransportError::InvalidRequest(format!(
            "unsupported method '{}'",
            name
        )))
    })
}
