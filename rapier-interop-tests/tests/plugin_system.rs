// Runs against the process-wide registry, so everything lives in one test.

use rapier_core::{
    hook, register_plugin, reset_plugins, rule, Api, CallOptions, Plugin,
};
use rapier_interop_tests::{init_test_logging, layer_declaration, EchoServer, EchoServerConfig};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Flags {
    stage: AtomicBool,
    extend_calls: AtomicUsize,
}

fn uniq_plugin(flags: &Arc<Flags>) -> Plugin {
    let stage_flags = flags.clone();
    let rule_flags = flags.clone();
    Plugin::new("Some plugin name")
        .stage(
            "_prefilter",
            hook(move |_, options, _| {
                anyhow::ensure!(
                    options.get("cascade") == Some(&json!("some uniq string")),
                    "cascade was not reduced by the plugin rule"
                );
                stage_flags.stage.store(true, Ordering::SeqCst);
                Ok(())
            }),
        )
        .extend_rule(
            "cascade",
            rule(move |_, _, _| {
                rule_flags.extend_calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!("some uniq string"))
            }),
        )
}

async fn handler_one(base_url: &str) -> rapier_core::Outcome {
    let api = Api::new(layer_declaration(base_url, false).unwrap()).unwrap();
    api.endpoint("layer.handlerOne")
        .unwrap()
        .invoke(CallOptions::new())
        .await
}

#[tokio::test]
async fn test_plugin_system() {
    init_test_logging();
    let server = EchoServer::start(&EchoServerConfig::ephemeral()).await.unwrap();
    let base = server.base_url();

    // plugin record
    reset_plugins();
    let flags = Arc::new(Flags::default());
    register_plugin(uniq_plugin(&flags)).unwrap();
    handler_one(&base).await.unwrap();
    assert!(flags.stage.load(Ordering::SeqCst));
    // once per level: root, layer, handler
    assert_eq!(flags.extend_calls.load(Ordering::SeqCst), 3);

    // plugin factory
    reset_plugins();
    let flags = Arc::new(Flags::default());
    let factory_flags = flags.clone();
    register_plugin(move || uniq_plugin(&factory_flags)).unwrap();
    handler_one(&base).await.unwrap();
    assert!(flags.stage.load(Ordering::SeqCst));
    assert!(flags.extend_calls.load(Ordering::SeqCst) > 0);

    // several stages
    reset_plugins();
    let flags = Arc::new(Flags::default());
    register_plugin(uniq_plugin(&flags).stage(
        "_processResult",
        hook(|_, _, result| {
            result
                .extensions
                .insert("secondStageInited".into(), json!(true));
            Ok(())
        }),
    ))
    .unwrap();
    let result = handler_one(&base).await.unwrap();
    assert_eq!(result.extensions["secondStageInited"], true);
    assert!(flags.stage.load(Ordering::SeqCst));

    // reset leaves nothing behind
    reset_plugins();
    let result = handler_one(&base).await.unwrap();
    assert!(result.extensions.is_empty());
    assert_eq!(result.data["path"], "/layer/handlerOne");
    assert_eq!(
        rapier_core::PluginRegistry::global().stage_names(),
        vec!["_prefilter", "_processResult"]
    );

    // malformed records are rejected at registration
    let err = register_plugin(Plugin::new("bad").stage("prefilter", hook(|_, _, _| Ok(()))))
        .unwrap_err();
    assert!(err.is_fatal());
}
