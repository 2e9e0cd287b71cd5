// Declaration compiler and cascading pipeline
pub mod api;
pub mod cascade;
pub mod declaration;
pub mod error;
pub mod hook;
pub mod normalize;
pub mod options;
pub mod pipeline;
pub mod plugin;
pub mod result;

pub use api::{Api, ApiBuilder, Endpoint, Member, Namespace, NamespaceRef};
pub use cascade::{resolve_cascade, rule, ExtendRule, SharedRule, ShallowMerge};
pub use declaration::{Declaration, NodeDeclaration};
pub use error::{RapierError, Result};
pub use hook::{hook, Hook, SharedHook};
pub use normalize::{normalize, NodeType, NormalizedNode, NormalizedTree, ROOT_PATH};
pub use options::{CallOptions, Options};
pub use plugin::{
    register_plugin, reset_plugins, IntoPlugin, Plugin, PluginRegistry, RegistrySnapshot, Stage,
    StagePhase, PREFILTER_STAGE, PROCESS_RESULT_STAGE,
};
pub use result::{CallFailure, CallResult, Deferred, Outcome};

// Transport seam re-exported for callers that only depend on this crate
pub use rapier_transport::{
    Method, RecordingTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
#[cfg(feature = "http")]
pub use rapier_transport::{HttpConfig, HttpTransport};
