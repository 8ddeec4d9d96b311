pub mod blueprint;
pub mod dispatcher;
pub mod executor;
pub mod local;
pub mod prompt;
pub mod registry;
pub mod route;
pub mod spec;
pub mod validate;

pub use blueprint::{ToolBlueprint, ToolType, all_blueprints};
pub use executor::{SafeExecutor, ToolExecutor};
pub use registry::{LocalService, ToolMetadata, ToolRegistry, synthesized_id};
pub use route::{RoutedParams, route_params};
pub use spec::{ParamSpec, ParamType, Route};
pub use validate::ParameterValidator;
