//! Proxy core: endpoint resolution, header composition, dispatch

mod allowlist;
mod dispatcher;
pub mod headers;
mod request;
mod resolver;
mod response;
mod validation;

pub use allowlist::TargetAllowList;
pub use dispatcher::{ProxyDispatcher, ResponseMode};
pub use headers::build_headers;
pub use request::{ProxyRequest, RequestBody};
pub use resolver::{EndpointResolver, PathRewrite, ResolvedEndpoint, RoutingRule};
pub use response::{ErrorPayload, INVALID_URL_MESSAGE, ProxyResponse, ResponseBody};
pub use validation::{BodyValidator, ValidationFailure, Violation};
