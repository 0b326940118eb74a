//! Ready-made adapters.

pub mod http;

pub use http::{HttpAdapter, RequestDescriptor, RestRequest, RouteSpec};
