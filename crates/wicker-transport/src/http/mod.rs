//! HTTP serving and the outbound HTTP client group.

pub mod client;
pub mod extract;
pub mod server;

pub use client::{install as install_http_client, install_with as install_http_client_with};
pub use extract::{RequestFacets, SID_COOKIE, SID_HEADER, validate_token};
pub use server::{GuardContext, GuardFn, MountOptions, error_response, mount};
