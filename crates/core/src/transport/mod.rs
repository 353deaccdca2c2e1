//! HTTP transport port.
//!
//! The flows only see [`HttpClient`] and [`Connector`]; production uses
//! [`ReqwestConnector`], tests use the scripted mocks in `crate::testing`.

mod reqwest_client;
mod types;

pub use reqwest_client::{ReqwestConnector, ReqwestHttpClient};
pub use types::*;
