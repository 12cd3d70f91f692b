//! F5 BIG-IP support shared by the `bigip_*` modules
//!
//! - [`BigIpProvider`]: where and how to reach the device
//! - [`BigIpClient`]: a blocking iControl REST client
//! - [`IappTemplateApi`]: the device operations the iApp template module needs

pub mod client;
pub mod provider;

pub use client::{
    BigIpClient, BigIpError, BigIpResult, IappTemplateApi, APPLICATION_SERVICE_PATH,
    APPLICATION_TEMPLATE_PATH, BASH_PATH, UPLOAD_PATH,
};
pub use provider::BigIpProvider;

#[cfg(test)]
pub use client::MockIappTemplateApi;
