//! Network Device Modules
//!
//! Modules that manage network appliances through their management APIs
//! rather than over an SSH shell. Each module talks to the device from the
//! control node, so no agent or interpreter is needed on the target.
//!
//! # Supported Platforms
//!
//! - **F5 BIG-IP**: iApp templates via `bigip_iapp_template` (iControl REST)
//!
//! # Example Usage
//!
//! ```yaml
//! - name: Upload an iApp template
//!   bigip_iapp_template:
//!     content: "{{ lookup('file', 'my-iapp.tmpl') }}"
//!     server: lb.example.com
//!     user: admin
//!     password: secret
//!     state: present
//! ```
//!
//! # Architecture
//!
//! ```text
//! +----------------------+     +-------------------+
//! | bigip_iapp_template  |---->|  ModuleManager    |
//! +----------------------+     +-------------------+
//!                                       |
//!                                       v
//!                              +-------------------+
//!                              |  IappTemplateApi  |
//!                              |  (BigIpClient,    |
//!                              |   iControl REST)  |
//!                              +-------------------+
//! ```

pub mod bigip;
pub mod bigip_iapp_template;

pub use bigip::{BigIpClient, BigIpError, BigIpProvider, IappTemplateApi};
pub use bigip_iapp_template::{
    BigIpIappTemplateModule, ModuleManager, TemplateParameters, TemplateState,
};

use crate::config::Config;
use crate::modules::ModuleRegistry;
use std::sync::Arc;

/// Register all network modules with the registry
pub fn register_network_modules(registry: &mut ModuleRegistry, config: &Config) {
    registry.register(Arc::new(BigIpIappTemplateModule::new(config.bigip.clone())));
}
