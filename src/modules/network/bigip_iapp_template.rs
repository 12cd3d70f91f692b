//! BIG-IP iApp template module
//!
//! Manages iApp templates on an F5 BIG-IP device over iControl REST. The
//! template is identified by the name declared in its own content
//! (`sys application template <name> { ... }`) unless `name` is given.
//!
//! # Reconciliation
//!
//! - `state: present`, template absent: upload the content, load it with
//!   tmsh, then confirm it exists.
//! - `state: present`, template present: upload the content under a
//!   temporary name, compare the device-computed checksum with the existing
//!   template's checksum, and reload the template in place only if they
//!   differ. A template used by an application service is left alone unless
//!   `force` is set.
//! - `state: absent`, template present: refuse if any application service
//!   still uses it, otherwise delete it and confirm it is gone.
//! - Anything else is a no-op.
//!
//! # Example
//!
//! ```yaml
//! - name: Add the iApp contained in template iapp.tmpl
//!   bigip_iapp_template:
//!     content: "{{ lookup('template', 'iapp.tmpl') }}"
//!     server: lb.mydomain.com
//!     user: admin
//!     password: secret
//!     state: present
//!
//! - name: Remove the iApp template
//!   bigip_iapp_template:
//!     name: good_templ
//!     server: lb.mydomain.com
//!     user: admin
//!     password: secret
//!     state: absent
//! ```

use super::bigip::{BigIpClient, BigIpProvider, IappTemplateApi};
use crate::config::BigIpDefaults;
use crate::modules::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
};
use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Partition used when neither the parameters nor the content name one
pub const DEFAULT_PARTITION: &str = "Common";

/// Where the upload endpoint stores files on the device
pub const REMOTE_DOWNLOAD_DIR: &str = "/var/config/rest/downloads";

/// Prefix for the throwaway templates used to compute checksums
pub const TEMPORARY_TEMPLATE_PREFIX: &str = "rustible-";

/// Template name declared in the content, with an optional `/Partition/` path
static TEMPLATE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"sys\s+application\s+template\s+(?P<path>/[^\s{}"'*?|#]+/)?(?P<name>[^\s{}"'*?|#]+)"#)
        .expect("Invalid template name regex")
});

/// Names and partitions end up in tmsh commands run through bash
static OBJECT_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("Invalid object name regex")
});

fn checked_object_name(kind: &str, value: &str) -> ModuleResult<String> {
    if OBJECT_NAME_REGEX.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(ModuleError::InvalidParameter(format!(
            "{} '{}' may only contain letters, digits, '.', '-' and '_'",
            kind, value
        )))
    }
}

/// The declaration header, used to rename the template before upload
static TEMPLATE_HEADER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"sys\s+application\s+template\s+[^\s{]+").expect("Invalid template header regex")
});

/// Desired state of the template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateState {
    #[default]
    Present,
    Absent,
}

impl FromStr for TemplateState {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "present" => Ok(TemplateState::Present),
            "absent" => Ok(TemplateState::Absent),
            _ => Err(ModuleError::InvalidParameter(format!(
                "Invalid state '{}'. Valid states: present, absent",
                s
            ))),
        }
    }
}

impl fmt::Display for TemplateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateState::Present => write!(f, "present"),
            TemplateState::Absent => write!(f, "absent"),
        }
    }
}

/// What a reconciliation pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateOutcome {
    Created,
    Updated,
    Removed,
    /// Present and the checksums match
    UpToDate,
    /// Present with different content, but used by an application service
    InUse,
    /// Already absent
    Absent,
}

impl TemplateOutcome {
    pub fn changed(self) -> bool {
        matches!(
            self,
            TemplateOutcome::Created | TemplateOutcome::Updated | TemplateOutcome::Removed
        )
    }
}

impl fmt::Display for TemplateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateOutcome::Created => write!(f, "created"),
            TemplateOutcome::Updated => write!(f, "updated"),
            TemplateOutcome::Removed => write!(f, "removed"),
            TemplateOutcome::UpToDate => write!(f, "up_to_date"),
            TemplateOutcome::InUse => write!(f, "in_use"),
            TemplateOutcome::Absent => write!(f, "absent"),
        }
    }
}

/// An iApp template, either as declared by the user or as read from the device.
///
/// Both sides share this shape so they can be compared field by field; the
/// device never returns `content` and the user never supplies `checksum`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, rename = "tmplChecksum", skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_modules: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_signing_status: Option<String>,
}

impl TemplateParameters {
    /// Parameters carrying only template content
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Desired state as declared through module parameters
    pub fn from_module_params(params: &ModuleParams) -> ModuleResult<Self> {
        Ok(Self {
            name: params.get_string("name")?.filter(|s| !s.trim().is_empty()),
            partition: params
                .get_string("partition")?
                .filter(|s| !s.trim().is_empty()),
            content: params.get_string("content")?,
            ..Self::default()
        })
    }

    /// The template name: explicit `name`, otherwise parsed from the content.
    pub fn template_name(&self) -> ModuleResult<String> {
        if let Some(name) = &self.name {
            return checked_object_name("name", name.trim());
        }

        let content = self.content.as_deref().ok_or(ModuleError::NoTemplateName)?;
        let name = TEMPLATE_NAME_REGEX
            .captures(content)
            .and_then(|caps| caps.name("name"))
            .map(|m| m.as_str().to_string())
            .ok_or(ModuleError::NoTemplateName)?;
        checked_object_name("name", &name)
    }

    /// The partition: explicit `partition`, then a `/Partition/` path in the
    /// content, then `Common`.
    pub fn template_partition(&self) -> ModuleResult<String> {
        if let Some(partition) = &self.partition {
            return checked_object_name("partition", partition.trim().trim_matches('/'));
        }

        let partition = self
            .content
            .as_deref()
            .and_then(|content| TEMPLATE_NAME_REGEX.captures(content))
            .and_then(|caps| caps.name("path"))
            .map(|m| m.as_str().trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PARTITION.to_string());
        checked_object_name("partition", &partition)
    }

    /// Content with its declaration header renamed to `/<partition>/<name>`.
    ///
    /// Loading the renamed content creates (or replaces) exactly that
    /// template, which is how a temporary copy can be made for checksum
    /// comparison.
    pub fn content_for(&self, name: &str, partition: &str) -> Option<String> {
        let content = self.content.as_deref()?;
        let header = format!("sys application template /{}/{}", partition, name);
        Some(
            TEMPLATE_HEADER_REGEX
                .replace(content, NoExpand(&header))
                .into_owned(),
        )
    }
}

/// Drives one reconciliation pass against a device.
pub struct ModuleManager<'a, A: IappTemplateApi + ?Sized> {
    api: &'a A,
    want: TemplateParameters,
    have: Option<TemplateParameters>,
    name: String,
    partition: String,
    state: TemplateState,
    force: bool,
    check_mode: bool,
}

impl<'a, A: IappTemplateApi + ?Sized> ModuleManager<'a, A> {
    /// Create a manager; fails if no template name can be derived.
    pub fn new(api: &'a A, want: TemplateParameters, state: TemplateState) -> ModuleResult<Self> {
        let name = want.template_name()?;
        let partition = want.template_partition()?;
        Ok(Self {
            api,
            want,
            have: None,
            name,
            partition,
            state,
            force: false,
            check_mode: false,
        })
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Template as last read from the device during an update
    pub fn have(&self) -> Option<&TemplateParameters> {
        self.have.as_ref()
    }

    fn full_path(&self) -> String {
        format!("/{}/{}", self.partition, self.name)
    }

    /// Run the pass and report the result.
    #[instrument(skip(self), fields(template = %self.full_path(), state = %self.state))]
    pub fn exec_module(&mut self) -> ModuleResult<ModuleOutput> {
        let outcome = match self.state {
            TemplateState::Present => self.present()?,
            TemplateState::Absent => self.absent()?,
        };

        let full_path = self.full_path();
        let msg = match outcome {
            TemplateOutcome::Created => format!("iApp template {} created", full_path),
            TemplateOutcome::Updated => format!("iApp template {} updated", full_path),
            TemplateOutcome::Removed => format!("iApp template {} removed", full_path),
            TemplateOutcome::UpToDate => format!("iApp template {} is up to date", full_path),
            TemplateOutcome::InUse => format!(
                "iApp template {} differs but is in use by an application service; set force to update it",
                full_path
            ),
            TemplateOutcome::Absent => format!("iApp template {} is absent", full_path),
        };
        info!(%outcome, changed = outcome.changed(), "{}", msg);

        let output = if outcome.changed() {
            ModuleOutput::changed(msg)
        } else {
            ModuleOutput::ok(msg)
        };

        Ok(output
            .with_data("name", serde_json::json!(self.name))
            .with_data("partition", serde_json::json!(self.partition))
            .with_data("state", serde_json::json!(self.state))
            .with_data("outcome", serde_json::json!(outcome)))
    }

    fn present(&mut self) -> ModuleResult<TemplateOutcome> {
        if self.exists()? {
            self.update()
        } else {
            self.create()
        }
    }

    fn absent(&mut self) -> ModuleResult<TemplateOutcome> {
        if self.exists()? {
            self.remove()
        } else {
            Ok(TemplateOutcome::Absent)
        }
    }

    /// Whether the managed template exists on the device
    pub fn exists(&self) -> ModuleResult<bool> {
        Ok(self.api.template_exists(&self.name, &self.partition)?)
    }

    fn create(&self) -> ModuleResult<TemplateOutcome> {
        if self.check_mode {
            return Ok(TemplateOutcome::Created);
        }
        self.create_on_device(&self.name)?;
        if self.exists()? {
            Ok(TemplateOutcome::Created)
        } else {
            Err(ModuleError::CreateFailed(self.full_path()))
        }
    }

    fn update(&mut self) -> ModuleResult<TemplateOutcome> {
        self.have = Some(self.read_current_from_device(&self.name)?);
        if !self.templates_differ()? {
            return Ok(TemplateOutcome::UpToDate);
        }
        if !self.force && self.template_in_use()? {
            warn!(
                template = %self.full_path(),
                "iApp template differs but is in use; not updating without force"
            );
            return Ok(TemplateOutcome::InUse);
        }
        if self.check_mode {
            return Ok(TemplateOutcome::Updated);
        }

        // The load command refuses to replace a template whose stored
        // checksum no longer matches the content being loaded.
        self.remove_iapp_checksum()?;
        self.create_on_device(&self.name)?;
        self.generate_template_checksum_on_device(&self.name)?;
        Ok(TemplateOutcome::Updated)
    }

    fn remove(&self) -> ModuleResult<TemplateOutcome> {
        if self.template_in_use()? {
            return Err(ModuleError::TemplateInUse {
                name: self.name.clone(),
                partition: self.partition.clone(),
            });
        }
        if self.check_mode {
            return Ok(TemplateOutcome::Removed);
        }
        self.remove_from_device(&self.name)?;
        if self.exists()? {
            Err(ModuleError::DeleteFailed(self.full_path()))
        } else {
            Ok(TemplateOutcome::Removed)
        }
    }

    /// Compare the desired content's checksum with the current template's.
    ///
    /// The device only computes checksums for templates it holds, and not
    /// over the raw text, so the desired content is loaded under a temporary
    /// name, checksummed, and deleted again.
    fn templates_differ(&self) -> ModuleResult<bool> {
        let temp = self.get_temporary_template()?;
        let have_checksum = self.have.as_ref().and_then(|h| h.checksum.as_deref());
        debug!(
            current = ?have_checksum,
            desired = ?temp.checksum,
            "Comparing iApp template checksums"
        );
        Ok(temp.checksum.as_deref() != have_checksum)
    }

    fn get_temporary_template(&self) -> ModuleResult<TemplateParameters> {
        let temp_name = format!("{}{}", TEMPORARY_TEMPLATE_PREFIX, Uuid::new_v4());
        let loaded = self
            .create_on_device(&temp_name)
            .and_then(|()| self.read_current_from_device(&temp_name));

        match loaded {
            Ok(temp) => {
                self.remove_from_device(&temp_name)?;
                Ok(temp)
            }
            Err(e) => {
                // Best effort; the load may have failed before the template existed
                if let Err(cleanup) = self.remove_from_device(&temp_name) {
                    warn!(template = %temp_name, error = %cleanup, "Failed to remove temporary iApp template");
                }
                Err(e)
            }
        }
    }

    fn template_in_use(&self) -> ModuleResult<bool> {
        let full_path = self.full_path();
        let in_use = self
            .api
            .application_service_templates()?
            .iter()
            .any(|template| *template == full_path);
        debug!(template = %full_path, in_use, "Checked application services");
        Ok(in_use)
    }

    fn read_current_from_device(&self, name: &str) -> ModuleResult<TemplateParameters> {
        self.generate_template_checksum_on_device(name)?;
        Ok(self.api.load_template(name, &self.partition)?)
    }

    fn remove_iapp_checksum(&self) -> ModuleResult<()> {
        Ok(self
            .api
            .clear_template_checksum(&self.name, &self.partition)?)
    }

    fn generate_template_checksum_on_device(&self, name: &str) -> ModuleResult<()> {
        let command = format!(
            "tmsh generate sys application template /{}/{} checksum",
            self.partition, name
        );
        self.api.run_bash(&command)?;
        Ok(())
    }

    fn create_on_device(&self, name: &str) -> ModuleResult<()> {
        let content = self
            .want
            .content_for(name, &self.partition)
            .ok_or_else(|| ModuleError::MissingParameter("content".to_string()))?;

        self.api.upload_file(name, content.as_bytes())?;

        let command = format!(
            "tmsh load sys application template {}/{}",
            REMOTE_DOWNLOAD_DIR, name
        );
        if let Some(output) = self.api.run_bash(&command)? {
            if output.contains("Syntax Error") || output.contains("ERROR") {
                return Err(ModuleError::LoadFailed(output));
            }
        }
        Ok(())
    }

    fn remove_from_device(&self, name: &str) -> ModuleResult<()> {
        Ok(self.api.delete_template(name, &self.partition)?)
    }
}

/// Module for managing BIG-IP iApp templates
pub struct BigIpIappTemplateModule {
    defaults: BigIpDefaults,
}

impl BigIpIappTemplateModule {
    pub fn new(defaults: BigIpDefaults) -> Self {
        Self { defaults }
    }

    fn state(params: &ModuleParams) -> ModuleResult<TemplateState> {
        params
            .get_string("state")?
            .map(|s| s.parse::<TemplateState>())
            .transpose()
            .map(Option::unwrap_or_default)
    }
}

impl Default for BigIpIappTemplateModule {
    fn default() -> Self {
        Self::new(BigIpDefaults::default())
    }
}

impl Module for BigIpIappTemplateModule {
    fn name(&self) -> &'static str {
        "bigip_iapp_template"
    }

    fn description(&self) -> &'static str {
        "Manage TCL iApp templates on an F5 BIG-IP device"
    }

    fn optional_params(&self) -> HashMap<&'static str, serde_json::Value> {
        let mut params = HashMap::new();
        params.insert("state", serde_json::json!("present"));
        params.insert("force", serde_json::json!(false));
        params.insert("partition", serde_json::json!(DEFAULT_PARTITION));
        params.insert("server_port", serde_json::json!(self.defaults.server_port));
        params.insert(
            "validate_certs",
            serde_json::json!(self.defaults.validate_certs),
        );
        params
    }

    fn no_log_params(&self) -> &[&'static str] {
        &["password"]
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        let state = Self::state(params)?;
        let want = TemplateParameters::from_module_params(params)?;

        let has_content = want
            .content
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);
        if state == TemplateState::Present && !has_content {
            return Err(ModuleError::MissingParameter("content".to_string()));
        }
        if want.name.is_none() && !has_content {
            return Err(ModuleError::MissingParameter(
                "one of content or name is required".to_string(),
            ));
        }

        want.template_name()?;
        want.template_partition()?;
        params.get_bool("force")?;
        params.get_bool("validate_certs")?;
        params.get_u16("server_port")?;
        Ok(())
    }

    fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        self.validate_params(params)?;

        let state = Self::state(params)?;
        let force = params.get_bool_or("force", false);
        let want = TemplateParameters::from_module_params(params)?;
        let provider = BigIpProvider::from_params(params, &self.defaults)?;
        debug!(?provider, %state, force, check_mode = context.check_mode, "Resolved BIG-IP provider");

        let client = BigIpClient::new(&provider)?;
        ModuleManager::new(&client, want, state)?
            .with_force(force)
            .with_check_mode(context.check_mode)
            .exec_module()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::network::bigip::{BigIpError, MockIappTemplateApi};
    use mockall::Sequence;

    const BASIC_IAPP: &str = include_str!("../../../tests/fixtures/bigip/basic-iapp.tmpl");
    const CREATE_IAPP: &str =
        include_str!("../../../tests/fixtures/bigip/create_iapp_template.iapp");
    const NEW_CHECKSUM: &str = include_str!(
        "../../../tests/fixtures/bigip/load_sys_application_template_w_new_checksum.json"
    );
    const OLD_CHECKSUM: &str = include_str!(
        "../../../tests/fixtures/bigip/load_sys_application_template_w_old_checksum.json"
    );

    fn fixture(json: &str) -> TemplateParameters {
        serde_json::from_str(json).unwrap()
    }

    fn want() -> TemplateParameters {
        TemplateParameters::from_content(BASIC_IAPP)
    }

    fn expect_exists_sequence(api: &mut MockIappTemplateApi, answers: &[bool]) {
        let mut seq = Sequence::new();
        for answer in answers.iter().copied() {
            api.expect_template_exists()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_, _| Ok(answer));
        }
    }

    #[test]
    fn test_module_parameters() {
        let p = TemplateParameters::from_content(CREATE_IAPP);
        assert_eq!(p.template_name().unwrap(), "foo.iapp");
        assert_eq!(p.template_partition().unwrap(), "Common");
    }

    #[test]
    fn test_name_parsed_from_basic_template() {
        assert_eq!(want().template_name().unwrap(), "good_templ");
    }

    #[test]
    fn test_explicit_name_wins() {
        let p = TemplateParameters {
            name: Some("override".to_string()),
            ..want()
        };
        assert_eq!(p.template_name().unwrap(), "override");
    }

    #[test]
    fn test_name_and_partition_from_path() {
        let p = TemplateParameters::from_content(
            "sys application template /Tenant/web_templ {\n  description \"x\"\n}\n",
        );
        assert_eq!(p.template_name().unwrap(), "web_templ");
        assert_eq!(p.template_partition().unwrap(), "Tenant");
    }

    #[test]
    fn test_missing_name_is_an_error() {
        let p = TemplateParameters::from_content("cli script foo { }");
        assert!(matches!(p.template_name(), Err(ModuleError::NoTemplateName)));
    }

    #[test]
    fn test_content_for_renames_header() {
        let content = want().content_for("rustible-1234", "Common").unwrap();
        assert!(content.starts_with("sys application template /Common/rustible-1234 {"));
        assert!(!content.contains("good_templ"));
    }

    #[test]
    fn test_checksum_deserialized_from_device() {
        let current = fixture(NEW_CHECKSUM);
        assert_eq!(current.name.as_deref(), Some("good_templ"));
        assert!(current.checksum.is_some());
        assert_ne!(current.checksum, fixture(OLD_CHECKSUM).checksum);
    }

    #[test]
    fn test_create_iapp_template() {
        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[false, true]);
        api.expect_upload_file()
            .times(1)
            .returning(|_, _| Ok(()));
        api.expect_run_bash().times(1).returning(|_| Ok(None));

        let output = ModuleManager::new(&api, want(), TemplateState::Present)
            .unwrap()
            .exec_module()
            .unwrap();

        assert!(output.changed);
        assert_eq!(output.data["outcome"], serde_json::json!("created"));
    }

    #[test]
    fn test_create_fails_when_template_does_not_appear() {
        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[false, false]);
        api.expect_upload_file().returning(|_, _| Ok(()));
        api.expect_run_bash().returning(|_| Ok(None));

        let result = ModuleManager::new(&api, want(), TemplateState::Present)
            .unwrap()
            .exec_module();

        assert!(matches!(result, Err(ModuleError::CreateFailed(_))));
    }

    #[test]
    fn test_create_reports_tmsh_syntax_error() {
        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[false]);
        api.expect_upload_file().returning(|_, _| Ok(()));
        api.expect_run_bash()
            .returning(|_| Ok(Some("Syntax Error:(/var/config/rest/downloads/good_templ at line: 3) \"foo\" unknown property".to_string())));

        let result = ModuleManager::new(&api, want(), TemplateState::Present)
            .unwrap()
            .exec_module();

        match result {
            Err(ModuleError::LoadFailed(output)) => assert!(output.contains("Syntax Error")),
            other => panic!("expected LoadFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_create_in_check_mode_does_not_touch_device() {
        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[false]);
        api.expect_upload_file().never();
        api.expect_run_bash().never();

        let output = ModuleManager::new(&api, want(), TemplateState::Present)
            .unwrap()
            .with_check_mode(true)
            .exec_module()
            .unwrap();

        assert!(output.changed);
    }

    #[test]
    fn test_update_iapp_template() {
        let current = fixture(NEW_CHECKSUM);
        let temporary = fixture(OLD_CHECKSUM);

        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[true]);
        api.expect_load_template().returning(move |name, _| {
            if name.starts_with(TEMPORARY_TEMPLATE_PREFIX) {
                Ok(temporary.clone())
            } else {
                Ok(current.clone())
            }
        });
        api.expect_run_bash().returning(|_| Ok(None));
        api.expect_upload_file().returning(|_, _| Ok(()));
        api.expect_delete_template()
            .times(1)
            .withf(|name, _| name.starts_with(TEMPORARY_TEMPLATE_PREFIX))
            .returning(|_, _| Ok(()));
        api.expect_application_service_templates()
            .times(1)
            .returning(|| Ok(vec![]));
        api.expect_clear_template_checksum()
            .times(1)
            .returning(|_, _| Ok(()));

        let mut manager = ModuleManager::new(&api, want(), TemplateState::Present).unwrap();
        let output = manager.exec_module().unwrap();

        assert!(output.changed);
        assert_eq!(output.data["outcome"], serde_json::json!("updated"));
        assert_eq!(
            manager.have().and_then(|h| h.checksum.clone()),
            fixture(NEW_CHECKSUM).checksum
        );
    }

    #[test]
    fn test_update_with_matching_checksum_is_a_noop() {
        let current = fixture(NEW_CHECKSUM);

        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[true]);
        api.expect_load_template()
            .returning(move |_, _| Ok(current.clone()));
        api.expect_run_bash().returning(|_| Ok(None));
        api.expect_upload_file().times(1).returning(|_, _| Ok(()));
        api.expect_delete_template().times(1).returning(|_, _| Ok(()));
        api.expect_application_service_templates().never();
        api.expect_clear_template_checksum().never();

        let output = ModuleManager::new(&api, want(), TemplateState::Present)
            .unwrap()
            .exec_module()
            .unwrap();

        assert!(!output.changed);
        assert_eq!(output.data["outcome"], serde_json::json!("up_to_date"));
    }

    #[test]
    fn test_update_skipped_when_template_in_use() {
        let current = fixture(NEW_CHECKSUM);
        let temporary = fixture(OLD_CHECKSUM);

        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[true]);
        api.expect_load_template().returning(move |name, _| {
            if name.starts_with(TEMPORARY_TEMPLATE_PREFIX) {
                Ok(temporary.clone())
            } else {
                Ok(current.clone())
            }
        });
        api.expect_run_bash().returning(|_| Ok(None));
        api.expect_upload_file().times(1).returning(|_, _| Ok(()));
        api.expect_delete_template().times(1).returning(|_, _| Ok(()));
        api.expect_application_service_templates()
            .returning(|| Ok(vec!["/Common/good_templ".to_string()]));
        api.expect_clear_template_checksum().never();

        let output = ModuleManager::new(&api, want(), TemplateState::Present)
            .unwrap()
            .exec_module()
            .unwrap();

        assert!(!output.changed);
        assert_eq!(output.data["outcome"], serde_json::json!("in_use"));
    }

    #[test]
    fn test_forced_update_ignores_usage() {
        let current = fixture(NEW_CHECKSUM);
        let temporary = fixture(OLD_CHECKSUM);

        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[true]);
        api.expect_load_template().returning(move |name, _| {
            if name.starts_with(TEMPORARY_TEMPLATE_PREFIX) {
                Ok(temporary.clone())
            } else {
                Ok(current.clone())
            }
        });
        api.expect_run_bash().returning(|_| Ok(None));
        api.expect_upload_file().times(2).returning(|_, _| Ok(()));
        api.expect_delete_template().times(1).returning(|_, _| Ok(()));
        api.expect_application_service_templates().never();
        api.expect_clear_template_checksum()
            .times(1)
            .returning(|_, _| Ok(()));

        let output = ModuleManager::new(&api, want(), TemplateState::Present)
            .unwrap()
            .with_force(true)
            .exec_module()
            .unwrap();

        assert!(output.changed);
    }

    #[test]
    fn test_delete_iapp_template() {
        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[true, false]);
        api.expect_application_service_templates()
            .returning(|| Ok(vec!["/Common/other".to_string()]));
        api.expect_delete_template().times(1).returning(|_, _| Ok(()));

        let output = ModuleManager::new(&api, want(), TemplateState::Absent)
            .unwrap()
            .exec_module()
            .unwrap();

        assert!(output.changed);
        assert_eq!(output.data["outcome"], serde_json::json!("removed"));
    }

    #[test]
    fn test_delete_iapp_template_idempotent() {
        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[false]);
        api.expect_delete_template().never();

        let output = ModuleManager::new(&api, want(), TemplateState::Absent)
            .unwrap()
            .exec_module()
            .unwrap();

        assert!(!output.changed);
        assert_eq!(output.data["outcome"], serde_json::json!("absent"));
    }

    #[test]
    fn test_delete_template_in_use_fails() {
        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[true]);
        api.expect_application_service_templates()
            .returning(|| Ok(vec!["/Common/good_templ".to_string()]));
        api.expect_delete_template().never();

        let result = ModuleManager::new(&api, want(), TemplateState::Absent)
            .unwrap()
            .exec_module();

        assert!(matches!(
            result,
            Err(ModuleError::TemplateInUse { ref name, ref partition })
                if name == "good_templ" && partition == "Common"
        ));
    }

    #[test]
    fn test_delete_fails_when_template_remains() {
        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[true, true]);
        api.expect_application_service_templates()
            .returning(|| Ok(vec![]));
        api.expect_delete_template().returning(|_, _| Ok(()));

        let result = ModuleManager::new(&api, want(), TemplateState::Absent)
            .unwrap()
            .exec_module();

        assert!(matches!(result, Err(ModuleError::DeleteFailed(_))));
    }

    #[test]
    fn test_http_error_propagates() {
        let mut api = MockIappTemplateApi::new();
        api.expect_template_exists()
            .returning(|_, _| Err(BigIpError::unexpected(Some(401), "Authentication failed")));

        let result = ModuleManager::new(&api, want(), TemplateState::Present)
            .unwrap()
            .exec_module();

        match result {
            Err(ModuleError::Device(err)) => assert_eq!(err.status(), Some(401)),
            other => panic!("expected device error, got {:?}", other),
        }
    }

    #[test]
    fn test_shell_metacharacters_in_names_are_rejected() {
        let injected = TemplateParameters::from_content("sys application template foo;reboot {}");
        assert!(matches!(
            injected.template_name(),
            Err(ModuleError::InvalidParameter(_))
        ));

        let explicit = TemplateParameters {
            name: Some("foo $(reboot)".to_string()),
            ..want()
        };
        assert!(matches!(
            explicit.template_name(),
            Err(ModuleError::InvalidParameter(_))
        ));

        let partition = TemplateParameters {
            partition: Some("Common`reboot`".to_string()),
            ..want()
        };
        assert!(matches!(
            partition.template_partition(),
            Err(ModuleError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_rejected_name_never_reaches_device() {
        let mut api = MockIappTemplateApi::new();
        api.expect_template_exists().never();
        api.expect_upload_file().never();
        api.expect_run_bash().never();

        let result = ModuleManager::new(
            &api,
            TemplateParameters::from_content("sys application template foo;reboot {}"),
            TemplateState::Present,
        );
        assert!(matches!(result, Err(ModuleError::InvalidParameter(_))));
    }

    #[test]
    fn test_name_stops_at_line_end() {
        let p = TemplateParameters::from_content(
            "sys application template foo\n  actions {\n  }\n",
        );
        assert_eq!(p.template_name().unwrap(), "foo");
    }

    #[test]
    fn test_update_in_check_mode_leaves_template_alone() {
        let current = fixture(NEW_CHECKSUM);
        let temporary = fixture(OLD_CHECKSUM);

        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[true]);
        api.expect_load_template().returning(move |name, _| {
            if name.starts_with(TEMPORARY_TEMPLATE_PREFIX) {
                Ok(temporary.clone())
            } else {
                Ok(current.clone())
            }
        });
        api.expect_run_bash().returning(|_| Ok(None));
        // Only the throwaway copy used for the checksum is written
        api.expect_upload_file()
            .times(1)
            .withf(|name, _| name.starts_with(TEMPORARY_TEMPLATE_PREFIX))
            .returning(|_, _| Ok(()));
        api.expect_delete_template()
            .times(1)
            .withf(|name, _| name.starts_with(TEMPORARY_TEMPLATE_PREFIX))
            .returning(|_, _| Ok(()));
        api.expect_application_service_templates()
            .returning(|| Ok(vec![]));
        api.expect_clear_template_checksum().never();

        let output = ModuleManager::new(&api, want(), TemplateState::Present)
            .unwrap()
            .with_check_mode(true)
            .exec_module()
            .unwrap();

        assert!(output.changed);
        assert_eq!(output.data["outcome"], serde_json::json!("updated"));
    }

    #[test]
    fn test_delete_in_check_mode_does_not_delete() {
        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[true]);
        api.expect_application_service_templates()
            .returning(|| Ok(vec![]));
        api.expect_delete_template().never();

        let output = ModuleManager::new(&api, want(), TemplateState::Absent)
            .unwrap()
            .with_check_mode(true)
            .exec_module()
            .unwrap();

        assert!(output.changed);
        assert_eq!(output.data["outcome"], serde_json::json!("removed"));
    }

    #[test]
    fn test_temporary_template_removed_when_read_fails() {
        let current = fixture(NEW_CHECKSUM);

        let mut api = MockIappTemplateApi::new();
        expect_exists_sequence(&mut api, &[true]);
        api.expect_load_template().returning(move |name, _| {
            if name.starts_with(TEMPORARY_TEMPLATE_PREFIX) {
                Err(BigIpError::unexpected(Some(500), "Internal Server Error"))
            } else {
                Ok(current.clone())
            }
        });
        api.expect_run_bash().returning(|_| Ok(None));
        api.expect_upload_file().times(1).returning(|_, _| Ok(()));
        api.expect_delete_template()
            .times(1)
            .withf(|name, _| name.starts_with(TEMPORARY_TEMPLATE_PREFIX))
            .returning(|_, _| Ok(()));
        api.expect_clear_template_checksum().never();

        let result = ModuleManager::new(&api, want(), TemplateState::Present)
            .unwrap()
            .exec_module();

        match result {
            Err(ModuleError::Device(err)) => assert_eq!(err.status(), Some(500)),
            other => panic!("expected device error, got {:?}", other),
        }
    }

    #[test]
    fn test_template_state_parsing() {
        assert_eq!(
            "present".parse::<TemplateState>().unwrap(),
            TemplateState::Present
        );
        assert_eq!(
            "ABSENT".parse::<TemplateState>().unwrap(),
            TemplateState::Absent
        );
        assert!("started".parse::<TemplateState>().is_err());
    }

    #[test]
    fn test_validate_params() {
        let module = BigIpIappTemplateModule::default();

        let mut params: ModuleParams = HashMap::new();
        params.insert("content".to_string(), serde_json::json!(BASIC_IAPP));
        assert!(module.validate_params(&params).is_ok());

        params.insert("state".to_string(), serde_json::json!("bogus"));
        assert!(module.validate_params(&params).is_err());

        let mut absent_by_name: ModuleParams = HashMap::new();
        absent_by_name.insert("name".to_string(), serde_json::json!("good_templ"));
        absent_by_name.insert("state".to_string(), serde_json::json!("absent"));
        assert!(module.validate_params(&absent_by_name).is_ok());

        let mut present_by_name = absent_by_name.clone();
        present_by_name.insert("state".to_string(), serde_json::json!("present"));
        assert!(matches!(
            module.validate_params(&present_by_name),
            Err(ModuleError::MissingParameter(_))
        ));

        let mut nameless: ModuleParams = HashMap::new();
        nameless.insert("content".to_string(), serde_json::json!("not a template"));
        assert!(matches!(
            module.validate_params(&nameless),
            Err(ModuleError::NoTemplateName)
        ));
    }

    #[test]
    fn test_module_metadata() {
        let module = BigIpIappTemplateModule::default();
        assert_eq!(module.name(), "bigip_iapp_template");
        assert!(!module.description().is_empty());
        assert_eq!(module.no_log_params(), &["password"]);
        assert_eq!(
            module.optional_params().get("state"),
            Some(&serde_json::json!("present"))
        );
    }
}
