use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use tf_provider::schema::{AttributeConstraint, AttributeType, Block, Description, NestedBlock, Schema};
use tf_provider::value::{Value, ValueEmpty, ValueList, ValueSet, ValueString};
use tf_provider::{map, AttributePath, Diagnostics, Resource};

use crate::client::ServiceClient;
use crate::config::Config;
use crate::provider::ProviderMeta;
use crate::utils::{
    attribute, check_deleted, force_new, keep_prior, non_empty, or_unknown, region_attribute, string,
    ReportDiagnostics, WithSchema,
};
use crate::wait::{is_retryable, retry, Timeouts};

use super::api::{self, Agency, AgencyOpts, Role, RoleScope};

const DEFAULT_DURATION: &str = "FOREVER";
const MAX_ROLES: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct ProjectRoleState<'a> {
    #[serde(borrow = "'a")]
    pub project: ValueString<'a>,
    pub roles: ValueSet<ValueString<'a>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgencyState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub region: ValueString<'a>,
    pub name: ValueString<'a>,
    pub delegated_domain_name: ValueString<'a>,
    pub delegated_service_name: ValueString<'a>,
    pub description: ValueString<'a>,
    pub duration: ValueString<'a>,
    pub project_role: ValueList<Value<ProjectRoleState<'a>>>,
    pub domain_roles: ValueSet<ValueString<'a>>,
    pub expire_time: ValueString<'a>,
    pub create_time: ValueString<'a>,
}

impl<'a> WithSchema for AgencyState<'a> {
    fn schema() -> Schema {
        use AttributeConstraint::*;
        let roles = |constraint: AttributeConstraint, description: &'static str| {
            attribute(
                AttributeType::Set(Box::new(AttributeType::String)),
                constraint,
                description,
            )
        };
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => string(Computed, "ID of the agency"),
                    "region" => region_attribute(),
                    "name" => string(Required, "Name of the agency"),
                    "delegated_domain_name" => string(Optional, "Name of the delegated user domain"),
                    "delegated_service_name" => string(Optional, "Name of the delegated cloud service, starting with op_svc_"),
                    "description" => string(OptionalComputed, "Supplementary information about the agency"),
                    "duration" => string(Optional, "Validity period of the agency: FOREVER, ONEDAY or a number of days"),
                    "domain_roles" => roles(Optional, "Roles granted on the domain"),
                    "expire_time" => string(Computed, "Expiration time of the agency"),
                    "create_time" => string(Computed, "Creation time of the agency")
                },
                blocks: map! {
                    "project_role" => NestedBlock::Set(Block {
                        attributes: map! {
                            "project" => string(Required, "Name of the project"),
                            "roles" => roles(Required, "Roles granted on the project")
                        },
                        description: Description::plain("Roles granted on a project"),
                        ..Default::default()
                    })
                },
                description: Description::plain("IAM agency delegating permissions to another account or a cloud service"),
                ..Default::default()
            },
        }
    }
}

/// `op_svc_` followed by letters designates a cloud service
fn is_service_name(name: &str) -> bool {
    name.strip_prefix("op_svc_")
        .map_or(false, |rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphabetic()))
}

fn starts_as_service_name(name: &str) -> bool {
    name.strip_prefix("op_svc_")
        .and_then(|rest| rest.chars().next())
        .map_or(false, |c| c.is_ascii_alphabetic())
}

/// Durations are sent as a number of days when numeric, as is otherwise
fn duration_body(duration: &str) -> Option<JsonValue> {
    if duration.is_empty() {
        return None;
    }
    Some(match duration.parse::<i64>() {
        Ok(days) => days.into(),
        Err(_) => duration.into(),
    })
}

/// The API reports numeric durations in hours
fn normalize_duration(duration: &JsonValue) -> String {
    match duration {
        JsonValue::String(s) => match s.parse::<i64>() {
            Ok(hours) => (hours / 24).to_string(),
            Err(_) => s.clone(),
        },
        JsonValue::Number(n) => match n.as_i64() {
            Some(hours) => (hours / 24).to_string(),
            None => DEFAULT_DURATION.to_string(),
        },
        _ => DEFAULT_DURATION.to_string(),
    }
}

/// `ONEDAY` and `1` designate the same validity period
fn same_duration(a: &str, b: &str) -> bool {
    let canonical = |d: &str| if d == "ONEDAY" { "1".to_string() } else { d.to_string() };
    canonical(a) == canonical(b)
}

fn role_names(roles: &ValueSet<ValueString>) -> BTreeSet<String> {
    roles
        .iter()
        .flatten()
        .filter_map(|role| role.as_deref_option())
        .map(str::to_string)
        .collect()
}

/// `(project, role)` pairs of the `project_role` blocks
fn project_role_pairs(project_roles: &ValueList<Value<ProjectRoleState>>) -> BTreeSet<(String, String)> {
    project_roles
        .iter()
        .flatten()
        .filter_map(|pr| pr.as_ref_option())
        .flat_map(|pr| {
            let project = pr.project.as_str().to_string();
            role_names(&pr.roles)
                .into_iter()
                .map(move |role| (project.clone(), role))
        })
        .collect()
}

fn role_set<'a>(roles: Vec<Role>) -> ValueSet<ValueString<'a>> {
    Value::Value(roles.into_iter().map(|role| role.display_name.into()).collect())
}

impl<'a> AgencyState<'a> {
    fn validate(&self, diags: &mut Diagnostics) {
        match (&self.delegated_domain_name, &self.delegated_service_name) {
            (Value::Null, Value::Null) => diags.root_error_short(
                "one of delegated_domain_name or delegated_service_name must be specified",
            ),
            (Value::Null, _) | (_, Value::Null) => (),
            _ => diags.error(
                "Conflicting arguments",
                "only one of delegated_domain_name or delegated_service_name can be specified",
                AttributePath::new("delegated_service_name"),
            ),
        }
        if let Some(name) = self.delegated_domain_name.as_deref_option() {
            if starts_as_service_name(name) {
                diags.error(
                    "Invalid value for delegated_domain_name",
                    "the value can not start with op_svc_, use `delegated_service_name` instead",
                    AttributePath::new("delegated_domain_name"),
                );
            }
        }
        if let Some(name) = self.delegated_service_name.as_deref_option() {
            if !starts_as_service_name(name) {
                diags.error(
                    "Invalid value for delegated_service_name",
                    "the value must start with op_svc_.",
                    AttributePath::new("delegated_service_name"),
                );
            }
        }

        let no_project_role = match &self.project_role {
            Value::Value(project_roles) => project_roles.is_empty(),
            Value::Null => true,
            Value::Unknown => false,
        };
        let no_domain_roles = match &self.domain_roles {
            Value::Value(roles) => roles.is_empty(),
            Value::Null => true,
            Value::Unknown => false,
        };
        if no_project_role && no_domain_roles {
            diags.root_error_short("one of project_role or domain_roles must be specified");
        }
        let too_many = |roles: &ValueSet<ValueString>| roles.iter().flatten().count() > MAX_ROLES;
        if too_many(&self.domain_roles)
            || self
                .project_role
                .iter()
                .flatten()
                .filter_map(|pr| pr.as_ref_option())
                .any(|pr| too_many(&pr.roles))
        {
            diags.root_error_short(format!("at most {MAX_ROLES} roles can be granted per scope"));
        }
    }

    fn delegated(&self) -> String {
        self.delegated_domain_name
            .as_deref_option()
            .or(self.delegated_service_name.as_deref_option())
            .unwrap_or_default()
            .to_string()
    }

    fn set_agency(&mut self, region: String, agency: &Agency) {
        self.id = agency.id.clone().into();
        self.region = region.into();
        self.name = agency.name.clone().into();
        self.description = agency.description.clone().into();
        self.expire_time = non_empty(agency.expire_time.clone().unwrap_or_default());
        self.create_time = agency.create_time.clone().into();

        let duration = normalize_duration(&agency.duration);
        if !same_duration(self.duration.as_str(), &duration) {
            self.duration = duration.into();
        }
        if is_service_name(&agency.trust_domain_name) {
            self.delegated_service_name = agency.trust_domain_name.clone().into();
        } else {
            self.delegated_domain_name = agency.trust_domain_name.clone().into();
        }
    }
}

/// Role and project ids resolved from their names while granting roles to an agency
struct RoleAttachments<'c> {
    iam: &'c ServiceClient,
    identity: &'c ServiceClient,
    domain_id: &'c str,
    agency_id: &'c str,
    roles: HashMap<String, String>,
    projects: HashMap<String, String>,
}

impl<'c> RoleAttachments<'c> {
    /// Load the system roles and the custom roles of the domain, keyed by display name
    async fn load(
        iam: &'c ServiceClient,
        identity: &'c ServiceClient,
        domain_id: &'c str,
        agency_id: &'c str,
    ) -> anyhow::Result<RoleAttachments<'c>> {
        let system = api::list_roles(identity, "")
            .await
            .context("error listing system-defined roles")?;
        let custom = api::list_roles(identity, domain_id)
            .await
            .context("error listing custom roles")?;

        let mut roles = HashMap::new();
        for role in system.into_iter().chain(custom) {
            if role.display_name.is_empty() {
                warn!(role = role.name, "role without display name");
                continue;
            }
            roles.insert(role.display_name, role.id);
        }
        Ok(Self {
            iam,
            identity,
            domain_id,
            agency_id,
            roles,
            projects: HashMap::new(),
        })
    }

    async fn project_id(&mut self, name: &str) -> anyhow::Result<String> {
        if let Some(id) = self.projects.get(name) {
            return Ok(id.clone());
        }
        let projects = api::list_projects(self.identity, self.domain_id, name)
            .await
            .context("failed to query projects")?;
        let id = projects
            .into_iter()
            .next()
            .map(|project| project.id)
            .ok_or_else(|| anyhow!("can not find the ID of project {name}"))?;
        self.projects.insert(name.to_string(), id.clone());
        Ok(id)
    }

    /// Grant `role` on `project`, or on the domain when no project is given
    async fn attach(&mut self, project: Option<&str>, role: &str) -> anyhow::Result<()> {
        let Some(role_id) = self.roles.get(role).cloned() else {
            return Err(match project {
                Some(_) => anyhow!("the project role({role}) is not exist"),
                None => anyhow!("the domain role({role}) is not exist"),
            });
        };
        let (scope_id, kind) = match project {
            Some(project) => (self.project_id(project).await?, "project"),
            None => (self.domain_id.to_string(), "domain"),
        };
        let scope = match project {
            Some(_) => RoleScope::Project(&scope_id),
            None => RoleScope::Domain(&scope_id),
        };
        debug!(role_id, scope_id, kind, "attaching role to agency");
        api::attach_role(self.iam, self.agency_id, scope, &role_id)
            .await
            .with_context(|| {
                format!(
                    "error attaching role({role_id}) by {kind}({scope_id}) to agency({})",
                    self.agency_id
                )
            })
    }

    async fn detach(&mut self, project: Option<&str>, role: &str) -> anyhow::Result<()> {
        let Some(role_id) = self.roles.get(role).cloned() else {
            warn!(role, "the role to be detached does not exist");
            return Ok(());
        };
        let scope_id = match project {
            Some(project) => self.project_id(project).await?,
            None => self.domain_id.to_string(),
        };
        let scope = match project {
            Some(_) => RoleScope::Project(&scope_id),
            None => RoleScope::Domain(&scope_id),
        };
        match api::detach_role(self.iam, self.agency_id, scope, &role_id).await {
            Err(err) if !err.is_not_found() => Err(anyhow!(
                "error detaching role({role_id}) by {scope_id} from agency({}): {err}",
                self.agency_id
            )),
            _ => Ok(()),
        }
    }
}

async fn clients(diags: &mut Diagnostics, config: &Config, region: &str) -> Option<(ServiceClient, ServiceClient)> {
    let iam = config
        .iam_v3_client(region)
        .await
        .report(diags, "Error creating IAM client")?;
    let identity = config
        .identity_v3_client(region)
        .await
        .report(diags, "Error creating identity client")?;
    Some((iam, identity))
}

fn domain_id(diags: &mut Diagnostics, config: &Config) -> Option<String> {
    if config.domain_id.is_empty() {
        diags.root_error_short("the domain_id must be specified in the provider configuration");
        return None;
    }
    Some(config.domain_id.clone())
}

async fn read_agency<'a>(
    diags: &mut Diagnostics,
    config: &Config,
    mut state: AgencyState<'a>,
) -> Option<Value<AgencyState<'a>>> {
    let region = config.get_region(state.region.as_deref_option());
    let (iam, identity) = clients(diags, config, &region).await?;
    let found = check_deleted(api::get_agency(&iam, &state.id).await, "IAM agency")
        .report(diags, "Error retrieving IAM agency")?;
    let Some(agency) = found else {
        return Some(Value::Null);
    };
    debug!(id = agency.id, "retrieved IAM agency");
    state.set_agency(region, &agency);

    let projects = api::list_projects(&identity, &agency.domain_id, "")
        .await
        .report(diags, "Error querying the projects of domain")?;
    let mut project_roles = Vec::new();
    for project in projects {
        match api::list_attached_roles(&iam, &agency.id, RoleScope::Project(&project.id)).await {
            Ok(roles) if !roles.is_empty() => project_roles.push(Value::Value(ProjectRoleState {
                project: project.name.into(),
                roles: role_set(roles),
            })),
            Ok(_) => (),
            Err(err) if err.is_not_found() => (),
            Err(err) => error!(project = project.name, "error querying the roles attached on project: {err}"),
        }
    }
    state.project_role = if project_roles.is_empty() && state.project_role.is_null() {
        Value::Null
    } else {
        Value::Value(project_roles)
    };

    match api::list_attached_roles(&iam, &agency.id, RoleScope::Domain(&agency.domain_id)).await {
        Ok(roles) if !roles.is_empty() => state.domain_roles = role_set(roles),
        Ok(_) => {
            if !state.domain_roles.is_null() {
                state.domain_roles = Value::Value(Default::default());
            }
        }
        Err(err) if err.is_not_found() => (),
        Err(err) => error!("error querying the roles attached on domain: {err}"),
    }
    Some(Value::Value(state))
}

#[derive(Debug, Clone)]
pub struct AgencyResource {
    meta: ProviderMeta,
    timeouts: Timeouts,
}

impl AgencyResource {
    pub fn new(meta: ProviderMeta) -> Self {
        Self {
            meta,
            timeouts: Timeouts::minutes(10, 10, 5),
        }
    }

    async fn config(&self, diags: &mut Diagnostics) -> Option<Arc<Config>> {
        self.meta.get(diags).await
    }
}

#[async_trait]
impl Resource for AgencyResource {
    type State<'a> = Value<AgencyState<'a>>;
    type PrivateState<'a> = ValueEmpty;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(AgencyState::schema())
    }

    async fn validate<'a>(&self, diags: &mut Diagnostics, config: Self::State<'a>) -> Option<()> {
        if let Value::Value(config) = &config {
            config.validate(diags);
        }
        diags.errors.is_empty().then_some(())
    }

    async fn read<'a>(
        &self,
        diags: &mut Diagnostics,
        state: Self::State<'a>,
        private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let Value::Value(state) = state else {
            return Some((Value::Null, private_state));
        };
        let config = self.config(diags).await?;
        let state = read_agency(diags, &config, state).await?;
        Some((state, private_state))
    }

    async fn plan_create<'a>(
        &self,
        diags: &mut Diagnostics,
        proposed_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let config = self.config(diags).await?;
        let mut state = proposed_state.as_option().unwrap_or_default();
        state.id = Value::Unknown;
        state.expire_time = Value::Unknown;
        state.create_time = Value::Unknown;
        state.description = or_unknown(state.description);
        if state.region.is_null() {
            state.region = config.region.clone().into();
        }
        if state.duration.is_null() {
            state.duration = DEFAULT_DURATION.into();
        }
        Some((Value::Value(state), Default::default()))
    }

    async fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
        prior_state: Self::State<'a>,
        proposed_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        prior_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(
        Self::State<'a>,
        Self::PrivateState<'a>,
        Vec<AttributePath>,
    )> {
        let prior = prior_state.as_option().unwrap_or_default();
        let mut state = proposed_state.as_option().unwrap_or_default();
        keep_prior(&mut state.region, &prior.region);
        keep_prior(&mut state.description, &prior.description);
        keep_prior(&mut state.expire_time, &prior.expire_time);
        keep_prior(&mut state.create_time, &prior.create_time);
        if state.duration.is_null() {
            state.duration = DEFAULT_DURATION.into();
        }
        if same_duration(prior.duration.as_str(), state.duration.as_str()) {
            state.duration = prior.duration.clone();
        } else {
            state.expire_time = Value::Unknown;
        }

        let mut replace = Vec::new();
        force_new(&mut replace, "region", &prior.region, &state.region);
        force_new(&mut replace, "name", &prior.name, &state.name);
        Some((Value::Value(state), prior_private_state, replace))
    }

    async fn plan_destroy<'a>(
        &self,
        _diags: &mut Diagnostics,
        _prior_state: Self::State<'a>,
        prior_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<Self::PrivateState<'a>> {
        Some(prior_private_state)
    }

    async fn create<'a>(
        &self,
        diags: &mut Diagnostics,
        planned_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        planned_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let config = self.config(diags).await?;
        let mut state = planned_state.as_option().unwrap_or_default();
        let domain_id = domain_id(diags, &config)?;
        let region = config.get_region(state.region.as_deref_option());
        let (iam, identity) = clients(diags, &config, &region).await?;

        let opts = AgencyOpts {
            name: Some(state.name.as_str().to_string()),
            domain_id: Some(domain_id.clone()),
            trust_domain_name: state.delegated(),
            description: state.description.as_deref_option().map(str::to_string),
            duration: duration_body(state.duration.as_str()),
        };
        debug!(?opts, "create IAM agency options");
        let agency = api::create_agency(&iam, &opts)
            .await
            .report(diags, "Error creating IAM agency")?;
        info!(id = agency.id, "IAM agency created");
        state.id = agency.id.clone().into();

        let mut attachments = RoleAttachments::load(&iam, &identity, &domain_id, &agency.id)
            .await
            .report(diags, "Error querying the roles")?;
        for (project, role) in project_role_pairs(&state.project_role) {
            attachments
                .attach(Some(&project), &role)
                .await
                .report(diags, "Error attaching project role to IAM agency")?;
        }
        for role in role_names(&state.domain_roles) {
            attachments
                .attach(None, &role)
                .await
                .report(diags, "Error attaching domain role to IAM agency")?;
        }

        let state = read_agency(diags, &config, state).await?;
        Some((state, planned_private_state))
    }

    async fn update<'a>(
        &self,
        diags: &mut Diagnostics,
        prior_state: Self::State<'a>,
        planned_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        planned_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let config = self.config(diags).await?;
        let prior = prior_state.as_option().unwrap_or_default();
        let state = planned_state.as_option().unwrap_or_default();
        let domain_id = domain_id(diags, &config)?;
        let region = config.get_region(state.region.as_deref_option());
        let (iam, identity) = clients(diags, &config, &region).await?;
        let id = state.id.as_str();

        if prior.delegated_domain_name != state.delegated_domain_name
            || prior.delegated_service_name != state.delegated_service_name
            || prior.description != state.description
            || prior.duration != state.duration
        {
            let opts = AgencyOpts {
                trust_domain_name: state.delegated(),
                description: Some(state.description.as_str().to_string()),
                duration: duration_body(state.duration.as_str()),
                ..Default::default()
            };
            debug!(id, ?opts, "update IAM agency options");
            let (iam, opts) = (&iam, &opts);
            retry(self.timeouts.update, is_retryable, || api::update_agency(iam, id, opts))
                .await
                .report(diags, &format!("Error updating IAM agency {id}"))?;
        }

        let (old_pairs, new_pairs) = (project_role_pairs(&prior.project_role), project_role_pairs(&state.project_role));
        let (old_roles, new_roles) = (role_names(&prior.domain_roles), role_names(&state.domain_roles));
        if old_pairs != new_pairs || old_roles != new_roles {
            let mut attachments = RoleAttachments::load(&iam, &identity, &domain_id, id)
                .await
                .report(diags, "Error querying the roles")?;
            for (project, role) in old_pairs.difference(&new_pairs) {
                attachments
                    .detach(Some(project), role)
                    .await
                    .report(diags, "Error detaching project role from IAM agency")?;
            }
            for (project, role) in new_pairs.difference(&old_pairs) {
                attachments
                    .attach(Some(project), role)
                    .await
                    .report(diags, "Error attaching project role to IAM agency")?;
            }
            for role in old_roles.difference(&new_roles) {
                attachments
                    .detach(None, role)
                    .await
                    .report(diags, "Error detaching domain role from IAM agency")?;
            }
            for role in new_roles.difference(&old_roles) {
                attachments
                    .attach(None, role)
                    .await
                    .report(diags, "Error attaching domain role to IAM agency")?;
            }
        }

        let state = read_agency(diags, &config, state).await?;
        Some((state, planned_private_state))
    }

    async fn destroy<'a>(
        &self,
        diags: &mut Diagnostics,
        prior_state: Self::State<'a>,
        _planned_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<()> {
        let config = self.config(diags).await?;
        let state = prior_state.as_option().unwrap_or_default();
        let region = config.get_region(state.region.as_deref_option());
        let iam = config
            .iam_v3_client(&region)
            .await
            .report(diags, "Error creating IAM client")?;

        let id = state.id.as_str();
        let iam = &iam;
        let deleted = retry(self.timeouts.delete, is_retryable, || api::delete_agency(iam, id)).await;
        check_deleted(deleted, "IAM agency").report(diags, &format!("Error deleting IAM agency {id}"))?;
        Some(())
    }

    async fn import<'a>(
        &self,
        _diags: &mut Diagnostics,
        id: String,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let state = AgencyState {
            id: id.into(),
            ..Default::default()
        };
        Some((Value::Value(state), Default::default()))
    }
}
