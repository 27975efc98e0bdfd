//! IAM v3.0 agencies (`OS-AGENCY`) and the identity v3 lookups they rely on

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::client::{with_query, Result, ServiceClient};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Agency {
    pub id: String,
    pub name: String,
    pub domain_id: String,
    pub trust_domain_name: String,
    pub description: String,
    /// `FOREVER`, `ONEDAY` or a number of hours, either as a string or a number
    pub duration: JsonValue,
    pub expire_time: Option<String>,
    pub create_time: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgencyOpts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub trust_domain_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct AgencyBody {
    agency: Agency,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct RoleList {
    #[serde(default)]
    roles: Vec<Role>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Project {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectList {
    #[serde(default)]
    projects: Vec<Project>,
}

/// Scope a role is granted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleScope<'a> {
    Project(&'a str),
    Domain(&'a str),
}

impl<'a> RoleScope<'a> {
    fn roles_url(&self, client: &ServiceClient, agency_id: &str) -> String {
        let (kind, id) = match self {
            RoleScope::Project(id) => ("projects", id),
            RoleScope::Domain(id) => ("domains", id),
        };
        client.service_url(&["OS-AGENCY", kind, id, "agencies", agency_id, "roles"])
    }
}

pub async fn create_agency(client: &ServiceClient, opts: &AgencyOpts) -> Result<Agency> {
    let body: AgencyBody = client
        .post(
            &client.service_url(&["OS-AGENCY", "agencies"]),
            &json!({ "agency": opts }),
        )
        .await?;
    Ok(body.agency)
}

pub async fn get_agency(client: &ServiceClient, id: &str) -> Result<Agency> {
    let body: AgencyBody = client
        .get(&client.service_url(&["OS-AGENCY", "agencies", id]))
        .await?;
    Ok(body.agency)
}

pub async fn update_agency(client: &ServiceClient, id: &str, opts: &AgencyOpts) -> Result<Agency> {
    let body: AgencyBody = client
        .put(
            &client.service_url(&["OS-AGENCY", "agencies", id]),
            &json!({ "agency": opts }),
        )
        .await?;
    Ok(body.agency)
}

pub async fn delete_agency(client: &ServiceClient, id: &str) -> Result<()> {
    client
        .delete(&client.service_url(&["OS-AGENCY", "agencies", id]))
        .await
}

pub async fn attach_role(client: &ServiceClient, agency_id: &str, scope: RoleScope<'_>, role_id: &str) -> Result<()> {
    let url = format!("{}/{role_id}", scope.roles_url(client, agency_id));
    client.put_empty(&url).await
}

pub async fn detach_role(client: &ServiceClient, agency_id: &str, scope: RoleScope<'_>, role_id: &str) -> Result<()> {
    let url = format!("{}/{role_id}", scope.roles_url(client, agency_id));
    client.delete(&url).await
}

pub async fn list_attached_roles(client: &ServiceClient, agency_id: &str, scope: RoleScope<'_>) -> Result<Vec<Role>> {
    let list: RoleList = client.get(&scope.roles_url(client, agency_id)).await?;
    Ok(list.roles)
}

/// Roles defined in a domain, the system roles when `domain_id` is empty
pub async fn list_roles(identity: &ServiceClient, domain_id: &str) -> Result<Vec<Role>> {
    let url = with_query(&identity.service_url(&["roles"]), [("domain_id", domain_id)]);
    let list: RoleList = identity.get(&url).await?;
    Ok(list.roles)
}

pub async fn list_projects(identity: &ServiceClient, domain_id: &str, name: &str) -> Result<Vec<Project>> {
    let url = with_query(
        &identity.service_url(&["projects"]),
        [("domain_id", domain_id), ("name", name)],
    );
    let list: ProjectList = identity.get(&url).await?;
    Ok(list.projects)
}
