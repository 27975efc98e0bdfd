//! Static description of how each service endpoint is built

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// `https://{name}.{cloud}/` unless regional endpoints are forced
    Global,
    /// `https://{name}.{region}.{cloud}/`
    Regional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCatalog {
    pub name: &'static str,
    pub version: &'static str,
    pub scope: Scope,
    /// Requests are sent with the domain-scoped client
    pub admin: bool,
    pub without_project_id: bool,
    pub resource_base: &'static str,
}

impl ServiceCatalog {
    const fn regional(name: &'static str, version: &'static str) -> Self {
        Self {
            name,
            version,
            scope: Scope::Regional,
            admin: false,
            without_project_id: false,
            resource_base: "",
        }
    }

    const fn global(name: &'static str, version: &'static str) -> Self {
        Self {
            scope: Scope::Global,
            without_project_id: true,
            ..Self::regional(name, version)
        }
    }

    const fn admin(self) -> Self {
        Self {
            admin: true,
            ..self
        }
    }

    const fn without_project(self) -> Self {
        Self {
            without_project_id: true,
            ..self
        }
    }

    const fn base(self, resource_base: &'static str) -> Self {
        Self {
            resource_base,
            ..self
        }
    }
}

static CATALOG: &[(&str, ServiceCatalog)] = &[
    // identity and management
    ("iam", ServiceCatalog::global("iam", "v3.0").admin()),
    ("identity", ServiceCatalog::global("iam", "v3").admin()),
    ("cdn", ServiceCatalog::global("cdn", "v1.0").admin()),
    ("eps", ServiceCatalog::global("eps", "v1.0").admin()),
    ("bss", ServiceCatalog::global("bss", "v1.0").admin()),
    ("bssv2", ServiceCatalog::global("bss", "v2").admin()),
    ("dns", ServiceCatalog::global("dns", "v2")),
    // compute
    ("ecs", ServiceCatalog::regional("ecs", "v1")),
    ("ecsv11", ServiceCatalog::regional("ecs", "v1.1")),
    ("ecsv21", ServiceCatalog::regional("ecs", "v2.1")),
    ("autoscaling", ServiceCatalog::regional("as", "autoscaling-api/v1")),
    ("ims", ServiceCatalog::regional("ims", "v2").without_project()),
    ("cce", ServiceCatalog::regional("cce", "api/v3/projects")),
    ("cciv1", ServiceCatalog::regional("cci", "api/v1").without_project()),
    // storage
    ("evs", ServiceCatalog::regional("evs", "v3")),
    ("volumev2", ServiceCatalog::regional("evs", "v2")),
    // network
    ("vpc", ServiceCatalog::regional("vpc", "v1").without_project()),
    ("networkv2", ServiceCatalog::regional("vpc", "v2.0").without_project()),
    ("vpcv3", ServiceCatalog::regional("vpc", "v3")),
    ("security_group", ServiceCatalog::regional("vpc", "v1")),
    ("vpcep", ServiceCatalog::regional("vpcep", "v1")),
    ("nat", ServiceCatalog::regional("nat", "v2")),
    ("elb", ServiceCatalog::regional("elb", "v1.0")),
    ("elbv2", ServiceCatalog::regional("elb", "v2.0")),
    ("elbv3", ServiceCatalog::regional("elb", "v3")),
    ("dns_region", ServiceCatalog::regional("dns", "v2").without_project()),
    // database
    ("rds", ServiceCatalog::regional("rds", "v3")),
    ("rdsv1", ServiceCatalog::regional("rds", "rds/v1")),
    // security and management
    ("kms", ServiceCatalog::regional("kms", "v1.0").without_project()),
    ("smn", ServiceCatalog::regional("smn", "v2").base("notifications")),
    ("waf", ServiceCatalog::regional("waf", "v1").base("waf")),
    ("ces", ServiceCatalog::regional("ces", "V1.0")),
    ("lts", ServiceCatalog::regional("lts", "v2")),
];

/// Keys sharing the endpoint of another key when it is customized
static DERIVED_KEYS: &[(&str, &[&str])] = &[
    ("iam", &["identity"]),
    ("bss", &["bssv2"]),
    ("ecs", &["ecsv11", "ecsv21"]),
    ("evs", &["volumev2"]),
    ("vpc", &["networkv2", "vpcv3", "security_group"]),
    ("elb", &["elbv2", "elbv3"]),
    ("dns", &["dns_region"]),
    ("rds", &["rdsv1"]),
];

pub fn lookup(key: &str) -> Option<&'static ServiceCatalog> {
    CATALOG
        .iter()
        .find_map(|(k, catalog)| (*k == key).then_some(catalog))
}

pub fn derived_keys(key: &str) -> &'static [&'static str] {
    DERIVED_KEYS
        .iter()
        .find_map(|(k, derived)| (*k == key).then_some(*derived))
        .unwrap_or(&[])
}

/// Build the resource base URL of a service from its endpoint
pub fn resource_base(catalog: &ServiceCatalog, endpoint: &str, project_id: &str) -> String {
    let mut base = format!("{endpoint}{}/", catalog.version);
    if !catalog.without_project_id {
        base.push_str(project_id);
        base.push('/');
    }
    if !catalog.resource_base.is_empty() {
        base.push_str(catalog.resource_base);
        base.push('/');
    }
    base
}
