//! Nested blocks of the OBS bucket: logging, lifecycle rules, website and CORS rules

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tf_provider::schema::{AttributeConstraint, AttributeType, Block, Description, NestedBlock};
use tf_provider::value::{Value, ValueBool, ValueList, ValueNumber, ValueString};
use tf_provider::{map, AttributePath, Diagnostics};

use crate::obs::{
    normalize_storage_class, CorsRule, ErrorDocument, Expiration, IndexDocument, LifecycleRule, Logging,
    NoncurrentVersionExpiration, NoncurrentVersionTransition, RedirectAllRequestsTo, RoutingRule, RoutingRules,
    Transition, WebsiteConfiguration,
};
use crate::utils::{attribute, non_empty, string};

pub(super) const DEFAULT_LOG_PREFIX: &str = "logs/";
pub(super) const DEFAULT_MAX_AGE: i64 = 100;
const TRANSITION_CLASSES: [&str; 2] = ["WARM", "COLD"];
const CORS_METHODS: [&str; 5] = ["GET", "PUT", "HEAD", "POST", "DELETE"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct LoggingState<'a> {
    #[serde(borrow = "'a")]
    pub target_bucket: ValueString<'a>,
    pub target_prefix: ValueString<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DaysState {
    pub days: ValueNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TransitionState<'a> {
    pub days: ValueNumber,
    #[serde(borrow = "'a")]
    pub storage_class: ValueString<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LifecycleRuleState<'a> {
    #[serde(borrow = "'a")]
    pub name: ValueString<'a>,
    pub enabled: ValueBool,
    pub prefix: ValueString<'a>,
    pub expiration: ValueList<Value<DaysState>>,
    pub transition: ValueList<Value<TransitionState<'a>>>,
    pub noncurrent_version_expiration: ValueList<Value<DaysState>>,
    pub noncurrent_version_transition: ValueList<Value<TransitionState<'a>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WebsiteState<'a> {
    #[serde(borrow = "'a")]
    pub index_document: ValueString<'a>,
    pub error_document: ValueString<'a>,
    pub redirect_all_requests_to: ValueString<'a>,
    pub routing_rules: ValueString<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CorsRuleState<'a> {
    #[serde(borrow = "'a")]
    pub allowed_origins: ValueList<ValueString<'a>>,
    pub allowed_methods: ValueList<ValueString<'a>>,
    pub allowed_headers: ValueList<ValueString<'a>>,
    pub expose_headers: ValueList<ValueString<'a>>,
    pub max_age_seconds: ValueNumber,
}

pub(super) fn blocks() -> std::collections::HashMap<String, NestedBlock> {
    use AttributeConstraint::*;
    let strings = |constraint, description| {
        attribute(AttributeType::List(Box::new(AttributeType::String)), constraint, description)
    };
    let days = |description: &'static str| Block {
        attributes: map! {
            "days" => attribute(AttributeType::Number, Required, "Number of days")
        },
        description: Description::plain(description),
        ..Default::default()
    };
    let transition = |description: &'static str| Block {
        attributes: map! {
            "days" => attribute(AttributeType::Number, Required, "Number of days before the transition"),
            "storage_class" => string(Required, "Target storage class: WARM or COLD")
        },
        description: Description::plain(description),
        ..Default::default()
    };
    map! {
        "logging" => NestedBlock::Set(Block {
            attributes: map! {
                "target_bucket" => string(Required, "Bucket receiving the access logs"),
                "target_prefix" => string(OptionalComputed, "Prefix of the log objects, defaults to logs/")
            },
            description: Description::plain("Access logging of the bucket"),
            ..Default::default()
        }),
        "lifecycle_rule" => NestedBlock::List(Block {
            attributes: map! {
                "name" => string(Required, "Unique name of the rule"),
                "enabled" => attribute(AttributeType::Bool, Required, "Whether the rule is applied"),
                "prefix" => string(Optional, "Prefix of the objects the rule applies to, all objects when unset")
            },
            blocks: map! {
                "expiration" => NestedBlock::List(days("Expiration of the current object versions")),
                "transition" => NestedBlock::List(transition("Transition of the current object versions")),
                "noncurrent_version_expiration" => NestedBlock::List(days("Expiration of the historical object versions")),
                "noncurrent_version_transition" => NestedBlock::List(transition("Transition of the historical object versions"))
            },
            description: Description::plain("Lifecycle rule of the objects of the bucket"),
            ..Default::default()
        }),
        "website" => NestedBlock::List(Block {
            attributes: map! {
                "index_document" => string(Optional, "Object returned for requests to a directory"),
                "error_document" => string(Optional, "Object returned on 4XX errors"),
                "redirect_all_requests_to" => string(Optional, "Host name, optionally prefixed by the protocol, receiving every request"),
                "routing_rules" => string(Optional, "JSON array of redirection rules")
            },
            description: Description::plain("Static website hosting of the bucket"),
            ..Default::default()
        }),
        "cors_rule" => NestedBlock::List(Block {
            attributes: map! {
                "allowed_origins" => strings(Required, "Origins allowed to make cross-domain requests"),
                "allowed_methods" => strings(Required, "Methods allowed in cross-domain requests: GET, PUT, HEAD, POST or DELETE"),
                "allowed_headers" => strings(Optional, "Headers allowed in cross-domain requests"),
                "expose_headers" => strings(Optional, "Response headers exposed to the clients"),
                "max_age_seconds" => attribute(AttributeType::Number, OptionalComputed, "Caching duration of the preflight responses, defaults to 100")
            },
            description: Description::plain("Cross-origin resource sharing rule of the bucket"),
            ..Default::default()
        })
    }
}

fn strings(list: &ValueList<ValueString>) -> Vec<String> {
    list.iter()
        .flatten()
        .map(|v| v.as_str().to_string())
        .collect()
}

fn string_list<'a>(values: Vec<String>) -> ValueList<ValueString<'a>> {
    if values.is_empty() {
        Value::Null
    } else {
        Value::Value(values.into_iter().map(ValueString::from).collect())
    }
}

fn number(value: &ValueNumber) -> i64 {
    value.as_ref_option().copied().unwrap_or_default()
}

/// Entries of a block list, skipping the null ones
fn entries<T>(list: &ValueList<Value<T>>) -> impl Iterator<Item = &T> {
    list.iter().flatten().filter_map(|v| v.as_ref_option())
}

fn block_list<T>(values: Vec<T>, prior: &ValueList<Value<T>>) -> ValueList<Value<T>> {
    if values.is_empty() && prior.is_null() {
        Value::Null
    } else {
        Value::Value(values.into_iter().map(Value::Value).collect())
    }
}

pub(super) fn logging_config(logging: &ValueList<Value<LoggingState>>) -> Option<Logging> {
    entries(logging).next().map(|l| Logging {
        target_bucket: l.target_bucket.as_str().to_string(),
        target_prefix: l
            .target_prefix
            .as_deref_option()
            .unwrap_or(DEFAULT_LOG_PREFIX)
            .to_string(),
    })
}

pub(super) fn logging_state<'a>(
    logging: Option<Logging>,
    prior: &ValueList<Value<LoggingState<'a>>>,
) -> ValueList<Value<LoggingState<'a>>> {
    let found = logging
        .map(|l| LoggingState {
            target_bucket: l.target_bucket.into(),
            target_prefix: l.target_prefix.into(),
        })
        .into_iter()
        .collect();
    block_list(found, prior)
}

pub(super) fn cors_config(rules: &ValueList<Value<CorsRuleState>>) -> Vec<CorsRule> {
    entries(rules)
        .map(|r| CorsRule {
            allowed_origins: strings(&r.allowed_origins),
            allowed_methods: strings(&r.allowed_methods),
            allowed_headers: strings(&r.allowed_headers),
            expose_headers: strings(&r.expose_headers),
            max_age_seconds: r.max_age_seconds.as_ref_option().copied().unwrap_or(DEFAULT_MAX_AGE),
        })
        .collect()
}

pub(super) fn cors_state<'a>(
    rules: Vec<CorsRule>,
    prior: &ValueList<Value<CorsRuleState<'a>>>,
) -> ValueList<Value<CorsRuleState<'a>>> {
    let found = rules
        .into_iter()
        .map(|r| CorsRuleState {
            allowed_origins: string_list(r.allowed_origins),
            allowed_methods: string_list(r.allowed_methods),
            allowed_headers: string_list(r.allowed_headers),
            expose_headers: string_list(r.expose_headers),
            max_age_seconds: Value::Value(r.max_age_seconds),
        })
        .collect();
    block_list(found, prior)
}

pub(super) fn lifecycle_config(rules: &ValueList<Value<LifecycleRuleState>>) -> Vec<LifecycleRule> {
    let transitions = |list: &ValueList<Value<TransitionState>>| {
        entries(list)
            .map(|t| (number(&t.days), t.storage_class.as_str().to_string()))
            .collect::<Vec<_>>()
    };
    entries(rules)
        .map(|r| LifecycleRule {
            id: r.name.as_str().to_string(),
            prefix: r.prefix.as_deref_option().unwrap_or_default().to_string(),
            status: if r.enabled.as_ref_option().copied().unwrap_or(false) {
                "Enabled".to_string()
            } else {
                "Disabled".to_string()
            },
            expiration: entries(&r.expiration).next().map(|e| Expiration { days: number(&e.days) }),
            transitions: transitions(&r.transition)
                .into_iter()
                .map(|(days, storage_class)| Transition { days, storage_class })
                .collect(),
            noncurrent_version_expiration: entries(&r.noncurrent_version_expiration)
                .next()
                .map(|e| NoncurrentVersionExpiration {
                    noncurrent_days: number(&e.days),
                }),
            noncurrent_version_transitions: transitions(&r.noncurrent_version_transition)
                .into_iter()
                .map(|(noncurrent_days, storage_class)| NoncurrentVersionTransition {
                    noncurrent_days,
                    storage_class,
                })
                .collect(),
        })
        .collect()
}

fn days_list(days: Option<i64>) -> ValueList<Value<DaysState>> {
    match days {
        Some(days) => Value::Value(vec![Value::Value(DaysState {
            days: Value::Value(days),
        })]),
        None => Value::Null,
    }
}

fn transition_list<'a>(transitions: Vec<(i64, String)>) -> ValueList<Value<TransitionState<'a>>> {
    if transitions.is_empty() {
        return Value::Null;
    }
    Value::Value(
        transitions
            .into_iter()
            .map(|(days, class)| {
                Value::Value(TransitionState {
                    days: Value::Value(days),
                    storage_class: normalize_storage_class(&class).to_string().into(),
                })
            })
            .collect(),
    )
}

pub(super) fn lifecycle_state<'a>(
    rules: Vec<LifecycleRule>,
    prior: &ValueList<Value<LifecycleRuleState<'a>>>,
) -> ValueList<Value<LifecycleRuleState<'a>>> {
    let found = rules
        .into_iter()
        .map(|r| LifecycleRuleState {
            name: r.id.into(),
            enabled: Value::Value(r.status == "Enabled"),
            prefix: non_empty(r.prefix),
            expiration: days_list(r.expiration.map(|e| e.days)),
            transition: transition_list(
                r.transitions
                    .into_iter()
                    .map(|t| (t.days, t.storage_class))
                    .collect(),
            ),
            noncurrent_version_expiration: days_list(
                r.noncurrent_version_expiration.map(|e| e.noncurrent_days),
            ),
            noncurrent_version_transition: transition_list(
                r.noncurrent_version_transitions
                    .into_iter()
                    .map(|t| (t.noncurrent_days, t.storage_class))
                    .collect(),
            ),
        })
        .collect();
    block_list(found, prior)
}

/// `host` or `protocol://host`
fn redirect_target(target: &str) -> RedirectAllRequestsTo {
    match target.split_once("://") {
        Some((protocol, host)) => RedirectAllRequestsTo {
            host_name: host.to_string(),
            protocol: protocol.to_string(),
        },
        None => RedirectAllRequestsTo {
            host_name: target.to_string(),
            protocol: String::new(),
        },
    }
}

fn parse_routing_rules(rules: &str) -> serde_json::Result<Vec<RoutingRule>> {
    serde_json::from_str(rules)
}

pub(super) fn website_config(website: &ValueList<Value<WebsiteState>>) -> Option<WebsiteConfiguration> {
    let website = entries(website).next()?;
    Some(WebsiteConfiguration {
        redirect_all_requests_to: website.redirect_all_requests_to.as_deref_option().map(redirect_target),
        index_document: website.index_document.as_deref_option().map(|suffix| IndexDocument {
            suffix: suffix.to_string(),
        }),
        error_document: website.error_document.as_deref_option().map(|key| ErrorDocument {
            key: key.to_string(),
        }),
        routing_rules: website
            .routing_rules
            .as_deref_option()
            .and_then(|rules| parse_routing_rules(rules).ok())
            .map(|rules| RoutingRules { rules }),
    })
}

pub(super) fn website_state<'a>(
    website: Option<WebsiteConfiguration>,
    prior: &ValueList<Value<WebsiteState<'a>>>,
) -> ValueList<Value<WebsiteState<'a>>> {
    let prior_rules = entries(prior).next().map(|w| w.routing_rules.clone());
    let found = website
        .map(|w| {
            let rules = w.routing_rules.map(|r| r.rules).unwrap_or_default();
            let routing_rules = match prior_rules {
                // keep the configured formatting of equivalent rules
                Some(Value::Value(prior))
                    if parse_routing_rules(&prior).is_ok_and(|prior_rules| prior_rules == rules) =>
                {
                    Value::Value(prior)
                }
                _ if rules.is_empty() => Value::Null,
                _ => serde_json::to_string(&rules).map_or(Value::Null, |json| json.into()),
            };
            WebsiteState {
                index_document: non_empty(w.index_document.map(|d| d.suffix).unwrap_or_default()),
                error_document: non_empty(w.error_document.map(|d| d.key).unwrap_or_default()),
                redirect_all_requests_to: non_empty(
                    w.redirect_all_requests_to
                        .map(|r| match r.protocol.as_str() {
                            "" => r.host_name,
                            protocol => format!("{protocol}://{}", r.host_name),
                        })
                        .unwrap_or_default(),
                ),
                routing_rules,
            }
        })
        .into_iter()
        .collect();
    block_list(found, prior)
}

/// JSON documents are compared by value: the service reformats them
pub(super) fn same_json(a: &str, b: &str) -> bool {
    match (serde_json::from_str::<JsonValue>(a), serde_json::from_str::<JsonValue>(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

pub(super) fn validate_blocks(
    diags: &mut Diagnostics,
    logging: &ValueList<Value<LoggingState>>,
    lifecycle_rules: &ValueList<Value<LifecycleRuleState>>,
    website: &ValueList<Value<WebsiteState>>,
    cors_rules: &ValueList<Value<CorsRuleState>>,
) {
    for (name, count) in [
        ("logging", entries(logging).count()),
        ("website", entries(website).count()),
    ] {
        if count > 1 {
            diags.error_short(format!("at most one {name} block is allowed"), AttributePath::new(name));
        }
    }

    for (index, rule) in entries(lifecycle_rules).enumerate() {
        let path = AttributePath::new("lifecycle_rule").index(index as i64);
        if entries(&rule.expiration).count() > 1 || entries(&rule.noncurrent_version_expiration).count() > 1 {
            diags.error_short("at most one expiration block is allowed per rule", path.clone());
        }
        let actions = rule.expiration.iter().flatten().count()
            + rule.transition.iter().flatten().count()
            + rule.noncurrent_version_expiration.iter().flatten().count()
            + rule.noncurrent_version_transition.iter().flatten().count();
        if actions == 0 {
            diags.error(
                "Invalid lifecycle rule",
                "at least one expiration or transition block is required",
                path.clone(),
            );
        }
        for transition in entries(&rule.transition).chain(entries(&rule.noncurrent_version_transition)) {
            if let Some(class) = transition.storage_class.as_deref_option() {
                if !TRANSITION_CLASSES.contains(&class) {
                    diags.error(
                        "Invalid value for storage_class",
                        format!("\"{class}\" is not one of {}", TRANSITION_CLASSES.join(", ")),
                        path.clone(),
                    );
                }
            }
        }
    }

    for website in entries(website) {
        let path = AttributePath::new("website").index(0);
        if website.index_document.is_null() && website.redirect_all_requests_to.is_null() {
            diags.error(
                "Invalid website",
                "index_document or redirect_all_requests_to must be set",
                path.clone(),
            );
        }
        if let Some(rules) = website.routing_rules.as_deref_option() {
            if let Err(err) = parse_routing_rules(rules) {
                diags.error("Invalid routing_rules", format!("not a JSON array of routing rules: {err}"), path);
            }
        }
    }

    for (index, rule) in entries(cors_rules).enumerate() {
        for method in rule.allowed_methods.iter().flatten().filter_map(|m| m.as_deref_option()) {
            if !CORS_METHODS.contains(&method) {
                diags.error(
                    "Invalid value for allowed_methods",
                    format!("\"{method}\" is not one of {}", CORS_METHODS.join(", ")),
                    AttributePath::new("cors_rule").index(index as i64),
                );
            }
        }
    }
}

/// Fill the defaults of the nested blocks
pub(super) fn set_block_defaults(
    logging: &mut ValueList<Value<LoggingState>>,
    cors_rules: &mut ValueList<Value<CorsRuleState>>,
) {
    for entry in logging.iter_mut().flatten() {
        if let Value::Value(logging) = entry {
            if logging.target_prefix.is_null() {
                logging.target_prefix = DEFAULT_LOG_PREFIX.into();
            }
        }
    }
    for entry in cors_rules.iter_mut().flatten() {
        if let Value::Value(rule) = entry {
            if rule.max_age_seconds.is_null() {
                rule.max_age_seconds = Value::Value(DEFAULT_MAX_AGE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings_value(values: &[&'static str]) -> ValueList<ValueString<'static>> {
        Value::Value(values.iter().map(|v| ValueString::from(*v)).collect())
    }

    #[test]
    fn lifecycle_conversions() {
        let rules = Value::Value(vec![Value::Value(LifecycleRuleState {
            name: "rule1".into(),
            enabled: Value::Value(true),
            prefix: Value::Null,
            expiration: days_list(Some(365)),
            transition: transition_list(vec![(30, "WARM".into()), (60, "COLD".into())]),
            noncurrent_version_expiration: days_list(Some(10)),
            noncurrent_version_transition: Value::Null,
        })]);
        let config = lifecycle_config(&rules);
        assert_eq!(config[0].status, "Enabled");
        assert_eq!(config[0].prefix, "");
        assert_eq!(config[0].expiration, Some(Expiration { days: 365 }));
        assert_eq!(config[0].transitions[1].storage_class, "COLD");
        assert_eq!(
            config[0].noncurrent_version_expiration,
            Some(NoncurrentVersionExpiration { noncurrent_days: 10 })
        );

        // classes reported with their S3 names read back as configured
        let mut remote = config.clone();
        remote[0].transitions[0].storage_class = "STANDARD_IA".into();
        assert_eq!(lifecycle_state(remote, &Value::Null), rules);
    }

    #[test]
    fn empty_blocks_stay_null() {
        assert!(cors_state(Vec::new(), &Value::Null).is_null());
        assert_eq!(cors_state(Vec::new(), &Value::Value(Vec::new())), Value::Value(Vec::new()));
        assert!(logging_state(None, &Value::Null).is_null());
    }

    #[test]
    fn cors_defaults() {
        let mut rules = Value::Value(vec![Value::Value(CorsRuleState {
            allowed_origins: strings_value(&["*"]),
            allowed_methods: strings_value(&["GET"]),
            ..Default::default()
        })]);
        let mut logging = Value::Value(vec![Value::Value(LoggingState {
            target_bucket: "logs-1".into(),
            target_prefix: Value::Null,
        })]);
        set_block_defaults(&mut logging, &mut rules);
        assert_eq!(cors_config(&rules)[0].max_age_seconds, DEFAULT_MAX_AGE);
        assert_eq!(logging_config(&logging).unwrap().target_prefix, DEFAULT_LOG_PREFIX);
    }

    #[test]
    fn website_conversions() {
        let rules = r#"[
            {"Condition": {"KeyPrefixEquals": "docs/"}, "Redirect": {"ReplaceKeyPrefixWith": "documents/"}}
        ]"#;
        let website = Value::Value(vec![Value::Value(WebsiteState {
            index_document: "index.html".into(),
            error_document: "error.html".into(),
            redirect_all_requests_to: Value::Null,
            routing_rules: rules.into(),
        })]);
        let config = website_config(&website).unwrap();
        assert_eq!(config.routing_rules.as_ref().unwrap().rules.len(), 1);

        // equivalent rules keep the configured formatting
        assert_eq!(website_state(Some(config.clone()), &website), website);

        let state = website_state(Some(config), &Value::Null);
        let routing_rules = entries(&state).next().unwrap().routing_rules.as_str().to_string();
        assert_eq!(
            routing_rules,
            r#"[{"Condition":{"KeyPrefixEquals":"docs/"},"Redirect":{"ReplaceKeyPrefixWith":"documents/"}}]"#
        );

        let redirect = redirect_target("https://example.com");
        assert_eq!(redirect.protocol, "https");
        assert_eq!(redirect.host_name, "example.com");
        assert_eq!(redirect_target("example.com").protocol, "");
    }

    #[test]
    fn block_validation() {
        let mut diags = Diagnostics::default();
        let lifecycle = Value::Value(vec![Value::Value(LifecycleRuleState {
            name: "rule1".into(),
            enabled: Value::Value(true),
            transition: transition_list(vec![(30, "STANDARD".into())]),
            ..Default::default()
        })]);
        let website = Value::Value(vec![Value::Value(WebsiteState {
            routing_rules: "{}".into(),
            ..Default::default()
        })]);
        let cors = Value::Value(vec![Value::Value(CorsRuleState {
            allowed_origins: strings_value(&["*"]),
            allowed_methods: strings_value(&["GET", "PATCH"]),
            ..Default::default()
        })]);
        validate_blocks(&mut diags, &Value::Null, &lifecycle, &website, &cors);
        let summaries: Vec<_> = diags.errors.iter().map(|d| d.summary.to_string()).collect();
        assert_eq!(
            summaries,
            [
                "Invalid value for storage_class",
                "Invalid website",
                "Invalid routing_rules",
                "Invalid value for allowed_methods",
            ]
        );

        let mut diags = Diagnostics::default();
        let empty_rule = Value::Value(vec![Value::Value(LifecycleRuleState {
            name: "rule1".into(),
            enabled: Value::Value(true),
            ..Default::default()
        })]);
        validate_blocks(&mut diags, &Value::Null, &empty_rule, &Value::Null, &Value::Null);
        assert_eq!(diags.errors[0].detail, "at least one expiration or transition block is required");
    }

    #[test]
    fn json_documents() {
        assert!(same_json(r#"{"a": [1, 2]}"#, r#"{"a":[1,2]}"#));
        assert!(!same_json(r#"{"a": 1}"#, r#"{"a": 2}"#));
    }
}
