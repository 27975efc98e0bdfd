use std::collections::BTreeMap;
use std::fmt::Display;
use std::net::IpAddr;

use regex::Regex;
use thiserror::Error;
use tracing::warn;

use tf_provider::schema::{Attribute, AttributeConstraint, AttributeType, Description, Schema};
use tf_provider::value::{Value, ValueMap, ValueString};
use tf_provider::{AttributePath, Diagnostics};

use crate::client;

pub(crate) trait WithSchema {
    fn schema() -> Schema;
}

/// Turn an error into an error diagnostic
pub(crate) trait ReportDiagnostics<T> {
    fn report(self, diags: &mut Diagnostics, summary: &str) -> Option<T>;
}

impl<T, E: Display> ReportDiagnostics<T> for Result<T, E> {
    fn report(self, diags: &mut Diagnostics, summary: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                diags.root_error(summary.to_string(), format!("{err:#}"));
                None
            }
        }
    }
}

/// Policies applied by data sources that must match a single object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub(crate) enum QueryError {
    #[error("Your query returned no results. Please change your search criteria and try again.")]
    NoResults,
    #[error("Your query returned more than one result. Please try a more specific search criteria")]
    MultipleResults,
}

pub(crate) fn single_result<T>(items: Vec<T>) -> Result<T, QueryError> {
    let mut items = items.into_iter();
    match (items.next(), items.next()) {
        (None, _) => Err(QueryError::NoResults),
        (Some(item), None) => Ok(item),
        (Some(_), Some(_)) => Err(QueryError::MultipleResults),
    }
}

/// A `404` means the object has been deleted out of band: it is dropped from the state
pub(crate) fn check_deleted<T>(result: client::Result<T>, what: &str) -> client::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => {
            warn!("{what} not found, removing from state: {err}");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

pub(crate) fn attribute(
    attr_type: AttributeType,
    constraint: AttributeConstraint,
    description: &str,
) -> Attribute {
    Attribute {
        attr_type,
        description: Description::plain(description),
        constraint,
        ..Default::default()
    }
}

pub(crate) fn string(constraint: AttributeConstraint, description: &str) -> Attribute {
    attribute(AttributeType::String, constraint, description)
}

pub(crate) fn region_attribute() -> Attribute {
    string(
        AttributeConstraint::OptionalComputed,
        "Region of the resource, defaults to the provider region",
    )
}

pub(crate) fn enterprise_project_attribute() -> Attribute {
    string(
        AttributeConstraint::OptionalComputed,
        "Enterprise project of the resource, defaults to the provider one",
    )
}

pub(crate) fn tags_attribute() -> Attribute {
    attribute(
        AttributeType::Map(Box::new(AttributeType::String)),
        AttributeConstraint::Optional,
        "Key/value pairs to associate with the resource",
    )
}

/// Record `name` as forcing a replacement when its value changes
pub(crate) fn force_new<T: PartialEq>(
    replace: &mut Vec<AttributePath>,
    name: &'static str,
    prior: &Value<T>,
    proposed: &Value<T>,
) {
    if prior != proposed {
        replace.push(AttributePath::new(name));
    }
}

/// Keep the prior value of a computed attribute the configuration leaves unset
pub(crate) fn keep_prior<T: Clone>(proposed: &mut Value<T>, prior: &Value<T>) {
    if proposed.is_null() {
        *proposed = prior.clone();
    }
}

pub(crate) fn or_unknown<T>(value: Value<T>) -> Value<T> {
    match value {
        Value::Null => Value::Unknown,
        value => value,
    }
}

/// Non-empty string as a value, null otherwise
pub(crate) fn non_empty<'a>(value: impl Into<String>) -> ValueString<'a> {
    let value = value.into();
    if value.is_empty() {
        Value::Null
    } else {
        Value::Value(value.into())
    }
}

pub(crate) fn tags_map<'a>(tags: &ValueMap<'a, ValueString<'a>>) -> BTreeMap<String, String> {
    tags.iter()
        .flatten()
        .map(|(k, v)| (k.to_string(), v.as_str().to_string()))
        .collect()
}

pub(crate) fn validate_ip(diags: &mut Diagnostics, name: &'static str, value: &ValueString) {
    if let Some(ip) = value.as_deref_option() {
        if ip.parse::<IpAddr>().is_err() {
            diags.error(
                "Invalid IP address",
                format!("\"{ip}\" is not a valid IP address"),
                AttributePath::new(name),
            );
        }
    }
}

pub(crate) fn is_cidr(cidr: &str) -> bool {
    let Some((ip, prefix)) = cidr.split_once('/') else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u8>() else {
        return false;
    };
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => prefix <= 32,
        Ok(IpAddr::V6(_)) => prefix <= 128,
        Err(_) => false,
    }
}

pub(crate) fn validate_cidr(diags: &mut Diagnostics, name: &'static str, value: &ValueString) {
    if let Some(cidr) = value.as_deref_option() {
        if !is_cidr(cidr) {
            diags.error(
                "Invalid CIDR",
                format!("\"{cidr}\" is not a valid CIDR block"),
                AttributePath::new(name),
            );
        }
    }
}

pub(crate) fn validate_regex(
    diags: &mut Diagnostics,
    name: &'static str,
    value: &ValueString,
    pattern: &str,
    detail: &'static str,
) {
    let Some(value) = value.as_deref_option() else {
        return;
    };
    match Regex::new(pattern) {
        Ok(re) if re.is_match(value) => (),
        Ok(_) => diags.error(format!("Invalid value for {name}"), detail, AttributePath::new(name)),
        Err(err) => diags.root_error("Invalid validation pattern", err.to_string()),
    }
}

/// Names made of letters (including Chinese characters), digits, `_`, `-` and `.`
pub(crate) const NAME_PATTERN: &str = r"^[\p{Han}\w.-]{1,64}$";

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, StatusCode};

    #[test]
    fn single_result_policies() {
        assert_eq!(single_result(Vec::<u8>::new()), Err(QueryError::NoResults));
        assert_eq!(single_result(vec![1]), Ok(1));
        assert_eq!(single_result(vec![1, 2]), Err(QueryError::MultipleResults));
        assert_eq!(
            QueryError::NoResults.to_string(),
            "Your query returned no results. Please change your search criteria and try again."
        );
        assert_eq!(
            QueryError::MultipleResults.to_string(),
            "Your query returned more than one result. Please try a more specific search criteria"
        );
    }

    #[test]
    fn deleted_objects() {
        let gone = client::Error::from_response(Method::GET, "https://x/v1/vpcs/a", StatusCode::NOT_FOUND, "");
        assert!(matches!(check_deleted::<()>(Err(gone), "VPC"), Ok(None)));
        assert!(matches!(check_deleted(Ok(3), "VPC"), Ok(Some(3))));

        let denied = client::Error::from_response(Method::GET, "https://x/v1/vpcs/a", StatusCode::FORBIDDEN, "");
        assert!(check_deleted::<()>(Err(denied), "VPC").is_err());
    }

    #[test]
    fn cidrs() {
        assert!(is_cidr("192.168.0.0/16"));
        assert!(is_cidr("2001:db8::/32"));
        assert!(!is_cidr("192.168.0.0/33"));
        assert!(!is_cidr("192.168.0.0"));
        assert!(!is_cidr("vpc/16"));
    }

    #[test]
    fn validators() {
        let mut diags = Diagnostics::default();
        validate_ip(&mut diags, "gateway_ip", &"192.168.0.1".into());
        validate_cidr(&mut diags, "cidr", &Value::Unknown);
        validate_regex(&mut diags, "name", &"vpc_测试-1".into(), NAME_PATTERN, "bad name");
        assert!(diags.errors.is_empty());

        validate_ip(&mut diags, "gateway_ip", &"192.168.0.300".into());
        validate_cidr(&mut diags, "cidr", &"10.0.0.0".into());
        validate_regex(&mut diags, "name", &"no spaces".into(), NAME_PATTERN, "bad name");
        assert_eq!(diags.errors.len(), 3);
    }

    #[test]
    fn replacements() {
        let mut replace = Vec::new();
        force_new(&mut replace, "cidr", &ValueString::from("a"), &ValueString::from("a"));
        assert!(replace.is_empty());
        force_new(&mut replace, "cidr", &ValueString::from("a"), &ValueString::from("b"));
        assert_eq!(replace, vec![AttributePath::new("cidr")]);
    }
}
