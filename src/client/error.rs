use reqwest::{header::InvalidHeaderValue, Method, StatusCode};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by the HuaweiCloud REST clients
#[derive(Debug, Error)]
pub enum Error {
    #[error("{method} {url} returned {status}: {code} {message}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
        code: String,
        message: String,
    },
    #[error("error sending request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("error decoding response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("error decoding XML response: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
    #[error("{0}")]
    Config(String),
}

impl Error {
    pub(crate) fn config<T: ToString>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// Build an error from an unexpected HTTP response
    pub(crate) fn from_response(method: Method, url: &str, status: StatusCode, body: &str) -> Self {
        let (code, message) = parse_error_body(body);
        Error::Status {
            method,
            url: url.to_string(),
            status,
            code,
            message,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Transport(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    pub fn is_bad_request(&self) -> bool {
        self.status() == Some(StatusCode::BAD_REQUEST)
    }

    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(StatusCode::FORBIDDEN)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(StatusCode::CONFLICT)
    }

    pub fn is_server_error(&self) -> bool {
        self.status().map_or(false, |s| s.is_server_error())
    }

    /// Error code returned by the service, if any (ex: `VPC.0202`)
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Status { code, .. } if !code.is_empty() => Some(code.as_str()),
            _ => None,
        }
    }
}

/// Extract the error code and message from the various error shapes the services return
fn parse_error_body(body: &str) -> (String, String) {
    let Ok(json) = serde_json::from_str::<JsonValue>(body) else {
        return (String::new(), body.trim().to_string());
    };

    let lookup = |obj: &JsonValue, code: &str, msg: &str| -> Option<(String, String)> {
        let message = obj.get(msg)?.as_str()?.to_string();
        let code = obj
            .get(code)
            .and_then(|c| match c {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_default();
        Some((code, message))
    };

    lookup(&json, "error_code", "error_msg")
        .or_else(|| lookup(&json, "code", "message"))
        .or_else(|| json.get("error").and_then(|e| lookup(e, "code", "message")))
        .or_else(|| {
            json.get("NeutronError")
                .and_then(|e| lookup(e, "type", "message"))
        })
        .or_else(|| {
            // {"badRequest": {"code": 400, "message": "..."}}
            json.as_object()?
                .values()
                .find_map(|v| lookup(v, "code", "message"))
        })
        .unwrap_or_else(|| (String::new(), body.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_shapes() {
        assert_eq!(
            parse_error_body(r#"{"error_code":"VPC.0202","error_msg":"Query resource by id failed"}"#),
            ("VPC.0202".into(), "Query resource by id failed".into())
        );
        assert_eq!(
            parse_error_body(r#"{"error":{"code":"1101","message":"Invalid name"}}"#),
            ("1101".into(), "Invalid name".into())
        );
        assert_eq!(
            parse_error_body(r#"{"NeutronError":{"type":"SecurityGroupNotFound","message":"not found","detail":""}}"#),
            ("SecurityGroupNotFound".into(), "not found".into())
        );
        assert_eq!(
            parse_error_body(r#"{"itemNotFound":{"code":404,"message":"gone"}}"#),
            ("404".into(), "gone".into())
        );
        assert_eq!(parse_error_body("Bad Gateway\n"), ("".into(), "Bad Gateway".into()));
    }

    #[test]
    fn status_predicates() {
        let err = Error::from_response(
            Method::GET,
            "https://vpc.example.com/v1/vpcs/1",
            StatusCode::NOT_FOUND,
            "",
        );
        assert!(err.is_not_found());
        assert!(!err.is_server_error());
        assert_eq!(err.code(), None);

        let err = Error::from_response(
            Method::DELETE,
            "https://vpc.example.com/v1/subnets/1",
            StatusCode::CONFLICT,
            r#"{"code":"VPC.0616","message":"in use"}"#,
        );
        assert!(err.is_conflict());
        assert_eq!(err.code(), Some("VPC.0616"));
    }
}
