//! Client request messages.
//!
//! Every client frame carries `action` and `requestId`. The request id is
//! echoed back verbatim and may be a string or a number, so it is kept as a
//! raw JSON value rather than forced into one type.

use serde::Deserialize;
use serde_json::Value;

/// A client request, parsed and validated.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Authorize { tokens: String },
    KuksaAuthorize { clientid: String, secret: String },
    Get { path: String },
    Set { path: String, value: Value },
    Subscribe { path: String },
    Unsubscribe { subscription_id: u32 },
    GetMetadata { path: String },
    UpdateMetadata { path: String, metadata: Value },
}

impl ClientRequest {
    /// The wire name of the action, echoed in responses.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Authorize { .. } => "authorize",
            Self::KuksaAuthorize { .. } => "kuksa-authorize",
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::GetMetadata { .. } => "getMetadata",
            Self::UpdateMetadata { .. } => "updateMetaData",
        }
    }
}

/// Outcome of parsing one inbound frame.
#[derive(Debug)]
pub enum ParseOutcome {
    /// A known action with a valid payload.
    Request {
        request_id: Option<Value>,
        request: ClientRequest,
    },
    /// Valid JSON naming an action this server does not know. Logged by the
    /// caller; produces no response.
    UnknownAction { action: String },
}

/// A frame that could not be parsed. Carries whatever request id could still
/// be recovered so the error envelope can echo it.
#[derive(Debug)]
pub struct RequestError {
    pub request_id: Option<Value>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct AuthorizePayload {
    tokens: String,
}

#[derive(Debug, Deserialize)]
struct KuksaAuthorizePayload {
    clientid: String,
    secret: String,
}

#[derive(Debug, Deserialize)]
struct PathPayload {
    path: String,
}

#[derive(Debug, Deserialize)]
struct SetPayload {
    path: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct UnsubscribePayload {
    #[serde(rename = "subscriptionId")]
    subscription_id: u32,
}

#[derive(Debug, Deserialize)]
struct UpdateMetadataPayload {
    path: String,
    metadata: Value,
}

/// Parse one raw text frame into a request.
pub fn parse_request(text: &str) -> Result<ParseOutcome, RequestError> {
    let root: Value = serde_json::from_str(text).map_err(|e| RequestError {
        request_id: None,
        message: e.to_string(),
    })?;
    let request_id = recover_request_id(&root);

    let action = root
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| RequestError {
            request_id: request_id.clone(),
            message: "request lacks an action".to_string(),
        })?
        .to_string();

    let request = match action.as_str() {
        "authorize" => {
            let p: AuthorizePayload = payload(&root, &request_id)?;
            ClientRequest::Authorize { tokens: p.tokens }
        }
        "kuksa-authorize" => {
            let p: KuksaAuthorizePayload = payload(&root, &request_id)?;
            ClientRequest::KuksaAuthorize {
                clientid: p.clientid,
                secret: p.secret,
            }
        }
        "get" => {
            let p: PathPayload = payload(&root, &request_id)?;
            ClientRequest::Get { path: p.path }
        }
        "set" => {
            let p: SetPayload = payload(&root, &request_id)?;
            ClientRequest::Set {
                path: p.path,
                value: p.value,
            }
        }
        "subscribe" => {
            let p: PathPayload = payload(&root, &request_id)?;
            ClientRequest::Subscribe { path: p.path }
        }
        "unsubscribe" => {
            let p: UnsubscribePayload = payload(&root, &request_id)?;
            ClientRequest::Unsubscribe {
                subscription_id: p.subscription_id,
            }
        }
        "getMetadata" => {
            let p: PathPayload = payload(&root, &request_id)?;
            ClientRequest::GetMetadata { path: p.path }
        }
        "updateMetaData" => {
            let p: UpdateMetadataPayload = payload(&root, &request_id)?;
            ClientRequest::UpdateMetadata {
                path: p.path,
                metadata: p.metadata,
            }
        }
        _ => return Ok(ParseOutcome::UnknownAction { action }),
    };

    Ok(ParseOutcome::Request {
        request_id,
        request,
    })
}

fn payload<T: serde::de::DeserializeOwned>(
    root: &Value,
    request_id: &Option<Value>,
) -> Result<T, RequestError> {
    serde_json::from_value(root.clone()).map_err(|e| RequestError {
        request_id: request_id.clone(),
        message: e.to_string(),
    })
}

fn recover_request_id(root: &Value) -> Option<Value> {
    root.get("requestId")
        .filter(|v| v.is_string() || v.is_number())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parsed(text: &str) -> (Option<Value>, ClientRequest) {
        match parse_request(text).unwrap() {
            ParseOutcome::Request {
                request_id,
                request,
            } => (request_id, request),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_get() {
        let (id, request) = parsed(r#"{"action":"get","requestId":"8756","path":"Vehicle.Speed"}"#);
        assert_eq!(id, Some(json!("8756")));
        assert_eq!(
            request,
            ClientRequest::Get {
                path: "Vehicle.Speed".to_string()
            }
        );
    }

    #[test]
    fn test_parse_set_with_numeric_request_id() {
        let (id, request) =
            parsed(r#"{"action":"set","requestId":42,"path":"Vehicle.Speed","value":120}"#);
        assert_eq!(id, Some(json!(42)));
        assert_eq!(
            request,
            ClientRequest::Set {
                path: "Vehicle.Speed".to_string(),
                value: json!(120),
            }
        );
    }

    #[test]
    fn test_parse_authorize() {
        let (_, request) = parsed(r#"{"action":"authorize","requestId":"1","tokens":"ey.ab.cd"}"#);
        assert_eq!(
            request,
            ClientRequest::Authorize {
                tokens: "ey.ab.cd".to_string()
            }
        );
    }

    #[test]
    fn test_parse_unsubscribe() {
        let (_, request) =
            parsed(r#"{"action":"unsubscribe","requestId":"1","subscriptionId":20000001}"#);
        assert_eq!(
            request,
            ClientRequest::Unsubscribe {
                subscription_id: 20_000_001
            }
        );
    }

    #[test]
    fn test_parse_update_metadata() {
        let (_, request) = parsed(
            r#"{"action":"updateMetaData","requestId":"1","path":"Vehicle.Speed","metadata":{"unit":"km/h"}}"#,
        );
        assert_eq!(
            request,
            ClientRequest::UpdateMetadata {
                path: "Vehicle.Speed".to_string(),
                metadata: json!({"unit": "km/h"}),
            }
        );
    }

    #[test]
    fn test_unknown_action_is_not_an_error() {
        match parse_request(r#"{"action":"fly","requestId":"1"}"#).unwrap() {
            ParseOutcome::UnknownAction { action } => assert_eq!(action, "fly"),
            other => panic!("expected unknown action, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_json_loses_request_id() {
        let err = parse_request("{ not json").unwrap_err();
        assert!(err.request_id.is_none());
    }

    #[test]
    fn test_missing_field_recovers_request_id() {
        let err = parse_request(r#"{"action":"get","requestId":"77"}"#).unwrap_err();
        assert_eq!(err.request_id, Some(json!("77")));
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_missing_action_recovers_request_id() {
        let err = parse_request(r#"{"requestId":"9","path":"Vehicle"}"#).unwrap_err();
        assert_eq!(err.request_id, Some(json!("9")));
    }

    #[test]
    fn test_non_scalar_request_id_is_dropped() {
        let err = parse_request(r#"{"requestId":{"a":1},"path":"Vehicle"}"#).unwrap_err();
        assert!(err.request_id.is_none());
    }
}
