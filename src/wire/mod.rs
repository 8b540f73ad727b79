//! Wire contract shared by every transport.
//!
//! This module contains:
//! - `Request`: selector ids plus a JSON-encoded expression list
//! - `Response`: success flag with `DataResponse` items, or a `Fault`
//! - `Fault` / `RemoteError`: serializable failure and its rebuilt error chain
//! - `RequestEnvelope` / `ResponseEnvelope`: correlation-id framing

use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Errors encoding or decoding wire payloads.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        source: serde_json::Error,
    },

    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, WireError>;

// ============================================================================
// Request
// ============================================================================

/// One batched call: distinct selector ids and distinct expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub selector_ids: Vec<String>,
    /// JSON array of expression strings.
    pub expressions: String,
}

impl Request {
    pub fn new(selector_ids: Vec<String>, expressions: &[String]) -> Result<Self> {
        let expressions = serde_json::to_string(expressions).map_err(|source| WireError::Encode {
            what: "expressions",
            source,
        })?;
        Ok(Self {
            selector_ids,
            expressions,
        })
    }

    pub fn expression_list(&self) -> Result<Vec<String>> {
        serde_json::from_str(&self.expressions).map_err(|source| WireError::Decode {
            what: "expressions",
            source,
        })
    }
}

/// Text form of a selector id or document identity.
///
/// Integral numbers render without a fraction, so `1`, `1.0` and `1e0` all
/// select the document whose id is `1`. Other values have no text form.
pub fn selector_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
                (f as i64).to_string()
            }
            _ => n.to_string(),
        }),
        _ => None,
    }
}

// ============================================================================
// Response
// ============================================================================

/// One resolved expression value, JSON-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueResponse {
    pub expression: String,
    pub value: String,
}

impl ValueResponse {
    pub fn new(expression: impl Into<String>, value: &Value) -> Self {
        Self {
            expression: expression.into(),
            value: value.to_string(),
        }
    }

    pub fn decode(&self) -> Result<Value> {
        serde_json::from_str(&self.value).map_err(|source| WireError::Decode {
            what: "value",
            source,
        })
    }
}

/// All requested values for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse {
    pub id: String,
    pub values: Vec<ValueResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    pub items: Vec<DataResponse>,
}

/// Result envelope returned for every [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub is_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<Fault>,
}

impl Response {
    pub fn success(items: Vec<DataResponse>) -> Self {
        Self {
            is_success: true,
            data: Some(ResponseData { items }),
            fault: None,
        }
    }

    pub fn failure(fault: Fault) -> Self {
        Self {
            is_success: false,
            data: None,
            fault: Some(fault),
        }
    }

    /// Items on success, the rebuilt remote error chain otherwise.
    pub fn into_result(self) -> std::result::Result<Vec<DataResponse>, RemoteError> {
        if self.is_success {
            return Ok(self.data.map(|d| d.items).unwrap_or_default());
        }
        Err(match &self.fault {
            Some(fault) => RemoteError::from(fault),
            None => RemoteError {
                exception_type: "UnknownFault".to_string(),
                message: "Remote call failed without a fault".to_string(),
                host: None,
                source: None,
            },
        })
    }
}

// ============================================================================
// Fault
// ============================================================================

/// One error of a remote failure chain, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    #[serde(rename = "type")]
    pub exception_type: String,
    pub message: String,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub machine_name: String,
    pub process_id: u32,
}

impl HostInfo {
    pub fn current() -> Self {
        Self {
            machine_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            process_id: std::process::id(),
        }
    }
}

/// Serializable description of a remote failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fault {
    pub fault_id: Uuid,
    pub faulted_message_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub exceptions: Vec<ExceptionInfo>,
    pub host: HostInfo,
}

/// Leading identifier of a Debug rendering, e.g. `UnknownTag` for
/// `UnknownTag("x")`.
fn debug_head(error: &dyn StdError) -> String {
    let rendered = format!("{:?}", error);
    let head: String = rendered
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if head.is_empty() {
        "Error".to_string()
    } else {
        head
    }
}

impl Fault {
    /// Capture `error` and its `source()` chain.
    pub fn from_error<E>(error: &E, faulted_message_id: Option<Uuid>, source: &str) -> Self
    where
        E: StdError + 'static,
    {
        let mut exceptions = vec![ExceptionInfo {
            exception_type: crate::model::short_type_name::<E>().to_string(),
            message: error.to_string(),
            stack_trace: None,
            source: Some(source.to_string()),
        }];
        let mut next = error.source();
        while let Some(cause) = next {
            exceptions.push(ExceptionInfo {
                exception_type: debug_head(cause),
                message: cause.to_string(),
                stack_trace: None,
                source: Some(source.to_string()),
            });
            next = cause.source();
        }

        Self {
            fault_id: Uuid::new_v4(),
            faulted_message_id,
            timestamp: Utc::now(),
            exceptions,
            host: HostInfo::current(),
        }
    }
}

/// Remote failure rebuilt as a local error chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub exception_type: String,
    pub message: String,
    pub host: Option<String>,
    source: Option<Box<RemoteError>>,
}

impl RemoteError {
    /// Errors of the chain, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &RemoteError> {
        std::iter::successors(Some(self), |e| e.source.as_deref())
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exception_type, self.message)?;
        if let Some(host) = &self.host {
            write!(f, " (on {})", host)?;
        }
        Ok(())
    }
}

impl StdError for RemoteError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<&Fault> for RemoteError {
    fn from(fault: &Fault) -> Self {
        let host = Some(fault.host.machine_name.clone());
        let rebuilt = fault
            .exceptions
            .iter()
            .rev()
            .fold(None, |inner: Option<Box<RemoteError>>, info| {
                Some(Box::new(RemoteError {
                    exception_type: info.exception_type.clone(),
                    message: info.message.clone(),
                    host: host.clone(),
                    source: inner,
                }))
            });
        match rebuilt {
            Some(outer) => *outer,
            None => RemoteError {
                exception_type: "UnknownFault".to_string(),
                message: format!("Fault {} carried no exceptions", fault.fault_id),
                host,
                source: None,
            },
        }
    }
}

// ============================================================================
// Envelopes
// ============================================================================

/// A request addressed to a tag's queue, with the id its reply must carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub correlation_id: Uuid,
    pub tag: String,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub correlation_id: Uuid,
    pub response: Response,
}

#[cfg(test)]
mod tests;
