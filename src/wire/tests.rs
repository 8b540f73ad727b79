use super::*;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
#[error("store offline")]
struct StoreOffline;

#[derive(Debug, thiserror::Error)]
enum LookupFailed {
    #[error("lookup of '{0}' failed")]
    Backend(String, #[source] StoreOffline),
}

#[test]
fn test_request_wire_shape() {
    let request = Request::new(vec!["1".into(), "2".into()], &["Name".into(), "Country.Name".into()])
        .unwrap();
    let encoded = serde_json::to_value(&request).unwrap();
    assert_eq!(
        encoded,
        json!({"selectorIds": ["1", "2"], "expressions": "[\"Name\",\"Country.Name\"]"})
    );
    assert_eq!(request.expression_list().unwrap(), vec!["Name", "Country.Name"]);
}

#[test]
fn test_malformed_expression_list() {
    let request = Request {
        selector_ids: vec![],
        expressions: "not json".into(),
    };
    assert!(matches!(
        request.expression_list(),
        Err(WireError::Decode { what: "expressions", .. })
    ));
}

#[test]
fn test_success_response_shape() {
    let response = Response::success(vec![DataResponse {
        id: "1".into(),
        values: vec![ValueResponse::new("Name", &json!("Alice"))],
    }]);
    let encoded = serde_json::to_value(&response).unwrap();
    assert_eq!(
        encoded,
        json!({
            "isSuccess": true,
            "data": {"items": [{"id": "1", "values": [{"expression": "Name", "value": "\"Alice\""}]}]}
        })
    );

    let items = response.into_result().unwrap();
    assert_eq!(items[0].values[0].decode().unwrap(), json!("Alice"));
}

#[test]
fn test_fault_rebuilds_error_chain() {
    let error = LookupFailed::Backend("User".into(), StoreOffline);
    let message_id = Uuid::new_v4();
    let fault = Fault::from_error(&error, Some(message_id), "memory-store");

    assert_eq!(fault.faulted_message_id, Some(message_id));
    assert_eq!(fault.exceptions.len(), 2);
    assert_eq!(fault.exceptions[0].exception_type, "LookupFailed");
    assert_eq!(fault.exceptions[1].exception_type, "StoreOffline");

    let encoded = serde_json::to_value(&fault).unwrap();
    assert_eq!(encoded["exceptions"][0]["type"], json!("LookupFailed"));
    assert!(encoded["faultId"].is_string());

    let err = Response::failure(fault).into_result().unwrap_err();
    assert_eq!(err.message, "lookup of 'User' failed");
    let chain: Vec<_> = err.chain().map(|e| e.exception_type.as_str()).collect();
    assert_eq!(chain, vec!["LookupFailed", "StoreOffline"]);
    assert_eq!(
        std::error::Error::source(&err).map(|s| s.to_string()),
        Some(format!("StoreOffline: store offline (on {})", HostInfo::current().machine_name))
    );
}

#[test]
fn test_failure_without_fault() {
    let response = Response {
        is_success: false,
        data: None,
        fault: None,
    };
    assert_eq!(response.into_result().unwrap_err().exception_type, "UnknownFault");
}

#[test]
fn test_envelope_round_trip() {
    let envelope = ResponseEnvelope {
        correlation_id: Uuid::new_v4(),
        response: Response::success(vec![]),
    };
    let text = serde_json::to_string(&envelope).unwrap();
    let decoded: ResponseEnvelope = serde_json::from_str(&text).unwrap();
    assert_eq!(decoded, envelope);
}

#[test]
fn test_selector_text_normalizes_numbers() {
    assert_eq!(selector_text(&json!("FR")).as_deref(), Some("FR"));
    assert_eq!(selector_text(&json!(7)).as_deref(), Some("7"));
    assert_eq!(selector_text(&json!(-7)).as_deref(), Some("-7"));
    assert_eq!(selector_text(&json!(1.0)).as_deref(), Some("1"));
    assert_eq!(selector_text(&serde_json::from_str("1e3").unwrap()).as_deref(), Some("1000"));
    assert_eq!(selector_text(&json!(2.5)).as_deref(), Some("2.5"));
    assert_eq!(selector_text(&json!(true)), None);
    assert_eq!(selector_text(&json!(null)), None);
}
