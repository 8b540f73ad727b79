//! The accessor and document backends evaluate expressions alike.

use serde_json::{json, Value};

use distmap::compiler::document::evaluate;
use distmap::compiler::{AccessorCompiler, DocumentCompiler, EvaluationError};

fn dataset() -> Vec<Value> {
    vec![
        json!({
            "Id": 1,
            "Name": "  Alice  ",
            "Score": 91,
            "Active": true,
            "Joined": "2020-02-29T10:00:00Z",
            "Country": {"Name": "France", "Code": "FR"},
            "Manager": null,
            "Orders": [
                {"Id": 10, "Status": "Done", "Total": 12.5},
                {"Id": 11, "Status": "Open", "Total": 40},
                {"Id": 12, "Status": "Done", "Total": 7.5}
            ]
        }),
        json!({
            "Id": 2,
            "Name": "Bob",
            "Score": 42,
            "Active": false,
            "Joined": "2023-11-05T08:30:00Z",
            "Country": {"Name": "Spain", "Code": "ES"},
            "Manager": {"Name": "Alice"},
            "Orders": []
        }),
    ]
}

const EXPRESSIONS: &[&str] = &[
    "Id",
    "Country.Name",
    "Manager?.Name",
    "Name:trim:upper",
    "Name:trim:length",
    "Country.Name:substring(0,3)",
    "Country.Code:lower",
    "Orders:count",
    "Orders:count(Status='Done')",
    "Orders:sum(Total)",
    "Orders(Status='Done'):sum(Total)",
    "Orders:max(Total)",
    "Orders:any(Total > 20)",
    "Orders:all(Status='Done')",
    "Orders(Total > 10).Id",
    "Orders[desc Total].Id",
    "Orders.{Id, Status as State}",
    "{Id, Country.Code as Code}",
    "Score >= 90 ? 'A' : Score >= 50 ? 'B' : 'C'",
    "Active && Score > 40",
    "Manager ?? 'none'",
    "Country.Name startswith 'Fr'",
    "Joined:year",
    "Joined:month",
];

#[test]
fn test_backends_agree_on_dataset() {
    let accessors = AccessorCompiler::new();
    let documents = DocumentCompiler::new();

    for expression in EXPRESSIONS {
        let accessor = accessors.compile_str(expression).unwrap();
        let compiled = documents.compile_str(expression).unwrap();

        for document in dataset() {
            let expected = accessor.evaluate(&document).unwrap();
            let actual = evaluate(&compiled, &document).unwrap();
            assert_eq!(
                actual, expected,
                "'{expression}' disagrees on document {}",
                document["Id"]
            );
        }
    }
}

#[test]
fn test_backends_reject_the_same_syntax_errors() {
    let accessors = AccessorCompiler::new();
    let documents = DocumentCompiler::new();

    for expression in ["Orders(", "Name:", "{Id,", "Id Name", "Name:nosuchfn"] {
        assert!(
            accessors.compile_str(expression).is_err(),
            "accessor accepted '{expression}'"
        );
        assert!(
            documents.compile_str(expression).is_err(),
            "document accepted '{expression}'"
        );
    }
}

#[test]
fn test_null_navigation_without_null_safe_marker() {
    let accessors = AccessorCompiler::new();
    let documents = DocumentCompiler::new();
    let document = &dataset()[0];

    // The accessor backend reports the null hop; the document backend yields null.
    let err = accessors
        .compile_str("Manager.Name")
        .unwrap()
        .evaluate(document)
        .unwrap_err();
    assert_eq!(
        err,
        EvaluationError::NullReference {
            property: "Manager".to_string()
        }
    );
    let compiled = documents.compile_str("Manager.Name").unwrap();
    assert_eq!(evaluate(&compiled, document).unwrap(), Value::Null);

    // With the marker both agree on null.
    let accessor = accessors.compile_str("Manager?.Name").unwrap();
    let compiled = documents.compile_str("Manager?.Name").unwrap();
    assert_eq!(accessor.evaluate(document).unwrap(), Value::Null);
    assert_eq!(evaluate(&compiled, document).unwrap(), Value::Null);
}
