use super::*;
use crate::expression::ast::{AggregateKind, BooleanKind, ScalarFunction};

fn prop(name: &str) -> Expr {
    Expr::property(name)
}

fn indexer(expression: &str) -> IndexerNode {
    match parse(expression).unwrap() {
        Expr::Indexer(node) => node,
        other => panic!("expected indexer, got {:?}", other),
    }
}

#[test]
fn test_property() {
    assert_eq!(parse("Name").unwrap(), prop("Name"));
}

#[test]
fn test_null_safe_property() {
    assert_eq!(
        parse("User?").unwrap(),
        Expr::Property(PropertyNode::null_safe("User"))
    );
}

#[test]
fn test_navigation_flattens_segments() {
    let expr = parse("Country.Province.Name").unwrap();
    assert_eq!(
        expr,
        Expr::Navigation(NavigationNode {
            source: Box::new(prop("Country")),
            segments: vec![PropertyNode::new("Province"), PropertyNode::new("Name")],
        })
    );
}

#[test]
fn test_null_safe_navigation() {
    let Expr::Navigation(nav) = parse("User?.Address?.City").unwrap() else {
        panic!("expected navigation");
    };
    assert_eq!(*nav.source, Expr::Property(PropertyNode::null_safe("User")));
    assert!(nav.segments[0].null_safe);
    assert!(!nav.segments[1].null_safe);
}

#[test]
fn test_filter() {
    let expr = parse("Orders(Status='Done')").unwrap();
    assert_eq!(
        expr,
        Expr::Filter(FilterNode {
            source: Box::new(prop("Orders")),
            predicate: Box::new(Expr::BinaryCondition(BinaryConditionNode {
                left: Box::new(prop("Status")),
                op: ComparisonOp::Equal,
                right: Box::new(Expr::string("Done")),
            })),
        })
    );
}

#[test]
fn test_indexer_single_with_ordering() {
    let node = indexer("Provinces[0 asc Name]");
    assert_eq!(node.skip, Some(0));
    assert_eq!(node.take, None);
    assert_eq!(node.direction, Some(SortDirection::Asc));
    assert_eq!(node.order_by.as_deref(), Some("Name"));
    assert!(node.is_single());
}

#[test]
fn test_indexer_slice_descending() {
    let node = indexer("Provinces[0 10 desc CreatedAt]");
    assert_eq!(node.skip, Some(0));
    assert_eq!(node.take, Some(10));
    assert_eq!(node.direction, Some(SortDirection::Desc));
    assert_eq!(node.order_by.as_deref(), Some("CreatedAt"));
}

#[test]
fn test_indexer_ordering_only() {
    let node = indexer("Orders[asc Name]");
    assert_eq!(node.skip, None);
    assert_eq!(node.take, None);
    assert_eq!(node.direction, Some(SortDirection::Asc));
}

#[test]
fn test_indexer_last_element() {
    let node = indexer("Orders[-1]");
    assert_eq!(node.skip, Some(-1));
    assert_eq!(node.direction, None);
}

#[test]
fn test_indexer_nested_order_path() {
    let node = indexer("Orders[desc Customer.Name]");
    assert_eq!(node.order_by.as_deref(), Some("Customer.Name"));
}

#[test]
fn test_projection() {
    let Expr::Projection(node) = parse("Country.{Id, Name as Title}").unwrap() else {
        panic!("expected projection");
    };
    assert_eq!(*node.source, prop("Country"));
    assert_eq!(node.members.len(), 2);
    assert_eq!(node.members[0].output_name(), Some("Id"));
    assert_eq!(node.members[1].output_name(), Some("Title"));
}

#[test]
fn test_root_projection_with_computed_member() {
    let Expr::RootProjection(node) =
        parse("{Id, Country.Name as CountryName, (Orders:count) as OrderCount}").unwrap()
    else {
        panic!("expected root projection");
    };
    let names: Vec<_> = node.members.iter().filter_map(|m| m.output_name()).collect();
    assert_eq!(names, vec!["Id", "CountryName", "OrderCount"]);
    assert!(matches!(node.members[2].expr, Expr::Aggregation(_)));
}

#[test]
fn test_scalar_function() {
    assert_eq!(
        parse("Name:upper").unwrap(),
        Expr::Function(FunctionNode {
            source: Box::new(prop("Name")),
            function: ScalarFunction::Upper,
            args: vec![],
        })
    );

    let Expr::Function(node) = parse("Name:substring(0,3)").unwrap() else {
        panic!("expected function");
    };
    assert_eq!(node.function, ScalarFunction::Substring);
    assert_eq!(node.args, vec![Expr::number(0.0), Expr::number(3.0)]);
}

#[test]
fn test_aggregation() {
    assert_eq!(
        parse("Orders:sum(Total)").unwrap(),
        Expr::Aggregation(AggregationNode {
            source: Box::new(prop("Orders")),
            kind: AggregateKind::Sum,
            selector: Some(Box::new(prop("Total"))),
        })
    );
}

#[test]
fn test_filter_then_aggregation() {
    let Expr::Aggregation(node) = parse("Orders(Status='Done'):sum(Total)").unwrap() else {
        panic!("expected aggregation");
    };
    assert!(matches!(*node.source, Expr::Filter(_)));
}

#[test]
fn test_boolean_function() {
    let Expr::BooleanFunction(node) = parse("Orders:any(Status='Done')").unwrap() else {
        panic!("expected boolean function");
    };
    assert_eq!(node.kind, BooleanKind::Any);
    assert!(node.predicate.is_some());
}

#[test]
fn test_logical_condition_precedence() {
    let Expr::LogicalCondition(node) = parse("Status = 'Active' && Age > 18 || Admin").unwrap()
    else {
        panic!("expected logical");
    };
    assert_eq!(node.op, LogicalOp::Or);
    assert!(matches!(
        *node.left,
        Expr::LogicalCondition(LogicalConditionNode {
            op: LogicalOp::And,
            ..
        })
    ));
}

#[test]
fn test_word_operators_and_not() {
    let Expr::LogicalCondition(node) = parse("not Deleted and Name startswith 'A'").unwrap()
    else {
        panic!("expected logical");
    };
    assert!(matches!(*node.left, Expr::Not(_)));
    assert!(matches!(
        *node.right,
        Expr::BinaryCondition(BinaryConditionNode {
            op: ComparisonOp::StartsWith,
            ..
        })
    ));
}

#[test]
fn test_coalesce_is_right_associative() {
    let Expr::Coalesce(outer) = parse("A ?? B ?? C").unwrap() else {
        panic!("expected coalesce");
    };
    assert_eq!(*outer.left, prop("A"));
    assert!(matches!(*outer.right, Expr::Coalesce(_)));
}

#[test]
fn test_ternary() {
    let Expr::Ternary(node) = parse("Score>=90 ? 'A' : 'B'").unwrap() else {
        panic!("expected ternary");
    };
    assert_eq!(*node.when_true, Expr::string("A"));
    assert_eq!(*node.when_false, Expr::string("B"));
}

#[test]
fn test_nested_ternary_is_right_associative() {
    let Expr::Ternary(node) = parse("Score>=90 ? 'A' : Score>=80 ? 'B' : 'C'").unwrap() else {
        panic!("expected ternary");
    };
    assert!(matches!(*node.when_false, Expr::Ternary(_)));
}

#[test]
fn test_ternary_branch_with_property_and_function() {
    let Expr::Ternary(node) = parse("Active ? Name:upper : Name").unwrap() else {
        panic!("expected ternary");
    };
    assert!(matches!(*node.when_true, Expr::Function(_)));
    assert_eq!(*node.when_false, prop("Name"));
}

#[test]
fn test_ternary_branches_named_like_functions_are_properties() {
    let Expr::Ternary(node) = parse("Flag ? Max : Min").unwrap() else {
        panic!("expected ternary");
    };
    assert_eq!(*node.condition, prop("Flag"));
    assert_eq!(*node.when_true, prop("Max"));
    assert_eq!(*node.when_false, prop("Min"));

    let Expr::Ternary(node) = parse("Flag ? 'a' : Count").unwrap() else {
        panic!("expected ternary");
    };
    assert_eq!(*node.when_true, Expr::string("a"));
    assert_eq!(*node.when_false, prop("Count"));

    let Expr::Ternary(node) = parse("Flag ? Name : Year").unwrap() else {
        panic!("expected ternary");
    };
    assert_eq!(*node.when_false, prop("Year"));
}

#[test]
fn test_nested_ternary_with_function_named_branches() {
    let Expr::Ternary(outer) = parse("A ? B ? Max : Min : Length").unwrap() else {
        panic!("expected ternary");
    };
    let Expr::Ternary(inner) = *outer.when_true else {
        panic!("expected nested ternary");
    };
    assert_eq!(*inner.when_true, prop("Max"));
    assert_eq!(*inner.when_false, prop("Min"));
    assert_eq!(*outer.when_false, prop("Length"));
}

#[test]
fn test_ternary_still_prefers_function_when_separator_follows() {
    let Expr::Ternary(node) = parse("Flag ? Orders:max(Total) : Min").unwrap() else {
        panic!("expected ternary");
    };
    assert!(matches!(*node.when_true, Expr::Aggregation(_)));
    assert_eq!(*node.when_false, prop("Min"));
}

#[test]
fn test_ternary_without_separator_is_rejected() {
    assert!(parse("Flag ? Name").is_err());
}

#[test]
fn test_group_by_and_group_elements() {
    let Expr::GroupBy(group) = parse("Orders:groupBy(Status)").unwrap() else {
        panic!("expected group by");
    };
    assert_eq!(*group.key, prop("Status"));

    let Expr::GroupElements(node) = parse("Orders:groupBy(Status):sum(Total)").unwrap() else {
        panic!("expected group elements");
    };
    assert_eq!(node.kind, AggregateKind::Sum);
    assert_eq!(*node.group.key, prop("Status"));
}

#[test]
fn test_literals() {
    assert_eq!(parse("'Done'").unwrap(), Expr::string("Done"));
    assert_eq!(parse("3").unwrap(), Expr::number(3.0));
    assert_eq!(parse("true").unwrap(), Expr::Literal(Literal::Boolean(true)));
    assert_eq!(parse("null").unwrap(), Expr::Literal(Literal::Null));
}

// ----------------------------------------------------------------------------
// Malformed input
// ----------------------------------------------------------------------------

#[test]
fn test_missing_closing_bracket_reports_expected_closer_and_position() {
    let err = parse("Provinces[asc Name").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UnbalancedBracket);
    assert_eq!(err.position, 18);
    assert!(err.message.contains("']'"), "{}", err.message);
    assert!(err.message.contains("end of expression"), "{}", err.message);
}

#[test]
fn test_missing_dot_before_projection() {
    let err = parse("Country{Id, Name}").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::MissingDot);
    assert_eq!(err.position, 7);
    assert!(err.message.contains("'.'"), "{}", err.message);
}

#[test]
fn test_missing_dot_after_bracket() {
    let err = parse("Orders[0]Name").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::MissingDot);
    assert_eq!(err.position, 9);

    let err = parse("Orders(Total > 3)Name").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::MissingDot);
    assert_eq!(err.position, 17);
}

#[test]
fn test_missing_closing_brace() {
    let err = parse("Country.{Id, Name").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UnbalancedBracket);
    assert!(err.message.contains("'}'"));
    assert_eq!(err.position, 17);
}

#[test]
fn test_computed_member_requires_alias() {
    let err = parse("{Id, (Orders:count)}").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::MissingAlias);
    assert_eq!(err.position, 5);
}

#[test]
fn test_unknown_function() {
    let err = parse("Name:shout").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UnknownFunction);
    assert_eq!(err.position, 5);
}

#[test]
fn test_function_missing_required_arguments() {
    let err = parse("Name:substring").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::InvalidArguments);

    let err = parse("Orders:groupBy").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::InvalidArguments);
}

#[test]
fn test_unmatched_closer() {
    let err = parse("Name)").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UnbalancedBracket);
    assert_eq!(err.position, 4);
}

#[test]
fn test_empty_indexer() {
    let err = parse("Orders[]").unwrap_err();
    assert_eq!(err.position, 7);
}

#[test]
fn test_error_display_includes_expression() {
    let err = parse("Provinces[asc Name").unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("Provinces[asc Name"));
    assert!(rendered.contains("position 18"));
}
