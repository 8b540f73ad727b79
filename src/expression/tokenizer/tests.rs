use super::*;

fn kinds(expression: &str) -> Vec<TokenKind> {
    tokenize(expression)
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

#[test]
fn test_identifiers_and_navigation() {
    assert_eq!(
        kinds("Country.Name"),
        vec![
            TokenKind::Identifier("Country".into()),
            TokenKind::Dot,
            TokenKind::Identifier("Name".into()),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_two_character_operators_use_lookahead() {
    assert_eq!(
        kinds("! != > >= < <= ? ??"),
        vec![
            TokenKind::Not,
            TokenKind::NotEqual,
            TokenKind::Greater,
            TokenKind::GreaterEqual,
            TokenKind::Less,
            TokenKind::LessEqual,
            TokenKind::Question,
            TokenKind::Coalesce,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_word_and_symbol_logical_operators() {
    assert_eq!(
        kinds("a && b and c || d or not e"),
        vec![
            TokenKind::Identifier("a".into()),
            TokenKind::And,
            TokenKind::Identifier("b".into()),
            TokenKind::And,
            TokenKind::Identifier("c".into()),
            TokenKind::Or,
            TokenKind::Identifier("d".into()),
            TokenKind::Or,
            TokenKind::Not,
            TokenKind::Identifier("e".into()),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_keywords() {
    assert_eq!(
        kinds("asc desc as contains startswith endswith true false null"),
        vec![
            TokenKind::Asc,
            TokenKind::Desc,
            TokenKind::As,
            TokenKind::Contains,
            TokenKind::StartsWith,
            TokenKind::EndsWith,
            TokenKind::Boolean(true),
            TokenKind::Boolean(false),
            TokenKind::Null,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_numbers() {
    assert_eq!(
        kinds("0 10 -1 2.5"),
        vec![
            TokenKind::Number(0.0),
            TokenKind::Number(10.0),
            TokenKind::Number(-1.0),
            TokenKind::Number(2.5),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_string_escapes() {
    let tokens = tokenize(r#"'a\'b\n' "c\"d\\""#).unwrap();
    assert_eq!(tokens[0].kind, TokenKind::String("a'b\n".into()));
    assert_eq!(tokens[1].kind, TokenKind::String("c\"d\\".into()));
}

#[test]
fn test_positions_are_character_offsets() {
    let tokens = tokenize("Orders[0 10]").unwrap();
    let positions: Vec<usize> = tokens.iter().map(|t| t.position).collect();
    assert_eq!(positions, vec![0, 6, 7, 9, 11, 12]);
}

#[test]
fn test_eof_position_is_expression_length() {
    let tokens = tokenize("Provinces[asc Name").unwrap();
    assert_eq!(tokens.last().unwrap().position, 18);
}

#[test]
fn test_unrecognized_character() {
    let err = tokenize("Name # x").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UnexpectedCharacter);
    assert_eq!(err.position, 5);
    assert!(err.message.contains('#'));
}

#[test]
fn test_lone_ampersand_and_pipe() {
    let err = tokenize("a & b").unwrap_err();
    assert_eq!(err.position, 2);
    assert!(err.message.contains("'&&'"));

    let err = tokenize("a | b").unwrap_err();
    assert_eq!(err.position, 2);
    assert!(err.message.contains("'||'"));
}

#[test]
fn test_unterminated_string() {
    let err = tokenize("Status = 'Done").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UnterminatedString);
    assert_eq!(err.position, 9);
}
