//! T-SQL text helpers

/// Quote an identifier using square brackets.
///
/// ```
/// use procbatch::sql::quote_identifier;
/// assert_eq!(quote_identifier("users"), "[users]");
/// assert_eq!(quote_identifier("user[data]"), "[user[data]]]");
/// ```
pub fn quote_identifier(ident: &str) -> String {
    let escaped = ident.replace(']', "]]");
    format!("[{}]", escaped)
}

/// Quote a Unicode string literal.
///
/// ```
/// use procbatch::sql::quote_string;
/// assert_eq!(quote_string("it's"), "N'it''s'");
/// ```
pub fn quote_string(s: &str) -> String {
    let escaped = s.replace('\'', "''");
    format!("N'{}'", escaped)
}

/// Quote a `RAISERROR` message; `%` is a format character there.
pub fn quote_raiserror_message(s: &str) -> String {
    quote_string(&s.replace('%', "%%"))
}

/// Single-line comment; line breaks in `text` would end it early.
pub fn comment(text: &str) -> String {
    let flattened: String = text
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    format!("-- {}", flattened)
}

/// Name of the success flag a producing command declares
pub fn success_variable(command: usize) -> String {
    format!("@Cmd{}Success", command)
}

/// Positional binding name, 1-based
pub fn binding_name(position: usize) -> String {
    format!("@P{}", position)
}
