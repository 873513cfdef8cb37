use crate::opcode::Catalog;

/// Split program text into raw tokens.
///
/// Leading and trailing whitespace is ignored and any run of whitespace
/// separates tokens. Tokens are not checked against the catalog here;
/// unknown codes are legal and only reported when executed.
pub fn parse(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_owned).collect()
}

/// Pretty-print a program listing for human inspection.
///
/// One line per token: zero-padded index, uppercased token, then the
/// mnemonic and description, or the catalog's unknown placeholder.
pub fn listing(tokens: &[String], catalog: &Catalog) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    for (idx, token) in tokens.iter().enumerate() {
        let desc = match catalog.lookup(token) {
            Some(e) => format!("{} - {}", e.name, e.description),
            None => catalog.unknown_label().to_string(),
        };
        let _ = writeln!(out, "{idx:02} {:<6} {desc}", token.to_uppercase());
    }
    out
}
