//! SQL identifier handling.
//!
//! [`Ident`] is a parsed schema/table/column name. Parsing validates every
//! part, and rendering always double-quotes so identifiers keep their case and
//! can never smuggle SQL in.
//!
//! - Unquoted parts must match `[A-Za-z_][A-Za-z0-9_$]*`
//! - Quoted parts allow any characters except NUL and escape `"` as `""`
//! - A bare `*` is allowed as the last part (`t.*`)
//!
//! ```ignore
//! use relorm::Ident;
//!
//! assert_eq!(Ident::parse("public.users")?.to_sql(), r#""public"."users""#);
//! assert_eq!(Ident::parse("u.*")?.to_sql(), r#""u".*"#);
//! # Ok::<(), relorm::OrmError>(())
//! ```

use crate::error::{OrmError, OrmResult};

/// A part of a SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentPart {
    /// A validated name.
    Name(String),
    /// `*`
    Star,
}

/// A SQL identifier (column, table, or schema name), possibly dotted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub parts: Vec<IdentPart>,
}

impl Ident {
    /// Parse an identifier string, supporting dotted and quoted forms.
    ///
    /// - Dotted: `schema.table.column`
    /// - Quoted: `"CamelCase"."UserTable"`
    /// - Mixed: `public."UserTable".id`
    pub fn parse(s: &str) -> OrmResult<Self> {
        if s.is_empty() {
            return Err(OrmError::build("Identifier cannot be empty"));
        }
        if s.contains('\0') {
            return Err(OrmError::build("Identifier cannot contain NUL character"));
        }

        let mut parts = Vec::new();
        let mut chars = s.chars().peekable();

        while chars.peek().is_some() {
            if !parts.is_empty() {
                if matches!(parts.last(), Some(IdentPart::Star)) {
                    return Err(OrmError::build(format!(
                        "'*' must be the last identifier part in {s:?}"
                    )));
                }
                match chars.next() {
                    Some('.') => {
                        if chars.peek().is_none() {
                            return Err(OrmError::build("Trailing '.' in identifier"));
                        }
                    }
                    Some(c) => {
                        return Err(OrmError::build(format!(
                            "Expected '.' between identifier parts, got '{c}'"
                        )));
                    }
                    None => break,
                }
            }

            match chars.peek() {
                Some('*') => {
                    chars.next();
                    parts.push(IdentPart::Star);
                    continue;
                }
                Some('"') => {
                    chars.next();
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('"') => {
                                // "" is an escaped quote
                                if chars.peek() == Some(&'"') {
                                    chars.next();
                                    name.push('"');
                                } else {
                                    break;
                                }
                            }
                            Some(c) => name.push(c),
                            None => return Err(OrmError::build("Unclosed quoted identifier")),
                        }
                    }
                    if name.is_empty() {
                        return Err(OrmError::build("Empty quoted identifier"));
                    }
                    parts.push(IdentPart::Name(name));
                    continue;
                }
                _ => {}
            }

            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c == '.' {
                    break;
                }
                let ok = if name.is_empty() {
                    c == '_' || c.is_ascii_alphabetic()
                } else {
                    c == '_' || c == '$' || c.is_ascii_alphanumeric()
                };
                if !ok {
                    return Err(OrmError::build(format!(
                        "Invalid character '{c}' in identifier {s:?}"
                    )));
                }
                name.push(c);
                chars.next();
            }
            if name.is_empty() {
                return Err(OrmError::build("Empty identifier segment"));
            }
            parts.push(IdentPart::Name(name));
        }

        Ok(Self { parts })
    }

    /// Render the identifier as SQL.
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        self.write_sql(&mut out);
        out
    }

    pub(crate) fn write_sql(&self, out: &mut String) {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            match part {
                IdentPart::Star => out.push('*'),
                IdentPart::Name(s) => {
                    out.push('"');
                    for ch in s.chars() {
                        if ch == '"' {
                            out.push_str("\"\"");
                        } else {
                            out.push(ch);
                        }
                    }
                    out.push('"');
                }
            }
        }
    }
}

/// Whether `s` already looks like an SQL expression rather than a name.
fn is_expression(s: &str) -> bool {
    s.contains('(') || s.chars().any(char::is_whitespace)
}

/// Quote a column reference.
///
/// Expressions (anything with `(` or whitespace, e.g. `COUNT(*)`,
/// `price * qty`) are passed through untouched; names are parsed and quoted.
pub fn quote_column(s: &str) -> OrmResult<String> {
    if s == "*" || is_expression(s) {
        return Ok(s.to_string());
    }
    Ok(Ident::parse(s)?.to_sql())
}

/// Quote a table reference. Same rules as [`quote_column`].
pub fn quote_table(s: &str) -> OrmResult<String> {
    if is_expression(s) {
        return Ok(s.to_string());
    }
    Ok(Ident::parse(s)?.to_sql())
}
