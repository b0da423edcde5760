//! Bound parameters.
//!
//! A query carries [`Params`]: positional values and `:name`-keyed values.
//! Raw SQL fragments refer to them with `?` and `:name`; the query builder
//! resolves those to dialect placeholders while collecting the values into a
//! [`ParamList`] in the order they appear in the final SQL.

use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Parameters bound to a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    positional: Vec<Value>,
    named: IndexMap<String, Value>,
}

fn normalize_name(name: impl Into<String>) -> String {
    let name = name.into();
    match name.strip_prefix(':') {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional values, consumed by `?` placeholders in order.
    pub fn positional<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self {
            positional: values.into_iter().map(Into::into).collect(),
            named: IndexMap::new(),
        }
    }

    /// Bind a named value. A leading `:` in `name` is ignored.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(normalize_name(name), value.into());
        self
    }

    /// Append a positional value.
    pub fn push(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Replace everything with `other`.
    pub fn set(&mut self, other: Params) {
        *self = other;
    }

    /// Merge `other` into `self`: positional values are appended, named
    /// values overwrite by key.
    pub fn merge(&mut self, other: Params) {
        self.positional.extend(other.positional);
        for (name, value) in other.named {
            self.named.insert(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name.strip_prefix(':').unwrap_or(name))
    }

    pub fn positional_values(&self) -> &[Value] {
        &self.positional
    }

    pub fn named_values(&self) -> &IndexMap<String, Value> {
        &self.named
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<Value>, IndexMap<String, Value>) {
        (self.positional, self.named)
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::positional(values)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Params {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs
            .into_iter()
            .fold(Params::new(), |params, (k, v)| params.bind(k, v))
    }
}

/// Values collected while compiling one statement, in placeholder order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamList {
    values: Vec<Value>,
}

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value and return its 1-based index.
    pub fn push(&mut self, value: Value) -> usize {
        self.values.push(value);
        self.values.len()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }
}

/// Resolves `?` / `:name` in raw fragments against one query's params.
///
/// A `:name` resolves to the same placeholder every time it appears within
/// one scope. Query-level positional values are consumed in render order
/// once a fragment's own values run out.
///
/// A sub-query's scope keeps the params of its enclosing queries: a name the
/// sub-query does not bind itself is looked up there, nearest first.
/// Positional values never cross scopes.
pub(crate) struct ParamScope<'a> {
    params: &'a Params,
    enclosing: Vec<&'a Params>,
    cursor: usize,
    slots: HashMap<String, usize>,
}

impl<'a> ParamScope<'a> {
    pub(crate) fn new(params: &'a Params) -> Self {
        Self::nested(params, Vec::new())
    }

    /// A scope whose `:name` lookups fall back to `enclosing`, nearest first.
    pub(crate) fn nested(params: &'a Params, enclosing: Vec<&'a Params>) -> Self {
        Self {
            params,
            enclosing,
            cursor: 0,
            slots: HashMap::new(),
        }
    }

    /// Params visible to a sub-query rendered inside this scope.
    pub(crate) fn chain(&self) -> Vec<&'a Params> {
        std::iter::once(self.params)
            .chain(self.enclosing.iter().copied())
            .collect()
    }

    fn lookup(&self, name: &str) -> Option<&'a Value> {
        std::iter::once(self.params)
            .chain(self.enclosing.iter().copied())
            .find_map(|p| p.named.get(name))
    }

    /// Rewrite a raw fragment, pushing referenced values onto `out`.
    ///
    /// `placeholder` renders the dialect's placeholder for a 1-based index.
    pub(crate) fn resolve(
        &mut self,
        sql: &str,
        local: &[Value],
        out: &mut ParamList,
        placeholder: &dyn Fn(usize) -> String,
    ) -> OrmResult<String> {
        let mut result = String::with_capacity(sql.len());
        let mut local_iter = local.iter();
        let mut chars = sql.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '\'' | '"' => {
                    // copy literals/quoted identifiers verbatim, doubled quote escapes included
                    result.push(ch);
                    while let Some(c) = chars.next() {
                        result.push(c);
                        if c == ch {
                            if chars.peek() == Some(&ch) {
                                if let Some(escaped) = chars.next() {
                                    result.push(escaped);
                                }
                            } else {
                                break;
                            }
                        }
                    }
                }
                '?' => {
                    let value = match local_iter.next() {
                        Some(v) => Some(v.clone()),
                        None => {
                            let v = self.params.positional.get(self.cursor).cloned();
                            if v.is_some() {
                                self.cursor += 1;
                            }
                            v
                        }
                    };
                    match value {
                        Some(v) => result.push_str(&placeholder(out.push(v))),
                        None => result.push('?'),
                    }
                }
                ':' => match chars.peek() {
                    Some(':') => {
                        chars.next();
                        result.push_str("::");
                    }
                    Some(&c) if c == '_' || c.is_ascii_alphabetic() => {
                        let mut name = String::new();
                        while let Some(&c) = chars.peek() {
                            if c == '_' || c.is_ascii_alphanumeric() {
                                name.push(c);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        let idx = match self.slots.get(&name) {
                            Some(idx) => *idx,
                            None => {
                                let value = self.lookup(&name).ok_or_else(|| {
                                    OrmError::build(format!(
                                        "no value bound for placeholder :{name}"
                                    ))
                                })?;
                                let idx = out.push(value.clone());
                                self.slots.insert(name, idx);
                                idx
                            }
                        };
                        result.push_str(&placeholder(idx));
                    }
                    _ => result.push(':'),
                },
                _ => result.push(ch),
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dollar(n: usize) -> String {
        format!("${n}")
    }

    #[test]
    fn merge_appends_positional_and_overwrites_named() {
        let mut params = Params::positional([1i64]).bind("a", 1i64).bind("b", 2i64);
        params.merge(Params::positional([2i64]).bind(":a", 10i64));
        assert_eq!(
            params.positional_values(),
            &[Value::BigInt(1), Value::BigInt(2)]
        );
        assert_eq!(params.get("a"), Some(&Value::BigInt(10)));
        assert_eq!(params.get(":b"), Some(&Value::BigInt(2)));
    }

    #[test]
    fn resolves_named_and_positional() {
        let params = Params::new().bind("status", "active");
        let mut scope = ParamScope::new(&params);
        let mut out = ParamList::new();
        let sql = scope
            .resolve(
                "status = :status AND age > ? AND alt = :status",
                &[Value::Int(18)],
                &mut out,
                &dollar,
            )
            .unwrap();
        assert_eq!(sql, "status = $1 AND age > $2 AND alt = $1");
        assert_eq!(out.into_vec(), vec![Value::from("active"), Value::Int(18)]);
    }

    #[test]
    fn leaves_literals_casts_and_surplus_markers_alone() {
        let params = Params::new();
        let mut scope = ParamScope::new(&params);
        let mut out = ParamList::new();
        let sql = scope
            .resolve("x::text = ':nope' AND data ? 'k'", &[], &mut out, &dollar)
            .unwrap();
        assert_eq!(sql, "x::text = ':nope' AND data ? 'k'");
        assert!(out.is_empty());
    }

    #[test]
    fn unbound_name_is_a_build_error() {
        let params = Params::new();
        let mut scope = ParamScope::new(&params);
        let err = scope
            .resolve("id = :id", &[], &mut ParamList::new(), &dollar)
            .unwrap_err();
        assert!(matches!(err, OrmError::Build(_)));
    }

    #[test]
    fn nested_scope_falls_back_to_enclosing_names() {
        let outer = Params::new().bind("v", 1).bind("w", 2);
        let inner = Params::positional([Value::Int(9)]).bind("w", 3);
        let root = ParamScope::new(&outer);
        let mut scope = ParamScope::nested(&inner, root.chain());
        let mut out = ParamList::new();
        let sql = scope
            .resolve("a = :v AND b = :w AND c = ?", &[], &mut out, &dollar)
            .unwrap();
        assert_eq!(sql, "a = $1 AND b = $2 AND c = $3");
        assert_eq!(
            out.into_vec(),
            vec![Value::Int(1), Value::Int(3), Value::Int(9)]
        );

        let err = scope
            .resolve("d = :missing", &[], &mut ParamList::new(), &dollar)
            .unwrap_err();
        assert!(matches!(err, OrmError::Build(_)));
    }

    #[test]
    fn query_positional_values_follow_local_ones() {
        let params = Params::positional([Value::Int(2)]);
        let mut scope = ParamScope::new(&params);
        let mut out = ParamList::new();
        let sql = scope
            .resolve("a = ? AND b = ?", &[Value::Int(1)], &mut out, &dollar)
            .unwrap();
        assert_eq!(sql, "a = $1 AND b = $2");
        assert_eq!(out.into_vec(), vec![Value::Int(1), Value::Int(2)]);
    }
}
