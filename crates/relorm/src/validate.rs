//! Scenario-aware attribute validation.
//!
//! Rules are attached to a [`ModelDef`](crate::ModelDef) and run by record
//! writes before any SQL is issued. A failing rule never becomes an
//! [`OrmError`](crate::OrmError); the write returns a failure value and the
//! messages are kept on the record.

use crate::value::Value;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A machine-friendly validation code.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationCode {
    Required,
    Len,
    Range,
    Email,
    Regex,
    Url,
    Uuid,
    OneOf,
    Custom(String),
}

impl ValidationCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Required => "required",
            Self::Len => "len",
            Self::Range => "range",
            Self::Email => "email",
            Self::Regex => "regex",
            Self::Url => "url",
            Self::Uuid => "uuid",
            Self::OneOf => "one_of",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl Serialize for ValidationCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// A single attribute validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub code: ValidationCode,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A collection of validation errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub items: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn push(&mut self, err: ValidationError) {
        self.items.push(err);
    }

    pub fn extend(&mut self, other: Self) {
        self.items.extend(other.items);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.items.iter()
    }

    /// Errors reported for one attribute.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a ValidationError> {
        self.items.iter().filter(move |e| e.field == field)
    }
}

type CustomCheck = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// A single check applied to an attribute value.
#[derive(Clone)]
pub enum Rule {
    /// Value must be present and not NULL / blank.
    Required,
    /// Text length in characters.
    Length { min: Option<usize>, max: Option<usize> },
    /// Numeric range, inclusive.
    Range { min: Option<f64>, max: Option<f64> },
    #[cfg(feature = "validate")]
    Email,
    #[cfg(feature = "validate")]
    Url,
    #[cfg(feature = "validate")]
    Regex(regex::Regex),
    Uuid,
    OneOf(Vec<Value>),
    Custom { code: String, check: CustomCheck },
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Required => f.write_str("Required"),
            Rule::Length { min, max } => f
                .debug_struct("Length")
                .field("min", min)
                .field("max", max)
                .finish(),
            Rule::Range { min, max } => f
                .debug_struct("Range")
                .field("min", min)
                .field("max", max)
                .finish(),
            #[cfg(feature = "validate")]
            Rule::Email => f.write_str("Email"),
            #[cfg(feature = "validate")]
            Rule::Url => f.write_str("Url"),
            #[cfg(feature = "validate")]
            Rule::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            Rule::Uuid => f.write_str("Uuid"),
            Rule::OneOf(values) => f.debug_tuple("OneOf").field(values).finish(),
            Rule::Custom { code, .. } => f.debug_struct("Custom").field("code", code).finish(),
        }
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Text(s)) => s.trim().is_empty(),
        _ => false,
    }
}

impl Rule {
    pub fn custom(
        code: impl Into<String>,
        check: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Rule::Custom {
            code: code.into(),
            check: Arc::new(check),
        }
    }

    /// Check one value. Blank values only fail [`Rule::Required`].
    fn check(&self, field: &str, value: Option<&Value>) -> Option<ValidationError> {
        if let Rule::Required = self {
            return is_blank(value).then(|| {
                ValidationError::new(field, ValidationCode::Required, format!("{field} cannot be blank"))
            });
        }
        let value = match value {
            Some(v) if !is_blank(Some(v)) => v,
            _ => return None,
        };

        match self {
            Rule::Required => None,
            Rule::Length { min, max } => {
                let len = match value {
                    Value::Text(s) => s.chars().count(),
                    other => other.to_key_string().chars().count(),
                };
                let too_short = min.is_some_and(|m| len < m);
                let too_long = max.is_some_and(|m| len > m);
                (too_short || too_long).then(|| {
                    let mut err = ValidationError::new(
                        field,
                        ValidationCode::Len,
                        format!("{field} has an invalid length"),
                    );
                    if let Some(m) = min {
                        err = err.with_metadata("min", *m);
                    }
                    if let Some(m) = max {
                        err = err.with_metadata("max", *m);
                    }
                    err
                })
            }
            Rule::Range { min, max } => match value.as_f64() {
                None => Some(ValidationError::new(
                    field,
                    ValidationCode::Range,
                    format!("{field} must be a number"),
                )),
                Some(n) => (min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m)).then(|| {
                    ValidationError::new(field, ValidationCode::Range, format!("{field} is out of range"))
                }),
            },
            #[cfg(feature = "validate")]
            Rule::Email => (!value.as_str().is_some_and(is_email)).then(|| {
                ValidationError::new(field, ValidationCode::Email, format!("{field} is not a valid email address"))
            }),
            #[cfg(feature = "validate")]
            Rule::Url => (!value.as_str().is_some_and(is_url)).then(|| {
                ValidationError::new(field, ValidationCode::Url, format!("{field} is not a valid URL"))
            }),
            #[cfg(feature = "validate")]
            Rule::Regex(re) => (!value.as_str().is_some_and(|s| re.is_match(s))).then(|| {
                ValidationError::new(field, ValidationCode::Regex, format!("{field} is invalid"))
                    .with_metadata("pattern", re.as_str())
            }),
            Rule::Uuid => {
                let ok = match value {
                    Value::Uuid(_) => true,
                    Value::Text(s) => is_uuid(s),
                    _ => false,
                };
                (!ok).then(|| {
                    ValidationError::new(field, ValidationCode::Uuid, format!("{field} is not a valid UUID"))
                })
            }
            Rule::OneOf(allowed) => (!allowed.contains(value)).then(|| {
                ValidationError::new(field, ValidationCode::OneOf, format!("{field} is invalid"))
            }),
            Rule::Custom { code, check } => check(value).err().map(|message| {
                ValidationError::new(field, ValidationCode::Custom(code.clone()), message)
            }),
        }
    }
}

/// A rule bound to attributes and, optionally, to scenarios.
#[derive(Debug, Clone)]
pub struct AttributeRule {
    pub attributes: Vec<String>,
    pub rule: Rule,
    /// Scenarios the rule applies to; empty means every scenario.
    pub scenarios: Vec<String>,
    /// Replaces the rule's default message.
    pub message: Option<String>,
}

impl AttributeRule {
    pub fn new<S: Into<String>>(attributes: impl IntoIterator<Item = S>, rule: Rule) -> Self {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
            rule,
            scenarios: Vec::new(),
            message: None,
        }
    }

    pub fn on<S: Into<String>>(mut self, scenarios: impl IntoIterator<Item = S>) -> Self {
        self.scenarios = scenarios.into_iter().map(Into::into).collect();
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn applies_to(&self, scenario: &str) -> bool {
        self.scenarios.is_empty() || self.scenarios.iter().any(|s| s == scenario)
    }
}

/// Run `rules` for `scenario` over `attributes`.
///
/// When `only` is given, attributes outside it are skipped.
pub fn validate_attributes(
    rules: &[AttributeRule],
    scenario: &str,
    attributes: &IndexMap<String, Value>,
    only: Option<&[String]>,
) -> ValidationErrors {
    let mut errors = ValidationErrors::default();
    for rule in rules.iter().filter(|r| r.applies_to(scenario)) {
        for field in &rule.attributes {
            if only.is_some_and(|names| !names.contains(field)) {
                continue;
            }
            if let Some(mut err) = rule.rule.check(field, attributes.get(field)) {
                if let Some(message) = &rule.message {
                    err.message = message.clone();
                }
                errors.push(err);
            }
        }
    }
    errors
}

/// Best-effort email validation.
#[cfg(feature = "validate")]
pub fn is_email(s: &str) -> bool {
    use std::sync::OnceLock;
    static EMAIL_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    EMAIL_RE
        .get_or_init(|| regex::Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(s))
}

#[cfg(feature = "validate")]
pub fn is_url(s: &str) -> bool {
    url::Url::parse(s).is_ok()
}

pub fn is_uuid(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn required_and_length() {
        let rules = vec![
            AttributeRule::new(["name"], Rule::Required),
            AttributeRule::new(["name"], Rule::Length { min: Some(2), max: Some(5) }),
        ];
        let errs = validate_attributes(&rules, "default", &attrs(&[]), None);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs.items[0].code, ValidationCode::Required);

        let errs = validate_attributes(&rules, "default", &attrs(&[("name", "toolong".into())]), None);
        assert_eq!(errs.items[0].code, ValidationCode::Len);
        assert_eq!(errs.items[0].metadata["max"], serde_json::json!(5));
    }

    #[test]
    fn scenario_and_only_filters() {
        let rules = vec![AttributeRule::new(["email"], Rule::Required).on(["signup"])];
        let empty = attrs(&[]);
        assert!(validate_attributes(&rules, "default", &empty, None).is_empty());
        assert_eq!(validate_attributes(&rules, "signup", &empty, None).len(), 1);
        let only = vec!["name".to_string()];
        assert!(validate_attributes(&rules, "signup", &empty, Some(&only)).is_empty());
    }

    #[test]
    fn range_one_of_and_custom() {
        let rules = vec![
            AttributeRule::new(["age"], Rule::Range { min: Some(0.0), max: Some(150.0) }),
            AttributeRule::new(["role"], Rule::OneOf(vec!["admin".into(), "user".into()])),
            AttributeRule::new(
                ["code"],
                Rule::custom("even", |v| match v.as_i64() {
                    Some(n) if n % 2 == 0 => Ok(()),
                    _ => Err("code must be even".to_string()),
                }),
            )
            .message("bad code"),
        ];
        let values = attrs(&[
            ("age", Value::Int(200)),
            ("role", "root".into()),
            ("code", Value::Int(3)),
        ]);
        let errs = validate_attributes(&rules, "default", &values, None);
        let codes: Vec<_> = errs.iter().map(|e| e.code.as_str().to_string()).collect();
        assert_eq!(codes, ["range", "one_of", "even"]);
        assert_eq!(errs.for_field("code").next().unwrap().message, "bad code");
    }

    #[cfg(feature = "validate")]
    #[test]
    fn email_url_regex() {
        assert!(is_email("a@b.io"));
        assert!(!is_email("nope"));
        assert!(is_url("https://example.com/x"));
        let re = regex::Regex::new("^[a-z]+$").unwrap();
        let rules = vec![AttributeRule::new(["slug"], Rule::Regex(re))];
        let errs = validate_attributes(&rules, "default", &attrs(&[("slug", "Bad Slug".into())]), None);
        assert_eq!(errs.items[0].code, ValidationCode::Regex);
    }

    #[test]
    fn errors_serialize_with_string_codes() {
        let err = ValidationError::new("name", ValidationCode::Required, "name cannot be blank");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "required");
        assert!(json.get("metadata").is_none());
    }
}
