use crate::path::get_path;
use crate::store::StoreError;
use crate::value::{Document, Value};

/// A query filter: every condition must hold (implicit AND).
///
/// Mirrors the MongoDB filter subset the registry job and settings manager
/// use:
/// - `{ "package.name": "foo" }` → `Filter::new().eq("package.name", "foo")`
/// - `{ "package.name": { "$in": [..] } }` → `.is_in("package.name", ..)`
/// - `{ "manifest": { "$exists": false } }` → `.exists("manifest", false)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<FieldCondition>,
}

/// One condition bound to a dotted field path.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub path: String,
    pub condition: Condition,
}

/// Supported filter operators.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Value at the path equals the literal.
    Eq(Value),
    /// `true`: the path resolves to a value (null counts); `false`: it does not.
    Exists(bool),
    /// Value at the path equals one of the listed values.
    In(Vec<Value>),
}

impl Condition {
    fn holds(&self, resolved: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => resolved == Some(expected),
            Condition::Exists(should_exist) => resolved.is_some() == *should_exist,
            Condition::In(candidates) => match resolved {
                Some(value) => candidates.iter().any(|c| c == value),
                None => false,
            },
        }
    }
}

impl Filter {
    /// The empty filter, which matches every document.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(path, Condition::Eq(value.into()));
        self
    }

    pub fn exists(mut self, path: impl Into<String>, should_exist: bool) -> Self {
        self.push(path, Condition::Exists(should_exist));
        self
    }

    pub fn is_in<V: Into<Value>>(
        mut self,
        path: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push(path, Condition::In(values));
        self
    }

    fn push(&mut self, path: impl Into<String>, condition: Condition) {
        self.conditions.push(FieldCondition {
            path: path.into(),
            condition,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// True when every condition holds against `doc`.
    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions
            .iter()
            .all(|c| c.condition.holds(get_path(doc, &c.path)))
    }

    /// Top-level literal equalities, in filter order.
    ///
    /// These seed a document created by an upsert, so that the same filter
    /// finds it afterwards.
    pub fn equalities(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.conditions.iter().filter_map(|c| match &c.condition {
            Condition::Eq(value) => Some((c.path.as_str(), value)),
            _ => None,
        })
    }

    /// Conditions bound to exactly `path`.
    pub fn conditions_on<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Condition> {
        self.conditions
            .iter()
            .filter(move |c| c.path == path)
            .map(|c| &c.condition)
    }

    /// Parse a MongoDB-style filter object.
    ///
    /// An object whose keys all start with `$` is an operator object; an
    /// object with no `$` keys is a literal to compare for equality. Mixing
    /// the two, unknown operators, and wrongly typed operands are rejected.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let fields = match value {
            Value::Object(fields) => fields,
            Value::Null => return Ok(Self::new()),
            other => {
                return Err(StoreError::InvalidFilter(format!(
                    "filter must be an object, got {}",
                    other.type_name()
                )))
            }
        };

        let mut filter = Self::new();
        for (path, condition) in fields {
            if path.starts_with('$') {
                return Err(StoreError::InvalidFilter(format!(
                    "unsupported top-level operator `{}`",
                    path
                )));
            }
            match condition {
                Value::Object(ops) if is_operator_object(&ops) => {
                    for (op, operand) in ops {
                        let parsed = parse_operator(&path, &op, operand)?;
                        filter.push(path.clone(), parsed);
                    }
                }
                Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    return Err(StoreError::InvalidFilter(format!(
                        "field `{}` mixes operators and literal keys",
                        path
                    )));
                }
                literal => filter.push(path, Condition::Eq(literal)),
            }
        }
        Ok(filter)
    }
}

fn is_operator_object(ops: &Document) -> bool {
    !ops.is_empty() && ops.keys().all(|k| k.starts_with('$'))
}

fn parse_operator(path: &str, op: &str, operand: Value) -> Result<Condition, StoreError> {
    match (op, operand) {
        ("$exists", Value::Bool(b)) => Ok(Condition::Exists(b)),
        ("$exists", other) => Err(StoreError::InvalidFilter(format!(
            "`$exists` on `{}` expects a bool, got {}",
            path,
            other.type_name()
        ))),
        ("$in", Value::Array(values)) => Ok(Condition::In(values)),
        ("$in", other) => Err(StoreError::InvalidFilter(format!(
            "`$in` on `{}` expects an array, got {}",
            path,
            other.type_name()
        ))),
        (unknown, _) => Err(StoreError::InvalidFilter(format!(
            "unsupported operator `{}` on `{}`",
            unknown, path
        ))),
    }
}

impl TryFrom<serde_json::Value> for Filter {
    type Error = StoreError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        Filter::from_value(Value::from(value))
    }
}
