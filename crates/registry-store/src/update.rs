use crate::path::{get_path, set_path};
use crate::store::StoreError;
use crate::value::{Document, Value};

/// One update operator bound to a dotted field path.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// `$set`: replace the value at the path.
    Set(String, Value),
    /// `$inc`: add a numeric delta; a missing or non-numeric base counts as 0.
    /// A non-numeric delta leaves the document untouched.
    Inc(String, Value),
}

/// A set of update operators applied to a single document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(path.into(), value.into()));
        self
    }

    pub fn inc(mut self, path: impl Into<String>, delta: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Inc(path.into(), delta.into()));
        self
    }

    /// `$set` every top-level field of `doc`.
    pub fn set_document(doc: Document) -> Self {
        Self {
            ops: doc
                .into_iter()
                .map(|(path, value)| UpdateOp::Set(path, value))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn has_inc(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, UpdateOp::Inc(..)))
    }

    /// Apply every `$inc`, then every `$set`, each group in declaration order.
    pub fn apply(&self, doc: &mut Document) {
        for op in &self.ops {
            if let UpdateOp::Inc(path, delta) = op {
                if !delta.is_number() {
                    tracing::debug!(path = %path, delta = delta.type_name(), "skipping non-numeric $inc");
                    continue;
                }
                let next = add_numbers(get_path(doc, path), delta);
                set_path(doc, path, next);
            }
        }
        for op in &self.ops {
            if let UpdateOp::Set(path, value) = op {
                set_path(doc, path, value.clone());
            }
        }
    }

    /// Parse a MongoDB-style update object with `$set` and/or `$inc`.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let operators = match value {
            Value::Object(operators) => operators,
            other => {
                return Err(StoreError::InvalidUpdate(format!(
                    "update must be an object, got {}",
                    other.type_name()
                )))
            }
        };

        let mut update = Self::new();
        for (op, fields) in operators {
            let fields = match fields {
                Value::Object(fields) => fields,
                other => {
                    return Err(StoreError::InvalidUpdate(format!(
                        "`{}` expects an object, got {}",
                        op,
                        other.type_name()
                    )))
                }
            };
            match op.as_str() {
                "$set" => {
                    for (path, value) in fields {
                        update.ops.push(UpdateOp::Set(path, value));
                    }
                }
                "$inc" => {
                    for (path, delta) in fields {
                        if !delta.is_number() {
                            return Err(StoreError::InvalidUpdate(format!(
                                "`$inc` on `{}` expects a number, got {}",
                                path,
                                delta.type_name()
                            )));
                        }
                        update.ops.push(UpdateOp::Inc(path, delta));
                    }
                }
                unknown => {
                    return Err(StoreError::InvalidUpdate(format!(
                        "unsupported update operator `{}`",
                        unknown
                    )))
                }
            }
        }
        Ok(update)
    }
}

impl TryFrom<serde_json::Value> for Update {
    type Error = StoreError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        Update::from_value(Value::from(value))
    }
}

/// `base + delta`, staying integral while both sides are and the sum fits.
fn add_numbers(base: Option<&Value>, delta: &Value) -> Value {
    let base = base.filter(|v| v.is_number()).cloned().unwrap_or(Value::Int(0));
    match (&base, delta) {
        (Value::Int(a), Value::Int(b)) => match a.checked_add(*b) {
            Some(sum) => Value::Int(sum),
            None => Value::Float(*a as f64 + *b as f64),
        },
        _ => Value::Float(base.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0)),
    }
}
