//! Runtime values and instances.

use std::fmt;
use std::sync::Arc;

use hotload_types::name::simple_name;
use hotload_types::{Constant, Shape};
use parking_lot::Mutex;

use crate::errors::{Fault, FaultKind};
use crate::intercept::InterceptedObject;
use crate::loader::ExecutableUnit;

/// Nested objects deeper than this render as `Name{..}`.
const DISPLAY_DEPTH: usize = 4;

#[derive(Clone)]
pub enum Value {
    Nil,
    Int(i64),
    Bool(bool),
    Str(String),
    Object(ObjectRef),
}

impl Value {
    pub fn from_constant(constant: &Constant) -> Self {
        match constant {
            Constant::Nil => Value::Nil,
            Constant::Int(v) => Value::Int(*v),
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Str(s) => Value::Str(s.clone()),
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Value::Nil => Shape::Nil,
            Value::Int(_) => Shape::Int,
            Value::Bool(_) => Shape::Bool,
            Value::Str(_) => Shape::Str,
            Value::Object(o) => o.shape(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Whether this value may be stored where `shape` is declared. Unit-typed
    /// slots also accept nil.
    pub fn fits(&self, shape: &Shape) -> bool {
        match (self, shape) {
            (Value::Nil, Shape::Unit(_)) => true,
            (v, s) => &v.shape() == s,
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{}", s),
            Value::Object(o) => o.instance().render(f, depth),
        }
    }
}

impl PartialEq for Value {
    /// Objects compare by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}

// =============================================================================
// Instances
// =============================================================================

/// One live object: a unit plus its field values.
pub struct Instance {
    unit: ExecutableUnit,
    fields: Mutex<Vec<Value>>,
}

impl Instance {
    /// Instantiate with every field at its declared default.
    pub fn with_defaults(unit: ExecutableUnit) -> Arc<Instance> {
        let fields = unit
            .code()
            .image()
            .fields
            .iter()
            .map(|f| Value::from_constant(&f.default))
            .collect();
        Arc::new(Instance {
            unit,
            fields: Mutex::new(fields),
        })
    }

    /// Instantiate from positional values over all declared fields. An empty
    /// argument list means defaults.
    pub fn construct(unit: ExecutableUnit, args: Vec<Value>) -> Result<Arc<Instance>, Fault> {
        if args.is_empty() {
            return Ok(Self::with_defaults(unit));
        }
        let declared = &unit.code().image().fields;
        if declared.len() != args.len() {
            return Err(Fault::new(
                FaultKind::TypeMismatch,
                format!(
                    "{} has {} field(s) but {} value(s) were given",
                    unit.name(),
                    declared.len(),
                    args.len()
                ),
            ));
        }
        for (field, value) in declared.iter().zip(&args) {
            if !value.fits(&field.shape) {
                return Err(Fault::new(
                    FaultKind::TypeMismatch,
                    format!(
                        "field {}.{} is {} but got {}",
                        unit.name(),
                        field.name,
                        field.shape,
                        value.shape()
                    ),
                ));
            }
        }
        Ok(Arc::new(Instance {
            unit,
            fields: Mutex::new(args),
        }))
    }

    pub fn unit(&self) -> &ExecutableUnit {
        &self.unit
    }

    pub fn get_field(&self, name: &str) -> Result<Value, Fault> {
        let idx = self.field_slot(name)?;
        Ok(self.fields.lock()[idx].clone())
    }

    pub fn set_field(&self, name: &str, value: Value) -> Result<(), Fault> {
        let idx = self.field_slot(name)?;
        let declared = &self.unit.code().image().fields[idx].shape;
        if !value.fits(declared) {
            return Err(Fault::new(
                FaultKind::TypeMismatch,
                format!(
                    "field {}.{} is {} but got {}",
                    self.unit.name(),
                    name,
                    declared,
                    value.shape()
                ),
            ));
        }
        self.fields.lock()[idx] = value;
        Ok(())
    }

    fn field_slot(&self, name: &str) -> Result<usize, Fault> {
        self.unit.code().field_index(name).ok_or_else(|| {
            Fault::new(
                FaultKind::BadField,
                format!("{} has no field '{}'", self.unit.name(), name),
            )
        })
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let name = simple_name(self.unit.name());
        if depth >= DISPLAY_DEPTH {
            return write!(f, "{}{{..}}", name);
        }
        // Snapshot so that rendering a self-referencing object never re-locks.
        let values = self.fields.lock().clone();
        write!(f, "{}(", name)?;
        for (i, (field, value)) in self.unit.code().image().fields.iter().zip(&values).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=", field.name)?;
            value.render(f, depth + 1)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

// =============================================================================
// Object handles
// =============================================================================

/// Handle to an object: either the instance itself or an intercepting proxy
/// in front of another handle. Both present the target unit's shape.
#[derive(Clone)]
pub enum ObjectRef {
    Plain(Arc<Instance>),
    Intercepted(Arc<InterceptedObject>),
}

impl ObjectRef {
    pub fn new(instance: Arc<Instance>) -> Self {
        ObjectRef::Plain(instance)
    }

    /// The instance at the end of any proxy chain.
    pub fn instance(&self) -> &Arc<Instance> {
        match self {
            ObjectRef::Plain(instance) => instance,
            ObjectRef::Intercepted(proxy) => proxy.target().instance(),
        }
    }

    pub fn unit(&self) -> &ExecutableUnit {
        self.instance().unit()
    }

    pub fn shape(&self) -> Shape {
        self.unit().shape()
    }

    pub fn is_intercepted(&self) -> bool {
        matches!(self, ObjectRef::Intercepted(_))
    }

    /// Same handle. A proxy and its target are different handles.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        match (self, other) {
            (ObjectRef::Plain(a), ObjectRef::Plain(b)) => Arc::ptr_eq(a, b),
            (ObjectRef::Intercepted(a), ObjectRef::Intercepted(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn get_field(&self, name: &str) -> Result<Value, Fault> {
        self.instance().get_field(name)
    }

    pub fn set_field(&self, name: &str, value: Value) -> Result<(), Fault> {
        self.instance().set_field(name, value)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.instance().render(f, 0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Plain(_) => write!(f, "Plain({})", self),
            ObjectRef::Intercepted(_) => write!(f, "Intercepted({})", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Loader;
    use crate::store::Artifact;
    use hotload_types::{FieldImage, UnitImage};

    fn user_unit() -> ExecutableUnit {
        let mut image = UnitImage::new("demo.Test.User");
        image.fields.push(FieldImage {
            name: "name".to_string(),
            shape: Shape::Str,
            default: Constant::Str("nobody".to_string()),
        });
        image.fields.push(FieldImage {
            name: "friend".to_string(),
            shape: Shape::Unit("demo.Test.User".to_string()),
            default: Constant::Nil,
        });
        let loader = Loader::new("test");
        loader
            .define(Artifact::new("demo.Test.User", image.encode().expect("encode")))
            .expect("define");
        loader.resolve("demo.Test.User").expect("resolve")
    }

    #[test]
    fn test_defaults_and_display() {
        let user = Instance::with_defaults(user_unit());
        assert_eq!(user.to_string(), "User(name=nobody, friend=nil)");
    }

    #[test]
    fn test_construct_positional() {
        let user = Instance::construct(user_unit(), vec!["world".into(), Value::Nil]).expect("construct");
        assert_eq!(user.get_field("name").expect("field"), Value::from("world"));
    }

    #[test]
    fn test_construct_checks_arity_and_shape() {
        let err = Instance::construct(user_unit(), vec!["x".into()]).map(|_| ()).unwrap_err();
        assert_eq!(err.kind, FaultKind::TypeMismatch);
        let err = Instance::construct(user_unit(), vec![Value::Int(1), Value::Nil])
            .map(|_| ())
            .unwrap_err();
        assert!(err.message.contains("is str but got int"));
    }

    #[test]
    fn test_self_reference_renders_bounded() {
        let user = Instance::with_defaults(user_unit());
        let handle = ObjectRef::new(user.clone());
        user.set_field("friend", Value::Object(handle.clone())).expect("set");
        let text = handle.to_string();
        assert!(text.starts_with("User(name=nobody, friend=User("));
        assert!(text.contains("User{..}"));
    }

    #[test]
    fn test_object_equality_is_identity() {
        let unit = user_unit();
        let a = ObjectRef::new(Instance::with_defaults(unit.clone()));
        let b = ObjectRef::new(Instance::with_defaults(unit));
        assert_eq!(Value::Object(a.clone()), Value::Object(a.clone()));
        assert_ne!(Value::Object(a), Value::Object(b));
    }

    #[test]
    fn test_unknown_field() {
        let user = Instance::with_defaults(user_unit());
        assert_eq!(user.get_field("age").map(|_| ()).unwrap_err().kind, FaultKind::BadField);
    }
}
