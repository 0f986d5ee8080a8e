//! Host-side entry points for calling operations on loaded units.
//!
//! Member lookup is by name plus the exact shapes of the arguments; there is
//! no conversion or widening. Host calls reach private operations.

use crate::errors::InvocationError;
use crate::loader::ExecutableUnit;
use crate::registry::InstanceRegistry;
use crate::value::{Instance, ObjectRef, Value};
use crate::vm::{dispatch, Access, ExecutionLimits, Interpreter};

/// Instantiate `unit` with default field values and call `member` on the new
/// instance.
pub fn invoke_unit(
    unit: &ExecutableUnit,
    member: &str,
    args: Vec<Value>,
) -> Result<Value, InvocationError> {
    invoke_unit_with(ExecutionLimits::default(), unit, member, args)
}

pub fn invoke_unit_with(
    limits: ExecutionLimits,
    unit: &ExecutableUnit,
    member: &str,
    args: Vec<Value>,
) -> Result<Value, InvocationError> {
    let target = ObjectRef::new(Instance::with_defaults(unit.clone()));
    invoke_with(limits, &target, member, args)
}

/// Call `member` on an existing object. Through an intercepted handle the
/// call runs the handle's hooks and only public operations are reachable.
pub fn invoke(target: &ObjectRef, member: &str, args: Vec<Value>) -> Result<Value, InvocationError> {
    invoke_with(ExecutionLimits::default(), target, member, args)
}

pub fn invoke_with(
    limits: ExecutionLimits,
    target: &ObjectRef,
    member: &str,
    args: Vec<Value>,
) -> Result<Value, InvocationError> {
    let mut interp = Interpreter::new(limits);
    dispatch(&mut interp, target, member, args, Access::Host)
}

/// Look up a published instance by name and call `member` on it.
pub fn invoke_named(
    registry: &dyn InstanceRegistry,
    name: &str,
    member: &str,
    args: Vec<Value>,
) -> Result<Value, InvocationError> {
    invoke_named_with(ExecutionLimits::default(), registry, name, member, args)
}

pub fn invoke_named_with(
    limits: ExecutionLimits,
    registry: &dyn InstanceRegistry,
    name: &str,
    member: &str,
    args: Vec<Value>,
) -> Result<Value, InvocationError> {
    let target = registry.get(name).ok_or_else(|| InvocationError::NotRegistered {
        name: name.to_string(),
    })?;
    invoke_with(limits, &target, member, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Loader;
    use crate::registry::SingletonRegistry;
    use crate::store::Artifact;
    use hotload_types::{Constant, FunctionImage, Op, Shape, UnitImage, Visibility};

    fn echo_unit() -> ExecutableUnit {
        let mut image = UnitImage::new("inv.Echo");
        image.functions = vec![
            FunctionImage {
                name: "echo".to_string(),
                visibility: Visibility::Public,
                params: vec![Shape::Str],
                returns: Some(Shape::Str),
                locals: 1,
                code: vec![Op::LoadLocal(0), Op::Return],
            },
            FunctionImage {
                name: "echo".to_string(),
                visibility: Visibility::Private,
                params: vec![Shape::Int],
                returns: Some(Shape::Int),
                locals: 1,
                code: vec![Op::LoadLocal(0), Op::Const(0), Op::Add, Op::Return],
            },
        ];
        image.constants = vec![Constant::Int(1)];
        let loader = Loader::new("inv");
        loader
            .define(Artifact::new("inv.Echo", image.encode().expect("encode")))
            .expect("define");
        loader.resolve("inv.Echo").expect("resolve")
    }

    #[test]
    fn test_exact_shape_selects_overload() {
        let unit = echo_unit();
        assert_eq!(
            invoke_unit(&unit, "echo", vec!["hi".into()]).expect("str"),
            Value::from("hi")
        );
        // Private overload is reachable from the host.
        assert_eq!(invoke_unit(&unit, "echo", vec![Value::Int(41)]).expect("int"), Value::Int(42));
    }

    #[test]
    fn test_no_conversion_between_shapes() {
        let unit = echo_unit();
        let err = invoke_unit(&unit, "echo", vec![Value::Bool(true)]).unwrap_err();
        match err {
            InvocationError::MemberNotFound { member, shapes, available, .. } => {
                assert_eq!(member, "echo");
                assert_eq!(shapes, vec![Shape::Bool]);
                assert_eq!(available.len(), 2);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_invoke_named() {
        let registry = SingletonRegistry::new();
        assert!(matches!(
            invoke_named(&registry, "echo", "echo", vec![]),
            Err(InvocationError::NotRegistered { .. })
        ));
        registry.register("echo", &echo_unit()).expect("register");
        assert_eq!(
            invoke_named(&registry, "echo", "echo", vec!["x".into()]).expect("call"),
            Value::from("x")
        );
    }
}
