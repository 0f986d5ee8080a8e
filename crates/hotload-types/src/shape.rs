//! Value shapes.
//!
//! A [`Shape`] is the runtime type of a value as far as dispatch is concerned.
//! Operations declare a shape per parameter, and invocation matches the shapes
//! of the supplied arguments against them exactly. There is no widening:
//! an `int` argument never matches a `str` parameter, and an instance of
//! `demo.Inner` never matches a parameter declared as `demo.Outer`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Shape {
    Nil,
    Int,
    Bool,
    Str,
    /// Instance of the unit with this qualified name.
    Unit(String),
}

impl Shape {
    /// Parse a type as written in unit source (`int`, `str`, `bool` or a
    /// qualified unit name). `nil` is not a declarable parameter type.
    pub fn parse(text: &str) -> Option<Shape> {
        match text {
            "int" => Some(Shape::Int),
            "str" => Some(Shape::Str),
            "bool" => Some(Shape::Bool),
            "nil" => None,
            other if crate::name::is_qualified_name(other) => Some(Shape::Unit(other.to_string())),
            _ => None,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Shape::Unit(_))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Nil => write!(f, "nil"),
            Shape::Int => write!(f, "int"),
            Shape::Bool => write!(f, "bool"),
            Shape::Str => write!(f, "str"),
            Shape::Unit(name) => write!(f, "{}", name),
        }
    }
}

/// Render a shape list the way signatures are printed: `(str, int)`.
pub fn format_shapes(shapes: &[Shape]) -> String {
    let parts: Vec<String> = shapes.iter().map(|s| s.to_string()).collect();
    format!("({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builtin_types() {
        assert_eq!(Shape::parse("int"), Some(Shape::Int));
        assert_eq!(Shape::parse("str"), Some(Shape::Str));
        assert_eq!(Shape::parse("bool"), Some(Shape::Bool));
    }

    #[test]
    fn test_parse_unit_type() {
        assert_eq!(
            Shape::parse("demo.Greeter"),
            Some(Shape::Unit("demo.Greeter".to_string()))
        );
        assert_eq!(Shape::parse("nil"), None);
        assert_eq!(Shape::parse("1abc"), None);
    }

    #[test]
    fn test_format_shapes() {
        assert_eq!(format_shapes(&[]), "()");
        assert_eq!(
            format_shapes(&[Shape::Str, Shape::Unit("a.B".to_string())]),
            "(str, a.B)"
        );
    }
}
