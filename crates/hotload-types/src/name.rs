//! Qualified name utilities.
//!
//! A qualified name is a dotted identifier such as `demo.Greeter` or
//! `demo.Greeter.User` (a unit nested inside `demo.Greeter`). Every segment
//! must start with a letter or `_` and continue with letters, digits or `_`.

/// Check whether `name` is a single identifier segment.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check whether `name` is a well-formed dotted qualified name.
pub fn is_qualified_name(name: &str) -> bool {
    !name.is_empty() && name.split('.').all(is_identifier)
}

/// Last segment of a qualified name (`demo.Greeter.User` -> `User`).
pub fn simple_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Everything before the last segment, if any (`demo.Greeter` -> `demo`).
pub fn namespace(name: &str) -> Option<&str> {
    name.rfind('.').map(|idx| &name[..idx])
}

/// Qualify a nested unit name with its enclosing unit.
pub fn nested_name(outer: &str, inner: &str) -> String {
    format!("{}.{}", outer, inner)
}

/// Derive the published instance name for a unit: the simple name with its
/// first character lower-cased (`demo.GreeterService` -> `greeterService`).
pub fn bean_name(qualified: &str) -> String {
    let simple = simple_name(qualified);
    let mut chars = simple.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_names() {
        assert!(is_qualified_name("demo.Greeter"));
        assert!(is_qualified_name("Greeter"));
        assert!(is_qualified_name("a_b.c1.D"));
        assert!(!is_qualified_name(""));
        assert!(!is_qualified_name("demo..Greeter"));
        assert!(!is_qualified_name(".demo"));
        assert!(!is_qualified_name("demo.1x"));
        assert!(!is_qualified_name("demo-x.Y"));
    }

    #[test]
    fn test_name_parts() {
        assert_eq!(simple_name("demo.Greeter.User"), "User");
        assert_eq!(simple_name("Greeter"), "Greeter");
        assert_eq!(namespace("demo.Greeter"), Some("demo"));
        assert_eq!(namespace("Greeter"), None);
        assert_eq!(nested_name("demo.Greeter", "User"), "demo.Greeter.User");
    }

    #[test]
    fn test_bean_name() {
        assert_eq!(bean_name("demo.GreeterService"), "greeterService");
        assert_eq!(bean_name("X"), "x");
        assert_eq!(bean_name("demo.already"), "already");
    }
}
