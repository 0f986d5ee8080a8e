//! Unit sources shared by the integration tests.

pub const GREETER: &str = r#"
unit demo.Greeter {
    field greeting: str = "Hello,";

    fn greet(name: str) -> str {
        return self.greeting + name + "!";
    }
}
"#;

/// A top-level unit with a nested one.
pub const TEST_CLASS: &str = r#"
unit demo.TestClass {
    fn user(name: str) -> User {
        return new User(name);
    }

    fn describe(name: str) -> str {
        return str(self.user(name));
    }

    unit User {
        field name: str;
    }
}
"#;

pub const FAILING: &str = r#"
unit demo.Failing {
    fn ok() -> str { return "fine"; }
    fn explode() { fail("kaboom"); }
}
"#;

/// A private operation next to a public one that calls it, and a second
/// unit that tries to call it from outside.
pub const SECRETIVE: &str = r#"
unit demo.Secretive {
    private fn secret() -> str { return "hidden"; }
    fn reveal() -> str { return "revealed " + self.secret(); }
}

unit demo.Spy {
    fn peek() -> str { return new demo.Secretive().secret(); }
}
"#;

pub const LIBRARY_UTIL: &str = r#"
unit lib.Util {
    fn twice(x: int) -> int { return x * 2; }
}
"#;

pub const LIBRARY_USER: &str = r#"
unit app.Main {
    fn run(x: int) -> int { return new lib.Util().twice(x) + 1; }
}
"#;

/// Counter whose `bump` mutates a field.
pub const COUNTER: &str = r#"
unit demo.Counter {
    field count: int;

    fn bump() -> int {
        count = count + 1;
        return count;
    }
}
"#;

pub fn greeting_service(version: &str) -> String {
    format!(
        "unit demo.GreetingService {{ fn greet(name: str) -> str {{ return \"{}: \" + name; }} }}",
        version
    )
}
