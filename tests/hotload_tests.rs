//! End-to-end tests through the `hotload` facade.
//!
//! Test coverage areas:
//! - Compile, load and call round trips
//! - Nested units and object rendering
//! - Interception ordering and visibility through proxies
//! - Publishing and replacing named instances
//! - Archives on the library path
//! - Concurrent access to a shared engine

mod common;

use std::sync::Arc;
use std::thread;

use hotload::{
    invoke, proxy, proxy_chain, proxy_timed, write_archive, CompilationUnit, Engine,
    EngineConfig, EventLog, FaultKind, HookEvent, InstanceRegistry, InvocationError,
    RecordingInterceptor, ScriptEngineExt, Shape, SingletonRegistry, Value,
};

use common::fixtures::{
    greeting_service, COUNTER, FAILING, GREETER, LIBRARY_USER, LIBRARY_UTIL, SECRETIVE,
    TEST_CLASS,
};
use common::{assert_error_contains, assert_ok, engine};

// =============================================================================
// Round trips
// =============================================================================

mod round_trip_tests {
    use super::*;

    /// Test that a freshly compiled unit is immediately callable.
    #[test]
    fn test_greet_round_trip() {
        let engine = engine();
        let unit = assert_ok(engine.compile_once(GREETER, "demo.Greeter"), "compile greeter");
        let greeting = assert_ok(
            engine.invoke_unit(&unit, "greet", vec!["world".into()]),
            "invoke greet",
        );
        assert_eq!(greeting, Value::from("Hello,world!"));
    }

    /// Test that the trait constructor wires the script compiler.
    #[test]
    fn test_with_script_compiler() {
        let engine = Engine::with_script_compiler(EngineConfig::default());
        assert_ok(engine.compile_shared(GREETER, "demo.Greeter"), "compile shared");
        let unit = assert_ok(engine.load("demo.Greeter"), "load");
        assert_eq!(unit.name(), "demo.Greeter");
    }

    /// Test that field writes persist on the instance they were made on.
    #[test]
    fn test_instance_state_persists_between_calls() {
        let engine = engine();
        let registry = SingletonRegistry::new();
        let name = assert_ok(engine.deploy(COUNTER, "demo.Counter", &registry), "deploy");
        assert_eq!(name, "counter");
        for expected in 1..=3 {
            let count = assert_ok(
                engine.invoke_named(&registry, "counter", "bump", vec![]),
                "bump",
            );
            assert_eq!(count, Value::Int(expected));
        }
    }

    /// Test that arguments are matched by exact shape.
    #[test]
    fn test_exact_shape_matching() {
        let engine = engine();
        let unit = assert_ok(engine.compile_once(GREETER, "demo.Greeter"), "compile");
        let err = engine.invoke_unit(&unit, "greet", vec![Value::Int(1)]).unwrap_err();
        match &err {
            InvocationError::MemberNotFound { member, shapes, available, .. } => {
                assert_eq!(member, "greet");
                assert_eq!(shapes, &vec![Shape::Int]);
                assert!(available.iter().any(|s| s.contains("greet(str)")), "{:?}", available);
            }
            other => panic!("expected MemberNotFound, got {:?}", other),
        }
        assert_error_contains(&err, "greet(int)");
    }
}

// =============================================================================
// Nested units
// =============================================================================

mod nested_unit_tests {
    use super::*;

    /// Test that nested units become their own artifacts and are linked
    /// through the defining loader.
    #[test]
    fn test_nested_unit_is_linked_and_rendered() {
        let engine = engine();
        let set = assert_ok(
            engine.compile(&CompilationUnit::new("demo.TestClass", TEST_CLASS)),
            "compile",
        );
        assert_eq!(set.names(), vec!["demo.TestClass", "demo.TestClass.User"]);

        let unit = assert_ok(engine.compile_once(TEST_CLASS, "demo.TestClass"), "compile once");
        let user = assert_ok(engine.invoke_unit(&unit, "user", vec!["world".into()]), "user");
        assert_eq!(user.to_string(), "User(name=world)");
        assert_eq!(user.shape(), Shape::Unit("demo.TestClass.User".to_string()));

        let described = assert_ok(
            engine.invoke_unit(&unit, "describe", vec!["world".into()]),
            "describe",
        );
        assert_eq!(described, Value::from("User(name=world)"));
    }

    /// Test that the nested unit is resolvable by its qualified name.
    #[test]
    fn test_nested_unit_resolvable_by_name() {
        let engine = engine();
        assert_ok(engine.compile_shared(TEST_CLASS, "demo.TestClass"), "compile shared");
        let inner = assert_ok(engine.load("demo.TestClass.User"), "load inner");
        assert_eq!(inner.name(), "demo.TestClass.User");
    }
}

// =============================================================================
// Interception
// =============================================================================

mod interception_tests {
    use super::*;

    fn failing_object(engine: &Engine) -> hotload::ObjectRef {
        let registry = SingletonRegistry::new();
        assert_ok(engine.deploy(FAILING, "demo.Failing", &registry), "deploy");
        registry.get("failing").expect("published")
    }

    /// Test that hooks see a failure in reverse order and the error reaches
    /// the caller unchanged.
    #[test]
    fn test_on_error_order_and_error_unchanged() {
        let engine = engine();
        let target = failing_object(&engine);
        let log = EventLog::new();
        let proxied = proxy_chain(
            &target,
            vec![
                Box::new(RecordingInterceptor::new("outer", &log)),
                Box::new(RecordingInterceptor::new("inner", &log)),
            ],
        );

        let direct = engine.invoke(&target, "explode", vec![]).unwrap_err();
        let through_proxy = engine.invoke(&proxied, "explode", vec![]).unwrap_err();
        assert_eq!(through_proxy, direct);
        assert_eq!(
            through_proxy.fault().map(|f| (f.kind, f.message.as_str())),
            Some((FaultKind::Raised, "kaboom"))
        );

        let hooks: Vec<_> = log
            .events()
            .into_iter()
            .map(|e| match e {
                HookEvent::Before { hook, .. } => format!("before:{}", hook),
                HookEvent::After { hook, .. } => format!("after:{}", hook),
                HookEvent::OnError { hook, .. } => format!("error:{}", hook),
            })
            .collect();
        assert_eq!(
            hooks,
            vec!["before:outer", "before:inner", "error:inner", "error:outer"]
        );
    }

    /// Test that a proxy passes results through unchanged.
    #[test]
    fn test_proxy_passes_results_through() {
        let engine = engine();
        let target = failing_object(&engine);
        let timed = proxy_timed(&target);
        assert!(timed.is_intercepted());
        assert_eq!(
            assert_ok(invoke(&timed, "ok", vec![]), "ok through proxy"),
            Value::from("fine")
        );
        assert!(timed.ptr_eq(&timed.clone()));
        assert_eq!(timed.shape(), target.shape());
    }

    /// Test that private operations are reachable from the host and from
    /// their own unit, but not through a proxy or from another unit.
    #[test]
    fn test_private_operation_visibility() {
        let engine = engine();
        assert_ok(engine.compile_shared(SECRETIVE, "demo.Secretive"), "compile shared");
        let secretive = assert_ok(engine.load("demo.Secretive"), "load");

        assert_eq!(
            assert_ok(engine.invoke_unit(&secretive, "secret", vec![]), "host call"),
            Value::from("hidden")
        );
        assert_eq!(
            assert_ok(engine.invoke_unit(&secretive, "reveal", vec![]), "own unit"),
            Value::from("revealed hidden")
        );

        let log = EventLog::new();
        let registry = SingletonRegistry::new();
        let object = assert_ok(registry.register("secretive", &secretive), "register");
        let proxied = proxy(&object, Box::new(RecordingInterceptor::new("audit", &log)));
        assert!(matches!(
            engine.invoke(&proxied, "secret", vec![]),
            Err(InvocationError::MemberNotFound { .. })
        ));
        assert!(log.events().is_empty(), "no hook runs for a rejected call");

        let spy = assert_ok(engine.load("demo.Spy"), "load spy");
        let err = engine.invoke_unit(&spy, "peek", vec![]).unwrap_err();
        assert_eq!(err.fault().map(|f| f.kind), Some(FaultKind::MissingMember));
    }
}

// =============================================================================
// Publishing
// =============================================================================

mod publishing_tests {
    use super::*;

    /// Test that redeploying replaces the published instance while earlier
    /// holders keep the version they have.
    #[test]
    fn test_redeploy_replaces_named_instance() {
        let engine = engine();
        let registry = SingletonRegistry::new();

        assert_ok(
            engine.deploy(&greeting_service("v1"), "demo.GreetingService", &registry),
            "deploy v1",
        );
        let held = registry.get("greetingService").expect("published");
        assert_ok(
            engine.deploy(&greeting_service("v2"), "demo.GreetingService", &registry),
            "deploy v2",
        );

        let args = || vec![Value::from("ada")];
        assert_eq!(
            assert_ok(engine.invoke_named(&registry, "greetingService", "greet", args()), "named"),
            Value::from("v2: ada")
        );
        assert_eq!(
            assert_ok(engine.invoke(&held, "greet", args()), "held"),
            Value::from("v1: ada")
        );
    }

    /// Test that calling an unpublished name fails without side effects.
    #[test]
    fn test_unpublished_name() {
        let engine = engine();
        let registry = SingletonRegistry::new();
        let err = engine
            .invoke_named(&registry, "missingService", "greet", vec![])
            .unwrap_err();
        assert!(matches!(err, InvocationError::NotRegistered { ref name } if name == "missingService"));
        assert!(registry.is_empty());
    }
}

// =============================================================================
// Archives
// =============================================================================

mod archive_tests {
    use super::*;

    /// Test that units from an attached archive link into freshly compiled
    /// units and survive a reset.
    #[test]
    fn test_archive_on_library_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("util.json");

        let builder = engine();
        let set = assert_ok(
            builder.compile(&CompilationUnit::new("lib.Util", LIBRARY_UTIL)),
            "compile library",
        );
        write_archive(&path, "util", set.artifacts.values()).expect("write archive");

        let engine = engine();
        engine.add_archive(&path).expect("add archive");
        assert_eq!(engine.library_path().archive_names(), vec!["util"]);

        let main = assert_ok(engine.compile_once(LIBRARY_USER, "app.Main"), "compile main");
        assert_eq!(
            assert_ok(engine.invoke_unit(&main, "run", vec![Value::Int(20)]), "run"),
            Value::Int(41)
        );

        engine.reset();
        let util = assert_ok(engine.load("lib.Util"), "load after reset");
        assert_eq!(util.loader().label(), "archive:util");
    }

    /// Test that an archive whose bytes no longer match the recorded digest
    /// is refused.
    #[test]
    fn test_tampered_archive_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("util.json");
        let set = assert_ok(
            engine().compile(&CompilationUnit::new("lib.Util", LIBRARY_UTIL)),
            "compile library",
        );
        write_archive(&path, "util", set.artifacts.values()).expect("write archive");

        let raw = std::fs::read_to_string(&path).expect("read");
        let mut json: serde_json::Value = serde_json::from_str(&raw).expect("json");
        json["artifacts"][0]["digest"] = serde_json::Value::String("ff".repeat(32));
        std::fs::write(&path, json.to_string()).expect("rewrite");

        let engine = engine();
        let err = engine.add_archive(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("digest mismatch"));
        assert!(engine.library_path().is_empty());
    }
}

// =============================================================================
// Concurrent access
// =============================================================================

mod concurrent_access_tests {
    use super::*;

    /// Test that threads can compile, load and call through one engine.
    #[test]
    fn test_concurrent_compile_and_invoke() {
        let engine = Arc::new(engine());
        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                let name = format!("demo.Worker{}", i);
                let source = format!("unit {} {{ fn id() -> int {{ return {}; }} }}", name, i);
                engine.compile_shared(&source, &name).expect("compile");
                let unit = engine.load(&name).expect("load");
                engine.invoke_unit(&unit, "id", vec![]).expect("invoke")
            }));
        }
        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect();
        assert_eq!(results, (0..8).map(Value::Int).collect::<Vec<_>>());
        assert_eq!(engine.store_snapshot().len(), 8);
    }

    /// Test that one published instance serves calls from several threads.
    #[test]
    fn test_concurrent_calls_on_shared_instance() {
        let engine = Arc::new(engine());
        let registry = Arc::new(SingletonRegistry::new());
        engine.deploy(GREETER, "demo.Greeter", registry.as_ref()).expect("deploy");

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let engine = Arc::clone(&engine);
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let name = format!("t{}", i);
                    let out = engine
                        .invoke_named(registry.as_ref(), "greeter", "greet", vec![name.as_str().into()])
                        .expect("greet");
                    assert_eq!(out, Value::Str(format!("Hello,{}!", name)));
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
    }
}
