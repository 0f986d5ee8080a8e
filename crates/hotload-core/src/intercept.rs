//! # Interception
//!
//! [`proxy`] wraps an object handle so that every public operation call runs
//! through a chain of [`Interceptor`]s:
//!
//! ```text
//! before(hook 1) → before(hook 2) → operation → after(hook 2) → after(hook 1)
//!                                           └─► on_error(hook 2) → on_error(hook 1) → same error
//! ```
//!
//! The proxy presents the target's unit shape, forwards field access to the
//! target and exposes public operations only. The hook list is locked only
//! while hooks run, so the target operation may call back into the same
//! proxy. A call a hook makes into its own proxy goes straight to the target
//! without running the hooks again.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Instant;

use hotload_types::Shape;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{info, warn};

use crate::errors::InvocationError;
use crate::value::{ObjectRef, Value};
use crate::vm::{dispatch, lookup, Access, Interpreter};

/// Describes one intercepted call.
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// The wrapped object. Its fields can be read and written from a hook.
    pub target: ObjectRef,
    pub unit: String,
    pub member: String,
    pub args: Vec<Value>,
}

impl CallInfo {
    pub fn shapes(&self) -> Vec<Shape> {
        self.args.iter().map(Value::shape).collect()
    }
}

/// Hooks around an intercepted call. All methods default to doing nothing.
pub trait Interceptor: Send {
    fn before(&mut self, _call: &CallInfo) {}

    fn after(&mut self, _call: &CallInfo, _result: &Value) {}

    /// Observes a failure. The error is re-raised unchanged afterwards.
    fn on_error(&mut self, _call: &CallInfo, _error: &InvocationError) {}
}

/// The object behind an [`ObjectRef::Intercepted`] handle.
pub struct InterceptedObject {
    target: ObjectRef,
    hooks: ReentrantMutex<RefCell<Vec<Box<dyn Interceptor>>>>,
}

impl InterceptedObject {
    pub fn target(&self) -> &ObjectRef {
        &self.target
    }

    /// Runs `visit` over the hooks. Skipped when this thread is already
    /// inside one of them.
    fn with_hooks(&self, visit: impl FnOnce(&mut Vec<Box<dyn Interceptor>>)) {
        let guard = self.hooks.lock();
        let Ok(mut hooks) = guard.try_borrow_mut() else {
            return;
        };
        visit(&mut *hooks);
    }

    pub(crate) fn call(
        &self,
        interp: &mut Interpreter,
        member: &str,
        args: Vec<Value>,
    ) -> Result<Value, InvocationError> {
        let call = CallInfo {
            target: self.target.clone(),
            unit: self.target.unit().name().to_string(),
            member: member.to_string(),
            args,
        };
        // Private operations are not part of the proxy surface; reject them
        // before any hook runs.
        lookup(self.target.instance(), member, &call.shapes(), false)?;

        self.with_hooks(|hooks| hooks.iter_mut().for_each(|h| h.before(&call)));
        let result = dispatch(interp, &self.target, member, call.args.clone(), Access::Public);
        self.with_hooks(|hooks| match &result {
            Ok(value) => hooks.iter_mut().rev().for_each(|h| h.after(&call, value)),
            Err(error) => hooks.iter_mut().rev().for_each(|h| h.on_error(&call, error)),
        });
        result
    }
}

/// Wrap `target` with a single interceptor.
pub fn proxy(target: &ObjectRef, interceptor: Box<dyn Interceptor>) -> ObjectRef {
    proxy_chain(target, vec![interceptor])
}

/// Wrap `target` with hooks that run in registration order before the call
/// and in reverse order after it.
pub fn proxy_chain(target: &ObjectRef, hooks: Vec<Box<dyn Interceptor>>) -> ObjectRef {
    ObjectRef::Intercepted(Arc::new(InterceptedObject {
        target: target.clone(),
        hooks: ReentrantMutex::new(RefCell::new(hooks)),
    }))
}

/// Wrap `target` with the default [`TimingInterceptor`].
pub fn proxy_timed(target: &ObjectRef) -> ObjectRef {
    proxy(target, Box::new(TimingInterceptor::default()))
}

// =============================================================================
// Built-in interceptors
// =============================================================================

/// Logs how long each call took.
///
/// Holds a single start timestamp: overlapping calls through the same proxy
/// from several threads overwrite each other's start time. Give each thread
/// its own proxy when the timings matter.
#[derive(Debug, Default)]
pub struct TimingInterceptor {
    started: Option<Instant>,
}

impl Interceptor for TimingInterceptor {
    fn before(&mut self, call: &CallInfo) {
        info!(unit = %call.unit, member = %call.member, "call started");
        self.started = Some(Instant::now());
    }

    fn after(&mut self, call: &CallInfo, _result: &Value) {
        let elapsed = self.started.take().map(|s| s.elapsed()).unwrap_or_default();
        info!(
            unit = %call.unit,
            member = %call.member,
            elapsed_us = elapsed.as_micros() as u64,
            "call finished"
        );
    }

    fn on_error(&mut self, call: &CallInfo, error: &InvocationError) {
        let elapsed = self.started.take().map(|s| s.elapsed()).unwrap_or_default();
        warn!(
            unit = %call.unit,
            member = %call.member,
            elapsed_us = elapsed.as_micros() as u64,
            error = %error,
            "call failed"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    Before { hook: String, member: String },
    After { hook: String, member: String, result: String },
    OnError { hook: String, member: String, error: String },
}

/// Shared, ordered log of hook events.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<HookEvent>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.0.lock().clone()
    }

    fn push(&self, event: HookEvent) {
        self.0.lock().push(event);
    }
}

/// Appends every hook invocation to an [`EventLog`].
#[derive(Debug, Clone)]
pub struct RecordingInterceptor {
    name: String,
    log: EventLog,
}

impl RecordingInterceptor {
    pub fn new(name: impl Into<String>, log: &EventLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
        }
    }
}

impl Interceptor for RecordingInterceptor {
    fn before(&mut self, call: &CallInfo) {
        self.log.push(HookEvent::Before {
            hook: self.name.clone(),
            member: call.member.clone(),
        });
    }

    fn after(&mut self, call: &CallInfo, result: &Value) {
        self.log.push(HookEvent::After {
            hook: self.name.clone(),
            member: call.member.clone(),
            result: result.to_string(),
        });
    }

    fn on_error(&mut self, call: &CallInfo, error: &InvocationError) {
        self.log.push(HookEvent::OnError {
            hook: self.name.clone(),
            member: call.member.clone(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{Fault, FaultKind};
    use crate::invoke::invoke;
    use crate::loader::Loader;
    use crate::store::Artifact;
    use crate::value::Instance;
    use hotload_types::{Constant, FieldImage, FunctionImage, Intrinsic, Op, UnitImage, Visibility};

    fn target() -> ObjectRef {
        let mut image = UnitImage::new("ic.Target");
        image.fields.push(FieldImage {
            name: "label".to_string(),
            shape: Shape::Str,
            default: Constant::Str("t".to_string()),
        });
        image.constants = vec![Constant::Str("ok".to_string()), Constant::Str("broken".to_string())];
        image.functions = vec![
            FunctionImage {
                name: "ok".to_string(),
                visibility: Visibility::Public,
                params: vec![],
                returns: Some(Shape::Str),
                locals: 0,
                code: vec![Op::Const(0), Op::Return],
            },
            FunctionImage {
                name: "boom".to_string(),
                visibility: Visibility::Public,
                params: vec![],
                returns: None,
                locals: 0,
                code: vec![
                    Op::Const(1),
                    Op::Intrinsic { intrinsic: Intrinsic::Fail, argc: 1 },
                    Op::Return,
                ],
            },
            FunctionImage {
                name: "secret".to_string(),
                visibility: Visibility::Private,
                params: vec![],
                returns: None,
                locals: 0,
                code: vec![Op::Const(0), Op::Return],
            },
        ];
        let loader = Loader::new("ic");
        loader
            .define(Artifact::new("ic.Target", image.encode().expect("encode")))
            .expect("define");
        ObjectRef::new(Instance::with_defaults(loader.resolve("ic.Target").expect("resolve")))
    }

    fn chain(log: &EventLog) -> ObjectRef {
        proxy_chain(
            &target(),
            vec![
                Box::new(RecordingInterceptor::new("a", log)),
                Box::new(RecordingInterceptor::new("b", log)),
            ],
        )
    }

    #[test]
    fn test_after_runs_in_reverse() {
        let log = EventLog::new();
        let proxied = chain(&log);
        let result = invoke(&proxied, "ok", vec![]).expect("ok");
        assert_eq!(result, Value::from("ok"));
        let order: Vec<_> = log
            .events()
            .into_iter()
            .map(|e| match e {
                HookEvent::Before { hook, .. } => format!("before:{}", hook),
                HookEvent::After { hook, .. } => format!("after:{}", hook),
                HookEvent::OnError { hook, .. } => format!("error:{}", hook),
            })
            .collect();
        assert_eq!(order, vec!["before:a", "before:b", "after:b", "after:a"]);
    }

    #[test]
    fn test_error_is_reraised_unchanged() {
        let log = EventLog::new();
        let proxied = chain(&log);
        let err = invoke(&proxied, "boom", vec![]).unwrap_err();
        assert_eq!(err.fault(), Some(&Fault::new(FaultKind::Raised, "broken")));
        let events = log.events();
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[2], HookEvent::OnError { hook, .. } if hook == "b"));
        assert!(matches!(&events[3], HookEvent::OnError { hook, .. } if hook == "a"));
        assert!(!events.iter().any(|e| matches!(e, HookEvent::After { .. })));
    }

    #[test]
    fn test_private_not_on_proxy_surface() {
        let log = EventLog::new();
        let proxied = chain(&log);
        assert!(matches!(
            invoke(&proxied, "secret", vec![]),
            Err(InvocationError::MemberNotFound { .. })
        ));
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_proxy_keeps_shape_and_fields() {
        let plain = target();
        let proxied = proxy_timed(&plain);
        assert_eq!(proxied.shape(), plain.shape());
        assert!(proxied.is_intercepted());
        proxied.set_field("label", Value::from("changed")).expect("set");
        assert_eq!(plain.get_field("label").expect("get"), Value::from("changed"));
        assert!(!proxied.ptr_eq(&plain));
    }

    /// Reads the target's `label` field around every call.
    struct LabelWatcher(Arc<Mutex<Vec<String>>>);

    impl Interceptor for LabelWatcher {
        fn before(&mut self, call: &CallInfo) {
            let label = call.target.get_field("label").expect("label");
            self.0.lock().push(format!("before:{}", label));
            call.target.set_field("label", Value::from("seen")).expect("set");
        }

        fn after(&mut self, call: &CallInfo, _result: &Value) {
            let label = call.target.get_field("label").expect("label");
            self.0.lock().push(format!("after:{}", label));
        }
    }

    #[test]
    fn test_hooks_see_the_target() {
        let plain = target();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let proxied = proxy(&plain, Box::new(LabelWatcher(seen.clone())));
        invoke(&proxied, "ok", vec![]).expect("ok");
        assert_eq!(*seen.lock(), vec!["before:t", "after:seen"]);
        assert_eq!(plain.get_field("label").expect("get"), Value::from("seen"));
    }

    /// Calls back into its own proxy from `before`, once.
    struct Reentrant {
        proxy: Arc<Mutex<Option<ObjectRef>>>,
        results: Arc<Mutex<Vec<Value>>>,
    }

    impl Interceptor for Reentrant {
        fn before(&mut self, _call: &CallInfo) {
            let own = self.proxy.lock().take();
            if let Some(own) = own {
                let value = invoke(&own, "ok", vec![]).expect("re-entrant call");
                self.results.lock().push(value);
            }
        }
    }

    #[test]
    fn test_hook_can_call_its_own_proxy() {
        let log = EventLog::new();
        let slot = Arc::new(Mutex::new(None));
        let results = Arc::new(Mutex::new(Vec::new()));
        let proxied = proxy_chain(
            &target(),
            vec![
                Box::new(Reentrant {
                    proxy: slot.clone(),
                    results: results.clone(),
                }),
                Box::new(RecordingInterceptor::new("a", &log)),
            ],
        );
        *slot.lock() = Some(proxied.clone());

        assert_eq!(invoke(&proxied, "ok", vec![]).expect("outer"), Value::from("ok"));
        assert_eq!(*results.lock(), vec![Value::from("ok")]);
        // The nested call bypassed the hooks; only the outer call was recorded.
        assert_eq!(log.events().len(), 2);
    }

    #[test]
    fn test_nested_proxies_compose() {
        let log = EventLog::new();
        let inner = proxy(&target(), Box::new(RecordingInterceptor::new("inner", &log)));
        let outer = proxy(&inner, Box::new(RecordingInterceptor::new("outer", &log)));
        invoke(&outer, "ok", vec![]).expect("ok");
        let hooks: Vec<_> = log
            .events()
            .into_iter()
            .filter_map(|e| match e {
                HookEvent::Before { hook, .. } => Some(hook),
                _ => None,
            })
            .collect();
        assert_eq!(hooks, vec!["outer", "inner"]);
    }
}
