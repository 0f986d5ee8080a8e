//! # Unit VM
//!
//! A stack interpreter for verified unit images. Each top-level invocation
//! gets its own [`Interpreter`] and therefore its own step budget; nested
//! calls made by script code share the budget of the call that started them.
//! Script-to-script calls push frames onto a heap stack, so `max_call_depth`
//! bounds memory rather than native stack use.
//!
//! Dispatch rules:
//! - Top-level invocation through [`crate::invoke`] may reach private
//!   operations.
//! - Script code may call a private operation only on an instance of its own
//!   unit; calls on other objects see public operations only.
//! - Calls on an intercepted handle always go through its hooks.

use std::sync::Arc;

use hotload_types::{Intrinsic, Op, Shape, Visibility};

use crate::errors::{Fault, FaultKind, InvocationError};
use crate::loader::ExecutableUnit;
use crate::value::{Instance, ObjectRef, Value};

/// Default number of instructions one invocation may execute.
pub const DEFAULT_STEP_BUDGET: u64 = 10_000_000;

/// Default nesting limit for operation calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// `None` disables metering.
    pub step_budget: Option<u64>,
    pub max_call_depth: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            step_budget: Some(DEFAULT_STEP_BUDGET),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// Who is calling, for visibility checks.
#[derive(Debug, Clone, Copy)]
pub enum Access<'a> {
    /// Host code: private operations are reachable.
    Host,
    /// Script code running inside the named unit.
    Unit(&'a str),
    /// Public surface only (proxies).
    Public,
}

/// Deepest chain of proxy crossings one invocation may make. Calls between
/// plain instances stay on the interpreter's frame stack; a call through a
/// proxy runs its hooks and re-enters [`Interpreter::run`] natively.
pub const MAX_PROXY_REENTRY: usize = 32;

pub struct Interpreter {
    limits: ExecutionLimits,
    steps: u64,
    depth: usize,
    reentries: usize,
}

/// One activation on the frame stack.
struct Frame {
    instance: Arc<Instance>,
    unit: ExecutableUnit,
    function: usize,
    locals: Vec<Value>,
    stack: Vec<Value>,
    pc: usize,
}

/// What the running frame hands back to the driver loop.
enum Step {
    Call(Frame),
    Return(Value),
}

impl Interpreter {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            limits,
            steps: 0,
            depth: 0,
            reentries: 0,
        }
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn tick(&mut self) -> Result<(), Fault> {
        self.steps += 1;
        match self.limits.step_budget {
            Some(budget) if self.steps > budget => Err(Fault::new(
                FaultKind::StepBudgetExhausted,
                format!("exceeded {} steps", budget),
            )),
            _ => Ok(()),
        }
    }

    /// Run function `idx` of the instance's unit.
    pub fn run(&mut self, instance: &Arc<Instance>, idx: usize, args: Vec<Value>) -> Result<Value, Fault> {
        let mut frames = vec![self.enter(instance.clone(), idx, args)?];
        let result = self.drive(&mut frames);
        // Frames left behind by a fault still count against the depth.
        self.depth -= frames.len();
        result
    }

    fn enter(&mut self, instance: Arc<Instance>, idx: usize, args: Vec<Value>) -> Result<Frame, Fault> {
        if self.depth >= self.limits.max_call_depth {
            return Err(Fault::new(
                FaultKind::CallDepthExceeded,
                format!("call depth limit {} reached", self.limits.max_call_depth),
            ));
        }
        let unit = instance.unit().clone();
        let function = unit
            .code()
            .function(idx)
            .ok_or_else(|| invalid(format!("{} has no function {}", unit.name(), idx)))?;
        let mut locals = vec![Value::Nil; function.locals as usize];
        for (slot, arg) in locals.iter_mut().zip(args) {
            *slot = arg;
        }
        self.depth += 1;
        Ok(Frame {
            instance,
            unit,
            function: idx,
            locals,
            stack: Vec::new(),
            pc: 0,
        })
    }

    fn drive(&mut self, frames: &mut Vec<Frame>) -> Result<Value, Fault> {
        loop {
            let frame = frames
                .last_mut()
                .ok_or_else(|| invalid("empty frame stack".to_string()))?;
            match self.step(frame)? {
                Step::Call(callee) => frames.push(callee),
                Step::Return(value) => {
                    frames.pop();
                    self.depth -= 1;
                    match frames.last_mut() {
                        Some(caller) => caller.stack.push(value),
                        None => return Ok(value),
                    }
                }
            }
        }
    }

    /// Execute `frame` until it returns or calls another plain instance.
    fn step(&mut self, frame: &mut Frame) -> Result<Step, Fault> {
        let Frame {
            instance,
            unit,
            function,
            locals,
            stack,
            pc,
        } = frame;
        let code = unit.code().clone();
        let function = code
            .function(*function)
            .ok_or_else(|| invalid(format!("{} has no function {}", unit.name(), function)))?;
        let constants = &code.image().constants;

        loop {
            self.tick()?;
            let op = function
                .code
                .get(*pc)
                .ok_or_else(|| invalid(format!("pc {} past end of {}", pc, function.name)))?;
            *pc += 1;

            match op {
                Op::Const(i) => {
                    let constant = constants
                        .get(*i as usize)
                        .ok_or_else(|| invalid(format!("constant {} out of range", i)))?;
                    stack.push(Value::from_constant(constant));
                }
                Op::LoadLocal(slot) => {
                    let value = locals
                        .get(*slot as usize)
                        .cloned()
                        .ok_or_else(|| invalid(format!("local {} out of range", slot)))?;
                    stack.push(value);
                }
                Op::StoreLocal(slot) => {
                    let value = pop(stack)?;
                    let target = locals
                        .get_mut(*slot as usize)
                        .ok_or_else(|| invalid(format!("local {} out of range", slot)))?;
                    *target = value;
                }
                Op::LoadSelf => stack.push(Value::Object(ObjectRef::Plain(instance.clone()))),
                Op::GetField(name) => {
                    let object = pop_object(stack, name)?;
                    stack.push(object.get_field(name)?);
                }
                Op::SetField(name) => {
                    let value = pop(stack)?;
                    let object = pop_object(stack, name)?;
                    object.set_field(name, value)?;
                }
                Op::Add => {
                    let (a, b) = pop2(stack)?;
                    let sum = match (&a, &b) {
                        (Value::Int(x), Value::Int(y)) => Value::Int(checked(x.checked_add(*y), "+")?),
                        (Value::Str(_), _) | (_, Value::Str(_)) => Value::Str(format!("{}{}", a, b)),
                        _ => return Err(operand_mismatch("+", &a, &b)),
                    };
                    stack.push(sum);
                }
                Op::Sub | Op::Mul | Op::Div | Op::Rem => {
                    let (a, b) = pop2(stack)?;
                    let (Value::Int(x), Value::Int(y)) = (&a, &b) else {
                        return Err(operand_mismatch(symbol(op), &a, &b));
                    };
                    let (x, y) = (*x, *y);
                    if y == 0 && matches!(op, Op::Div | Op::Rem) {
                        return Err(Fault::new(FaultKind::DivisionByZero, format!("{} {} 0", x, symbol(op))));
                    }
                    let result = match op {
                        Op::Sub => x.checked_sub(y),
                        Op::Mul => x.checked_mul(y),
                        Op::Div => x.checked_div(y),
                        _ => x.checked_rem(y),
                    };
                    stack.push(Value::Int(checked(result, symbol(op))?));
                }
                Op::Eq => {
                    let (a, b) = pop2(stack)?;
                    stack.push(Value::Bool(a == b));
                }
                Op::Ne => {
                    let (a, b) = pop2(stack)?;
                    stack.push(Value::Bool(a != b));
                }
                Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                    let (a, b) = pop2(stack)?;
                    let ordering = match (&a, &b) {
                        (Value::Int(x), Value::Int(y)) => x.cmp(y),
                        (Value::Str(x), Value::Str(y)) => x.cmp(y),
                        _ => return Err(operand_mismatch(symbol(op), &a, &b)),
                    };
                    let holds = match op {
                        Op::Lt => ordering.is_lt(),
                        Op::Le => ordering.is_le(),
                        Op::Gt => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    };
                    stack.push(Value::Bool(holds));
                }
                Op::Not => match pop(stack)? {
                    Value::Bool(b) => stack.push(Value::Bool(!b)),
                    other => return Err(mismatch(format!("'!' needs bool, got {}", other.shape()))),
                },
                Op::Neg => match pop(stack)? {
                    Value::Int(v) => stack.push(Value::Int(checked(v.checked_neg(), "-")?)),
                    other => return Err(mismatch(format!("'-' needs int, got {}", other.shape()))),
                },
                Op::Jump(target) => *pc = *target as usize,
                Op::JumpIfFalse(target) => match pop(stack)? {
                    Value::Bool(false) => *pc = *target as usize,
                    Value::Bool(true) => {}
                    other => return Err(mismatch(format!("condition must be bool, got {}", other.shape()))),
                },
                Op::Pop => {
                    pop(stack)?;
                }
                Op::Call { member, argc } => {
                    let args = pop_n(stack, *argc as usize)?;
                    let receiver = match pop(stack)? {
                        Value::Object(object) => object,
                        Value::Nil => {
                            return Err(Fault::new(
                                FaultKind::MissingMember,
                                format!("call to {} on nil", member),
                            ))
                        }
                        other => return Err(mismatch(format!("cannot call {} on {}", member, other.shape()))),
                    };
                    match receiver {
                        ObjectRef::Plain(callee) => {
                            // Private operations are reachable on instances of the caller's own unit.
                            let allow_private = callee.unit().name() == unit.name();
                            let shapes: Vec<Shape> = args.iter().map(Value::shape).collect();
                            let idx = lookup(&callee, member, &shapes, allow_private).map_err(into_fault)?;
                            return Ok(Step::Call(self.enter(callee, idx, args)?));
                        }
                        ObjectRef::Intercepted(proxy) => {
                            if self.reentries >= MAX_PROXY_REENTRY {
                                return Err(Fault::new(
                                    FaultKind::CallDepthExceeded,
                                    format!("more than {} nested proxy calls", MAX_PROXY_REENTRY),
                                ));
                            }
                            self.reentries += 1;
                            let result = proxy.call(self, member, args);
                            self.reentries -= 1;
                            stack.push(result.map_err(into_fault)?);
                        }
                    }
                }
                Op::New { unit: target, argc } => {
                    let args = pop_n(stack, *argc as usize)?;
                    let linked = unit
                        .link(target)
                        .map_err(|e| Fault::new(FaultKind::Link, e.to_string()))?;
                    let instance = Instance::construct(linked, args)?;
                    stack.push(Value::Object(ObjectRef::Plain(instance)));
                }
                Op::Intrinsic { intrinsic, argc } => {
                    let mut args = pop_n(stack, *argc as usize)?;
                    let arg = args.pop().ok_or_else(|| invalid(format!("{} without argument", intrinsic)))?;
                    let result = match intrinsic {
                        Intrinsic::ToStr => Value::Str(arg.to_string()),
                        Intrinsic::Len => match arg {
                            Value::Str(s) => Value::Int(s.chars().count() as i64),
                            other => return Err(mismatch(format!("len() needs str, got {}", other.shape()))),
                        },
                        Intrinsic::Fail => return Err(Fault::new(FaultKind::Raised, arg.to_string())),
                    };
                    stack.push(result);
                }
                Op::Return => return Ok(Step::Return(pop(stack)?)),
            }
        }
    }
}

/// Route a call to `target` and run it.
pub fn dispatch(
    interp: &mut Interpreter,
    target: &ObjectRef,
    member: &str,
    args: Vec<Value>,
    access: Access<'_>,
) -> Result<Value, InvocationError> {
    match target {
        ObjectRef::Plain(instance) => {
            let allow_private = match access {
                Access::Host => true,
                Access::Unit(caller) => caller == instance.unit().name(),
                Access::Public => false,
            };
            let shapes: Vec<Shape> = args.iter().map(Value::shape).collect();
            let idx = lookup(instance, member, &shapes, allow_private)?;
            interp
                .run(instance, idx, args)
                .map_err(|cause| InvocationError::Faulted {
                    unit: instance.unit().name().to_string(),
                    member: member.to_string(),
                    shapes,
                    cause,
                })
        }
        ObjectRef::Intercepted(proxy) => proxy.call(interp, member, args),
    }
}

/// Exact-shape lookup with visibility filtering.
pub fn lookup(
    instance: &Instance,
    member: &str,
    shapes: &[Shape],
    allow_private: bool,
) -> Result<usize, InvocationError> {
    let code = instance.unit().code();
    code.operation(member, shapes)
        .filter(|idx| {
            allow_private
                || code
                    .function(*idx)
                    .map(|f| f.visibility == Visibility::Public)
                    .unwrap_or(false)
        })
        .ok_or_else(|| InvocationError::MemberNotFound {
            unit: code.name().to_string(),
            member: member.to_string(),
            shapes: shapes.to_vec(),
            available: code.signatures(allow_private),
        })
}

/// Errors from a nested call become a fault in the caller. A fault raised by
/// the callee is passed on as is.
fn into_fault(error: InvocationError) -> Fault {
    match error {
        InvocationError::Faulted { cause, .. } => cause,
        InvocationError::MemberNotFound { .. } => Fault::new(FaultKind::MissingMember, error.to_string()),
        InvocationError::Link(ref e) => Fault::new(FaultKind::Link, e.to_string()),
        InvocationError::NotRegistered { .. } => Fault::new(FaultKind::MissingMember, error.to_string()),
    }
}

fn invalid(message: String) -> Fault {
    Fault::new(FaultKind::InvalidCode, message)
}

fn mismatch(message: String) -> Fault {
    Fault::new(FaultKind::TypeMismatch, message)
}

fn operand_mismatch(op: &str, a: &Value, b: &Value) -> Fault {
    mismatch(format!("cannot apply '{}' to {} and {}", op, a.shape(), b.shape()))
}

fn checked(result: Option<i64>, op: &str) -> Result<i64, Fault> {
    result.ok_or_else(|| Fault::new(FaultKind::ArithmeticOverflow, format!("integer overflow in '{}'", op)))
}

fn symbol(op: &Op) -> &'static str {
    match op {
        Op::Sub => "-",
        Op::Mul => "*",
        Op::Div => "/",
        Op::Rem => "%",
        Op::Lt => "<",
        Op::Le => "<=",
        Op::Gt => ">",
        Op::Ge => ">=",
        _ => "?",
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, Fault> {
    stack
        .pop()
        .ok_or_else(|| invalid("operand stack underflow".to_string()))
}

fn pop2(stack: &mut Vec<Value>) -> Result<(Value, Value), Fault> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    Ok((a, b))
}

fn pop_n(stack: &mut Vec<Value>, n: usize) -> Result<Vec<Value>, Fault> {
    if stack.len() < n {
        return Err(invalid("operand stack underflow".to_string()));
    }
    Ok(stack.split_off(stack.len() - n))
}

fn pop_object(stack: &mut Vec<Value>, field: &str) -> Result<ObjectRef, Fault> {
    match pop(stack)? {
        Value::Object(object) => Ok(object),
        Value::Nil => Err(Fault::new(
            FaultKind::BadField,
            format!("field '{}' accessed on nil", field),
        )),
        other => Err(mismatch(format!("field '{}' accessed on {}", field, other.shape()))),
    }
}
