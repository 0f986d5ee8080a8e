//! Error types for compilation, loading and invocation.
//!
//! Each failure mode keeps the structured context a caller needs to react to
//! it programmatically; the `Display` forms are what end up in logs.

use hotload_types::shape::format_shapes;
use hotload_types::{Diagnostic, Shape};

// =============================================================================
// Compilation
// =============================================================================

/// A compilation failed. Carries every diagnostic the compiler reported, in
/// report order, warnings included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationError {
    /// Qualified name of the unit being compiled.
    pub unit: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompilationError {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

impl std::fmt::Display for CompilationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let errors = self.errors().count();
        write!(
            f,
            "compilation of {} failed with {} error{}",
            self.unit,
            errors,
            if errors == 1 { "" } else { "s" }
        )?;
        for diagnostic in &self.diagnostics {
            write!(f, "\n{}", diagnostic)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompilationError {}

// =============================================================================
// Loading
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// No loader in the chain could supply the name.
    NameNotFound {
        name: String,
        /// Labels of the loaders consulted, nearest first.
        searched: Vec<String>,
    },
    /// The loader was closed by a reset (or explicitly).
    Closed { loader: String, name: String },
    /// An artifact exists but is not a valid unit image.
    Malformed { name: String, reason: String },
}

impl std::fmt::Display for LoaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderError::NameNotFound { name, searched } => {
                write!(f, "unit {} not found", name)?;
                if !searched.is_empty() {
                    write!(f, " (searched: {})", searched.join(" -> "))?;
                }
                Ok(())
            }
            LoaderError::Closed { loader, name } => {
                write!(f, "loader {} is closed; cannot resolve {}", loader, name)
            }
            LoaderError::Malformed { name, reason } => {
                write!(f, "artifact {} is malformed: {}", name, reason)
            }
        }
    }
}

impl std::error::Error for LoaderError {}

// =============================================================================
// Invocation
// =============================================================================

/// A failure raised while an operation body was executing.
///
/// Faults pass through nested calls and interception unchanged, so the value a
/// caller sees is the one the failing operation raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Raised by script code through `fail(msg)`.
    Raised,
    /// Operand of the wrong shape for an instruction.
    TypeMismatch,
    ArithmeticOverflow,
    DivisionByZero,
    /// Field read or write on nil, or on a unit without that field.
    BadField,
    /// A nested call found no matching operation.
    MissingMember,
    /// A referenced unit could not be linked.
    Link,
    StepBudgetExhausted,
    CallDepthExceeded,
    /// The image passed verification but its code misbehaved at run time
    /// (operand stack underflow, out-of-range index).
    InvalidCode,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FaultKind::Raised => "raised",
            FaultKind::TypeMismatch => "type mismatch",
            FaultKind::ArithmeticOverflow => "arithmetic overflow",
            FaultKind::DivisionByZero => "division by zero",
            FaultKind::BadField => "bad field access",
            FaultKind::MissingMember => "missing member",
            FaultKind::Link => "link failure",
            FaultKind::StepBudgetExhausted => "step budget exhausted",
            FaultKind::CallDepthExceeded => "call depth exceeded",
            FaultKind::InvalidCode => "invalid code",
        };
        write!(f, "{}", s)
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Fault {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    /// No operation with that name and exact argument shapes.
    MemberNotFound {
        unit: String,
        member: String,
        shapes: Vec<Shape>,
        /// Signatures the unit does declare, for the error message.
        available: Vec<String>,
    },
    /// The operation ran and raised a fault.
    Faulted {
        unit: String,
        member: String,
        shapes: Vec<Shape>,
        cause: Fault,
    },
    /// The registry holds nothing under that name.
    NotRegistered { name: String },
    /// Instantiating the target unit required a link that failed.
    Link(LoaderError),
}

impl InvocationError {
    /// The fault an operation raised, if this error is one.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            InvocationError::Faulted { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationError::MemberNotFound {
                unit,
                member,
                shapes,
                available,
            } => {
                write!(
                    f,
                    "{} has no operation {}{}",
                    unit,
                    member,
                    format_shapes(shapes)
                )?;
                if available.is_empty() {
                    write!(f, " (it declares no operations)")
                } else {
                    write!(f, " (available: {})", available.join(", "))
                }
            }
            InvocationError::Faulted {
                unit,
                member,
                shapes,
                cause,
            } => write!(
                f,
                "{}.{}{} faulted: {}",
                unit,
                member,
                format_shapes(shapes),
                cause
            ),
            InvocationError::NotRegistered { name } => {
                write!(f, "no instance registered under '{}'", name)
            }
            InvocationError::Link(e) => write!(f, "link failed: {}", e),
        }
    }
}

impl std::error::Error for InvocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InvocationError::Faulted { cause, .. } => Some(cause),
            InvocationError::Link(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LoaderError> for InvocationError {
    fn from(e: LoaderError) -> Self {
        InvocationError::Link(e)
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `register` found the name taken; unregister first to replace.
    AlreadyRegistered { name: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::AlreadyRegistered { name } => {
                write!(f, "an instance is already registered under '{}'", name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

// =============================================================================
// Engine
// =============================================================================

/// Error returned by [`crate::Engine`] operations that span several stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Compilation(CompilationError),
    Loader(LoaderError),
    Invocation(InvocationError),
    Registry(RegistryError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Compilation(e) => write!(f, "{}", e),
            EngineError::Loader(e) => write!(f, "{}", e),
            EngineError::Invocation(e) => write!(f, "{}", e),
            EngineError::Registry(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Compilation(e) => Some(e),
            EngineError::Loader(e) => Some(e),
            EngineError::Invocation(e) => Some(e),
            EngineError::Registry(e) => Some(e),
        }
    }
}

impl From<CompilationError> for EngineError {
    fn from(e: CompilationError) -> Self {
        EngineError::Compilation(e)
    }
}

impl From<LoaderError> for EngineError {
    fn from(e: LoaderError) -> Self {
        EngineError::Loader(e)
    }
}

impl From<InvocationError> for EngineError {
    fn from(e: InvocationError) -> Self {
        EngineError::Invocation(e)
    }
}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        EngineError::Registry(e)
    }
}
