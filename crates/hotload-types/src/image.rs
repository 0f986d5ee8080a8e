//! # Unit Images
//!
//! The binary artifact format produced by compiler collaborators and consumed
//! by loaders. One image describes one unit: its fields, its operations and
//! the constant pool their code refers to. Images are BCS-encoded.
//!
//! ## Execution model
//!
//! Operation bodies are stack code. Locals `0..params.len()` hold the
//! arguments; the receiver is available through [`Op::LoadSelf`]. Every
//! function must end in [`Op::Return`] or an unconditional [`Op::Jump`].
//!
//! | Op | Stack effect |
//! |----|--------------|
//! | `Const(i)` | `-> constants[i]` |
//! | `LoadLocal(n)` / `StoreLocal(n)` | `-> v` / `v ->` |
//! | `GetField(f)` | `obj -> v` |
//! | `SetField(f)` | `obj v ->` |
//! | `Call { member, argc }` | `recv a1..an -> result` |
//! | `New { unit, argc }` | `a1..an -> obj` |
//! | `Intrinsic { intrinsic, argc }` | `a1..an -> result` |
//! | `JumpIfFalse(t)` | `bool ->` |
//! | `Return` | `v ->` (ends the frame) |

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::name::is_qualified_name;
use crate::shape::{format_shapes, Shape};

/// Current image format version. Loaders reject anything else.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitImage {
    pub format_version: u32,
    /// Qualified name of the unit, e.g. `demo.Greeter.User`.
    pub name: String,
    pub fields: Vec<FieldImage>,
    pub functions: Vec<FunctionImage>,
    pub constants: Vec<Constant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldImage {
    pub name: String,
    pub shape: Shape,
    /// Value the field holds in a default-constructed instance.
    pub default: Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionImage {
    pub name: String,
    pub visibility: Visibility,
    pub params: Vec<Shape>,
    pub returns: Option<Shape>,
    /// Number of local slots, parameters included.
    pub locals: u16,
    pub code: Vec<Op>,
}

impl FunctionImage {
    /// Human-readable signature, e.g. `greet(str) -> str`.
    pub fn signature(&self) -> String {
        let mut sig = format!("{}{}", self.name, format_shapes(&self.params));
        if let Some(ret) = &self.returns {
            sig.push_str(&format!(" -> {}", ret));
        }
        if self.visibility == Visibility::Private {
            sig.insert_str(0, "private ");
        }
        sig
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constant {
    Nil,
    Int(i64),
    Bool(bool),
    Str(String),
}

impl Constant {
    pub fn shape(&self) -> Shape {
        match self {
            Constant::Nil => Shape::Nil,
            Constant::Int(_) => Shape::Int,
            Constant::Bool(_) => Shape::Bool,
            Constant::Str(_) => Shape::Str,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intrinsic {
    /// `str(x)`: display form of any value.
    ToStr,
    /// `len(s)`: character count of a string.
    Len,
    /// `fail(msg)`: raise a fault carrying `msg`.
    Fail,
}

impl Intrinsic {
    pub fn from_name(name: &str) -> Option<Intrinsic> {
        match name {
            "str" => Some(Intrinsic::ToStr),
            "len" => Some(Intrinsic::Len),
            "fail" => Some(Intrinsic::Fail),
            _ => None,
        }
    }

    pub fn arity(self) -> u8 {
        1
    }
}

impl fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Intrinsic::ToStr => "str",
            Intrinsic::Len => "len",
            Intrinsic::Fail => "fail",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Const(u32),
    LoadLocal(u16),
    StoreLocal(u16),
    LoadSelf,
    GetField(String),
    SetField(String),
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Not,
    Neg,
    Jump(u32),
    JumpIfFalse(u32),
    Pop,
    Call { member: String, argc: u8 },
    New { unit: String, argc: u8 },
    Intrinsic { intrinsic: Intrinsic, argc: u8 },
    Return,
}

impl UnitImage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            name: name.into(),
            fields: Vec::new(),
            functions: Vec::new(),
            constants: Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bcs::to_bytes(self).map_err(|e| anyhow!("Failed to encode unit image {}: {}", self.name, e))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bcs::from_bytes(bytes).map_err(|e| anyhow!("Failed to decode unit image: {}", e))
    }

    /// Decode and verify in one step.
    pub fn decode_verified(bytes: &[u8]) -> Result<Self> {
        let image = Self::decode(bytes)?;
        image.verify()?;
        Ok(image)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Structural checks that make the image safe to interpret: every index
    /// an instruction carries is in range and every body terminates.
    pub fn verify(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            bail!(
                "unsupported format version {} (expected {})",
                self.format_version,
                FORMAT_VERSION
            );
        }
        if !is_qualified_name(&self.name) {
            bail!("invalid unit name '{}'", self.name);
        }

        let mut field_names = BTreeSet::new();
        for field in &self.fields {
            if !field_names.insert(field.name.as_str()) {
                bail!("duplicate field '{}'", field.name);
            }
        }

        let mut signatures = BTreeSet::new();
        for function in &self.functions {
            if !signatures.insert((function.name.as_str(), &function.params)) {
                bail!("duplicate operation {}", function.signature());
            }
            self.verify_function(function)?;
        }
        Ok(())
    }

    fn verify_function(&self, function: &FunctionImage) -> Result<()> {
        let sig = function.signature();
        if function.params.len() > function.locals as usize {
            bail!("{}: {} params exceed {} locals", sig, function.params.len(), function.locals);
        }
        match function.code.last() {
            Some(Op::Return) | Some(Op::Jump(_)) => {}
            _ => bail!("{}: body does not end in a terminator", sig),
        }
        let len = function.code.len() as u32;
        for (pc, op) in function.code.iter().enumerate() {
            match op {
                Op::Const(idx) if *idx as usize >= self.constants.len() => {
                    bail!("{}: constant {} out of range at {}", sig, idx, pc)
                }
                Op::LoadLocal(slot) | Op::StoreLocal(slot) if *slot >= function.locals => {
                    bail!("{}: local {} out of range at {}", sig, slot, pc)
                }
                Op::Jump(target) | Op::JumpIfFalse(target) if *target >= len => {
                    bail!("{}: jump target {} out of range at {}", sig, target, pc)
                }
                Op::New { unit, .. } if !is_qualified_name(unit) => {
                    bail!("{}: invalid unit reference '{}' at {}", sig, unit, pc)
                }
                Op::Intrinsic { intrinsic, argc } if *argc != intrinsic.arity() => {
                    bail!("{}: {} takes {} argument(s) at {}", sig, intrinsic, intrinsic.arity(), pc)
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UnitImage {
        let mut image = UnitImage::new("demo.Sample");
        image.constants.push(Constant::Int(7));
        image.functions.push(FunctionImage {
            name: "seven".to_string(),
            visibility: Visibility::Public,
            params: vec![],
            returns: Some(Shape::Int),
            locals: 0,
            code: vec![Op::Const(0), Op::Return],
        });
        image
    }

    #[test]
    fn test_encode_decode_verified() {
        let image = sample();
        let bytes = image.encode().unwrap();
        let decoded = UnitImage::decode_verified(&bytes).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(UnitImage::decode(&[0xff, 0x01, 0x02]).is_err());
    }

    #[test]
    fn test_verify_rejects_bad_constant() {
        let mut image = sample();
        image.functions[0].code = vec![Op::Const(3), Op::Return];
        let err = image.verify().unwrap_err().to_string();
        assert!(err.contains("constant 3 out of range"), "{}", err);
    }

    #[test]
    fn test_verify_rejects_missing_terminator() {
        let mut image = sample();
        image.functions[0].code = vec![Op::Const(0)];
        let err = image.verify().unwrap_err().to_string();
        assert!(err.contains("terminator"), "{}", err);
    }

    #[test]
    fn test_verify_rejects_duplicate_signature() {
        let mut image = sample();
        let dup = image.functions[0].clone();
        image.functions.push(dup);
        let err = image.verify().unwrap_err().to_string();
        assert!(err.contains("duplicate operation seven()"), "{}", err);
    }

    #[test]
    fn test_verify_rejects_wrong_version() {
        let mut image = sample();
        image.format_version = 99;
        assert!(image.verify().is_err());
    }

    #[test]
    fn test_signature_format() {
        let f = FunctionImage {
            name: "greet".to_string(),
            visibility: Visibility::Private,
            params: vec![Shape::Str, Shape::Int],
            returns: Some(Shape::Str),
            locals: 2,
            code: vec![Op::Return],
        };
        assert_eq!(f.signature(), "private greet(str, int) -> str");
    }
}
