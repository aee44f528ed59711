//! Compact type signatures for remote operations.
//!
//! A signature has the shape `(params)R`. Each parameter is one of:
//!
//! | marker | type |
//! |--------|------|
//! | `B` `C` `D` `F` `I` `J` `S` `Z` | byte, char, double, float, int, long, short, boolean |
//! | `[T` | array of `T` (repeat for more dimensions) |
//! | `Lname;` | reference type `name`, with `/` standing for `::` |
//!
//! `R` is either `V` (no result) or a parameter type. `(ILString;)V` is an
//! operation taking an `i32` and a `String`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RabbitCastError, Result};

const REFERENCE_START: char = 'L';
const REFERENCE_END: char = ';';
const ARRAY: char = '[';
const VOID: char = 'V';
const WIRE_SEPARATOR: char = '/';
const PATH_SEPARATOR: &str = "::";

/// Primitive parameter kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 8] = [
        Self::Byte,
        Self::Char,
        Self::Double,
        Self::Float,
        Self::Int,
        Self::Long,
        Self::Short,
        Self::Boolean,
    ];

    pub fn marker(self) -> char {
        match self {
            Self::Byte => 'B',
            Self::Char => 'C',
            Self::Double => 'D',
            Self::Float => 'F',
            Self::Int => 'I',
            Self::Long => 'J',
            Self::Short => 'S',
            Self::Boolean => 'Z',
        }
    }

    pub fn from_marker(marker: char) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.marker() == marker)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Double => "double",
            Self::Float => "float",
            Self::Int => "int",
            Self::Long => "long",
            Self::Short => "short",
            Self::Boolean => "boolean",
        }
    }
}

/// Semantic descriptor for one parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Primitive(PrimitiveKind),
    Array(Box<ParamType>),
    /// Any serde-serializable type, identified by its path
    Reference(String),
}

impl ParamType {
    pub fn array_of(element: ParamType) -> Self {
        Self::Array(Box::new(element))
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Primitive(_))
    }

    /// Number of array dimensions wrapping the element type
    pub fn depth(&self) -> usize {
        match self {
            Self::Array(element) => 1 + element.depth(),
            _ => 0,
        }
    }

    fn encode_into(&self, out: &mut String) {
        match self {
            Self::Primitive(kind) => out.push(kind.marker()),
            Self::Array(element) => {
                out.push(ARRAY);
                element.encode_into(out);
            }
            Self::Reference(name) => {
                out.push(REFERENCE_START);
                out.push_str(&name.replace(PATH_SEPARATOR, &WIRE_SEPARATOR.to_string()));
                out.push(REFERENCE_END);
            }
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(kind) => f.write_str(kind.name()),
            Self::Array(element) => write!(f, "{element}[]"),
            Self::Reference(name) => f.write_str(name),
        }
    }
}

/// What an operation returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    Void,
    Value(ParamType),
}

/// A decoded `(params)R` signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub params: Vec<ParamType>,
    pub returns: ReturnKind,
}

impl MethodSignature {
    pub fn new(params: Vec<ParamType>, returns: ReturnKind) -> Self {
        Self { params, returns }
    }

    /// Parse a full method signature, e.g. `(ILString;)V`
    pub fn parse(signature: &str) -> Result<Self> {
        let mut cursor = Cursor::new(signature);
        if cursor.next() != Some('(') {
            return Err(cursor.error(0, "expected '(' at start of signature"));
        }

        let mut params = Vec::new();
        loop {
            match cursor.peek() {
                Some(')') => {
                    cursor.next();
                    break;
                }
                Some(_) => params.push(cursor.param()?),
                None => return Err(cursor.error(cursor.pos, "missing ')' after parameters")),
            }
        }

        let returns = match cursor.peek() {
            Some(VOID) => {
                cursor.next();
                ReturnKind::Void
            }
            Some(_) => ReturnKind::Value(cursor.param()?),
            None => return Err(cursor.error(cursor.pos, "missing return type")),
        };

        if cursor.pos < signature.len() {
            return Err(cursor.error(cursor.pos, "trailing characters after return type"));
        }

        Ok(Self { params, returns })
    }

    pub fn is_void(&self) -> bool {
        self.returns == ReturnKind::Void
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::from("(");
        out.push_str(&encode(&self.params));
        out.push(')');
        match &self.returns {
            ReturnKind::Void => out.push(VOID),
            ReturnKind::Value(ty) => ty.encode_into(&mut out),
        }
        f.write_str(&out)
    }
}

/// Decode the parameter section of a signature (the text between the parentheses)
pub fn decode(params: &str) -> Result<Vec<ParamType>> {
    let mut cursor = Cursor::new(params);
    let mut decoded = Vec::new();
    while cursor.peek().is_some() {
        decoded.push(cursor.param()?);
    }
    Ok(decoded)
}

/// Encode parameters into the compact form accepted by [`decode`]
pub fn encode(params: &[ParamType]) -> String {
    let mut out = String::new();
    for param in params {
        param.encode_into(&mut out);
    }
    out
}

struct Cursor<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, position: usize, reason: &str) -> RabbitCastError {
        RabbitCastError::Signature {
            signature: self.source.to_string(),
            position,
            reason: reason.to_string(),
        }
    }

    /// Consume exactly one parameter type starting at the current position
    fn param(&mut self) -> Result<ParamType> {
        let start = self.pos;
        match self.next() {
            Some(REFERENCE_START) => {
                let source = self.source;
                let rest = &source[self.pos..];
                let end = rest
                    .find(REFERENCE_END)
                    .ok_or_else(|| self.error(start, "unterminated reference type"))?;
                let name = &rest[..end];
                if name.is_empty() {
                    return Err(self.error(start, "empty reference type name"));
                }
                self.pos += end + REFERENCE_END.len_utf8();
                Ok(ParamType::Reference(
                    name.replace(WIRE_SEPARATOR, PATH_SEPARATOR),
                ))
            }
            Some(ARRAY) => {
                let mut depth = 1;
                while self.peek() == Some(ARRAY) {
                    self.next();
                    depth += 1;
                }
                if matches!(self.peek(), None | Some(')')) {
                    return Err(self.error(start, "array marker without element type"));
                }
                let mut ty = self.param()?;
                for _ in 0..depth {
                    ty = ParamType::array_of(ty);
                }
                Ok(ty)
            }
            Some(VOID) => Err(self.error(start, "'V' is only valid as a return type")),
            Some(marker) => PrimitiveKind::from_marker(marker)
                .map(ParamType::Primitive)
                .ok_or_else(|| self.error(start, &format!("unknown type marker '{marker}'"))),
            None => Err(self.error(start, "unexpected end of signature")),
        }
    }
}
