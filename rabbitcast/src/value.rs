//! Boxed argument values.
//!
//! Generated stubs box every argument into a [`Value`] before sending, and
//! generated invokers unbox them again on the receiving side. Primitive kinds
//! keep their own variant so the payload can be checked against the declared
//! [`ParamType`]; everything else travels as a serde value.

use std::any::Any;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{RabbitCastError, Result};
use crate::signature::{ParamType, PrimitiveKind};

/// One boxed argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Byte(i8),
    Char(char),
    #[serde(with = "float")]
    Double(f64),
    #[serde(with = "float")]
    Float(f32),
    Int(i32),
    Long(i64),
    Short(i16),
    Boolean(bool),
    Array(Vec<Value>),
    Object(serde_json::Value),
}

impl Value {
    /// Box a reference-type argument
    pub fn reference<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::Object(serde_json::to_value(value)?))
    }

    /// Unbox a reference-type argument
    pub fn into_reference<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Self::Object(value) => Ok(serde_json::from_value(value)?),
            other => Err(RabbitCastError::invalid_message(format!(
                "expected object, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn into_array(self) -> Result<Vec<Value>> {
        match self {
            Self::Array(values) => Ok(values),
            other => Err(RabbitCastError::invalid_message(format!(
                "expected array, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        Some(match self {
            Self::Byte(_) => PrimitiveKind::Byte,
            Self::Char(_) => PrimitiveKind::Char,
            Self::Double(_) => PrimitiveKind::Double,
            Self::Float(_) => PrimitiveKind::Float,
            Self::Int(_) => PrimitiveKind::Int,
            Self::Long(_) => PrimitiveKind::Long,
            Self::Short(_) => PrimitiveKind::Short,
            Self::Boolean(_) => PrimitiveKind::Boolean,
            Self::Array(_) | Self::Object(_) => return None,
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            primitive => primitive.primitive_kind().map(PrimitiveKind::name).unwrap_or("value"),
        }
    }

    /// Whether this value has the shape `ty` describes
    pub fn conforms_to(&self, ty: &ParamType) -> bool {
        match (self, ty) {
            (Self::Array(values), ParamType::Array(element)) => {
                values.iter().all(|value| value.conforms_to(element))
            }
            (Self::Object(_), ParamType::Reference(_)) => true,
            (value, ParamType::Primitive(kind)) => value.primitive_kind() == Some(*kind),
            _ => false,
        }
    }
}

/// JSON has no NaN or infinities, so non-finite floats travel as string tokens
mod float {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub trait Float: Copy + Serialize + for<'de> Deserialize<'de> {
        const NAN: Self;
        const INFINITY: Self;
        const NEG_INFINITY: Self;

        fn is_nan(self) -> bool;
        fn is_finite(self) -> bool;
        fn is_sign_negative(self) -> bool;
    }

    macro_rules! float {
        ($ty:ident) => {
            impl Float for $ty {
                const NAN: Self = $ty::NAN;
                const INFINITY: Self = $ty::INFINITY;
                const NEG_INFINITY: Self = $ty::NEG_INFINITY;

                fn is_nan(self) -> bool {
                    $ty::is_nan(self)
                }

                fn is_finite(self) -> bool {
                    $ty::is_finite(self)
                }

                fn is_sign_negative(self) -> bool {
                    $ty::is_sign_negative(self)
                }
            }
        };
    }

    float!(f64);
    float!(f32);

    const NAN: &str = "NaN";
    const INFINITY: &str = "Infinity";
    const NEG_INFINITY: &str = "-Infinity";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr<F> {
        Number(F),
        Token(String),
    }

    pub fn serialize<F: Float, S: Serializer>(value: &F, serializer: S) -> Result<S::Ok, S::Error> {
        let value = *value;
        if value.is_finite() {
            value.serialize(serializer)
        } else if value.is_nan() {
            serializer.serialize_str(NAN)
        } else if value.is_sign_negative() {
            serializer.serialize_str(NEG_INFINITY)
        } else {
            serializer.serialize_str(INFINITY)
        }
    }

    pub fn deserialize<'de, F: Float, D: Deserializer<'de>>(deserializer: D) -> Result<F, D::Error> {
        match Repr::<F>::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Token(token) => match token.as_str() {
                NAN => Ok(F::NAN),
                INFINITY => Ok(F::INFINITY),
                NEG_INFINITY => Ok(F::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid float token '{other}'"))),
            },
        }
    }
}

/// Check an argument list against a parameter schema, positionally
pub fn check_arguments(operation: &str, params: &[ParamType], args: &[Value]) -> Result<()> {
    if params.len() != args.len() {
        return Err(RabbitCastError::schema_mismatch(
            operation,
            format!("expected {} arguments, found {}", params.len(), args.len()),
        ));
    }
    for (index, (param, arg)) in params.iter().zip(args).enumerate() {
        if !arg.conforms_to(param) {
            return Err(RabbitCastError::schema_mismatch(
                operation,
                format!("argument {index} should be {param}, found {}", arg.kind_name()),
            ));
        }
    }
    Ok(())
}

/// Rust types that travel as a primitive kind
pub trait Primitive: Sized {
    const KIND: PrimitiveKind;

    fn boxed(self) -> Value;

    fn unboxed(value: Value) -> Result<Self>;
}

macro_rules! primitive {
    ($ty:ty, $variant:ident, $kind:ident) => {
        impl Primitive for $ty {
            const KIND: PrimitiveKind = PrimitiveKind::$kind;

            fn boxed(self) -> Value {
                Value::$variant(self)
            }

            fn unboxed(value: Value) -> Result<Self> {
                match value {
                    Value::$variant(inner) => Ok(inner),
                    other => Err(RabbitCastError::invalid_message(format!(
                        "expected {}, found {}",
                        PrimitiveKind::$kind.name(),
                        other.kind_name()
                    ))),
                }
            }
        }

        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value)
            }
        }
    };
}

primitive!(i8, Byte, Byte);
primitive!(char, Char, Char);
primitive!(f64, Double, Double);
primitive!(f32, Float, Float);
primitive!(i32, Int, Int);
primitive!(i64, Long, Long);
primitive!(i16, Short, Short);
primitive!(bool, Boolean, Boolean);

/// Positional reader over an unpacked argument list
#[derive(Debug)]
pub struct Arguments {
    operation: &'static str,
    values: std::vec::IntoIter<Value>,
    position: usize,
}

impl Arguments {
    pub fn new(operation: &'static str, values: Vec<Value>) -> Self {
        Self {
            operation,
            values: values.into_iter(),
            position: 0,
        }
    }

    /// Take the next argument
    pub fn next_value(&mut self) -> Result<Value> {
        let value = self.values.next().ok_or_else(|| {
            RabbitCastError::schema_mismatch(
                self.operation,
                format!("missing argument {}", self.position),
            )
        })?;
        self.position += 1;
        Ok(value)
    }

    /// Fail if arguments are left over
    pub fn finish(mut self) -> Result<()> {
        match self.values.next() {
            None => Ok(()),
            Some(_) => Err(RabbitCastError::schema_mismatch(
                self.operation,
                format!("unexpected argument {}", self.position),
            )),
        }
    }
}

/// Recover the concrete receiver a handler was registered with
pub fn downcast_receiver<T: Any + Send + Sync>(
    operation: &'static str,
    receiver: Arc<dyn Any + Send + Sync>,
) -> Result<Arc<T>> {
    receiver
        .downcast::<T>()
        .map_err(|_| RabbitCastError::ReceiverMismatch {
            operation: operation.to_string(),
            expected: std::any::type_name::<T>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_box_to_their_kind() {
        assert_eq!(42i32.boxed(), Value::Int(42));
        assert_eq!('x'.boxed(), Value::Char('x'));
        assert_eq!(Value::from(true), Value::Boolean(true));
        assert_eq!(i64::unboxed(Value::Long(7)).unwrap(), 7);
        assert!(i32::unboxed(Value::Long(7)).is_err());
    }

    #[test]
    fn test_non_finite_floats_survive_the_wire() {
        let values = vec![
            Value::Double(f64::NAN),
            Value::Double(f64::INFINITY),
            Value::Double(f64::NEG_INFINITY),
            Value::Float(f32::NAN),
            Value::Float(f32::NEG_INFINITY),
            Value::Double(-0.5),
            Value::Float(1.25),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert!(!json.contains("null"), "{json}");

        let decoded: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert!(matches!(decoded[0], Value::Double(v) if v.is_nan()));
        assert_eq!(decoded[1], Value::Double(f64::INFINITY));
        assert_eq!(decoded[2], Value::Double(f64::NEG_INFINITY));
        assert!(matches!(decoded[3], Value::Float(v) if v.is_nan()));
        assert_eq!(decoded[4], Value::Float(f32::NEG_INFINITY));
        assert_eq!(decoded[5..], values[5..]);
    }

    #[test]
    fn test_unknown_float_token_is_rejected() {
        let err = serde_json::from_str::<Value>(r#"{"type":"double","value":"lots"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid float token"));
    }

    #[test]
    fn test_reference_round_trip() {
        let value = Value::reference("hi").unwrap();
        assert_eq!(value, Value::Object(serde_json::json!("hi")));
        assert_eq!(value.into_reference::<String>().unwrap(), "hi");
    }

    #[test]
    fn test_conformance_checks_nested_arrays() {
        let ty = ParamType::array_of(ParamType::array_of(ParamType::Primitive(PrimitiveKind::Int)));
        let good = Value::Array(vec![Value::Array(vec![Value::Int(1), Value::Int(2)]), Value::Array(vec![])]);
        let bad = Value::Array(vec![Value::Array(vec![Value::Long(1)])]);
        assert!(good.conforms_to(&ty));
        assert!(!bad.conforms_to(&ty));
        assert!(!Value::Int(1).conforms_to(&ParamType::reference("String")));
    }

    #[test]
    fn test_check_arguments_reports_position() {
        let params = vec![
            ParamType::Primitive(PrimitiveKind::Int),
            ParamType::reference("String"),
        ];
        assert!(check_arguments("notify", &params, &[Value::Int(1), Value::reference("a").unwrap()]).is_ok());

        let err = check_arguments("notify", &params, &[Value::Int(1), Value::Int(2)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Schema mismatch for 'notify': argument 1 should be String, found int"
        );
        assert!(check_arguments("notify", &params, &[Value::Int(1)]).is_err());
    }

    #[test]
    fn test_arguments_reader() {
        let mut args = Arguments::new("notify", vec![Value::Int(1), Value::Boolean(false)]);
        assert_eq!(args.next_value().unwrap(), Value::Int(1));
        assert!(args.finish().is_err());

        let mut args = Arguments::new("notify", vec![]);
        assert!(args.next_value().is_err());
    }

    #[test]
    fn test_downcast_receiver() {
        let receiver: Arc<dyn Any + Send + Sync> = Arc::new(5u32);
        assert_eq!(*downcast_receiver::<u32>("op", receiver.clone()).unwrap(), 5);
        assert!(downcast_receiver::<String>("op", receiver).is_err());
    }
}
