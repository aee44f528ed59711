use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::value::Value;

/// Wire payload of one remote operation call.
///
/// Carries the signature text the sender was compiled against so the receiver can
/// refuse payloads built for a different parameter list. No ids or timestamps:
/// the same call always encodes to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Operation name as declared
    pub operation: String,
    /// Compact signature of the declaration, e.g. `(ILString;)V`
    pub signature: String,
    /// Boxed arguments in declaration order
    pub args: Vec<Value>,
}

impl Envelope {
    pub fn new(operation: impl Into<String>, signature: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            operation: operation.into(),
            signature: signature.into(),
            args,
        }
    }

    /// Serialize envelope to bytes for transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize envelope from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
