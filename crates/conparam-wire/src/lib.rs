// Envelope codec: one flat JSON object per datagram.
use bytes::Bytes;

pub use serde_json::Value;

/// Field that turns an envelope into a namespace registration.
pub const NAMESPACE_FIELD: &str = "__namespace__";

/// Parameter mapping carried by updates and snapshot replies.
pub type Params = serde_json::Map<String, Value>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to deserialize envelope: {0}")]
    Deserialize(serde_json::Error),
    #[error("failed to serialize envelope: {0}")]
    Serialize(serde_json::Error),
    #[error("envelope is not a JSON object (got {0})")]
    NotAnObject(&'static str),
    #[error("namespace field must be a string (got {0})")]
    InvalidNamespace(&'static str),
    #[error("parameter key `{NAMESPACE_FIELD}` is reserved")]
    ReservedKey,
}

/// Decoded datagram.
///
/// ```
/// use conparam_wire::{Envelope, Value};
///
/// let join = Envelope::decode(br#"{"__namespace__":"roomA"}"#).expect("decode");
/// assert_eq!(join, Envelope::register("roomA"));
///
/// let update = Envelope::decode(br#"{"brightness":5}"#).expect("decode");
/// let Envelope::Update { params } = update else {
///     panic!("expected update");
/// };
/// assert_eq!(params.get("brightness"), Some(&Value::from(5)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    // Join a namespace; any other fields are ignored.
    Register { namespace: String },
    // Key/value updates for the sender's namespace.
    Update { params: Params },
}

impl Envelope {
    pub fn register(namespace: impl Into<String>) -> Self {
        Self::Register {
            namespace: namespace.into(),
        }
    }

    pub fn update(params: Params) -> Self {
        Self::Update { params }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes).map_err(Error::Deserialize)?;
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => return Err(Error::NotAnObject(value_kind(&other))),
        };
        // Presence of the reserved field wins over everything else in the object.
        match fields.remove(NAMESPACE_FIELD) {
            Some(Value::String(namespace)) => Ok(Self::Register { namespace }),
            Some(other) => Err(Error::InvalidNamespace(value_kind(&other))),
            None => Ok(Self::Update { params: fields }),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Self::Register { namespace } => {
                let mut fields = Params::new();
                fields.insert(
                    NAMESPACE_FIELD.to_string(),
                    Value::String(namespace.clone()),
                );
                encode_params(&fields)
            }
            Self::Update { params } => {
                if params.contains_key(NAMESPACE_FIELD) {
                    return Err(Error::ReservedKey);
                }
                encode_params(params)
            }
        }
    }
}

/// Encode a parameter mapping as a bare JSON object (snapshot replies).
pub fn encode_params(params: &Params) -> Result<Bytes> {
    serde_json::to_vec(params)
        .map(Bytes::from)
        .map_err(Error::Serialize)
}

/// Short type name used in error messages and logs.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
