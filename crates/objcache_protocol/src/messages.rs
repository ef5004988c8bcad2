//! Protocol messages between sessions and the authority.
//!
//! Every message travels as a canonical CBOR map `{type, body}`; the body is
//! a map whose layout depends on the type code.

use objcache_codec::{from_cbor, to_canonical_cbor, CodecError, CodecResult, Value};
use objcache_core::{CacheError, ErrorKind, IdOrRecord, QueryInput, Record};

/// A protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheMessage {
    /// Single-object read.
    ReadObject(ReadObjectRequest),
    /// Multi-object read.
    ReadObjects(ReadObjectsRequest),
    /// Create request.
    CreateObject(CreateObjectRequest),
    /// Update request.
    UpdateObject(UpdateObjectRequest),
    /// Delete request.
    DeleteObject(DeleteObjectRequest),
    /// Answer carrying at most one record.
    Object(ObjectResponse),
    /// Answer carrying a list of records.
    Objects(ObjectsResponse),
    /// Answer to a delete.
    Deleted(DeleteResponse),
    /// Rejection of any request.
    Error(ErrorResponse),
    /// Authority push: merge these records.
    ApplyChanges(ApplyChangesPush),
    /// Authority push: drop this object.
    RemoveFromCache(RemoveFromCachePush),
}

impl CacheMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            CacheMessage::ReadObject(_) => 1,
            CacheMessage::ReadObjects(_) => 2,
            CacheMessage::CreateObject(_) => 3,
            CacheMessage::UpdateObject(_) => 4,
            CacheMessage::DeleteObject(_) => 5,
            CacheMessage::Object(_) => 6,
            CacheMessage::Objects(_) => 7,
            CacheMessage::Deleted(_) => 8,
            CacheMessage::Error(_) => 9,
            CacheMessage::ApplyChanges(_) => 10,
            CacheMessage::RemoveFromCache(_) => 11,
        }
    }

    /// Cache the message concerns.
    pub fn cache(&self) -> &str {
        match self {
            CacheMessage::ReadObject(m) => &m.cache,
            CacheMessage::ReadObjects(m) => &m.cache,
            CacheMessage::CreateObject(m) => &m.cache,
            CacheMessage::UpdateObject(m) => &m.cache,
            CacheMessage::DeleteObject(m) => &m.cache,
            CacheMessage::Object(m) => &m.cache,
            CacheMessage::Objects(m) => &m.cache,
            CacheMessage::Deleted(m) => &m.cache,
            CacheMessage::Error(m) => &m.cache,
            CacheMessage::ApplyChanges(m) => &m.cache,
            CacheMessage::RemoveFromCache(m) => &m.cache,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> Vec<u8> {
        let body = match self {
            CacheMessage::ReadObject(m) => m.to_value(),
            CacheMessage::ReadObjects(m) => m.to_value(),
            CacheMessage::CreateObject(m) => m.to_value(),
            CacheMessage::UpdateObject(m) => m.to_value(),
            CacheMessage::DeleteObject(m) => m.to_value(),
            CacheMessage::Object(m) => m.to_value(),
            CacheMessage::Objects(m) => m.to_value(),
            CacheMessage::Deleted(m) => m.to_value(),
            CacheMessage::Error(m) => m.to_value(),
            CacheMessage::ApplyChanges(m) => m.to_value(),
            CacheMessage::RemoveFromCache(m) => m.to_value(),
        };
        let envelope = Value::map(vec![
            (Value::from("type"), Value::Integer(i64::from(self.type_code()))),
            (Value::from("body"), body),
        ]);
        to_canonical_cbor(&envelope)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let map = as_map(&value)?;
        let code = required(map, "type")?
            .as_integer()
            .ok_or_else(|| CodecError::invalid_structure("type must be an integer"))?;
        let body = required(map, "body")?;
        Ok(match code {
            1 => CacheMessage::ReadObject(ReadObjectRequest::from_value(body)?),
            2 => CacheMessage::ReadObjects(ReadObjectsRequest::from_value(body)?),
            3 => CacheMessage::CreateObject(CreateObjectRequest::from_value(body)?),
            4 => CacheMessage::UpdateObject(UpdateObjectRequest::from_value(body)?),
            5 => CacheMessage::DeleteObject(DeleteObjectRequest::from_value(body)?),
            6 => CacheMessage::Object(ObjectResponse::from_value(body)?),
            7 => CacheMessage::Objects(ObjectsResponse::from_value(body)?),
            8 => CacheMessage::Deleted(DeleteResponse::from_value(body)?),
            9 => CacheMessage::Error(ErrorResponse::from_value(body)?),
            10 => CacheMessage::ApplyChanges(ApplyChangesPush::from_value(body)?),
            11 => CacheMessage::RemoveFromCache(RemoveFromCachePush::from_value(body)?),
            other => {
                return Err(CodecError::invalid_structure(format!(
                    "unknown message type {other}"
                )))
            }
        })
    }
}

/// Request for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadObjectRequest {
    /// Target cache.
    pub cache: String,
    /// Identity or filter.
    pub input: QueryInput,
    /// Whether a miss is an empty answer rather than an error.
    pub allow_absent: bool,
}

impl ReadObjectRequest {
    fn to_value(&self) -> Value {
        Value::map(vec![
            (Value::from("cache"), Value::from(self.cache.as_str())),
            (Value::from("input"), query_to_value(&self.input)),
            (Value::from("allow_absent"), Value::Bool(self.allow_absent)),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value)?;
        Ok(Self {
            cache: cache_of(map)?,
            input: query_from_value(required(map, "input")?)?,
            allow_absent: field(map, "allow_absent")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// Request for every object matching an input.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadObjectsRequest {
    /// Target cache.
    pub cache: String,
    /// Identity or filter.
    pub input: QueryInput,
}

impl ReadObjectsRequest {
    fn to_value(&self) -> Value {
        Value::map(vec![
            (Value::from("cache"), Value::from(self.cache.as_str())),
            (Value::from("input"), query_to_value(&self.input)),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value)?;
        Ok(Self {
            cache: cache_of(map)?,
            input: query_from_value(required(map, "input")?)?,
        })
    }
}

/// Request to create an object.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateObjectRequest {
    /// Target cache.
    pub cache: String,
    /// Initial field values.
    pub values: Record,
}

impl CreateObjectRequest {
    fn to_value(&self) -> Value {
        Value::map(vec![
            (Value::from("cache"), Value::from(self.cache.as_str())),
            (Value::from("values"), self.values.to_value()),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value)?;
        Ok(Self {
            cache: cache_of(map)?,
            values: Record::from_value(required(map, "values")?)?,
        })
    }
}

/// Request to update an object.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateObjectRequest {
    /// Target cache.
    pub cache: String,
    /// Partial fields, including the identity field.
    pub values: Record,
}

impl UpdateObjectRequest {
    fn to_value(&self) -> Value {
        Value::map(vec![
            (Value::from("cache"), Value::from(self.cache.as_str())),
            (Value::from("values"), self.values.to_value()),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value)?;
        Ok(Self {
            cache: cache_of(map)?,
            values: Record::from_value(required(map, "values")?)?,
        })
    }
}

/// Request to delete an object.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteObjectRequest {
    /// Target cache.
    pub cache: String,
    /// Identity or a record carrying it.
    pub target: IdOrRecord,
}

impl DeleteObjectRequest {
    fn to_value(&self) -> Value {
        let target = match &self.target {
            IdOrRecord::Id(id) => Value::map(vec![(Value::from("id"), id.clone())]),
            IdOrRecord::Record(record) => {
                Value::map(vec![(Value::from("record"), record.to_value())])
            }
        };
        Value::map(vec![
            (Value::from("cache"), Value::from(self.cache.as_str())),
            (Value::from("target"), target),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value)?;
        let target = as_map(required(map, "target")?)?;
        let target = if let Some(id) = field(target, "id") {
            IdOrRecord::Id(id.clone())
        } else if let Some(record) = field(target, "record") {
            IdOrRecord::Record(Record::from_value(record)?)
        } else {
            return Err(CodecError::invalid_structure("target needs id or record"));
        };
        Ok(Self {
            cache: cache_of(map)?,
            target,
        })
    }
}

/// Answer carrying at most one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectResponse {
    /// Cache name.
    pub cache: String,
    /// The record, if any.
    pub record: Option<Record>,
}

impl ObjectResponse {
    fn to_value(&self) -> Value {
        let mut pairs = vec![(Value::from("cache"), Value::from(self.cache.as_str()))];
        if let Some(ref record) = self.record {
            pairs.push((Value::from("record"), record.to_value()));
        }
        Value::map(pairs)
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value)?;
        Ok(Self {
            cache: cache_of(map)?,
            record: field(map, "record").map(Record::from_value).transpose()?,
        })
    }
}

/// Answer carrying a list of records.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectsResponse {
    /// Cache name.
    pub cache: String,
    /// Records in answer order.
    pub records: Vec<Record>,
}

impl ObjectsResponse {
    fn to_value(&self) -> Value {
        Value::map(vec![
            (Value::from("cache"), Value::from(self.cache.as_str())),
            (Value::from("records"), records_to_value(&self.records)),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value)?;
        Ok(Self {
            cache: cache_of(map)?,
            records: records_from_value(required(map, "records")?)?,
        })
    }
}

/// Answer to a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResponse {
    /// Cache name.
    pub cache: String,
    /// Rows removed from the store.
    pub affected: u64,
}

impl DeleteResponse {
    fn to_value(&self) -> Value {
        Value::map(vec![
            (Value::from("cache"), Value::from(self.cache.as_str())),
            (
                Value::from("affected"),
                Value::Integer(i64::try_from(self.affected).unwrap_or(i64::MAX)),
            ),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value)?;
        let affected = required(map, "affected")?
            .as_integer()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                CodecError::invalid_structure("affected must be a non-negative integer")
            })?;
        Ok(Self {
            cache: cache_of(map)?,
            affected,
        })
    }
}

/// Rejection of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// Cache name (empty if the request could not be decoded).
    pub cache: String,
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorResponse {
    /// Builds the wire form of a cache error.
    pub fn from_error(cache: impl Into<String>, error: &CacheError) -> Self {
        Self {
            cache: cache.into(),
            kind: error.kind(),
            message: error.detail(),
        }
    }

    /// Rebuilds the cache error this response carries.
    pub fn into_error(self) -> CacheError {
        CacheError::from_kind(self.kind, self.cache, self.message)
    }

    fn to_value(&self) -> Value {
        Value::map(vec![
            (Value::from("cache"), Value::from(self.cache.as_str())),
            (Value::from("kind"), Value::Integer(i64::from(self.kind.code()))),
            (Value::from("message"), Value::from(self.message.as_str())),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value)?;
        let code = required(map, "kind")?
            .as_integer()
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| CodecError::invalid_structure("kind must be a small integer"))?;
        Ok(Self {
            cache: cache_of(map)?,
            kind: ErrorKind::from_code(code),
            message: field(map, "message")
                .and_then(Value::as_text)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// Push telling a session to merge records.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyChangesPush {
    /// Cache name.
    pub cache: String,
    /// Records to merge.
    pub records: Vec<Record>,
}

impl ApplyChangesPush {
    fn to_value(&self) -> Value {
        Value::map(vec![
            (Value::from("cache"), Value::from(self.cache.as_str())),
            (Value::from("records"), records_to_value(&self.records)),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value)?;
        Ok(Self {
            cache: cache_of(map)?,
            records: records_from_value(required(map, "records")?)?,
        })
    }
}

/// Push telling a session to drop an object.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveFromCachePush {
    /// Cache name.
    pub cache: String,
    /// Identity of the object.
    pub id: Value,
}

impl RemoveFromCachePush {
    fn to_value(&self) -> Value {
        Value::map(vec![
            (Value::from("cache"), Value::from(self.cache.as_str())),
            (Value::from("id"), self.id.clone()),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value)?;
        Ok(Self {
            cache: cache_of(map)?,
            id: required(map, "id")?.clone(),
        })
    }
}

fn as_map(value: &Value) -> CodecResult<&[(Value, Value)]> {
    value
        .as_map()
        .ok_or_else(|| CodecError::invalid_structure("expected map"))
}

fn field<'a>(map: &'a [(Value, Value)], name: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(name))
        .map(|(_, v)| v)
}

fn required<'a>(map: &'a [(Value, Value)], name: &str) -> CodecResult<&'a Value> {
    field(map, name).ok_or_else(|| CodecError::invalid_structure(format!("missing {name}")))
}

fn cache_of(map: &[(Value, Value)]) -> CodecResult<String> {
    required(map, "cache")?
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| CodecError::invalid_structure("cache must be text"))
}

fn query_to_value(input: &QueryInput) -> Value {
    match input {
        QueryInput::Id(id) => Value::map(vec![(Value::from("id"), id.clone())]),
        QueryInput::Filter(fields) => Value::map(vec![(Value::from("filter"), fields.to_value())]),
        QueryInput::All => Value::map(vec![(Value::from("all"), Value::Bool(true))]),
    }
}

fn query_from_value(value: &Value) -> CodecResult<QueryInput> {
    let map = as_map(value)?;
    if let Some(id) = field(map, "id") {
        Ok(QueryInput::Id(id.clone()))
    } else if let Some(filter) = field(map, "filter") {
        Ok(QueryInput::Filter(Record::from_value(filter)?))
    } else if field(map, "all").is_some() {
        Ok(QueryInput::All)
    } else {
        Err(CodecError::invalid_structure("query input needs id, filter or all"))
    }
}

fn records_to_value(records: &[Record]) -> Value {
    Value::Array(records.iter().map(Record::to_value).collect())
}

fn records_from_value(value: &Value) -> CodecResult<Vec<Record>> {
    value
        .as_array()
        .ok_or_else(|| CodecError::invalid_structure("records must be an array"))?
        .iter()
        .map(Record::from_value)
        .collect()
}
