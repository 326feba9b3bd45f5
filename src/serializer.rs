use std::collections::BTreeMap;

use crate::dataset::Record;
use crate::errors::SerializerError;

pub fn encode(record: &Record) -> Result<String, SerializerError> {
    serde_json::to_string(record).map_err(|err| SerializerError::Encode(err.to_string()))
}

pub fn decode(payload: &str) -> Result<BTreeMap<String, String>, SerializerError> {
    serde_json::from_str(payload).map_err(|err| SerializerError::Decode(err.to_string()))
}
