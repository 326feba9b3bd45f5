use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("StrayQuote unexpected or unterminated quote on line {line}")]
    StrayQuote { line: usize },
    #[error("Malformed couldn't parse input on line {line}")]
    Malformed { line: usize },
}

#[derive(Error, Debug, PartialEq)]
pub enum DatasetError {
    #[error("Empty dataset has no header row")]
    Empty,
    #[error("Parse {0}")]
    Parse(#[from] ParseError),
    #[error("EmptyHeader column {0} has no name")]
    EmptyHeader(usize),
    #[error("DuplicateHeader column `{0}` appears more than once")]
    DuplicateHeader(String),
    #[error("ColumnCount row {row} has {found} fields, expected {expected}")]
    ColumnCount {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("EmptyId row {0} has an empty id")]
    EmptyId(usize),
    #[error("DuplicateId id `{id}` on row {row} was already used")]
    DuplicateId { id: String, row: usize },
    #[error("ReadFailed couldn't read {path}: {reason}")]
    ReadFailed { path: String, reason: String },
}

#[derive(Error, Debug, PartialEq)]
pub enum SerializerError {
    #[error("InvalidValue couldn't encode record: {0}")]
    Encode(String),
    #[error("InvalidValue couldn't decode payload: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("WrongType operation against key `{0}` holding the wrong kind of value")]
    WrongType(String),
    #[error("NotInteger value at key `{0}` is not an integer or out of range")]
    NotInteger(String),
    #[error("Redis {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Error, Debug)]
pub enum PubSubError {
    #[error("ErrorSubscribe couldn't subscribe to channel `{channel}`: {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: redis::RedisError,
    },
    #[error("Redis {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("UnknownColumn dataset has no column `{0}`")]
    UnknownColumn(String),
    #[error("Store {0}")]
    Store(#[from] StoreError),
    #[error("PubSub {0}")]
    PubSub(#[from] PubSubError),
    #[error("Serializer {0}")]
    Serializer(#[from] SerializerError),
    #[error("Collector subscriber task failed: {0}")]
    Collector(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Env {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_subscribe_error_keeps_redis_cause() {
        let err = PubSubError::Subscribe {
            channel: "records".to_owned(),
            source: redis::RedisError::from((redis::ErrorKind::IoError, "connection reset")),
        };

        assert!(err.to_string().starts_with("ErrorSubscribe couldn't subscribe to channel `records`: "));
        assert!(err.to_string().contains("connection reset"));
        let cause = err.source().unwrap();
        assert!(cause.downcast_ref::<redis::RedisError>().is_some());
    }
}
