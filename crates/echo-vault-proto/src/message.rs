// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request and response envelopes that ride inside a wire frame body.

use crate::status::Status;
use crate::value::{ProtoError, Value};

/// A decoded client request.
///
/// Wire shape: a CBOR map with a top-level `cmd` string and `data`
/// payload, plus an `args` sub-map carrying `db`/`path` and any remaining
/// command-specific keyword arguments — the same `CMD_KW_CMD`/
/// `CMD_KW_ARGS` split the original protocol uses.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// The command name, e.g. `"create_dataset"`.
    pub command: String,
    /// Target database name, if the command operates on one.
    pub database: Option<String>,
    /// Target node path within the database, if the command operates on
    /// one.
    pub path: Option<String>,
    /// The `data` payload, if the command carries one.
    pub data: Option<Value>,
    /// Remaining keyword arguments, in the order the client sent them.
    pub kwargs: Vec<(String, Value)>,
}

impl Request {
    /// Builds a request naming only a command, with no arguments.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            database: None,
            path: None,
            data: None,
            kwargs: Vec::new(),
        }
    }

    /// Looks up a keyword argument by name.
    #[must_use]
    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Serializes this request to its wire [`Value`] representation.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut args = Vec::new();
        if let Some(db) = &self.database {
            args.push(("db".to_owned(), Value::Str(db.clone())));
        }
        if let Some(path) = &self.path {
            args.push(("path".to_owned(), Value::Str(path.clone())));
        }
        args.extend(self.kwargs.iter().cloned());

        let mut entries = vec![
            ("cmd".to_owned(), Value::Str(self.command.clone())),
            ("args".to_owned(), Value::Map(args)),
        ];
        if let Some(data) = &self.data {
            entries.push(("data".to_owned(), data.clone()));
        }
        Value::Map(entries)
    }

    /// Parses a request out of its wire [`Value`] representation.
    pub fn from_value(value: Value) -> Result<Self, ProtoError> {
        let Value::Map(entries) = value else {
            return Err(ProtoError::Decode("request body was not a map".to_owned()));
        };

        let mut command = None;
        let mut database = None;
        let mut path = None;
        let mut data = None;
        let mut kwargs = Vec::new();

        for (key, val) in entries {
            match key.as_str() {
                "cmd" => {
                    command = val.as_str().map(str::to_owned);
                }
                "args" => {
                    let Value::Map(arg_entries) = val else {
                        return Err(ProtoError::Decode("request args was not a map".to_owned()));
                    };
                    for (k, v) in arg_entries {
                        match k.as_str() {
                            "db" => database = v.as_str().map(str::to_owned),
                            "path" => path = v.as_str().map(str::to_owned),
                            _ => kwargs.push((k, v)),
                        }
                    }
                }
                "data" => {
                    data = Some(val);
                }
                _ => {}
            }
        }

        let command =
            command.ok_or_else(|| ProtoError::Decode("request missing cmd field".to_owned()))?;

        Ok(Self {
            command,
            database,
            path,
            data,
            kwargs,
        })
    }

    /// Encodes this request to CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        crate::value::encode(&self.to_value())
    }

    /// Decodes a request from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        Self::from_value(crate::value::decode(bytes)?)
    }
}

/// A response to a client request: a [`Status`] and an optional payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Outcome of the request.
    pub status: Status,
    /// Result payload; absent for purely side-effecting commands that
    /// succeeded with nothing to report.
    pub data: Option<Value>,
}

impl Response {
    /// Builds a success response with no payload.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: Status::Ok,
            data: None,
        }
    }

    /// Builds a response carrying the given status and payload.
    #[must_use]
    pub const fn new(status: Status, data: Option<Value>) -> Self {
        Self { status, data }
    }

    /// Builds an error response with no payload.
    #[must_use]
    pub const fn error(status: Status) -> Self {
        Self { status, data: None }
    }

    /// Serializes this response to its wire [`Value`] representation.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut entries = vec![(
            "status".to_owned(),
            Value::Int(i64::from(self.status.code())),
        )];
        if let Some(data) = &self.data {
            entries.push(("data".to_owned(), data.clone()));
        }
        Value::Map(entries)
    }

    /// Parses a response out of its wire [`Value`] representation.
    pub fn from_value(value: Value) -> Result<Self, ProtoError> {
        let Value::Map(entries) = value else {
            return Err(ProtoError::Decode("response body was not a map".to_owned()));
        };

        let mut status = None;
        let mut data = None;
        for (key, val) in entries {
            match key.as_str() {
                "status" => {
                    let code = val
                        .as_int()
                        .ok_or_else(|| ProtoError::Decode("status was not an integer".to_owned()))?;
                    let code = u16::try_from(code)
                        .map_err(|_| ProtoError::Decode("status out of range".to_owned()))?;
                    status = Status::from_code(code);
                }
                "data" => data = Some(val),
                _ => {}
            }
        }

        let status =
            status.ok_or_else(|| ProtoError::Decode("response missing status field".to_owned()))?;
        Ok(Self { status, data })
    }

    /// Encodes this response to CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        crate::value::encode(&self.to_value())
    }

    /// Decodes a response from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        Self::from_value(crate::value::decode(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_bytes() {
        let mut req = Request::new("create_dataset");
        req.database = Some("weather".to_owned());
        req.path = Some("/station1/temp".to_owned());
        req.data = Some(Value::Int(42));
        req.kwargs.push(("dtype".to_owned(), Value::Str("float64".to_owned())));

        let bytes = req.encode().unwrap();
        let decoded = Request::decode(&bytes).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn request_wire_shape_nests_db_and_path_under_args() {
        let mut req = Request::new("create_dataset");
        req.database = Some("weather".to_owned());
        req.path = Some("/station1/temp".to_owned());
        req.kwargs.push(("dtype".to_owned(), Value::Str("float64".to_owned())));

        let Value::Map(entries) = req.to_value() else {
            panic!("expected Value::Map");
        };
        assert_eq!(
            entries.iter().find(|(k, _)| k == "cmd").map(|(_, v)| v.clone()),
            Some(Value::Str("create_dataset".to_owned()))
        );
        let Some((_, Value::Map(args))) = entries.iter().find(|(k, _)| k == "args") else {
            panic!("expected top-level args map");
        };
        assert_eq!(
            args.iter().find(|(k, _)| k == "db").map(|(_, v)| v.clone()),
            Some(Value::Str("weather".to_owned()))
        );
        assert_eq!(
            args.iter().find(|(k, _)| k == "path").map(|(_, v)| v.clone()),
            Some(Value::Str("/station1/temp".to_owned()))
        );
        assert_eq!(
            args.iter().find(|(k, _)| k == "dtype").map(|(_, v)| v.clone()),
            Some(Value::Str("float64".to_owned()))
        );
        assert!(entries.iter().all(|(k, _)| k != "db" && k != "path" && k != "dtype"));
    }

    #[test]
    fn request_parses_a_cmd_args_envelope() {
        let value = Value::Map(vec![
            ("cmd".to_owned(), Value::Str("open_db".to_owned())),
            (
                "args".to_owned(),
                Value::Map(vec![("db".to_owned(), Value::Str("weather".to_owned()))]),
            ),
        ]);
        let req = Request::from_value(value).unwrap();
        assert_eq!(req.command, "open_db");
        assert_eq!(req.database, Some("weather".to_owned()));
    }

    #[test]
    fn response_round_trips_through_bytes() {
        let resp = Response::new(Status::Created, Some(Value::Str("/a/b".to_owned())));
        let bytes = resp.encode().unwrap();
        assert_eq!(Response::decode(&bytes).unwrap(), resp);
    }

    #[test]
    fn response_without_data_round_trips() {
        let resp = Response::error(Status::NodeNotFound);
        let bytes = resp.encode().unwrap();
        assert_eq!(Response::decode(&bytes).unwrap(), resp);
    }

    #[test]
    fn request_without_command_is_rejected() {
        let value = Value::Map(vec![("db".to_owned(), Value::Str("x".to_owned()))]);
        assert!(Request::from_value(value).is_err());
    }
}
