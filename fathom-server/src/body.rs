//! Request body decoding by Content-Type.

use crate::error::{Result, ServerError};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use fathom_core::{Object, Value};

const JSON: &str = "application/json";
const MSGPACK: &str = "application/x-msgpack";

/// Decode a request body into a tagged value per its Content-Type.
///
/// A missing Content-Type defaults to JSON; anything other than JSON
/// or MsgPack is a 415.
pub fn decode(headers: &HeaderMap, body: &[u8]) -> Result<Value> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
        .unwrap_or_else(|| JSON.to_string());

    match content_type.as_str() {
        JSON => Ok(serde_json::from_slice(body)?),
        MSGPACK => Ok(rmp_serde::from_slice(body)?),
        other => Err(ServerError::UnsupportedMediaType(other.to_string())),
    }
}

/// Decode a body that must be an object.
pub fn decode_object(headers: &HeaderMap, body: &[u8]) -> Result<Object> {
    match decode(headers, body)? {
        Value::Map(obj) => Ok(obj),
        other => Err(ServerError::bad_request(format!(
            "body must be an object, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_default() {
        let headers = HeaderMap::new();
        let v = decode(&headers, br#"{"a":1}"#).unwrap();
        assert!(v.is_map());
    }

    #[test]
    fn test_msgpack() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/x-msgpack".parse().unwrap());
        let original = Value::from_json(r#"{"a":1,"b":"x"}"#).unwrap();
        let bytes = rmp_serde::to_vec(&original).unwrap();
        assert_eq!(decode(&headers, &bytes).unwrap(), original);
    }

    #[test]
    fn test_unknown_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "text/csv".parse().unwrap());
        let err = decode(&headers, b"a,b").unwrap_err();
        assert!(matches!(err, ServerError::UnsupportedMediaType(_)));
    }

    #[test]
    fn test_charset_parameter_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            "application/json; charset=utf-8".parse().unwrap(),
        );
        assert!(decode(&headers, b"{}").unwrap().is_map());
    }
}
