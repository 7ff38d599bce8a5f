//! Response envelope validation
//!
//! Admin API responses are wrapped as `{"ok": bool, "result": ...}`, except list
//! endpoints that answer with a bare JSON array, which is taken as the result itself.
//! The envelope is not part of any typed schema, so its shape is checked here before any
//! entity is decoded. Only the envelope is validated; entity decoding is done by the callers.

use crate::error::{ErrorEnvelope, HttpError};
use crate::streams::{ClusterId, ReplicationStream};
use serde::Deserialize;
use serde_json::Value;

/// Validate an envelope and return its `result` payload
///
/// A bare array is returned as-is.
///
/// # Errors
///
/// * `HttpError::MalformedResponse` if the body is neither an array nor an object with a
///   boolean `ok`
/// * `HttpError::ResponseNotOk` if `ok` is false
pub fn unwrap_envelope(endpoint: &str, status: u16, json: Value) -> Result<Value, HttpError> {
    if json.is_array() {
        return Ok(json);
    }

    let ok = match json.get("ok") {
        Some(Value::Bool(ok)) => *ok,
        _ => {
            return Err(HttpError::MalformedResponse {
                message: "invalid http envelope".to_string(),
                endpoint: endpoint.to_string(),
                response_json: json,
            })
        }
    };

    if !ok {
        // A malformed error body still counts as a not-ok response
        let response = serde_json::from_value::<ErrorEnvelope>(json).unwrap_or_default();
        return Err(HttpError::ResponseNotOk {
            endpoint: endpoint.to_string(),
            status,
            response,
        });
    }

    match json {
        Value::Object(mut map) => Ok(map.remove("result").unwrap_or(Value::Null)),
        _ => Ok(Value::Null),
    }
}

/// Parse a raw body into JSON, mapping non-JSON bodies to a malformed-envelope error
pub fn parse_body(endpoint: &str, body: &str) -> Result<Value, HttpError> {
    serde_json::from_str(body).map_err(|e| HttpError::MalformedResponse {
        message: format!("response is not JSON: {}", e),
        endpoint: endpoint.to_string(),
        response_json: Value::String(body.to_string()),
    })
}

/// Pull the entity list out of a result that is either a bare array or `{<key>: [...]}`
fn entities(endpoint: &str, key: &str, result: Value) -> Result<Vec<Value>, HttpError> {
    match result {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => {
                map.insert(key.to_string(), other);
                Err(not_an_array(endpoint, Value::Object(map)))
            }
            None => Err(not_an_array(endpoint, Value::Object(map))),
        },
        other => Err(not_an_array(endpoint, other)),
    }
}

fn not_an_array(endpoint: &str, result: Value) -> HttpError {
    HttpError::MalformedResponse {
        message: format!("expected entities to be an array, got {}", result),
        endpoint: endpoint.to_string(),
        response_json: result,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClusterEntity {
    Id(String),
    Object { id: String },
}

/// Decode a cluster list: strings, or objects carrying an `id`
pub fn extract_clusters(endpoint: &str, result: Value) -> Result<Vec<ClusterId>, HttpError> {
    entities(endpoint, "clusters", result)?
        .into_iter()
        .map(|e| {
            serde_json::from_value::<ClusterEntity>(e)
                .map(|c| match c {
                    ClusterEntity::Id(id) | ClusterEntity::Object { id } => id,
                })
                .map_err(|err| HttpError::Decode {
                    endpoint: endpoint.to_string(),
                    entity: "cluster",
                    reason: err.to_string(),
                })
        })
        .collect()
}

/// Decode a stream list, stamping records without a cluster with the one they were fetched for
pub fn extract_streams(
    endpoint: &str,
    cluster: &str,
    result: Value,
) -> Result<Vec<ReplicationStream>, HttpError> {
    entities(endpoint, "streams", result)?
        .into_iter()
        .map(|e| {
            let mut stream: ReplicationStream =
                serde_json::from_value(e).map_err(|err| HttpError::Decode {
                    endpoint: endpoint.to_string(),
                    entity: "stream",
                    reason: err.to_string(),
                })?;
            if stream.cluster.is_empty() {
                stream.cluster = cluster.to_string();
            }
            Ok(stream)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::StreamState;
    use serde_json::json;

    #[test]
    fn test_ok_envelope_returns_result() {
        let result = unwrap_envelope("/clusters", 200, json!({"ok": true, "result": ["a"]}));
        assert_eq!(result.unwrap(), json!(["a"]));
    }

    #[test]
    fn test_missing_ok_is_malformed() {
        let body = json!({"result": []});
        match unwrap_envelope("/clusters", 200, body.clone()) {
            Err(HttpError::MalformedResponse {
                message,
                response_json,
                ..
            }) => {
                assert_eq!(message, "invalid http envelope");
                assert_eq!(response_json, body);
            }
            other => panic!("expected malformed response, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_array_is_the_result() {
        let result = unwrap_envelope("/clusters", 200, json!(["dev", "prod"])).unwrap();
        assert_eq!(result, json!(["dev", "prod"]));
        assert_eq!(
            extract_clusters("/clusters", result).unwrap(),
            vec!["dev", "prod"]
        );
    }

    #[test]
    fn test_bare_string_is_malformed() {
        let result = unwrap_envelope("/clusters", 200, json!("dev"));
        assert!(matches!(result, Err(HttpError::MalformedResponse { .. })));
    }

    #[test]
    fn test_not_ok_envelope() {
        let body = json!({"ok": false, "error": {"code": "not_found", "message": "no such stream"}});
        match unwrap_envelope("/vrep/stream?cluster=c1&id=9", 404, body) {
            Err(HttpError::ResponseNotOk {
                endpoint,
                status,
                response,
            }) => {
                assert_eq!(endpoint, "/vrep/stream?cluster=c1&id=9");
                assert_eq!(status, 404);
                assert_eq!(
                    response.error.and_then(|e| e.code).as_deref(),
                    Some("not_found")
                );
            }
            other => panic!("expected not ok, got {:?}", other),
        }
    }

    #[test]
    fn test_non_json_body() {
        let result = parse_body("/clusters", "<html>502 Bad Gateway</html>");
        assert!(matches!(result, Err(HttpError::MalformedResponse { .. })));
    }

    #[test]
    fn test_extract_clusters_shapes() {
        let bare = extract_clusters("/clusters", json!(["c1", "c2"])).unwrap();
        assert_eq!(bare, vec!["c1", "c2"]);

        let wrapped = extract_clusters(
            "/clusters",
            json!({"clusters": [{"id": "east", "name": "East"}, "west"]}),
        )
        .unwrap();
        assert_eq!(wrapped, vec!["east", "west"]);
    }

    #[test]
    fn test_extract_clusters_not_an_array() {
        let result = extract_clusters("/clusters", json!({"clusters": "c1"}));
        match result {
            Err(HttpError::MalformedResponse { message, .. }) => {
                assert!(message.starts_with("expected entities to be an array"))
            }
            other => panic!("expected malformed response, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_streams_stamps_cluster() {
        let result = json!([
            {"id": 1, "workflow": "w1", "time_updated": 100, "state": "Running"},
            {"id": 2, "workflow": "w2", "time_updated": 50, "state": "Stopped", "cluster": "other"}
        ]);
        let streams = extract_streams("/vrep/streams?cluster=c1", "c1", result).unwrap();
        assert_eq!(streams[0].cluster, "c1");
        assert_eq!(streams[1].cluster, "other");
    }

    #[test]
    fn test_extract_streams_protobuf_shaped_records() {
        let result = json!([
            {"id": 1, "workflow": "w", "time_updated": 100, "cluster": "dev"},
            {"id": "2", "workflow": "w", "state": 1, "cluster": "dev", "max_tps": "500"}
        ]);
        let streams = extract_streams("/vrep/streams?cluster=dev", "dev", result).unwrap();
        assert_eq!(streams[0].state, StreamState::Running);
        assert_eq!(streams[1].state, StreamState::Stopped);
        assert_eq!(streams[1].time_updated, 0);
        assert_eq!(streams[1].max_tps, 500);
    }

    #[test]
    fn test_extract_streams_decode_error() {
        let result = json!([{"id": "x", "workflow": "w1", "time_updated": 100, "state": "Running"}]);
        let err = extract_streams("/vrep/streams?cluster=c1", "c1", result).unwrap_err();
        assert!(matches!(err, HttpError::Decode { entity: "stream", .. }));
    }
}
