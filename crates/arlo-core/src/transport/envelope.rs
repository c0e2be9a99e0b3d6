use crate::errors::{TransportError, TransportResult};
use serde_json::Value;

/// Strip the service's response envelope.
///
/// `{"meta": {"code": 200}, "data": ..}` and `{"success": true, "data": ..}`
/// yield `data`. A `meta` block with any other code is an error. Bodies with
/// neither shape are returned unchanged.
pub fn unwrap_envelope(path: &str, mut body: Value) -> TransportResult<Value> {
    let meta_code = body
        .get("meta")
        .map(|meta| meta.get("code").and_then(Value::as_u64));
    if let Some(code) = meta_code {
        if code == Some(200) {
            return Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null));
        }
        return Err(TransportError::Envelope {
            path: path.to_string(),
            message: format!("failed response: {body}"),
        });
    }

    if body.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null));
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn meta_200_yields_data() {
        let body = json!({"meta": {"code": 200}, "data": [1, 2]});
        assert_eq!(unwrap_envelope("/p", body).unwrap(), json!([1, 2]));
    }

    #[test]
    fn meta_failure_is_an_error() {
        let body = json!({"meta": {"code": 401, "message": "nope"}});
        assert_matches!(
            unwrap_envelope("/p", body),
            Err(TransportError::Envelope { path, .. }) if path == "/p"
        );
    }

    #[test]
    fn success_flag_yields_data() {
        let body = json!({"success": true, "data": {"ratlsToken": "t"}});
        assert_eq!(
            unwrap_envelope("/p", body).unwrap(),
            json!({"ratlsToken": "t"})
        );
    }

    #[test]
    fn unenveloped_body_passes_through() {
        let body = json!({"success": false, "reason": "x"});
        assert_eq!(unwrap_envelope("/p", body.clone()).unwrap(), body);
    }
}
