//! Line-delimited JSON framing for out-of-process crypto workers.
//!
//! Request:  `{"operation": "...", "args": {...}, "id": 7}`
//! Response: `{"type": "success", "id": 7, "result": {...}}` or
//!           `{"type": "error", "id": 7, "error": "..."}`

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::request::{handle_request, CryptoRequest, CryptoResponse};

#[derive(Debug, Deserialize)]
struct RequestEnvelope {
    operation: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    id: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseEnvelope {
    Success { id: u64, result: CryptoResponse },
    Error { id: u64, error: String },
}

impl ResponseEnvelope {
    pub fn id(&self) -> u64 {
        match self {
            ResponseEnvelope::Success { id, .. } | ResponseEnvelope::Error { id, .. } => *id,
        }
    }
}

/// Encode `request` as one envelope line, without the trailing newline.
pub fn encode_request(request: &CryptoRequest, id: u64) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(request)?;
    if let Value::Object(map) = &mut value {
        map.entry("args").or_insert_with(|| json!({}));
        map.insert("id".into(), json!(id));
    }
    serde_json::to_string(&value)
}

fn decode_request(line: &str) -> Result<(u64, CryptoRequest), (u64, String)> {
    let envelope: RequestEnvelope =
        serde_json::from_str(line).map_err(|e| (0, format!("malformed envelope: {e}")))?;
    let id = envelope.id;
    let args = if envelope.args.is_null() {
        json!({})
    } else {
        envelope.args
    };
    let request = serde_json::from_value(json!({
        "operation": envelope.operation,
        "args": args,
    }))
    .map_err(|e| (id, format!("bad request: {e}")))?;
    Ok((id, request))
}

/// Handle one request line and produce the response line.
pub fn handle_message(line: &str) -> String {
    let response = match decode_request(line) {
        Ok((id, request)) => {
            let operation = request.operation();
            match handle_request(request) {
                Ok(result) => ResponseEnvelope::Success { id, result },
                Err(e) => {
                    debug!(id, operation, error = %e, "crypto request failed");
                    ResponseEnvelope::Error {
                        id,
                        error: e.to_string(),
                    }
                }
            }
        }
        Err((id, error)) => ResponseEnvelope::Error { id, error },
    };
    serde_json::to_string(&response).unwrap_or_else(|e| {
        format!(r#"{{"type":"error","id":{},"error":"unserializable response: {}"}}"#, response.id(), e)
    })
}

/// Serve requests from `input` until it is closed, one response line per
/// request line.
pub async fn serve<R, W>(input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let mut response = handle_message(&line);
        response.push('\n');
        output.write_all(response.as_bytes()).await?;
        output.flush().await?;
    }
    debug!("crypto worker input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn success_carries_request_id() {
        let line = r#"{"operation":"hashString","args":{"value":"abc"},"id":42}"#;
        let response: ResponseEnvelope = serde_json::from_str(&handle_message(line)).unwrap();
        match response {
            ResponseEnvelope::Success { id, result } => {
                assert_eq!(id, 42);
                assert_eq!(result, CryptoResponse::Hash(taler_crypto::hash_string("abc")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_operation_is_an_error_response() {
        let line = r#"{"operation":"mineBitcoin","args":{},"id":3}"#;
        let response: ResponseEnvelope = serde_json::from_str(&handle_message(line)).unwrap();
        assert!(matches!(response, ResponseEnvelope::Error { id: 3, .. }));
    }

    #[test]
    fn garbage_is_an_error_response() {
        let response: ResponseEnvelope =
            serde_json::from_str(&handle_message("not json")).unwrap();
        assert!(matches!(response, ResponseEnvelope::Error { id: 0, .. }));
    }

    #[test]
    fn encoded_requests_decode_again() {
        let line = encode_request(&CryptoRequest::CreateEddsaKeypair {}, 9).unwrap();
        let response: ResponseEnvelope = serde_json::from_str(&handle_message(&line)).unwrap();
        assert!(matches!(
            response,
            ResponseEnvelope::Success {
                id: 9,
                result: CryptoResponse::Keypair { .. }
            }
        ));
    }

    #[tokio::test]
    async fn serve_answers_each_line() {
        let input = concat!(
            r#"{"operation":"hashString","args":{"value":"a"},"id":1}"#,
            "\n\n",
            r#"{"operation":"hashString","args":{"value":"b"},"id":2}"#,
            "\n"
        );
        let mut out = Vec::new();
        serve(BufReader::new(input.as_bytes()), &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        let ids: Vec<u64> = text
            .lines()
            .map(|l| serde_json::from_str::<ResponseEnvelope>(l).unwrap().id())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
