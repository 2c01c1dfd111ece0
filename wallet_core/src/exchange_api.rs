//! JSON requests to exchanges and banks, with error mapping.

use serde::de::DeserializeOwned;
use serde::Serialize;
use taler_network::wire::ErrorResponse;
use taler_network::{HttpClient, HttpResponse};
use tracing::debug;
use url::Url;

use crate::WalletError;

/// Normalize a base URL: http(s) only, no query or fragment, trailing slash.
pub fn canonicalize_base_url(input: &str) -> Result<String, WalletError> {
    let mut url = Url::parse(input.trim())
        .map_err(|e| WalletError::InvalidRequest(format!("invalid base URL {input:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(WalletError::InvalidRequest(format!(
            "unsupported URL scheme {:?}",
            url.scheme()
        )));
    }
    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url.to_string())
}

/// Resolve `path` against a canonical base URL.
pub fn join(base_url: &str, path: &str) -> Result<String, WalletError> {
    let base = Url::parse(base_url)
        .map_err(|e| WalletError::InvalidRequest(format!("invalid base URL {base_url:?}: {e}")))?;
    base.join(path)
        .map(|u| u.to_string())
        .map_err(|e| WalletError::InvalidRequest(format!("invalid path {path:?}: {e}")))
}

/// Turn a response into the expected body or a [`WalletError::ProtocolError`].
pub fn read_response<T: DeserializeOwned>(resp: &HttpResponse) -> Result<T, WalletError> {
    if resp.is_success() {
        return resp.json().map_err(|e| WalletError::ProtocolError {
            http_status: resp.status,
            code: 0,
            hint: format!("malformed response body: {e}"),
        });
    }
    let (code, hint) = match resp.json::<ErrorResponse>() {
        Ok(err) => (err.code, err.hint),
        Err(_) => (0, resp.body.chars().take(200).collect()),
    };
    Err(WalletError::ProtocolError {
        http_status: resp.status,
        code,
        hint,
    })
}

pub async fn get_json<T: DeserializeOwned>(
    http: &dyn HttpClient,
    url: &str,
) -> Result<T, WalletError> {
    debug!(url, "GET");
    let resp = http.get(url).await?;
    read_response(&resp)
}

pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
    http: &dyn HttpClient,
    url: &str,
    body: &B,
) -> Result<T, WalletError> {
    debug!(url, "POST");
    let body = serde_json::to_value(body)?;
    let resp = http.post_json(url, &body).await?;
    read_response(&resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taler_network::wire::{codes, ReserveStatusResponse};

    #[test]
    fn base_urls_get_a_trailing_slash() {
        assert_eq!(
            canonicalize_base_url("https://exchange.test").unwrap(),
            "https://exchange.test/"
        );
        assert_eq!(
            canonicalize_base_url("https://host.test/taler?x=1#f").unwrap(),
            "https://host.test/taler/"
        );
        assert!(canonicalize_base_url("ftp://host.test/").is_err());
        assert!(canonicalize_base_url("not a url").is_err());
    }

    #[test]
    fn join_keeps_base_path() {
        assert_eq!(
            join("https://host.test/taler/", "keys").unwrap(),
            "https://host.test/taler/keys"
        );
    }

    #[test]
    fn error_bodies_become_protocol_errors() {
        let resp = HttpResponse::json_body(
            409,
            &json!({"code": codes::RESERVE_INSUFFICIENT_FUNDS, "hint": "empty"}),
        );
        let err = read_response::<ReserveStatusResponse>(&resp).unwrap_err();
        match err {
            WalletError::ProtocolError {
                http_status, code, ..
            } => {
                assert_eq!(http_status, 409);
                assert_eq!(code, codes::RESERVE_INSUFFICIENT_FUNDS);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_success_body_is_not_transient() {
        let resp = HttpResponse::new(200, "{}");
        let err = read_response::<ReserveStatusResponse>(&resp).unwrap_err();
        assert!(!err.is_transient());
    }
}
