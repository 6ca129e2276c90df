//! Device provisioning and access-token persistence.
//!
//! A device without a token posts its name and the pre-shared
//! provisioning key/secret to `api/v1/provision`. The server answers with
//! an access token which is stored under [`TOKEN_NAMESPACE`]/[`TOKEN_KEY`]
//! and reused on every later connect.

use heapless::String;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::client::ports::StoragePort;
use crate::error::{CodecError, ProvisionError, StorageError};

pub const TOKEN_CAPACITY: usize = 32;
pub type AccessToken = String<TOKEN_CAPACITY>;

pub const TOKEN_NAMESPACE: &str = "thingsboard";
pub const TOKEN_KEY: &str = "token";

pub const PROVISION_PATH: [&str; 3] = ["api", "v1", "provision"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionRequest<'a> {
    device_name: &'a str,
    provision_device_key: &'a str,
    provision_device_secret: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionResponse {
    status: Option<std::string::String>,
    credentials_type: Option<std::string::String>,
    credentials_value: Option<std::string::String>,
}

/// Write the JSON provisioning body into `buf`. Always JSON, whatever
/// codec the session uses.
pub fn encode_request(
    device_name: &str,
    key: &str,
    secret: &str,
    buf: &mut [u8],
) -> Result<usize, CodecError> {
    let body = ProvisionRequest {
        device_name,
        provision_device_key: key,
        provision_device_secret: secret,
    };
    let bytes = serde_json::to_vec(&body).map_err(|_| CodecError::Malformed)?;
    let dst = buf.get_mut(..bytes.len()).ok_or(CodecError::BufferTooSmall)?;
    dst.copy_from_slice(&bytes);
    Ok(bytes.len())
}

/// Validate a provisioning response and extract the access token.
pub fn parse_response(payload: &[u8]) -> Result<AccessToken, ProvisionError> {
    let rsp: ProvisionResponse =
        serde_json::from_slice(payload).map_err(|_| ProvisionError::Malformed)?;

    if rsp.status.as_deref() != Some("SUCCESS") {
        warn!("PROV: status {:?}", rsp.status);
        return Err(ProvisionError::Rejected);
    }
    if rsp.credentials_type.as_deref() != Some("ACCESS_TOKEN") {
        warn!("PROV: credentials type {:?}", rsp.credentials_type);
        return Err(ProvisionError::UnsupportedCredentials);
    }
    let value = rsp
        .credentials_value
        .filter(|v| !v.is_empty())
        .ok_or(ProvisionError::MissingToken)?;
    AccessToken::try_from(value.as_str()).map_err(|()| ProvisionError::TokenTooLong)
}

/// Load the stored token, if any. Anything unreadable counts as absent.
pub fn load_token<S: StoragePort>(storage: &S) -> Option<AccessToken> {
    let mut buf = [0u8; TOKEN_CAPACITY];
    let len = match storage.read(TOKEN_NAMESPACE, TOKEN_KEY, &mut buf) {
        Ok(len) => len,
        Err(StorageError::NotFound) => return None,
        Err(e) => {
            warn!("PROV: token read failed: {e}");
            return None;
        }
    };
    let text = core::str::from_utf8(buf.get(..len)?).ok()?;
    if text.is_empty() {
        return None;
    }
    debug!("PROV: loaded stored token");
    AccessToken::try_from(text).ok()
}

/// Persist `token`. A failure is logged; the token stays usable for this
/// session.
pub fn store_token<S: StoragePort>(storage: &mut S, token: &str) {
    match storage.write(TOKEN_NAMESPACE, TOKEN_KEY, token.as_bytes()) {
        Ok(()) => info!("PROV: token stored"),
        Err(e) => warn!("PROV: token not stored: {e}"),
    }
}

pub fn forget_token<S: StoragePort>(storage: &mut S) -> Result<(), StorageError> {
    storage.delete(TOKEN_NAMESPACE, TOKEN_KEY)
}
