//! HMAC-SHA512 authentication for inbound acquirer calls.
//!
//! Callers send `Authorization: HmacSHA512 <apiKey>:<nonce>:<signature>` where the
//! signature is the base64-encoded HMAC-SHA512 of `" {apiKey} {nonce} {body} "`
//! keyed with the shared secret. Simpler collaborators sign
//! `{method}\n{path}\n{timestamp}\n{body}` instead.
//!
//! Verification never fails loudly: every structural problem simply yields `false`.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha512 = Hmac<Sha512>;

/// Scheme tag expected at the start of the `Authorization` header.
pub const AUTH_SCHEME: &str = "HmacSHA512";

#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    api_secret: String,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// How the string-to-sign is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalForm {
    /// `" {apiKey} {nonce} {body} "`, used by the notification endpoints.
    KeyNonceBody,
    /// `"{method}\n{path}\n{timestamp}\n{body}"`.
    MethodPathTimestampBody,
}

/// The request-side inputs to a signature.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Nonce for [`CanonicalForm::KeyNonceBody`], timestamp for the other form.
    pub nonce: &'a str,
    pub body: &'a [u8],
}

/// Request-scoped values parsed out of an `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureContext<'a> {
    pub api_key: &'a str,
    pub nonce: &'a str,
    pub signature: &'a str,
}

/// Parses `HmacSHA512 <apiKey>:<nonce>:<signature>`.
///
/// Returns `None` for a wrong scheme tag, a field count other than three or
/// any empty field.
pub fn parse_authorization(header: &str) -> Option<SignatureContext<'_>> {
    let (scheme, data) = header.trim().split_once(' ')?;
    if scheme != AUTH_SCHEME {
        return None;
    }

    let mut fields = data.trim().split(':');
    let api_key = fields.next()?;
    let nonce = fields.next()?;
    let signature = fields.next()?;

    if fields.next().is_some() || api_key.is_empty() || nonce.is_empty() || signature.is_empty()
    {
        return None;
    }

    Some(SignatureContext {
        api_key,
        nonce,
        signature,
    })
}

pub fn canonical_string(form: CanonicalForm, api_key: &str, request: &SignedRequest<'_>) -> Vec<u8> {
    match form {
        CanonicalForm::KeyNonceBody => {
            let mut data = Vec::with_capacity(api_key.len() + request.nonce.len() + request.body.len() + 4);
            data.push(b' ');
            data.extend_from_slice(api_key.as_bytes());
            data.push(b' ');
            data.extend_from_slice(request.nonce.as_bytes());
            data.push(b' ');
            data.extend_from_slice(request.body);
            data.push(b' ');
            data
        }
        CanonicalForm::MethodPathTimestampBody => {
            let mut data = format!("{}\n{}\n{}\n", request.method, request.path, request.nonce)
                .into_bytes();
            data.extend_from_slice(request.body);
            data
        }
    }
}

/// Computes the base64 signature the caller is expected to send.
pub fn sign(
    form: CanonicalForm,
    credentials: &ApiCredentials,
    request: &SignedRequest<'_>,
) -> Option<String> {
    let mut mac = HmacSha512::new_from_slice(credentials.api_secret.as_bytes()).ok()?;
    mac.update(&canonical_string(form, &credentials.api_key, request));
    let digest = mac.finalize().into_bytes();

    Some(BASE64_STANDARD.encode(digest))
}

/// Checks `provided_signature` against the expected one in constant time.
pub fn verify(
    form: CanonicalForm,
    credentials: &ApiCredentials,
    request: &SignedRequest<'_>,
    provided_signature: &str,
) -> bool {
    let Some(expected) = sign(form, credentials, request) else {
        return false;
    };

    expected
        .as_bytes()
        .ct_eq(provided_signature.as_bytes())
        .into()
}

/// Verifies a full `Authorization` header for the key/nonce/body scheme.
pub fn verify_authorization(
    credentials: &ApiCredentials,
    header: Option<&str>,
    method: &str,
    path: &str,
    body: &[u8],
) -> bool {
    let Some(header) = header else {
        warn!(path, "Authentication failed: missing header");
        return false;
    };

    let Some(context) = parse_authorization(header) else {
        warn!(path, "Authentication failed: malformed header");
        return false;
    };

    let known_key: bool = context
        .api_key
        .as_bytes()
        .ct_eq(credentials.api_key.as_bytes())
        .into();
    if !known_key {
        warn!(path, "Authentication failed: unknown api key");
        return false;
    }

    let request = SignedRequest {
        method,
        path,
        nonce: context.nonce,
        body,
    };

    let valid = verify(
        CanonicalForm::KeyNonceBody,
        credentials,
        &request,
        context.signature,
    );
    if !valid {
        warn!(path, nonce = context.nonce, "Authentication failed: signature mismatch");
    }

    valid
}

/// Builds the header value a client sends for `body` signed with `nonce`.
pub fn authorization_header(credentials: &ApiCredentials, nonce: &str, body: &[u8]) -> Option<String> {
    let request = SignedRequest {
        method: "",
        path: "",
        nonce,
        body,
    };
    let signature = sign(CanonicalForm::KeyNonceBody, credentials, &request)?;

    Some(format!(
        "{} {}:{}:{}",
        AUTH_SCHEME, credentials.api_key, nonce, signature
    ))
}
