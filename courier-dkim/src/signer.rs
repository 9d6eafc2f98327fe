use std::collections::HashMap;

use base64::prelude::*;
use rsa::{
    RsaPrivateKey,
    pkcs1::DecodeRsaPrivateKey,
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::DecodePrivateKey,
    signature::{SignatureEncoding, Signer, Verifier},
};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::{
    DkimConfig, DkimError, Result,
    canonicalize::{relaxed_body, relaxed_header},
    keys::parse_public_key,
};

const SIGNATURE_HEADER: &str = "DKIM-Signature";

/// Longest line the signature header is folded to (RFC 5322 §2.1.1).
const LINE_LIMIT: usize = 78;

/// Signs messages for one domain and selector.
///
/// Built once from configuration; the key is parsed up front so a bad key is
/// a construction error rather than a failure on the first send.
#[derive(Clone)]
pub struct DkimSigner {
    key: SigningKey<Sha256>,
    domain: String,
    selector: String,
    headers: Vec<String>,
}

impl std::fmt::Debug for DkimSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DkimSigner")
            .field("domain", &self.domain)
            .field("selector", &self.selector)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl DkimSigner {
    /// # Errors
    /// [`DkimError::MissingField`] when the selector or domain is empty, and
    /// [`DkimError::InvalidKey`] when the key is neither PKCS#8 nor PKCS#1 PEM.
    pub fn new(config: &DkimConfig) -> Result<Self> {
        if config.selector.trim().is_empty() {
            return Err(DkimError::MissingField("selector"));
        }
        if config.domain.trim().is_empty() {
            return Err(DkimError::MissingField("domain"));
        }
        if config.private_key.trim().is_empty() {
            return Err(DkimError::MissingField("private_key"));
        }

        let pem = config.private_key.trim();
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| DkimError::InvalidKey(e.to_string()))?;

        Ok(Self {
            key: SigningKey::<Sha256>::new(key),
            domain: config.domain.trim().to_string(),
            selector: config.selector.trim().to_string(),
            headers: config.headers.clone(),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Sign a message and return the complete `DKIM-Signature: ...` header,
    /// folded over `CRLF TAB` continuation lines and without a trailing CRLF.
    ///
    /// `headers` are the message headers in order; only the configured names
    /// that are present get signed. `body` is the raw message body.
    ///
    /// # Errors
    /// Returns [`DkimError::Signing`] if the RSA operation fails.
    pub fn sign(&self, headers: &[(String, String)], body: &str) -> Result<String> {
        self.sign_at(headers, body, chrono::Utc::now().timestamp())
    }

    /// [`sign`](Self::sign) with an explicit `t=` timestamp.
    ///
    /// # Errors
    /// Returns [`DkimError::Signing`] if the RSA operation fails.
    pub fn sign_at(
        &self,
        headers: &[(String, String)],
        body: &str,
        timestamp: i64,
    ) -> Result<String> {
        let body_hash = BASE64_STANDARD.encode(Sha256::digest(relaxed_body(body).as_bytes()));

        let mut signed_names = Vec::new();
        let mut input = String::new();
        for name in &self.headers {
            if let Some((_, value)) = find_header(headers, name) {
                input.push_str(&relaxed_header(name, value));
                input.push_str("\r\n");
                signed_names.push(name.as_str());
            }
        }

        let tags = [
            "v=1".to_string(),
            "a=rsa-sha256".to_string(),
            "c=relaxed/relaxed".to_string(),
            format!("d={}", self.domain),
            format!("s={}", self.selector),
            format!("t={timestamp}"),
            format!("h={}", signed_names.join(":")),
            format!("bh={body_hash}"),
            "b=".to_string(),
        ];
        input.push_str(&relaxed_header(SIGNATURE_HEADER, &tags.join("; ")));

        let signature = self
            .key
            .try_sign(input.as_bytes())
            .map_err(|e| DkimError::Signing(e.to_string()))?;

        trace!(
            domain = %self.domain,
            selector = %self.selector,
            headers = %signed_names.join(":"),
            "Signed message"
        );

        Ok(fold(&tags, &BASE64_STANDARD.encode(signature.to_bytes())))
    }
}

/// Lay out the signature header over continuation lines of at most
/// [`LINE_LIMIT`] characters.
///
/// Tags are broken after their `;` and the signature value, which is last, is
/// split wherever the line fills up. Relaxed canonicalization turns each
/// `CRLF TAB` back into the single space the tags were signed with.
fn fold(tags: &[String], signature: &str) -> String {
    let mut out = format!("{SIGNATURE_HEADER}:");
    let mut width = out.len();

    for (i, tag) in tags.iter().enumerate() {
        let separator = if i + 1 < tags.len() { ";" } else { "" };
        let len = tag.len() + separator.len();
        if width + 1 + len > LINE_LIMIT {
            out.push_str("\r\n\t");
            width = 1;
        } else {
            out.push(' ');
            width += 1;
        }
        width += len;
        out.push_str(tag);
        out.push_str(separator);
    }

    let mut rest = signature;
    while !rest.is_empty() {
        if width >= LINE_LIMIT {
            out.push_str("\r\n\t");
            width = 1;
        }
        let (chunk, tail) = rest.split_at(rest.len().min(LINE_LIMIT - width));
        out.push_str(chunk);
        width += chunk.len();
        rest = tail;
    }
    out
}

/// Last occurrence of a header, compared case-insensitively.
fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a (String, String)> {
    headers
        .iter()
        .rev()
        .find(|(header, _)| header.trim().eq_ignore_ascii_case(name))
}

/// Split a tag list (`k=v; k=v`) into its tags.
fn parse_tags(value: &str) -> Result<HashMap<String, String>> {
    value
        .split(';')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(|tag| {
            tag.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| DkimError::MalformedSignature(format!("tag without '=': {tag}")))
        })
        .collect()
}

/// The signature header value with the `b=` tag emptied, as it was when signed.
fn strip_signature(value: &str) -> String {
    value
        .split(';')
        .map(|tag| match tag.split_once('=') {
            Some((key, _)) if key.trim() == "b" => format!("{key}="),
            _ => tag.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Check a `DKIM-Signature` header line against a message and public key.
///
/// Returns `Ok(false)` when the body hash or the signature does not match.
///
/// # Errors
/// [`DkimError::InvalidKey`] if the public key does not parse and
/// [`DkimError::MalformedSignature`] if the header is not a DKIM signature.
pub fn verify(
    public_key_pem: &str,
    headers: &[(String, String)],
    body: &str,
    signature_line: &str,
) -> Result<bool> {
    let key = VerifyingKey::<Sha256>::new(parse_public_key(public_key_pem)?);

    let value = signature_line
        .split_once(':')
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case(SIGNATURE_HEADER))
        .map(|(_, value)| value)
        .ok_or_else(|| DkimError::MalformedSignature("not a DKIM-Signature header".to_string()))?;
    let unfolded: String = value.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    let tags = parse_tags(&unfolded)?;
    let tag = |name: &'static str| {
        tags.get(name)
            .ok_or_else(|| DkimError::MalformedSignature(format!("missing '{name}' tag")))
    };

    if tag("a")? != "rsa-sha256" {
        return Err(DkimError::MalformedSignature(format!(
            "unsupported algorithm {}",
            tag("a")?
        )));
    }

    let compact = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    let body_hash = BASE64_STANDARD.encode(Sha256::digest(relaxed_body(body).as_bytes()));
    if compact(tag("bh")?.as_str()) != body_hash {
        return Ok(false);
    }

    let Ok(signature) = BASE64_STANDARD.decode(compact(tag("b")?.as_str())) else {
        return Ok(false);
    };
    let Ok(signature) = Signature::try_from(signature.as_slice()) else {
        return Ok(false);
    };

    let mut input = String::new();
    for name in tag("h")?.split(':').map(str::trim).filter(|n| !n.is_empty()) {
        if let Some((_, value)) = find_header(headers, name) {
            input.push_str(&relaxed_header(name, value));
            input.push_str("\r\n");
        }
    }
    input.push_str(&relaxed_header(SIGNATURE_HEADER, &strip_signature(&unfolded)));

    Ok(key.verify(input.as_bytes(), &signature).is_ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags(" v=1; a=rsa-sha256;d=example.com; ").unwrap();
        assert_eq!(tags.get("v").map(String::as_str), Some("1"));
        assert_eq!(tags.get("d").map(String::as_str), Some("example.com"));
        assert!(parse_tags("v=1; broken").is_err());
    }

    #[test]
    fn test_strip_signature() {
        assert_eq!(
            strip_signature(" v=1; bh=abc=; b=c2ln bmF0dXJl"),
            " v=1; bh=abc=; b="
        );
    }

    #[test]
    fn test_fold_keeps_relaxed_form() {
        let tags = vec![
            "v=1".to_string(),
            "d=example.com".to_string(),
            format!("h={}", "From:".repeat(14)),
            "b=".to_string(),
        ];
        let folded = fold(&tags, &"A".repeat(200));

        assert!(folded.starts_with("DKIM-Signature: v=1; d=example.com;\r\n\th=From:"));
        assert!(folded.split("\r\n").all(|line| line.len() <= LINE_LIMIT));
        assert_eq!(folded.matches('A').count(), 200);

        let (_, value) = folded.split_once(':').unwrap();
        assert_eq!(
            relaxed_header(SIGNATURE_HEADER, &strip_signature(value)),
            relaxed_header(SIGNATURE_HEADER, &tags.join("; "))
        );
    }

    #[test]
    fn test_find_header_prefers_last() {
        let headers = vec![
            ("Subject".to_string(), "first".to_string()),
            ("subject".to_string(), "second".to_string()),
        ];
        assert_eq!(
            find_header(&headers, "SUBJECT").map(|(_, v)| v.as_str()),
            Some("second")
        );
        assert!(find_header(&headers, "From").is_none());
    }

    #[test]
    fn test_rejects_missing_fields() {
        let config = DkimConfig::new("key", "", "example.com");
        assert!(matches!(
            DkimSigner::new(&config),
            Err(DkimError::MissingField("selector"))
        ));
        let config = DkimConfig::new("not a pem", "mail", "example.com");
        assert!(matches!(
            DkimSigner::new(&config),
            Err(DkimError::InvalidKey(_))
        ));
    }
}
