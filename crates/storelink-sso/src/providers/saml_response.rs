//! SAML `Response` decoding, parsing and enveloped-signature validation.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use openssl::hash::MessageDigest;
use openssl::sign::Verifier;
use openssl::x509::X509;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use xml_canonicalization::Canonicalizer;

use crate::error::{SsoError, SsoResult};

/// Maximum encoded `SAMLResponse` size (HTTP-POST binding).
const MAX_ENCODED_SIZE: usize = 512 * 1024;

/// Maximum decoded XML size.
const MAX_DECODED_SIZE: usize = 384 * 1024;

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Fields read from a SAML response. Nothing here is trusted until
/// [`verify_signature`] has passed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSamlResponse {
    pub response_id: Option<String>,
    pub in_response_to: Option<String>,
    pub issuer: Option<String>,
    pub status_code: Option<String>,
    pub name_id: Option<String>,
    pub audiences: Vec<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub attributes: BTreeMap<String, Vec<String>>,
    pub assertion_count: usize,
}

impl ParsedSamlResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code.as_deref() == Some(STATUS_SUCCESS)
    }

    /// First value of an attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.iter().find(|v| !v.trim().is_empty()))
            .map(|v| v.trim())
    }
}

fn malformed(reason: impl Into<String>) -> SsoError {
    SsoError::ProviderAuthError {
        error: "invalid_saml_response".to_string(),
        description: Some(reason.into()),
    }
}

fn bad_signature(reason: impl Into<String>) -> SsoError {
    SsoError::ProviderAuthError {
        error: "invalid_signature".to_string(),
        description: Some(reason.into()),
    }
}

/// Base64-decode the POSTed `SAMLResponse`.
pub fn decode_saml_response(encoded: &str) -> SsoResult<String> {
    if encoded.len() > MAX_ENCODED_SIZE {
        return Err(malformed(format!(
            "encoded SAMLResponse exceeds {MAX_ENCODED_SIZE} bytes"
        )));
    }
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = STANDARD
        .decode(compact)
        .map_err(|e| malformed(format!("base64 decode failed: {e}")))?;
    if decoded.len() > MAX_DECODED_SIZE {
        return Err(malformed(format!("SAMLResponse exceeds {MAX_DECODED_SIZE} bytes")));
    }
    String::from_utf8(decoded).map_err(|e| malformed(format!("invalid UTF-8: {e}")))
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        (a.key.local_name().as_ref() == name.as_bytes())
            .then(|| a.unescape_value().ok().map(|v| v.into_owned()))
            .flatten()
    })
}

fn parse_instant(value: Option<String>) -> SsoResult<Option<DateTime<Utc>>> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(&v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| malformed(format!("invalid timestamp {v}: {e}")))
        })
        .transpose()
}

#[derive(Clone, Copy, PartialEq)]
enum TextTarget {
    None,
    Issuer,
    NameId,
    Audience,
    AttributeValue,
}

/// Parse a decoded SAML response.
///
/// Claims read here cover the whole document. Use [`signed_claims`] to keep
/// only what the verified signature covers.
pub fn parse_saml_response(xml: &str) -> SsoResult<ParsedSamlResponse> {
    let parsed = scan(xml)?;
    if parsed.response_id.is_none() {
        return Err(malformed("missing Response element"));
    }
    Ok(parsed)
}

fn scan(xml: &str) -> SsoResult<ParsedSamlResponse> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedSamlResponse::default();
    let mut target = TextTarget::None;
    let mut current_attribute: Option<String> = None;
    let mut text = String::new();
    let mut depth = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(format!("XML parse error: {e}")))?;

        let (start, is_empty) = match &event {
            Event::Start(e) => (Some(e.clone()), false),
            Event::Empty(e) => (Some(e.clone()), true),
            _ => (None, false),
        };

        if let Some(e) = start {
            let name = local_name(&e);
            match name.as_str() {
                "Response" if depth == 0 => {
                    parsed.response_id = attr(&e, "ID");
                    parsed.in_response_to = attr(&e, "InResponseTo");
                }
                "Assertion" => parsed.assertion_count += 1,
                // The first Issuer (Response-level, else Assertion-level) wins.
                "Issuer" if parsed.issuer.is_none() => target = TextTarget::Issuer,
                "StatusCode" if parsed.status_code.is_none() => {
                    parsed.status_code = attr(&e, "Value");
                }
                "NameID" if parsed.name_id.is_none() => target = TextTarget::NameId,
                "Audience" => target = TextTarget::Audience,
                "Conditions" => {
                    parsed.not_before = parse_instant(attr(&e, "NotBefore"))?;
                    parsed.not_on_or_after = parse_instant(attr(&e, "NotOnOrAfter"))?;
                }
                "Attribute" => {
                    let attr_name = attr(&e, "Name");
                    if let Some(n) = &attr_name {
                        parsed.attributes.entry(n.clone()).or_default();
                    }
                    current_attribute = if is_empty { None } else { attr_name };
                }
                "AttributeValue" if current_attribute.is_some() => {
                    target = TextTarget::AttributeValue;
                }
                _ => {}
            }
            if is_empty {
                target = TextTarget::None;
            } else {
                depth += 1;
            }
            text.clear();
            continue;
        }

        match event {
            Event::DocType(_) => return Err(malformed("DOCTYPE is not allowed")),
            Event::Comment(_) => return Err(malformed("comments are not allowed")),
            Event::PI(_) => return Err(malformed("processing instructions are not allowed")),
            Event::Text(e) => {
                let value = e
                    .unescape()
                    .map_err(|err| malformed(format!("bad text: {err}")))?;
                text.push_str(&value);
            }
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                let value = std::mem::take(&mut text);
                let value = value.trim();
                match target {
                    TextTarget::Issuer => parsed.issuer = Some(value.to_string()),
                    TextTarget::NameId => parsed.name_id = Some(value.to_string()),
                    TextTarget::Audience => parsed.audiences.push(value.to_string()),
                    TextTarget::AttributeValue => {
                        if let Some(name) = &current_attribute {
                            parsed
                                .attributes
                                .entry(name.clone())
                                .or_default()
                                .push(value.to_string());
                        }
                    }
                    TextTarget::None => {}
                }
                target = TextTarget::None;
                if e.local_name().as_ref() == b"Attribute" {
                    current_attribute = None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(parsed)
}

/// Keep only the claims the verified signature covers.
///
/// A signed `Response` covers everything. A signed `Assertion` supplies the
/// issuer, subject, conditions and attributes; the envelope only contributes
/// its ID, `InResponseTo`, status and assertion count.
pub fn signed_claims(
    envelope: &ParsedSamlResponse,
    signed: &SignedElement,
) -> SsoResult<ParsedSamlResponse> {
    match (signed.is_root, signed.local_name.as_str()) {
        (true, "Response") => Ok(envelope.clone()),
        (false, "Assertion") => {
            let claims = scan(&signed.xml)?;
            if claims.assertion_count != 1 {
                return Err(bad_signature("signed assertion nests other assertions"));
            }
            Ok(ParsedSamlResponse {
                response_id: envelope.response_id.clone(),
                in_response_to: envelope.in_response_to.clone(),
                status_code: envelope.status_code.clone(),
                assertion_count: envelope.assertion_count,
                ..claims
            })
        }
        (_, other) => Err(bad_signature(format!(
            "signature covers {other}, not the response or its assertion"
        ))),
    }
}

/// The element a signature reference resolved to.
#[derive(Debug, Clone)]
pub struct SignedElement {
    pub reference_uri: String,
    pub local_name: String,
    /// Whether this is the document element.
    pub is_root: bool,
    /// The element's source text, start tag to end tag.
    pub xml: String,
}

struct SignatureInfo {
    signed_info: String,
    signature_value: String,
    signature_method: String,
    digest_method: String,
    reference_uri: String,
    digest_value: String,
}

/// Normalize the configured certificate (PEM or bare base64 DER).
pub(crate) fn parse_certificate(pem: &str) -> SsoResult<X509> {
    let pem_data = if pem.contains("-----BEGIN CERTIFICATE-----") {
        pem.to_string()
    } else {
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
            pem.trim()
        )
    };
    X509::from_pem(pem_data.as_bytes()).map_err(|e| {
        SsoError::ProviderNotConfigured(format!("invalid SAML signing certificate: {e}"))
    })
}

/// Exclusive C14N without comments.
pub(crate) fn canonicalize_xml(xml: &str) -> SsoResult<String> {
    let mut output = Vec::new();
    Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| bad_signature(format!("canonicalization failed: {e}")))?;
    String::from_utf8(output).map_err(|e| bad_signature(format!("invalid UTF-8: {e}")))
}

fn raw_tag(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e).into_owned()
}

fn extract_signature_info(xml: &str) -> SsoResult<SignatureInfo> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut in_signed_info = false;
    let mut in_signature_value = false;
    let mut in_digest_value = false;
    let mut signature_ns: Vec<(String, String)> = Vec::new();
    let mut info = SignatureInfo {
        signed_info: String::new(),
        signature_value: String::new(),
        signature_method: String::new(),
        digest_method: String::new(),
        reference_uri: String::new(),
        digest_value: String::new(),
    };

    loop {
        let event = reader
            .read_event()
            .map_err(|e| bad_signature(format!("XML parse error: {e}")))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let empty = matches!(event, Event::Empty(_));
                let name = local_name(e);
                match name.as_str() {
                    "Signature" if info.signed_info.is_empty() => {
                        signature_ns = e
                            .attributes()
                            .flatten()
                            .filter(|a| a.key.as_ref().starts_with(b"xmlns"))
                            .map(|a| {
                                (
                                    String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                                    String::from_utf8_lossy(&a.value).into_owned(),
                                )
                            })
                            .collect();
                    }
                    "SignatureMethod" => {
                        info.signature_method = attr(e, "Algorithm").unwrap_or_default();
                    }
                    "DigestMethod" => info.digest_method = attr(e, "Algorithm").unwrap_or_default(),
                    "Reference" => info.reference_uri = attr(e, "URI").unwrap_or_default(),
                    "SignatureValue" => in_signature_value = !empty,
                    "DigestValue" => in_digest_value = !empty,
                    _ => {}
                }

                if name == "SignedInfo" && !in_signed_info && info.signed_info.is_empty() {
                    in_signed_info = true;
                    // Carry namespace declarations inherited from Signature.
                    let mut tag = raw_tag(e);
                    for (key, value) in &signature_ns {
                        if !tag.contains(&format!("{key}=")) {
                            tag.push_str(&format!(" {key}=\"{value}\""));
                        }
                    }
                    info.signed_info.push('<');
                    info.signed_info.push_str(&tag);
                    info.signed_info.push('>');
                } else if in_signed_info {
                    info.signed_info.push('<');
                    info.signed_info.push_str(&raw_tag(e));
                    info.signed_info.push_str(if empty { "/>" } else { ">" });
                }
            }
            Event::End(ref e) => {
                let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if in_signed_info {
                    info.signed_info.push_str("</");
                    info.signed_info.push_str(&qname);
                    info.signed_info.push('>');
                }
                match e.local_name().as_ref() {
                    b"SignedInfo" => in_signed_info = false,
                    b"SignatureValue" => in_signature_value = false,
                    b"DigestValue" => in_digest_value = false,
                    _ => {}
                }
            }
            Event::Text(ref e) => {
                let text = e
                    .unescape()
                    .map_err(|err| bad_signature(format!("bad text: {err}")))?;
                if in_signed_info {
                    info.signed_info.push_str(&text);
                }
                if in_signature_value {
                    info.signature_value.push_str(&text);
                }
                if in_digest_value {
                    info.digest_value.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if info.signed_info.is_empty() {
        return Err(bad_signature("response is not signed"));
    }
    if info.signature_value.trim().is_empty() {
        return Err(bad_signature("no SignatureValue element"));
    }
    Ok(info)
}

fn signature_digest(algorithm: &str) -> SsoResult<MessageDigest> {
    match algorithm {
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" => Ok(MessageDigest::sha256()),
        "http://www.w3.org/2000/09/xmldsig#rsa-sha1" => Ok(MessageDigest::sha1()),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => Ok(MessageDigest::sha384()),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => Ok(MessageDigest::sha512()),
        other => Err(bad_signature(format!("unsupported signature algorithm: {other}"))),
    }
}

fn reference_digest_method(algorithm: &str) -> SsoResult<MessageDigest> {
    match algorithm {
        "http://www.w3.org/2001/04/xmlenc#sha256" => Ok(MessageDigest::sha256()),
        "http://www.w3.org/2000/09/xmldsig#sha1" => Ok(MessageDigest::sha1()),
        "http://www.w3.org/2001/04/xmlenc#sha512" => Ok(MessageDigest::sha512()),
        other => Err(bad_signature(format!("unsupported digest algorithm: {other}"))),
    }
}

/// Remove the first `Signature` element (enveloped-signature transform).
fn remove_signature_element(xml: &str) -> String {
    for prefix in ["ds:", ""] {
        let open = format!("<{prefix}Signature");
        let close = format!("</{prefix}Signature>");
        let start = xml.match_indices(&open).map(|(i, _)| i).find(|&i| {
            matches!(xml.as_bytes().get(i + open.len()), Some(b' ' | b'>' | b'\n' | b'\t' | b'\r'))
        });
        if let (Some(start), Some(end)) = (start, xml.find(&close)) {
            if end > start {
                let mut result = String::with_capacity(xml.len());
                result.push_str(&xml[..start]);
                result.push_str(&xml[end + close.len()..]);
                return result;
            }
        }
    }
    xml.to_string()
}

/// Find the element a reference URI points at by walking the parsed tree.
///
/// An empty URI means the document element. The ID must match exactly one
/// element. Comments, processing instructions and DOCTYPE are refused, so
/// nothing can hide a second copy of the signed content from the walk.
fn locate_referenced_element(xml: &str, reference_uri: &str) -> SsoResult<SignedElement> {
    let element_id = reference_uri.strip_prefix('#').unwrap_or(reference_uri);

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut depth = 0usize;
    // (start offset, depth of the element, local name)
    let mut open: Option<(usize, usize, String)> = None;
    let mut located: Option<SignedElement> = None;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| bad_signature(format!("XML parse error: {e}")))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let empty = matches!(event, Event::Empty(_));
                let is_target = if element_id.is_empty() {
                    depth == 0
                } else {
                    attr(e, "ID").as_deref() == Some(element_id)
                };
                if is_target {
                    if open.is_some() || located.is_some() {
                        return Err(bad_signature(format!(
                            "duplicate element ID: {element_id}"
                        )));
                    }
                    let name = local_name(e);
                    if empty {
                        let end = reader.buffer_position() as usize;
                        located = Some(SignedElement {
                            reference_uri: reference_uri.to_string(),
                            local_name: name,
                            is_root: depth == 0,
                            xml: xml[before..end].to_string(),
                        });
                    } else {
                        open = Some((before, depth, name));
                    }
                }
                if !empty {
                    depth += 1;
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if open.as_ref().is_some_and(|(_, d, _)| *d == depth) {
                    if let Some((start, element_depth, name)) = open.take() {
                        let end = reader.buffer_position() as usize;
                        located = Some(SignedElement {
                            reference_uri: reference_uri.to_string(),
                            local_name: name,
                            is_root: element_depth == 0,
                            xml: xml[start..end].to_string(),
                        });
                    }
                }
            }
            Event::Comment(_) => return Err(bad_signature("comments are not allowed")),
            Event::PI(_) => {
                return Err(bad_signature("processing instructions are not allowed"));
            }
            Event::DocType(_) => return Err(bad_signature("DOCTYPE is not allowed")),
            Event::Eof => break,
            _ => {}
        }
    }

    located.ok_or_else(|| bad_signature(format!("referenced element not found: {element_id}")))
}

fn element_digest(element: &SignedElement, digest: MessageDigest) -> SsoResult<String> {
    let canonical = canonicalize_xml(&remove_signature_element(&element.xml))?;
    let hashed = openssl::hash::hash(digest, canonical.as_bytes())
        .map_err(|e| bad_signature(format!("hash failed: {e}")))?;
    Ok(STANDARD.encode(hashed))
}

/// Validate the enveloped XML signature against the IdP certificate.
///
/// Returns the element the signature covers. Claims must be read from it
/// alone (see [`signed_claims`]).
pub fn verify_signature(xml: &str, certificate: &str) -> SsoResult<SignedElement> {
    let cert = parse_certificate(certificate)?;
    let public_key = cert
        .public_key()
        .map_err(|e| SsoError::ProviderNotConfigured(format!("invalid certificate key: {e}")))?;

    let outer = extract_signature_info(xml)?;
    let element = locate_referenced_element(xml, &outer.reference_uri)?;

    // The signature must sit inside the element it references.
    let info = extract_signature_info(&element.xml)?;
    if info.signature_value != outer.signature_value || info.reference_uri != outer.reference_uri {
        return Err(bad_signature(
            "signature is not enveloped by the referenced element",
        ));
    }

    let digest_method = reference_digest_method(&info.digest_method)?;
    let computed = element_digest(&element, digest_method)?;
    let expected: String = info
        .digest_value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if !crate::crypto::constant_time_eq(computed.as_bytes(), expected.as_bytes()) {
        return Err(bad_signature("digest mismatch"));
    }

    let canonical_signed_info = canonicalize_xml(&info.signed_info)?;
    let signature_bytes = STANDARD
        .decode(
            info.signature_value
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>(),
        )
        .map_err(|e| bad_signature(format!("invalid signature encoding: {e}")))?;

    let mut verifier = Verifier::new(signature_digest(&info.signature_method)?, &public_key)
        .map_err(|e| bad_signature(format!("verifier creation failed: {e}")))?;
    verifier
        .update(canonical_signed_info.as_bytes())
        .map_err(|e| bad_signature(format!("verifier update failed: {e}")))?;
    let valid = verifier
        .verify(&signature_bytes)
        .map_err(|e| bad_signature(format!("verification failed: {e}")))?;

    if valid {
        Ok(element)
    } else {
        Err(bad_signature("signature does not match certificate"))
    }
}
