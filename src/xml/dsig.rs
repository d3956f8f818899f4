//! XML-DSig verification of enveloped signatures.
//!
//! Only the shape used by SAML is accepted: a `ds:Signature` that is a direct
//! child of the signed element, with exactly one `Reference` pointing at that
//! element's `ID`, and transforms limited to enveloped-signature followed by
//! exclusive canonicalization. Anything else is rejected rather than
//! interpreted, which closes off most signature-wrapping tricks.
//!
//! Canonicalization, digests and the signature itself are checked by
//! `bergshamra-dsig`, against the signed element as a standalone document
//! and with only the trusted certificates as keys.

use bergshamra_dsig::{DsigContext, VerifyResult};
use bergshamra_keys::KeysManager;
use openssl::x509::X509;

use super::{Document, Element, NS_DSIG};

pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
/// Exclusive canonicalization without comments.
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
pub const ECDSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384";
pub const ECDSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512";

pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

const SIGNATURE_METHODS: &[&str] = &[
    RSA_SHA1,
    RSA_SHA256,
    RSA_SHA384,
    RSA_SHA512,
    ECDSA_SHA256,
    ECDSA_SHA384,
    ECDSA_SHA512,
];
const DIGEST_METHODS: &[&str] = &[DIGEST_SHA1, DIGEST_SHA256, DIGEST_SHA384, DIGEST_SHA512];

#[derive(Debug, thiserror::Error)]
pub enum DsigError {
    #[error("malformed signature: {0}")]
    Malformed(String),

    #[error("unsupported algorithm: {0}")]
    Unsupported(String),

    #[error("signature reference '{found}' does not point at the signed element '{expected}'")]
    ReferenceMismatch { expected: String, found: String },

    #[error("signature does not verify: {0}")]
    Invalid(String),

    #[error("signature was not produced by a trusted certificate")]
    Untrusted,

    #[error("crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

/// Outcome of checking an element for an enveloped signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    /// The element carries no `ds:Signature` child.
    Unsigned,
    /// The element carries a signature that verified against a trusted certificate.
    Verified,
}

/// Verify the enveloped signature carried by `element`, if any.
///
/// Returns [`SignatureStatus::Unsigned`] when the element has no signature;
/// callers decide whether that is acceptable. A present signature must be
/// valid and made by one of `trusted`, otherwise an error is returned.
pub fn verify_enveloped(
    document: &Document,
    element: &Element,
    trusted: &[X509],
) -> Result<SignatureStatus, DsigError> {
    let mut signatures = element.children_named(NS_DSIG, "Signature");
    let Some(signature) = signatures.next() else {
        return Ok(SignatureStatus::Unsigned);
    };
    if signatures.next().is_some() {
        return Err(DsigError::Malformed(
            "more than one Signature on element".to_string(),
        ));
    }

    let expected = check_signed_info(element, signature)?;
    let standalone = document
        .standalone(element)
        .map_err(|e| DsigError::Malformed(e.to_string()))?;

    let mut last_failure = None;
    for certificate in trusted {
        match verify_with_certificate(&standalone, &expected, certificate) {
            Ok(()) => return Ok(SignatureStatus::Verified),
            Err(err) => last_failure = Some(err),
        }
    }

    tracing::debug!(
        reference = %expected,
        reason = last_failure.as_ref().map(ToString::to_string),
        "No trusted certificate verified the signature"
    );
    Err(last_failure.unwrap_or(DsigError::Untrusted))
}

/// Structural checks on `SignedInfo`; returns the only accepted Reference URI.
fn check_signed_info(element: &Element, signature: &Element) -> Result<String, DsigError> {
    let signed_info = required_child(signature, "SignedInfo")?;

    let c14n_method = algorithm(required_child(signed_info, "CanonicalizationMethod")?)?;
    if c14n_method != EXC_C14N {
        return Err(DsigError::Unsupported(c14n_method.to_string()));
    }
    let signature_method = algorithm(required_child(signed_info, "SignatureMethod")?)?;
    if !SIGNATURE_METHODS.contains(&signature_method) {
        return Err(DsigError::Unsupported(signature_method.to_string()));
    }

    let mut references = signed_info.children_named(NS_DSIG, "Reference");
    let reference = references
        .next()
        .ok_or_else(|| DsigError::Malformed("missing Reference".to_string()))?;
    if references.next().is_some() {
        return Err(DsigError::Malformed(
            "more than one Reference in SignedInfo".to_string(),
        ));
    }

    let element_id = element
        .attr("ID")
        .ok_or_else(|| DsigError::Malformed("signed element has no ID".to_string()))?;
    let expected = format!("#{element_id}");
    let found = reference.attr("URI").unwrap_or_default();
    if found != expected {
        return Err(DsigError::ReferenceMismatch {
            expected,
            found: found.to_string(),
        });
    }

    check_transforms(reference)?;
    let digest_method = algorithm(required_child(reference, "DigestMethod")?)?;
    if !DIGEST_METHODS.contains(&digest_method) {
        return Err(DsigError::Unsupported(digest_method.to_string()));
    }

    Ok(expected)
}

fn check_transforms(reference: &Element) -> Result<(), DsigError> {
    let transforms = reference
        .child(NS_DSIG, "Transforms")
        .ok_or_else(|| DsigError::Unsupported("reference without transforms".to_string()))?;

    let mut canonicalized = false;
    for transform in transforms.children_named(NS_DSIG, "Transform") {
        match algorithm(transform)? {
            ENVELOPED_SIGNATURE => {}
            EXC_C14N => canonicalized = true,
            other => return Err(DsigError::Unsupported(other.to_string())),
        }
    }

    if !canonicalized {
        return Err(DsigError::Unsupported(
            "reference without exclusive canonicalization".to_string(),
        ));
    }
    Ok(())
}

fn verify_with_certificate(
    standalone: &str,
    expected: &str,
    certificate: &X509,
) -> Result<(), DsigError> {
    let pem = certificate.to_pem()?;
    let key = bergshamra_keys::loader::load_x509_cert_pem(&pem)
        .map_err(|e| DsigError::Malformed(format!("unusable certificate: {e}")))?;
    let mut keys_manager = KeysManager::new();
    keys_manager.add_key(key);

    let mut ctx = DsigContext::new(keys_manager);
    // Keys embedded in KeyInfo are attacker controlled
    ctx.trusted_keys_only = true;
    ctx.strict_verification = true;

    match bergshamra_dsig::verify::verify(&ctx, standalone) {
        Ok(VerifyResult::Valid { references, .. }) => {
            if references.is_empty() || references.iter().any(|r| r.uri != expected) {
                return Err(DsigError::ReferenceMismatch {
                    expected: expected.to_string(),
                    found: references
                        .iter()
                        .map(|r| r.uri.to_string())
                        .collect::<Vec<_>>()
                        .join(" "),
                });
            }
            Ok(())
        }
        Ok(VerifyResult::Invalid { reason }) => Err(DsigError::Invalid(reason.to_string())),
        Err(err) => Err(DsigError::Invalid(err.to_string())),
    }
}

fn required_child<'a>(parent: &'a Element, local_name: &str) -> Result<&'a Element, DsigError> {
    parent
        .child(NS_DSIG, local_name)
        .ok_or_else(|| DsigError::Malformed(format!("missing {local_name}")))
}

fn algorithm(element: &Element) -> Result<&str, DsigError> {
    element.attr("Algorithm").ok_or_else(|| {
        DsigError::Malformed(format!("{} without Algorithm", element.local_name))
    })
}
