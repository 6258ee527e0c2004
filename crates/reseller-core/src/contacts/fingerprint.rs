//! Content fingerprint of a contact record

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::ContactRecord;

/// Normalized form of the fields that identify a party
///
/// Field order is fixed so the serialized form is canonical.
#[derive(Debug, Serialize)]
struct Normalized {
    name: String,
    org: String,
    street1: String,
    street2: String,
    city: String,
    sp: String,
    pc: String,
    cc: String,
    voice: String,
    email: String,
}

/// Trim, collapse inner whitespace runs to one space, lower-case
fn text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Hex SHA-256 over the normalized contact fields
///
/// Two records that differ only in case, surrounding or repeated whitespace,
/// phone punctuation or country-code case yield the same fingerprint.
pub fn fingerprint(contact: &ContactRecord) -> String {
    let normalized = Normalized {
        name: text(&contact.name),
        org: text(&contact.org),
        street1: text(&contact.street1),
        street2: text(&contact.street2),
        city: text(&contact.city),
        sp: text(&contact.sp),
        pc: text(&contact.pc),
        cc: contact.cc.trim().to_uppercase(),
        voice: digits(&contact.voice),
        email: text(&contact.email),
    };
    // Serializing a struct of strings cannot fail
    let canonical = serde_json::to_vec(&normalized).unwrap_or_default();
    Sha256::digest(&canonical)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
