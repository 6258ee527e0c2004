//! Contact-create payloads and generated identifiers

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use serde_json::json;

use crate::model::ContactRecord;
use crate::traits::CommandParams;

const AUTH_INFO_LEN: usize = 16;
const AUTH_INFO_MIN_DIGITS: usize = 2;

/// Placeholder name for a contact without one
pub const DEFAULT_NAME: &str = "John Doe";
/// Surname given to single-word names
pub const PLACEHOLDER_SURNAME: &str = "Doe";

/// Split a full name into first and last name
///
/// Three or more words split at the midpoint, the surname taking the larger
/// half.
pub fn split_name(full_name: &str) -> (String, String) {
    let mut words: Vec<&str> = full_name.split_whitespace().collect();
    if words.is_empty() {
        words = DEFAULT_NAME.split_whitespace().collect();
    }
    match words.as_slice() {
        [only] => (only.to_string(), PLACEHOLDER_SURNAME.to_string()),
        [first, last] => (first.to_string(), last.to_string()),
        _ => {
            let mid = words.len() / 2;
            (words[..mid].join(" "), words[mid..].join(" "))
        }
    }
}

/// Random registry contact id: `ct` followed by 8 lowercase hex digits
pub fn generate_contact_id() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = OsRng;
    let suffix: String = (0..8)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect();
    format!("ct{}", suffix)
}

/// Random 16-character alphanumeric authorization code with at least two digits
pub fn generate_auth_info() -> String {
    let mut rng = OsRng;
    let mut code: Vec<u8> = (0..AUTH_INFO_LEN).map(|_| rng.sample(Alphanumeric)).collect();

    while code.iter().filter(|c| c.is_ascii_digit()).count() < AUTH_INFO_MIN_DIGITS {
        let pos = rng.gen_range(0..AUTH_INFO_LEN);
        if !code[pos].is_ascii_digit() {
            code[pos] = b'0' + rng.gen_range(0..10u8);
        }
    }

    code.into_iter().map(char::from).collect()
}

/// Generic contact-create payload for a contact record
pub fn contact_payload(contact: &ContactRecord, contact_id: &str, auth_info: &str) -> CommandParams {
    let (firstname, lastname) = split_name(&contact.name);
    let country = match contact.cc.trim() {
        "" => "XX".to_string(),
        cc => cc.to_uppercase(),
    };

    let payload = json!({
        "id": contact_id,
        "type": "int",
        "firstname": firstname,
        "lastname": lastname,
        "companyname": contact.org,
        "address1": contact.street1,
        "address2": contact.street2,
        "city": contact.city,
        "state": contact.sp,
        "postcode": contact.pc,
        "country": country,
        "fullphonenumber": contact.voice,
        "email": contact.email,
        "authInfoPw": auth_info,
    });

    match payload {
        serde_json::Value::Object(map) => map,
        _ => CommandParams::new(),
    }
}
