//! WHOIS parsing
//!
//! Registries do not agree on a format, so this is deliberately lenient:
//! any `key: value` line is kept, a few well-known keys are lifted into
//! canonical fields, and contact details are scraped by pattern.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::records::WhoisRecord;

static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z0-9 /_.()-]{0,60}?)\s*:\s*(\S.*?)\s*$")
        .expect("whois key/value regex is valid")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email regex is valid")
});

// "+1.4155551234", "+44 20 7946 0958"
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+\d{1,3}[. ]?\d[\d ]{5,14}\d").expect("phone regex is valid")
});

const REGISTRAR_KEYS: &[&str] = &["registrar", "sponsoring registrar", "registrar name"];
const CREATED_KEYS: &[&str] = &[
    "creation date",
    "created",
    "created on",
    "registered on",
    "registration time",
    "domain registration date",
];
const EXPIRES_KEYS: &[&str] = &[
    "registry expiry date",
    "registrar registration expiration date",
    "expiration date",
    "expiry date",
    "expires",
    "expires on",
    "paid-till",
];
const UPDATED_KEYS: &[&str] = &["updated date", "last updated", "last-modified", "last modified", "changed"];
const NAME_SERVER_KEYS: &[&str] = &["name server", "name servers", "nserver", "nameserver"];
const STATUS_KEYS: &[&str] = &["domain status", "status"];

pub fn parse(output: &str, query: &str) -> WhoisRecord {
    let mut record = WhoisRecord {
        query: query.to_string(),
        ..Default::default()
    };
    let mut fields: BTreeMap<String, String> = BTreeMap::new();

    for line in output.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('%') || trimmed.starts_with('#') || trimmed.starts_with(">>>") {
            continue;
        }
        let Some(c) = KEY_VALUE.captures(line) else {
            continue;
        };
        let key = c[1].trim().to_ascii_lowercase();
        let value = c[2].to_string();

        if NAME_SERVER_KEYS.contains(&key.as_str()) {
            let ns = value
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .trim_end_matches('.')
                .to_ascii_lowercase();
            push_unique(&mut record.name_servers, ns);
        } else if STATUS_KEYS.contains(&key.as_str()) {
            let status = value.split_whitespace().next().unwrap_or_default().to_string();
            push_unique(&mut record.status, status);
        }

        fields.entry(key).or_insert(value);
    }

    record.registrar = first_of(&fields, REGISTRAR_KEYS);
    record.creation_date = first_of(&fields, CREATED_KEYS);
    record.expiration_date = first_of(&fields, EXPIRES_KEYS);
    record.updated_date = first_of(&fields, UPDATED_KEYS);

    for m in EMAIL.find_iter(output) {
        push_unique(&mut record.emails, m.as_str().to_ascii_lowercase());
    }
    for m in PHONE.find_iter(output) {
        push_unique(&mut record.phones, m.as_str().trim().to_string());
    }

    record.fields = fields;
    record
}

fn first_of(fields: &BTreeMap<String, String>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| fields.get(*k).cloned())
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !value.is_empty() && !list.contains(&value) {
        list.push(value);
    }
}
