use std::borrow::Cow;

use anyhow::Context;
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders, PartType};
use regex::Regex;

use super::RawMessage;

const RE_WHITESPACE_STR: &str = r"[\r\t\n]+";
const RE_LONG_SPACE_STR: &str = r" {2,}";

/// Accepts what is left of a damaged base64 body once stray bytes are removed
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

lazy_static::lazy_static!(
    static ref RE_WHITESPACE: Regex = Regex::new(RE_WHITESPACE_STR).unwrap();
    static ref RE_LONG_SPACE: Regex = Regex::new(RE_LONG_SPACE_STR).unwrap();
);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub external_id: String,
    /// `Name <address>` when the header carries a display name
    pub sender: String,
    pub sender_address: Option<String>,
    pub subject: String,
    /// The `Date` header
    pub date: Option<DateTime<Utc>>,
    /// Transport arrival time, falling back to the `Date` header
    pub received_at: DateTime<Utc>,
    /// Never absent, possibly empty
    pub body_text: String,
}

impl ParsedMessage {
    pub fn from_raw(raw: &RawMessage) -> anyhow::Result<Self> {
        let msg = MessageParser::default()
            .parse(&raw.bytes)
            .context(format!("Could not parse message {}", raw.external_id))?;

        let subject = msg.subject().map(collapse_whitespace).unwrap_or_default();
        let (sender, sender_address) = msg
            .from()
            .and_then(|f| f.first())
            .map(|addr| {
                let address = addr.address().map(|a| a.to_string());
                let sender = match (addr.name(), address.as_deref()) {
                    (Some(name), Some(address)) => format!("{} <{}>", name, address),
                    (Some(name), None) => name.to_string(),
                    (None, Some(address)) => address.to_string(),
                    (None, None) => String::new(),
                };
                (sender, address)
            })
            .unwrap_or_default();
        let date = msg
            .date()
            .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0));
        let received_at = raw.received_at.or(date).unwrap_or_else(Utc::now);
        let body_text = extract_body(&msg);

        Ok(ParsedMessage {
            external_id: raw.external_id.clone(),
            sender,
            sender_address,
            subject,
            date,
            received_at,
            body_text,
        })
    }

    /// First label of the sender's domain, capitalised: `jobs@acme.co.uk` -> `Acme`
    pub fn sender_domain(&self) -> Option<String> {
        let address = self.sender_address.as_deref()?;
        let (_, domain) = address.rsplit_once('@')?;
        let label = domain.split('.').next().filter(|l| !l.is_empty())?;
        Some(capitalize(label))
    }
}

/// Picks the body in order: first `text/plain` part, first `text/html` part
/// converted to text, then the sole payload of a single-part message.
/// A part that failed to decode contributes whatever text can be recovered
/// from it, and counts as absent when that is nothing.
fn extract_body(msg: &mail_parser::Message) -> String {
    let plain = msg
        .parts
        .iter()
        .filter(|p| is_plain(p))
        .find_map(part_text);
    if let Some(text) = plain {
        return collapse_whitespace(&text);
    }

    let html = msg
        .parts
        .iter()
        .filter(|p| is_html(p))
        .find_map(part_text);
    if let Some(html) = html {
        return collapse_whitespace(&html_to_text(&html));
    }

    match msg.parts.as_slice() {
        [single] if single.is_encoding_problem => part_text(single)
            .map(|text| collapse_whitespace(&text))
            .unwrap_or_default(),
        [single] => collapse_whitespace(&payload_text(&single.body)),
        _ => String::new(),
    }
}

/// Text of a text or html part
fn part_text<'a>(part: &'a mail_parser::MessagePart) -> Option<Cow<'a, str>> {
    let text = match &part.body {
        PartType::Text(text) | PartType::Html(text) => text,
        _ => return None,
    };
    if !part.is_encoding_problem {
        return Some(Cow::Borrowed(&**text));
    }

    // The parser hands back the undecoded body
    let recovered = match part.content_transfer_encoding() {
        Some(cte) if cte.eq_ignore_ascii_case("base64") => recover_base64(text),
        _ => text.to_string(),
    };
    Some(Cow::<str>::Owned(recovered)).filter(|t| !t.trim().is_empty())
}

/// Decodes the base64 characters that are there, dropping everything else
/// including bytes that are not valid UTF-8
fn recover_base64(encoded: &str) -> String {
    let mut symbols: Vec<u8> = encoded
        .bytes()
        .filter(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/')
        .collect();
    if symbols.len() % 4 == 1 {
        symbols.pop();
    }

    match LENIENT_BASE64.decode(&symbols) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).replace('\u{FFFD}', ""),
        Err(e) => {
            tracing::debug!("Could not recover base64 body: {}", e);
            String::new()
        }
    }
}

fn is_plain(part: &mail_parser::MessagePart) -> bool {
    part.content_type()
        .map(|ct| {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct
                    .subtype()
                    .map_or(true, |s| s.eq_ignore_ascii_case("plain"))
        })
        .unwrap_or(true)
}

fn is_html(part: &mail_parser::MessagePart) -> bool {
    part.content_type()
        .map(|ct| {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case("html"))
        })
        .unwrap_or(false)
}

fn payload_text<'a>(body: &'a PartType) -> Cow<'a, str> {
    match body {
        PartType::Text(text) => Cow::Borrowed(&**text),
        PartType::Html(html) => Cow::Owned(html_to_text(html)),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
            std::str::from_utf8(bytes).map_or(Cow::Borrowed(""), Cow::Borrowed)
        }
        PartType::Message(_) | PartType::Multipart(_) => Cow::Borrowed(""),
    }
}

fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 400)
}

fn collapse_whitespace(s: &str) -> String {
    let s = RE_WHITESPACE.replace_all(s, " ");
    let s = RE_LONG_SPACE.replace_all(&s, " ");
    s.trim().to_string()
}

fn capitalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
