//! MIME assembly for plain-text and HTML messages.

use std::fmt::Write;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ulid::Ulid;

use super::error::{ClientError, Result};

/// Longest line RFC 5322 allows, excluding CRLF.
const MAX_LINE_LENGTH: usize = 998;

/// Width of base64-encoded body lines.
const BASE64_LINE_LENGTH: usize = 76;

/// Header lines are folded to this width where possible.
const FOLD_WIDTH: usize = 78;

/// UTF-8 bytes per encoded-word; 45 bytes of base64 plus the `=?utf-8?b?`
/// wrapper fills 72 columns.
const ENCODED_WORD_BYTES: usize = 45;

/// Headers holding address lists, whose addr-specs must not be encoded.
const ADDRESS_HEADERS: [&str; 6] = ["From", "Sender", "Reply-To", "To", "CC", "BCC"];

/// Builder for an outgoing message.
///
/// Address headers are joined with `,` and folded onto continuation lines
/// when long. Non-ASCII display names (`Name <addr>`) are RFC 2047 encoded;
/// addresses themselves are written as given. Supplying both a
/// text and an HTML body produces a `multipart/alternative` message with the
/// text part first; a single body produces a single-part message.
///
/// `Date` and `Message-ID` are generated unless set through
/// [`MessageBuilder::header`].
///
/// ```
/// use relaymail_smtp::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("sender@example.com")
///     .to(&["recipient@example.com"])
///     .subject("Hello")
///     .text("Plain body")
///     .html("<p>HTML body</p>")
///     .build()
///     .unwrap();
///
/// assert!(message.contains("multipart/alternative"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    headers: Vec<(String, String)>,
    text: Option<String>,
    html: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header. Long values are folded and non-ASCII text is
    /// RFC 2047 encoded.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn from(self, address: impl Into<String>) -> Self {
        self.header("From", address)
    }

    /// Sets the To header. An empty list still writes the header.
    #[must_use]
    pub fn to(self, addresses: &[impl AsRef<str>]) -> Self {
        self.header("To", join(addresses))
    }

    /// Sets the CC header. An empty list still writes the header.
    #[must_use]
    pub fn cc(self, addresses: &[impl AsRef<str>]) -> Self {
        self.header("CC", join(addresses))
    }

    /// Sets the BCC header. An empty list still writes the header.
    ///
    /// Recipients can read this header; leave it out when the blind copies
    /// must stay hidden.
    #[must_use]
    pub fn bcc(self, addresses: &[impl AsRef<str>]) -> Self {
        self.header("BCC", join(addresses))
    }

    #[must_use]
    pub fn subject(self, subject: impl Into<String>) -> Self {
        self.header("Subject", subject)
    }

    /// Sets the `text/plain` body.
    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text = Some(body.into());
        self
    }

    /// Sets the `text/html` body.
    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html = Some(body.into());
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    fn sender_domain(&self) -> &str {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("From"))
            .and_then(|(_, v)| v.rsplit_once('@'))
            .map_or("localhost", |(_, domain)| domain.trim_end_matches('>'))
    }

    /// Serialises the message with CRLF line endings.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::BuilderError`] if a header contains a line
    /// break or no body was supplied.
    pub fn build(self) -> Result<String> {
        let mut message = String::with_capacity(2048);

        for (name, value) in &self.headers {
            write_header(&mut message, name, value)?;
        }
        if !self.has_header("Date") {
            write_header(&mut message, "Date", &chrono::Utc::now().to_rfc2822())?;
        }
        if !self.has_header("Message-ID") {
            let id = format!("<{}@{}>", Ulid::new(), self.sender_domain());
            write_header(&mut message, "Message-ID", &id)?;
        }
        message.push_str("MIME-Version: 1.0\r\n");

        match (&self.text, &self.html) {
            (Some(text), Some(html)) => {
                let boundary = format!("=_relaymail_{}", Ulid::new());
                let _ = write!(
                    message,
                    "Content-Type: multipart/alternative; boundary=\"{boundary}\"\r\n\r\n"
                );

                for (subtype, body) in [("plain", text), ("html", html)] {
                    let _ = write!(message, "--{boundary}\r\n");
                    write_part(&mut message, subtype, body);
                }
                let _ = write!(message, "--{boundary}--\r\n");
            }
            (Some(text), None) => write_part(&mut message, "plain", text),
            (None, Some(html)) => write_part(&mut message, "html", html),
            (None, None) => {
                return Err(ClientError::BuilderError(
                    "Message has no body".to_string(),
                ));
            }
        }

        Ok(message)
    }
}

fn join(addresses: &[impl AsRef<str>]) -> String {
    addresses
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(",")
}

fn write_header(out: &mut String, name: &str, value: &str) -> Result<()> {
    if name.contains(['\r', '\n', ':']) || value.contains(['\r', '\n']) {
        return Err(ClientError::BuilderError(format!(
            "Header {name:?} contains a line break"
        )));
    }

    let mut folder = Folder::new(out, name);

    if ADDRESS_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
        for (i, address) in split_addresses(value).into_iter().enumerate() {
            let address = encode_display_name(address.trim());
            if i == 0 {
                folder.push("", "", &address)?;
            } else {
                folder.push(",", "", &address)?;
            }
        }
    } else if value.is_ascii()
        && value
            .split(' ')
            .all(|word| name.len() + 2 + word.len() <= MAX_LINE_LENGTH)
    {
        for (i, word) in value.split(' ').enumerate() {
            folder.push("", if i == 0 { "" } else { " " }, word)?;
        }
    } else {
        // Whitespace between adjacent encoded-words is dropped when decoding.
        for (i, word) in encoded_words(value).iter().enumerate() {
            folder.push("", if i == 0 { "" } else { " " }, word)?;
        }
    }

    folder.finish();
    Ok(())
}

/// Writes one header, folding with CRLF + SP before a word that would take
/// the line past [`FOLD_WIDTH`].
struct Folder<'a> {
    out: &'a mut String,
    name: &'a str,
    line: usize,
    empty: bool,
}

impl<'a> Folder<'a> {
    fn new(out: &'a mut String, name: &'a str) -> Self {
        let _ = write!(out, "{name}: ");
        Self {
            out,
            name,
            line: name.len() + 2,
            empty: true,
        }
    }

    /// Appends `word`. `glue` stays at the end of the current line;
    /// `separator` is only written when the word does not start a new line.
    fn push(&mut self, glue: &str, separator: &str, word: &str) -> Result<()> {
        let inline = glue.len() + separator.len() + word.len();

        if self.empty || word.is_empty() || self.line + inline <= FOLD_WIDTH {
            let _ = write!(self.out, "{glue}{separator}{word}");
            self.line += inline;
        } else {
            let _ = write!(self.out, "{glue}\r\n {word}");
            self.line = 1 + word.len();
        }
        self.empty = false;

        if self.line > MAX_LINE_LENGTH {
            return Err(ClientError::BuilderError(format!(
                "Header {:?} contains a word too long to fold",
                self.name
            )));
        }
        Ok(())
    }

    fn finish(self) {
        self.out.push_str("\r\n");
    }
}

/// Splits an address list on commas outside quoted display names.
fn split_addresses(value: &str) -> Vec<&str> {
    let mut addresses = Vec::new();
    let mut quoted = false;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                addresses.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    addresses.push(&value[start..]);
    addresses
}

/// Encodes a non-ASCII display name in `Name <addr>`. The address itself
/// is never encoded; a non-ASCII addr-spec is written as UTF-8 (RFC 6532).
fn encode_display_name(address: &str) -> String {
    match address.find('<') {
        Some(open) if !address[..open].is_ascii() => {
            let display = address[..open].trim().trim_matches('"');
            format!("{} {}", encoded_words(display).join(" "), &address[open..])
        }
        _ => address.to_string(),
    }
}

/// RFC 2047 base64 encoded-words, split on character boundaries so each
/// word stays within 75 columns.
fn encoded_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if i + c.len_utf8() - start > ENCODED_WORD_BYTES {
            words.push(&text[start..i]);
            start = i;
        }
    }
    words.push(&text[start..]);

    words
        .into_iter()
        .map(|chunk| format!("=?utf-8?b?{}?=", BASE64.encode(chunk)))
        .collect()
}

/// Writes the part headers and body, choosing 7bit when the body is short
/// ASCII lines and base64 otherwise.
fn write_part(out: &mut String, subtype: &str, body: &str) {
    let _ = write!(out, "Content-Type: text/{subtype}; charset=\"utf-8\"\r\n");

    let seven_bit = body.is_ascii() && body.lines().all(|l| l.len() <= MAX_LINE_LENGTH);
    if seven_bit {
        out.push_str("Content-Transfer-Encoding: 7bit\r\n\r\n");
        for line in body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
    } else {
        out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        let encoded = BASE64.encode(body);
        for chunk in encoded.as_bytes().chunks(BASE64_LINE_LENGTH) {
            // base64 output is ASCII
            out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
            out.push_str("\r\n");
        }
    }
}
