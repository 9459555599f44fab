//! SMTP reply parsing and the EHLO capability set.

use super::error::{ClientError, Result};

/// A single reply line, e.g. `250-SIZE 10240000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    /// The three digit reply code.
    pub code: u16,
    /// `false` when the line is a continuation (`250-...`).
    pub is_last: bool,
    /// Text after the code and separator.
    pub message: String,
}

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The SMTP status code.
    pub code: u16,
    /// Text of every line, in order.
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// Returns the complete message as a single string with lines joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx, the server is waiting for more input (DATA, AUTH challenges).
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// 4xx
    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// 5xx
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.is_temporary_error() || self.is_permanent_error()
    }

    /// Turns the reply into an error unless its code is `expected`.
    ///
    /// # Errors
    ///
    /// Returns the reply as an error when the code does not match.
    pub fn expect_code(self, expected: u16) -> Result<Self> {
        if self.code == expected {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    /// Like [`Response::expect_code`], accepting any 2xx code.
    ///
    /// # Errors
    ///
    /// Returns the reply as an error when it is not a success.
    pub fn expect_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    /// 4xx and 5xx replies become [`ClientError::SmtpError`], anything else
    /// becomes [`ClientError::UnexpectedResponse`].
    #[must_use]
    pub fn into_error(self) -> ClientError {
        let message = self.message();
        if self.is_error() {
            ClientError::SmtpError {
                code: self.code,
                message,
            }
        } else {
            ClientError::UnexpectedResponse {
                code: self.code,
                message,
            }
        }
    }

    /// Parses a single reply line.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the line doesn't match SMTP format.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let Some(code_str) = line.get(..3) else {
            return Err(ClientError::ParseError(format!(
                "Response line too short: '{line}'"
            )));
        };

        if !code_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClientError::ParseError(format!(
                "Invalid status code: '{code_str}'"
            )));
        }
        let code = code_str
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code: '{code_str}'")))?;

        let rest = &line[3..];
        let (is_last, message) = match rest.chars().next() {
            None => (true, ""),
            Some(' ') => (true, &rest[1..]),
            Some('-') => (false, &rest[1..]),
            Some(c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{c}'"
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: message.to_string(),
        })
    }

    /// Parses a complete reply from the front of `buffer`.
    ///
    /// Returns `Ok(None)` while the reply is still incomplete, otherwise the
    /// reply and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the response is malformed.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(offset) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + offset];
            consumed += offset + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let parsed = Self::parse_line(std::str::from_utf8(raw)?)?;
            match code {
                Some(expected) if expected != parsed.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {expected}, got {}",
                        parsed.code
                    )));
                }
                Some(_) => {}
                None => code = Some(parsed.code),
            }

            lines.push(parsed.message);
            if parsed.is_last {
                return Ok(code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

/// SASL mechanisms the client knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    Plain,
    Login,
}

impl AuthMechanism {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

/// Extensions advertised in an EHLO reply (RFC 5321 Section 4.1.1.1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    keywords: Vec<(String, Vec<String>)>,
}

impl Capabilities {
    /// Builds the capability set from an EHLO reply.
    ///
    /// The first line is the server's greeting and is skipped.
    #[must_use]
    pub fn from_ehlo(response: &Response) -> Self {
        let keywords = response
            .lines
            .iter()
            .skip(1)
            .filter_map(|line| {
                let mut words = line.split_whitespace();
                let keyword = words.next()?.to_ascii_uppercase();
                Some((keyword, words.map(str::to_string).collect()))
            })
            .collect();

        Self { keywords }
    }

    /// Returns `true` if the keyword was advertised.
    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.keywords
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(keyword))
    }

    /// Parameters advertised with a keyword, e.g. the mechanisms of `AUTH`.
    #[must_use]
    pub fn params(&self, keyword: &str) -> Option<&[String]> {
        self.keywords
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(keyword))
            .map(|(_, params)| params.as_slice())
    }

    /// Picks the preferred SASL mechanism offered by the server, PLAIN
    /// before LOGIN.
    #[must_use]
    pub fn auth_mechanism(&self) -> Option<AuthMechanism> {
        let offered = self.params("AUTH")?;
        let has = |name: &str| offered.iter().any(|m| m.eq_ignore_ascii_case(name));

        if has("PLAIN") {
            Some(AuthMechanism::Plain)
        } else if has("LOGIN") {
            Some(AuthMechanism::Login)
        } else {
            None
        }
    }
}
