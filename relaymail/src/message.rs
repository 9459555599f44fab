//! The message and recipients handed to [`MailTransport::send`](crate::MailTransport::send).

use serde::Deserialize;

/// Subject and the two alternative bodies of a message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutboundMessage {
    pub subject: String,
    pub plain_body: String,
    pub html_body: String,
}

impl OutboundMessage {
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        plain_body: impl Into<String>,
        html_body: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            plain_body: plain_body.into(),
            html_body: html_body.into(),
        }
    }
}

/// Who receives a message.
///
/// All three lists receive the message. `to` and `cc` are listed in headers
/// as usual; `bcc` is listed in a `BCC` header too, so blind copies are
/// visible to every recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RecipientSet {
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
}

impl RecipientSet {
    #[must_use]
    pub fn to<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            to: addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_cc<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cc.extend(addresses.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_bcc<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bcc.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Envelope recipients: `to`, then `cc`, then `bcc`, duplicates kept.
    pub fn envelope(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }
}
