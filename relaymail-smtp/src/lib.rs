//! SMTP submission client.
//!
//! A small client for handing a message to a submission server:
//!
//! - Plain TCP, implicit TLS and STARTTLS connections
//! - `AUTH PLAIN` and `AUTH LOGIN`
//! - EHLO capability inspection
//! - `multipart/alternative` message assembly
//!
//! # Example
//!
//! ```no_run
//! use relaymail_smtp::{Capabilities, MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client =
//!     SmtpClient::connect_tls("smtp.example.com:465", "smtp.example.com".to_string(), false)
//!         .await?;
//! client.read_greeting().await?.expect_code(220)?;
//!
//! let ehlo = client.ehlo("client.example.com").await?.expect_success()?;
//! if let Some(mechanism) = Capabilities::from_ehlo(&ehlo).auth_mechanism() {
//!     client.auth(mechanism, "user", "secret").await?;
//! }
//!
//! let message = MessageBuilder::new()
//!     .from("sender@example.com")
//!     .to(&["recipient@example.com"])
//!     .subject("Hello")
//!     .text("Hello World")
//!     .build()?;
//!
//! client.mail_from("sender@example.com").await?.expect_success()?;
//! client.rcpt_to("recipient@example.com").await?.expect_success()?;
//! client.data().await?.expect_code(354)?;
//! client.send_data(&message).await?.expect_success()?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod message;
mod response;

pub use client::SmtpClient;
pub use error::{ClientError, Result};
pub use message::MessageBuilder;
pub use response::{AuthMechanism, Capabilities, Response, ResponseLine};
