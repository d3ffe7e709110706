//! Rendering an [`OutboundMessage`] into RFC 5322 wire format.
//!
//! Output is 7-bit: the body goes out quoted-printable and non-ASCII header
//! text as RFC 2047 encoded words.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::transport::OutboundMessage;

/// Longest header text sent without encoding; keeps the header line well
/// under the 998 octet limit.
const MAX_PLAIN_HEADER: usize = 900;

/// Longest quoted-printable line, soft break included
const QP_LINE: usize = 76;

/// UTF-8 bytes per encoded word, so each word stays within 75 characters
const WORD_BYTES: usize = 45;

/// Remove characters that would let a value escape its header line.
fn header_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}

fn needs_encoding(value: &str) -> bool {
    !value.is_ascii() || value.len() > MAX_PLAIN_HEADER
}

/// Header text, as RFC 2047 encoded words when it is not short plain ASCII.
pub fn header_text(value: &str) -> String {
    let value = header_value(value);
    if needs_encoding(&value) {
        encoded_words(&value)
    } else {
        value
    }
}

/// `"Display Name" <address>`, or the bare address when there is no name.
pub fn mailbox(name: &str, address: &str) -> String {
    let name = header_value(name);
    if name.trim().is_empty() {
        return format!("<{address}>");
    }
    if needs_encoding(&name) {
        return format!("{} <{address}>", encoded_words(&name));
    }

    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\" <{address}>")
}

/// `=?UTF-8?B?...?=` words, split on character boundaries and folded.
fn encoded_words(value: &str) -> String {
    let mut words = Vec::new();
    let mut start = 0;
    for (idx, c) in value.char_indices() {
        if idx + c.len_utf8() - start > WORD_BYTES {
            words.push(&value[start..idx]);
            start = idx;
        }
    }
    words.push(&value[start..]);

    words
        .iter()
        .map(|word| format!("=?UTF-8?B?{}?=", base64(word.as_bytes())))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

fn base64(data: &[u8]) -> String {
    const ALPHABET: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let mut buf = [0u8; 3];
        buf[..chunk.len()].copy_from_slice(chunk);
        let group = (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2]);

        for i in 0..4 {
            if i <= chunk.len() {
                let index = (group >> (18 - 6 * i)) & 0x3F;
                out.push(char::from(ALPHABET[index as usize]));
            } else {
                out.push('=');
            }
        }
    }
    out
}

/// Quoted-printable body with CRLF line endings and no line over 76
/// characters.
pub fn quoted_printable(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + body.len() / 16);
    for (n, line) in body.split('\n').enumerate() {
        if n > 0 {
            out.push_str("\r\n");
        }
        let bytes = line.strip_suffix('\r').unwrap_or(line).as_bytes();

        let mut col = 0;
        for (i, &byte) in bytes.iter().enumerate() {
            let last = i + 1 == bytes.len();
            let literal = match byte {
                // Trailing whitespace is stripped in transit
                b' ' | b'\t' => !last,
                b'=' => false,
                33..=126 => true,
                _ => false,
            };
            let width = if literal { 1 } else { 3 };
            let limit = if last { QP_LINE } else { QP_LINE - 1 };
            if col + width > limit {
                out.push_str("=\r\n");
                col = 0;
            }

            if literal {
                out.push(char::from(byte));
            } else {
                let _ = write!(out, "={byte:02X}");
            }
            col += width;
        }
    }
    out
}

/// Normalise line endings to CRLF and escape lines starting with a dot.
pub fn dot_stuff(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + body.len() / 32);
    for line in body.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}

/// Build the full DATA payload (headers and stuffed body). The result is
/// plain ASCII, so no 8BITMIME extension is needed.
pub fn render(
    message: &OutboundMessage,
    from: &str,
    helo_name: &str,
    date: DateTime<Utc>,
) -> String {
    let mut out = String::new();

    let _ = write!(out, "From: {from}\r\n");
    let _ = write!(
        out,
        "To: {}\r\n",
        mailbox(&message.to_name, &message.to_email)
    );
    let _ = write!(out, "Subject: {}\r\n", header_text(&message.subject));
    let _ = write!(out, "Date: {}\r\n", date.to_rfc2822());
    let _ = write!(out, "Message-ID: <{}@{helo_name}>\r\n", ulid::Ulid::new());
    let _ = write!(out, "X-Herald-Campaign: {}\r\n", message.campaign_id);
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str("Content-Type: text/html; charset=utf-8\r\n");
    out.push_str("Content-Transfer-Encoding: quoted-printable\r\n");
    out.push_str("\r\n");
    out.push_str(&dot_stuff(&quoted_printable(&message.body)));

    out
}
