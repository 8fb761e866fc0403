//! Numeric line codec.
//!
//! Messages travel as a single line of decimal code points separated by
//! commas. Because every character is replaced by digits, an encoded line
//! can never contain the newline that delimits it.
//!
//! ```
//! use line_bridge::codec;
//!
//! assert_eq!(codec::encode_message("hi"), "32,104,105,32");
//! assert_eq!(codec::decode("72,105,").unwrap(), "Hi");
//! ```

/// Separator between encoded code points.
pub const DELIMITER: char = ',';

/// Character added on both sides of every outbound message.
pub const PADDING: char = ' ';

/// Errors that can occur while decoding a line.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A token was not a non-negative decimal integer.
    #[error("Invalid token {token:?}: {source}")]
    InvalidToken {
        token: String,
        #[source]
        source: std::num::ParseIntError,
    },

    /// A number does not map to a Unicode scalar value.
    #[error("Invalid code point: {0}")]
    InvalidCodePoint(u32),

    /// The raw line was not valid UTF-8.
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Surround a message with the padding character.
#[must_use]
pub fn pad(message: &str) -> String {
    let mut padded = String::with_capacity(message.len() + 2);
    padded.push(PADDING);
    padded.push_str(message);
    padded.push(PADDING);
    padded
}

/// Remove at most one padding character from each end of a message.
#[must_use]
pub fn strip_padding(message: &str) -> &str {
    let message = message.strip_prefix(PADDING).unwrap_or(message);
    message.strip_suffix(PADDING).unwrap_or(message)
}

/// Encode text as comma-separated code points, without padding.
#[must_use]
pub fn encode(text: &str) -> String {
    let mut line = String::with_capacity(text.len() * 4);
    for (i, c) in text.chars().enumerate() {
        if i > 0 {
            line.push(DELIMITER);
        }
        line.push_str(&u32::from(c).to_string());
    }
    line
}

/// Encode an outbound message: pad it, then encode it.
///
/// The result is never empty, even for an empty message.
#[must_use]
pub fn encode_message(message: &str) -> String {
    encode(&pad(message))
}

/// Decode a line produced by [`encode`].
///
/// Surrounding whitespace is ignored and empty tokens are skipped, so a
/// trailing delimiter or a blank line is accepted. A UTF-16 surrogate pair
/// is combined into one character.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidToken`] if a token is not an integer and
/// [`DecodeError::InvalidCodePoint`] if a value is not a valid character.
pub fn decode(line: &str) -> Result<String, DecodeError> {
    let mut message = String::new();
    let mut high_surrogate: Option<u32> = None;

    for token in line.trim().split(DELIMITER) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let code = token
            .parse::<u32>()
            .map_err(|source| DecodeError::InvalidToken {
                token: token.to_string(),
                source,
            })?;

        if let Some(high) = high_surrogate.take() {
            if !is_low_surrogate(code) {
                return Err(DecodeError::InvalidCodePoint(high));
            }
            let combined = 0x1_0000 + ((high - 0xD800) << 10) + (code - 0xDC00);
            message.push(char::from_u32(combined).ok_or(DecodeError::InvalidCodePoint(combined))?);
            continue;
        }

        if is_high_surrogate(code) {
            high_surrogate = Some(code);
            continue;
        }

        message.push(char::from_u32(code).ok_or(DecodeError::InvalidCodePoint(code))?);
    }

    match high_surrogate {
        Some(high) => Err(DecodeError::InvalidCodePoint(high)),
        None => Ok(message),
    }
}

/// Decode a raw line as read from a byte stream.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidUtf8`] if the bytes are not UTF-8, and
/// otherwise the errors of [`decode`].
pub fn decode_bytes(line: &[u8]) -> Result<String, DecodeError> {
    decode(std::str::from_utf8(line)?)
}

fn is_high_surrogate(code: u32) -> bool {
    (0xD800..=0xDBFF).contains(&code)
}

fn is_low_surrogate(code: u32) -> bool {
    (0xDC00..=0xDFFF).contains(&code)
}
