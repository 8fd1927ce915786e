#![allow(clippy::module_name_repetitions)]

//! Lexer for the interceptor's ASCII debug stream.
//!
//! `regal` turns a line into a bounded token stream; each `LABEL:HEX` token is
//! then split with `winnow`. Anything that is not a well-formed field becomes a
//! [`LineItem::Noise`] entry so the pattern matcher can tell adjacent fields
//! from fields separated by other text.

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
use winnow::ascii::{alphanumeric1, hex_digit1};
use winnow::combinator::separated_pair;
use winnow::prelude::*;

/// Maximum number of tokens accepted per debug line.
pub const MAX_TOKENS: usize = 48;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds found in debug lines.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Labelled hexadecimal value such as `ADC0:00000620`.
    #[regex(r"[A-Za-z][A-Za-z0-9]*:[0-9A-Fa-f]+", priority = 2)]
    Field,
    /// Printable text without a colon.
    #[regex(r"[!-9;-~]+")]
    Word,
    /// Stray colon not part of a field.
    #[token(":")]
    Colon,
    /// Inline whitespace is ignored.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Pseudo variant used when the lexer encounters unsupported input.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token emitted by the lexer with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

/// Bounded token buffer.
pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

/// Why a debug line could not be tokenized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// The line holds more tokens than `limit`.
    LineTooLong { limit: usize },
    /// `regal` rejected the line.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::LineTooLong { limit } => write!(f, "debug line exceeds {limit} tokens"),
            LexError::Engine => f.write_str("debug line could not be lexed"),
        }
    }
}

impl core::error::Error for LexError {}

/// Splits a debug line into tokens, dropping inline whitespace.
///
/// An unfinished trailing fragment such as `ADC0:` comes back as a
/// [`TokenKind::Error`] token.
///
/// # Errors
///
/// [`LexError::LineTooLong`] past [`MAX_TOKENS`] tokens, [`LexError::Engine`]
/// when `regal` fails.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(TokenKind::lexer(), line)
        .map_err(|error| match error {
            IncrementalError::TokenOverflow => LexError::LineTooLong {
                limit: MAX_CACHE_RECORDS,
            },
            _ => LexError::Engine,
        })?;

    let trailing = partial
        .filter(|partial| !partial.fragment.is_empty())
        .map(|partial| {
            (
                TokenKind::Error,
                partial.start,
                partial.start + partial.fragment.len(),
            )
        });
    let spans = cache
        .tokens()
        .filter(|record| !record.skipped)
        .map(|record| (record.token, record.start, record.end))
        .chain(trailing);

    let mut buffer = TokenBuffer::new();
    for (kind, start, end) in spans {
        let lexeme = line.get(start..end).ok_or(LexError::Engine)?;
        buffer
            .push(Token {
                kind,
                lexeme,
                span: start..end,
            })
            .map_err(|_| LexError::LineTooLong { limit: MAX_TOKENS })?;
    }

    Ok(buffer)
}

/// Field labels emitted by the interceptor firmware.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FieldLabel {
    Adc0,
    Adc1,
    Dac0,
    Dac1,
    Relay,
    State,
    Mag,
    Ovr,
}

impl FieldLabel {
    /// Matches a label exactly as the firmware prints it.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "ADC0" => Some(FieldLabel::Adc0),
            "ADC1" => Some(FieldLabel::Adc1),
            "DAC0" => Some(FieldLabel::Dac0),
            "DAC1" => Some(FieldLabel::Dac1),
            "Relay" => Some(FieldLabel::Relay),
            "State" => Some(FieldLabel::State),
            "Mag" => Some(FieldLabel::Mag),
            "Ovr" => Some(FieldLabel::Ovr),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            FieldLabel::Adc0 => "ADC0",
            FieldLabel::Adc1 => "ADC1",
            FieldLabel::Dac0 => "DAC0",
            FieldLabel::Dac1 => "DAC1",
            FieldLabel::Relay => "Relay",
            FieldLabel::State => "State",
            FieldLabel::Mag => "Mag",
            FieldLabel::Ovr => "Ovr",
        }
    }

    /// Largest value the decoded field can hold.
    #[must_use]
    pub const fn max_value(self) -> u32 {
        match self {
            FieldLabel::Adc0
            | FieldLabel::Adc1
            | FieldLabel::Dac0
            | FieldLabel::Dac1
            | FieldLabel::Mag => u16::MAX as u32,
            FieldLabel::Relay | FieldLabel::State | FieldLabel::Ovr => u8::MAX as u32,
        }
    }
}

/// Element of a lexed debug line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineItem {
    /// Recognised field whose value fits its width.
    Field { label: FieldLabel, value: u32 },
    /// Anything else: unknown labels, oversized values, free text.
    Noise,
}

/// Bounded list of line items.
pub type LineItems = HeaplessVec<LineItem, MAX_TOKENS>;

/// Splits a `LABEL:HEX` lexeme into its parts.
#[must_use]
pub fn split_field(lexeme: &str) -> Option<(&str, &str)> {
    let mut parser = separated_pair(alphanumeric1, ':', hex_digit1);
    Parser::<&str, (&str, &str), ()>::parse(&mut parser, lexeme).ok()
}

fn classify_field(lexeme: &str) -> LineItem {
    let Some((label, digits)) = split_field(lexeme) else {
        return LineItem::Noise;
    };
    let Some(label) = FieldLabel::from_label(label) else {
        return LineItem::Noise;
    };
    match u32::from_str_radix(digits, 16) {
        Ok(value) if value <= label.max_value() => LineItem::Field { label, value },
        _ => LineItem::Noise,
    }
}

/// Lexes `line` into field and noise items.
///
/// Consecutive noise collapses into one item. A field glued to following text
/// without whitespace (`ADC0:0620xyz`) is treated as noise.
///
/// # Errors
///
/// Propagates [`LexError`] from [`lex`].
pub fn line_items(line: &str) -> Result<LineItems, LexError> {
    let tokens = lex(line)?;
    let mut items = LineItems::new();

    for (index, token) in tokens.iter().enumerate() {
        let item = match token.kind {
            TokenKind::Eol | TokenKind::Whitespace => continue,
            TokenKind::Field => {
                let glued = tokens
                    .get(index + 1)
                    .is_some_and(|next| next.span.start == token.span.end && !is_separator(next));
                if glued {
                    LineItem::Noise
                } else {
                    classify_field(token.lexeme)
                }
            }
            TokenKind::Word | TokenKind::Colon | TokenKind::Error => LineItem::Noise,
        };

        if item == LineItem::Noise && items.last() == Some(&LineItem::Noise) {
            continue;
        }
        // Bounded by the token buffer, which has the same capacity.
        let _ = items.push(item);
    }

    Ok(items)
}

fn is_separator(token: &Token<'_>) -> bool {
    matches!(token.kind, TokenKind::Whitespace | TokenKind::Eol)
}
