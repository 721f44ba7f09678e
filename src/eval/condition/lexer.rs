//! Tokenizer for condition expressions

use std::time::Duration;

use crate::eval::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Number(f64),
    Duration(Duration),
    True,
    False,
    And,
    Or,
    Not,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    LParen,
    RParen,
    Comma,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text of the token
    pub text: String,
    /// Byte offset in the source
    pub position: usize,
}

/// Split a condition string into tokens, ending with [`TokenKind::Eof`]
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        let two = input.get(pos..pos + 2).unwrap_or("");
        let (kind, len) = match two {
            "&&" => (TokenKind::And, 2),
            "||" => (TokenKind::Or, 2),
            "==" => (TokenKind::Eq, 2),
            "!=" => (TokenKind::NotEq, 2),
            "<=" => (TokenKind::Lte, 2),
            ">=" => (TokenKind::Gte, 2),
            _ => match c {
                b'!' => (TokenKind::Not, 1),
                b'<' => (TokenKind::Lt, 1),
                b'>' => (TokenKind::Gt, 1),
                b'(' => (TokenKind::LParen, 1),
                b')' => (TokenKind::RParen, 1),
                b',' => (TokenKind::Comma, 1),
                b'\'' | b'"' => {
                    let (value, end) = read_string(input, start)?;
                    tokens.push(Token {
                        kind: TokenKind::Str(value),
                        text: input[start..end].to_string(),
                        position: start,
                    });
                    pos = end;
                    continue;
                }
                b'0'..=b'9' | b'.' => {
                    let end = read_number(input, start);
                    tokens.push(number_token(input, start, end)?);
                    pos = end;
                    continue;
                }
                b'-' if bytes.get(pos + 1).is_some_and(|b| b.is_ascii_digit() || *b == b'.') => {
                    let end = read_number(input, start + 1);
                    tokens.push(number_token(input, start, end)?);
                    pos = end;
                    continue;
                }
                c if c.is_ascii_alphabetic() || c == b'_' => {
                    let end = scan_while(bytes, start, |b| b.is_ascii_alphanumeric() || b == b'_');
                    let word = &input[start..end];
                    let kind = match word {
                        "true" => TokenKind::True,
                        "false" => TokenKind::False,
                        "and" => TokenKind::And,
                        "or" => TokenKind::Or,
                        "not" => TokenKind::Not,
                        _ => TokenKind::Ident(word.to_string()),
                    };
                    tokens.push(Token {
                        kind,
                        text: word.to_string(),
                        position: start,
                    });
                    pos = end;
                    continue;
                }
                _ => {
                    let ch = input[start..].chars().next().unwrap_or_default();
                    let message = match ch {
                        '=' => "unexpected '=', use '==' for comparison",
                        '&' => "unexpected '&', use '&&'",
                        '|' => "unexpected '|', use '||'",
                        _ => "unexpected character",
                    };
                    return Err(ParseError::new(message, ch.to_string(), start));
                }
            },
        };

        tokens.push(Token {
            kind,
            text: input[start..start + len].to_string(),
            position: start,
        });
        pos += len;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        text: String::new(),
        position: input.len(),
    });
    Ok(tokens)
}

fn scan_while(bytes: &[u8], mut pos: usize, pred: impl Fn(u8) -> bool) -> usize {
    while pos < bytes.len() && pred(bytes[pos]) {
        pos += 1;
    }
    pos
}

/// Returns the end of a number literal including any unit suffix
fn read_number(input: &str, start: usize) -> usize {
    let bytes = input.as_bytes();
    let end = scan_while(bytes, start, |b| b.is_ascii_digit() || b == b'.');
    scan_while(bytes, end, |b| b.is_ascii_alphabetic())
}

fn number_token(input: &str, start: usize, end: usize) -> Result<Token, ParseError> {
    let text = &input[start..end];
    let split = text
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);

    let value: f64 = digits
        .parse()
        .map_err(|_| ParseError::new("invalid number literal", text, start))?;

    let kind = if unit.is_empty() {
        TokenKind::Number(value)
    } else {
        let seconds = match unit {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            "d" => value * 86_400.0,
            _ => {
                return Err(ParseError::new(
                    "unknown duration unit (expected ms, s, m, h or d)",
                    text,
                    start,
                ))
            }
        };
        let duration = Duration::try_from_secs_f64(seconds)
            .map_err(|_| ParseError::new("duration must be non-negative", text, start))?;
        TokenKind::Duration(duration)
    };

    Ok(Token {
        kind,
        text: text.to_string(),
        position: start,
    })
}

/// Parse a standalone duration literal such as `250ms` or `7d`
pub fn parse_duration(input: &str) -> Result<Duration, ParseError> {
    let text = input.trim();
    if text.is_empty() || read_number(text, 0) != text.len() {
        return Err(ParseError::new("expected a duration like 30s or 7d", text, 0));
    }
    match number_token(text, 0, text.len())?.kind {
        TokenKind::Duration(duration) => Ok(duration),
        _ => Err(ParseError::new(
            "duration needs a unit (ms, s, m, h or d)",
            text,
            0,
        )),
    }
}

/// Read a quoted string starting at `start`; returns the unescaped value and
/// the byte offset after the closing quote.
fn read_string(input: &str, start: usize) -> Result<(String, usize), ParseError> {
    let mut chars = input[start..].char_indices();
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => return Err(ParseError::new("expected string", "", start)),
    };

    let mut value = String::new();
    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            c if c == quote => return Ok((value, start + offset + c.len_utf8())),
            c => value.push(c),
        }
    }

    Err(ParseError::new(
        "unterminated string literal",
        &input[start..],
        start,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(7 * 86_400));
        assert_eq!(parse_duration(" 250ms ").unwrap(), Duration::from_millis(250));
        for bad in ["", "7", "7y", "d", "7d later", "-3s"] {
            assert!(parse_duration(bad).is_err(), "{} should be rejected", bad);
        }
    }

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a == b != c <= d >= e < f > g"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Eq,
                TokenKind::Ident("b".into()),
                TokenKind::NotEq,
                TokenKind::Ident("c".into()),
                TokenKind::Lte,
                TokenKind::Ident("d".into()),
                TokenKind::Gte,
                TokenKind::Ident("e".into()),
                TokenKind::Lt,
                TokenKind::Ident("f".into()),
                TokenKind::Gt,
                TokenKind::Ident("g".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_and_symbols_are_equivalent() {
        assert_eq!(kinds("a and b"), kinds("a && b"));
        assert_eq!(kinds("a or b"), kinds("a || b"));
        assert_eq!(kinds("not a"), kinds("!a"));
    }

    #[test]
    fn test_strings_with_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "two""#),
            vec![
                TokenKind::Str("it's".into()),
                TokenKind::Str("two".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_numbers_and_durations() {
        assert_eq!(
            kinds("42 -1.5 250ms 2h"),
            vec![
                TokenKind::Number(42.0),
                TokenKind::Number(-1.5),
                TokenKind::Duration(Duration::from_millis(250)),
                TokenKind::Duration(Duration::from_secs(7200)),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("ab  == 'x'").unwrap();
        let positions: Vec<usize> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 4, 7, 10]);
    }

    #[test]
    fn test_errors_name_token_and_position() {
        let err = tokenize("a = 1").unwrap_err();
        assert_eq!(err.token, "=");
        assert_eq!(err.position, 2);

        let err = tokenize("name == 'open").unwrap_err();
        assert_eq!(err.position, 8);
        assert!(err.message.contains("unterminated"));

        let err = tokenize("age > 3weeks").unwrap_err();
        assert_eq!(err.token, "3weeks");

        let err = tokenize("a # b").unwrap_err();
        assert_eq!(err.token, "#");
    }
}
