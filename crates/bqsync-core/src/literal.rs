//! Permissive parser for structured literals that are not strict JSON.
//!
//! Structured values that were stringified by tools other than a JSON
//! encoder commonly carry single-quoted strings, `True`/`False`/`None`,
//! tuples and trailing commas. This parser accepts those forms and yields
//! the equivalent JSON value. Non-string mapping keys become their text form.

use serde_json::{Map, Number, Value as JsonValue};

/// Deepest container nesting accepted; matches serde_json's recursion limit.
pub const MAX_DEPTH: usize = 128;

/// Parse `input` as a permissive literal. Returns `None` unless the whole
/// input is a single well-formed value.
pub fn parse_literal(input: &str) -> Option<JsonValue> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos == parser.chars.len() {
        Some(value)
    } else {
        None
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Option<JsonValue> {
        self.skip_ws();
        match self.peek()? {
            open @ ('{' | '[' | '(') => {
                if self.depth >= MAX_DEPTH {
                    return None;
                }
                self.pos += 1;
                self.depth += 1;
                let parsed = match open {
                    '{' => self.mapping(),
                    '[' => self.sequence(']').map(JsonValue::Array),
                    _ => self.sequence(')').map(JsonValue::Array),
                };
                self.depth -= 1;
                parsed
            }
            quote @ ('\'' | '"') => {
                self.pos += 1;
                self.string(quote).map(JsonValue::String)
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            c if c.is_alphabetic() => self.word(),
            _ => None,
        }
    }

    fn sequence(&mut self, close: char) -> Option<Vec<JsonValue>> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Some(items);
            }
            items.push(self.value()?);
            if self.eat(',') {
                continue;
            }
            return if self.eat(close) { Some(items) } else { None };
        }
    }

    fn mapping(&mut self) -> Option<JsonValue> {
        let mut map = Map::new();
        loop {
            if self.eat('}') {
                return Some(JsonValue::Object(map));
            }
            let key = key_text(self.value()?)?;
            if !self.eat(':') {
                return None;
            }
            let value = self.value()?;
            map.insert(key, value);
            if self.eat(',') {
                continue;
            }
            return if self.eat('}') {
                Some(JsonValue::Object(map))
            } else {
                None
            };
        }
    }

    fn string(&mut self, quote: char) -> Option<String> {
        let mut out = String::new();
        loop {
            match self.bump()? {
                c if c == quote => return Some(out),
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    c @ ('\\' | '\'' | '"') => out.push(c),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                },
                c => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Option<JsonValue> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E' | '_'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if let Ok(i) = text.parse::<i64>() {
            return Some(JsonValue::from(i));
        }
        let f = text.parse::<f64>().ok()?;
        Number::from_f64(f).map(JsonValue::Number)
    }

    fn word(&mut self) -> Option<JsonValue> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" | "true" => Some(JsonValue::Bool(true)),
            "False" | "false" => Some(JsonValue::Bool(false)),
            "None" | "null" => Some(JsonValue::Null),
            _ => None,
        }
    }
}

fn key_text(key: JsonValue) -> Option<String> {
    match key {
        JsonValue::String(s) => Some(s),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Null => Some("null".to_string()),
        JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_single_quoted_mapping() {
        let v = parse_literal("{'name': 'Ada', 'active': True, 'manager': None}").unwrap();
        assert_eq!(v, json!({"name": "Ada", "active": true, "manager": null}));
    }

    #[test]
    fn parses_tuples_and_trailing_commas() {
        let v = parse_literal("[(1, 2), 3.5, -4,]").unwrap();
        assert_eq!(v, json!([[1, 2], 3.5, -4]));
    }

    #[test]
    fn numeric_keys_become_text() {
        let v = parse_literal("{1: 'a', 2: 'b'}").unwrap();
        assert_eq!(v, json!({"1": "a", "2": "b"}));
    }

    #[test]
    fn escapes_inside_strings() {
        let v = parse_literal(r#"['it\'s', "a\"b"]"#).unwrap();
        assert_eq!(v, json!(["it's", "a\"b"]));
    }

    #[test]
    fn rejects_malformed_or_trailing_input() {
        assert!(parse_literal("{'a': 1").is_none());
        assert!(parse_literal("[1, 2] extra").is_none());
        assert!(parse_literal("{'a' 1}").is_none());
        assert!(parse_literal("[undefined]").is_none());
        assert!(parse_literal("{1, 2}").is_none());
    }

    #[test]
    fn nesting_is_bounded() {
        let at_limit = format!("{}{}", "[".repeat(MAX_DEPTH), "]".repeat(MAX_DEPTH));
        assert!(parse_literal(&at_limit).is_some());

        let too_deep = format!("{}{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert!(parse_literal(&too_deep).is_none());
        assert!(parse_literal(&"[".repeat(200_000)).is_none());
        assert!(parse_literal(&"{'a': ".repeat(200_000)).is_none());
    }
}
