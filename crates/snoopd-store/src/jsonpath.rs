use serde_json::Value;

enum Token {
    Key(String),
    Index(usize),
}

/// Evaluates a dotted/bracket path (`a.b[0].c`, with an optional leading
/// `$.`) against a JSON value, returning the located node if every segment
/// resolves.
pub fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);
    let mut current = value;
    for token in tokenize(path) {
        current = match token {
            Token::Key(key) => current.as_object()?.get(&key)?,
            Token::Index(idx) => current.as_array()?.get(idx)?,
        };
    }
    Some(current)
}

fn tokenize(path: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = path.chars().peekable();
    let mut buf = String::new();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !buf.is_empty() {
                    tokens.push(Token::Key(std::mem::take(&mut buf)));
                }
            }
            '[' => {
                if !buf.is_empty() {
                    tokens.push(Token::Key(std::mem::take(&mut buf)));
                }
                let mut idx = String::new();
                for d in chars.by_ref() {
                    if d == ']' {
                        break;
                    }
                    idx.push(d);
                }
                if let Ok(n) = idx.parse::<usize>() {
                    tokens.push(Token::Index(n));
                }
            }
            other => buf.push(other),
        }
    }
    if !buf.is_empty() {
        tokens.push(Token::Key(buf));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_object_path() {
        let v = json!({"a": {"b": [{"c": 42}]}});
        assert_eq!(get(&v, "a.b[0].c"), Some(&json!(42)));
    }

    #[test]
    fn resolves_with_leading_dollar() {
        let v = json!({"a": 1});
        assert_eq!(get(&v, "$.a"), Some(&json!(1)));
    }

    #[test]
    fn missing_path_returns_none() {
        let v = json!({"a": 1});
        assert_eq!(get(&v, "a.b.c"), None);
    }
}
