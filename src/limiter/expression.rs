//! Key expression language.
//!
//! Expressions are terms joined with `+`; the result is always a string.
//!
//! ```text
//! expr     := term ('+' term)*
//! term     := STRING | NUMBER | '#' IDENT accessor* | IDENT accessor*
//! accessor := '.' IDENT | '[' NUMBER ']' | '[' STRING ']'
//! ```
//!
//! `#name` reads a named argument, `#a0` / `#p0` a positional one, and
//! `#root`, `#args`, `#method`, `#methodName`, `#target`, `#targetClass` the
//! invocation itself. Bare identifiers resolve against the root object only.
//! Strings use single or double quotes; a doubled quote escapes itself.
//!
//! ```text
//! 'content'                  → content
//! 'user:' + #user.id         → user:42
//! #args[0] + '@' + methodName → 42@find
//! ```

use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::limiter::error::LimiterError;

/// A named call argument as seen by key expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: Value,
}

/// The four inputs an expression may read.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub operation: &'a str,
    pub arguments: &'a [Argument],
    pub target: &'a Value,
    pub target_type: &'a str,
}

impl EvaluationContext<'_> {
    fn args(&self) -> Value {
        Value::Array(self.arguments.iter().map(|arg| arg.value.clone()).collect())
    }

    fn method(&self) -> Value {
        json!({
            "name": self.operation,
            "params": self.arguments.iter().map(|arg| arg.name.as_str()).collect::<Vec<_>>(),
        })
    }

    fn root(&self) -> Value {
        let mut root = Map::new();
        root.insert("method".into(), self.method());
        root.insert("methodName".into(), Value::String(self.operation.to_string()));
        root.insert("args".into(), self.args());
        root.insert("target".into(), self.target.clone());
        root.insert("targetClass".into(), Value::String(self.target_type.to_string()));
        Value::Object(root)
    }

    fn property(&self, name: &str) -> Option<Value> {
        match name {
            "method" => Some(self.method()),
            "methodName" => Some(Value::String(self.operation.to_string())),
            "args" => Some(self.args()),
            "target" => Some(self.target.clone()),
            "targetClass" => Some(Value::String(self.target_type.to_string())),
            _ => None,
        }
    }

    fn variable(&self, name: &str) -> Option<Value> {
        if let Some(arg) = self.arguments.iter().find(|arg| arg.name == name) {
            return Some(arg.value.clone());
        }
        if let Some(index) = positional_index(name) {
            return self.arguments.get(index).map(|arg| arg.value.clone());
        }
        if name == "root" {
            return Some(self.root());
        }
        self.property(name)
    }
}

/// `a0`, `p3`, ... → index.
fn positional_index(name: &str) -> Option<usize> {
    let digits = name.strip_prefix('a').or_else(|| name.strip_prefix('p'))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Render a value the way it appears inside a key.
pub fn key_fragment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Num(String),
    Ident(String),
    Hash,
    Dot,
    LBracket,
    RBracket,
    Plus,
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                chars.next();
                tokens.push(Token::Hash);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => {
                            if chars.peek() == Some(&quote) {
                                chars.next();
                                text.push(quote);
                            } else {
                                break;
                            }
                        }
                        Some(ch) => text.push(ch),
                        None => return Err("unterminated string literal".into()),
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                tokens.push(Token::Num(digits));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if !(d.is_alphanumeric() || d == '_') {
                        break;
                    }
                    ident.push(d);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Accessor {
    /// `.name`: the property must exist.
    Field(String),
    /// `['name']`: map lookup, absent keys read as null.
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Literal(String),
    Variable { name: String, path: Vec<Accessor> },
    Property { name: String, path: Vec<Accessor> },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expression(&mut self) -> Result<Vec<Term>, String> {
        let mut terms = vec![self.term()?];
        while let Some(token) = self.next() {
            match token {
                Token::Plus => terms.push(self.term()?),
                other => return Err(format!("expected '+', found {:?}", other)),
            }
        }
        Ok(terms)
    }

    fn term(&mut self) -> Result<Term, String> {
        match self.next() {
            Some(Token::Str(text)) => Ok(Term::Literal(text)),
            Some(Token::Num(digits)) => Ok(Term::Literal(digits)),
            Some(Token::Hash) => match self.next() {
                Some(Token::Ident(name)) => Ok(Term::Variable {
                    name,
                    path: self.accessors()?,
                }),
                _ => Err("expected a variable name after '#'".into()),
            },
            Some(Token::Ident(name)) => Ok(Term::Property {
                name,
                path: self.accessors()?,
            }),
            Some(other) => Err(format!("unexpected {:?}", other)),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn accessors(&mut self) -> Result<Vec<Accessor>, String> {
        let mut path = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(field)) => path.push(Accessor::Field(field)),
                        _ => return Err("expected a property name after '.'".into()),
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let accessor = match self.next() {
                        Some(Token::Num(digits)) => {
                            Accessor::Index(digits.parse().map_err(|_| format!("index {} out of range", digits))?)
                        }
                        Some(Token::Str(key)) => Accessor::Key(key),
                        _ => return Err("expected an index or quoted key inside '[]'".into()),
                    };
                    if self.next() != Some(Token::RBracket) {
                        return Err("expected ']'".into());
                    }
                    path.push(accessor);
                }
                _ => return Ok(path),
            }
        }
    }
}

fn walk(mut value: Value, path: &[Accessor]) -> Result<Value, String> {
    for accessor in path {
        value = match (accessor, value) {
            (Accessor::Field(field), Value::Object(mut map)) => map
                .remove(field)
                .ok_or_else(|| format!("no property '{}'", field))?,
            (Accessor::Key(key), Value::Object(mut map)) => map.remove(key).unwrap_or(Value::Null),
            (Accessor::Index(index), Value::Array(mut items)) => {
                if *index >= items.len() {
                    return Err(format!("index {} out of bounds (len {})", index, items.len()));
                }
                items.swap_remove(*index)
            }
            (Accessor::Field(field) | Accessor::Key(field), other) => {
                return Err(format!("cannot read property '{}' of {}", field, other));
            }
            (Accessor::Index(index), other) => {
                return Err(format!("cannot index {} with [{}]", other, index));
            }
        };
    }
    Ok(value)
}

/// A parsed key expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    terms: Vec<Term>,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, LimiterError> {
        let parse_error = |reason: String| LimiterError::Parse {
            expression: source.to_string(),
            reason,
        };

        let tokens = tokenize(source).map_err(parse_error)?;
        let terms = Parser { tokens, pos: 0 }.expression().map_err(parse_error)?;
        Ok(Self {
            source: source.to_string(),
            terms,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, context: &EvaluationContext<'_>) -> Result<String, LimiterError> {
        let eval_error = |reason: String| LimiterError::Evaluation {
            expression: self.source.clone(),
            reason,
        };

        let mut key = String::new();
        for term in &self.terms {
            let value = match term {
                Term::Literal(text) => {
                    key.push_str(text);
                    continue;
                }
                Term::Variable { name, path } => {
                    let root = context
                        .variable(name)
                        .ok_or_else(|| eval_error(format!("unknown variable '#{}'", name)))?;
                    walk(root, path).map_err(eval_error)?
                }
                Term::Property { name, path } => {
                    let root = context
                        .property(name)
                        .ok_or_else(|| eval_error(format!("unknown property '{}'", name)))?;
                    walk(root, path).map_err(eval_error)?
                }
            };
            key.push_str(&key_fragment(&value));
        }
        Ok(key)
    }
}

/// Parsed expressions keyed by their source text.
///
/// Concurrent first use may parse the same text twice; the first insert wins
/// and every caller gets an equivalent expression.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    compiled: DashMap<String, Arc<Expression>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_parse(&self, source: &str) -> Result<Arc<Expression>, LimiterError> {
        if let Some(hit) = self.compiled.get(source) {
            return Ok(Arc::clone(hit.value()));
        }

        let parsed = Arc::new(Expression::parse(source)?);
        let entry = self.compiled.entry(source.to_string()).or_insert(parsed);
        Ok(Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn arguments() -> Vec<Argument> {
        vec![
            Argument {
                name: "user".into(),
                value: json!({"id": 42, "name": "ann", "tags": ["a", "b"]}),
            },
            Argument {
                name: "page".into(),
                value: json!(3),
            },
        ]
    }

    fn eval(source: &str) -> Result<String, LimiterError> {
        let arguments = arguments();
        let target = json!({"region": "eu"});
        let context = EvaluationContext {
            operation: "find",
            arguments: &arguments,
            target: &target,
            target_type: "UserService",
        };
        Expression::parse(source)?.evaluate(&context)
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("'content'").unwrap(), "content");
        assert_eq!(eval("\"it''s\"").unwrap(), "it''s");
        assert_eq!(eval("'it''s'").unwrap(), "it's");
        assert_eq!(eval("'a' + 'b' + 7").unwrap(), "ab7");
    }

    #[test]
    fn test_arguments() {
        assert_eq!(eval("#user.id").unwrap(), "42");
        assert_eq!(eval("'user:' + #user.name").unwrap(), "user:ann");
        assert_eq!(eval("#user['tags'][1]").unwrap(), "b");
        assert_eq!(eval("#a1 + '/' + #p0.id").unwrap(), "3/42");
        assert_eq!(eval("#args[1]").unwrap(), "3");
        assert_eq!(eval("#user.tags").unwrap(), "[\"a\",\"b\"]");
    }

    #[test]
    fn test_invocation_properties() {
        assert_eq!(eval("methodName").unwrap(), "find");
        assert_eq!(eval("method.name + ':' + method.params[1]").unwrap(), "find:page");
        assert_eq!(eval("#root.targetClass + '.' + #methodName").unwrap(), "UserService.find");
        assert_eq!(eval("target.region").unwrap(), "eu");
        assert_eq!(eval("targetClass").unwrap(), "UserService");
    }

    #[test]
    fn test_evaluation_errors() {
        assert!(matches!(eval("#missing"), Err(LimiterError::Evaluation { .. })));
        assert!(matches!(eval("content"), Err(LimiterError::Evaluation { .. })));
        assert!(matches!(eval("#user.email"), Err(LimiterError::Evaluation { .. })));
        assert!(matches!(eval("#args[5]"), Err(LimiterError::Evaluation { .. })));
        assert!(matches!(eval("#page.value"), Err(LimiterError::Evaluation { .. })));
        assert!(matches!(eval("#page['value']"), Err(LimiterError::Evaluation { .. })));
    }

    #[test]
    fn test_absent_map_key_reads_as_null() {
        assert_eq!(eval("'user:' + #user['email']").unwrap(), "user:null");
        assert_eq!(eval("#user['name']").unwrap(), "ann");
        assert!(matches!(eval("#user['email'].domain"), Err(LimiterError::Evaluation { .. })));
    }

    #[test]
    fn test_parse_errors() {
        for source in ["", "'open", "'a' +", "#", "#user.", "#args[", "#args[0", "'a' 'b'", "a - b"] {
            assert!(
                matches!(Expression::parse(source), Err(LimiterError::Parse { .. })),
                "{} should not parse",
                source
            );
        }
    }

    #[test]
    fn test_cache_reuses_parsed_expressions() {
        let cache = ExpressionCache::new();
        let first = cache.get_or_parse("#user.id").unwrap();
        let second = cache.get_or_parse("#user.id").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert!(cache.get_or_parse("'broken").is_err());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_concurrent_first_use() {
        let cache = Arc::new(ExpressionCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || cache.get_or_parse("'k:' + #a0").unwrap())
            })
            .collect();

        let parsed: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cache.len(), 1);
        assert!(parsed.iter().all(|e| e.source() == "'k:' + #a0"));
    }
}
