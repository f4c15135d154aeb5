//! Pythonic call syntax: `name(arg, key="value")`, one call per line.
//!
//! Parsing is two steps: a small recursive-descent parser builds a
//! [`CallExpr`], then the expression is bound against a catalog signature.
//! Lines that fail either step are skipped with a warning.

use log::warn;
use serde_json::{Map, Value};

use llama_stream_types::ToolCall;

use super::catalog::{self, ParamType, Signature};
use super::{ToolCallCodec, ToolWhitelist};
use crate::error::ToolCallSyntaxError;

/// Literal argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Literal,
}

/// `identifier(arguments)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallExpr {
    pub name: String,
    pub args: Vec<Argument>,
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), String> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(format!("expected '{want}' at byte {}, found '{c}'", self.pos - c.len_utf8())),
            None => Err(format!("expected '{want}', found end of input")),
        }
    }

    fn is_ident_start(c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_'
    }

    fn ident(&mut self) -> Result<String, String> {
        let start = self.pos;
        match self.peek() {
            Some(c) if Self::is_ident_start(c) => {
                self.bump();
            }
            Some(c) => return Err(format!("expected identifier at byte {start}, found '{c}'")),
            None => return Err("expected identifier, found end of input".to_string()),
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn string(&mut self, quote: char) -> Result<String, String> {
        self.expect(quote)?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c @ ('\\' | '"' | '\'')) => out.push(c),
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                    None => return Err("unterminated escape".to_string()),
                },
                Some(c) => out.push(c),
                None => return Err("unterminated string literal".to_string()),
            }
        }
    }

    fn int(&mut self) -> Result<i64, String> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        let digits_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.pos == digits_start {
            return Err(format!("expected integer at byte {start}"));
        }
        self.src[start..self.pos]
            .parse::<i64>()
            .map_err(|e| format!("bad integer {:?}: {e}", &self.src[start..self.pos]))
    }

    fn literal(&mut self) -> Result<Literal, String> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => self.string(q).map(Literal::Str),
            Some(c) if c == '-' || c.is_ascii_digit() => self.int().map(Literal::Int),
            Some(c) => Err(format!("expected literal at byte {}, found '{c}'", self.pos)),
            None => Err("expected literal, found end of input".to_string()),
        }
    }

    fn argument(&mut self) -> Result<Argument, String> {
        match self.peek() {
            Some(c) if Self::is_ident_start(c) => {
                let name = self.ident()?;
                self.skip_ws();
                self.expect('=')?;
                self.skip_ws();
                let value = self.literal()?;
                Ok(Argument {
                    name: Some(name),
                    value,
                })
            }
            _ => Ok(Argument {
                name: None,
                value: self.literal()?,
            }),
        }
    }

    fn call(&mut self) -> Result<CallExpr, String> {
        self.skip_ws();
        let name = self.ident()?;
        self.skip_ws();
        self.expect('(')?;
        let mut args = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(')') {
                self.bump();
                break;
            }
            args.push(self.argument()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(')') => break,
                Some(c) => return Err(format!("expected ',' or ')', found '{c}'")),
                None => return Err("unterminated argument list".to_string()),
            }
        }
        self.skip_ws();
        if self.pos != self.src.len() {
            return Err(format!("unexpected trailing input {:?}", &self.src[self.pos..]));
        }
        Ok(CallExpr { name, args })
    }
}

/// Parse a single call expression.
pub fn parse_call_expr(src: &str) -> Result<CallExpr, String> {
    Parser::new(src).call()
}

fn literal_to_value(ty: ParamType, literal: Literal) -> Result<Value, String> {
    match (ty, literal) {
        (ParamType::Index, Literal::Int(n)) => u64::try_from(n)
            .map(Value::from)
            .map_err(|_| format!("expected a non-negative integer, got {n}")),
        (ParamType::Date, Literal::Str(s)) if catalog::is_iso_date(&s) => Ok(Value::String(s)),
        (ParamType::Date, Literal::Str(s)) => Err(format!("expected a YYYY-MM-DD date, got {s:?}")),
        (ParamType::Index, Literal::Str(s)) => Err(format!("expected an integer, got {s:?}")),
        (ParamType::Date, Literal::Int(n)) => Err(format!("expected a quoted date, got {n}")),
    }
}

/// Bind an expression to a signature: positionals first, in declaration
/// order, then named arguments in any order. Arity must be exact.
pub fn bind(expr: CallExpr, sig: &Signature) -> Result<ToolCall, String> {
    let mut arguments = Map::new();
    let mut seen_named = false;
    for (index, arg) in expr.args.into_iter().enumerate() {
        let param = match arg.name {
            Some(ref name) => {
                seen_named = true;
                sig.param(name)
                    .ok_or_else(|| format!("{} has no parameter {name}", sig.name))?
            }
            None if seen_named => {
                return Err("positional argument follows keyword argument".to_string());
            }
            None => sig
                .params
                .get(index)
                .ok_or_else(|| format!("{} takes {} arguments", sig.name, sig.params.len()))?,
        };
        if arguments.contains_key(param.name) {
            return Err(format!("duplicate argument {}", param.name));
        }
        let value = literal_to_value(param.ty, arg.value).map_err(|e| format!("{}: {e}", param.name))?;
        arguments.insert(param.name.to_string(), value);
    }
    if let Some(missing) = sig.params.iter().find(|p| !arguments.contains_key(p.name)) {
        return Err(format!("{} is missing {}", sig.name, missing.name));
    }
    Ok(ToolCall {
        name: sig.name.to_string(),
        arguments,
    })
}

fn resolve_line(line: &str) -> Result<ToolCall, String> {
    let expr = parse_call_expr(line)?;
    let sig = catalog::lookup(&expr.name).ok_or_else(|| format!("{} is not a known function", expr.name))?;
    bind(expr, sig)
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => quote(s),
        other => other.to_string(),
    }
}

/// Codec for models that call tools with Python-like expressions.
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonicCodec;

impl ToolCallCodec for PythonicCodec {
    fn parse(&self, text: &str, _whitelist: &ToolWhitelist) -> Result<Vec<ToolCall>, ToolCallSyntaxError> {
        let mut calls = Vec::new();
        for line in text.trim().lines().map(str::trim).filter(|l| !l.is_empty()) {
            match resolve_line(line) {
                Ok(call) => calls.push(call),
                Err(reason) => warn!("[TOOLS] Dropping tool call {line:?}: {reason}"),
            }
        }
        if calls.is_empty() {
            return Err(ToolCallSyntaxError::new(text));
        }
        Ok(calls)
    }

    fn format(&self, call: &ToolCall) -> String {
        let mut args = Vec::new();
        match catalog::lookup(&call.name) {
            Some(sig) => {
                for param in sig.params {
                    match call.arguments.get(param.name) {
                        Some(value) => args.push(format!("{}={}", param.name, render_value(value))),
                        None => warn!("[TOOLS] {} is not set for tool call {}", param.name, call.name),
                    }
                }
                for key in call.arguments.keys().filter(|k| sig.param(k).is_none()) {
                    warn!("[TOOLS] Ignoring unexpected argument {key} for tool call {}", call.name);
                }
            }
            None => {
                warn!("[TOOLS] Unknown tool call {}, formatting best-effort", call.name);
                for (key, value) in &call.arguments {
                    args.push(format!("{key}={}", render_value(value)));
                }
            }
        }
        format!("{}({})", call.name, args.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(text: &str) -> Result<Vec<ToolCall>, ToolCallSyntaxError> {
        PythonicCodec.parse(text, &ToolWhitelist::default())
    }

    #[test]
    fn test_parse_named_arguments() {
        let calls = parse("getRecentChannelMessages(channelIndex=2, limit=5)").unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "getRecentChannelMessages");
        assert_eq!(calls[0].arguments["channelIndex"], json!(2));
        assert_eq!(calls[0].arguments["limit"], json!(5));
    }

    #[test]
    fn test_parse_positional_and_single_quotes() {
        let calls = parse("getChannelMessagesRange(3, '2024-01-01', endDate='2024-02-01')").unwrap();
        assert_eq!(calls[0].arguments["channelIndex"], json!(3));
        assert_eq!(calls[0].arguments["startDate"], json!("2024-01-01"));
        assert_eq!(calls[0].arguments["endDate"], json!("2024-02-01"));
    }

    #[test]
    fn test_named_arguments_in_any_order() {
        let calls = parse("getRecentChannelMessages(limit=5,channelIndex=2)").unwrap();
        assert_eq!(calls[0].arguments["channelIndex"], json!(2));
    }

    #[test]
    fn test_unknown_function_is_syntax_error_with_raw_text() {
        let err = parse("unknownFn(x=1)").unwrap_err();
        assert_eq!(err.text, "unknownFn(x=1)");
    }

    #[test]
    fn test_multi_line_keeps_valid_lines() {
        let text = "\ngetRecentChannelMessages(channelIndex=1, limit=10)\nbogus(\ngetRecentChannelMessages(0, 3)\n";
        let calls = parse(text).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].arguments["limit"], json!(3));
    }

    #[test]
    fn test_constraint_violations_are_dropped() {
        assert!(parse("getRecentChannelMessages(channelIndex=-1, limit=5)").is_err());
        assert!(parse("getRecentChannelMessages(channelIndex=1)").is_err());
        assert!(parse("getRecentChannelMessages(1, 2, 3)").is_err());
        assert!(parse("getRecentChannelMessages(channelIndex=1, channelIndex=2)").is_err());
        assert!(parse("getChannelMessagesRange(1, \"2024-13-01\", \"2024-01-02\")").is_err());
        assert!(parse("getRecentChannelMessages(limit=1, 2)").is_err());
        assert!(parse("getRecentChannelMessages(channelIndex=\"1\", limit=2)").is_err());
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(parse("getRecentChannelMessages(1, 2) + 1").is_err());
        assert!(parse_call_expr("f(1").is_err());
        assert!(parse_call_expr("f(x)").is_err());
    }

    #[test]
    fn test_call_expr_ast() {
        let expr = parse_call_expr("f(1, name=\"a\\\"b\")").unwrap();
        assert_eq!(
            expr,
            CallExpr {
                name: "f".to_string(),
                args: vec![
                    Argument { name: None, value: Literal::Int(1) },
                    Argument { name: Some("name".to_string()), value: Literal::Str("a\"b".to_string()) },
                ],
            }
        );
    }

    #[test]
    fn test_format_known_function_in_signature_order() {
        let call = ToolCall::new("getChannelMessagesRange")
            .arg("endDate", "2024-01-31")
            .arg("startDate", "2024-01-01")
            .arg("channelIndex", 4);
        assert_eq!(
            PythonicCodec.format(&call),
            "getChannelMessagesRange(channelIndex=4, startDate=\"2024-01-01\", endDate=\"2024-01-31\")"
        );
    }

    #[test]
    fn test_format_missing_argument_still_emits() {
        let call = ToolCall::new("getRecentChannelMessages").arg("channelIndex", 1);
        assert_eq!(PythonicCodec.format(&call), "getRecentChannelMessages(channelIndex=1)");
    }

    #[test]
    fn test_format_unknown_function_best_effort() {
        let call = ToolCall::new("search").arg("query", "rust").arg("page", 2);
        assert_eq!(PythonicCodec.format(&call), "search(page=2, query=\"rust\")");
    }

    #[test]
    fn test_round_trip() {
        let calls = [
            ToolCall::new("getRecentChannelMessages").arg("channelIndex", 2).arg("limit", 5),
            ToolCall::new("getChannelMessagesRange")
                .arg("channelIndex", 0)
                .arg("startDate", "2023-12-31")
                .arg("endDate", "2024-02-29"),
        ];
        for call in calls {
            let parsed = parse(&PythonicCodec.format(&call)).unwrap();
            assert_eq!(parsed, vec![call]);
        }
    }
}
