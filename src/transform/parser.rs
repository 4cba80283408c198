//! Transform parser
//!
//! Recursive descent over the token stream produced by the lexer.
//! Nesting depth and operator count are capped, so oversized input is a
//! syntax error rather than a stack overflow.
//!
//! # Grammar
//!
//! ```text
//! pipeline := expr (('|' | ':') expr)*
//! expr     := or
//! or       := and ('or' and)*
//! and      := not ('and' not)*
//! not      := 'not' not | compare
//! compare  := arith [('==' | '!=' | '<' | '<=' | '>' | '>=') arith]
//! arith    := term (('+' | '-') term)*
//! term     := unary (('*' | '/') unary)*
//! unary    := '-' unary | factor
//! factor   := NUMBER | STRING | 'true' | 'false'
//!           | '$' ['[' path (',' path)* ']']
//!           | 'has' '(' path ')' | 'if' '(' expr ')'
//!           | 'set' '(' '$' ['[' path (',' path)* ']'] ',' expr ')'
//!           | NAME ['(' [expr (',' expr)*] ')']
//!           | '(' expr ')'
//! path     := NAME | STRING | INTEGER
//! ```

use crate::transform::ast::{BinaryOp, Expr, PathSegment};
use crate::transform::error::{TransformError, TransformResult};
use crate::transform::lexer::{tokenize, Spanned, Token};
use serde_json::Value;

/// Deepest nesting of parentheses, calls and prefix operators
const MAX_DEPTH: usize = 64;

/// Most binary operators in one transform
const MAX_OPERATORS: usize = 1024;

/// Parse transform text into its pipeline stages
pub fn parse(source: &str) -> TransformResult<Vec<Expr>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        operators: 0,
    };

    if parser.peek() == &Token::End {
        return Err(TransformError::syntax(0, "empty transform"));
    }

    let stages = parser.pipeline()?;
    parser.expect(Token::End)?;
    Ok(stages)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    operators: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with End
        self.tokens
            .get(self.pos)
            .map(|t| &t.token)
            .unwrap_or(&Token::End)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.position)
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Token::Ident(name) if name == keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> TransformResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", token)))
        }
    }

    fn unexpected(&self, context: &str) -> TransformError {
        TransformError::syntax(
            self.position(),
            format!("{}, found {}", context, self.peek()),
        )
    }

    /// Run `parse` one nesting level deeper
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> TransformResult<T>,
    ) -> TransformResult<T> {
        if self.depth >= MAX_DEPTH {
            return Err(TransformError::syntax(
                self.position(),
                format!("transform nested deeper than {} levels", MAX_DEPTH),
            ));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn operator(&mut self, op: BinaryOp, left: Expr, right: Expr) -> TransformResult<Expr> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(TransformError::syntax(
                self.position(),
                format!("transform has more than {} operators", MAX_OPERATORS),
            ));
        }
        Ok(Expr::binary(op, left, right))
    }

    fn pipeline(&mut self) -> TransformResult<Vec<Expr>> {
        let mut stages = vec![self.expr()?];
        while self.eat(&Token::Pipe) {
            stages.push(self.expr()?);
        }
        Ok(stages)
    }

    fn expr(&mut self) -> TransformResult<Expr> {
        self.nested(|p| p.or())
    }

    fn or(&mut self) -> TransformResult<Expr> {
        let mut left = self.and()?;
        while self.eat_keyword("or") {
            let right = self.and()?;
            left = self.operator(BinaryOp::Or, left, right)?;
        }
        Ok(left)
    }

    fn and(&mut self) -> TransformResult<Expr> {
        let mut left = self.not()?;
        while self.eat_keyword("and") {
            let right = self.not()?;
            left = self.operator(BinaryOp::And, left, right)?;
        }
        Ok(left)
    }

    fn not(&mut self) -> TransformResult<Expr> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.nested(|p| p.not())?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> TransformResult<Expr> {
        let left = self.arith()?;
        let op = match self.peek() {
            Token::Eq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.arith()?;
        self.operator(op, left, right)
    }

    fn arith(&mut self) -> TransformResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = self.operator(op, left, right)?;
        }
    }

    fn term(&mut self) -> TransformResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = self.operator(op, left, right)?;
        }
    }

    fn unary(&mut self) -> TransformResult<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.nested(|p| p.unary())?)));
        }
        self.factor()
    }

    fn factor(&mut self) -> TransformResult<Expr> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Literal(number_literal(n)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::Dollar => {
                let path = self.target()?;
                Ok(if path.is_empty() {
                    Expr::Identity
                } else {
                    Expr::Get(path)
                })
            }
            Token::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                self.advance();
                self.named(name)
            }
            _ => Err(self.unexpected("expected an expression")),
        }
    }

    fn named(&mut self, name: String) -> TransformResult<Expr> {
        match name.as_str() {
            "true" => Ok(Expr::Literal(Value::Bool(true))),
            "false" => Ok(Expr::Literal(Value::Bool(false))),
            "and" | "or" | "not" => Err(TransformError::syntax(
                self.tokens[self.pos - 1].position,
                format!("expected an expression, found {}", name),
            )),
            "if" => {
                self.expect(Token::LParen)?;
                let cond = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Filter(Box::new(cond)))
            }
            "has" => {
                self.expect(Token::LParen)?;
                let segment = self.path_segment()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Has(segment))
            }
            "set" => {
                self.expect(Token::LParen)?;
                let path = self.target()?;
                self.expect(Token::Comma)?;
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Set {
                    path,
                    value: Box::new(value),
                })
            }
            _ => {
                let mut args = Vec::new();
                if self.eat(&Token::LParen) && !self.eat(&Token::RParen) {
                    args.push(self.expr()?);
                    while self.eat(&Token::Comma) {
                        args.push(self.expr()?);
                    }
                    self.expect(Token::RParen)?;
                }
                Ok(Expr::Call { name, args })
            }
        }
    }

    /// `$` optionally followed by `[path, ...]`
    fn target(&mut self) -> TransformResult<Vec<PathSegment>> {
        self.expect(Token::Dollar)?;
        let mut path = Vec::new();
        if self.eat(&Token::LBracket) {
            path.push(self.path_segment()?);
            while self.eat(&Token::Comma) {
                path.push(self.path_segment()?);
            }
            self.expect(Token::RBracket)?;
        }
        Ok(path)
    }

    fn path_segment(&mut self) -> TransformResult<PathSegment> {
        match self.peek().clone() {
            Token::Ident(key) | Token::Str(key) => {
                self.advance();
                Ok(PathSegment::Key(key))
            }
            Token::Number(n) if n.fract() == 0.0 && n >= 0.0 && n <= usize::MAX as f64 => {
                self.advance();
                Ok(PathSegment::Index(n as usize))
            }
            _ => Err(self.unexpected("expected a key or array index")),
        }
    }
}

/// Integral numbers become JSON integers
fn number_literal(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(source: &str) -> Vec<String> {
        parse(source)
            .unwrap()
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(render("1 + 2 * 3"), vec!["(1 + (2 * 3))"]);
        assert_eq!(render("(1 + 2) * 3"), vec!["((1 + 2) * 3)"]);
        assert_eq!(render("-$ - 1"), vec!["((-$) - 1)"]);
        assert_eq!(
            render("not $[a] > 1 and $[b] or true"),
            vec![r#"(((not ($["a"] > 1)) and $["b"]) or true)"#]
        );
    }

    #[test]
    fn test_pipeline() {
        assert_eq!(
            render("if($[x] > 3) | $[x] : count"),
            vec![r#"if(($["x"] > 3))"#, r#"$["x"]"#, "count()"]
        );
    }

    #[test]
    fn test_paths_and_special_forms() {
        assert_eq!(render(r#"$[a, "b c", 0]"#), vec![r#"$["a", "b c", 0]"#]);
        assert_eq!(render("has(alarm)"), vec![r#"has("alarm")"#]);
        assert_eq!(render("set($[f], $[c] * 2)"), vec![r#"set($["f"], ($["c"] * 2))"#]);
        assert_eq!(render("set($, 'x')"), vec![r#"set($, "x")"#]);
        assert_eq!(render("sum($[v], 1)"), vec![r#"sum($["v"], 1)"#]);
        assert_eq!(render("count()"), vec!["count()"]);
    }

    #[test]
    fn test_literals() {
        let stages = parse("1.5 | 2 | 'two' | false").unwrap();
        assert_eq!(stages[0], Expr::Literal(serde_json::json!(1.5)));
        assert_eq!(stages[1], Expr::Literal(serde_json::json!(2)));
        assert_eq!(stages[2], Expr::Literal(serde_json::json!("two")));
        assert_eq!(stages[3], Expr::Literal(serde_json::json!(false)));
    }

    #[test]
    fn test_syntax_errors() {
        let position = |source: &str| match parse(source) {
            Err(TransformError::Syntax { position, .. }) => position,
            other => panic!("expected syntax error for {:?}, got {:?}", source, other),
        };

        assert_eq!(position(""), 0);
        assert_eq!(position("$[x] >"), 6);
        assert_eq!(position("if($[x] > 3"), 11);
        assert_eq!(position("$ $"), 2);
        assert_eq!(position("$[1.5]"), 2);
        assert_eq!(position("set(3, 4)"), 4);
        assert_eq!(position("1 + and"), 4);
        assert_eq!(position("$ |"), 3);
    }

    #[test]
    fn test_nesting_limits() {
        let message = |source: String| match parse(&source) {
            Err(TransformError::Syntax { message, .. }) => message,
            other => panic!("expected syntax error, got {:?}", other),
        };

        let parens = format!("{}${}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(message(parens).contains("nested deeper"));
        assert!(message(format!("{}true", "not ".repeat(100_000))).contains("nested deeper"));
        assert!(message(format!("{}1", "-".repeat(100_000))).contains("nested deeper"));
        assert!(message(format!("1{}", " + 1".repeat(100_000))).contains("operators"));

        // Reasonable nesting still parses
        let shallow = format!("{}$[x]{} > 1", "(".repeat(20), ")".repeat(20));
        assert!(parse(&shallow).is_ok());
        assert!(parse(&format!("1{}", " + 1".repeat(500))).is_ok());
    }
}
