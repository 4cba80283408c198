//! Transform tokenizer
//!
//! Splits transform text into tokens with their byte positions. Words are
//! emitted as identifiers; the parser decides which ones are keywords.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag},
    character::complete::{alpha1, alphanumeric1, char, digit1, one_of},
    combinator::{map, map_res, opt, recognize, value},
    multi::many0_count,
    sequence::{delimited, pair, tuple},
    IResult,
};

use crate::transform::error::{TransformError, TransformResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Dollar,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    /// `|` or `:`
    Pipe,
    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    End,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::Ident(name) => write!(f, "{}", name),
            Token::Dollar => write!(f, "$"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Pipe => write!(f, "|"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::End => write!(f, "end of input"),
        }
    }
}

/// A token and the byte offset where it starts
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

/// Tokenize transform text; the result always ends with [`Token::End`]
pub fn tokenize(source: &str) -> TransformResult<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut rest = source.trim_start();

    while !rest.is_empty() {
        let position = source.len() - rest.len();
        match token(rest) {
            Ok((remaining, token)) => {
                tokens.push(Spanned { token, position });
                rest = remaining.trim_start();
            }
            Err(_) => {
                let message = match rest.chars().next() {
                    Some('"') | Some('\'') => "unterminated string literal".to_string(),
                    Some(c) => format!("unexpected character '{}'", c),
                    None => "unexpected end of input".to_string(),
                };
                return Err(TransformError::syntax(position, message));
            }
        }
    }

    tokens.push(Spanned {
        token: Token::End,
        position: source.len(),
    });
    Ok(tokens)
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((number, string, word, symbol))(input)
}

fn number(input: &str) -> IResult<&str, Token> {
    map_res(
        recognize(tuple((
            digit1,
            opt(pair(char('.'), digit1)),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |text: &str| text.parse::<f64>().map(Token::Number),
    )(input)
}

fn escape(input: &str) -> IResult<&str, &str> {
    alt((
        value("\n", char('n')),
        value("\r", char('r')),
        value("\t", char('t')),
        value("\\", char('\\')),
        value("\"", char('"')),
        value("'", char('\'')),
    ))(input)
}

fn double_quoted(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(is_not("\"\\"), '\\', escape)),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn single_quoted(input: &str) -> IResult<&str, String> {
    delimited(
        char('\''),
        map(
            opt(escaped_transform(is_not("'\\"), '\\', escape)),
            Option::unwrap_or_default,
        ),
        char('\''),
    )(input)
}

fn string(input: &str) -> IResult<&str, Token> {
    map(alt((double_quoted, single_quoted)), Token::Str)(input)
}

fn word(input: &str) -> IResult<&str, Token> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0_count(alt((alphanumeric1, tag("_")))),
        )),
        |name: &str| Token::Ident(name.to_string()),
    )(input)
}

fn symbol(input: &str) -> IResult<&str, Token> {
    alt((
        alt((
            value(Token::Eq, tag("==")),
            value(Token::Ne, tag("!=")),
            value(Token::Le, tag("<=")),
            value(Token::Ge, tag(">=")),
            value(Token::Lt, tag("<")),
            value(Token::Gt, tag(">")),
        )),
        alt((
            value(Token::Dollar, char('$')),
            value(Token::LBracket, char('[')),
            value(Token::RBracket, char(']')),
            value(Token::LParen, char('(')),
            value(Token::RParen, char(')')),
            value(Token::Comma, char(',')),
            value(Token::Pipe, char('|')),
            value(Token::Pipe, char(':')),
            value(Token::Plus, char('+')),
            value(Token::Minus, char('-')),
            value(Token::Star, char('*')),
            value(Token::Slash, char('/')),
        )),
    ))(input)
}
