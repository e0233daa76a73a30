//! Codebase expressions such as `internal(revision=42)>public|strip`.
//!
//! Grammar:
//! ```text
//! expression := term operation*
//! operation  := ('>' | '|') term
//! term       := word ( '(' [ word '=' word { ',' word '=' word } ] ')' )?
//! word       := bare-word | '"' any-but-quote '"'
//! ```
//! `>space` translates into a project space, `|editor` applies an editor.

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Peekable;
use std::str::{CharIndices, FromStr};

use crate::error::UserError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Term {
    pub identifier: String,
    pub options: BTreeMap<String, String>,
}

impl Term {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `|editor`
    Edit(Term),
    /// `>project_space`
    Translate(Term),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub creator: Term,
    pub operations: Vec<Operation>,
}

impl Expression {
    pub fn repository(creator: Term) -> Self {
        Self {
            creator,
            operations: Vec::new(),
        }
    }

    pub fn edit_with(mut self, editor: Term) -> Self {
        self.operations.push(Operation::Edit(editor));
        self
    }

    pub fn translate_to(mut self, project_space: Term) -> Self {
        self.operations.push(Operation::Translate(project_space));
        self
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || "_-./:@~+*{}".contains(c)
}

fn quote(s: &str) -> String {
    if !s.is_empty() && s.chars().all(char::is_alphanumeric) {
        s.to_string()
    } else {
        format!("\"{s}\"")
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote(&self.identifier))?;
        if !self.options.is_empty() {
            let opts: Vec<String> = self
                .options
                .iter()
                .map(|(k, v)| format!("{}={}", quote(k), quote(v)))
                .collect();
            write!(f, "({})", opts.join(","))?;
        }
        Ok(())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.creator)?;
        for op in &self.operations {
            match op {
                Operation::Edit(t) => write!(f, "|{t}")?,
                Operation::Translate(t) => write!(f, ">{t}")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Punct(char),
}

struct Parser<'s> {
    src: &'s str,
    chars: Peekable<CharIndices<'s>>,
}

impl<'s> Parser<'s> {
    fn new(src: &'s str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> UserError {
        UserError::Expression {
            expression: self.src.to_string(),
            reason: reason.into(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn next_token(&mut self) -> Result<Option<Token>, UserError> {
        self.skip_whitespace();
        let Some(&(start, c)) = self.chars.peek() else {
            return Ok(None);
        };
        if c == '"' {
            self.chars.next();
            let mut word = String::new();
            loop {
                match self.chars.next() {
                    Some((_, '"')) => return Ok(Some(Token::Word(word))),
                    Some((_, ch)) => word.push(ch),
                    None => return Err(self.error(format!("unterminated quote at {start}"))),
                }
            }
        }
        if is_word_char(c) {
            let mut word = String::new();
            while let Some((_, ch)) = self.chars.next_if(|(_, ch)| is_word_char(*ch)) {
                word.push(ch);
            }
            return Ok(Some(Token::Word(word)));
        }
        if "()=,>|".contains(c) {
            self.chars.next();
            return Ok(Some(Token::Punct(c)));
        }
        Err(self.error(format!("unexpected character '{c}' at {start}")))
    }

    fn peek_punct(&mut self, p: char) -> bool {
        self.skip_whitespace();
        self.chars.peek().is_some_and(|&(_, c)| c == p)
    }

    fn word(&mut self, what: &str) -> Result<String, UserError> {
        match self.next_token()? {
            Some(Token::Word(w)) => Ok(w),
            Some(Token::Punct(p)) => Err(self.error(format!("expected {what}, found '{p}'"))),
            None => Err(self.error(format!("expected {what}, found end of input"))),
        }
    }

    fn expect(&mut self, p: char) -> Result<(), UserError> {
        match self.next_token()? {
            Some(Token::Punct(c)) if c == p => Ok(()),
            _ => Err(self.error(format!("expected '{p}'"))),
        }
    }

    fn term(&mut self) -> Result<Term, UserError> {
        let mut term = Term::new(self.word("identifier")?);
        if !self.peek_punct('(') {
            return Ok(term);
        }
        self.expect('(')?;
        if self.peek_punct(')') {
            self.expect(')')?;
            return Ok(term);
        }
        loop {
            let key = self.word("option key")?;
            self.expect('=')?;
            let value = self.word("option value")?;
            term.options.insert(key, value);
            match self.next_token()? {
                Some(Token::Punct(')')) => return Ok(term),
                Some(Token::Punct(',')) => continue,
                _ => return Err(self.error("options must be separated by ',' and closed by ')'")),
            }
        }
    }

    fn expression(&mut self) -> Result<Expression, UserError> {
        let mut expr = Expression::repository(self.term()?);
        loop {
            match self.next_token()? {
                None => return Ok(expr),
                Some(Token::Punct('|')) => expr = expr.edit_with(self.term()?),
                Some(Token::Punct('>')) => expr = expr.translate_to(self.term()?),
                Some(other) => {
                    return Err(self.error(format!("expected '|' or '>', found {other:?}")));
                }
            }
        }
    }
}

impl FromStr for Expression {
    type Err = UserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parser::new(s).expression()
    }
}
