//! Completion condition language.
//!
//! A condition is one or more clauses joined by the keyword `and`; each clause is
//! `method(param)`:
//!
//! ```text
//! condition := clause ("and" clause)*
//! clause    := method "(" param ")"
//! method    := "task" | "input" | "output" | "latest"
//! ```
//!
//! Evaluation is pure AND over every clause of every condition in a completion behaviour. A
//! clause that does not parse, or names an unknown method, is kept and counted but can never be
//! true, so a malformed definition fails closed instead of erroring.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use xdw::{TaskStatus, WorkflowDocument, XdwTask};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,
    #[error("unexpected end of condition, expected {expected}")]
    UnexpectedEnd { expected: &'static str },
    #[error("unexpected {found} in condition, expected {expected}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
    },
    #[error("{method}() requires a parameter")]
    EmptyParam { method: String },
    #[error("unknown condition method {0}")]
    UnknownMethod(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Param(String),
    LParen,
    RParen,
    Unexpected(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "`{w}`"),
            Token::Param(p) => write!(f, "parameter `{p}`"),
            Token::LParen => f.write_str("`(`"),
            Token::RParen => f.write_str("`)`"),
            Token::Unexpected(c) => write!(f, "`{c}`"),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Split condition text into tokens.
///
/// Everything between `(` and the next `)` is a single raw parameter, so part names may contain
/// spaces or punctuation and are never mistaken for the `and` keyword. A nested `(` ends the
/// parameter without closing it.
fn tokenize(input: &str) -> Vec<Token> {
    let mut chars: Peekable<Chars<'_>> = input.chars().peekable();
    let mut tokens = Vec::new();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '(' {
            chars.next();
            tokens.push(Token::LParen);
            let mut param = String::new();
            let mut closed = false;
            while let Some(&c) = chars.peek() {
                if c == '(' {
                    break;
                }
                chars.next();
                if c == ')' {
                    closed = true;
                    break;
                }
                param.push(c);
            }
            tokens.push(Token::Param(param.trim().to_string()));
            if closed {
                tokens.push(Token::RParen);
            }
        } else if c == ')' {
            chars.next();
            tokens.push(Token::RParen);
        } else if is_word_char(c) {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if !is_word_char(c) {
                    break;
                }
                word.push(c);
                chars.next();
            }
            tokens.push(Token::Word(word));
        } else {
            chars.next();
            tokens.push(Token::Unexpected(c));
        }
    }

    tokens
}

/// Condition method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// The referenced task is COMPLETE.
    Task,
    /// The named input part has something attached.
    Input,
    /// The named output part has something attached.
    Output,
    /// The named part is the most recently attached part on the task.
    Latest,
    Unknown(String),
}

impl Method {
    fn from_word(word: &str) -> Self {
        match word {
            "task" => Method::Task,
            "input" => Method::Input,
            "output" => Method::Output,
            "latest" => Method::Latest,
            other => Method::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Task => f.write_str("task"),
            Method::Input => f.write_str("input"),
            Method::Output => f.write_str("output"),
            Method::Latest => f.write_str("latest"),
            Method::Unknown(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Valid { method: Method, param: String },
    Malformed { text: String, error: ConditionError },
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Valid { method, param } => write!(f, "{method}({param})"),
            Clause::Malformed { text, .. } => f.write_str(text),
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_and(&self) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == "and")
    }

    fn expect(&mut self, expected: &'static str, want: &Token) -> Result<(), ConditionError> {
        match self.next() {
            Some(ref t) if t == want => Ok(()),
            Some(t) => Err(ConditionError::UnexpectedToken {
                expected,
                found: t.to_string(),
            }),
            None => Err(ConditionError::UnexpectedEnd { expected }),
        }
    }

    /// Parse `method "(" param ")"`.
    fn parse_clause(&mut self) -> Result<(Method, String), ConditionError> {
        let method = match self.next() {
            Some(Token::Word(w)) if w != "and" => Method::from_word(&w),
            Some(t) => {
                return Err(ConditionError::UnexpectedToken {
                    expected: "a method name",
                    found: t.to_string(),
                })
            }
            None => {
                return Err(ConditionError::UnexpectedEnd {
                    expected: "a method name",
                })
            }
        };

        self.expect("`(`", &Token::LParen)?;
        let param = match self.next() {
            Some(Token::Param(p)) => p,
            Some(t) => {
                return Err(ConditionError::UnexpectedToken {
                    expected: "a parameter",
                    found: t.to_string(),
                })
            }
            None => return Err(ConditionError::UnexpectedEnd { expected: "a parameter" }),
        };
        self.expect("`)`", &Token::RParen)?;

        if param.is_empty() {
            return Err(ConditionError::EmptyParam {
                method: method.to_string(),
            });
        }
        Ok((method, param))
    }

    /// Skip to the next `and` so one bad clause does not swallow the rest of the condition.
    fn recover(&mut self, start: usize) -> String {
        while self.peek().is_some() && !self.at_and() {
            self.pos += 1;
        }
        self.tokens[start..self.pos]
            .iter()
            .map(|t| match t {
                Token::Word(w) => w.clone(),
                Token::Param(p) => p.clone(),
                Token::LParen => "(".into(),
                Token::RParen => ")".into(),
                Token::Unexpected(c) => c.to_string(),
            })
            .collect::<Vec<_>>()
            .join("")
    }

    fn parse_condition(&mut self) -> Vec<Clause> {
        let mut clauses = Vec::new();
        loop {
            let start = self.pos;
            let clause = match self.parse_clause() {
                Ok((method, param)) if self.peek().is_none() || self.at_and() => {
                    Clause::Valid { method, param }
                }
                Ok(_) => {
                    let found = self.peek().map(Token::to_string).unwrap_or_default();
                    let text = self.recover(start);
                    Clause::Malformed {
                        text,
                        error: ConditionError::UnexpectedToken {
                            expected: "`and`",
                            found,
                        },
                    }
                }
                Err(error) => {
                    let text = self.recover(start);
                    Clause::Malformed { text, error }
                }
            };
            clauses.push(clause);

            if self.at_and() {
                self.pos += 1;
                continue;
            }
            break;
        }
        clauses
    }
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    clauses: Vec<Clause>,
}

impl Condition {
    /// Parse condition text, keeping malformed clauses as [`Clause::Malformed`].
    ///
    /// Blank text yields a condition with no clauses.
    pub fn parse(text: &str) -> Self {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Self {
                clauses: Vec::new(),
            };
        }
        Self {
            clauses: Parser::new(tokens).parse_condition(),
        }
    }

    /// Parse condition text, failing on the first malformed clause or unknown method.
    ///
    /// # Errors
    ///
    /// Returns a [`ConditionError`] describing the first problem found.
    pub fn parse_strict(text: &str) -> Result<Self, ConditionError> {
        let condition = Self::parse(text);
        if condition.clauses.is_empty() {
            return Err(ConditionError::Empty);
        }
        for clause in &condition.clauses {
            match clause {
                Clause::Malformed { error, .. } => return Err(error.clone()),
                Clause::Valid {
                    method: Method::Unknown(name),
                    ..
                } => return Err(ConditionError::UnknownMethod(name.clone())),
                Clause::Valid { .. } => {}
            }
        }
        Ok(condition)
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
}

/// All completion conditions attached to a task or to the workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionBehavior {
    clauses: Vec<Clause>,
}

impl CompletionBehavior {
    pub fn from_conditions<'a>(conditions: impl IntoIterator<Item = &'a String>) -> Self {
        let clauses = conditions
            .into_iter()
            .flat_map(|c| Condition::parse(c).clauses)
            .collect();
        Self { clauses }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Evaluate task-level behaviour against `task` within `document`.
    ///
    /// An empty behaviour has no unmet clause and is satisfied.
    pub fn evaluate_task(&self, task: &XdwTask, document: &WorkflowDocument) -> bool {
        self.all_true(|method, param| match method {
            Method::Task => task_complete(document, param),
            Method::Input => task.input(param).is_some_and(|p| p.is_attached()),
            Method::Output => task.output(param).is_some_and(|p| p.is_attached()),
            Method::Latest => task.latest_attached().is_some_and(|p| p.name == param),
            Method::Unknown(name) => {
                tracing::warn!(
                    task = %task.details.id,
                    "unknown completion method {name}({param}) treated as unsatisfied"
                );
                false
            }
        })
    }

    /// Evaluate workflow-level behaviour. Only `task(id)` clauses can be satisfied here.
    pub fn evaluate_workflow(&self, document: &WorkflowDocument) -> bool {
        self.all_true(|method, param| match method {
            Method::Task => task_complete(document, param),
            other => {
                tracing::warn!(
                    workflow = %document.workflow_instance_id,
                    "workflow completion only supports task(), ignoring {other}({param})"
                );
                false
            }
        })
    }

    /// True when every clause holds. Vacuously true with no clauses.
    fn all_true(&self, mut check: impl FnMut(&Method, &str) -> bool) -> bool {
        let satisfied = self
            .clauses
            .iter()
            .filter(|clause| match clause {
                Clause::Valid { method, param } => check(method, param),
                Clause::Malformed { text, error } => {
                    tracing::warn!("malformed completion clause {text:?} treated as unsatisfied: {error}");
                    false
                }
            })
            .count();
        satisfied == self.clauses.len()
    }
}

fn task_complete(document: &WorkflowDocument, id: &str) -> bool {
    match document.task(id) {
        Some(task) => task.details.status == TaskStatus::Complete,
        None => {
            tracing::warn!(
                workflow = %document.workflow_instance_id,
                "completion clause references unknown task {id}"
            );
            false
        }
    }
}
