use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("cannot parse expression: {0}")]
    Parse(String),
    #[error("unknown reference '{0}'")]
    UnknownReference(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Equal,
    NotEqual,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    /// Time-series column (`RESOURCE;COLUMN`) or variable (`$var.NAME`)
    Reference(String),
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Symbolic expression over time-series columns and variables. Operators
/// are written in braces (`{+} {-} {*} {/}`); comparisons produce 1 or 0.
///
/// `SIM;WATER_PROD {+} $var.extra > 1000`
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, index: 0 };
        let root = parser.comparison()?;
        if parser.index != parser.tokens.len() {
            return Err(ExpressionError::Parse(format!(
                "trailing input after expression: '{}'",
                source
            )));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// A constant expression; avoids stringly-typed round trips for plain
    /// numeric configuration values.
    pub fn constant(value: f64) -> Self {
        Self {
            source: value.to_string(),
            root: Node::Number(value),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every reference mentioned in the expression.
    pub fn references(&self) -> Vec<&str> {
        fn collect<'a>(node: &'a Node, out: &mut Vec<&'a str>) {
            match node {
                Node::Number(_) => {}
                Node::Reference(name) => out.push(name),
                Node::Binary { left, right, .. } => {
                    collect(left, out);
                    collect(right, out);
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.root, &mut out);
        out
    }

    /// Evaluate to a scalar with a reference resolver. Division by zero
    /// propagates as a non-finite value rather than failing the period.
    pub fn evaluate<R>(&self, resolver: &R) -> Result<f64, ExpressionError>
    where
        R: Fn(&str) -> Option<f64>,
    {
        fn walk<R>(node: &Node, resolver: &R) -> Result<f64, ExpressionError>
        where
            R: Fn(&str) -> Option<f64>,
        {
            match node {
                Node::Number(value) => Ok(*value),
                Node::Reference(name) => resolver(name)
                    .ok_or_else(|| ExpressionError::UnknownReference(name.clone())),
                Node::Binary { op, left, right } => {
                    let l = walk(left, resolver)?;
                    let r = walk(right, resolver)?;
                    Ok(match op {
                        BinaryOp::Add => l + r,
                        BinaryOp::Subtract => l - r,
                        BinaryOp::Multiply => l * r,
                        BinaryOp::Divide => l / r,
                        BinaryOp::Greater => bool_value(l > r),
                        BinaryOp::GreaterEqual => bool_value(l >= r),
                        BinaryOp::Less => bool_value(l < r),
                        BinaryOp::LessEqual => bool_value(l <= r),
                        BinaryOp::Equal => bool_value(l == r),
                        BinaryOp::NotEqual => bool_value(l != r),
                    })
                }
            }
        }
        walk(&self.root, resolver)
    }

    /// Evaluate as a condition: non-zero is true.
    pub fn evaluate_condition<R>(&self, resolver: &R) -> Result<bool, ExpressionError>
    where
        R: Fn(&str) -> Option<f64>,
    {
        Ok(self.evaluate(resolver)? != 0.0)
    }
}

fn bool_value(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::parse(s)
    }
}

impl Serialize for Expression {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Expression::parse(&source).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Reference(String),
    Operator(BinaryOp),
    OpenParen,
    CloseParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::OpenParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::CloseParen);
            }
            '{' => {
                let mut op = String::new();
                chars.next();
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                    op.push(inner);
                }
                let op = match op.as_str() {
                    "+" => BinaryOp::Add,
                    "-" => BinaryOp::Subtract,
                    "*" => BinaryOp::Multiply,
                    "/" => BinaryOp::Divide,
                    other => {
                        return Err(ExpressionError::Parse(format!(
                            "unknown operator '{{{}}}'",
                            other
                        )))
                    }
                };
                tokens.push(Token::Operator(op));
            }
            '>' | '<' | '=' | '!' => {
                chars.next();
                let double = chars.peek() == Some(&'=');
                if double {
                    chars.next();
                }
                let op = match (c, double) {
                    ('>', false) => BinaryOp::Greater,
                    ('>', true) => BinaryOp::GreaterEqual,
                    ('<', false) => BinaryOp::Less,
                    ('<', true) => BinaryOp::LessEqual,
                    ('=', true) => BinaryOp::Equal,
                    ('!', true) => BinaryOp::NotEqual,
                    _ => {
                        return Err(ExpressionError::Parse(format!(
                            "unexpected character '{}' in '{}'",
                            c, source
                        )))
                    }
                };
                tokens.push(Token::Operator(op));
            }
            _ => {
                let mut word = String::new();
                while let Some(&w) = chars.peek() {
                    if w == ' ' || w == '\t' || w == '(' || w == ')' || w == '{' {
                        break;
                    }
                    word.push(w);
                    chars.next();
                }
                match word.parse::<f64>() {
                    Ok(number) => tokens.push(Token::Number(number)),
                    Err(_) => tokens.push(Token::Reference(word)),
                }
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn comparison(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.additive()?;
        while let Some(Token::Operator(op)) = self.peek() {
            let op = *op;
            if !matches!(
                op,
                BinaryOp::Greater
                    | BinaryOp::GreaterEqual
                    | BinaryOp::Less
                    | BinaryOp::LessEqual
                    | BinaryOp::Equal
                    | BinaryOp::NotEqual
            ) {
                break;
            }
            self.index += 1;
            let right = self.additive()?;
            node = Node::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn additive(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.multiplicative()?;
        while let Some(Token::Operator(op)) = self.peek() {
            let op = *op;
            if !matches!(op, BinaryOp::Add | BinaryOp::Subtract) {
                break;
            }
            self.index += 1;
            let right = self.multiplicative()?;
            node = Node::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn multiplicative(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.atom()?;
        while let Some(Token::Operator(op)) = self.peek() {
            let op = *op;
            if !matches!(op, BinaryOp::Multiply | BinaryOp::Divide) {
                break;
            }
            self.index += 1;
            let right = self.atom()?;
            node = Node::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn atom(&mut self) -> Result<Node, ExpressionError> {
        match self.peek().cloned() {
            Some(Token::Number(value)) => {
                self.index += 1;
                Ok(Node::Number(value))
            }
            Some(Token::Reference(name)) => {
                self.index += 1;
                Ok(Node::Reference(name))
            }
            Some(Token::OpenParen) => {
                self.index += 1;
                let node = self.comparison()?;
                match self.peek() {
                    Some(Token::CloseParen) => {
                        self.index += 1;
                        Ok(node)
                    }
                    _ => Err(ExpressionError::Parse("missing closing parenthesis".to_string())),
                }
            }
            other => Err(ExpressionError::Parse(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn resolver(name: &str) -> Option<f64> {
        match name {
            "SIM;WATER_PROD" => Some(1000.0),
            "SIM;GAS_PROD" => Some(2.6e6),
            "$var.extra" => Some(50.0),
            _ => None,
        }
    }

    #[test]
    fn arithmetic_with_braced_operators() {
        let expr = Expression::parse("SIM;WATER_PROD {+} $var.extra {*} 2").unwrap();
        // Multiplication binds tighter than addition
        assert_relative_eq!(expr.evaluate(&resolver).unwrap(), 1100.0);
    }

    #[test]
    fn parentheses_override_precedence() {
        let expr = Expression::parse("(SIM;WATER_PROD {+} $var.extra) {*} 2").unwrap();
        assert_relative_eq!(expr.evaluate(&resolver).unwrap(), 2100.0);
    }

    #[test]
    fn comparisons_yield_booleans() {
        let expr = Expression::parse("SIM;WATER_PROD > 0").unwrap();
        assert!(expr.evaluate_condition(&resolver).unwrap());
        let expr = Expression::parse("SIM;WATER_PROD <= 999").unwrap();
        assert!(!expr.evaluate_condition(&resolver).unwrap());
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let expr = Expression::parse("SIM;MISSING {+} 1").unwrap();
        assert_eq!(
            expr.evaluate(&resolver).unwrap_err(),
            ExpressionError::UnknownReference("SIM;MISSING".to_string())
        );
    }

    #[test]
    fn references_are_collected() {
        let expr = Expression::parse("SIM;GAS_PROD {/} $var.extra").unwrap();
        assert_eq!(expr.references(), vec!["SIM;GAS_PROD", "$var.extra"]);
    }

    #[test]
    fn malformed_operator_fails_to_parse() {
        assert!(Expression::parse("1 {%} 2").is_err());
        assert!(Expression::parse("(1 {+} 2").is_err());
    }

    #[test]
    fn division_by_zero_propagates_non_finite() {
        let expr = Expression::parse("1 {/} 0").unwrap();
        assert!(!expr.evaluate(&resolver).unwrap().is_finite());
    }
}
