use thiserror::Error;

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};
use super::token::{lex, Token};

/// Load-time expression defects. Any of these rejects the whole graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected character '{ch}' at byte {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("malformed number '{0}'")]
    BadNumber(String),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("expected {expected}, found {found}")]
    Expected { expected: String, found: String },

    #[error("trailing input after expression: {0}")]
    TrailingInput(String),

    #[error("only named functions can be called")]
    CallOnNonIdent,

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
}

/// Parse one expression string into an AST. Deterministic: the same source
/// always yields the same tree.
pub fn parse(src: &str) -> Result<Expr, ParseError> {
    let tokens = lex(src)?;
    let mut p = Parser { tokens, pos: 0 };
    let expr = p.or_expr()?;
    if let Some(tok) = p.peek() {
        return Err(ParseError::TrailingInput(tok.describe()));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn eat(&mut self, expected: &Token) -> Result<(), ParseError> {
        match self.peek() {
            Some(tok) if tok == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(tok) => Err(ParseError::Expected {
                expected: expected.describe(),
                found: tok.describe(),
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    // precedence, loosest first: or < and < not < comparison < +- < */% < unary -
    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.not_expr()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.not_expr()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let expr = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.additive()?;
        while let Some(op) = self.peek().and_then(cmp_op) {
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            let expr = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.advance()? {
                        Token::Ident(attr) => {
                            expr = Expr::Attr {
                                base: Box::new(expr),
                                attr,
                            };
                        }
                        other => {
                            return Err(ParseError::Expected {
                                expected: "attribute name".into(),
                                found: other.describe(),
                            })
                        }
                    }
                }
                Some(Token::LParen) => {
                    let Expr::Ident(name) = expr else {
                        return Err(ParseError::CallOnNonIdent);
                    };
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.or_expr()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.pos += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    self.eat(&Token::RParen)?;
                    expr = Expr::Call { name, args };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance()? {
            Token::Number(n) => Ok(Expr::Literal(Literal::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Literal::Str(s))),
            Token::Date(d) => Ok(Expr::Literal(Literal::Date(d))),
            Token::True => Ok(Expr::Literal(Literal::Bool(true))),
            Token::False => Ok(Expr::Literal(Literal::Bool(false))),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::LParen => {
                let expr = self.or_expr()?;
                self.eat(&Token::RParen)?;
                Ok(expr)
            }
            other => Err(ParseError::Expected {
                expected: "literal, identifier or '('".into(),
                found: other.describe(),
            }),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn cmp_op(tok: &Token) -> Option<BinaryOp> {
    match tok {
        Token::Lt => Some(BinaryOp::Lt),
        Token::Le => Some(BinaryOp::Le),
        Token::Gt => Some(BinaryOp::Gt),
        Token::Ge => Some(BinaryOp::Ge),
        Token::EqEq => Some(BinaryOp::Eq),
        Token::NotEq => Some(BinaryOp::Ne),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn precedence_mul_over_add() {
        let expr = parse("1 + 2 * 3").unwrap();
        let Expr::Binary { op: BinaryOp::Add, rhs, .. } = expr else {
            panic!("expected top-level add");
        };
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn precedence_and_over_or() {
        let expr = parse("true or false and false").unwrap();
        let Expr::Binary { op: BinaryOp::Or, rhs, .. } = expr else {
            panic!("expected top-level or");
        };
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn comparison_binds_tighter_than_and() {
        let expr = parse("current.close >= 10000 and current.volume >= 1_000_000").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn parses_attribute_chain_and_call() {
        let expr = parse("within_range(current.close, block1.peak_price, 5)").unwrap();
        let Expr::Call { name, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "within_range");
        assert_eq!(args.len(), 3);
        assert!(matches!(&args[1], Expr::Attr { attr, .. } if attr == "peak_price"));
    }

    #[test]
    fn parses_nested_calls() {
        let expr = parse("ma(5) > ma(20)").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Gt, .. }));
    }

    #[test]
    fn parses_unary_not_and_neg() {
        let expr = parse("not is_new_high(60)").unwrap();
        assert!(matches!(expr, Expr::Unary { op: UnaryOp::Not, .. }));
        let expr = parse("-current.close < -9000").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Lt, .. }));
    }

    #[test]
    fn parses_date_literal() {
        let expr = parse("block1.started_at >= 2023-06-01").unwrap();
        let Expr::Binary { rhs, .. } = expr else {
            panic!("expected comparison");
        };
        assert_eq!(
            *rhs,
            Expr::Literal(Literal::Date(NaiveDate::from_ymd_opt(2023, 6, 1).unwrap()))
        );
    }

    #[test]
    fn parentheses_override_precedence() {
        let expr = parse("(1 + 2) * 3").unwrap();
        let Expr::Binary { op: BinaryOp::Mul, lhs, .. } = expr else {
            panic!("expected top-level mul");
        };
        assert!(matches!(*lhs, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn rejects_trailing_input() {
        assert!(matches!(parse("1 + 2 3"), Err(ParseError::TrailingInput(_))));
    }

    #[test]
    fn rejects_empty_and_dangling() {
        assert!(matches!(parse(""), Err(ParseError::UnexpectedEnd)));
        assert!(matches!(parse("1 +"), Err(ParseError::UnexpectedEnd)));
        assert!(matches!(parse("ma(5"), Err(ParseError::UnexpectedEnd)));
    }

    #[test]
    fn rejects_call_on_non_identifier() {
        assert!(matches!(parse("(ma)(5)"), Err(ParseError::CallOnNonIdent)));
    }

    #[test]
    fn same_source_same_tree() {
        let a = parse("current.close >= block1.peak_price * 1.05").unwrap();
        let b = parse("current.close >= block1.peak_price * 1.05").unwrap();
        assert_eq!(a, b);
    }
}
