//! A small constant-expression evaluator for parameter and value strings.
//!
//! Integers are arbitrary precision. Floats are arbitrary precision decimals and
//! collapse to integers when the final result has no fractional part, so
//! `5 * 1e8 * 1e9` is an integer while `0.5` stays a float.

mod lexer;

use bigdecimal::BigDecimal;
use error_stack::{Context, Report};
use num::{BigInt, Signed, ToPrimitive, Zero};
use std::fmt;

use lexer::{tokenize, Op, Token};

/// Largest shift count accepted by `<<`, and largest binary exponent of a hex float.
const MAX_SHIFT: u64 = 4096;
/// Largest decimal exponent a number may carry, roughly 2^MAX_SHIFT.
const MAX_DECIMAL_EXPONENT: i64 = 1233;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalError {
    Syntax,
    TypeMismatch,
    DivisionByZero,
    Unsupported,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Syntax => write!(f, "invalid expression syntax"),
            EvalError::TypeMismatch => write!(f, "expression has unexpected kind"),
            EvalError::DivisionByZero => write!(f, "division by zero"),
            EvalError::Unsupported => write!(f, "unsupported operation"),
        }
    }
}

impl Context for EvalError {}

pub type EvalResult<T> = Result<T, Report<EvalError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind {
    Boolean,
    Integer,
    Float,
}

impl fmt::Display for ExprKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprKind::Boolean => write!(f, "boolean"),
            ExprKind::Integer => write!(f, "integer"),
            ExprKind::Float => write!(f, "float"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Bool(bool),
    Integer(BigInt),
    Float(BigDecimal),
}

impl EvalValue {
    pub fn kind(&self) -> ExprKind {
        match self {
            EvalValue::Bool(_) => ExprKind::Boolean,
            EvalValue::Integer(_) => ExprKind::Integer,
            EvalValue::Float(_) => ExprKind::Float,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EvalValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<&BigInt> {
        match self {
            EvalValue::Integer(i) => Some(i),
            _ => None,
        }
    }

    pub fn into_integer(self) -> Option<BigInt> {
        match self {
            EvalValue::Integer(i) => Some(i),
            _ => None,
        }
    }

    fn collapse(self) -> EvalResult<EvalValue> {
        match self {
            EvalValue::Float(f) if f.is_integer() => {
                let (digits, scale) = f.into_bigint_and_exponent();
                if scale < -MAX_DECIMAL_EXPONENT {
                    return Err(Report::new(EvalError::Unsupported)
                        .attach_printable(format!("decimal exponent {} is out of range", -scale)));
                }
                let (int, _) = BigDecimal::new(digits, scale).with_scale(0).into_bigint_and_exponent();
                Ok(EvalValue::Integer(int))
            }
            other => Ok(other),
        }
    }

    fn as_decimal(&self) -> Option<BigDecimal> {
        match self {
            EvalValue::Integer(i) => Some(BigDecimal::new(i.clone(), 0)),
            EvalValue::Float(f) => Some(f.clone()),
            EvalValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for EvalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalValue::Bool(b) => write!(f, "{}", b),
            EvalValue::Integer(i) => write!(f, "{}", i),
            EvalValue::Float(d) => write!(f, "{}", d),
        }
    }
}

/// Returns true when `input` only contains characters an arithmetic expression may use.
///
/// This is a cheap pre-check, not a parse: `"x"` passes and still fails to evaluate.
pub fn is_math_expr(input: &str) -> bool {
    input.chars().all(|c| {
        c.is_ascii_hexdigit()
            || matches!(
                c,
                '+' | '-'
                    | '*'
                    | '/'
                    | '.'
                    | '%'
                    | '&'
                    | '^'
                    | '('
                    | ')'
                    | '<'
                    | '>'
                    | '='
                    | ' '
                    | '~'
                    | '|'
                    | 'x'
                    | 'X'
                    | 'p'
            )
    })
}

/// Evaluates `expression`. When `expected` is non-empty the collapsed result must be one of
/// those kinds.
pub fn evaluate(expression: &str, expected: &[ExprKind]) -> EvalResult<EvalValue> {
    let tokens = tokenize(expression)
        .map_err(|e| e.attach_printable(format!("in expression '{}'", expression)))?;
    if tokens.is_empty() {
        return Err(Report::new(EvalError::Syntax).attach_printable("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser
        .parse_binary(1)
        .map_err(|e| e.attach_printable(format!("in expression '{}'", expression)))?;
    if let Some(token) = parser.peek() {
        return Err(Report::new(EvalError::Syntax)
            .attach_printable(format!("unexpected trailing token {:?}", token))
            .attach_printable(format!("in expression '{}'", expression)));
    }
    let value = value
        .collapse()
        .map_err(|e| e.attach_printable(format!("in expression '{}'", expression)))?;
    if !expected.is_empty() && !expected.contains(&value.kind()) {
        let wanted = expected.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(" or ");
        return Err(Report::new(EvalError::TypeMismatch).attach_printable(format!(
            "'{}' evaluates to {}, expected {}",
            expression,
            value.kind(),
            wanted
        )));
    }
    Ok(value)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn binary_precedence(op: Op) -> Option<u8> {
    match op {
        Op::LogicalOr => Some(1),
        Op::LogicalAnd => Some(2),
        Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => Some(3),
        Op::Add | Op::Sub | Op::Or | Op::Xor => Some(4),
        Op::Mul | Op::Div | Op::Rem | Op::Shl | Op::Shr | Op::And | Op::AndNot => Some(5),
        Op::Not | Op::Tilde => None,
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_binary(&mut self, min_precedence: u8) -> EvalResult<EvalValue> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op)) => *op,
                _ => break,
            };
            let precedence = match binary_precedence(op) {
                Some(p) if p >= min_precedence => p,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_binary(precedence + 1)?;
            lhs = apply_binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> EvalResult<EvalValue> {
        match self.next() {
            Some(Token::Op(op @ (Op::Add | Op::Sub | Op::Not | Op::Xor | Op::Tilde))) => {
                let operand = self.parse_unary()?;
                apply_unary(op, operand)
            }
            Some(Token::LParen) => {
                let value = self.parse_binary(1)?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(Report::new(EvalError::Syntax).attach_printable("missing ')'")),
                }
            }
            Some(Token::Int(i)) => Ok(EvalValue::Integer(i)),
            Some(Token::Float(f)) => Ok(EvalValue::Float(f)),
            Some(Token::Bool(b)) => Ok(EvalValue::Bool(b)),
            Some(token) => Err(Report::new(EvalError::Syntax)
                .attach_printable(format!("unexpected token {:?}", token))),
            None => {
                Err(Report::new(EvalError::Syntax).attach_printable("unexpected end of expression"))
            }
        }
    }
}

fn mismatch(op: Op, lhs: &EvalValue, rhs: &EvalValue) -> Report<EvalError> {
    Report::new(EvalError::TypeMismatch).attach_printable(format!(
        "operator '{}' not defined on {} and {}",
        op.symbol(),
        lhs.kind(),
        rhs.kind()
    ))
}

fn apply_unary(op: Op, operand: EvalValue) -> EvalResult<EvalValue> {
    match (op, operand) {
        (Op::Add, v @ (EvalValue::Integer(_) | EvalValue::Float(_))) => Ok(v),
        (Op::Sub, EvalValue::Integer(i)) => Ok(EvalValue::Integer(-i)),
        (Op::Sub, EvalValue::Float(f)) => Ok(EvalValue::Float(-f)),
        (Op::Not, EvalValue::Bool(b)) => Ok(EvalValue::Bool(!b)),
        (Op::Xor | Op::Tilde, EvalValue::Integer(i)) => Ok(EvalValue::Integer(!i)),
        (op, v) => Err(Report::new(EvalError::TypeMismatch).attach_printable(format!(
            "unary '{}' not defined on {}",
            op.symbol(),
            v.kind()
        ))),
    }
}

fn apply_binary(op: Op, lhs: EvalValue, rhs: EvalValue) -> EvalResult<EvalValue> {
    match op {
        Op::LogicalAnd | Op::LogicalOr => match (&lhs, &rhs) {
            (EvalValue::Bool(a), EvalValue::Bool(b)) => Ok(EvalValue::Bool(if op == Op::LogicalAnd {
                *a && *b
            } else {
                *a || *b
            })),
            _ => Err(mismatch(op, &lhs, &rhs)),
        },
        Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => compare(op, &lhs, &rhs),
        Op::Add | Op::Sub | Op::Mul | Op::Div => arithmetic(op, lhs, rhs),
        Op::Rem | Op::And | Op::Or | Op::Xor | Op::AndNot | Op::Shl | Op::Shr => {
            let (a, b) = match (lhs.clone().collapse()?, rhs.clone().collapse()?) {
                (EvalValue::Integer(a), EvalValue::Integer(b)) => (a, b),
                _ => return Err(mismatch(op, &lhs, &rhs)),
            };
            integer_only(op, a, b)
        }
        Op::Not | Op::Tilde => Err(Report::new(EvalError::Syntax)
            .attach_printable(format!("'{}' is not a binary operator", op.symbol()))),
    }
}

fn compare(op: Op, lhs: &EvalValue, rhs: &EvalValue) -> EvalResult<EvalValue> {
    if let (EvalValue::Bool(a), EvalValue::Bool(b)) = (lhs, rhs) {
        return match op {
            Op::Eq => Ok(EvalValue::Bool(a == b)),
            Op::Ne => Ok(EvalValue::Bool(a != b)),
            _ => Err(mismatch(op, lhs, rhs)),
        };
    }
    let (a, b) = match (lhs.as_decimal(), rhs.as_decimal()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(mismatch(op, lhs, rhs)),
    };
    let result = match op {
        Op::Eq => a == b,
        Op::Ne => a != b,
        Op::Lt => a < b,
        Op::Le => a <= b,
        Op::Gt => a > b,
        Op::Ge => a >= b,
        _ => return Err(mismatch(op, lhs, rhs)),
    };
    Ok(EvalValue::Bool(result))
}

fn arithmetic(op: Op, lhs: EvalValue, rhs: EvalValue) -> EvalResult<EvalValue> {
    if let (EvalValue::Integer(a), EvalValue::Integer(b)) = (&lhs, &rhs) {
        return match op {
            Op::Add => Ok(EvalValue::Integer(a + b)),
            Op::Sub => Ok(EvalValue::Integer(a - b)),
            Op::Mul => Ok(EvalValue::Integer(a * b)),
            Op::Div => {
                if b.is_zero() {
                    return Err(Report::new(EvalError::DivisionByZero));
                }
                // BigInt division truncates toward zero
                Ok(EvalValue::Integer(a / b))
            }
            _ => Err(mismatch(op, &lhs, &rhs)),
        };
    }
    let (a, b) = match (lhs.as_decimal(), rhs.as_decimal()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(mismatch(op, &lhs, &rhs)),
    };
    let result = match op {
        Op::Add => a + b,
        Op::Sub => a - b,
        Op::Mul => a * b,
        Op::Div => {
            if b.is_zero() {
                return Err(Report::new(EvalError::DivisionByZero));
            }
            a / b
        }
        _ => return Err(mismatch(op, &lhs, &rhs)),
    };
    Ok(EvalValue::Float(result))
}

fn integer_only(op: Op, a: BigInt, b: BigInt) -> EvalResult<EvalValue> {
    let value = match op {
        Op::Rem => {
            if b.is_zero() {
                return Err(Report::new(EvalError::DivisionByZero));
            }
            a % b
        }
        Op::And => a & b,
        Op::Or => a | b,
        Op::Xor => a ^ b,
        Op::AndNot => a & !b,
        Op::Shl | Op::Shr => {
            if b.is_negative() {
                return Err(Report::new(EvalError::Unsupported)
                    .attach_printable(format!("negative shift count {}", b)));
            }
            let count = b.to_u64().filter(|c| *c <= MAX_SHIFT).ok_or_else(|| {
                Report::new(EvalError::Unsupported)
                    .attach_printable(format!("shift count {} too large", b))
            })?;
            if op == Op::Shl {
                a << (count as usize)
            } else {
                a >> (count as usize)
            }
        }
        _ => {
            return Err(Report::new(EvalError::Syntax)
                .attach_printable(format!("'{}' is not an integer operator", op.symbol())))
        }
    };
    Ok(EvalValue::Integer(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use test_case::test_case;

    #[test_case("50", ExprKind::Integer ; "positive integer")]
    #[test_case("-50", ExprKind::Integer ; "negative integer")]
    #[test_case("0xFF", ExprKind::Integer ; "hex integer")]
    #[test_case("0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF", ExprKind::Integer ; "67 hex digits")]
    #[test_case("50.99999999999999999999999999999999999999999999999999999999991 * 1e99", ExprKind::Integer ; "float times 1e99")]
    #[test_case("true && true", ExprKind::Boolean ; "boolean conjunction")]
    #[test_case("50 / 10", ExprKind::Integer ; "spaced division")]
    #[test_case("50/10", ExprKind::Integer ; "division")]
    #[test_case("0.5", ExprKind::Float ; "fraction")]
    fn test_literal_forms(expression: &str, kind: ExprKind) {
        let value = evaluate(expression, &[kind]).unwrap();
        assert_eq!(value.kind(), kind);
    }

    #[test]
    fn test_integer_division_truncates() {
        assert_eq!(evaluate("50/10", &[]).unwrap(), EvalValue::Integer(BigInt::from(5)));
        assert_eq!(evaluate("7 / 2", &[]).unwrap(), EvalValue::Integer(BigInt::from(3)));
        assert_eq!(evaluate("-7 / 2", &[]).unwrap(), EvalValue::Integer(BigInt::from(-3)));
    }

    #[test]
    fn test_float_collapses_before_kind_check() {
        let value = evaluate("5 * 1e8 * 1e9", &[ExprKind::Integer]).unwrap();
        assert_eq!(
            value,
            EvalValue::Integer(BigInt::from_str("500000000000000000").unwrap())
        );
        let error = evaluate("0.5", &[ExprKind::Integer]).unwrap_err();
        assert_eq!(error.current_context(), &EvalError::TypeMismatch);
    }

    #[test]
    fn test_large_hex_does_not_overflow() {
        let value = evaluate(
            "0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF",
            &[],
        )
        .unwrap();
        assert_eq!(value.as_integer().unwrap().bits(), 268);
    }

    #[test_case("1e999999999" ; "huge decimal exponent")]
    #[test_case("1e1000 * 1e1000" ; "product beyond the exponent limit")]
    #[test_case("0x1p99999999999" ; "huge binary exponent")]
    #[test_case("0x1p-4294967297" ; "exponent wider than 32 bits")]
    #[test_case("0x1p-4294967297 * 4" ; "truncated exponent in a product")]
    #[test_case("0x1p99999999999999999999" ; "binary exponent beyond i64")]
    fn test_exponents_are_bounded(expression: &str) {
        let error = evaluate(expression, &[]).unwrap_err();
        assert_eq!(error.current_context(), &EvalError::Unsupported);
    }

    #[test]
    fn test_exponents_at_the_limit() {
        let value = evaluate("1e1233", &[ExprKind::Integer]).unwrap();
        assert_eq!(value.as_integer().unwrap().to_string().len(), 1234);
        let value = evaluate("0x1p4096", &[ExprKind::Integer]).unwrap();
        assert_eq!(value.as_integer().unwrap().bits(), 4097);
        let value = evaluate("0x1p-4096 * 0x1p4096", &[]).unwrap();
        assert_eq!(value, EvalValue::Integer(BigInt::from(1)));
    }

    #[test]
    fn test_precedence_and_bitwise() {
        assert_eq!(evaluate("1 + 2 * 3", &[]).unwrap(), EvalValue::Integer(BigInt::from(7)));
        assert_eq!(evaluate("(1 + 2) * 3", &[]).unwrap(), EvalValue::Integer(BigInt::from(9)));
        assert_eq!(evaluate("1 << 8 | 1", &[]).unwrap(), EvalValue::Integer(BigInt::from(257)));
        assert_eq!(evaluate("0xF0 &^ 0x30", &[]).unwrap(), EvalValue::Integer(BigInt::from(0xC0)));
        assert_eq!(evaluate("^0", &[]).unwrap(), EvalValue::Integer(BigInt::from(-1)));
        assert_eq!(evaluate("10 % 3", &[]).unwrap(), EvalValue::Integer(BigInt::from(1)));
    }

    #[test]
    fn test_comparisons_yield_booleans() {
        assert_eq!(evaluate("2 > 1 && 1e2 == 100", &[]).unwrap(), EvalValue::Bool(true));
        assert_eq!(evaluate("!(3 <= 2)", &[ExprKind::Boolean]).unwrap(), EvalValue::Bool(true));
    }

    #[test]
    fn test_errors() {
        assert_eq!(evaluate("1 / 0", &[]).unwrap_err().current_context(), &EvalError::DivisionByZero);
        assert_eq!(evaluate("true + 1", &[]).unwrap_err().current_context(), &EvalError::TypeMismatch);
        assert_eq!(evaluate("(1 + 2", &[]).unwrap_err().current_context(), &EvalError::Syntax);
        assert_eq!(evaluate("", &[]).unwrap_err().current_context(), &EvalError::Syntax);
        assert_eq!(evaluate("1 2", &[]).unwrap_err().current_context(), &EvalError::Syntax);
    }

    #[test_case("5 * 1e8", true)]
    #[test_case("0xFF & (1 << 3)", true)]
    #[test_case("1.5p3", true)]
    #[test_case("5 ether", false)]
    #[test_case("@alice.balance", false)]
    #[test_case("$0 + 1", false)]
    fn test_is_math_expr(input: &str, expected: bool) {
        assert_eq!(is_math_expr(input), expected);
    }
}
