use bigdecimal::BigDecimal;
use error_stack::Report;
use num::{BigInt, Num, Zero};
use std::str::FromStr;

use super::{EvalError, EvalResult, MAX_DECIMAL_EXPONENT, MAX_SHIFT};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(BigInt),
    Float(BigDecimal),
    Bool(bool),
    Op(Op),
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    AndNot,
    Shl,
    Shr,
    LogicalAnd,
    LogicalOr,
    Not,
    Tilde,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    pub fn symbol(&self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Rem => "%",
            Op::And => "&",
            Op::Or => "|",
            Op::Xor => "^",
            Op::AndNot => "&^",
            Op::Shl => "<<",
            Op::Shr => ">>",
            Op::LogicalAnd => "&&",
            Op::LogicalOr => "||",
            Op::Not => "!",
            Op::Tilde => "~",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        }
    }
}

pub fn tokenize(input: &str) -> EvalResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = vec![];
    let mut pos = 0;
    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(pos + 1).map_or(false, |n| n.is_ascii_digit()))
        {
            let (token, next) = lex_number(&chars, pos)?;
            tokens.push(token);
            pos = next;
            continue;
        }
        if c.is_ascii_alphabetic() {
            let start = pos;
            while pos < chars.len() && chars[pos].is_ascii_alphanumeric() {
                pos += 1;
            }
            let word: String = chars[start..pos].iter().collect();
            match word.as_str() {
                "true" => tokens.push(Token::Bool(true)),
                "false" => tokens.push(Token::Bool(false)),
                _ => {
                    return Err(Report::new(EvalError::Syntax)
                        .attach_printable(format!("unexpected identifier '{}'", word)))
                }
            }
            continue;
        }
        let next = chars.get(pos + 1).copied();
        let (token, width) = match (c, next) {
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('&', Some('&')) => (Token::Op(Op::LogicalAnd), 2),
            ('&', Some('^')) => (Token::Op(Op::AndNot), 2),
            ('&', _) => (Token::Op(Op::And), 1),
            ('|', Some('|')) => (Token::Op(Op::LogicalOr), 2),
            ('|', _) => (Token::Op(Op::Or), 1),
            ('<', Some('<')) => (Token::Op(Op::Shl), 2),
            ('<', Some('=')) => (Token::Op(Op::Le), 2),
            ('<', _) => (Token::Op(Op::Lt), 1),
            ('>', Some('>')) => (Token::Op(Op::Shr), 2),
            ('>', Some('=')) => (Token::Op(Op::Ge), 2),
            ('>', _) => (Token::Op(Op::Gt), 1),
            ('=', Some('=')) => (Token::Op(Op::Eq), 2),
            ('!', Some('=')) => (Token::Op(Op::Ne), 2),
            ('!', _) => (Token::Op(Op::Not), 1),
            ('+', _) => (Token::Op(Op::Add), 1),
            ('-', _) => (Token::Op(Op::Sub), 1),
            ('*', _) => (Token::Op(Op::Mul), 1),
            ('/', _) => (Token::Op(Op::Div), 1),
            ('%', _) => (Token::Op(Op::Rem), 1),
            ('^', _) => (Token::Op(Op::Xor), 1),
            ('~', _) => (Token::Op(Op::Tilde), 1),
            _ => {
                return Err(Report::new(EvalError::Syntax)
                    .attach_printable(format!("unexpected character '{}' at {}", c, pos)))
            }
        };
        tokens.push(token);
        pos += width;
    }
    Ok(tokens)
}

fn lex_number(chars: &[char], start: usize) -> EvalResult<(Token, usize)> {
    let is_hex = chars[start] == '0'
        && matches!(chars.get(start + 1), Some('x') | Some('X'))
        && chars.get(start + 2).map_or(false, |c| c.is_ascii_hexdigit() || *c == '.');
    if is_hex {
        return lex_hex_number(chars, start + 2);
    }

    let mut pos = start;
    let mut is_float = false;
    while pos < chars.len() && chars[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < chars.len() && chars[pos] == '.' {
        is_float = true;
        pos += 1;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
        let mut exp_end = pos + 1;
        if exp_end < chars.len() && (chars[exp_end] == '+' || chars[exp_end] == '-') {
            exp_end += 1;
        }
        let digits_start = exp_end;
        while exp_end < chars.len() && chars[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end == digits_start {
            return Err(Report::new(EvalError::Syntax)
                .attach_printable("exponent has no digits".to_string()));
        }
        let exp_literal: String = chars[digits_start..exp_end].iter().collect();
        if exp_literal.parse::<i64>().map_or(true, |exp| exp > MAX_DECIMAL_EXPONENT) {
            return Err(Report::new(EvalError::Unsupported)
                .attach_printable(format!("decimal exponent {} is out of range", exp_literal)));
        }
        is_float = true;
        pos = exp_end;
    }
    let literal: String = chars[start..pos].iter().collect();
    let token = if is_float {
        let value = BigDecimal::from_str(&literal).map_err(|e| {
            Report::new(EvalError::Syntax)
                .attach_printable(format!("malformed float literal '{}': {}", literal, e))
        })?;
        Token::Float(value)
    } else {
        let value = BigInt::from_str(&literal).map_err(|e| {
            Report::new(EvalError::Syntax)
                .attach_printable(format!("malformed integer literal '{}': {}", literal, e))
        })?;
        Token::Int(value)
    };
    Ok((token, pos))
}

/// Hex literals, including hex floats with a binary exponent (`0x1.8p1`).
fn lex_hex_number(chars: &[char], digits_start: usize) -> EvalResult<(Token, usize)> {
    let mut pos = digits_start;
    let mut mantissa_digits = String::new();
    let mut fraction_digits = 0i64;
    let mut seen_point = false;
    while pos < chars.len() {
        let c = chars[pos];
        if c.is_ascii_hexdigit() {
            mantissa_digits.push(c);
            if seen_point {
                fraction_digits += 1;
            }
        } else if c == '.' && !seen_point {
            seen_point = true;
        } else {
            break;
        }
        pos += 1;
    }
    if mantissa_digits.is_empty() {
        return Err(Report::new(EvalError::Syntax)
            .attach_printable("hex literal has no digits".to_string()));
    }
    let mantissa = BigInt::from_str_radix(&mantissa_digits, 16).map_err(|e| {
        Report::new(EvalError::Syntax).attach_printable(format!("malformed hex literal: {}", e))
    })?;

    let mut binary_exp: Option<i64> = None;
    if pos < chars.len() && (chars[pos] == 'p' || chars[pos] == 'P') {
        let mut exp_end = pos + 1;
        let mut negative = false;
        if exp_end < chars.len() && (chars[exp_end] == '+' || chars[exp_end] == '-') {
            negative = chars[exp_end] == '-';
            exp_end += 1;
        }
        let exp_start = exp_end;
        while exp_end < chars.len() && chars[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end == exp_start {
            return Err(Report::new(EvalError::Syntax)
                .attach_printable("hex float exponent has no digits".to_string()));
        }
        let exp_literal: String = chars[exp_start..exp_end].iter().collect();
        let exp = exp_literal.parse::<i64>().map_err(|_| out_of_range(&exp_literal))?;
        binary_exp = Some(if negative { -exp } else { exp });
        pos = exp_end;
    }

    if !seen_point && binary_exp.is_none() {
        return Ok((Token::Int(mantissa), pos));
    }
    if seen_point && binary_exp.is_none() {
        return Err(Report::new(EvalError::Syntax)
            .attach_printable("hex float literal requires a 'p' exponent".to_string()));
    }
    let exp = binary_exp
        .unwrap_or(0)
        .checked_sub(4 * fraction_digits)
        .ok_or_else(|| out_of_range(&binary_exp.unwrap_or(0).to_string()))?;
    Ok((Token::Float(scale_by_power_of_two(mantissa, exp)?), pos))
}

fn out_of_range(exp: &str) -> Report<EvalError> {
    Report::new(EvalError::Unsupported)
        .attach_printable(format!("binary exponent {} is out of range", exp))
}

fn scale_by_power_of_two(mantissa: BigInt, exp: i64) -> EvalResult<BigDecimal> {
    if mantissa.is_zero() {
        return Ok(BigDecimal::zero());
    }
    let n = u32::try_from(exp.unsigned_abs())
        .ok()
        .filter(|n| u64::from(*n) <= MAX_SHIFT)
        .ok_or_else(|| out_of_range(&exp.to_string()))?;
    if exp >= 0 {
        Ok(BigDecimal::new(mantissa << n as usize, 0))
    } else {
        // m / 2^n == m * 5^n / 10^n
        Ok(BigDecimal::new(mantissa * num::pow(BigInt::from(5u8), n as usize), i64::from(n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_char_operators_take_precedence() {
        let tokens = tokenize("1 &^ 2 << 3 && true").unwrap();
        assert_eq!(tokens[1], Token::Op(Op::AndNot));
        assert_eq!(tokens[3], Token::Op(Op::Shl));
        assert_eq!(tokens[5], Token::Op(Op::LogicalAnd));
        assert_eq!(tokens[6], Token::Bool(true));
    }

    #[test]
    fn test_hex_float_scaling() {
        let tokens = tokenize("0x1.8p1").unwrap();
        assert_eq!(tokens, vec![Token::Float(BigDecimal::from(3))]);
        let tokens = tokenize("0x1p-2").unwrap();
        assert_eq!(tokens, vec![Token::Float(BigDecimal::from_str("0.25").unwrap())]);
    }

    #[test]
    fn test_exponent_limits() {
        let error = tokenize("0x1p-4294967297").unwrap_err();
        assert_eq!(error.current_context(), &EvalError::Unsupported);
        let error = tokenize("1e1234").unwrap_err();
        assert_eq!(error.current_context(), &EvalError::Unsupported);
        assert!(tokenize("1e-1233").is_ok());
        assert!(tokenize("1e-99999").is_err());
        assert_eq!(tokenize("0xp1").unwrap_err().current_context(), &EvalError::Syntax);
    }

    #[test]
    fn test_unknown_identifier_is_rejected() {
        assert!(tokenize("5 ether").is_err());
    }
}
