//! Two-operand arithmetic evaluation.
//!
//! Grammar: `<number> <operator> <number>`, or `<number> !` for factorial.
//! Numbers are decimal digits with at most one `.` and an optional leading
//! `-`. Operators: `* / + - % ^ !`.
//!
//! Evaluation never fails from the caller's point of view: parse and
//! arithmetic errors come back as displayable text in place of the result.

use thiserror::Error;

/// Arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Factorial,
}

impl Operator {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Operator::Add),
            '-' => Some(Operator::Sub),
            '*' => Some(Operator::Mul),
            '/' => Some(Operator::Div),
            '%' => Some(Operator::Rem),
            '^' => Some(Operator::Pow),
            '!' => Some(Operator::Factorial),
            _ => None,
        }
    }
}

/// Which operand failed to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    First,
    Second,
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::First => f.write_str("first"),
            Operand::Second => f.write_str("second"),
        }
    }
}

/// Reasons an expression cannot be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("unrecognized symbol '{0}'")]
    UnrecognizedSymbol(char),
    #[error("too many decimal points")]
    TooManyDecimalPoints,
    #[error("too many operators")]
    TooManyOperators,
    #[error("missing operator")]
    MissingOperator,
    #[error("factorial takes a single operand")]
    UnexpectedOperand,
    #[error("invalid {0} operand '{1}'")]
    InvalidOperand(Operand, String),
    #[error("factorial requires a non-negative integer")]
    FactorialDomain,
}

/// Parsed form of an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub first: String,
    pub operator: Operator,
    /// Empty for factorial.
    pub second: String,
}

/// Result of a successful computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Value(f64),
    /// Remainder by zero.
    Undefined,
}

impl Expression {
    /// Split `text` into operands and operator in a single left-to-right scan.
    pub fn parse(text: &str) -> Result<Self, EvalError> {
        let mut first = String::new();
        let mut second = String::new();
        let mut operator = None;

        for c in text.chars() {
            let operand = if operator.is_some() {
                &mut second
            } else {
                &mut first
            };

            match c {
                '0'..='9' => operand.push(c),
                '.' => {
                    if operand.contains('.') {
                        return Err(EvalError::TooManyDecimalPoints);
                    }
                    operand.push(c);
                }
                // sign of the first operand, not subtraction
                '-' if operator.is_none() && operand.is_empty() => operand.push(c),
                _ => match Operator::from_char(c) {
                    Some(op) if operator.is_none() => operator = Some(op),
                    Some(_) => return Err(EvalError::TooManyOperators),
                    None => return Err(EvalError::UnrecognizedSymbol(c)),
                },
            }
        }

        let operator = operator.ok_or(EvalError::MissingOperator)?;
        if operator == Operator::Factorial && !second.is_empty() {
            return Err(EvalError::UnexpectedOperand);
        }

        Ok(Self {
            first,
            operator,
            second,
        })
    }

    /// Convert the operands and apply the operator.
    pub fn compute(&self) -> Result<Outcome, EvalError> {
        let lhs = to_number(&self.first, Operand::First)?;
        let rhs = || to_number(&self.second, Operand::Second);

        let value = match self.operator {
            Operator::Add => lhs + rhs()?,
            Operator::Sub => lhs - rhs()?,
            Operator::Mul => lhs * rhs()?,
            Operator::Div => lhs / rhs()?,
            Operator::Pow => lhs.powf(rhs()?),
            Operator::Rem => match rhs()? {
                divisor if divisor == 0.0 => return Ok(Outcome::Undefined),
                divisor => lhs % divisor,
            },
            Operator::Factorial => factorial(lhs)?,
        };
        Ok(Outcome::Value(value))
    }
}

fn to_number(text: &str, which: Operand) -> Result<f64, EvalError> {
    text.parse::<f64>()
        .map_err(|_| EvalError::InvalidOperand(which, text.to_string()))
}

/// Iterative n!, rounding each partial product. Stops once it overflows.
fn factorial(n: f64) -> Result<f64, EvalError> {
    if n < 0.0 || n.fract() != 0.0 {
        return Err(EvalError::FactorialDomain);
    }

    let mut result = 1.0_f64;
    let mut i = 2.0_f64;
    while i <= n && result.is_finite() {
        result = (result * i).round();
        i += 1.0;
    }
    Ok(result)
}

/// Evaluate `text`, returning either the formatted result or an error message.
pub fn evaluate(text: &str) -> String {
    match Expression::parse(text).and_then(|expr| expr.compute()) {
        Ok(Outcome::Value(value)) => value.to_string(),
        Ok(Outcome::Undefined) => "Undefined".to_string(),
        Err(e) => format!("Error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operators() {
        assert_eq!(evaluate("3+4"), "7");
        assert_eq!(evaluate("10/2"), "5");
        assert_eq!(evaluate("6*7"), "42");
        assert_eq!(evaluate("9-12"), "-3");
        assert_eq!(evaluate("2^10"), "1024");
        assert_eq!(evaluate("7%3"), "1");
        assert_eq!(evaluate("7.5%2"), "1.5");
        assert_eq!(evaluate("1/4"), "0.25");
    }

    #[test]
    fn test_factorial() {
        assert_eq!(evaluate("5!"), "120");
        assert_eq!(evaluate("0!"), "1");
        assert_eq!(evaluate("1!"), "1");
        assert_eq!(evaluate("5.0!"), "120");
        assert_eq!(evaluate("10!"), "3628800");
    }

    #[test]
    fn test_factorial_overflow_terminates() {
        assert_eq!(evaluate("100000000!"), "inf");
    }

    #[test]
    fn test_remainder_by_zero() {
        assert_eq!(evaluate("7%0"), "Undefined");
        assert_eq!(evaluate("7%0.0"), "Undefined");
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(evaluate("1/0"), "inf");
    }

    #[test]
    fn test_signed_operands() {
        assert_eq!(evaluate("-3+4"), "1");
        assert_eq!(evaluate("-3*-2"), "Error: too many operators");
        assert_eq!(Expression::parse("5*-2"), Err(EvalError::TooManyOperators));
        assert_eq!(Expression::parse("3--4"), Err(EvalError::TooManyOperators));
    }

    #[test]
    fn test_unrecognized_symbol() {
        let result = evaluate("3a4");
        assert!(result.starts_with("Error"));
        assert!(result.contains('a'));
        assert_eq!(
            Expression::parse("3a4"),
            Err(EvalError::UnrecognizedSymbol('a'))
        );
        assert_eq!(
            Expression::parse("3 + 4"),
            Err(EvalError::UnrecognizedSymbol(' '))
        );
    }

    #[test]
    fn test_too_many_decimal_points() {
        assert_eq!(
            Expression::parse("3.1.2+4"),
            Err(EvalError::TooManyDecimalPoints)
        );
        assert_eq!(
            Expression::parse("3+4.1.2"),
            Err(EvalError::TooManyDecimalPoints)
        );
        assert_eq!(evaluate("3.1.2+4"), "Error: too many decimal points");
    }

    #[test]
    fn test_too_many_operators() {
        assert_eq!(Expression::parse("1+2+3"), Err(EvalError::TooManyOperators));
        assert_eq!(Expression::parse("2*3!"), Err(EvalError::TooManyOperators));
    }

    #[test]
    fn test_missing_operator() {
        assert_eq!(Expression::parse("42"), Err(EvalError::MissingOperator));
        assert_eq!(Expression::parse(""), Err(EvalError::MissingOperator));
    }

    #[test]
    fn test_factorial_with_second_operand() {
        assert_eq!(Expression::parse("5!3"), Err(EvalError::UnexpectedOperand));
    }

    #[test]
    fn test_factorial_domain() {
        assert_eq!(
            Expression::parse("-1!").unwrap().compute(),
            Err(EvalError::FactorialDomain)
        );
        assert_eq!(
            Expression::parse("2.5!").unwrap().compute(),
            Err(EvalError::FactorialDomain)
        );
        assert_eq!(
            evaluate("-1!"),
            "Error: factorial requires a non-negative integer"
        );
    }

    #[test]
    fn test_invalid_operands() {
        assert_eq!(
            Expression::parse("+4").unwrap().compute(),
            Err(EvalError::InvalidOperand(Operand::First, String::new()))
        );
        assert_eq!(
            Expression::parse("4*").unwrap().compute(),
            Err(EvalError::InvalidOperand(Operand::Second, String::new()))
        );
        assert_eq!(evaluate("4*."), "Error: invalid second operand '.'");
    }

    #[test]
    fn test_parse_shape() {
        let expr = Expression::parse("12.5^2").unwrap();
        assert_eq!(expr.first, "12.5");
        assert_eq!(expr.operator, Operator::Pow);
        assert_eq!(expr.second, "2");

        let expr = Expression::parse("4!").unwrap();
        assert_eq!(expr.operator, Operator::Factorial);
        assert!(expr.second.is_empty());
    }
}
