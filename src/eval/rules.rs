use regex::Regex;

use crate::model::Operator;

/// Number of fractional digits numeric operands are rounded to before comparing.
const NUMERIC_SCALE: i32 = 5;

impl Operator {
    /// Applying `Operator` to the attribute value. Returns `false` if the operator cannot be
    /// applied or there's a misconfiguration.
    ///
    /// Negative operators are the exact negation of their positive counterpart, so a missing
    /// attribute satisfies them. Segment operators need data lookups and are handled by the
    /// evaluator; here they never match.
    pub(crate) fn eval(self, attribute: Option<&str>, clause_value: &str) -> bool {
        match self {
            Operator::NotEqual => !Operator::Equal.eval(attribute, clause_value),
            Operator::NotContains => !Operator::Contains.eval(attribute, clause_value),
            Operator::NotOneOf => !Operator::IsOneOf.eval(attribute, clause_value),
            Operator::NotMatchesRegex => !Operator::MatchesRegex.eval(attribute, clause_value),
            _ => self.try_eval(attribute, clause_value).unwrap_or(false),
        }
    }

    /// Try applying a positive `Operator`, returning `None` if the operator cannot be applied.
    fn try_eval(self, attribute: Option<&str>, clause_value: &str) -> Option<bool> {
        let attribute = attribute?;
        match self {
            Operator::Equal => Some(attribute == clause_value),
            Operator::Contains => Some(attribute.contains(clause_value)),
            Operator::StartsWith => Some(attribute.starts_with(clause_value)),
            Operator::EndsWith => Some(attribute.ends_with(clause_value)),
            Operator::IsTrue => Some(attribute.eq_ignore_ascii_case("true")),
            Operator::IsFalse => Some(attribute.eq_ignore_ascii_case("false")),

            Operator::IsOneOf => {
                let values: Vec<String> = serde_json::from_str(clause_value).ok()?;
                Some(values.iter().any(|v| v == attribute))
            }

            Operator::MatchesRegex => {
                // The whole attribute has to match.
                let regex = Regex::new(&format!("^(?:{clause_value})$")).ok()?;
                Some(regex.is_match(attribute))
            }

            Operator::GreaterThan
            | Operator::GreaterEqual
            | Operator::LessThan
            | Operator::LessEqual => {
                let attribute = parse_decimal(attribute)?;
                let clause_value = parse_decimal(clause_value)?;
                Some(match self {
                    Operator::GreaterThan => attribute > clause_value,
                    Operator::GreaterEqual => attribute >= clause_value,
                    Operator::LessThan => attribute < clause_value,
                    Operator::LessEqual => attribute <= clause_value,
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }

            Operator::NotEqual
            | Operator::NotContains
            | Operator::NotOneOf
            | Operator::NotMatchesRegex
            | Operator::InSegment
            | Operator::NotInSegment
            | Operator::Unknown => None,
        }
    }
}

/// Parse a plain decimal number (optional sign, digits, optional fraction) and round it half-up
/// to [`NUMERIC_SCALE`] fractional digits.
fn parse_decimal(s: &str) -> Option<f64> {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if int_part.is_empty() || !is_digits(int_part) || !is_digits(frac_part) {
        return None;
    }
    let value: f64 = s.parse().ok()?;
    let scale = 10f64.powi(NUMERIC_SCALE);
    Some((value * scale).round() / scale)
}
