use crate::{CoreError, DataPacket};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Rule that lets a step complete without a human decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutoCondition {
    /// All named entity fields must be filled in
    FieldCompletion {
        /// Fields of the entity snapshot that must be non-empty
        fields: Vec<String>,

        /// Extra expression that must also hold
        #[serde(default)]
        condition: Option<String>,
    },

    /// Progress as soon as the optional expression holds
    Auto {
        /// Expression gating the progression; absent means always
        #[serde(default)]
        condition: Option<String>,
    },

    /// Progress once the step has been current for a given delay
    TimeBased {
        /// Delay grammar: "30 minutes", "24 hours", "2 days"
        delay: String,

        /// Extra expression that must also hold
        #[serde(default)]
        condition: Option<String>,
    },
}

impl AutoCondition {
    /// Whether the condition currently holds
    ///
    /// `active_since` is when the step became current; it only matters
    /// for time-based conditions. Expressions that fail to parse
    /// evaluate to false rather than erroring, so a malformed template
    /// can never auto-complete a step.
    pub fn is_satisfied(
        &self,
        snapshot: &DataPacket,
        evaluator: &dyn ConditionEvaluator,
        active_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        match self {
            AutoCondition::FieldCompletion { fields, condition } => {
                if fields.is_empty() {
                    return Ok(false);
                }

                for field in fields {
                    if field_is_empty(snapshot.field(field)) {
                        return Ok(false);
                    }
                }

                match condition {
                    Some(expr) => evaluator.evaluate(expr, snapshot),
                    None => Ok(true),
                }
            }
            AutoCondition::Auto { condition } => match condition {
                Some(expr) => evaluator.evaluate(expr, snapshot),
                None => Ok(true),
            },
            AutoCondition::TimeBased { delay, condition } => {
                let required = parse_delay(delay)?;
                if now.signed_duration_since(active_since) < required {
                    return Ok(false);
                }

                match condition {
                    Some(expr) => evaluator.evaluate(expr, snapshot),
                    None => Ok(true),
                }
            }
        }
    }

    /// The parsed delay for time-based conditions
    pub fn delay(&self) -> Option<Result<Duration, CoreError>> {
        match self {
            AutoCondition::TimeBased { delay, .. } => Some(parse_delay(delay)),
            _ => None,
        }
    }
}

/// A field counts as empty when it is missing, null, an empty string,
/// or an empty array.
fn field_is_empty(value: Option<&serde_json::Value>) -> bool {
    match value {
        None => true,
        Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::String(s)) => s.is_empty(),
        Some(serde_json::Value::Array(a)) => a.is_empty(),
        Some(_) => false,
    }
}

/// Parse a delay like "30 minutes", "24 hours", or "2 days"
pub fn parse_delay(text: &str) -> Result<Duration, CoreError> {
    let mut parts = text.split_whitespace();
    let amount = parts.next().and_then(|p| p.parse::<i64>().ok());
    let unit = parts.next();

    let (amount, unit) = match (amount, unit, parts.next()) {
        (Some(amount), Some(unit), None) => (amount, unit.to_ascii_lowercase()),
        _ => {
            return Err(CoreError::ConditionEvaluationError(format!(
                "Invalid delay: {}",
                text
            )))
        }
    };

    match unit.as_str() {
        "minute" | "minutes" => Ok(Duration::minutes(amount)),
        "hour" | "hours" => Ok(Duration::hours(amount)),
        "day" | "days" => Ok(Duration::days(amount)),
        _ => Err(CoreError::ConditionEvaluationError(format!(
            "Invalid delay unit: {}",
            text
        ))),
    }
}

/// Evaluates condition expressions against an entity snapshot
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluate an expression, returning whether it holds
    fn evaluate(&self, expression: &str, context: &DataPacket) -> Result<bool, CoreError>;
}

/// Evaluator for the simple comparison grammar used in templates
///
/// Supports `field op value` with `>=`, `<=`, `>`, `<`, `=`, `!=`,
/// combined with `AND` and `OR` (`OR` binds looser) and one level of
/// parentheses, e.g.
/// `(severity >= high AND affected_count > 100) OR notification_required = true`.
/// Values compare numerically when both sides are numeric, otherwise
/// as strings. Comparisons against missing or null fields are false.
#[derive(Debug, Default)]
pub struct DefaultConditionEvaluator;

impl DefaultConditionEvaluator {
    /// Create a new evaluator
    pub fn new() -> Self {
        Self
    }

    fn eval(&self, expression: &str, context: &DataPacket) -> bool {
        let expression = expression.trim();

        if expression.contains(" AND ") || expression.contains(" OR ") {
            return self.eval_compound(expression, context);
        }

        self.eval_comparison(expression, context)
    }

    fn eval_compound(&self, expression: &str, context: &DataPacket) -> bool {
        let mut expression = expression.trim();

        // Strip one enclosing parenthesis pair
        if expression.starts_with('(') && expression.ends_with(')') {
            expression = &expression[1..expression.len() - 1];
        }

        // OR binds looser than AND
        if expression.contains(" OR ") {
            return expression
                .split(" OR ")
                .any(|part| self.eval_compound(part, context));
        }

        if expression.contains(" AND ") {
            return expression
                .split(" AND ")
                .all(|part| self.eval_compound(part, context));
        }

        let leaf = expression.trim_matches(|c| c == '(' || c == ')');
        self.eval_comparison(leaf, context)
    }

    fn eval_comparison(&self, expression: &str, context: &DataPacket) -> bool {
        let expression = expression.trim();

        let field_end = expression
            .find(|c: char| !c.is_alphanumeric() && c != '_')
            .unwrap_or(expression.len());
        let field = &expression[..field_end];
        if field.is_empty() {
            return false;
        }

        let rest = expression[field_end..].trim_start();
        let (op, rest) = if let Some(r) = rest.strip_prefix(">=") {
            (Op::Ge, r)
        } else if let Some(r) = rest.strip_prefix("<=") {
            (Op::Le, r)
        } else if let Some(r) = rest.strip_prefix("!=") {
            (Op::Ne, r)
        } else if let Some(r) = rest.strip_prefix('>') {
            (Op::Gt, r)
        } else if let Some(r) = rest.strip_prefix('<') {
            (Op::Lt, r)
        } else if let Some(r) = rest.strip_prefix('=') {
            (Op::Eq, r)
        } else {
            return false;
        };

        let expected = rest.trim();
        if expected.is_empty() {
            return false;
        }

        let actual = match context.field(field) {
            Some(value) if !value.is_null() => value,
            _ => return false,
        };

        compare(actual, op, expected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
    Ne,
}

fn compare(actual: &serde_json::Value, op: Op, expected: &str) -> bool {
    // Boolean literals compare only against boolean fields
    if expected == "true" || expected == "false" {
        let expected_bool = expected == "true";
        return match (actual.as_bool(), op) {
            (Some(actual_bool), Op::Eq) => actual_bool == expected_bool,
            (Some(actual_bool), Op::Ne) => actual_bool != expected_bool,
            _ => false,
        };
    }

    // Numeric comparison when both sides are numeric; numeric strings
    // on the entity side count
    let actual_num = match actual {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    if let (Some(a), Ok(e)) = (actual_num, expected.parse::<f64>()) {
        return match op {
            Op::Ge => a >= e,
            Op::Le => a <= e,
            Op::Gt => a > e,
            Op::Lt => a < e,
            Op::Eq => a == e,
            Op::Ne => a != e,
        };
    }

    // String comparison, lexicographic for the ordering operators
    let actual_str = match actual {
        serde_json::Value::String(s) => s.as_str(),
        _ => return false,
    };
    match op {
        Op::Ge => actual_str >= expected,
        Op::Le => actual_str <= expected,
        Op::Gt => actual_str > expected,
        Op::Lt => actual_str < expected,
        Op::Eq => actual_str == expected,
        Op::Ne => actual_str != expected,
    }
}

impl ConditionEvaluator for DefaultConditionEvaluator {
    fn evaluate(&self, expression: &str, context: &DataPacket) -> Result<bool, CoreError> {
        Ok(self.eval(expression, context))
    }
}
