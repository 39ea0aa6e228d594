use serde::{Deserialize, Serialize};

use super::nullable;

/// A feature flag definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub is_archived: bool,
    pub timestamp: i64,
    /// `None` means the flag predates experiment settings, every evaluation is sent to
    /// experiments.
    #[serde(default)]
    pub expt_include_all_rules: Option<bool>,
    #[serde(rename = "ff")]
    pub info: FlagInfo,
    #[serde(rename = "ffp", default, deserialize_with = "nullable")]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(rename = "fftuwmtr", default, deserialize_with = "nullable")]
    pub rules: Vec<TargetRule>,
    #[serde(rename = "targetIndividuals", default, deserialize_with = "nullable")]
    pub targets: Vec<TargetIndividuals>,
    #[serde(rename = "variationOptions", default, deserialize_with = "nullable")]
    pub variations: Vec<VariationOption>,
}

impl FeatureFlag {
    /// Human-readable flag key (the one users pass in).
    pub fn key_name(&self) -> &str {
        &self.info.key_name
    }

    pub fn is_enabled(&self) -> bool {
        self.info.status != FlagStatus::Disabled
    }

    /// Look up a variation by its local id.
    pub fn variation(&self, local_id: i32) -> Option<&VariationOption> {
        self.variations.iter().find(|v| v.local_id == local_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub key_name: String,
    #[serde(default)]
    pub status: FlagStatus,
    #[serde(rename = "isDefaultRulePercentageRolloutsIncludedInExpt", default)]
    pub default_rule_included_in_expt: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub default_rule_percentage_rollouts: Vec<PercentageRollout>,
    pub variation_option_when_disabled: VariationOption,
}

/// Flag status. Anything other than `Disabled` is served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagStatus {
    #[default]
    Enabled,
    Disabled,
    #[serde(other)]
    Unknown,
}

/// One of the flag's possible output values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationOption {
    pub local_id: i32,
    #[serde(default)]
    pub display_order: Option<i32>,
    #[serde(default, deserialize_with = "nullable")]
    pub variation_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prerequisite {
    pub prerequisite_feature_flag_id: String,
    /// The variation the prerequisite flag must serve for this prerequisite to pass.
    #[serde(rename = "valueOptionsVariationValue")]
    pub required_variation: VariationOption,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRule {
    #[serde(default)]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub rule_name: Option<String>,
    #[serde(default)]
    pub is_included_in_expt: Option<bool>,
    #[serde(rename = "ruleJsonContent", default, deserialize_with = "nullable")]
    pub clauses: Vec<Clause>,
    #[serde(
        rename = "valueOptionsVariationRuleValues",
        default,
        deserialize_with = "nullable"
    )]
    pub rollouts: Vec<PercentageRollout>,
}

/// Users explicitly assigned to one variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetIndividuals {
    #[serde(default, deserialize_with = "nullable")]
    pub individuals: Vec<TargetUser>,
    pub value_option: VariationOption,
}

impl TargetIndividuals {
    pub fn is_targeted(&self, user_key: &str) -> bool {
        self.individuals.iter().any(|it| it.key_id == user_key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetUser {
    pub key_id: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentageRollout {
    /// Fraction of the whole traffic that is sent to experiments from this entry.
    #[serde(default)]
    pub expt_rollout: Option<f64>,
    #[serde(rename = "rolloutPercentage", default, deserialize_with = "nullable")]
    pub range: PercentageRange,
    pub value_option: VariationOption,
}

/// Half-open range `[min, max)` over `[0, 1)`.
///
/// Serialized as a two-element array. A malformed array yields an empty range that matches
/// nobody; a missing one is the full range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f64>", into = "Vec<f64>")]
pub struct PercentageRange {
    pub min: f64,
    pub max: f64,
}

impl PercentageRange {
    pub const FULL: PercentageRange = PercentageRange { min: 0.0, max: 1.0 };

    pub fn new(min: f64, max: f64) -> PercentageRange {
        PercentageRange { min, max }
    }

    /// `[0, 1)` matches everybody without bucketing.
    pub fn is_full(&self) -> bool {
        self.min == 0.0 && self.max == 1.0
    }

    pub fn contains(&self, percentage: f64) -> bool {
        self.min <= percentage && percentage < self.max
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

impl Default for PercentageRange {
    fn default() -> PercentageRange {
        PercentageRange::FULL
    }
}

impl From<Vec<f64>> for PercentageRange {
    fn from(value: Vec<f64>) -> PercentageRange {
        match value.as_slice() {
            [min, max, ..] => PercentageRange::new(*min, *max),
            _ => PercentageRange::new(0.0, 0.0),
        }
    }
}

impl From<PercentageRange> for Vec<f64> {
    fn from(value: PercentageRange) -> Vec<f64> {
        vec![value.min, value.max]
    }
}

/// `Clause` checks that the user `property` matches `value` under the given `operator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ClauseWire", into = "ClauseWire")]
pub struct Clause {
    pub property: String,
    pub operator: Operator,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClauseWire {
    #[serde(default, deserialize_with = "nullable")]
    property: String,
    #[serde(default, deserialize_with = "nullable")]
    operation: String,
    #[serde(default, deserialize_with = "nullable")]
    value: String,
}

impl From<ClauseWire> for Clause {
    fn from(wire: ClauseWire) -> Clause {
        // Segment clauses carry the operator in `property` and leave `operation` blank.
        let operator = if wire.operation.trim().is_empty() {
            Operator::from_wire(&wire.property)
        } else {
            Operator::from_wire(&wire.operation)
        };
        Clause {
            property: wire.property,
            operator,
            value: wire.value,
        }
    }
}

impl From<Clause> for ClauseWire {
    fn from(clause: Clause) -> ClauseWire {
        let operation = if clause.operator.is_segment() {
            String::new()
        } else {
            clause.operator.as_wire().to_owned()
        };
        ClauseWire {
            property: clause.property,
            operation,
            value: clause.value,
        }
    }
}

/// Clause operators. The set is closed; anything the SDK does not know is [`Operator::Unknown`]
/// and never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    Contains,
    NotContains,
    IsOneOf,
    NotOneOf,
    StartsWith,
    EndsWith,
    IsTrue,
    IsFalse,
    MatchesRegex,
    NotMatchesRegex,
    InSegment,
    NotInSegment,
    Unknown,
}

impl Operator {
    pub fn from_wire(s: &str) -> Operator {
        match s {
            "Equal" => Operator::Equal,
            "NotEqual" => Operator::NotEqual,
            "BiggerThan" => Operator::GreaterThan,
            "BiggerEqualThan" => Operator::GreaterEqual,
            "LessThan" => Operator::LessThan,
            "LessEqualThan" => Operator::LessEqual,
            "Contains" => Operator::Contains,
            "NotContain" => Operator::NotContains,
            "IsOneOf" => Operator::IsOneOf,
            "NotOneOf" => Operator::NotOneOf,
            "StartsWith" => Operator::StartsWith,
            "EndsWith" => Operator::EndsWith,
            "IsTrue" => Operator::IsTrue,
            "IsFalse" => Operator::IsFalse,
            "MatchRegex" => Operator::MatchesRegex,
            "NotMatchRegex" => Operator::NotMatchesRegex,
            "User is in segment" => Operator::InSegment,
            "User is not in segment" => Operator::NotInSegment,
            _ => Operator::Unknown,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Operator::Equal => "Equal",
            Operator::NotEqual => "NotEqual",
            Operator::GreaterThan => "BiggerThan",
            Operator::GreaterEqual => "BiggerEqualThan",
            Operator::LessThan => "LessThan",
            Operator::LessEqual => "LessEqualThan",
            Operator::Contains => "Contains",
            Operator::NotContains => "NotContain",
            Operator::IsOneOf => "IsOneOf",
            Operator::NotOneOf => "NotOneOf",
            Operator::StartsWith => "StartsWith",
            Operator::EndsWith => "EndsWith",
            Operator::IsTrue => "IsTrue",
            Operator::IsFalse => "IsFalse",
            Operator::MatchesRegex => "MatchRegex",
            Operator::NotMatchesRegex => "NotMatchRegex",
            Operator::InSegment => "User is in segment",
            Operator::NotInSegment => "User is not in segment",
            Operator::Unknown => "",
        }
    }

    pub(crate) fn is_segment(self) -> bool {
        matches!(self, Operator::InSegment | Operator::NotInSegment)
    }
}

/// A reusable set of users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub is_archived: bool,
    pub timestamp: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub included: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub excluded: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub rules: Vec<SegmentRule>,
}

impl Segment {
    /// Explicit membership of `user_key`: `Some(false)` if excluded, `Some(true)` if included,
    /// `None` if the segment rules decide. Exclusion wins over inclusion.
    pub fn explicit_membership(&self, user_key: &str) -> Option<bool> {
        if self.excluded.iter().any(|k| k == user_key) {
            Some(false)
        } else if self.included.iter().any(|k| k == user_key) {
            Some(true)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRule {
    #[serde(rename = "ruleJsonContent", default, deserialize_with = "nullable")]
    pub clauses: Vec<Clause>,
}

/// Mapping of request properties to user properties. Replicated but not evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTag {
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub is_archived: bool,
    pub timestamp: i64,
    #[serde(default)]
    pub request_property: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub user_property: Option<String>,
}
