use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::{
    data_store::Snapshot,
    model::{
        Clause, FeatureFlag, Operator, PercentageRange, PercentageRollout, Segment,
        VariationOption,
    },
    sharder::{Md5Sharder, Sharder},
    status::ErrorKind,
    user::FfcUser,
};

use super::{EvalError, EvalResult, Reason};

/// Maximum nesting of prerequisite flags and segments.
pub const MAX_DEPTH: usize = 16;

/// Access to the flags and segments a flag may refer to.
pub trait Lookup {
    fn flag(&self, id: &str) -> Option<&FeatureFlag>;
    fn segment(&self, id: &str) -> Option<&Segment>;
}

impl Lookup for Snapshot {
    fn flag(&self, id: &str) -> Option<&FeatureFlag> {
        Snapshot::flag(self, id)
    }

    fn segment(&self, id: &str) -> Option<&Segment> {
        Snapshot::segment(self, id)
    }
}

/// Evaluates flags against one consistent [`Lookup`].
pub struct Evaluator<'a, L: ?Sized> {
    lookup: &'a L,
}

/// Ids of flags and segments currently being evaluated, outermost first.
type Chain = Vec<String>;

impl<'a, L: Lookup + ?Sized> Evaluator<'a, L> {
    pub fn new(lookup: &'a L) -> Self {
        Evaluator { lookup }
    }

    /// Evaluate `flag` for `user`.
    pub fn evaluate(&self, flag: &FeatureFlag, user: &FfcUser) -> EvalResult {
        let mut chain = Chain::new();
        match self.eval_flag(flag, user, &mut chain) {
            Ok(result) => {
                log::trace!(target: "ffc",
                    flag_key = flag.key_name(),
                    user_key = user.key(),
                    variation_id = result.variation_id,
                    reason:% = result.reason;
                    "evaluated a flag");
                result
            }
            Err(err) => {
                log::warn!(target: "ffc",
                    flag_key = flag.key_name(),
                    user_key = user.key(),
                    kind:% = ErrorKind::RuntimeError;
                    "error occurred while evaluating a flag: {err}");
                disabled(flag, Reason::Error)
            }
        }
    }

    fn eval_flag(
        &self,
        flag: &FeatureFlag,
        user: &FfcUser,
        chain: &mut Chain,
    ) -> Result<EvalResult, EvalError> {
        enter(chain, &flag.id)?;
        let result = self.eval_flag_inner(flag, user, chain);
        chain.pop();
        result
    }

    fn eval_flag_inner(
        &self,
        flag: &FeatureFlag,
        user: &FfcUser,
        chain: &mut Chain,
    ) -> Result<EvalResult, EvalError> {
        if !flag.is_enabled() {
            return Ok(disabled(flag, Reason::FlagOff));
        }

        for prerequisite in &flag.prerequisites {
            let id = prerequisite.prerequisite_feature_flag_id.as_str();
            if id == flag.id || Some(id) == flag.info.id.as_deref() {
                continue;
            }
            let passed = match self.lookup.flag(id) {
                Some(other) => {
                    // Even a disabled prerequisite passes if its disabled variation is the
                    // required one.
                    let result = self.eval_flag(other, user, chain)?;
                    result.variation_id == prerequisite.required_variation.local_id
                }
                None => {
                    log::warn!(target: "ffc", flag_key = flag.key_name(), prerequisite = id; "prerequisite flag not found");
                    false
                }
            };
            if !passed {
                return Ok(disabled(flag, Reason::PrerequisiteFailed));
            }
        }

        // A target pointing at a variation the flag does not have is not a match.
        let targeted = flag
            .targets
            .iter()
            .filter(|it| it.is_targeted(user.key()))
            .find_map(|it| served_variation(flag, it.value_option.local_id));
        if let Some(option) = targeted {
            let send_to_experiment = flag.expt_include_all_rules != Some(false);
            return Ok(result(option, Reason::TargetMatch, send_to_experiment));
        }

        for rule in &flag.rules {
            if self.all_match(&rule.clauses, user, chain)? {
                let served = rollout(
                    flag,
                    &rule.rollouts,
                    user,
                    Reason::RuleMatch,
                    flag.expt_include_all_rules,
                    rule.is_included_in_expt,
                );
                if let Some(served) = served {
                    return Ok(served);
                }
                // A matching rule whose table does not cover the user falls back to the default
                // rollout.
                break;
            }
        }

        let served = rollout(
            flag,
            &flag.info.default_rule_percentage_rollouts,
            user,
            Reason::Fallthrough,
            flag.expt_include_all_rules,
            flag.info.default_rule_included_in_expt,
        );
        Ok(served.unwrap_or_else(|| disabled(flag, Reason::Fallthrough)))
    }

    fn all_match(
        &self,
        clauses: &[Clause],
        user: &FfcUser,
        chain: &mut Chain,
    ) -> Result<bool, EvalError> {
        for clause in clauses {
            if !self.clause_matches(clause, user, chain)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn clause_matches(
        &self,
        clause: &Clause,
        user: &FfcUser,
        chain: &mut Chain,
    ) -> Result<bool, EvalError> {
        match clause.operator {
            Operator::InSegment => self.in_any_segment(&clause.value, user, chain),
            Operator::NotInSegment => Ok(!self.in_any_segment(&clause.value, user, chain)?),
            op => Ok(op.eval(user.property(&clause.property), &clause.value)),
        }
    }

    /// `segment_ids` is a JSON array of segment ids. Malformed arrays match nothing.
    fn in_any_segment(
        &self,
        segment_ids: &str,
        user: &FfcUser,
        chain: &mut Chain,
    ) -> Result<bool, EvalError> {
        let Ok(ids) = serde_json::from_str::<Vec<String>>(segment_ids) else {
            return Ok(false);
        };
        for id in ids {
            let Some(segment) = self.lookup.segment(&id) else {
                continue;
            };
            if self.is_member(segment, user, chain)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_member(
        &self,
        segment: &Segment,
        user: &FfcUser,
        chain: &mut Chain,
    ) -> Result<bool, EvalError> {
        if let Some(member) = segment.explicit_membership(user.key()) {
            return Ok(member);
        }

        enter(chain, &format!("segment:{}", segment.id))?;
        let mut member = Ok(false);
        for rule in &segment.rules {
            match self.all_match(&rule.clauses, user, chain) {
                Ok(false) => {}
                other => {
                    member = other;
                    break;
                }
            }
        }
        chain.pop();
        member
    }
}

fn enter(chain: &mut Chain, id: &str) -> Result<(), EvalError> {
    if chain.iter().any(|it| it == id) {
        return Err(EvalError::Cycle(id.to_owned()));
    }
    if chain.len() >= MAX_DEPTH {
        return Err(EvalError::TooDeep);
    }
    chain.push(id.to_owned());
    Ok(())
}

fn result(option: &VariationOption, reason: Reason, send_to_experiment: bool) -> EvalResult {
    EvalResult {
        value: option.variation_value.clone(),
        variation_id: option.local_id,
        reason,
        send_to_experiment,
    }
}

fn disabled(flag: &FeatureFlag, reason: Reason) -> EvalResult {
    result(&flag.info.variation_option_when_disabled, reason, false)
}

/// The flag's own variation with `local_id`.
fn served_variation(flag: &FeatureFlag, local_id: i32) -> Option<&VariationOption> {
    let option = flag.variation(local_id);
    if option.is_none() {
        log::warn!(target: "ffc", flag_key = flag.key_name(), local_id; "flag refers to an unknown variation");
    }
    option
}

/// Serve the first entry of `rollouts` whose range contains the user's bucket.
///
/// `None` if no entry covers the user or the covering entry refers to an unknown variation.
fn rollout(
    flag: &FeatureFlag,
    rollouts: &[PercentageRollout],
    user: &FfcUser,
    reason: Reason,
    expt_include_all_rules: Option<bool>,
    included_in_expt: Option<bool>,
) -> Option<EvalResult> {
    let entry = rollouts
        .iter()
        .find(|it| Md5Sharder.in_range(user.key(), &it.range))?;
    let option = served_variation(flag, entry.value_option.local_id)?;
    let send_to_experiment =
        send_to_experiment(user, entry, expt_include_all_rules, included_in_expt);
    Some(result(option, reason, send_to_experiment))
}

fn send_to_experiment(
    user: &FfcUser,
    entry: &PercentageRollout,
    expt_include_all_rules: Option<bool>,
    included_in_expt: Option<bool>,
) -> bool {
    let (Some(_), Some(included), Some(expt_rollout)) =
        (expt_include_all_rules, included_in_expt, entry.expt_rollout)
    else {
        return true;
    };
    if !included {
        return false;
    }

    let width = entry.range.width();
    if expt_rollout == 0.0 || width == 0.0 {
        return false;
    }

    // A different input than the one used for the variation split, so the experiment sample is
    // independent from the served variation.
    let upper_bound = (expt_rollout / width).min(1.0);
    let key = BASE64.encode(user.key());
    Md5Sharder.in_range(key, &PercentageRange::new(0.0, upper_bound))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::{
        eval::{EvalResult, Evaluator, Lookup, Reason},
        model::{
            Clause, FeatureFlag, FlagInfo, FlagStatus, Operator, PercentageRange,
            PercentageRollout, Prerequisite, Segment, SegmentRule, TargetIndividuals, TargetRule,
            TargetUser, VariationOption,
        },
        sharder::{Md5Sharder, Sharder},
        user::FfcUser,
    };

    #[derive(Default)]
    struct TestLookup {
        flags: HashMap<String, FeatureFlag>,
        segments: HashMap<String, Segment>,
    }

    impl TestLookup {
        fn with_flag(mut self, flag: FeatureFlag) -> Self {
            self.flags.insert(flag.id.clone(), flag);
            self
        }

        fn with_segment(mut self, segment: Segment) -> Self {
            self.segments.insert(segment.id.clone(), segment);
            self
        }
    }

    impl Lookup for TestLookup {
        fn flag(&self, id: &str) -> Option<&FeatureFlag> {
            self.flags.get(id)
        }

        fn segment(&self, id: &str) -> Option<&Segment> {
            self.segments.get(id)
        }
    }

    fn variation(local_id: i32, value: &str) -> VariationOption {
        VariationOption {
            local_id,
            display_order: Some(local_id),
            variation_value: value.to_owned(),
        }
    }

    fn full(value_option: VariationOption) -> PercentageRollout {
        PercentageRollout {
            expt_rollout: None,
            range: PercentageRange::FULL,
            value_option,
        }
    }

    fn clause(property: &str, operator: Operator, value: &str) -> Clause {
        Clause {
            property: property.to_owned(),
            operator,
            value: value.to_owned(),
        }
    }

    /// Flag "A" (1) / "B" (2), disabled variation "A", default rollout serves "A".
    fn flag(id: &str) -> FeatureFlag {
        FeatureFlag {
            id: id.to_owned(),
            is_archived: false,
            timestamp: 1,
            expt_include_all_rules: Some(true),
            info: FlagInfo {
                id: None,
                name: Some(id.to_owned()),
                key_name: id.to_owned(),
                status: FlagStatus::Enabled,
                default_rule_included_in_expt: Some(false),
                default_rule_percentage_rollouts: vec![full(variation(1, "A"))],
                variation_option_when_disabled: variation(1, "A"),
            },
            prerequisites: vec![],
            rules: vec![],
            targets: vec![],
            variations: vec![variation(1, "A"), variation(2, "B")],
        }
    }

    fn rule(clauses: Vec<Clause>, rollouts: Vec<PercentageRollout>) -> TargetRule {
        TargetRule {
            rule_id: None,
            rule_name: None,
            is_included_in_expt: Some(false),
            clauses,
            rollouts,
        }
    }

    fn segment(id: &str, included: &[&str], excluded: &[&str], rules: Vec<SegmentRule>) -> Segment {
        Segment {
            id: id.to_owned(),
            is_archived: false,
            timestamp: 1,
            included: included.iter().map(|it| it.to_string()).collect(),
            excluded: excluded.iter().map(|it| it.to_string()).collect(),
            rules,
        }
    }

    fn evaluate(lookup: &TestLookup, flag: &FeatureFlag, user: &FfcUser) -> EvalResult {
        Evaluator::new(lookup).evaluate(flag, user)
    }

    #[test]
    fn disabled_flag_wins_over_everything() {
        let mut flag = flag("f");
        flag.info.status = FlagStatus::Disabled;
        flag.targets = vec![TargetIndividuals {
            individuals: vec![TargetUser {
                key_id: "u1".to_owned(),
                id: None,
                name: None,
                email: None,
            }],
            value_option: variation(2, "B"),
        }];
        let lookup = TestLookup::default();

        for key in ["u1", "u2"] {
            let result = evaluate(&lookup, &flag, &FfcUser::new(key));
            assert_eq!(result.value, "A");
            assert_eq!(result.reason, Reason::FlagOff);
            assert!(!result.send_to_experiment);
        }
    }

    #[test]
    fn target_wins_over_rules() {
        let mut flag = flag("f");
        flag.targets = vec![TargetIndividuals {
            individuals: vec![TargetUser {
                key_id: "u1".to_owned(),
                id: None,
                name: None,
                email: None,
            }],
            value_option: variation(1, "A"),
        }];
        flag.rules = vec![rule(vec![], vec![full(variation(2, "B"))])];
        let lookup = TestLookup::default();

        let targeted = evaluate(&lookup, &flag, &FfcUser::new("u1"));
        assert_eq!(targeted.value, "A");
        assert_eq!(targeted.reason, Reason::TargetMatch);
        assert!(targeted.send_to_experiment);

        let other = evaluate(&lookup, &flag, &FfcUser::new("u2"));
        assert_eq!(other.value, "B");
        assert_eq!(other.reason, Reason::RuleMatch);

        flag.expt_include_all_rules = Some(false);
        assert!(!evaluate(&lookup, &flag, &FfcUser::new("u1")).send_to_experiment);
    }

    #[test]
    fn rule_match_on_country() {
        let mut flag = flag("f");
        flag.rules = vec![rule(
            vec![clause("country", Operator::Equal, "US")],
            vec![full(variation(2, "B"))],
        )];
        let lookup = TestLookup::default();

        let us = FfcUser::builder("u1").country("US").build();
        let result = evaluate(&lookup, &flag, &us);
        assert_eq!(result.value, "B");
        assert_eq!(result.variation_id, 2);
        assert_eq!(result.reason, Reason::RuleMatch);

        let fr = FfcUser::builder("u1").country("FR").build();
        let result = evaluate(&lookup, &flag, &fr);
        assert_eq!(result.value, "A");
        assert_eq!(result.reason, Reason::Fallthrough);
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut flag = flag("f");
        flag.rules = vec![
            rule(
                vec![clause("plan", Operator::Equal, "premium")],
                vec![full(variation(2, "B"))],
            ),
            rule(vec![], vec![full(variation(1, "A"))]),
        ];
        let user = FfcUser::builder("u1").custom("plan", "premium").build();
        let result = evaluate(&TestLookup::default(), &flag, &user);
        assert_eq!(result.value, "B");
    }

    #[test]
    fn rollout_buckets_by_key() {
        let mut flag = flag("f");
        flag.info.default_rule_percentage_rollouts = vec![
            PercentageRollout {
                expt_rollout: None,
                range: PercentageRange::new(0.0, 0.5),
                value_option: variation(1, "A"),
            },
            PercentageRollout {
                expt_rollout: None,
                range: PercentageRange::new(0.5, 1.0),
                value_option: variation(2, "B"),
            },
        ];
        let lookup = TestLookup::default();

        // user-1 buckets at ~0.32, alice at ~0.78.
        assert_eq!(evaluate(&lookup, &flag, &FfcUser::new("user-1")).value, "A");
        assert_eq!(evaluate(&lookup, &flag, &FfcUser::new("alice")).value, "B");
    }

    #[test]
    fn uncovered_rollout_falls_back_to_disabled_variation() {
        let mut flag = flag("f");
        flag.info.default_rule_percentage_rollouts = vec![PercentageRollout {
            expt_rollout: None,
            range: PercentageRange::new(0.0, 0.0),
            value_option: variation(2, "B"),
        }];
        let result = evaluate(&TestLookup::default(), &flag, &FfcUser::new("u1"));
        assert_eq!(result.value, "A");
        assert_eq!(result.reason, Reason::Fallthrough);
    }

    #[test]
    fn prerequisites() {
        let mut parent = flag("parent");
        parent.info.default_rule_percentage_rollouts = vec![full(variation(2, "B"))];

        let mut child = flag("child");
        child.info.default_rule_percentage_rollouts = vec![full(variation(2, "B"))];
        child.prerequisites = vec![Prerequisite {
            prerequisite_feature_flag_id: "parent".to_owned(),
            required_variation: variation(2, "B"),
        }];

        let lookup = TestLookup::default().with_flag(parent.clone());
        let result = evaluate(&lookup, &child, &FfcUser::new("u1"));
        assert_eq!(result.value, "B");
        assert_eq!(result.reason, Reason::Fallthrough);

        // Parent serving another variation fails the prerequisite.
        parent.info.default_rule_percentage_rollouts = vec![full(variation(1, "A"))];
        let lookup = TestLookup::default().with_flag(parent);
        let result = evaluate(&lookup, &child, &FfcUser::new("u1"));
        assert_eq!(result.value, "A");
        assert_eq!(result.reason, Reason::PrerequisiteFailed);

        // Missing prerequisite flag fails too.
        let result = evaluate(&TestLookup::default(), &child, &FfcUser::new("u1"));
        assert_eq!(result.reason, Reason::PrerequisiteFailed);
    }

    #[test]
    fn disabled_prerequisite_can_pass() {
        let mut parent = flag("parent");
        parent.info.status = FlagStatus::Disabled;

        let mut child = flag("child");
        child.info.default_rule_percentage_rollouts = vec![full(variation(2, "B"))];
        child.prerequisites = vec![Prerequisite {
            prerequisite_feature_flag_id: "parent".to_owned(),
            required_variation: variation(1, "A"),
        }];

        let lookup = TestLookup::default().with_flag(parent);
        assert_eq!(evaluate(&lookup, &child, &FfcUser::new("u1")).value, "B");
    }

    #[test]
    fn self_prerequisite_is_skipped() {
        let mut flag = flag("f");
        flag.prerequisites = vec![Prerequisite {
            prerequisite_feature_flag_id: "f".to_owned(),
            required_variation: variation(2, "B"),
        }];
        let result = evaluate(&TestLookup::default(), &flag, &FfcUser::new("u1"));
        assert_eq!(result.reason, Reason::Fallthrough);
    }

    #[test]
    fn prerequisite_cycle_is_an_error() {
        let mut a = flag("a");
        a.prerequisites = vec![Prerequisite {
            prerequisite_feature_flag_id: "b".to_owned(),
            required_variation: variation(1, "A"),
        }];
        let mut b = flag("b");
        b.prerequisites = vec![Prerequisite {
            prerequisite_feature_flag_id: "a".to_owned(),
            required_variation: variation(1, "A"),
        }];
        let lookup = TestLookup::default().with_flag(a.clone()).with_flag(b);

        let result = evaluate(&lookup, &a, &FfcUser::new("u1"));
        assert_eq!(result.reason, Reason::Error);
        assert_eq!(result.value, "A");
    }

    #[test]
    fn deep_prerequisite_chain_is_an_error() {
        let mut lookup = TestLookup::default();
        for i in 0..20 {
            let mut f = flag(&format!("f{i}"));
            f.prerequisites = vec![Prerequisite {
                prerequisite_feature_flag_id: format!("f{}", i + 1),
                required_variation: variation(1, "A"),
            }];
            lookup = lookup.with_flag(f);
        }
        let root = lookup.flags["f0"].clone();
        assert_eq!(
            evaluate(&lookup, &root, &FfcUser::new("u1")).reason,
            Reason::Error
        );
    }

    #[test]
    fn segments() {
        let mut flag = flag("f");
        flag.rules = vec![rule(
            vec![clause(
                "User is in segment",
                Operator::InSegment,
                r#"["missing", "beta"]"#,
            )],
            vec![full(variation(2, "B"))],
        )];
        let beta = segment(
            "beta",
            &["in", "both"],
            &["out", "both"],
            vec![SegmentRule {
                clauses: vec![clause("email", Operator::EndsWith, "@example.com")],
            }],
        );
        let lookup = TestLookup::default().with_segment(beta);

        let value = |user: FfcUser| evaluate(&lookup, &flag, &user).value;
        assert_eq!(value(FfcUser::new("in")), "B");
        assert_eq!(value(FfcUser::new("out")), "A");
        assert_eq!(value(FfcUser::new("both")), "A");
        assert_eq!(
            value(FfcUser::builder("x").email("x@example.com").build()),
            "B"
        );
        assert_eq!(
            value(
                FfcUser::builder("out")
                    .email("out@example.com")
                    .build()
            ),
            "A"
        );
        assert_eq!(value(FfcUser::new("x")), "A");
    }

    #[test]
    fn not_in_segment() {
        let mut flag = flag("f");
        flag.rules = vec![rule(
            vec![clause(
                "User is not in segment",
                Operator::NotInSegment,
                r#"["beta"]"#,
            )],
            vec![full(variation(2, "B"))],
        )];
        let lookup = TestLookup::default().with_segment(segment("beta", &["in"], &[], vec![]));
        assert_eq!(evaluate(&lookup, &flag, &FfcUser::new("in")).value, "A");
        assert_eq!(evaluate(&lookup, &flag, &FfcUser::new("other")).value, "B");
    }

    #[test]
    fn segment_cycle_is_an_error() {
        let looping = segment(
            "loop",
            &[],
            &[],
            vec![SegmentRule {
                clauses: vec![clause(
                    "User is in segment",
                    Operator::InSegment,
                    r#"["loop"]"#,
                )],
            }],
        );
        let mut flag = flag("f");
        flag.rules = vec![rule(
            vec![clause(
                "User is in segment",
                Operator::InSegment,
                r#"["loop"]"#,
            )],
            vec![full(variation(2, "B"))],
        )];
        let lookup = TestLookup::default().with_segment(looping);
        let result = evaluate(&lookup, &flag, &FfcUser::new("u1"));
        assert_eq!(result.reason, Reason::Error);
    }

    #[test]
    fn target_with_unknown_variation_falls_through() {
        let mut flag = flag("f");
        let u1 = TargetUser {
            key_id: "u1".to_owned(),
            id: None,
            name: None,
            email: None,
        };
        flag.targets = vec![
            TargetIndividuals {
                individuals: vec![u1.clone()],
                value_option: variation(7, "gone"),
            },
            TargetIndividuals {
                individuals: vec![u1],
                value_option: variation(2, "B"),
            },
        ];
        let lookup = TestLookup::default();

        let result = evaluate(&lookup, &flag, &FfcUser::new("u1"));
        assert_eq!((result.value.as_str(), result.reason), ("B", Reason::TargetMatch));

        flag.targets.truncate(1);
        let result = evaluate(&lookup, &flag, &FfcUser::new("u1"));
        assert_eq!((result.value.as_str(), result.reason), ("A", Reason::Fallthrough));
    }

    #[test]
    fn rollout_with_unknown_variation_falls_through() {
        let mut flag = flag("f");
        flag.info.default_rule_percentage_rollouts = vec![full(variation(2, "B"))];
        flag.rules = vec![rule(vec![], vec![full(variation(9, "gone"))])];
        let lookup = TestLookup::default();

        let result = evaluate(&lookup, &flag, &FfcUser::new("u1"));
        assert_eq!(result.value, "B");
        assert_eq!(result.variation_id, 2);
        assert_eq!(result.reason, Reason::Fallthrough);

        flag.info.default_rule_percentage_rollouts = vec![full(variation(9, "gone"))];
        let result = evaluate(&lookup, &flag, &FfcUser::new("u1"));
        assert_eq!(result.value, "A");
        assert_eq!(result.reason, Reason::Fallthrough);
    }

    #[test]
    fn send_to_experiment() {
        let mut flag = flag("f");
        flag.info.default_rule_included_in_expt = Some(true);
        flag.info.default_rule_percentage_rollouts = vec![PercentageRollout {
            expt_rollout: Some(1.0),
            range: PercentageRange::FULL,
            value_option: variation(1, "A"),
        }];
        let lookup = TestLookup::default();
        let user = FfcUser::new("u1");
        assert!(evaluate(&lookup, &flag, &user).send_to_experiment);

        // Absent experiment settings include everybody.
        flag.expt_include_all_rules = None;
        flag.info.default_rule_percentage_rollouts[0].expt_rollout = Some(0.0);
        assert!(evaluate(&lookup, &flag, &user).send_to_experiment);

        flag.expt_include_all_rules = Some(true);
        assert!(!evaluate(&lookup, &flag, &user).send_to_experiment);

        flag.info.default_rule_included_in_expt = Some(false);
        flag.info.default_rule_percentage_rollouts[0].expt_rollout = Some(1.0);
        assert!(!evaluate(&lookup, &flag, &user).send_to_experiment);
    }

    #[test]
    fn send_to_experiment_samples_on_encoded_key() {
        let mut flag = flag("f");
        flag.info.default_rule_included_in_expt = Some(true);
        flag.info.default_rule_percentage_rollouts = vec![PercentageRollout {
            expt_rollout: Some(0.5),
            range: PercentageRange::FULL,
            value_option: variation(1, "A"),
        }];
        let lookup = TestLookup::default();
        for key in ["u1", "u2", "alice", "bob", "carol"] {
            let encoded = base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                key,
            );
            let expected = Md5Sharder.percentage_of(encoded) < 0.5;
            assert_eq!(
                evaluate(&lookup, &flag, &FfcUser::new(key)).send_to_experiment,
                expected,
                "{key}"
            );
        }
    }
}
