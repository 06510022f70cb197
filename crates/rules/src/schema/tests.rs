use super::*;

const PROFILE_YAML: &str = r#"
name: nonprofit
description: Organizaciones sin ánimo de lucro
min_score: 0.8
rules:
  - name: nonprofit_required
    kind: include
    value: ["sin ánimo de lucro", "sin animo de lucro"]
    weight: 3.0
    required: true
  - name: budget
    kind: amount
    value: { min: 5000, max: 500000 }
  - name: legacy_sector
    filter_type: sector
    value: ["cultura"]
"#;

#[test]
fn parse_profile_with_aliases_and_defaults() {
    let profile: FilterProfile = serde_yaml::from_str(PROFILE_YAML).unwrap();
    assert_eq!(profile.name, "nonprofit");
    assert_eq!(profile.min_score, 0.8);
    assert_eq!(profile.rules.len(), 3);

    let required = &profile.rules[0];
    assert_eq!(required.kind, RuleKind::Include);
    assert!(required.required);
    assert_eq!(required.weight, 3.0);

    let budget = &profile.rules[1];
    assert_eq!(budget.kind, RuleKind::AmountRange);
    assert_eq!(budget.weight, 1.0);
    assert!(!budget.required);
}

#[test]
fn unknown_kind_is_preserved_not_rejected() {
    let profile: FilterProfile = serde_yaml::from_str(PROFILE_YAML).unwrap();
    let legacy = &profile.rules[2];
    assert_eq!(legacy.kind, RuleKind::Unknown("sector".into()));
    assert!(!legacy.kind.is_known());

    let json = serde_json::to_value(legacy).unwrap();
    assert_eq!(json["kind"], "sector");
}

#[test]
fn kind_names_serialize_canonically() {
    let json = serde_json::to_string(&RuleKind::DepartmentMatch).unwrap();
    assert_eq!(json, "\"department_match\"");
    assert_eq!("department".parse::<RuleKind>().unwrap(), RuleKind::DepartmentMatch);
    assert!("sector".parse::<RuleKind>().is_err());
}

#[test]
fn zero_rule_profile_is_invalid() {
    let profile = FilterProfile::new("empty", "", vec![], 0.5);
    let err = profile.validate().unwrap_err();
    assert!(err.to_string().contains("has no rules"));
}

#[test]
fn negative_weight_and_bad_threshold_are_invalid() {
    let rule = FilterRule::keywords("k", RuleKind::Include, &["a"]).weight(-1.0);
    assert!(FilterProfile::new("p", "", vec![rule.clone()], 0.5).validate().is_err());

    let ok_rule = rule.weight(1.0);
    assert!(FilterProfile::new("p", "", vec![ok_rule.clone()], 1.5).validate().is_err());
    assert!(FilterProfile::new("p", "", vec![ok_rule], 0.5).validate().is_ok());
}

#[test]
fn set_rule_replaces_by_name() {
    let mut profile = FilterProfile::new(
        "p",
        "",
        vec![FilterRule::keywords("k", RuleKind::Include, &["a"])],
        0.5,
    );
    profile.set_rule(FilterRule::keywords("k", RuleKind::Exclude, &["b"]).weight(2.0));
    profile.set_rule(FilterRule::keywords("k2", RuleKind::Include, &["c"]));
    assert_eq!(profile.rules.len(), 2);
    assert_eq!(profile.rules[0].kind, RuleKind::Exclude);
    assert_eq!(profile.total_weight(), 3.0);
}
