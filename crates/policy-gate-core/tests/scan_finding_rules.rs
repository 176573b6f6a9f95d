use std::collections::BTreeSet;

use chrono::{Duration, TimeZone, Utc};
use policy_gate_core::domain::{
    AgeInterval, AgeOperator, CommitsRule, LicenseList, LicenseState, VulnerabilityAge,
};
use policy_gate_core::{
    evaluate, ApprovalRule, ChangeState, ChangeUnderReview, Commit, ErrorCode, EvaluationInput,
    Finding, FindingUuid, PipelineReport, PolicyGateConfig, ReportType, ScanResultPolicyRead,
    ScanType, Severity, Vulnerability, VulnerabilityState,
};

fn finding(uuid: &str, scan: ScanType, severity: Severity) -> Finding {
    Finding {
        uuid: FindingUuid::new(uuid),
        scan_type: scan,
        severity,
        name: format!("finding {uuid}"),
        false_positive: false,
        fix_available: false,
    }
}

fn pipeline(id: u64, sha: &str, uuids: &[&str]) -> PipelineReport {
    uuids.iter().fold(
        PipelineReport::new(id, sha).with_scan(ScanType::Sast),
        |p, u| p.with_finding(finding(u, ScanType::Sast, Severity::High)),
    )
}

fn vulnerability(uuid: &str, state: VulnerabilityState, age_days: i64) -> Vulnerability {
    Vulnerability {
        uuid: FindingUuid::new(uuid),
        state,
        severity: Severity::High,
        scan_type: ScanType::Sast,
        name: format!("vulnerability {uuid}"),
        created_at: now() - Duration::days(age_days),
        false_positive: false,
        fix_available: false,
    }
}

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn input(source: &[&str], target: &[&str]) -> EvaluationInput {
    EvaluationInput {
        change: ChangeUnderReview {
            id: 100,
            iid: 4,
            project_path: "group/project".into(),
            web_url: Some("https://git.example.com/group/project".into()),
            source_branch: "feature".into(),
            target_branch: "main".into(),
            diff_head_sha: "head".into(),
            state: ChangeState::Opened,
            commits: vec![],
        },
        rules: vec![ApprovalRule::new(1, ReportType::ScanFinding, 10, 2)],
        policies: vec![ScanResultPolicyRead::new(10, "Scan")],
        source_pipelines: vec![pipeline(20, "head", source)],
        target_pipelines: vec![pipeline(19, "base", target)],
        vulnerabilities: vec![],
        enforced_scans: BTreeSet::new(),
        evaluated_at: now(),
    }
}

fn uuids(items: &[&str]) -> BTreeSet<FindingUuid> {
    items.iter().map(|u| FindingUuid::new(*u)).collect()
}

// ---- newly detected findings ----

#[test]
fn new_finding_over_allowance_violates() {
    let outcome = evaluate(&input(&["A", "B"], &["A"]), &PolicyGateConfig::default()).unwrap();
    let eval = outcome.evaluation(1).unwrap();
    assert!(eval.violated);
    assert_eq!(eval.newly_detected, uuids(&["B"]));
    assert!(eval.previously_existing.is_empty());
    assert_eq!(outcome.rule_update(1).unwrap().approvals_required, 2);
}

#[test]
fn identical_findings_do_not_violate() {
    let outcome = evaluate(&input(&["A"], &["A"]), &PolicyGateConfig::default()).unwrap();
    assert!(!outcome.evaluation(1).unwrap().violated);
    assert_eq!(outcome.rule_update(1).unwrap().approvals_required, 0);
}

#[test]
fn severity_and_scanner_filters_apply() {
    let mut i = input(&[], &[]);
    i.source_pipelines[0] = PipelineReport::new(20, "head")
        .with_finding(finding("LOW", ScanType::Sast, Severity::Low))
        .with_finding(finding("DEP", ScanType::DependencyScanning, Severity::Critical));
    i.target_pipelines[0] = PipelineReport::new(19, "base")
        .with_scan(ScanType::Sast)
        .with_scan(ScanType::DependencyScanning);
    i.rules[0].severity_levels = vec![Severity::Critical, Severity::High];
    i.rules[0].scanners = vec![ScanType::Sast];

    let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
    assert!(!outcome.evaluation(1).unwrap().violated);

    i.rules[0].scanners.clear();
    let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
    assert_eq!(outcome.evaluation(1).unwrap().newly_detected, uuids(&["DEP"]));
}

#[test]
fn dismissed_new_findings_count_only_for_new_dismissed_rules() {
    let mut i = input(&["A", "B"], &[]);
    i.vulnerabilities = vec![vulnerability("B", VulnerabilityState::Dismissed, 1)];
    i.rules[0].vulnerability_states = vec![VulnerabilityState::NewNeedsTriage];
    let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
    assert_eq!(outcome.evaluation(1).unwrap().newly_detected, uuids(&["A"]));

    i.rules[0].vulnerability_states = vec![VulnerabilityState::NewDismissed];
    let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
    assert_eq!(outcome.evaluation(1).unwrap().newly_detected, uuids(&["B"]));
}

// ---- previously existing vulnerabilities ----

#[test]
fn previously_existing_counted_when_rule_selects_them() {
    let mut i = input(&["A", "B"], &["A"]);
    i.vulnerabilities = vec![vulnerability("A", VulnerabilityState::Detected, 3)];
    i.rules[0].vulnerability_states = vec![
        VulnerabilityState::NewNeedsTriage,
        VulnerabilityState::Detected,
    ];
    i.rules[0].vulnerabilities_allowed = 1;

    let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
    let eval = outcome.evaluation(1).unwrap();
    assert!(eval.violated);
    assert_eq!(eval.newly_detected, uuids(&["B"]));
    assert_eq!(eval.previously_existing, uuids(&["A"]));
}

#[test]
fn preexisting_rule_ignores_pipelines() {
    let mut i = input(&[], &[]);
    i.source_pipelines[0].can_store_security_reports = false;
    i.vulnerabilities = vec![
        vulnerability("OLD", VulnerabilityState::Confirmed, 60),
        vulnerability("RECENT", VulnerabilityState::Confirmed, 2),
    ];
    i.rules[0].vulnerability_states = vec![VulnerabilityState::Confirmed];
    i.policies[0].vulnerability_age = Some(VulnerabilityAge {
        operator: AgeOperator::GreaterThan,
        interval: AgeInterval::Day,
        value: 30,
    });

    let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
    let eval = outcome.evaluation(1).unwrap();
    assert!(eval.error.is_none());
    assert_eq!(eval.previously_existing, uuids(&["OLD"]));
}

// ---- removed scans ----

#[test]
fn removed_scan_is_reported_with_missing_scans() {
    let mut i = input(&["A"], &["A"]);
    i.target_pipelines[0] = i.target_pipelines[0]
        .clone()
        .with_scan(ScanType::SecretDetection);
    let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
    let eval = outcome.evaluation(1).unwrap();
    assert_eq!(eval.error, Some(ErrorCode::ScanRemoved));
    assert_eq!(eval.missing_scans, vec![ScanType::SecretDetection]);
    assert!(outcome.requires_approval());
}

#[test]
fn rule_scanner_missing_without_target_pipeline_is_removed() {
    let mut i = input(&[], &[]);
    i.source_pipelines[0] = PipelineReport::new(20, "head").with_scan(ScanType::DependencyScanning);
    i.target_pipelines.clear();
    i.rules[0].scanners = vec![ScanType::ContainerScanning];

    let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
    let eval = outcome.evaluation(1).unwrap();
    assert_eq!(eval.error, Some(ErrorCode::ScanRemoved));
    assert_eq!(eval.missing_scans, vec![ScanType::ContainerScanning]);
    assert_eq!(outcome.rule_update(1).unwrap().approvals_required, 2);
}

#[test]
fn rule_scanner_not_run_by_either_side_is_ignored() {
    let mut i = input(&[], &[]);
    i.source_pipelines[0] = PipelineReport::new(20, "head").with_scan(ScanType::DependencyScanning);
    i.target_pipelines[0] = PipelineReport::new(19, "base").with_scan(ScanType::DependencyScanning);
    i.rules[0].scanners = vec![ScanType::ContainerScanning];

    let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
    assert!(outcome.evaluation(1).unwrap().error.is_none());
    assert_eq!(outcome.rule_update(1).unwrap().approvals_required, 0);
}

#[test]
fn removed_scan_enforced_by_execution_policy_unblocks() {
    let mut i = input(&["A"], &["A"]);
    i.target_pipelines[0] = i.target_pipelines[0]
        .clone()
        .with_scan(ScanType::SecretDetection);
    i.enforced_scans.insert(ScanType::SecretDetection);
    i.policies[0].policy_tuning.unblock_rules_using_execution_policies = true;

    let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
    let eval = outcome.evaluation(1).unwrap();
    assert!(eval.unblocked_by_execution_policy);
    assert_eq!(outcome.rule_update(1).unwrap().approvals_required, 0);
}

// ---- license and any_merge_request rules ----

#[test]
fn denied_license_blocks_with_dependencies() {
    let mut i = input(&[], &[]);
    i.rules = vec![ApprovalRule::new(2, ReportType::LicenseScanning, 11, 1)];
    let mut policy = ScanResultPolicyRead::new(11, "License");
    policy.licenses = Some(LicenseList::Denied(vec!["GPL-3.0".into()]));
    policy.license_states = vec![LicenseState::Detected];
    i.policies = vec![policy];
    i.source_pipelines[0] = i.source_pipelines[0]
        .clone()
        .with_license("GPL-3.0", &["libfoo"]);

    let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
    let eval = outcome.evaluation(2).unwrap();
    assert!(eval.violated);
    let licenses = eval.violations.license_scanning.as_ref().unwrap();
    assert_eq!(licenses["GPL-3.0"], vec!["libfoo"]);
}

#[test]
fn unsigned_commits_require_approval() {
    let mut i = input(&[], &[]);
    i.change.commits = vec![
        Commit {
            sha: "abcd1234".into(),
            signed: false,
        },
        Commit {
            sha: "ef567890".into(),
            signed: true,
        },
    ];
    i.rules = vec![ApprovalRule::new(3, ReportType::AnyMergeRequest, 12, 1)];
    let mut policy = ScanResultPolicyRead::new(12, "Signed commits");
    policy.commits = Some(CommitsRule::Unsigned);
    i.policies = vec![policy];

    let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
    assert!(outcome.evaluation(3).unwrap().violated);
    assert_eq!(outcome.rule_update(3).unwrap().approvals_required, 1);
}
