use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use policy_gate_core::comment::{
    MESSAGE_HEADER, MORE_VIOLATIONS_DETECTED, VIOLATIONS_BLOCKING_TITLE, VIOLATIONS_DETECTED_TITLE,
};
use policy_gate_core::{
    ApprovalRule, ChangeState, ChangeUnderReview, EvaluationInput, FailMode, Finding, FindingUuid,
    PipelineReport, PolicyGateConfig, PolicyViolationComment, PolicyViolationDetails, ReportType,
    ScanResultPolicyRead, ScanType, Severity, ViolationRecord, ViolationStatus,
};
use policy_gate_state::{
    AnyMergeRequestCommits, AnyMergeRequestViolation, ReportViolations, ScanFindingUuids,
    ScanFindingViolation, ViolationContext, ViolationData, ViolationError,
};

const MR: u64 = 100;

fn input() -> EvaluationInput {
    let mut warn = ScanResultPolicyRead::new(40, "Warn");
    warn.warn_mode = true;
    warn.edit_path = Some("/group/project/-/security/policies/warn/edit".into());
    EvaluationInput {
        change: ChangeUnderReview {
            id: MR,
            iid: 4,
            project_path: "group/project".into(),
            web_url: Some("https://git.example.com/group/project".into()),
            source_branch: "feature".into(),
            target_branch: "main".into(),
            diff_head_sha: "head".into(),
            state: ChangeState::Opened,
            commits: vec![],
        },
        rules: vec![
            ApprovalRule::new(1, ReportType::ScanFinding, 10, 1),
            ApprovalRule::new(2, ReportType::LicenseScanning, 20, 1),
            ApprovalRule::new(3, ReportType::AnyMergeRequest, 30, 1),
            ApprovalRule::new(4, ReportType::AnyMergeRequest, 40, 1),
            ApprovalRule::new(5, ReportType::ScanFinding, 50, 1),
        ],
        policies: vec![
            ScanResultPolicyRead::new(10, "Scan"),
            ScanResultPolicyRead::new(20, "License"),
            ScanResultPolicyRead::new(30, "Any merge request"),
            warn,
            ScanResultPolicyRead::new(50, "Open").with_fail_mode(FailMode::Open),
        ],
        source_pipelines: vec![PipelineReport::new(20, "head").with_finding(Finding {
            uuid: FindingUuid::new("B"),
            scan_type: ScanType::DependencyScanning,
            severity: Severity::High,
            name: "Test finding".into(),
            false_positive: false,
            fix_available: false,
        })],
        target_pipelines: vec![],
        vulnerabilities: vec![],
        enforced_scans: BTreeSet::new(),
        evaluated_at: Utc::now(),
    }
}

fn record(policy_id: u64, status: ViolationStatus, data: ViolationData) -> ViolationRecord {
    ViolationRecord {
        merge_request_id: MR,
        policy_id,
        status,
        data: Some(data),
    }
}

fn scan_data() -> ViolationData {
    ViolationData {
        violations: ReportViolations {
            scan_finding: Some(ScanFindingViolation {
                uuids: ScanFindingUuids {
                    newly_detected: vec!["B".into()],
                    previously_existing: vec![],
                },
            }),
            ..Default::default()
        },
        context: Some(ViolationContext {
            pipeline_ids: vec![20],
            target_pipeline_ids: vec![19],
        }),
        ..Default::default()
    }
}

fn license_data() -> ViolationData {
    ViolationData {
        violations: ReportViolations {
            license_scanning: Some(BTreeMap::from([(
                "MIT".to_string(),
                vec!["A".to_string(), "B".to_string()],
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn any_data(commits: AnyMergeRequestCommits) -> ViolationData {
    ViolationData {
        violations: ReportViolations {
            any_merge_request: Some(AnyMergeRequestViolation { commits }),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn error_data(code: &str) -> ViolationData {
    let mut data = ViolationData::default();
    data.push_error(ViolationError::new(code));
    data
}

fn render(comment: &PolicyViolationComment, records: &[ViolationRecord]) -> String {
    let input = input();
    let config = PolicyGateConfig::default();
    let details = PolicyViolationDetails::new(&input, records, &config);
    comment.body(&details)
}

fn blocking(report_types: &[ReportType]) -> PolicyViolationComment {
    let mut comment = PolicyViolationComment::parse(None);
    for report_type in report_types {
        comment.add_report_type(*report_type, true);
    }
    comment
}

// ---- summary ----

#[test]
fn no_reports_renders_resolved_message() {
    let body = render(&PolicyViolationComment::default(), &[]);
    assert!(body.starts_with(MESSAGE_HEADER));
    assert!(body.contains("Security policy violations have been resolved."));
}

#[test]
fn summary_lists_sorted_policy_names() {
    let records = vec![
        record(10, ViolationStatus::Failed, scan_data()),
        record(20, ViolationStatus::Failed, license_data()),
    ];
    let body = render(&blocking(&[ReportType::ScanFinding]), &records);
    assert!(body.contains("this merge request has policy violations and errors"));
    assert!(body.contains("To unblock this merge request, fix these items"));
    assert!(body.contains(
        "Resolve all violations in the following merge request approval policies: License, Scan"
    ));
    assert!(body.contains(
        "Remove all denied licenses identified by the following merge request approval policies: License"
    ));
    assert!(!body.contains("Any merge request"));
}

#[test]
fn optional_approvals_use_softer_wording() {
    let mut comment = PolicyViolationComment::parse(None);
    comment.add_report_type(ReportType::ScanFinding, false);
    let body = render(&comment, &[record(10, ViolationStatus::Warn, scan_data())]);
    assert!(!body.contains("To unblock this merge request, fix these items"));
    assert!(body.contains("Consider including optional reviewers"));
    assert!(body.contains(VIOLATIONS_DETECTED_TITLE));
    assert!(!body.contains(VIOLATIONS_BLOCKING_TITLE));
}

#[test]
fn any_merge_request_asks_for_approvals() {
    let records = vec![record(
        30,
        ViolationStatus::Failed,
        any_data(AnyMergeRequestCommits::Any(true)),
    )];
    let body = render(&blocking(&[ReportType::AnyMergeRequest]), &records);
    assert!(body.contains(
        "Acquire approvals from eligible approvers defined in the following merge request approval policies: Any merge request"
    ));
    assert!(!body.contains("Unsigned commits"));
}

#[test]
fn errors_and_fail_open_policies_are_summarized() {
    let records = vec![
        record(10, ViolationStatus::Failed, error_data("error")),
        record(50, ViolationStatus::Warn, error_data("SCAN_REMOVED")),
    ];
    let body = render(&blocking(&[ReportType::ScanFinding]), &records);
    assert!(body.contains("Resolve the errors and re-run the pipeline"));
    assert!(body.contains("Unknown error: error"));
    assert!(body.contains(
        "The following policies enforced on your project were skipped because they are configured to fail open: Open."
    ));
    assert!(body.contains("Confirm that all scanners from the target branch are present on the source branch."));
}

// ---- violation details ----

#[test]
fn details_render_findings_licenses_and_commits() {
    let records = vec![
        record(10, ViolationStatus::Failed, scan_data()),
        record(20, ViolationStatus::Failed, license_data()),
        record(
            30,
            ViolationStatus::Failed,
            any_data(AnyMergeRequestCommits::Shas(vec!["abcd1234".into()])),
        ),
    ];
    let body = render(
        &blocking(&[ReportType::ScanFinding, ReportType::LicenseScanning]),
        &records,
    );
    assert!(body.contains(VIOLATIONS_BLOCKING_TITLE));
    assert!(body.contains("- High - Test finding (Dependency scanning)"));
    assert!(body.contains("Out-of-policy licenses"));
    assert!(body.contains("- MIT: Used by A, B"));
    assert!(body.contains(
        "[`abcd1234`](https://git.example.com/group/project/-/commit/abcd1234)"
    ));
    assert!(!body.contains(MORE_VIOLATIONS_DETECTED));
}

#[test]
fn long_commit_lists_are_cut_off() {
    let shas: Vec<String> = (0..12).map(|i| format!("sha{i:02}")).collect();
    let records = vec![record(
        30,
        ViolationStatus::Failed,
        any_data(AnyMergeRequestCommits::Shas(shas)),
    )];
    let body = render(&blocking(&[ReportType::AnyMergeRequest]), &records);
    assert!(body.contains("sha09"));
    assert!(!body.contains("sha10"));
    assert!(body.contains(MORE_VIOLATIONS_DETECTED));
}

#[test]
fn comparison_pipelines_single_group_has_no_subtitle() {
    let records = vec![record(10, ViolationStatus::Failed, scan_data())];
    let body = render(&blocking(&[ReportType::ScanFinding]), &records);
    assert!(body.contains("Comparison pipelines"));
    assert!(body.contains("[#20](https://git.example.com/group/project/-/pipelines/20)"));
    assert!(body.contains("Target branch (`main`): [#19]"));
    assert!(!body.contains("##### Scan finding"));
}

#[test]
fn comparison_pipelines_grouped_by_report_type() {
    let mut license = license_data();
    license.context = Some(ViolationContext {
        pipeline_ids: vec![123],
        target_pipeline_ids: vec![],
    });
    let records = vec![
        record(10, ViolationStatus::Failed, scan_data()),
        record(20, ViolationStatus::Failed, license),
    ];
    let body = render(
        &blocking(&[ReportType::ScanFinding, ReportType::LicenseScanning]),
        &records,
    );
    assert!(body.contains("##### Scan finding"));
    assert!(body.contains("##### License scanning"));
    assert!(body.contains("Target branch (`main`): None"));
}

#[test]
fn warn_mode_policies_get_additional_information() {
    let records = vec![record(
        40,
        ViolationStatus::Warn,
        any_data(AnyMergeRequestCommits::Any(true)),
    )];
    let body = render(&blocking(&[ReportType::AnyMergeRequest]), &records);
    assert!(body.contains("Additional information"));
    assert!(body.contains("- [Warn](/group/project/-/security/policies/warn/edit)"));

    let no_warn = vec![record(
        30,
        ViolationStatus::Failed,
        any_data(AnyMergeRequestCommits::Any(true)),
    )];
    let body = render(&blocking(&[ReportType::AnyMergeRequest]), &no_warn);
    assert!(!body.contains("Additional information"));
}

// ---- idempotence ----

#[test]
fn rendering_round_trips_through_markers() {
    let records = vec![
        record(10, ViolationStatus::Failed, scan_data()),
        record(20, ViolationStatus::Failed, license_data()),
    ];
    let mut comment = blocking(&[ReportType::ScanFinding]);
    comment.add_report_type(ReportType::LicenseScanning, false);
    let body = render(&comment, &records);

    let reparsed = PolicyViolationComment::parse(Some(&body));
    assert_eq!(reparsed, comment);
    assert_eq!(render(&reparsed, &records), body);
}
