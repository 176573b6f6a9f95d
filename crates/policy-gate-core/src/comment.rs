//! The single bot comment kept on each merge request.
//!
//! The comment carries hidden markers recording which report types are
//! currently violated and which of those only need optional approval, so a
//! later evaluation of one report type can rewrite the comment without
//! losing what other report types reported.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::details::{ComparisonPipelines, FindingDetail, PolicyViolationDetails};
use crate::domain::{ChangeUnderReview, ReportType};

pub const MESSAGE_HEADER: &str = "<!-- policy_violation_comment -->";
const VIOLATED_REPORTS_MARKER: &str = "<!-- violated_reports:";
const OPTIONAL_APPROVALS_MARKER: &str = "<!-- optional_approvals:";
const MARKER_END: &str = "-->";

pub const VIOLATIONS_RESOLVED: &str = "Security policy violations have been resolved.";
pub const VIOLATIONS_BLOCKING_TITLE: &str = ":warning: **Violations that require approval**";
pub const VIOLATIONS_DETECTED_TITLE: &str = ":information_source: **Violations detected in this merge request**";
pub const MORE_VIOLATIONS_DETECTED: &str = "More violations have been detected in addition to the list above. Check the merge request widget for the full list.";

const POLICY_LIST_PREFIX: &str = "in the following merge request approval policies";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyViolationComment {
    reports: BTreeSet<ReportType>,
    optional_approval_reports: BTreeSet<ReportType>,
}

fn parse_marker(body: &str, marker: &str) -> BTreeSet<ReportType> {
    body.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(marker))
        .filter_map(|rest| rest.strip_suffix(MARKER_END))
        .flat_map(|list| list.split(','))
        .filter_map(|name| name.parse().ok())
        .collect()
}

fn join_reports(reports: &BTreeSet<ReportType>) -> String {
    reports
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

impl PolicyViolationComment {
    /// Recover state from an existing comment body. Bodies without the
    /// header carry no reports.
    pub fn parse(existing: Option<&str>) -> Self {
        let Some(body) = existing.filter(|b| b.contains(MESSAGE_HEADER)) else {
            return Self::default();
        };
        Self {
            reports: parse_marker(body, VIOLATED_REPORTS_MARKER),
            optional_approval_reports: parse_marker(body, OPTIONAL_APPROVALS_MARKER),
        }
    }

    pub fn reports(&self) -> &BTreeSet<ReportType> {
        &self.reports
    }

    pub fn optional_approval_reports(&self) -> &BTreeSet<ReportType> {
        &self.optional_approval_reports
    }

    pub fn add_report_type(&mut self, report_type: ReportType, requires_approval: bool) {
        self.reports.insert(report_type);
        if requires_approval {
            self.optional_approval_reports.remove(&report_type);
        } else {
            self.optional_approval_reports.insert(report_type);
        }
    }

    pub fn remove_report_type(&mut self, report_type: ReportType) {
        self.reports.remove(&report_type);
        self.optional_approval_reports.remove(&report_type);
    }

    pub fn clear_report_types(&mut self) {
        self.reports.clear();
        self.optional_approval_reports.clear();
    }

    /// Whether some reported type still needs approval.
    pub fn is_blocking(&self) -> bool {
        self.reports
            .iter()
            .any(|r| !self.optional_approval_reports.contains(r))
    }

    pub fn body(&self, details: &PolicyViolationDetails<'_>) -> String {
        let mut out = vec![
            MESSAGE_HEADER.to_string(),
            format!("{VIOLATED_REPORTS_MARKER} {} {MARKER_END}", join_reports(&self.reports)),
            format!(
                "{OPTIONAL_APPROVALS_MARKER} {} {MARKER_END}",
                join_reports(&self.optional_approval_reports)
            ),
        ];
        if self.reports.is_empty() {
            out.push(format!(":white_check_mark: **{VIOLATIONS_RESOLVED}**"));
            return out.join("\n");
        }

        out.push(self.summary(details));
        if let Some(section) = self.violation_details(details) {
            out.push(section);
        }
        if let Some(section) = comparison_pipelines(details.change(), &details.comparison_pipelines()) {
            out.push(section);
        }
        if let Some(section) = additional_info(details) {
            out.push(section);
        }
        out.join("\n")
    }

    // -----------------------------------------------------------------------
    // Sections
    // -----------------------------------------------------------------------

    fn summary(&self, details: &PolicyViolationDetails<'_>) -> String {
        let mut s = String::from("## :warning: Policy violation(s) detected\n\n");
        s.push_str(
            "Based on your organization's security policies, this merge request has policy violations and errors.",
        );
        if self.is_blocking() {
            s.push_str(" To unblock this merge request, fix these items:\n\n");
        } else {
            s.push_str(
                " Consider including optional reviewers based on the policy rules in the merge request widget.\n\n",
            );
        }

        let mut items = Vec::new();
        let violated = details.violated_policy_names(None);
        if !violated.is_empty() {
            items.push(format!(
                "- Resolve all violations {POLICY_LIST_PREFIX}: {}",
                violated.join(", ")
            ));
        }
        let licenses = details.violated_policy_names(Some(ReportType::LicenseScanning));
        if !licenses.is_empty() {
            items.push(format!(
                "- Remove all denied licenses identified by the following merge request approval policies: {}",
                licenses.join(", ")
            ));
        }
        let any = details.violated_policy_names(Some(ReportType::AnyMergeRequest));
        if !any.is_empty() {
            items.push(format!(
                "- Acquire approvals from eligible approvers defined {POLICY_LIST_PREFIX}: {}",
                any.join(", ")
            ));
        }
        if !details.errors().is_empty() {
            items.push("- Resolve the errors and re-run the pipeline".to_string());
        }
        s.push_str(&items.join("\n"));

        let fail_open = details.fail_open_policies();
        if !fail_open.is_empty() {
            s.push_str(&format!(
                "\n\nThe following policies enforced on your project were skipped because they are configured to fail open: {}.",
                fail_open.join(", ")
            ));
            for message in details.fail_open_messages() {
                s.push_str(&format!("\n- {message}"));
            }
        }

        if self.is_blocking() {
            s.push_str(
                "\n\nIf you think these items shouldn't be violations, ask eligible approvers of each policy to approve this merge request.",
            );
        }
        s.push('\n');
        s
    }

    fn violation_details(&self, details: &PolicyViolationDetails<'_>) -> Option<String> {
        let max = details.max_violations();
        let change = details.change();
        let mut sections = Vec::new();

        let new = details.new_scan_finding_violations();
        if !new.is_empty() {
            sections.push(list_section(
                "Newly detected vulnerabilities",
                new.iter().map(finding_line),
                new.len(),
                max,
            ));
        }
        let previous = details.previous_scan_finding_violations();
        if !previous.is_empty() {
            sections.push(list_section(
                "Previously existing vulnerabilities",
                previous.iter().map(finding_line),
                previous.len(),
                max,
            ));
        }
        let licenses = details.license_scanning_violations();
        if !licenses.is_empty() {
            sections.push(list_section(
                "Out-of-policy licenses",
                licenses
                    .iter()
                    .map(|l| format!("- {}: Used by {}", l.license, l.dependencies.join(", "))),
                licenses.len(),
                max,
            ));
        }
        let unsigned = details.unsigned_commits();
        if !unsigned.is_empty() {
            sections.push(list_section(
                "Unsigned commits",
                unsigned.iter().map(|sha| commit_line(change, sha)),
                unsigned.len(),
                max,
            ));
        }
        let errors = details.errors();
        if !errors.is_empty() {
            let lines: Vec<String> = errors.iter().map(|e| format!("- {}", e.message)).collect();
            sections.push(format!("#### Errors\n\n{}\n", lines.join("\n")));
        }

        if sections.is_empty() {
            return None;
        }
        let title = if self.is_blocking() {
            VIOLATIONS_BLOCKING_TITLE
        } else {
            VIOLATIONS_DETECTED_TITLE
        };
        Some(format!("<details>\n<summary>{title}</summary>\n\n{}\n</details>\n", sections.join("\n")))
    }
}

fn finding_line(finding: &FindingDetail) -> String {
    let name = if finding.name.is_empty() {
        finding.uuid.as_str()
    } else {
        finding.name.as_str()
    };
    match finding.scan_type {
        Some(scan) => format!("- {} - {} ({})", finding.severity.label(), name, scan.label()),
        None => format!("- {} - {}", finding.severity.label(), name),
    }
}

fn commit_line(change: &ChangeUnderReview, sha: &str) -> String {
    match change.commit_url(sha) {
        Some(url) => format!("- [`{sha}`]({url})"),
        None => format!("- `{sha}`"),
    }
}

fn list_section<I>(title: &str, lines: I, len: usize, max: usize) -> String
where
    I: Iterator<Item = String>,
{
    let lines: Vec<String> = lines.take(max).collect();
    let mut s = format!("#### {title}\n\n{}\n", lines.join("\n"));
    if len > max {
        s.push_str(&format!("\n{MORE_VIOLATIONS_DETECTED}\n"));
    }
    s
}

fn pipeline_links(change: &ChangeUnderReview, ids: &[u64]) -> String {
    if ids.is_empty() {
        return "None".to_string();
    }
    ids.iter()
        .map(|id| match change.pipeline_url(*id) {
            Some(url) => format!("[#{id}]({url})"),
            None => format!("#{id}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn comparison_pipelines(change: &ChangeUnderReview, groups: &[ComparisonPipelines]) -> Option<String> {
    if groups.is_empty() {
        return None;
    }
    let titled = groups.len() > 1;
    let mut s = String::from("#### Comparison pipelines\n");
    for group in groups {
        if titled {
            s.push_str(&format!("\n##### {}\n", group.report_type.title()));
        }
        s.push_str(&format!(
            "\n- Target branch (`{}`): {}\n- Source branch (`{}`): {}\n",
            change.target_branch,
            pipeline_links(change, &group.target),
            change.source_branch,
            pipeline_links(change, &group.source),
        ));
    }
    Some(s)
}

fn additional_info(details: &PolicyViolationDetails<'_>) -> Option<String> {
    let policies = details.warn_mode_policies();
    if policies.is_empty() {
        return None;
    }
    let lines: Vec<String> = policies
        .iter()
        .map(|p| match &p.edit_path {
            Some(path) => format!("- [{}]({})", p.name, path),
            None => format!("- {}", p.name),
        })
        .collect();
    Some(format!(
        "#### Additional information\n\nReview the following policies to understand requirements and identify policy owners for support:\n\n{}\n",
        lines.join("\n")
    ))
}
