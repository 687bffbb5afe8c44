//! Maps one iteration's build result and execution report to a verdict.

use crate::models::{
    BuildResult, Classification, ExecutionOutcome, ExecutionReport, ResourceCause, SiteHit,
    Verdict, VulnerabilitySpec,
};

/// First matching rule wins:
/// build failed, target check fired at the declared site, engine cut off,
/// anything else fired, nothing fired.
///
/// A target hit at the site outranks both unrelated crashes on other paths
/// and the engine running out of time or memory afterwards.
pub fn classify(build: &BuildResult, report: &ExecutionReport, spec: &VulnerabilitySpec) -> Classification {
    if !build.success {
        return Classification::plain(Verdict::BuildFail);
    }

    // Checked ahead of the timeout rule: a target hit recorded before the
    // engine halted outranks the halt tag on the report.
    if target_hit_at_site(report, spec).is_some() {
        return Classification::plain(Verdict::Green);
    }

    match report.outcome {
        ExecutionOutcome::Timeout => {
            return Classification { verdict: Verdict::NoReproduction, cause: Some(ResourceCause::Timeout) };
        }
        ExecutionOutcome::ResourceExhaustion => {
            return Classification {
                verdict: Verdict::NoReproduction,
                cause: Some(ResourceCause::ResourceExhaustion),
            };
        }
        _ => {}
    }

    if !report.hits.is_empty() {
        return Classification::plain(Verdict::WrongSite);
    }

    Classification::plain(Verdict::NoReproduction)
}

pub fn target_hit_at_site<'a>(report: &'a ExecutionReport, spec: &VulnerabilitySpec) -> Option<&'a SiteHit> {
    let site = spec.site();
    report.hits.iter().find(|h| {
        h.is_target && h.location.as_ref().is_some_and(|loc| loc.same_site(&site))
    })
}

/// The hit that best explains a non-green verdict: a target hit elsewhere,
/// otherwise the first crash.
pub fn decisive_hit<'a>(report: &'a ExecutionReport, spec: &VulnerabilitySpec) -> Option<&'a SiteHit> {
    target_hit_at_site(report, spec)
        .or_else(|| report.hits.iter().find(|h| h.is_target))
        .or_else(|| report.hits.first())
}
