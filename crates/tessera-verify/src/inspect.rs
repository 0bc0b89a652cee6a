//! Human-readable attestation display.
//!
//! Extracts key fields from a signed envelope and formats them for
//! terminal display.

use std::fmt::Write;

use serde::Serialize;
use tessera_craft::envelope::Envelope;
use tessera_craft::render::NormalizedPredicate;
use tessera_craft::statement::Statement;

use crate::error::VerificationError;
use crate::extract;

/// Extracted summary of a signed attestation.
#[derive(Debug, Serialize)]
pub struct AttestationSummary {
    /// The in-toto statement type URI.
    pub statement_type: String,
    /// The predicate type URI.
    pub predicate_type: String,
    /// Builder ID.
    pub builder_id: String,
    /// Build type.
    pub build_type: String,
    /// `project/workflow` of the attested run.
    pub workflow: String,
    /// Run identifier.
    pub run_id: String,
    /// When crafting started (RFC 3339).
    pub initialized_at: String,
    /// When crafting finished (RFC 3339), if recorded.
    pub finished_at: Option<String>,
    /// CI runner type.
    pub runner_type: String,
    /// Number of subjects.
    pub subject_count: usize,
    /// Number of materials.
    pub material_count: usize,
    /// Key identifiers of the envelope signatures.
    pub keyids: Vec<String>,
    /// HEAD commit, if the attestation pins one.
    pub git_commit: Option<String>,
}

/// Extract a summary from a signed envelope.
pub fn summarize(envelope: &Envelope) -> Result<AttestationSummary, VerificationError> {
    let statement = envelope.statement()?;
    let predicate = extract::extract_statement(&statement)?;
    Ok(summary_of(envelope, &statement, &predicate))
}

fn summary_of(
    envelope: &Envelope,
    statement: &Statement,
    predicate: &NormalizedPredicate,
) -> AttestationSummary {
    AttestationSummary {
        statement_type: statement.statement_type.clone(),
        predicate_type: predicate.predicate_type.clone(),
        builder_id: predicate.builder_id.clone(),
        build_type: predicate.build_type.clone(),
        workflow: format!(
            "{}/{}",
            predicate.workflow.project, predicate.workflow.name
        ),
        run_id: predicate.workflow.run_id.clone(),
        initialized_at: predicate.initialized_at.to_rfc3339(),
        finished_at: predicate.finished_at.map(|t| t.to_rfc3339()),
        runner_type: predicate.runner_type.to_string(),
        subject_count: statement.subject.len(),
        material_count: predicate.materials.len(),
        keyids: envelope
            .signatures
            .iter()
            .map(|s| s.keyid.clone().unwrap_or_else(|| "(none)".to_owned()))
            .collect(),
        git_commit: predicate.git_commit.clone(),
    }
}

/// Format a summary as a human-readable string.
pub fn format_summary(summary: &AttestationSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Attestation Summary");
    let _ = writeln!(out, "-------------------");
    let _ = writeln!(out, "Statement type:  {}", summary.statement_type);
    let _ = writeln!(out, "Predicate type:  {}", summary.predicate_type);
    let _ = writeln!(out, "Builder:         {}", summary.builder_id);
    let _ = writeln!(out, "Build type:      {}", summary.build_type);
    let _ = writeln!(out, "Workflow:        {}", summary.workflow);
    let _ = writeln!(out, "Run:             {}", summary.run_id);
    let _ = writeln!(out, "Started:         {}", summary.initialized_at);
    let _ = writeln!(
        out,
        "Finished:        {}",
        summary.finished_at.as_deref().unwrap_or("-")
    );
    let _ = writeln!(out, "Runner:          {}", summary.runner_type);
    let _ = writeln!(out, "Subjects:        {}", summary.subject_count);
    let _ = writeln!(out, "Materials:       {}", summary.material_count);
    let _ = writeln!(
        out,
        "Git commit:      {}",
        summary.git_commit.as_deref().unwrap_or("-")
    );
    let _ = writeln!(out, "Signed by:       {}", summary.keyids.join(", "));
    out
}

/// Format a detailed view of the full envelope.
pub fn format_detailed(envelope: &Envelope) -> Result<String, VerificationError> {
    let statement = envelope.statement()?;
    let predicate = extract::extract_statement(&statement)?;
    let mut out = format_summary(&summary_of(envelope, &statement, &predicate));

    let _ = writeln!(out);
    let _ = writeln!(out, "Subjects:");
    for subject in &statement.subject {
        let name = subject.name.as_deref().unwrap_or("?");
        let digests: Vec<String> = subject
            .digest
            .iter()
            .map(|(alg, hex)| format!("{alg}:{hex}"))
            .collect();
        let _ = writeln!(out, "  {name}  {}", digests.join(" "));
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Materials:");
    for m in &predicate.materials {
        let mut flags = Vec::new();
        if m.is_output {
            flags.push("output");
        }
        if m.uploaded_to_cas {
            flags.push("cas");
        }
        if m.embedded_inline {
            flags.push("inline");
        }
        let digest = m.digest.as_ref().map(ToString::to_string).unwrap_or_default();
        let _ = write!(out, "  {} [{}] {}", m.name, m.material_type, m.value);
        if !digest.is_empty() {
            let _ = write!(out, "  {digest}");
        }
        if !flags.is_empty() {
            let _ = write!(out, "  ({})", flags.join(", "));
        }
        let _ = writeln!(out);
        for (k, v) in &m.annotations {
            let _ = writeln!(out, "      {k}={v}");
        }
    }

    if !predicate.env_vars.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Environment:");
        for (k, v) in &predicate.env_vars {
            let _ = writeln!(out, "  {k}={v}");
        }
    }

    Ok(out)
}
