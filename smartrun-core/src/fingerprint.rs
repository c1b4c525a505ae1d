//! Pipeline fingerprinting — deterministic identity of a resolved definition.
//!
//! Two reports with the same fingerprint were produced by the same commands,
//! artifact paths, freshness declarations and metric declarations.

use crate::artifact::ArtifactSpec;
use crate::pipeline::Pipeline;
use crate::stage::MetricSpec;

/// BLAKE3 of the canonical pipeline definition, hex encoded.
pub fn pipeline_fingerprint(pipeline: &Pipeline) -> String {
    let mut hasher = blake3::Hasher::new();
    for stage in pipeline.stages() {
        field(&mut hasher, "stage", stage.name());
        field(&mut hasher, "program", &stage.command.program);
        for arg in &stage.command.args {
            field(&mut hasher, "arg", arg);
        }
        artifacts(&mut hasher, "in", &stage.inputs);
        artifacts(&mut hasher, "out", &stage.outputs);
        if let Some(MetricSpec::SignalBalance {
            column,
            buy,
            sell,
            threshold,
        }) = &stage.metrics
        {
            field(
                &mut hasher,
                "metric",
                &format!("signal_balance:{column}:{buy}:{sell}:{threshold}"),
            );
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// First 12 hex characters, for display.
pub fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}

fn artifacts(hasher: &mut blake3::Hasher, tag: &str, specs: &[ArtifactSpec]) {
    for spec in specs {
        field(hasher, tag, &spec.path.to_string_lossy());
        if spec.delimiter != b',' {
            field(hasher, "delim", &(spec.delimiter as char).to_string());
        }
        if let Some(predicate) = &spec.freshness {
            field(hasher, "fresh", &predicate.describe());
        }
    }
}

// Length-prefixed so adjacent fields cannot collide.
fn field(hasher: &mut blake3::Hasher, tag: &str, value: &str) {
    hasher.update(tag.as_bytes());
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}
