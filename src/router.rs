//! Threshold routing: endpoint choice and payload-category gating.
//!
//! A sample carries a running "record type" counter which is compared
//! against a configured threshold. One comparison drives everything:
//! which endpoint the upload targets and whether each gated payload
//! category is included. The router is a pure decision function with no
//! I/O and no retries.

use tracing::warn;

/// Threshold-routing configuration for one sample.
///
/// `record_type` and `threshold` are unsigned by construction, so the
/// non-negativity invariant holds in the type.
#[derive(Debug, Clone, Default)]
pub struct ThresholdConfig {
    pub record_type: u32,
    pub threshold: u32,
    /// When true, the own-argument set is only sent once the threshold is met
    pub gate_arguments: bool,
    pub gate_static_files: bool,
    pub gate_dynamic_files: bool,
    pub gate_variable_files: bool,
    /// Comma-separated 1-based indices into the dynamic file list
    pub attachment_selector: String,
}

/// Which of the two configured endpoints the sample targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointChoice {
    /// Threshold met: `record_type >= threshold`
    Achieved,
    /// Threshold not met
    Below,
}

/// Per-category inclusion decision after gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadGates {
    pub own_arguments: bool,
    pub static_files: bool,
    pub dynamic_files: bool,
    pub variable_files: bool,
}

/// Result of routing one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    pub endpoint: EndpointChoice,
    pub included: PayloadGates,
}

/// Evaluate the threshold comparison once and derive both the endpoint
/// choice and every category gate from it.
///
/// An ungated category is always included; a gated one only when the
/// threshold is met. Endpoint selection and gating share the identical
/// pass condition.
pub fn route(config: &ThresholdConfig) -> RouteDecision {
    let pass = config.record_type >= config.threshold;

    RouteDecision {
        endpoint: if pass {
            EndpointChoice::Achieved
        } else {
            EndpointChoice::Below
        },
        included: PayloadGates {
            own_arguments: !config.gate_arguments || pass,
            static_files: !config.gate_static_files || pass,
            dynamic_files: !config.gate_dynamic_files || pass,
            variable_files: !config.gate_variable_files || pass,
        },
    }
}

/// Resolve a comma-separated list of 1-based indices against a dynamic
/// file list of length `available`.
///
/// Returns 0-based indices in selector order. Indices outside `[1, len]`
/// and unparsable tokens are skipped with a warning; they never abort the
/// remaining selection. Blank tokens are ignored.
pub fn select_attachments(selector: &str, available: usize) -> Vec<usize> {
    let mut selected = Vec::new();

    for token in selector.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let index: usize = match token.parse() {
            Ok(n) => n,
            Err(_) => {
                warn!(token, "attachment selector entry is not a number, skipping");
                continue;
            }
        };

        if index < 1 || index > available {
            warn!(
                index,
                available, "attachment index outside dynamic file range, skipping"
            );
            continue;
        }

        selected.push(index - 1);
    }

    selected
}
