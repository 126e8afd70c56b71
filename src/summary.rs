use serde::{ser::SerializeMap, Serialize, Serializer};

use crate::aggregate::AggregateState;

/// End-of-stream report. Map-shaped fields serialize as JSON objects whose
/// keys keep rank order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub total_number_of_lines_processed: u64,
    pub total_number_of_lines_ok: u64,
    pub total_number_of_lines_failed: u64,
    #[serde(serialize_with = "ranked_map")]
    pub top_client_ips: Vec<(String, u64)>,
    #[serde(serialize_with = "ranked_map")]
    pub top_path_avg_response_size: Vec<(String, f64)>,
}

fn ranked_map<S, V>(entries: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

/// Round to two decimal places for presentation.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn build_summary(state: &AggregateState, top_ips: usize, top_paths: usize) -> SummaryReport {
    SummaryReport {
        total_number_of_lines_processed: state.total_lines(),
        total_number_of_lines_ok: state.valid_lines(),
        total_number_of_lines_failed: state.failed_lines(),
        top_client_ips: state
            .top_addresses(top_ips)
            .into_iter()
            .map(|(address, count)| (address.to_string(), count))
            .collect(),
        top_path_avg_response_size: state
            .top_paths(top_paths)
            .into_iter()
            .map(|(path, mean)| (path.to_string(), round2(mean)))
            .collect(),
    }
}
