use prometheus::Opts;
use winperf_common::{Result, WinperfError};

pub const METRIC_NAMESPACE: &str = "winperf";

const COUNTER_HELP: &str = "windows performance counter";

/// Registry-safe identity derived from a counter path and a resolved
/// instance name. Metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`, so
/// everything outside `[A-Za-z0-9_:]` is dropped after the known
/// substitutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricIdentity {
    pub name: String,
    pub hostname: String,
    pub category: String,
    pub instance: String,
}

impl MetricIdentity {
    pub fn gauge_opts(&self) -> Opts {
        Opts::new(self.name.clone(), COUNTER_HELP)
            .namespace(METRIC_NAMESPACE)
            .const_label("hostname", self.hostname.clone())
            .const_label("category", self.category.clone())
            .const_label("instance", self.instance.clone())
    }
}

/// Derives the metric identity for one sample.
///
/// A 5-segment path (`\\host\Category(Instance)\Counter`) carries its own
/// hostname; a 3-segment path defaults to `localhost`. A parenthesized
/// instance qualifier overrides the caller's instance name unless it is the
/// wildcard marker `*`, which keeps the concrete instance resolved at read
/// time.
pub fn derive(path: &str, instance: &str) -> Result<MetricIdentity> {
    let fields: Vec<&str> = path.split('\\').collect();
    let (hostname, category_field, counter_field) = match fields.len() {
        5 => (fields[2], fields[3], fields[4]),
        3 => ("localhost", fields[1], fields[2]),
        _ => return Err(WinperfError::UnknownPathShape(path.to_string())),
    };

    let mut resolved_instance = instance.to_string();
    let category = match category_field.split_once('(') {
        Some((category, qualifier)) => {
            let qualifier = qualifier.strip_suffix(')').unwrap_or(qualifier);
            if qualifier != "*" {
                resolved_instance = qualifier.to_string();
            }
            category
        }
        None => category_field,
    };

    Ok(MetricIdentity {
        name: sanitize(&normalize(counter_field)),
        hostname: hostname.to_string(),
        category: sanitize(category),
        instance: sanitize(&normalize(&resolved_instance)),
    })
}

/// Substitutions for characters that commonly occur in counter names.
fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '.' | '-' | ' ' | '/' => out.push('_'),
            '%' => out.push_str("percent"),
            other => out.push(other),
        }
    }
    out
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == ':')
        .collect()
}
