//! Cache key construction and positional argument binding.

use std::fmt::Write as _;

use super::ResolvedParams;
use crate::catalog::ParameterDefinition;
use crate::value::ParamValue;

/// `query:<slug>` followed by `:<name>=<value>` for each resolved parameter,
/// in declaration order. Unresolved optional parameters are skipped.
///
/// `%`, `:` and `=` inside values are percent-escaped so a value cannot
/// imitate a further `:<name>=<value>` segment.
pub fn build_cache_key(
    slug: &str,
    params: &ResolvedParams,
    definitions: &[ParameterDefinition],
) -> String {
    let mut key = format!("query:{slug}");
    for def in definitions {
        if let Some(value) = params.get(&def.name) {
            let _ = write!(key, ":{}=", def.name);
            escape_into(&mut key, &value.to_string());
        }
    }
    key
}

fn escape_into(key: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '%' => key.push_str("%25"),
            ':' => key.push_str("%3A"),
            '=' => key.push_str("%3D"),
            _ => key.push(c),
        }
    }
}

/// Arguments for `$1..$n`, where `n` is the highest declared position.
///
/// Slot `position - 1` holds the parameter's value; unresolved parameters and
/// unused positions bind as NULL.
pub fn bind_arguments(
    params: &ResolvedParams,
    definitions: &[ParameterDefinition],
) -> Vec<Option<ParamValue>> {
    let len = definitions.iter().map(|d| d.position).max().unwrap_or(0);
    let mut args = vec![None; len];
    for def in definitions {
        if def.position == 0 {
            continue;
        }
        if let Some(value) = params.get(&def.name) {
            args[def.position - 1] = Some(value.clone());
        }
    }
    args
}
