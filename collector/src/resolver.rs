//! `inherit_from` resolution.

use std::collections::BTreeMap;

use common::errors::{AppError, AppResult};
use common::models::{Config, Test};

/// Replaces every test with its fully resolved form.
///
/// Each test is resolved from the original, unresolved table, so the result
/// does not depend on iteration order.
pub fn resolve(mut config: Config) -> AppResult<Config> {
    let mut resolved = BTreeMap::new();
    for name in config.tests.keys() {
        let mut chain = Vec::new();
        resolved.insert(name.clone(), resolve_test(&config.tests, name, &mut chain)?);
    }
    config.tests = resolved;
    Ok(config)
}

/// Resolves one test, `chain` holding the names already on the recursion path.
fn resolve_test(tests: &BTreeMap<String, Test>, name: &str, chain: &mut Vec<String>) -> AppResult<Test> {
    let test = tests
        .get(name)
        .ok_or_else(|| AppError::Config(format!("test '{}' does not exist", name)))?;

    let reference = test.inherit_from.as_str();
    if reference.is_empty() {
        return Ok(test.clone());
    }

    chain.push(name.to_string());
    if chain.iter().any(|seen| seen == reference) {
        return Err(AppError::CircularReference {
            test: name.to_string(),
            reference: reference.to_string(),
            chain: format!("{} -> {}", chain.join(" -> "), reference),
        });
    }
    if !tests.contains_key(reference) {
        return Err(AppError::MissingReference {
            test: name.to_string(),
            reference: reference.to_string(),
        });
    }

    let ancestor = resolve_test(tests, reference, chain)?;
    chain.pop();

    let mut merged = test.clone();
    merged.inherit(&ancestor);
    Ok(merged)
}
