//! Load-time checks for a resolved configuration.

use std::collections::BTreeMap;

use validator::Validate;

use common::errors::{AppError, AppResult};
use common::models::{Config, Driver, Test};
use common::utils::IdentifierValidator;

/// Checks names, drivers, sink definitions and every executable test.
pub fn validate(config: &Config) -> AppResult<()> {
    validate_names(config)?;
    validate_drivers(config)?;
    validate_sinks(config)?;
    for (name, test) in &config.tests {
        check_test(config, name, test)?;
    }
    Ok(())
}

fn validate_names(config: &Config) -> AppResult<()> {
    for name in config.databases.keys() {
        IdentifierValidator::validate("database", name)?;
    }
    for name in config.influxes.keys() {
        IdentifierValidator::validate("influx", name)?;
    }
    for name in config.influxes2.keys() {
        IdentifierValidator::validate("influx2", name)?;
    }
    for name in config.influxes3.keys() {
        IdentifierValidator::validate("influx3", name)?;
    }
    for name in config.tests.keys() {
        IdentifierValidator::validate("test", name)?;
    }
    Ok(())
}

fn validate_drivers(config: &Config) -> AppResult<()> {
    for (name, database) in &config.databases {
        if database.driver.is_empty() {
            return Err(AppError::UnsupportedDriver {
                database: name.clone(),
                reason: "missing driver".to_string(),
            });
        }
        if Driver::parse(&database.driver).is_none() {
            return Err(AppError::UnsupportedDriver {
                database: name.clone(),
                reason: format!(
                    "driver {} not supported (expected one of {})",
                    database.driver,
                    Driver::SUPPORTED.join(", ")
                ),
            });
        }
    }
    Ok(())
}

fn validate_sinks(config: &Config) -> AppResult<()> {
    fn check<T: Validate>(family: &str, sinks: &BTreeMap<String, T>) -> AppResult<()> {
        for (name, sink) in sinks {
            sink.validate()
                .map_err(|e| AppError::Config(format!("{} {}: {}", family, name, e)))?;
        }
        Ok(())
    }

    check("influx", &config.influxes)?;
    check("influx2", &config.influxes2)?;
    check("influx3", &config.influxes3)?;
    Ok(())
}

/// Checks one resolved test. Templates are never executed and always pass.
pub fn check_test(config: &Config, name: &str, test: &Test) -> AppResult<()> {
    if test.is_template {
        return Ok(());
    }
    let invalid = |reason: String| AppError::InvalidTest {
        test: name.to_string(),
        reason,
    };

    if test.databases.is_empty() {
        return Err(invalid("no databases specified".to_string()));
    }
    for database in &test.databases {
        if !config.databases.contains_key(database) {
            return Err(invalid(format!("database '{}' does not exist", database)));
        }
    }

    check_references("influx", &test.influxes, &config.influxes).map_err(invalid)?;
    check_references("influx2", &test.influxes2, &config.influxes2).map_err(invalid)?;
    check_references("influx3", &test.influxes3, &config.influxes3).map_err(invalid)?;

    for target in &test.target_databases {
        match config.databases.get(target) {
            None => return Err(invalid(format!("target database '{}' does not exist", target))),
            Some(database) if database.insert_sql.trim().is_empty() => {
                return Err(invalid(format!(
                    "database '{}' used as a target database, but insert_sql is empty",
                    target
                )))
            }
            Some(_) => {}
        }
    }

    if !test.has_targets() {
        return Err(invalid(
            "no targets specified (influxes, influxes2, influxes3 and target_databases are all empty)"
                .to_string(),
        ));
    }
    let writes_influx = !(test.influxes.is_empty() && test.influxes2.is_empty() && test.influxes3.is_empty());
    if writes_influx && test.measurement.trim().is_empty() {
        return Err(invalid("measurement is required for influx sinks".to_string()));
    }
    if test.sql.trim().is_empty() {
        return Err(invalid("no sql specified".to_string()));
    }
    Ok(())
}

fn check_references<T>(family: &str, names: &[String], defined: &BTreeMap<String, T>) -> Result<(), String> {
    match names.iter().find(|name| !defined.contains_key(*name)) {
        Some(missing) => Err(format!("{} '{}' does not exist", family, missing)),
        None => Ok(()),
    }
}
