use clap::Parser;

use super::parsers::parse_address;
use super::*;
use crate::error::{AppError, AppResult, ValidationError};

#[test]
fn parse_driver_subcommand() -> AppResult<()> {
    let args = LoadmeshArgs::try_parse_from([
        "loadmesh",
        "driver",
        "--listen",
        "127.0.0.1:7101",
        "--drivers",
        "127.0.0.1:7100,http://127.0.0.1:7101/",
        "--driver-id",
        "1",
    ])?;
    match args.command {
        Command::Driver(driver) => {
            if driver.drivers != vec!["127.0.0.1:7100", "127.0.0.1:7101"] {
                return Err(AppError::validation(ValidationError::TestExpectationValue {
                    message: "Unexpected drivers",
                    value: format!("{:?}", driver.drivers),
                }));
            }
            if driver.driver_id != Some(1) || driver.listen != "127.0.0.1:7101" {
                return Err(AppError::validation("Unexpected driver identity"));
            }
            Ok(())
        }
        _ => Err(AppError::validation("Expected driver subcommand")),
    }
}

#[test]
fn parse_agent_subcommand_defaults() -> AppResult<()> {
    let args = LoadmeshArgs::try_parse_from([
        "loadmesh",
        "agent",
        "--drivers",
        "10.0.0.1:7100",
        "--verbose",
    ])?;
    if !args.verbose {
        return Err(AppError::validation("Expected global verbose flag"));
    }
    match args.command {
        Command::Agent(agent) => {
            if agent.listen != "127.0.0.1:7200" || agent.advertise.is_some() {
                return Err(AppError::validation("Unexpected agent defaults"));
            }
            Ok(())
        }
        _ => Err(AppError::validation("Expected agent subcommand")),
    }
}

#[test]
fn submit_requires_config() -> AppResult<()> {
    if LoadmeshArgs::try_parse_from(["loadmesh", "submit"]).is_ok() {
        return Err(AppError::validation("Submit without --config should fail"));
    }
    Ok(())
}

#[test]
fn parse_address_rejects_missing_port() -> AppResult<()> {
    for value in ["localhost", ":80", "host:notaport", "host:70000"] {
        if parse_address(value).is_ok() {
            return Err(AppError::validation(ValidationError::TestExpectationValue {
                message: "Address should be rejected",
                value: value.to_owned(),
            }));
        }
    }
    if parse_address(" http://example.com:8080/ ")? != "example.com:8080" {
        return Err(AppError::validation("Unexpected normalized address"));
    }
    Ok(())
}

#[test]
fn positive_numbers_reject_zero() -> AppResult<()> {
    if "0".parse::<PositiveUsize>().is_ok() || "x".parse::<PositiveU64>().is_ok() {
        return Err(AppError::validation("Zero and non-numbers must be rejected"));
    }
    if "3".parse::<PositiveU64>()?.get() != 3 {
        return Err(AppError::validation("Unexpected positive value"));
    }
    Ok(())
}
