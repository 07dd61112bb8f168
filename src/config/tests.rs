use std::time::Duration;

use tempfile::tempdir;

use super::types::{ConfigFile, DurationValue};
use super::{Configuration, load_config_file, parse_duration_value, parse_execution_request};
use crate::error::ConfigError;
use crate::phase::HttpMethod;
use crate::runmode::RunMode;

const CLUSTER_TOML: &str = r#"
content_capacity = 50

[distributed]
drivers = ["127.0.0.1:7100", "127.0.0.1:7101"]
heartbeat_interval = "500ms"
redistribution_wait = 3
retry_attempts = 2

[run_mode]
concurrency = 8
wait_time = "10ms"

[[phases]]
name = "warmup"

[[phases.tests]]
name = "create"
count = 200
records_content = true

[phases.tests.request]
method = "post"
url = "http://localhost:3000/items"
body = "{}"
expected_status = 201

[[phases]]
name = "steady"

[phases.run_mode]
load = 40
round_interval = "250ms"

[phases.run_mode.ramp]
start = 10
end = 40
duration = "30s"

[[phases.tests]]
name = "browse"
count = 1000
measurable = false

[phases.tests.request]
url = "http://localhost:3000/items/{content}"
"#;

fn load_toml(content: &str) -> Result<Configuration, String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let path = dir.path().join("loadmesh.toml");
    std::fs::write(&path, content).map_err(|err| format!("write failed: {}", err))?;
    let file = load_config_file(&path).map_err(|err| err.to_string())?;
    Configuration::from_file(&file).map_err(|err| err.to_string())
}

#[test]
fn parse_toml_cluster_config() -> Result<(), String> {
    let config = load_toml(CLUSTER_TOML)?;
    let distributed = config.distributed();
    if distributed.drivers.len() != 2 {
        return Err("Unexpected driver count".to_owned());
    }
    if distributed.heartbeat_interval != Duration::from_millis(500)
        || distributed.redistribution_wait != Duration::from_secs(3)
        || distributed.retry_attempts != 2
    {
        return Err(format!("Unexpected distributed settings: {:?}", distributed));
    }
    if distributed.readiness_timeout != Duration::from_secs(30) {
        return Err("Readiness timeout should default".to_owned());
    }
    if config.content_capacity() != 50 {
        return Err("Unexpected content capacity".to_owned());
    }

    let warmup = config.phases().first().ok_or("Missing warmup phase")?;
    match &warmup.run_mode {
        RunMode::Normal(normal) if normal.concurrency == 8 && normal.wait_time_ms == 10 => {}
        other => return Err(format!("Warmup should use the default run mode: {:?}", other)),
    }
    let create = warmup.tests.first().ok_or("Missing create test")?;
    let request = create.request.as_ref().ok_or("Missing request")?;
    if request.method != HttpMethod::Post || request.expected_status != 201 {
        return Err("Unexpected request template".to_owned());
    }
    if !create.records_content || !create.measurable {
        return Err("Unexpected test flags".to_owned());
    }
    Ok(())
}

#[test]
fn ramp_duration_derives_rate_and_starts_at_ramp_start() -> Result<(), String> {
    let config = load_toml(CLUSTER_TOML)?;
    let steady = config.phases().get(1).ok_or("Missing steady phase")?;
    let RunMode::ConstantLoad(mode) = &steady.run_mode else {
        return Err("Steady should be constant load".to_owned());
    };
    if mode.load != 10 || mode.round_interval_ms != 250 {
        return Err(format!("Unexpected constant load: {:?}", mode));
    }
    let ramp = mode.ramp.as_ref().ok_or("Missing ramp")?;
    if (ramp.rate, ramp.interval_ms) != (1, 1000) {
        return Err(format!("Unexpected derived ramp: {:?}", ramp));
    }
    let browse = steady.tests.first().ok_or("Missing browse")?;
    if browse.measurable {
        return Err("Browse should not be measurable".to_owned());
    }
    if browse.request.as_ref().map(|request| request.method) != Some(HttpMethod::Get) {
        return Err("Method should default to GET".to_owned());
    }
    Ok(())
}

#[test]
fn invalid_configs_fail_fast() -> Result<(), String> {
    let cases = [
        (
            "[[phases]]\nname = \"a\"\n[[phases.tests]]\nname = \"t\"\ncount = 1\n",
            "PhaseWithoutRunMode",
        ),
        (
            "[run_mode]\nconcurrency = 1\nload = 1\n",
            "RunModeKind",
        ),
        (
            "[run_mode]\nconcurrency = 0\n",
            "FieldMustBePositive",
        ),
        (
            "[run_mode]\nconcurrency = 1\n[run_mode.ramp]\nstart = 1\nend = 5\n",
            "RampUnderspecified",
        ),
        (
            "[run_mode]\nconcurrency = 1\n[[phases]]\nname = \"a\"\n",
            "PhaseWithoutTests",
        ),
        (
            "[run_mode]\nconcurrency = 1\n[[phases]]\nname = \"a\"\n[[phases.tests]]\nname = \"t\"\ncount = 1\n[[phases.tests]]\nname = \"t\"\ncount = 2\n",
            "DuplicateTest",
        ),
        (
            "[distributed]\nheartbeat_interval = \"5x\"\n",
            "InvalidDuration",
        ),
        (
            "[run_mode]\nconcurrency = 1\n[[phases]]\nname = \"a\"\n[[phases.tests]]\nname = \"t\"\ncount = 1\n[phases.tests.request]\nurl = \"items/1\"\n",
            "InvalidRequest",
        ),
    ];
    for (content, expected) in cases {
        let file: ConfigFile =
            toml::from_str(content).map_err(|err| format!("toml failed: {}", err))?;
        let matched = match Configuration::from_file(&file) {
            Ok(_) => false,
            Err(err) => {
                let actual = format!("{:?}", err);
                actual.starts_with(expected)
            }
        };
        if !matched {
            return Err(format!("Expected {} for config:\n{}", expected, content));
        }
    }
    Ok(())
}

#[test]
fn execution_request_accepts_json_and_toml() -> Result<(), String> {
    let json = r#"{
        "run_mode": {"concurrency": 2},
        "phases": [{"name": "only", "tests": [{"name": "t", "count": 5}]}]
    }"#;
    let from_json = parse_execution_request(json).map_err(|err| err.to_string())?;
    let toml = "[run_mode]\nconcurrency = 2\n[[phases]]\nname = \"only\"\n[[phases.tests]]\nname = \"t\"\ncount = 5\n";
    let from_toml = parse_execution_request(toml).map_err(|err| err.to_string())?;
    if from_json.phases() != from_toml.phases() {
        return Err("JSON and TOML requests should agree".to_owned());
    }

    match parse_execution_request("[run_mode]\nconcurrency = 2\n") {
        Err(ConfigError::NoPhases) => {}
        other => return Err(format!("Expected NoPhases, got {:?}", other)),
    }
    match parse_execution_request("not a config {") {
        Err(ConfigError::UnparseableExecutionRequest { .. }) => Ok(()),
        other => Err(format!("Expected unparseable request, got {:?}", other)),
    }
}

#[test]
fn parse_duration_value_accepts_units() -> Result<(), String> {
    for (text, expected) in [
        ("500ms", Duration::from_millis(500)),
        ("10s", Duration::from_secs(10)),
        ("7", Duration::from_secs(7)),
        ("2m", Duration::from_secs(120)),
        ("1h", Duration::from_secs(3600)),
    ] {
        let parsed = parse_duration_value(text).map_err(|err| err.to_string())?;
        if parsed != expected {
            return Err(format!("Unexpected duration for {}: {:?}", text, parsed));
        }
    }
    if parse_duration_value("0s").is_ok() || parse_duration_value("5d").is_ok() {
        return Err("Zero and unknown units must be rejected".to_owned());
    }
    if DurationValue::Seconds(0).to_duration_allow_zero().ok() != Some(Duration::ZERO) {
        return Err("Zero should be allowed where delays may be zero".to_owned());
    }
    Ok(())
}
