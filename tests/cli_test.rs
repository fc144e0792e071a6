use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

#[test]
fn test_cli_replay_fixture() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("paysync"));
    cmd.arg("replay").arg("tests/fixtures/callbacks.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("checkout_id,outcome"))
        .stdout(predicate::str::contains("CO1,not_found"))
        .stdout(predicate::str::contains("CO2,not_found"));

    Ok(())
}

#[test]
fn test_cli_replay_trims_fields() {
    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "CheckoutRequestID, reference").unwrap();
    writeln!(csv, " CO3 , REF3 ").unwrap();
    writeln!(csv, "CO4,").unwrap();

    let mut cmd = Command::new(cargo_bin!("paysync"));
    cmd.arg("replay").arg(csv.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("CO3,not_found"))
        .stdout(predicate::str::contains("CO4,not_found"));
}

#[test]
fn test_cli_free_plan() {
    let mut cmd = Command::new(cargo_bin!("paysync"));
    cmd.args([
        "initiate",
        "--username",
        "alice",
        "--plan",
        "free",
        "--phone",
        "0712345678",
    ]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"completed\""))
        .stdout(predicate::str::contains("\"subscriptionType\": \"Free\""))
        .stdout(predicate::str::contains("\"manual\": false"))
        .stdout(predicate::str::contains("FREE-PLAN-"));
}

#[test]
fn test_cli_unreachable_gateway_completes_manually() {
    let mut cmd = Command::new(cargo_bin!("paysync"));
    cmd.args([
        "--gateway-url",
        "http://127.0.0.1:9",
        "initiate",
        "--username",
        "bob",
        "--plan",
        "basic",
        "--phone",
        "254712345678",
    ]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"manual\": true"))
        .stdout(predicate::str::contains("MANUAL-"));
}

#[test]
fn test_cli_balance_of_new_user() {
    let mut cmd = Command::new(cargo_bin!("paysync"));
    cmd.args(["balance", "carol"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("username,word_balance,payment_status"))
        .stdout(predicate::str::contains("carol,0,pending"));
}

#[test]
fn test_cli_history_and_balances_of_empty_store() {
    let mut cmd = Command::new(cargo_bin!("paysync"));
    cmd.args(["history", "carol"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));

    let mut cmd = Command::new(cargo_bin!("paysync"));
    cmd.arg("balance");
    cmd.assert().success().stdout(predicate::str::is_empty());
}

#[test]
fn test_cli_unknown_checkout_fails() {
    let mut cmd = Command::new(cargo_bin!("paysync"));
    cmd.args(["status", "NOPE"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Record not found"));
}

#[test]
fn test_cli_bad_config_fails() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "store: [1, 2").unwrap();

    let mut cmd = Command::new(cargo_bin!("paysync"));
    cmd.arg("--config").arg(config.path()).args(["balance", "x"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}
