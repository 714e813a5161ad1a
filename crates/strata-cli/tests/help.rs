use assert_cmd::cargo::cargo_bin_cmd;

#[test]
fn help_lists_every_command() {
    let assert = cargo_bin_cmd!("strata").arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    for command in [
        "layers-from-reproducible-storepaths",
        "layers-from-non-reproducible-storepaths",
        "image",
        "trace",
    ] {
        assert!(stdout.contains(command), "missing {command} in:\n{stdout}");
    }
}

#[test]
fn version_matches_the_package() {
    let assert = cargo_bin_cmd!("strata").arg("--version").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "{stdout}");
}

#[test]
fn unknown_commands_are_rejected() {
    cargo_bin_cmd!("strata").arg("push").assert().failure();
}
