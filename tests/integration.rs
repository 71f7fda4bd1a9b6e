use std::{env, fs, path::PathBuf, process::Command};

const CONFIG: &str = r#"
[model]
start_year = 1990
final_year = 1999
min_age = 1
max_age = 10
initialisation_years = 30

[[time_steps]]
label = "spawn"
processes = []

[[time_steps]]
label = "fishing"
processes = ["recruitment", "mortality", "ageing"]

[[categories]]
label = "male"
mean_weight = [0.1, 0.3, 0.6, 0.9, 1.2, 1.4, 1.6, 1.7, 1.8, 1.9]

[[categories]]
label = "female"
mean_weight = [0.1, 0.35, 0.7, 1.0, 1.3, 1.6, 1.8, 1.9, 2.0, 2.1]

[[selectivities]]
label = "one"
type = "constant"
c = 1.0

[[selectivities]]
label = "trawl_sel"
type = "logistic"
a50 = 3.0
ato95 = 2.0

[[selectivities]]
label = "line_sel"
type = "logistic"
a50 = 5.0
ato95 = 2.0

[[selectivities]]
label = "maturity"
type = "logistic"
a50 = 4.0
ato95 = 2.0

[[penalties]]
label = "catch_penalty"
type = "process"

[[derived_quantities]]
label = "ssb"
type = "biomass"
time_step = "spawn"
categories = ["female"]
selectivities = ["maturity"]

[[time_varying]]
parameter = "process[mortality].catches{Trawl}"
years = [1995]
values = [0.0]

[[processes]]
label = "recruitment"
type = "recruitment_constant"
categories = ["male", "female"]
proportions = [0.5, 0.5]
r0 = 100000.0

[[processes]]
label = "ageing"
type = "ageing"
categories = ["male", "female"]

[[processes]]
label = "mortality"
type = "mortality_hybrid"
categories = ["male", "female"]
m = [0.2]
relative_m_by_age = ["one"]
max_f = 2.0

[processes.catches]
columns = ["year", "Trawl", "Line"]
rows = [
  [1991, 1000.0, 500.0],
  [1992, 2000.0, 500.0],
  [1993, 3000.0, 800.0],
  [1994, 3000.0, 800.0],
  [1995, 2000.0, 800.0],
  [1996, 2000.0, 600.0],
]

[processes.method]
columns = ["method", "category", "selectivity", "time_step", "penalty", "annual_duration"]
rows = [
  ["Trawl", "male,female", "trawl_sel,trawl_sel", "fishing", "catch_penalty", 1.0],
  ["Line", "male,female", "line_sel,line_sel", "fishing", "catch_penalty", 1.0],
]
"#;

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_path = test_dir.join("config.toml");
    fs::write(&config_path, CONFIG).expect("failed to write config file");

    fn run_bin(args: &[&str]) {
        let bin = PathBuf::from(env!("CARGO_BIN_EXE_popdyn"));

        let output = Command::new(bin)
            .args(args)
            .output()
            .expect("failed to execute command");

        let stdout_str =
            std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
        let stderr_str =
            std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

        assert!(
            output.status.success(),
            "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
        );
    }

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    run_bin(&["--sim-dir", test_dir_str, "run"]);
    run_bin(&[
        "--sim-dir",
        test_dir_str,
        "run",
        "--set",
        "process[mortality].max_f=1.5",
        "--set",
        "selectivity[line_sel].a50=6.0",
    ]);
    assert!(test_dir.join("run-0000").join("report.msgpack").is_file());
    assert!(test_dir.join("run-0001").join("report.msgpack").is_file());

    run_bin(&["--sim-dir", test_dir_str, "summary", "--run-idx", "0"]);
    run_bin(&["--sim-dir", test_dir_str, "summary", "--run-idx", "1"]);

    run_bin(&["--sim-dir", test_dir_str, "clean"]);
    assert!(!test_dir.join("run-0000").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn invalid_config_fails() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("invalid_config");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let contents = CONFIG.replace(r#""fishing", "catch_penalty""#, r#""spawn", "catch_penalty""#);
    fs::write(test_dir.join("config.toml"), contents).expect("failed to write config file");

    let output = Command::new(env!("CARGO_BIN_EXE_popdyn"))
        .args(["--sim-dir", test_dir.to_str().expect("non UTF-8 path"), "run"])
        .output()
        .expect("failed to execute command");
    assert!(!output.status.success());

    fs::remove_dir_all(&test_dir).ok();
}
