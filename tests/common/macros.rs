use aqasm::frontend::{self, execute::Error, Config, Summary};
use aqasm::vm::{State, Vm};

pub fn run_prog(prog_src: &str, config: Config) -> Result<(Vm, Summary), Error> {
    frontend::execute(
        prog_src,
        &Config {
            max_steps: Some(5_000_000),
            ..config
        },
    )
}

/// Run a program to completion and insist it halted cleanly.
pub fn run_test(prog_src: &str, extensions: bool, bytes_per_word: u32) -> Result<Vm, Error> {
    let (vm, summary) = run_prog(
        prog_src,
        Config {
            extensions,
            bytes_per_word,
            ..Config::default()
        },
    )?;

    assert_eq!(summary.state, State::Halted);
    assert!(!summary.timeout);
    Ok(vm)
}
