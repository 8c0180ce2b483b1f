//! Tests for the run subcommand flags.

use super::parse;
use crate::cli::CliCommand;

#[test]
fn run_defaults() {
    match parse(&["fetchq", "run", "jobs.txt"]) {
        CliCommand::Run {
            jobfile,
            jobs,
            rate,
            no_resume,
            validate,
            force,
            no_notify,
            dry_run,
            root,
            history,
            depth,
            submodules,
        } => {
            assert_eq!(jobfile, "jobs.txt");
            assert!(jobs.is_none());
            assert!(rate.is_none());
            assert!(!no_resume);
            assert!(!validate);
            assert!(!force);
            assert!(!no_notify);
            assert!(!dry_run);
            assert!(root.is_none());
            assert!(history.is_none());
            assert!(depth.is_none());
            assert!(!submodules);
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn run_stdin_with_limits() {
    match parse(&["fetchq", "run", "-", "--jobs", "4", "--rate", "2.5"]) {
        CliCommand::Run {
            jobfile, jobs, rate, ..
        } => {
            assert_eq!(jobfile, "-");
            assert_eq!(jobs, Some(4));
            assert_eq!(rate, Some(2.5));
        }
        _ => panic!("expected Run with limits"),
    }
}

#[test]
fn run_switches() {
    match parse(&[
        "fetchq",
        "run",
        "jobs.txt",
        "--no-resume",
        "--validate",
        "--force",
        "--no-notify",
        "--dry-run",
    ]) {
        CliCommand::Run {
            no_resume,
            validate,
            force,
            no_notify,
            dry_run,
            ..
        } => {
            assert!(no_resume);
            assert!(validate);
            assert!(force);
            assert!(no_notify);
            assert!(dry_run);
        }
        _ => panic!("expected Run with switches"),
    }
}

#[test]
fn run_paths_and_clone_flags() {
    match parse(&[
        "fetchq",
        "run",
        "jobs.txt",
        "--root",
        "/ws",
        "--history",
        "/tmp/h.json",
        "--depth",
        "1",
        "--submodules",
    ]) {
        CliCommand::Run {
            root,
            history,
            depth,
            submodules,
            ..
        } => {
            assert_eq!(root.as_deref(), Some(std::path::Path::new("/ws")));
            assert_eq!(history.as_deref(), Some(std::path::Path::new("/tmp/h.json")));
            assert_eq!(depth, Some(1));
            assert!(submodules);
        }
        _ => panic!("expected Run with paths"),
    }
}

#[test]
fn run_requires_a_jobfile() {
    use clap::Parser;
    assert!(crate::cli::Cli::try_parse_from(["fetchq", "run"]).is_err());
}
