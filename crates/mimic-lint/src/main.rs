//! Mimic recording linter CLI.
//!
//! Usage:
//!   mimic-lint <recordings_dir_or_file>... [OPTIONS]

use clap::{Parser, ValueEnum};
use mimic_lint::{lint_config, lint_directory, LintIssue, LintOptions, LintResult, Severity};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    Text,
    Json,
}

/// Mimic Recording Linter
#[derive(Parser, Debug)]
#[command(name = "mimic-lint")]
#[command(author, version, about = "Validate Mimic recording files before loading them")]
struct Args {
    /// Recording files or directories to scan recursively
    #[arg(required_unless_present = "config")]
    paths: Vec<PathBuf>,

    /// Proxy configuration file to check as well
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: Output,

    /// Only show errors (hide warnings)
    #[arg(short = 'e', long)]
    errors_only: bool,

    /// Do not check template variables against capture groups
    #[arg(long)]
    skip_variables: bool,

    /// Strict mode - treat warnings as errors
    #[arg(short, long)]
    strict: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let options = LintOptions {
        skip_variable_check: args.skip_variables,
    };

    let mut result = LintResult::new();
    if let Some(config) = &args.config {
        result.merge(lint_config(config));
    }
    for path in &args.paths {
        result.merge(lint_directory(path, &options));
    }

    match args.output {
        Output::Json => match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to serialize results: {e}");
                return ExitCode::from(2);
            }
        },
        Output::Text => print_results(&result, &args),
    }

    if result.passed(args.strict) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_results(result: &LintResult, args: &Args) {
    println!("{BOLD}{CYAN}Mimic Recording Linter{RESET}");
    println!("{DIM}{RULE}{RESET}");
    for path in args.config.iter().chain(&args.paths) {
        println!("{DIM}Scanning:{RESET} {CYAN}{}{RESET}", path.display());
    }
    println!(
        "{DIM}Found:{RESET}    {BOLD}{}{RESET} file(s)\n",
        result.files_checked
    );

    let mut issues_by_file: BTreeMap<&Path, Vec<&LintIssue>> = BTreeMap::new();
    for issue in &result.issues {
        if args.errors_only && issue.severity != Severity::Error {
            continue;
        }
        issues_by_file.entry(issue.file.as_path()).or_default().push(issue);
    }

    if issues_by_file.is_empty() {
        println!("{GREEN}{BOLD}No issues found!{RESET}");
    }

    for (file, issues) in &issues_by_file {
        print_file(file, issues);
    }

    println!("{DIM}{RULE}{RESET}");
    println!(
        "  {DIM}Files checked:{RESET} {BOLD}{}{RESET}",
        result.files_checked
    );
    if result.errors > 0 {
        println!("  {RED}Errors:{RESET}    {BOLD}{RED}{}{RESET}", result.errors);
    } else {
        println!("  {GREEN}Errors:{RESET}    {BOLD}{GREEN}0{RESET}");
    }
    if result.warnings > 0 {
        println!(
            "  {YELLOW}Warnings:{RESET}  {BOLD}{YELLOW}{}{RESET}",
            result.warnings
        );
    } else {
        println!("  {DIM}Warnings:{RESET}  {BOLD}0{RESET}");
    }
    println!();

    if result.passed(true) {
        println!("{GREEN}{BOLD}All checks passed!{RESET}");
    } else if result.passed(args.strict) {
        println!("{YELLOW}{BOLD}Passed with warnings{RESET}");
    } else {
        println!("{RED}{BOLD}Linting failed{RESET}");
    }
}

fn print_file(file: &Path, issues: &[&LintIssue]) {
    let errors = issues
        .iter()
        .filter(|issue| issue.severity == Severity::Error)
        .count();
    let status = if errors > 0 {
        format!("{RED}FAIL{RESET}")
    } else {
        format!("{YELLOW}WARN{RESET}")
    };
    println!(
        "{status} {BOLD}{CYAN}{}{RESET} {DIM}({} issue(s)){RESET}",
        file.display(),
        issues.len()
    );

    for issue in issues {
        let color = severity_color(issue.severity);
        let location = issue
            .location
            .as_ref()
            .map(|l| format!("{DIM}[{RESET}{CYAN}{l}{RESET}{DIM}]{RESET} "))
            .unwrap_or_default();
        println!(
            "  {color}|{RESET} {location}{BOLD}{color}{}{RESET}: {} {DIM}({color}{}{DIM}){RESET}",
            issue.severity.label(),
            issue.message,
            issue.code
        );
        if let Some(suggestion) = &issue.suggestion {
            println!("  {color}|{RESET}   {GREEN}-> {suggestion}{RESET}");
        }
    }
    println!();
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => RED,
        Severity::Warning => YELLOW,
    }
}
